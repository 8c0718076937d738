pub mod due;
pub mod intent;
pub mod payment;
pub mod unit;

pub use due::{Due, DueStatus, DueTerms};
pub use intent::{IntentStatus, OnlinePaymentIntent, DEFAULT_CURRENCY, DEFAULT_PROVIDER};
pub use payment::{Payment, PaymentFilter, PaymentMethod, PaymentState};
pub use unit::Unit;
