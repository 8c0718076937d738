use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{ProviderError, ProviderEvent};

type HmacSha256 = Hmac<Sha256>;

/// Default replay window, in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verify a `t=<unix seconds>,v1=<hex hmac>` signature header.
///
/// The signed payload is `"{t}.{raw_body}"`. Deliveries whose timestamp is
/// further than `tolerance_secs` from `now` are rejected.
pub fn verify_signature(
    raw_body: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), ProviderError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',').map(str::trim) {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v1) = part.strip_prefix("v1=") {
            signatures.push(v1);
        }
    }

    let timestamp = timestamp.ok_or(ProviderError::MalformedSignature)?;
    if signatures.is_empty() {
        return Err(ProviderError::MalformedSignature);
    }
    let sent_at = timestamp
        .parse::<i64>()
        .map_err(|_| ProviderError::MalformedSignature)?;

    // t= is caller-controlled; an unrepresentable skew counts as stale
    let max_skew = u64::try_from(tolerance_secs).unwrap_or(0);
    match now.timestamp().checked_sub(sent_at).map(i64::unsigned_abs) {
        Some(skew) if skew <= max_skew => {}
        _ => return Err(ProviderError::StaleTimestamp),
    }

    let signed_payload = format!("{timestamp}.{raw_body}");
    // any v1 entry may match while the provider rotates secrets
    for signature in signatures {
        let Ok(expected) = hex::decode(signature) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| ProviderError::MissingSecret)?;
        mac.update(signed_payload.as_bytes());
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(ProviderError::SignatureMismatch)
}

/// Authenticate a delivery and decode its body. Without a secret nothing
/// can be authenticated, so the delivery is refused with `MissingSecret`.
pub fn parse_event(
    raw_body: &str,
    header: &str,
    secret: Option<&str>,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<ProviderEvent, ProviderError> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(ProviderError::MissingSecret)?;
    verify_signature(raw_body, header, secret, tolerance_secs, now)?;
    serde_json::from_str(raw_body).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Webhook secret and replay window as configured for the deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    pub secret: Option<String>,
    pub tolerance_secs: i64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: None,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }
}

impl WebhookSettings {
    pub fn parse(
        &self,
        raw_body: &str,
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<ProviderEvent, ProviderError> {
        parse_event(raw_body, header, self.secret.as_deref(), self.tolerance_secs, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &str =
        r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_123"}}}"#;

    fn sign(timestamp: i64, body: &str, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{body}").as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn test_valid_signature() {
        let header = sign(1_700_000_000, BODY, SECRET);
        assert!(verify_signature(BODY, &header, SECRET, 300, at(1_700_000_100)).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign(1_700_000_000, BODY, SECRET);
        let tampered = BODY.replace("pi_123", "pi_999");
        assert_eq!(
            verify_signature(&tampered, &header, SECRET, 300, at(1_700_000_000)),
            Err(ProviderError::SignatureMismatch)
        );
    }

    #[test]
    fn test_wrong_secret_and_stale_timestamp() {
        let header = sign(1_700_000_000, BODY, "whsec_other");
        assert_eq!(
            verify_signature(BODY, &header, SECRET, 300, at(1_700_000_000)),
            Err(ProviderError::SignatureMismatch)
        );

        let header = sign(1_700_000_000, BODY, SECRET);
        assert_eq!(
            verify_signature(BODY, &header, SECRET, 300, at(1_700_000_301)),
            Err(ProviderError::StaleTimestamp)
        );
    }

    #[test]
    fn test_malformed_header() {
        assert_eq!(
            verify_signature(BODY, "v1=abcd", SECRET, 300, at(0)),
            Err(ProviderError::MalformedSignature)
        );
        assert_eq!(
            verify_signature(BODY, "t=notanumber,v1=abcd", SECRET, 300, at(0)),
            Err(ProviderError::MalformedSignature)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        for t in [i64::MIN, i64::MAX, -1] {
            let header = format!("t={t},v1=00");
            assert_eq!(
                verify_signature(BODY, &header, SECRET, 300, at(1_700_000_000)),
                Err(ProviderError::StaleTimestamp),
                "t={t}"
            );
        }
    }

    #[test]
    fn test_settings_use_configured_tolerance() {
        let header = sign(1_700_000_000, BODY, SECRET);
        let settings = WebhookSettings {
            secret: Some(SECRET.to_string()),
            tolerance_secs: 60,
        };
        assert_eq!(
            settings.parse(BODY, &header, at(1_700_000_061)),
            Err(ProviderError::StaleTimestamp)
        );
        assert!(settings.parse(BODY, &header, at(1_700_000_060)).is_ok());
        assert_eq!(
            WebhookSettings::default().parse(BODY, &header, at(1_700_000_000)),
            Err(ProviderError::MissingSecret)
        );
    }

    #[test]
    fn test_parse_event_requires_secret() {
        let header = sign(1_700_000_000, BODY, SECRET);
        assert_eq!(
            parse_event(BODY, &header, None, 300, at(1_700_000_000)),
            Err(ProviderError::MissingSecret)
        );

        let event = parse_event(BODY, &header, Some(SECRET), 300, at(1_700_000_000)).unwrap();
        assert_eq!(event.intent_id(), Some("pi_123"));
    }
}
