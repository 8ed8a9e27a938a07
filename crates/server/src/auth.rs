//! Device challenge-response verification.
//!
//! A request carries `{deviceId, challenge, timestamp, signature}` as issued
//! by the controller. Checks run in a fixed order and stop at the first
//! failure:
//! 1. payload present and decodable (checked by the extractor)
//! 2. all four fields present
//! 3. device registered
//! 4. signature matches `deviceId + challenge + timestamp`
//! 5. challenge within its reuse window

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use hbox_link_core::identity::device_signature;
use serde_json::{Number, Value};
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::replay::ChallengeLedger;

/// Default challenge reuse window.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(120);

/// Where the middleware looks for the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthSource {
    /// `x-device-auth` header, base64-encoded JSON.
    #[default]
    Header,
    /// `deviceAuth` field of the JSON body.
    Body,
    /// `deviceAuth` query parameter, base64-encoded JSON or plain JSON.
    Query,
}

/// Verified device, attached to the request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedDevice(pub DeviceRecord);

pub struct DeviceAuthVerifier {
    registry: Option<Arc<dyn DeviceRegistry>>,
    ledger: ChallengeLedger,
}

impl DeviceAuthVerifier {
    pub fn new(registry: Option<Arc<dyn DeviceRegistry>>, expires_in: Duration) -> Self {
        Self {
            registry,
            ledger: ChallengeLedger::new(expires_in),
        }
    }

    pub fn ledger(&self) -> &ChallengeLedger {
        &self.ledger
    }

    /// Run every check against an already-extracted payload.
    pub fn verify(&self, payload: Option<&Value>) -> Result<DeviceRecord, AuthError> {
        let payload = payload.filter(|v| is_truthy(v)).ok_or(AuthError::MissingData)?;

        let device_id = field_text(payload, "deviceId");
        let challenge = field_text(payload, "challenge");
        let timestamp = field_text(payload, "timestamp");
        let signature = field_text(payload, "signature");
        let (Some(device_id), Some(challenge), Some(timestamp), Some(signature)) =
            (device_id, challenge, timestamp, signature)
        else {
            debug!("device auth payload incomplete");
            return Err(AuthError::Incomplete);
        };

        let registry = self.registry.as_ref().ok_or_else(|| {
            warn!("device auth requested with no registry configured");
            AuthError::RegistryUnavailable
        })?;
        let device = registry
            .find_device(&device_id)
            .map_err(|e| {
                warn!(error = %e, "device registry lookup failed");
                AuthError::Internal(e.to_string())
            })?
            .ok_or_else(|| {
                debug!(device_id = %device_id, "device not registered");
                AuthError::NotRegistered
            })?;

        let expected = device_signature(&device_id, &challenge, &timestamp);
        if signature != expected {
            debug!(device_id = %device_id, %challenge, "signature mismatch");
            return Err(AuthError::InvalidSignature);
        }

        self.ledger.check_and_record(&challenge)?;

        info!(device_id = %device.device_id, device_name = %device.device_name, "device authenticated");
        Ok(device)
    }
}

/// Decode a base64-encoded JSON credential.
pub fn decode_encoded_payload(raw: &str) -> Result<Value, AuthError> {
    let bytes = B64.decode(raw.trim()).map_err(|_| AuthError::InvalidFormat)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidFormat)
}

/// Query credentials may be base64 JSON or, for manual testing, plain JSON.
pub fn decode_query_payload(raw: &str) -> Result<Value, AuthError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|_| AuthError::InvalidFormat)
    } else {
        decode_encoded_payload(trimmed)
    }
}

/// JavaScript truthiness, which is what the firmware tooling relies on.
fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text of a present, truthy scalar field as it enters the signature.
fn field_text(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key).filter(|v| is_truthy(v))? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_text(n)),
        _ => None,
    }
}

/// Decimal form of a JSON number as JavaScript's `String()` renders it, so
/// `4660.0` signs as `4660`.
fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
        _ => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::registry::InMemoryRegistry;
    use chrono::Utc;
    use serde_json::json;

    const DEVICE_ID: &str = "BD4683746A06D565";

    fn record() -> DeviceRecord {
        DeviceRecord {
            device_id: DEVICE_ID.into(),
            raw_unique_id: "12345678-9ABCDEF0-0FEDCBA9".into(),
            device_name: "bench unit".into(),
            register_time: Utc::now(),
            last_seen: None,
            status: "active".into(),
        }
    }

    fn verifier() -> DeviceAuthVerifier {
        DeviceAuthVerifier::new(
            Some(Arc::new(InMemoryRegistry::new([record()]))),
            DEFAULT_EXPIRES_IN,
        )
    }

    fn payload() -> Value {
        json!({
            "deviceId": DEVICE_ID,
            "challenge": "DEV_00001234_A5A5B791",
            "timestamp": 4660,
            "signature": "SIG_19A00F46"
        })
    }

    struct BrokenRegistry;

    impl DeviceRegistry for BrokenRegistry {
        fn find_device(&self, _: &str) -> Result<Option<DeviceRecord>, RegistryError> {
            Err(RegistryError("disk on fire".into()))
        }
        fn devices(&self) -> Result<Vec<DeviceRecord>, RegistryError> {
            Err(RegistryError("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn valid_credential_passes() {
        let device = verifier().verify(Some(&payload())).unwrap();
        assert_eq!(device.device_id, DEVICE_ID);
    }

    #[tokio::test]
    async fn string_timestamp_signs_the_same() {
        let mut p = payload();
        p["timestamp"] = json!("4660");
        assert!(verifier().verify(Some(&p)).is_ok());
    }

    #[tokio::test]
    async fn integral_float_timestamp_signs_as_integer() {
        let mut p = payload();
        p["timestamp"] = json!(4660.0);
        assert!(verifier().verify(Some(&p)).is_ok());

        assert_eq!(number_text(&Number::from_f64(4660.0).unwrap()), "4660");
        assert_eq!(number_text(&Number::from_f64(0.5).unwrap()), "0.5");
        assert_eq!(number_text(&Number::from(4660u64)), "4660");
    }

    #[tokio::test]
    async fn missing_payload() {
        let v = verifier();
        assert_eq!(v.verify(None), Err(AuthError::MissingData));
        assert_eq!(v.verify(Some(&Value::Null)), Err(AuthError::MissingData));
        assert_eq!(v.verify(Some(&json!(""))), Err(AuthError::MissingData));
        assert_eq!(AuthError::MissingData.code(), "AUTH_MISSING");
    }

    #[tokio::test]
    async fn incomplete_payload() {
        let v = verifier();
        for (key, value) in [
            ("deviceId", json!("")),
            ("challenge", Value::Null),
            ("timestamp", json!(0)),
            ("signature", json!({})),
        ] {
            let mut p = payload();
            p[key] = value;
            assert_eq!(v.verify(Some(&p)), Err(AuthError::Incomplete), "{key}");
        }
        assert_eq!(v.verify(Some(&json!("DEV_1"))), Err(AuthError::Incomplete));
    }

    #[tokio::test]
    async fn registry_errors() {
        let none = DeviceAuthVerifier::new(None, DEFAULT_EXPIRES_IN);
        let err = none.verify(Some(&payload())).unwrap_err();
        assert_eq!(err, AuthError::RegistryUnavailable);
        assert_eq!(err.code(), "SERVER_ERROR");
        assert_eq!(err.status().as_u16(), 500);

        let broken = DeviceAuthVerifier::new(Some(Arc::new(BrokenRegistry)), DEFAULT_EXPIRES_IN);
        let err = broken.verify(Some(&payload())).unwrap_err();
        assert_eq!(err.code(), "AUTH_SERVER_ERROR");

        let mut p = payload();
        p["deviceId"] = json!("0000000000000000");
        assert_eq!(verifier().verify(Some(&p)), Err(AuthError::NotRegistered));
    }

    #[tokio::test]
    async fn tampered_signature_rejected() {
        let v = verifier();
        let mut p = payload();
        p["timestamp"] = json!(4661);
        assert_eq!(v.verify(Some(&p)), Err(AuthError::InvalidSignature));
        assert!(v.ledger().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn replay_window() {
        let v = verifier();
        v.verify(Some(&payload())).unwrap();
        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(v.verify(Some(&payload())).is_ok());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            v.verify(Some(&payload())),
            Err(AuthError::ChallengeExpired)
        );
    }

    #[test]
    fn payload_decoding() {
        let encoded = B64.encode(payload().to_string());
        assert_eq!(decode_encoded_payload(&encoded).unwrap(), payload());
        assert_eq!(decode_query_payload(&encoded).unwrap(), payload());
        assert_eq!(
            decode_query_payload(&payload().to_string()).unwrap(),
            payload()
        );
        assert_eq!(decode_encoded_payload("%%%"), Err(AuthError::InvalidFormat));
        assert_eq!(
            decode_encoded_payload(&B64.encode("not json")),
            Err(AuthError::InvalidFormat)
        );
    }
}
