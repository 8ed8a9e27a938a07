//! Device identity hashing shared by the firmware, the web client and the
//! distribution server.
//!
//! Two hashes live here:
//! - the device ID: a 3-round mix over the MCU's 96-bit unique ID, rendered as
//!   16 uppercase hex characters;
//! - the credential signature: a 32-bit multiplicative rolling hash over
//!   `deviceId + challenge + timestamp`, rendered as `SIG_XXXXXXXX`.
//!
//! Both must stay bit-identical with the firmware. Rotate amounts, constants
//! and 32-bit wraparound are part of the wire contract.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// "HBox" as an ASCII word, most significant byte first.
pub const SALT1: u32 = 0x4842_6F78;
/// "2024" as an ASCII word, most significant byte first.
pub const SALT2: u32 = 0x3230_3234;

pub const PRIME1: u32 = 0x9E37_79B9;
pub const PRIME2: u32 = 0x85EB_CA6B;
pub const PRIME3: u32 = 0xC2B2_AE35;

/// Seed of the signature rolling hash.
pub const SIGNATURE_SEED: u32 = 0x9E37_79B9;

/// Mask the firmware XORs with its tick counter to build the challenge nonce.
pub const CHALLENGE_MASK: u32 = 0xA5A5_A5A5;

/// The MCU's 96-bit factory unique ID as three 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueId {
    pub words: [u32; 3],
}

impl UniqueId {
    pub fn new(w0: u32, w1: u32, w2: u32) -> Self {
        Self { words: [w0, w1, w2] }
    }

    /// Parse the 12-byte little-endian dump read from the MCU's UID register.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 12 {
            return Err(Error::InvalidMessage(format!(
                "unique id must be 12 bytes, got {}",
                bytes.len()
            )));
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self::new(word(0), word(4), word(8)))
    }

    /// Parse the `XXXXXXXX-XXXXXXXX-XXXXXXXX` form reported as `originalUniqueId`.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.len() != 8) {
            return Err(Error::InvalidMessage(format!(
                "unique id '{s}' is not XXXXXXXX-XXXXXXXX-XXXXXXXX"
            )));
        }
        let mut words = [0u32; 3];
        for (slot, part) in words.iter_mut().zip(&parts) {
            *slot = u32::from_str_radix(part, 16)
                .map_err(|e| Error::InvalidMessage(format!("unique id word '{part}': {e}")))?;
        }
        Ok(Self { words })
    }

    /// Hashed device ID for this unique ID.
    pub fn device_id(&self) -> String {
        device_id_hash(self.words[0], self.words[1], self.words[2])
    }
}

impl std::fmt::Display for UniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08X}-{:08X}-{:08X}",
            self.words[0], self.words[1], self.words[2]
        )
    }
}

/// Derive the 64-bit device ID from the three unique-ID words.
pub fn device_id_hash(w0: u32, w1: u32, w2: u32) -> String {
    let mut h1 = (w0 ^ SALT1).rotate_left(13).wrapping_mul(PRIME1);
    h1 ^= w1;

    let mut h2 = (w1 ^ SALT2).rotate_left(17).wrapping_mul(PRIME2);
    h2 ^= w2;

    let mut h3 = (w2 ^ SALT1.wrapping_add(SALT2))
        .rotate_left(21)
        .wrapping_mul(PRIME3);
    h3 ^= h1;

    format!("{:08X}{:08X}", h1 ^ h2, h2 ^ h3)
}

/// Compute the credential signature for `deviceId + challenge + timestamp`.
///
/// The distribution server hashes UTF-16 code units, so this
/// does too; for the ASCII inputs the firmware produces it matches the
/// byte-wise firmware loop.
pub fn device_signature(device_id: &str, challenge: &str, timestamp: &str) -> String {
    let hash = device_id
        .encode_utf16()
        .chain(challenge.encode_utf16())
        .chain(timestamp.encode_utf16())
        .fold(SIGNATURE_SEED, |h, unit| {
            (h << 5).wrapping_add(h).wrapping_add(u32::from(unit))
        });
    format!("SIG_{hash:08X}")
}

/// Challenge string the firmware derives from its millisecond tick.
pub fn firmware_challenge(tick: u32) -> String {
    format!("DEV_{:08X}_{:08X}", tick, tick ^ CHALLENGE_MASK)
}

/// A device-issued credential as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCredential {
    #[serde(default, deserialize_with = "null_as_default")]
    pub device_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub original_unique_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub challenge: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub signature: String,
}

/// Firmware builds report absent fields as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl DeviceCredential {
    /// Issue a credential the way the firmware answers `get_device_auth`.
    pub fn issue(unique_id: &UniqueId, tick: u32) -> Self {
        let device_id = unique_id.device_id();
        let challenge = firmware_challenge(tick);
        let signature = device_signature(&device_id, &challenge, &tick.to_string());
        Self {
            device_id,
            original_unique_id: unique_id.to_string(),
            challenge,
            timestamp: u64::from(tick),
            signature,
        }
    }

    /// Whether the signature matches the other fields.
    pub fn is_signature_valid(&self) -> bool {
        device_signature(&self.device_id, &self.challenge, &self.timestamp.to_string())
            == self.signature
    }

    /// Encode as the base64-JSON blob sent in the `x-device-auth` header.
    pub fn to_header_value(&self) -> Result<String> {
        let json = serde_json::to_vec(&self.wire_payload())?;
        Ok(B64.encode(json))
    }

    /// The four fields the server verifies, as a JSON object.
    pub fn wire_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "deviceId": self.device_id,
            "challenge": self.challenge,
            "timestamp": self.timestamp,
            "signature": self.signature,
        })
    }
}
