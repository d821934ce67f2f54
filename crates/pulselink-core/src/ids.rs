use std::fmt;
use std::str::FromStr;

use blake2::digest::consts::U16;
use blake2::digest::{FixedOutput, KeyInit, Update};
use blake2::Blake2bMac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roles a relay session can hold. The wire byte feeds the insecure-ID hash,
/// so the numbering is part of the identity scheme and must stay stable.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ClientRole {
    AppClient,
    ThirdPartyStreaming,
    ThirdPartyRequestResponse,
}

impl ClientRole {
    pub fn wire_byte(self) -> u8 {
        match self {
            Self::AppClient => 0,
            Self::ThirdPartyStreaming => 1,
            Self::ThirdPartyRequestResponse => 2,
        }
    }

    pub fn is_third_party(self) -> bool {
        matches!(self, Self::ThirdPartyStreaming | Self::ThirdPartyRequestResponse)
    }

    /// Short label for structured log fields.
    pub fn label(self) -> &'static str {
        match self {
            Self::AppClient => "app",
            Self::ThirdPartyStreaming => "third_party_ws",
            Self::ThirdPartyRequestResponse => "third_party_http",
        }
    }
}

/// Opaque per-session address used on the wire. Unguessable (122 random bits).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecureId(String);

impl SecureId {
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SecureId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for SecureId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deterministic IP-derived identifier, valid only for the current process
/// lifetime (the keying salt is re-minted on restart).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InsecureId(String);

impl InsecureId {
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InsecureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mints both identifier families. Holds the process-local salt; losing it on
/// restart invalidates all previously issued insecure IDs, which is intended.
pub struct IdentityMinter {
    salt: [u8; 8],
}

impl IdentityMinter {
    pub fn new() -> Self {
        let mut salt = [0u8; 8];
        OsRng.fill_bytes(&mut salt);
        Self { salt }
    }

    /// Fixed-salt constructor for deterministic tests.
    pub fn with_salt(salt: [u8; 8]) -> Self {
        Self { salt }
    }

    pub fn secure_id(&self) -> SecureId {
        SecureId::mint()
    }

    /// Keyed BLAKE2b-128 over the role byte and the ASCII client IP,
    /// rendered as lowercase hex. Collisions are infeasible; equality is
    /// treated as identity.
    pub fn insecure_id(&self, client_ip: &str, role: ClientRole) -> InsecureId {
        let mut mac = Blake2bMac::<U16>::new_from_slice(&self.salt)
            .expect("8-byte salt is a valid blake2b key length");
        mac.update(&[role.wire_byte()]);
        mac.update(client_ip.as_bytes());
        InsecureId(hex::encode(mac.finalize_fixed()))
    }
}

impl Default for IdentityMinter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_ids_are_unique() {
        let a = SecureId::mint();
        let b = SecureId::mint();
        assert_ne!(a, b);
    }

    #[test]
    fn secure_id_display_and_from_str_roundtrip() {
        let id = SecureId::mint();
        let s = id.to_string();
        let parsed: SecureId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn secure_id_serde_roundtrip() {
        let id = SecureId::mint();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: SecureId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn insecure_id_is_deterministic_for_fixed_salt() {
        let minter = IdentityMinter::with_salt([7; 8]);
        let a = minter.insecure_id("192.0.2.1", ClientRole::AppClient);
        let b = minter.insecure_id("192.0.2.1", ClientRole::AppClient);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_roles_from_same_ip_yield_distinct_ids() {
        let minter = IdentityMinter::with_salt([7; 8]);
        let app = minter.insecure_id("192.0.2.1", ClientRole::AppClient);
        let ws = minter.insecure_id("192.0.2.1", ClientRole::ThirdPartyStreaming);
        let http = minter.insecure_id("192.0.2.1", ClientRole::ThirdPartyRequestResponse);
        assert_ne!(app, ws);
        assert_ne!(app, http);
        assert_ne!(ws, http);
    }

    #[test]
    fn distinct_salts_yield_distinct_ids() {
        let a = IdentityMinter::with_salt([1; 8]).insecure_id("192.0.2.1", ClientRole::AppClient);
        let b = IdentityMinter::with_salt([2; 8]).insecure_id("192.0.2.1", ClientRole::AppClient);
        assert_ne!(a, b);
    }

    #[test]
    fn insecure_id_is_lowercase_hex_of_digest_width() {
        let minter = IdentityMinter::with_salt([7; 8]);
        let id = minter.insecure_id("10.0.0.1", ClientRole::ThirdPartyRequestResponse);
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn role_wire_bytes_are_stable() {
        assert_eq!(ClientRole::AppClient.wire_byte(), 0);
        assert_eq!(ClientRole::ThirdPartyStreaming.wire_byte(), 1);
        assert_eq!(ClientRole::ThirdPartyRequestResponse.wire_byte(), 2);
    }

    #[test]
    fn role_third_party_predicate() {
        assert!(!ClientRole::AppClient.is_third_party());
        assert!(ClientRole::ThirdPartyStreaming.is_third_party());
        assert!(ClientRole::ThirdPartyRequestResponse.is_third_party());
    }
}
