//! Wire-level service identifiers
//!
//! A listener registered under one record is only reachable by a connector
//! using the same record, so both ends must agree on secure vs insecure mode.
//! There is no handshake or framing beyond this pairing.

use core::fmt;

use uuid::Uuid;

/// Service uuid for authenticated (secure) links
pub const SECURE_SERVICE_UUID: Uuid = Uuid::from_u128(0xfc5deb71_9d4b_460b_b725_b06ea79bda5a);
/// Service uuid for unauthenticated (insecure) links
pub const INSECURE_SERVICE_UUID: Uuid = Uuid::from_u128(0xd620cd2b_e0a4_435b_b02e_40324d57195b);

/// Service name advertised with the secure uuid
pub const SECURE_SERVICE_NAME: &str = "BluetoothChatSecure";
/// Service name advertised with the insecure uuid
pub const INSECURE_SERVICE_NAME: &str = "BluetoothChatInsecure";

/// A well-known (uuid, name) pair that connectors and listeners rendezvous on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub name: &'static str,
    pub secure: bool,
}

impl ServiceRecord {
    pub const SECURE: ServiceRecord = ServiceRecord {
        uuid: SECURE_SERVICE_UUID,
        name: SECURE_SERVICE_NAME,
        secure: true,
    };

    pub const INSECURE: ServiceRecord = ServiceRecord {
        uuid: INSECURE_SERVICE_UUID,
        name: INSECURE_SERVICE_NAME,
        secure: false,
    };

    /// Record for the requested mode
    pub fn for_mode(secure: bool) -> Self {
        if secure {
            Self::SECURE
        } else {
            Self::INSECURE
        }
    }

    /// "Secure" or "Insecure", as used in log lines
    pub fn socket_type(&self) -> &'static str {
        if self.secure {
            "Secure"
        } else {
            "Insecure"
        }
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_constants_parse_back() {
        assert_eq!(
            SECURE_SERVICE_UUID,
            Uuid::parse_str("fc5deb71-9d4b-460b-b725-b06ea79bda5a").unwrap()
        );
        assert_eq!(
            INSECURE_SERVICE_UUID,
            Uuid::parse_str("d620cd2b-e0a4-435b-b02e-40324d57195b").unwrap()
        );
    }

    #[test]
    fn test_modes_are_distinct() {
        assert_ne!(ServiceRecord::for_mode(true), ServiceRecord::for_mode(false));
        assert_eq!(ServiceRecord::for_mode(true).socket_type(), "Secure");
        assert_eq!(ServiceRecord::for_mode(false).name, INSECURE_SERVICE_NAME);
    }
}
