//! Logical interface roles
//!
//! Three source links and one tunnel link. The wire encoding of a role inside
//! an outbound payload is confined to [`RoleSelector`].

use std::fmt;

use serde::{Deserialize, Deserializer};
use tracing::warn;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    #[default]
    Source1,
    Source2,
    Source3,
    Tunnel,
    Unassigned,
}

impl Role {
    /// Roles an interface can hold, in table order.
    pub const ASSIGNABLE: [Role; 4] = [Role::Source1, Role::Source2, Role::Source3, Role::Tunnel];

    /// Map a configuration string to a role.
    ///
    /// Matching is case-sensitive. Anything unrecognized falls back to
    /// `Source1`.
    pub fn from_config_str(value: &str) -> Role {
        match value {
            "source1" => Role::Source1,
            "source2" => Role::Source2,
            "source3" => Role::Source3,
            "tunnel" => Role::Tunnel,
            other => {
                warn!(role = other, "unrecognized role string, defaulting to source1");
                Role::Source1
            }
        }
    }

    /// Slot index in the role table, `None` for `Unassigned`.
    pub fn slot(self) -> Option<usize> {
        match self {
            Role::Source1 => Some(0),
            Role::Source2 => Some(1),
            Role::Source3 => Some(2),
            Role::Tunnel => Some(3),
            Role::Unassigned => None,
        }
    }

    pub fn is_assigned(self) -> bool {
        self != Role::Unassigned
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Source1 => "source1",
            Role::Source2 => "source2",
            Role::Source3 => "source3",
            Role::Tunnel => "tunnel",
            Role::Unassigned => "unassigned",
        };
        f.write_str(name)
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Role::from_config_str(&value))
    }
}

/// Location of the 2-bit role selector inside an outbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSelector {
    /// Index of the byte carrying the selector
    pub index_byte: usize,
    /// Bit position of the selector's low bit within that byte
    pub bit_offset: u8,
}

impl RoleSelector {
    const MASK: u8 = 0b11;

    /// Decode the destination role, `None` when the payload is too short.
    pub fn decode(&self, payload: &[u8]) -> Option<Role> {
        let byte = *payload.get(self.index_byte)?;
        let tag = byte.checked_shr(self.bit_offset as u32).unwrap_or(0) & Self::MASK;
        Some(match tag {
            0 => Role::Source1,
            1 => Role::Source2,
            2 => Role::Source3,
            _ => Role::Tunnel,
        })
    }

    /// Write `role` into `payload`, leaving the other bits untouched.
    ///
    /// Returns false when the payload is too short or the role is
    /// `Unassigned`.
    pub fn encode(&self, payload: &mut [u8], role: Role) -> bool {
        let (Some(tag), Some(byte)) = (role.slot(), payload.get_mut(self.index_byte)) else {
            return false;
        };
        let shift = self.bit_offset as u32;
        let mask = Self::MASK.checked_shl(shift).unwrap_or(0);
        *byte = (*byte & !mask) | ((tag as u8).checked_shl(shift).unwrap_or(0) & mask);
        true
    }
}

impl Default for RoleSelector {
    fn default() -> Self {
        RoleSelector {
            index_byte: 4,
            bit_offset: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_strings_are_case_sensitive() {
        assert_eq!(Role::from_config_str("source2"), Role::Source2);
        assert_eq!(Role::from_config_str("tunnel"), Role::Tunnel);
        assert_eq!(Role::from_config_str("Tunnel"), Role::Source1);
        assert_eq!(Role::from_config_str(""), Role::Source1);
    }

    #[test]
    fn test_role_deserialize() {
        let role: Role = serde_json::from_str("\"source3\"").unwrap();
        assert_eq!(role, Role::Source3);
        let role: Role = serde_json::from_str("\"bogus\"").unwrap();
        assert_eq!(role, Role::Source1);
    }

    #[test]
    fn test_selector_decode() {
        let selector = RoleSelector::default();
        // bits 5..4 of byte 4
        let mut payload = [0u8; 6];
        payload[4] = 0b1001_0000;
        assert_eq!(selector.decode(&payload), Some(Role::Source2));
        payload[4] = 0b1110_1111;
        assert_eq!(selector.decode(&payload), Some(Role::Source3));
        payload[4] = 0b0011_0000;
        assert_eq!(selector.decode(&payload), Some(Role::Tunnel));
        assert_eq!(selector.decode(&payload[..4]), None);
    }

    #[test]
    fn test_selector_encode_preserves_other_bits() {
        let selector = RoleSelector::default();
        let mut payload = [0xFFu8; 5];
        assert!(selector.encode(&mut payload, Role::Source1));
        assert_eq!(payload[4], 0b1100_1111);
        assert_eq!(selector.decode(&payload), Some(Role::Source1));
        assert!(!selector.encode(&mut payload, Role::Unassigned));
        assert!(!selector.encode(&mut payload[..3], Role::Tunnel));
    }
}
