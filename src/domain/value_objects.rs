use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-assigned request identifier.
///
/// Coined once by the client and carried unchanged across the coordinator,
/// the actors, the storage manager, the operation log, and replication.
/// It is the end-to-end idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Fresh random id, as a client would coin one.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog code of a book copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookCode(String);

impl BookCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BookCode {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BookCode {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for BookCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a library user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Site identifier. The system runs exactly two sites, `A` and `B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteId {
    A,
    B,
}

impl SiteId {
    /// The other site, the replication target.
    pub fn peer(self) -> Self {
        match self {
            SiteId::A => SiteId::B,
            SiteId::B => SiteId::A,
        }
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteId::A => f.write_str("A"),
            SiteId::B => f.write_str("B"),
        }
    }
}

impl FromStr for SiteId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "A" => Ok(SiteId::A),
            "B" => Ok(SiteId::B),
            other => Err(format!("unknown site id: {other}")),
        }
    }
}

/// The three client-visible operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    Prestar,
    Renovar,
    Devolver,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Prestar => f.write_str("PRESTAR"),
            OpKind::Renovar => f.write_str("RENOVAR"),
            OpKind::Devolver => f.write_str("DEVOLVER"),
        }
    }
}

/// Renewal counter of an active loan.
///
/// The cap is configuration (default 2) rather than a property of the type,
/// so the counter only knows how to count; the storage manager enforces the
/// limit before incrementing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenewalCount(u8);

impl RenewalCount {
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Whether another renewal is allowed under the given cap.
    pub fn can_renew(&self, max: u8) -> bool {
        self.0 < max
    }

    pub fn incremented(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u8> for RenewalCount {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_site_id_round_trips_through_str() {
        assert_eq!("A".parse::<SiteId>().unwrap(), SiteId::A);
        assert_eq!("B".parse::<SiteId>().unwrap(), SiteId::B);
        assert!("C".parse::<SiteId>().is_err());
        assert_eq!(SiteId::A.to_string(), "A");
    }

    #[test]
    fn test_site_peer_is_the_other_site() {
        assert_eq!(SiteId::A.peer(), SiteId::B);
        assert_eq!(SiteId::B.peer(), SiteId::A);
    }

    #[test]
    fn test_op_kind_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&OpKind::Prestar).unwrap(),
            "\"PRESTAR\""
        );
        assert_eq!(
            serde_json::from_str::<OpKind>("\"DEVOLVER\"").unwrap(),
            OpKind::Devolver
        );
    }

    #[test]
    fn test_renewal_count_respects_cap() {
        let count = RenewalCount::default();
        assert_eq!(count.value(), 0);
        assert!(count.can_renew(2));

        let count = count.incremented().incremented();
        assert_eq!(count.value(), 2);
        assert!(!count.can_renew(2));
        assert!(count.can_renew(3));
    }
}
