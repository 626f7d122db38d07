//! Strongly-typed identifiers for vmwarden

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a platform user (owner of at most one VM)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Local identity of a VM row in the record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmId(i64);

impl VmId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hypervisor-assigned VM identity, unique across the cluster.
/// Assigned once at clone time and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteVmId(u32);

impl RemoteVmId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RemoteVmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RemoteVmId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identity of a challenge on the hosting platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChallengeId(i64);

impl ChallengeId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_equality() {
        assert_eq!(UserId::new(7), UserId::new(7));
        assert_ne!(RemoteVmId::new(501), RemoteVmId::new(502));
    }

    #[test]
    fn ids_serialize_as_numbers() {
        let json = serde_json::to_string(&RemoteVmId::new(501)).unwrap();
        assert_eq!(json, "501");

        let parsed: RemoteVmId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RemoteVmId::new(501));
    }
}
