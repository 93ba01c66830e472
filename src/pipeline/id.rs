//! Identity types for the connection runtime.
//!
//! A [`ConnectionId`] is a newtype over `u32`; [`ConnectionIds`] hands them
//! out according to the configured [`ConnectionIdPolicy`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifies one open connection for its whole lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    pub const INVALID: ConnectionId = ConnectionId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ConnectionId(INVALID)")
        } else {
            write!(f, "ConnectionId({})", self.0)
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            f.write_str("-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Whether a reconnect to the same endpoint keeps its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionIdPolicy {
    /// A new id on every open.
    #[default]
    Fresh,
    /// The same endpoint name always maps to the same id.
    ReusePerEndpoint,
}

/// Allocates connection ids.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    policy: ConnectionIdPolicy,
    next: u32,
    by_endpoint: HashMap<String, ConnectionId>,
}

impl ConnectionIds {
    pub fn new(policy: ConnectionIdPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> ConnectionIdPolicy {
        self.policy
    }

    /// Id for a connection opened to `endpoint`.
    pub fn assign(&mut self, endpoint: &str) -> ConnectionId {
        match self.policy {
            ConnectionIdPolicy::Fresh => self.allocate(),
            ConnectionIdPolicy::ReusePerEndpoint => {
                if let Some(id) = self.by_endpoint.get(endpoint) {
                    return *id;
                }
                let id = self.allocate();
                self.by_endpoint.insert(endpoint.to_string(), id);
                id
            }
        }
    }

    fn allocate(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next);
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id() {
        let id = ConnectionId(42);
        assert!(id.is_valid());
        assert_eq!(id.to_string(), "42");
        assert!(!ConnectionId::INVALID.is_valid());
        assert_eq!(format!("{:?}", ConnectionId::INVALID), "ConnectionId(INVALID)");
    }

    #[test]
    fn test_fresh_policy() {
        let mut ids = ConnectionIds::new(ConnectionIdPolicy::Fresh);
        let a = ids.assign("COM3");
        let b = ids.assign("COM3");
        assert_ne!(a, b);
    }

    #[test]
    fn test_reuse_policy() {
        let mut ids = ConnectionIds::new(ConnectionIdPolicy::ReusePerEndpoint);
        let a = ids.assign("tcp://10.0.0.5:502");
        let b = ids.assign("COM3");
        assert_eq!(ids.assign("tcp://10.0.0.5:502"), a);
        assert_ne!(a, b);
    }
}
