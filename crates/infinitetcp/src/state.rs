//! Lifecycle state shared by [`Client`](crate::Client) and [`Server`](crate::Server).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a client or server is in its `Unbound -> Bound -> Started -> Stopped` lifecycle.
///
/// `Stopped` is terminal; a stopped instance is neither re-bound nor restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No address or port has been set.
    #[default]
    Unbound,
    /// An address/port is set and validated; nothing is open yet.
    Bound,
    /// The socket is open (client connected, or server listening).
    Started,
    /// The instance was stopped or its connection ended.
    Stopped,
}

impl LifecycleState {
    /// Whether an address/port has ever been set.
    pub const fn is_bound(self) -> bool {
        !matches!(self, Self::Unbound)
    }

    /// Whether the instance is currently started.
    pub const fn is_started(self) -> bool {
        matches!(self, Self::Started)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => write!(f, "unbound"),
            Self::Bound => write!(f, "bound"),
            Self::Started => write!(f, "started"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!LifecycleState::Unbound.is_bound());
        assert!(LifecycleState::Bound.is_bound());
        assert!(LifecycleState::Stopped.is_bound());

        assert!(LifecycleState::Started.is_started());
        assert!(!LifecycleState::Bound.is_started());
        assert!(!LifecycleState::Stopped.is_started());
    }

    #[test]
    fn test_display() {
        assert_eq!(LifecycleState::default().to_string(), "unbound");
        assert_eq!(LifecycleState::Started.to_string(), "started");
    }
}
