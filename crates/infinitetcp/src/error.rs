//! Error types.

use infinitetcp_wire::CodecError;
use thiserror::Error;

use crate::state::LifecycleState;

/// A specialized `Result` type for client, server and connection operations.
pub type TcpResult<T> = std::result::Result<T, TcpError>;

/// Errors surfaced by bind/start/send and friends.
///
/// Faults inside a running receive loop are never returned to anyone; they
/// end the connection and reach listeners as a disconnect event.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TcpError {
    /// The operation is not legal in the current lifecycle state.
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// What the caller tried to do
        operation: &'static str,
        /// The state the instance was in
        state: LifecycleState,
    },

    /// The host could not be resolved.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The port is outside `0..=65535`.
    #[error("Port out of range: {0}")]
    OutOfRange(i64),

    /// There is no live connection to send on.
    #[error("Not connected")]
    NotConnected,

    /// A socket or stream fault.
    #[error("IO error: {0}")]
    Io(String),

    /// A record could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Decode(#[from] CodecError),
}

impl TcpError {
    pub(crate) fn invalid_state(operation: &'static str, state: LifecycleState) -> Self {
        Self::InvalidState { operation, state }
    }
}

impl From<std::io::Error> for TcpError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
