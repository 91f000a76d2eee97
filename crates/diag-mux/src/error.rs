//! Error types for the multiplexer and its transports

use thiserror::Error;

use crate::mode::TransportMode;

/// Errors reported by a transport backend
///
/// The multiplexer never interprets these; they are propagated to the caller
/// wrapped in [`MuxError::Backend`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The context's channel is not connected to a host
    #[error("channel for context {0} is not connected")]
    NotConnected(usize),

    /// The transport has not been opened for this context
    #[error("transport is not open for context {0}")]
    NotOpen(usize),

    /// The context was never registered with this transport
    #[error("context {0} is not registered")]
    NotRegistered(usize),

    /// Outbound queue is full, try again later
    #[error("transport busy for context {0}")]
    Busy(usize),

    /// Buffer table has no free slots
    #[error("buffer table full for context {context} ({capacity} entries)")]
    BufferFull { context: usize, capacity: usize },

    /// The far end has gone away
    #[error("transport peer disconnected")]
    Disconnected,

    /// Backend-specific failure
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur in the multiplexer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// Context index out of range
    #[error("invalid context {context}: must be below {limit}")]
    InvalidContext { context: usize, limit: usize },

    /// Peripheral id out of range
    #[error("invalid peripheral {peripheral}: must be at most {limit}")]
    InvalidPeripheral { peripheral: u8, limit: u8 },

    /// Raw mode value does not name a transport
    #[error("invalid transport mode {0}")]
    InvalidMode(i32),

    /// Registration attempted without operation handlers
    #[error("no operation handlers supplied for context {0}")]
    MissingOps(usize),

    /// Configuration rejected at initialization
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Storage for multiplexer state could not be allocated
    #[error("unable to allocate {what}")]
    ResourceExhausted { what: &'static str },

    /// A transport backend reported failure
    #[error("{mode} transport failed: {source}")]
    Backend {
        /// Transport that failed
        mode: TransportMode,
        /// Underlying transport error
        #[source]
        source: TransportError,
    },

    /// Switch abandoned because the outgoing transport failed to close
    #[error("switch to {requested} aborted, {current} failed to close: {source}")]
    SwitchAborted {
        /// Mode that was requested
        requested: TransportMode,
        /// Mode that remains active
        current: TransportMode,
        /// Close failure
        #[source]
        source: TransportError,
    },

    /// Incoming transport failed to open; it is nevertheless active
    #[error("{mode} is active but failed to open: {source}")]
    OpenFailed {
        /// Newly active mode
        mode: TransportMode,
        /// Open failure
        #[source]
        source: TransportError,
    },
}

impl MuxError {
    /// Wrap a transport error with the mode it came from
    pub fn backend(mode: TransportMode, source: TransportError) -> Self {
        Self::Backend { mode, source }
    }

    /// Whether this is one of the argument validation errors
    ///
    /// These are always detected before any transport is touched.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidContext { .. }
                | Self::InvalidPeripheral { .. }
                | Self::InvalidMode(_)
                | Self::MissingOps(_)
                | Self::InvalidConfig(_)
        )
    }
}
