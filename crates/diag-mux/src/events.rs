//! Events emitted by the multiplexer
//!
//! Lifecycle changes (initialization, registration, mode switches) are
//! buffered as [`MuxEvent`]s so front ends can show what happened without
//! scraping logs. Dispatch traffic is not recorded here.

use crate::error::TransportError;
use crate::mode::TransportMode;

/// Outcome of one mode switch
///
/// Both transport steps are reported even when the switch advanced, so a
/// failed `close` or `open` is never silently lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    /// Mode active before the switch (None if nothing was active)
    pub from: Option<TransportMode>,
    /// Mode active after the switch
    pub to: TransportMode,
    /// Result of closing the outgoing transport (None if nothing was active)
    pub close: Option<Result<(), TransportError>>,
    /// Result of opening the incoming transport (None if it was never opened)
    pub open: Option<Result<(), TransportError>>,
}

impl SwitchReport {
    /// Whether every transport step succeeded
    pub fn is_clean(&self) -> bool {
        !matches!(self.close, Some(Err(_))) && !matches!(self.open, Some(Err(_)))
    }

    /// Whether the active mode changed identity
    pub fn changed_mode(&self) -> bool {
        self.from != Some(self.to)
    }
}

/// Multiplexer lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    /// The multiplexer came up with `mode` active
    Initialized {
        /// Initially active mode
        mode: TransportMode,
    },

    /// A context was registered with every transport
    ContextRegistered {
        /// Context index
        context: usize,
        /// Caller token
        token: u32,
    },

    /// A transport rejected a context registration
    RegistrationFailed {
        /// Context index
        context: usize,
        /// Transport that failed
        mode: TransportMode,
        /// Backend error
        error: TransportError,
    },

    /// The active mode was (re)selected
    ModeSwitched(SwitchReport),

    /// A switch was abandoned and the old mode kept
    SwitchAborted {
        /// Mode that was requested
        requested: TransportMode,
        /// Mode still active
        current: TransportMode,
        /// Close failure that stopped the switch
        error: TransportError,
    },

    /// The multiplexer released its state
    Shutdown,
}

impl MuxEvent {
    /// Check if this event concerns the active mode
    pub fn is_mode_change(&self) -> bool {
        matches!(
            self,
            MuxEvent::Initialized { .. } | MuxEvent::ModeSwitched(_) | MuxEvent::SwitchAborted { .. }
        )
    }

    /// Get the context if this event is associated with one
    pub fn context(&self) -> Option<usize> {
        match self {
            MuxEvent::ContextRegistered { context, .. }
            | MuxEvent::RegistrationFailed { context, .. } => Some(*context),
            _ => None,
        }
    }
}
