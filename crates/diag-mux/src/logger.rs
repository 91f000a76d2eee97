//! Logger descriptors
//!
//! A descriptor ties a transport to its mode and to the shared
//! registration table. The multiplexer owns one per mode and swaps which
//! one is active.

use std::fmt;
use std::sync::Arc;

use crate::mode::TransportMode;
use crate::registry::RegistrationTable;
use crate::transport::Transport;

/// A transport together with its identity
#[derive(Clone)]
pub struct LoggerDescriptor {
    mode: TransportMode,
    transport: Arc<dyn Transport>,
    registrations: Arc<RegistrationTable>,
}

impl LoggerDescriptor {
    /// Create a descriptor and attach the table to its transport
    pub(crate) fn new(
        mode: TransportMode,
        transport: Arc<dyn Transport>,
        registrations: Arc<RegistrationTable>,
    ) -> Self {
        transport.attach(Arc::clone(&registrations));
        Self {
            mode,
            transport,
            registrations,
        }
    }

    /// Mode this descriptor serves
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// The backend
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Shared registration table
    pub fn registrations(&self) -> &Arc<RegistrationTable> {
        &self.registrations
    }
}

impl fmt::Debug for LoggerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerDescriptor")
            .field("mode", &self.mode)
            .field("transport", &"<transport>")
            .field("registrations", &self.registrations)
            .finish()
    }
}
