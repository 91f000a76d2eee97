//! Transport backend interface
//!
//! Every backend the multiplexer can route to implements [`Transport`].
//! `open`, `close` and `write` are mandatory; the remaining capabilities
//! default to successful no-ops so push-only backends need not provide
//! them.
//!
//! `open` and `close` run while the multiplexer holds its switch lock
//! exclusively. Rather than calling the context handlers from there, they
//! return [`ChannelEvent`]s that the multiplexer delivers once other
//! dispatch calls may proceed again.

use std::sync::Arc;

use crate::error::TransportError;
use crate::registry::RegistrationTable;
use crate::tag::BufferTag;

/// A handler notification produced while opening or closing a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The context's channel came up
    Opened {
        /// Context index
        context: usize,
    },
    /// The context's channel went down
    Closed {
        /// Context index
        context: usize,
    },
    /// A buffer the transport is finished with
    Released {
        /// Context index
        context: usize,
        /// Payload
        data: Vec<u8>,
        /// Tag it was written under
        tag: BufferTag,
    },
}

impl ChannelEvent {
    /// Context the event is for
    pub fn context(&self) -> usize {
        match self {
            ChannelEvent::Opened { context }
            | ChannelEvent::Closed { context }
            | ChannelEvent::Released { context, .. } => *context,
        }
    }
}

/// A diagnostic transport backend
///
/// Methods take `&self` because dispatch runs concurrently from many
/// producers; implementations guard their own state.
pub trait Transport: Send + Sync {
    /// Hand the transport the shared registration table
    ///
    /// Called once during multiplexer initialization, before [`init`](Self::init).
    fn attach(&self, _registrations: Arc<RegistrationTable>) {}

    /// Backend-specific setup run once during multiplexer initialization
    fn init(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Backend-specific registration of a context
    ///
    /// The context's handlers are already present in the shared table.
    fn register(&self, _context: usize, _token: u32) -> Result<(), TransportError> {
        Ok(())
    }

    /// Undo a [`register`](Self::register) that the multiplexer rolled back
    /// because another transport rejected the context
    fn unregister(&self, _context: usize) {}

    /// Bring the transport up for every registered context
    ///
    /// Returns the notifications for the contexts that came up, in order.
    fn open(&self) -> Result<Vec<ChannelEvent>, TransportError>;

    /// Tear the transport down for every context
    ///
    /// Must not return until in-flight reads and writes are quiesced.
    /// Buffers discarded by the close are returned as
    /// [`ChannelEvent::Released`] ahead of their context's
    /// [`ChannelEvent::Closed`].
    fn close(&self) -> Result<Vec<ChannelEvent>, TransportError>;

    /// Queue a read buffer for a context
    fn queue_read(&self, _context: usize) -> Result<(), TransportError> {
        Ok(())
    }

    /// Send `data` for a context
    fn write(&self, context: usize, data: &[u8], tag: BufferTag) -> Result<(), TransportError>;

    /// Close a single peripheral's channel within a context
    fn close_peripheral(&self, _context: usize, _peripheral: u8) -> Result<(), TransportError> {
        Ok(())
    }
}

/// The two backends a multiplexer routes between
#[derive(Clone)]
pub struct TransportSet {
    /// USB backend
    pub usb: Arc<dyn Transport>,
    /// Memory-device backend
    pub memory_device: Arc<dyn Transport>,
}

impl TransportSet {
    /// Bundle two backends
    pub fn new(usb: Arc<dyn Transport>, memory_device: Arc<dyn Transport>) -> Self {
        Self { usb, memory_device }
    }
}

impl std::fmt::Debug for TransportSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSet")
            .field("usb", &"<transport>")
            .field("memory_device", &"<transport>")
            .finish()
    }
}
