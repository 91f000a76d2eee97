//! Diagnostic Transport Multiplexer
//!
//! This crate routes diagnostic traffic from a bounded set of processor
//! contexts to whichever logging transport is currently selected, and
//! switches between transports at runtime.
//!
//! # Architecture
//!
//! - A [`Transport`] is a backend (USB or memory device) that can be opened,
//!   closed and written to, and optionally queue reads or close a single
//!   peripheral.
//! - Every context registers its [`ContextOps`] once; the registration lands
//!   in a single [`RegistrationTable`] shared by both transports.
//! - A [`LoggerDescriptor`] pairs a transport with its [`TransportMode`].
//! - The [`Multiplexer`] holds the active descriptor, forwards dispatch calls
//!   to it and runs the switch protocol: close the old transport, swap, open
//!   the new one.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use diag_mux::{
//!     BufferKind, BufferTag, ContextOps, Multiplexer, MultiplexerConfig, TransportMode,
//!     TransportSet,
//! };
//! # fn transports() -> TransportSet { unimplemented!() }
//! # fn handlers() -> Arc<dyn ContextOps> { unimplemented!() }
//!
//! let mux = Multiplexer::initialize(MultiplexerConfig::default(), transports())?;
//! mux.register_context(0, 0, Some(handlers()))?;
//! mux.switch_to(TransportMode::Usb)?;
//!
//! mux.dispatch_write(0, b"\x7e\x01", BufferTag::new(0, BufferKind::Data, 1))?;
//!
//! // Move logging on-device
//! mux.switch_to(TransportMode::MemoryDevice)?;
//! # Ok::<(), diag_mux::MuxError>(())
//! ```

pub mod config;
pub mod coupling;
pub mod engine;
pub mod error;
pub mod events;
pub mod logger;
pub mod mode;
pub mod registry;
pub mod tag;
pub mod transport;

pub use config::{
    MultiplexerConfig, SwitchPolicy, DEFAULT_NUM_CONTEXTS, DEFAULT_NUM_PERIPHERALS,
};
pub use coupling::CouplingFlags;
pub use engine::Multiplexer;
pub use error::{MuxError, TransportError};
pub use events::{MuxEvent, SwitchReport};
pub use logger::LoggerDescriptor;
pub use mode::TransportMode;
pub use registry::{ContextOps, Registration, RegistrationTable};
pub use tag::{BufferKind, BufferTag};
pub use transport::{ChannelEvent, Transport, TransportSet};
