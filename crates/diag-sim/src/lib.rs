//! Diagnostic Transport Simulation Library
//!
//! This crate provides simulated backends for the diagnostic multiplexer so
//! it can be exercised without USB hardware or a kernel buffer device:
//!
//! - **UsbTransport**: per-context channels to an in-process [`UsbHost`]
//! - **MemoryDeviceTransport**: bounded per-context tables drained by a reader
//!
//! # Example
//!
//! ```rust
//! use diag_mux::{Multiplexer, MultiplexerConfig, TransportMode};
//! use diag_sim::{create_sim_transports, SimConfig};
//!
//! let sim = create_sim_transports(&SimConfig::default());
//! let mux = Multiplexer::initialize(MultiplexerConfig::default(), sim.transports())?;
//!
//! mux.switch_to(TransportMode::MemoryDevice)?;
//! assert_eq!(sim.memory_device.pending(0), 0);
//! # Ok::<(), diag_mux::MuxError>(())
//! ```

pub mod memory_device;
pub mod usb;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use diag_mux::TransportSet;
use serde::{Deserialize, Serialize};

pub use memory_device::{MdEntry, MemoryDeviceTransport, DEFAULT_TABLE_CAPACITY};
pub use usb::{create_usb_transport, UsbHost, UsbPacket, UsbTransport, DEFAULT_HOST_QUEUE_DEPTH};

/// Sizing for the simulated transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Device-to-host packets the USB link can hold
    pub usb_queue_depth: usize,
    /// Entries each memory-device table can hold
    pub md_table_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            usb_queue_depth: DEFAULT_HOST_QUEUE_DEPTH,
            md_table_capacity: DEFAULT_TABLE_CAPACITY,
        }
    }
}

/// Both simulated transports plus the USB host end
#[derive(Debug)]
pub struct SimTransports {
    /// USB backend
    pub usb: Arc<UsbTransport>,
    /// Memory-device backend
    pub memory_device: Arc<MemoryDeviceTransport>,
    /// Host side of the USB link
    pub host: UsbHost,
}

impl SimTransports {
    /// Transport set to hand to the multiplexer
    pub fn transports(&self) -> TransportSet {
        TransportSet::new(self.usb.clone(), self.memory_device.clone())
    }
}

/// Create a USB and a memory-device transport
pub fn create_sim_transports(config: &SimConfig) -> SimTransports {
    let (usb, host) = create_usb_transport(config.usb_queue_depth);
    SimTransports {
        usb,
        memory_device: Arc::new(MemoryDeviceTransport::new(config.md_table_capacity)),
        host,
    }
}
