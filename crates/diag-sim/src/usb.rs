//! Simulated USB transport
//!
//! Each registered context gets a channel that is connected when the
//! transport opens and disconnected when it closes. Writes are queued to a
//! [`UsbHost`] over a bounded channel, standing in for the host side of the
//! endpoint. The host can push data back, which completes a queued read.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use diag_mux::{
    BufferTag, ChannelEvent, Registration, RegistrationTable, Transport, TransportError,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Default depth of the device-to-host queue
pub const DEFAULT_HOST_QUEUE_DEPTH: usize = 64;

/// A buffer that left the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbPacket {
    /// Context that wrote it
    pub context: usize,
    /// Payload
    pub data: Vec<u8>,
    /// Producer tag
    pub tag: BufferTag,
}

#[derive(Debug, Default, Clone, Copy)]
struct UsbChannel {
    connected: bool,
    read_pending: bool,
}

/// USB transport with an in-process host
pub struct UsbTransport {
    channels: Mutex<HashMap<usize, UsbChannel>>,
    registrations: RwLock<Option<Arc<RegistrationTable>>>,
    host_tx: mpsc::Sender<UsbPacket>,
}

impl std::fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbTransport")
            .field("channels", &*self.channels.lock())
            .field("host_tx", &"<sender>")
            .finish()
    }
}

impl UsbTransport {
    /// Whether a context's channel is currently connected
    pub fn is_connected(&self, context: usize) -> bool {
        self.channels
            .lock()
            .get(&context)
            .is_some_and(|ch| ch.connected)
    }

    /// Whether a context has a read waiting for host data
    pub fn read_pending(&self, context: usize) -> bool {
        self.channels
            .lock()
            .get(&context)
            .is_some_and(|ch| ch.read_pending)
    }

    /// Number of contexts with a channel
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    fn registration(&self, context: usize) -> Option<Registration> {
        self.registrations.read().as_ref()?.get(context)
    }

    /// Deliver host-to-device data for `context`
    ///
    /// Completes the context's queued read through `read_done` and returns
    /// true; returns false if no read was pending on a connected channel.
    pub fn inject(&self, context: usize, data: &[u8]) -> bool {
        {
            let mut channels = self.channels.lock();
            match channels.get_mut(&context) {
                Some(ch) if ch.connected && ch.read_pending => ch.read_pending = false,
                _ => return false,
            }
        }

        match self.registration(context) {
            Some(reg) => {
                reg.ops.read_done(data, reg.token);
                true
            }
            None => false,
        }
    }
}

impl Transport for UsbTransport {
    fn attach(&self, registrations: Arc<RegistrationTable>) {
        *self.registrations.write() = Some(registrations);
    }

    fn register(&self, context: usize, _token: u32) -> Result<(), TransportError> {
        self.channels.lock().entry(context).or_default();
        debug!("USB channel ready for context {}", context);
        Ok(())
    }

    fn unregister(&self, context: usize) {
        self.channels.lock().remove(&context);
        debug!("USB channel for context {} released", context);
    }

    fn open(&self) -> Result<Vec<ChannelEvent>, TransportError> {
        let mut channels = self.channels.lock();
        let mut connected: Vec<usize> = channels
            .iter_mut()
            .filter(|(context, _)| self.registration(**context).is_some())
            .map(|(context, ch)| {
                ch.connected = true;
                *context
            })
            .collect();
        drop(channels);
        connected.sort_unstable();

        info!("USB connected ({} channels)", connected.len());
        Ok(connected
            .into_iter()
            .map(|context| ChannelEvent::Opened { context })
            .collect())
    }

    fn close(&self) -> Result<Vec<ChannelEvent>, TransportError> {
        let mut disconnected: Vec<usize> = self
            .channels
            .lock()
            .iter_mut()
            .filter(|(_, ch)| ch.connected)
            .map(|(context, ch)| {
                *ch = UsbChannel::default();
                *context
            })
            .collect();
        disconnected.sort_unstable();

        info!("USB disconnected ({} channels)", disconnected.len());
        Ok(disconnected
            .into_iter()
            .map(|context| ChannelEvent::Closed { context })
            .collect())
    }

    fn queue_read(&self, context: usize) -> Result<(), TransportError> {
        let mut channels = self.channels.lock();
        let ch = channels
            .get_mut(&context)
            .ok_or(TransportError::NotRegistered(context))?;
        if ch.connected {
            ch.read_pending = true;
        }
        Ok(())
    }

    fn write(&self, context: usize, data: &[u8], tag: BufferTag) -> Result<(), TransportError> {
        let channel = self.channels.lock().get(&context).copied();
        let channel = channel.ok_or(TransportError::NotRegistered(context))?;
        if !channel.connected {
            return Err(TransportError::NotConnected(context));
        }

        self.host_tx
            .try_send(UsbPacket {
                context,
                data: data.to_vec(),
                tag,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Busy(context),
                TrySendError::Closed(_) => TransportError::Disconnected,
            })?;

        if let Some(reg) = self.registration(context) {
            reg.ops.write_done(data, tag, reg.token);
        }
        Ok(())
    }
}

/// Host side of a simulated USB link
pub struct UsbHost {
    packets: mpsc::Receiver<UsbPacket>,
    transport: Weak<UsbTransport>,
}

impl std::fmt::Debug for UsbHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbHost")
            .field("packets", &"<receiver>")
            .finish()
    }
}

impl UsbHost {
    /// Wait for the next packet from the device
    ///
    /// Returns None once the transport is dropped.
    pub async fn recv(&mut self) -> Option<UsbPacket> {
        self.packets.recv().await
    }

    /// Take a packet if one is waiting
    pub fn try_recv(&mut self) -> Option<UsbPacket> {
        self.packets.try_recv().ok()
    }

    /// Send data to the device for `context`
    ///
    /// Returns true if it completed a queued read.
    pub fn inject(&self, context: usize, data: &[u8]) -> bool {
        self.transport
            .upgrade()
            .is_some_and(|transport| transport.inject(context, data))
    }
}

/// Create a USB transport and its host end
///
/// Returns (transport for the multiplexer, host for the test or console)
pub fn create_usb_transport(queue_depth: usize) -> (Arc<UsbTransport>, UsbHost) {
    let (host_tx, packets) = mpsc::channel(queue_depth.max(1));
    let transport = Arc::new(UsbTransport {
        channels: Mutex::new(HashMap::new()),
        registrations: RwLock::new(None),
        host_tx,
    });
    let host = UsbHost {
        packets,
        transport: Arc::downgrade(&transport),
    };
    (transport, host)
}
