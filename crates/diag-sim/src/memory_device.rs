//! Simulated memory-device transport
//!
//! Buffers writes per context in a bounded table until an on-device reader
//! drains them. Closing the transport, or a single peripheral, discards the
//! affected entries and hands each buffer back through `write_done`.

use std::collections::VecDeque;
use std::sync::Arc;

use diag_mux::{
    BufferTag, ChannelEvent, Registration, RegistrationTable, Transport, TransportError,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Default number of entries buffered per context
pub const DEFAULT_TABLE_CAPACITY: usize = 64;

/// A buffered write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdEntry {
    /// Payload
    pub data: Vec<u8>,
    /// Producer tag
    pub tag: BufferTag,
}

#[derive(Debug, Default)]
struct MdTable {
    registered: bool,
    open: bool,
    entries: VecDeque<MdEntry>,
}

/// Memory-device transport
pub struct MemoryDeviceTransport {
    capacity: usize,
    tables: Mutex<Vec<MdTable>>,
    registrations: RwLock<Option<Arc<RegistrationTable>>>,
}

impl std::fmt::Debug for MemoryDeviceTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDeviceTransport")
            .field("capacity", &self.capacity)
            .field("tables", &self.tables.lock().len())
            .finish()
    }
}

impl MemoryDeviceTransport {
    /// Create a transport buffering up to `capacity` entries per context
    ///
    /// Tables are allocated when the multiplexer initializes the transport.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tables: Mutex::new(Vec::new()),
            registrations: RwLock::new(None),
        }
    }

    /// Entries buffered per context
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a context's table is open for writes
    pub fn is_open(&self, context: usize) -> bool {
        self.tables.lock().get(context).is_some_and(|t| t.open)
    }

    /// Number of entries waiting for the reader
    pub fn pending(&self, context: usize) -> usize {
        self.tables
            .lock()
            .get(context)
            .map_or(0, |t| t.entries.len())
    }

    /// Hand every buffered entry of `context` to the reader
    ///
    /// Entries come back in write order; each is released to its producer
    /// through `write_done`.
    pub fn drain(&self, context: usize) -> Vec<MdEntry> {
        let drained: Vec<MdEntry> = {
            let mut tables = self.tables.lock();
            match tables.get_mut(context) {
                Some(table) => table.entries.drain(..).collect(),
                None => return Vec::new(),
            }
        };
        self.release(context, &drained);
        drained
    }

    fn registration(&self, context: usize) -> Option<Registration> {
        self.registrations.read().as_ref()?.get(context)
    }

    fn release(&self, context: usize, entries: &[MdEntry]) {
        if entries.is_empty() {
            return;
        }
        if let Some(reg) = self.registration(context) {
            for entry in entries {
                reg.ops.write_done(&entry.data, entry.tag, reg.token);
            }
        }
    }
}

impl Default for MemoryDeviceTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_CAPACITY)
    }
}

impl Transport for MemoryDeviceTransport {
    fn attach(&self, registrations: Arc<RegistrationTable>) {
        *self.registrations.write() = Some(registrations);
    }

    fn init(&self) -> Result<(), TransportError> {
        let num_contexts = self
            .registrations
            .read()
            .as_ref()
            .map(|table| table.len())
            .ok_or_else(|| TransportError::Other("memory device not attached".to_string()))?;

        let mut tables = self.tables.lock();
        tables.clear();
        tables.resize_with(num_contexts, || MdTable {
            entries: VecDeque::with_capacity(self.capacity),
            ..Default::default()
        });
        debug!(
            "Memory device tables allocated: {} x {} entries",
            num_contexts, self.capacity
        );
        Ok(())
    }

    fn register(&self, context: usize, _token: u32) -> Result<(), TransportError> {
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(context)
            .ok_or(TransportError::NotRegistered(context))?;
        table.registered = true;
        Ok(())
    }

    fn unregister(&self, context: usize) {
        if let Some(table) = self.tables.lock().get_mut(context) {
            table.registered = false;
        }
    }

    fn open(&self) -> Result<Vec<ChannelEvent>, TransportError> {
        let opened: Vec<ChannelEvent> = self
            .tables
            .lock()
            .iter_mut()
            .enumerate()
            .filter(|(_, t)| t.registered)
            .map(|(context, t)| {
                t.open = true;
                ChannelEvent::Opened { context }
            })
            .collect();

        info!("Memory device opened ({} contexts)", opened.len());
        Ok(opened)
    }

    fn close(&self) -> Result<Vec<ChannelEvent>, TransportError> {
        let mut events = Vec::new();
        let mut closed = 0;
        for (context, table) in self.tables.lock().iter_mut().enumerate() {
            if !table.open {
                continue;
            }
            table.open = false;
            closed += 1;
            if !table.entries.is_empty() {
                debug!(
                    "Discarding {} unread entries for context {}",
                    table.entries.len(),
                    context
                );
            }
            events.extend(table.entries.drain(..).map(|entry| ChannelEvent::Released {
                context,
                data: entry.data,
                tag: entry.tag,
            }));
            events.push(ChannelEvent::Closed { context });
        }

        info!("Memory device closed ({} contexts)", closed);
        Ok(events)
    }

    fn write(&self, context: usize, data: &[u8], tag: BufferTag) -> Result<(), TransportError> {
        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(context)
            .filter(|t| t.registered)
            .ok_or(TransportError::NotRegistered(context))?;
        if !table.open {
            return Err(TransportError::NotOpen(context));
        }
        if table.entries.len() >= self.capacity {
            warn!("Memory device table full for context {}", context);
            return Err(TransportError::BufferFull {
                context,
                capacity: self.capacity,
            });
        }

        table.entries.push_back(MdEntry {
            data: data.to_vec(),
            tag,
        });
        Ok(())
    }

    fn close_peripheral(&self, context: usize, peripheral: u8) -> Result<(), TransportError> {
        let discarded: Vec<MdEntry> = {
            let mut tables = self.tables.lock();
            let Some(table) = tables.get_mut(context) else {
                return Ok(());
            };
            let (dropped, kept) = table
                .entries
                .drain(..)
                .partition(|e| e.tag.peripheral() == peripheral);
            table.entries = kept;
            dropped.into_iter().collect()
        };

        debug!(
            "Closed peripheral {} of context {}: {} entries discarded",
            peripheral,
            context,
            discarded.len()
        );
        self.release(context, &discarded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use diag_mux::{BufferKind, MuxError, TransportMode};
    use proptest::prelude::*;

    use super::*;
    use crate::testing::{reentrant_mux, registered_mux, switch_with_timeout, Callback};
    use crate::SimConfig;

    fn tag(peripheral: u8, number: u8) -> BufferTag {
        BufferTag::new(peripheral, BufferKind::Data, number)
    }

    #[test]
    fn test_tables_allocated_at_init() {
        let (mux, sim, _ops) = registered_mux(SimConfig::default());
        assert_eq!(sim.memory_device.capacity(), DEFAULT_TABLE_CAPACITY);
        assert_eq!(sim.memory_device.tables.lock().len(), mux.config().num_contexts);
    }

    #[test]
    fn test_unattached_init_fails() {
        let md = MemoryDeviceTransport::default();
        assert!(matches!(md.init(), Err(TransportError::Other(_))));
    }

    #[test]
    fn test_write_requires_open() {
        let (mux, _sim, _ops) = registered_mux(SimConfig::default());
        mux.switch_to(TransportMode::MemoryDevice).unwrap();
        mux.switch_to(TransportMode::Usb).unwrap();

        // Back on USB; write directly to the closed memory device
        let md = mux.logger(TransportMode::MemoryDevice).transport();
        assert_eq!(md.write(0, b"x", tag(0, 0)), Err(TransportError::NotOpen(0)));
    }

    #[test]
    fn test_unregistered_context_write_is_dropped() {
        let (mux, sim, ops) = registered_mux(SimConfig::default());
        mux.switch_to(TransportMode::MemoryDevice).unwrap();
        ops.take();

        mux.dispatch_write(1, b"x", tag(0, 0)).unwrap();
        assert_eq!(sim.memory_device.pending(1), 0);
        assert!(ops.take().is_empty());

        // The table itself still refuses the context
        let md = mux.logger(TransportMode::MemoryDevice).transport();
        assert_eq!(
            md.write(1, b"x", tag(0, 0)),
            Err(TransportError::NotRegistered(1))
        );
    }

    #[test]
    fn test_unregister_forgets_context() {
        let (mux, sim, _ops) = registered_mux(SimConfig::default());
        sim.memory_device.unregister(0);

        mux.switch_to(TransportMode::MemoryDevice).unwrap();
        assert!(!sim.memory_device.is_open(0));
    }

    #[test]
    fn test_release_handler_can_dispatch_during_switch() {
        let (mux, sim, ops) = reentrant_mux(SimConfig::default());
        mux.switch_to(TransportMode::MemoryDevice).unwrap();
        mux.dispatch_write(0, b"unread", tag(0, 1)).unwrap();

        // Closing releases the entry; its handler queues a read on USB
        let switched = switch_with_timeout(&mux, TransportMode::Usb);
        assert!(switched);
        assert_eq!(ops.released(), 1);
        assert!(sim.usb.read_pending(0));
    }

    #[test]
    fn test_drain_returns_in_order_and_releases() {
        let (mux, sim, ops) = registered_mux(SimConfig::default());
        mux.switch_to(TransportMode::MemoryDevice).unwrap();
        ops.take();

        mux.dispatch_write(0, b"CD", tag(1, 1)).unwrap();
        mux.dispatch_write(0, b"EF", tag(2, 2)).unwrap();
        assert_eq!(sim.memory_device.pending(0), 2);
        // Buffers are held until read
        assert!(ops.take().is_empty());

        let entries = sim.memory_device.drain(0);
        assert_eq!(
            entries,
            vec![
                MdEntry {
                    data: b"CD".to_vec(),
                    tag: tag(1, 1)
                },
                MdEntry {
                    data: b"EF".to_vec(),
                    tag: tag(2, 2)
                },
            ]
        );
        assert_eq!(sim.memory_device.pending(0), 0);
        assert_eq!(
            ops.take(),
            vec![
                Callback::WriteDone(b"CD".to_vec(), tag(1, 1), 100),
                Callback::WriteDone(b"EF".to_vec(), tag(2, 2), 100),
            ]
        );
    }

    #[test]
    fn test_table_full() {
        let config = SimConfig {
            md_table_capacity: 2,
            ..Default::default()
        };
        let (mux, _sim, _ops) = registered_mux(config);
        mux.switch_to(TransportMode::MemoryDevice).unwrap();

        mux.dispatch_write(0, b"1", tag(0, 1)).unwrap();
        mux.dispatch_write(0, b"2", tag(0, 2)).unwrap();
        let err = mux.dispatch_write(0, b"3", tag(0, 3)).unwrap_err();
        assert_eq!(
            err,
            MuxError::backend(
                TransportMode::MemoryDevice,
                TransportError::BufferFull {
                    context: 0,
                    capacity: 2
                }
            )
        );
    }

    #[test]
    fn test_close_peripheral_discards_only_that_peripheral() {
        let (mux, sim, ops) = registered_mux(SimConfig::default());
        mux.switch_to(TransportMode::MemoryDevice).unwrap();
        let apps = mux.config().apps_peripheral();

        mux.dispatch_write(0, b"modem", tag(0, 1)).unwrap();
        mux.dispatch_write(0, b"lpass", tag(1, 2)).unwrap();
        mux.dispatch_write(0, b"apps", tag(apps, 3)).unwrap();
        ops.take();

        mux.dispatch_close_peripheral(0, 1).unwrap();
        assert_eq!(sim.memory_device.pending(0), 2);
        assert_eq!(
            ops.take(),
            vec![Callback::WriteDone(b"lpass".to_vec(), tag(1, 2), 100)]
        );

        mux.dispatch_close_peripheral(0, apps).unwrap();
        let remaining = sim.memory_device.drain(0);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].data, b"modem".to_vec());
    }

    #[test]
    fn test_close_releases_unread_entries() {
        let (mux, sim, ops) = registered_mux(SimConfig::default());
        mux.switch_to(TransportMode::MemoryDevice).unwrap();
        mux.dispatch_write(0, b"unread", tag(0, 1)).unwrap();
        ops.take();

        mux.switch_to(TransportMode::Usb).unwrap();

        assert!(!sim.memory_device.is_open(0));
        assert_eq!(sim.memory_device.pending(0), 0);
        let calls = ops.take();
        assert_eq!(
            &calls[..2],
            &[
                Callback::WriteDone(b"unread".to_vec(), tag(0, 1), 100),
                Callback::Close(100, TransportMode::MemoryDevice),
            ]
        );
        assert_eq!(calls[2], Callback::Open(100, TransportMode::Usb));
    }

    proptest! {
        #[test]
        fn buffered_count_never_exceeds_capacity(capacity in 1usize..8, writes in 0usize..20) {
            let config = SimConfig {
                md_table_capacity: capacity,
                ..Default::default()
            };
            let (mux, sim, _ops) = registered_mux(config);
            mux.switch_to(TransportMode::MemoryDevice).unwrap();

            let mut accepted = 0;
            for n in 0..writes {
                if mux.dispatch_write(0, &[n as u8], tag(0, n as u8)).is_ok() {
                    accepted += 1;
                }
            }

            prop_assert_eq!(accepted, writes.min(capacity));
            prop_assert_eq!(sim.memory_device.pending(0), writes.min(capacity));
        }
    }
}
