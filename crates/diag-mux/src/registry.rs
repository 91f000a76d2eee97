//! Per-context registration table
//!
//! One table exists per multiplexer and every logger descriptor points at
//! it, so registering a context once makes it visible to all transports.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::MuxError;
use crate::mode::TransportMode;
use crate::tag::BufferTag;

/// Handlers a producer/consumer registers for its context
///
/// Transports call these to report channel state and to return buffers.
/// Handlers may dispatch back into the multiplexer. Handlers invoked from a
/// switch or a dispatch must not call
/// [`Multiplexer::switch_to`](crate::Multiplexer::switch_to): the caller
/// still holds the switch lock for reading.
pub trait ContextOps: Send + Sync {
    /// The context's channel came up on `mode`
    fn open(&self, token: u32, mode: TransportMode);

    /// The context's channel went down on `mode`
    fn close(&self, token: u32, mode: TransportMode);

    /// A queued read completed
    fn read_done(&self, data: &[u8], token: u32);

    /// The transport is finished with a buffer previously written under `tag`
    fn write_done(&self, data: &[u8], tag: BufferTag, token: u32);
}

/// A registered context: the caller's token and handlers
#[derive(Clone)]
pub struct Registration {
    /// Opaque token handed back on every callback
    pub token: u32,
    /// Caller-supplied handlers
    pub ops: Arc<dyn ContextOps>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("token", &self.token)
            .field("ops", &"<ops>")
            .finish()
    }
}

/// Fixed-size table of registrations indexed by context
pub struct RegistrationTable {
    slots: RwLock<Vec<Option<Registration>>>,
}

impl RegistrationTable {
    /// Create a table with `num_contexts` empty slots
    ///
    /// Fails with [`MuxError::ResourceExhausted`] if the slots cannot be
    /// allocated.
    pub fn try_new(num_contexts: usize) -> Result<Self, MuxError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(num_contexts)
            .map_err(|_| MuxError::ResourceExhausted {
                what: "registration table",
            })?;
        slots.resize_with(num_contexts, || None);
        Ok(Self {
            slots: RwLock::new(slots),
        })
    }

    /// Number of context slots
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether the table has no slots at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registration for a context, if any
    pub fn get(&self, context: usize) -> Option<Registration> {
        self.slots.read().get(context).cloned().flatten()
    }

    /// Whether a context has handlers registered
    pub fn is_registered(&self, context: usize) -> bool {
        self.slots
            .read()
            .get(context)
            .is_some_and(|slot| slot.is_some())
    }

    /// Snapshot of every registered context
    ///
    /// Callers invoke handlers on the snapshot so no table lock is held
    /// while foreign code runs.
    pub fn registered(&self) -> Vec<(usize, Registration)> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .filter_map(|(ctx, slot)| slot.clone().map(|reg| (ctx, reg)))
            .collect()
    }

    /// Number of registered contexts
    pub fn registered_count(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_some()).count()
    }

    /// Store `entry` for `context`, returning what was there before
    pub(crate) fn replace(
        &self,
        context: usize,
        entry: Option<Registration>,
    ) -> Option<Registration> {
        let mut slots = self.slots.write();
        match slots.get_mut(context) {
            Some(slot) => std::mem::replace(slot, entry),
            None => None,
        }
    }

    pub(crate) fn clear(&self) {
        for slot in self.slots.write().iter_mut() {
            *slot = None;
        }
    }
}

impl fmt::Debug for RegistrationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read();
        f.debug_struct("RegistrationTable")
            .field("contexts", &slots.len())
            .field(
                "registered",
                &slots.iter().filter(|slot| slot.is_some()).count(),
            )
            .finish()
    }
}
