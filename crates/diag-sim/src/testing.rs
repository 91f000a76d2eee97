//! Shared fixtures for the transport tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, OnceLock, Weak};
use std::time::Duration;

use diag_mux::{BufferTag, ContextOps, Multiplexer, MultiplexerConfig, TransportMode};
use parking_lot::Mutex;

use crate::{create_sim_transports, SimConfig, SimTransports};

/// A callback received by [`RecordingOps`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Open(u32, TransportMode),
    Close(u32, TransportMode),
    ReadDone(Vec<u8>, u32),
    WriteDone(Vec<u8>, BufferTag, u32),
}

/// Handlers that record every callback
#[derive(Default)]
pub struct RecordingOps {
    calls: Mutex<Vec<Callback>>,
}

impl RecordingOps {
    pub fn take(&self) -> Vec<Callback> {
        std::mem::take(&mut *self.calls.lock())
    }
}

impl ContextOps for RecordingOps {
    fn open(&self, token: u32, mode: TransportMode) {
        self.calls.lock().push(Callback::Open(token, mode));
    }

    fn close(&self, token: u32, mode: TransportMode) {
        self.calls.lock().push(Callback::Close(token, mode));
    }

    fn read_done(&self, data: &[u8], token: u32) {
        self.calls.lock().push(Callback::ReadDone(data.to_vec(), token));
    }

    fn write_done(&self, data: &[u8], tag: BufferTag, token: u32) {
        self.calls
            .lock()
            .push(Callback::WriteDone(data.to_vec(), tag, token));
    }
}

/// Multiplexer over simulated transports with context 0 registered
pub fn registered_mux(config: SimConfig) -> (Multiplexer, SimTransports, Arc<RecordingOps>) {
    let sim = create_sim_transports(&config);
    let mux = Multiplexer::initialize(MultiplexerConfig::default(), sim.transports())
        .expect("initialize");
    let ops = Arc::new(RecordingOps::default());
    mux.register_context(0, 100, Some(ops.clone()))
        .expect("register");
    (mux, sim, ops)
}

/// Handlers that queue a read for context 0 whenever their channel opens or
/// a buffer comes back
#[derive(Default)]
pub struct ReentrantOps {
    mux: OnceLock<Weak<Multiplexer>>,
    released: AtomicUsize,
}

impl ReentrantOps {
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn requeue(&self) {
        if let Some(mux) = self.mux.get().and_then(Weak::upgrade) {
            mux.dispatch_queue_read(0).expect("queue read");
        }
    }
}

impl ContextOps for ReentrantOps {
    fn open(&self, _token: u32, _mode: TransportMode) {
        self.requeue();
    }

    fn close(&self, _token: u32, _mode: TransportMode) {}

    fn read_done(&self, _data: &[u8], _token: u32) {}

    fn write_done(&self, _data: &[u8], _tag: BufferTag, _token: u32) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.requeue();
    }
}

/// Shared multiplexer whose context 0 handlers dispatch back into it
pub fn reentrant_mux(config: SimConfig) -> (Arc<Multiplexer>, SimTransports, Arc<ReentrantOps>) {
    let sim = create_sim_transports(&config);
    let mux = Arc::new(
        Multiplexer::initialize(MultiplexerConfig::default(), sim.transports())
            .expect("initialize"),
    );
    let ops = Arc::new(ReentrantOps::default());
    ops.mux
        .set(Arc::downgrade(&mux))
        .expect("handlers bound once");
    mux.register_context(0, 100, Some(ops.clone()))
        .expect("register");
    (mux, sim, ops)
}

/// Run a switch on another thread; false if it did not finish in time
pub fn switch_with_timeout(mux: &Arc<Multiplexer>, mode: TransportMode) -> bool {
    let (done_tx, done_rx) = mpsc::channel();
    let mux = Arc::clone(mux);
    std::thread::spawn(move || {
        let _ = done_tx.send(mux.switch_to(mode).is_ok());
    });
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .unwrap_or(false)
}
