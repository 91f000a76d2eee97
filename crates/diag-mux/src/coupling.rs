//! Flags shared with consumers outside the multiplexer

use std::sync::atomic::{AtomicBool, Ordering};

use crate::mode::TransportMode;

/// Transport-coupling flags updated on every mode switch
///
/// Secondary consumers (for example a path that duplicates the stream to
/// local storage) read these to decide whether to act.
#[derive(Debug, Default)]
pub struct CouplingFlags {
    suppress_duplication: AtomicBool,
}

impl CouplingFlags {
    /// Create flags matching `mode`
    pub fn for_mode(mode: TransportMode) -> Self {
        let flags = Self::default();
        flags.apply(mode);
        flags
    }

    /// Whether the duplication path should drop its copy
    pub fn duplication_suppressed(&self) -> bool {
        self.suppress_duplication.load(Ordering::Acquire)
    }

    pub(crate) fn apply(&self, mode: TransportMode) {
        self.suppress_duplication
            .store(mode.suppresses_duplication(), Ordering::Release);
    }
}
