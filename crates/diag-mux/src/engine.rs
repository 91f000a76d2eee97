//! Multiplexer engine
//!
//! Owns the active logger descriptor, forwards dispatch calls to it and
//! runs the mode-switch state machine.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, trace, warn};

use crate::config::{MultiplexerConfig, SwitchPolicy};
use crate::coupling::CouplingFlags;
use crate::error::MuxError;
use crate::events::{MuxEvent, SwitchReport};
use crate::logger::LoggerDescriptor;
use crate::mode::TransportMode;
use crate::registry::{ContextOps, Registration, RegistrationTable};
use crate::tag::BufferTag;
use crate::transport::{ChannelEvent, TransportSet};

/// The multiplexer engine
///
/// Dispatch calls hold a read guard on the active descriptor for the whole
/// forward, and [`switch_to`](Self::switch_to) holds the write guard across
/// close, swap and open. A producer therefore never reaches a transport
/// that is being torn down; it waits for the switch to finish instead.
/// Handler notifications from close and open are delivered after the guard
/// is downgraded, so handlers can dispatch again.
pub struct Multiplexer {
    config: MultiplexerConfig,
    registrations: Arc<RegistrationTable>,
    /// Indexed by [`TransportMode::index`]
    loggers: [LoggerDescriptor; 2],
    active: RwLock<Option<LoggerDescriptor>>,
    coupling: Arc<CouplingFlags>,
    event_buffer: Mutex<Vec<MuxEvent>>,
}

impl Multiplexer {
    /// Wire both transports and make USB the active logger
    ///
    /// The initial transport is selected but not opened; a front end brings
    /// it up by calling [`switch_to`](Self::switch_to) once a client appears.
    pub fn initialize(
        config: MultiplexerConfig,
        transports: TransportSet,
    ) -> Result<Self, MuxError> {
        config.validate()?;

        let registrations = Arc::new(RegistrationTable::try_new(config.num_contexts)?);
        let usb = LoggerDescriptor::new(
            TransportMode::Usb,
            transports.usb,
            Arc::clone(&registrations),
        );
        let memory_device = LoggerDescriptor::new(
            TransportMode::MemoryDevice,
            transports.memory_device,
            Arc::clone(&registrations),
        );

        for logger in [&usb, &memory_device] {
            logger
                .transport()
                .init()
                .map_err(|e| MuxError::backend(logger.mode(), e))?;
        }

        let initial = TransportMode::Usb;
        info!(
            "Multiplexer initialized: {} contexts, {} peripherals, {} active",
            config.num_contexts,
            config.num_peripherals,
            initial.name()
        );

        Ok(Self {
            config,
            registrations,
            active: RwLock::new(Some(usb.clone())),
            loggers: [usb, memory_device],
            coupling: Arc::new(CouplingFlags::for_mode(initial)),
            event_buffer: Mutex::new(vec![MuxEvent::Initialized { mode: initial }]),
        })
    }

    /// Release multiplexer-owned state
    ///
    /// Clears the active logger and every registration. Transports are not
    /// closed. Later dispatch calls succeed without effect until a mode is
    /// selected again.
    pub fn shutdown(&self) {
        let mut active = self.active.write();
        *active = None;
        self.registrations.clear();
        drop(active);

        info!("Multiplexer shut down");
        self.event_buffer.lock().push(MuxEvent::Shutdown);
    }

    /// Get the current configuration
    pub fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    /// Get the currently active mode
    pub fn mode(&self) -> Option<TransportMode> {
        self.active.read().as_ref().map(LoggerDescriptor::mode)
    }

    /// Descriptor serving `mode`
    pub fn logger(&self, mode: TransportMode) -> &LoggerDescriptor {
        &self.loggers[mode.index()]
    }

    /// Shared registration table
    pub fn registrations(&self) -> &Arc<RegistrationTable> {
        &self.registrations
    }

    /// Coupling flags for secondary consumers
    pub fn coupling(&self) -> Arc<CouplingFlags> {
        Arc::clone(&self.coupling)
    }

    /// Register a context's handlers with every transport
    ///
    /// Missing handlers are an error. A context beyond the configured count
    /// is ignored so front ends built for more processors than this device
    /// has keep working.
    pub fn register_context(
        &self,
        context: usize,
        token: u32,
        ops: Option<Arc<dyn ContextOps>>,
    ) -> Result<(), MuxError> {
        let Some(ops) = ops else {
            return Err(MuxError::MissingOps(context));
        };

        if context >= self.config.num_contexts {
            debug!("Ignoring registration for foreign context {}", context);
            return Ok(());
        }

        let previous = self
            .registrations
            .replace(context, Some(Registration { token, ops }));

        for (n, logger) in self.loggers.iter().enumerate() {
            if let Err(e) = logger.transport().register(context, token) {
                error!(
                    "Unable to register {} operations for context {}: {}",
                    logger.mode().name(),
                    context,
                    e
                );
                // A re-registration keeps the backend slots of the entry it restores
                if previous.is_none() {
                    for accepted in &self.loggers[..n] {
                        accepted.transport().unregister(context);
                    }
                }
                self.registrations.replace(context, previous);
                self.event_buffer.lock().push(MuxEvent::RegistrationFailed {
                    context,
                    mode: logger.mode(),
                    error: e.clone(),
                });
                return Err(MuxError::backend(logger.mode(), e));
            }
        }

        info!("Registered context {} (token {})", context, token);
        self.event_buffer
            .lock()
            .push(MuxEvent::ContextRegistered { context, token });
        Ok(())
    }

    /// Forward a write to the active transport
    ///
    /// Succeeds without effect for a context nothing has registered.
    pub fn dispatch_write(
        &self,
        context: usize,
        data: &[u8],
        tag: BufferTag,
    ) -> Result<(), MuxError> {
        self.check_context(context)?;

        if !self.registrations.is_registered(context) {
            trace!("Context {} not registered, nothing to do", context);
            return Ok(());
        }

        let active = self.active.read_recursive();
        let Some(logger) = active.as_ref() else {
            return Ok(());
        };

        trace!(
            "Writing {} bytes for context {} ({}) to {}",
            data.len(),
            context,
            tag,
            logger.mode()
        );
        logger
            .transport()
            .write(context, data, tag)
            .map_err(|e| MuxError::backend(logger.mode(), e))
    }

    /// Ask the active transport to queue a read for a context
    ///
    /// Succeeds without effect for a context nothing has registered.
    pub fn dispatch_queue_read(&self, context: usize) -> Result<(), MuxError> {
        self.check_context(context)?;

        if !self.registrations.is_registered(context) {
            trace!("Context {} not registered, nothing to do", context);
            return Ok(());
        }

        let active = self.active.read_recursive();
        let Some(logger) = active.as_ref() else {
            return Ok(());
        };

        debug!("Queueing read for context {} on {}", context, logger.mode());
        logger
            .transport()
            .queue_read(context)
            .map_err(|e| MuxError::backend(logger.mode(), e))
    }

    /// Close one peripheral's channel on the active transport
    ///
    /// `peripheral` may equal the configured peripheral count, which names
    /// the producer-local (apps) channel. Succeeds without effect for a
    /// context nothing has registered.
    pub fn dispatch_close_peripheral(&self, context: usize, peripheral: u8) -> Result<(), MuxError> {
        self.check_context(context)?;
        if peripheral > self.config.num_peripherals {
            return Err(MuxError::InvalidPeripheral {
                peripheral,
                limit: self.config.num_peripherals,
            });
        }

        if !self.registrations.is_registered(context) {
            trace!("Context {} not registered, nothing to do", context);
            return Ok(());
        }

        let active = self.active.read_recursive();
        let Some(logger) = active.as_ref() else {
            return Ok(());
        };

        debug!(
            "Closing peripheral {} of context {} on {}",
            peripheral,
            context,
            logger.mode()
        );
        logger
            .transport()
            .close_peripheral(context, peripheral)
            .map_err(|e| MuxError::backend(logger.mode(), e))
    }

    /// Switch logging to a raw mode value
    pub fn switch_to_raw(&self, mode: i32) -> Result<SwitchReport, MuxError> {
        let mode = TransportMode::try_from(mode).inspect_err(|_| {
            error!("Invalid logging mode {}", mode);
        })?;
        self.switch_to(mode)
    }

    /// Close the active transport, make `mode` active and open it
    ///
    /// Re-selecting the active mode still closes and reopens it. How close
    /// and open failures are treated depends on the configured
    /// [`SwitchPolicy`]; either way they are reported in the returned
    /// [`SwitchReport`] or error.
    pub fn switch_to(&self, mode: TransportMode) -> Result<SwitchReport, MuxError> {
        let target = self.logger(mode).clone();

        let mut active = self.active.write();
        let from = active.as_ref().map(LoggerDescriptor::mode);
        let mut closed_events = Vec::new();
        let close = active.as_ref().map(|current| {
            current
                .transport()
                .close()
                .map(|events| closed_events = events)
        });

        if let (Some(current), Some(Err(e))) = (from, &close) {
            warn!("{} transport failed to close: {}", current.name(), e);
            if self.config.switch_policy == SwitchPolicy::AbortOnCloseFailure {
                warn!("Staying on {}", current.name());
                self.event_buffer.lock().push(MuxEvent::SwitchAborted {
                    requested: mode,
                    current,
                    error: e.clone(),
                });
                return Err(MuxError::SwitchAborted {
                    requested: mode,
                    current,
                    source: e.clone(),
                });
            }
        }

        *active = Some(target);
        let mut opened_events = Vec::new();
        let opened = self
            .logger(mode)
            .transport()
            .open()
            .map(|events| opened_events = events);
        self.coupling.apply(mode);

        // The new transport is up; let dispatch in while handlers run
        let active = RwLockWriteGuard::downgrade(active);
        if let Some(old) = from {
            self.deliver(old, closed_events);
        }
        self.deliver(mode, opened_events);
        drop(active);

        match from {
            Some(old) => info!("Switched logging from {} to {}", old.name(), mode.name()),
            None => info!("Logging enabled on {}", mode.name()),
        }
        if let Err(e) = &opened {
            warn!("{} transport failed to open: {}", mode.name(), e);
        }

        let report = SwitchReport {
            from,
            to: mode,
            close,
            open: Some(opened.clone()),
        };
        self.event_buffer
            .lock()
            .push(MuxEvent::ModeSwitched(report.clone()));

        match opened {
            Err(source) if self.config.switch_policy == SwitchPolicy::AbortOnCloseFailure => {
                Err(MuxError::OpenFailed { mode, source })
            }
            _ => Ok(report),
        }
    }

    /// Drain pending events
    pub fn drain_events(&self) -> Vec<MuxEvent> {
        std::mem::take(&mut *self.event_buffer.lock())
    }

    fn deliver(&self, mode: TransportMode, events: Vec<ChannelEvent>) {
        for event in events {
            let Some(reg) = self.registrations.get(event.context()) else {
                continue;
            };
            match event {
                ChannelEvent::Opened { .. } => reg.ops.open(reg.token, mode),
                ChannelEvent::Closed { .. } => reg.ops.close(reg.token, mode),
                ChannelEvent::Released { data, tag, .. } => {
                    reg.ops.write_done(&data, tag, reg.token)
                }
            }
        }
    }

    fn check_context(&self, context: usize) -> Result<(), MuxError> {
        if context >= self.config.num_contexts {
            return Err(MuxError::InvalidContext {
                context,
                limit: self.config.num_contexts,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("config", &self.config)
            .field("mode", &self.mode())
            .field("registrations", &self.registrations)
            .finish()
    }
}
