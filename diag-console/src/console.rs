//! Console session: owns the multiplexer and runs parsed commands

use std::fmt::Write as _;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use diag_mux::{BufferKind, BufferTag, ContextOps, Multiplexer, MuxEvent, TransportMode};
use diag_sim::{MemoryDeviceTransport, SimTransports, UsbHost, UsbTransport};
use tracing::{debug, info, warn};

use crate::commands::{ConsoleCommand, HELP};
use crate::settings::Settings;

/// Callbacks for one console-registered context
#[derive(Debug)]
pub struct ConsoleOps {
    name: String,
    reads_done: AtomicU64,
    writes_done: AtomicU64,
}

impl ConsoleOps {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reads_done: AtomicU64::new(0),
            writes_done: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads completed so far
    pub fn reads_done(&self) -> u64 {
        self.reads_done.load(Ordering::Relaxed)
    }

    /// Buffers released so far
    pub fn writes_done(&self) -> u64 {
        self.writes_done.load(Ordering::Relaxed)
    }
}

impl ContextOps for ConsoleOps {
    fn open(&self, token: u32, mode: TransportMode) {
        info!("[{}] channel open on {} (token {})", self.name, mode, token);
    }

    fn close(&self, token: u32, mode: TransportMode) {
        info!("[{}] channel closed on {} (token {})", self.name, mode, token);
    }

    fn read_done(&self, data: &[u8], _token: u32) {
        self.reads_done.fetch_add(1, Ordering::Relaxed);
        info!(
            "[{}] read {} bytes: {}",
            self.name,
            data.len(),
            String::from_utf8_lossy(data)
        );
    }

    fn write_done(&self, data: &[u8], tag: BufferTag, _token: u32) {
        self.writes_done.fetch_add(1, Ordering::Relaxed);
        debug!("[{}] released {} bytes ({})", self.name, data.len(), tag);
    }
}

/// An interactive multiplexer session
pub struct Console {
    mux: Multiplexer,
    usb: Arc<UsbTransport>,
    memory_device: Arc<MemoryDeviceTransport>,
    settings: Settings,
    contexts: Vec<(usize, Arc<ConsoleOps>)>,
    sequence: u8,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("mux", &self.mux)
            .field("contexts", &self.contexts.len())
            .finish()
    }
}

impl Console {
    /// Bring up the multiplexer, register configured contexts and enable
    /// the initial mode
    ///
    /// Returns the console and the USB host end, which the caller drives.
    pub fn start(settings: Settings, sim: SimTransports) -> anyhow::Result<(Self, UsbHost)> {
        let mux = Multiplexer::initialize(settings.multiplexer.clone(), sim.transports())?;

        let mut contexts = Vec::with_capacity(settings.contexts.len());
        for configured in &settings.contexts {
            let ops = Arc::new(ConsoleOps::new(configured.name.clone()));
            match mux.register_context(configured.context, configured.token, Some(ops.clone())) {
                Ok(()) if mux.registrations().is_registered(configured.context) => {
                    contexts.push((configured.context, ops));
                }
                Ok(()) => warn!(
                    "Context {} ({}) is outside the table, skipped",
                    configured.context, configured.name
                ),
                Err(e) => warn!(
                    "Could not register context {} ({}): {}",
                    configured.context, configured.name, e
                ),
            }
        }

        mux.switch_to(settings.initial_mode)?;

        let console = Self {
            mux,
            usb: sim.usb,
            memory_device: sim.memory_device,
            settings,
            contexts,
            sequence: 0,
        };
        Ok((console, sim.host))
    }

    /// Run one command; `Break` means the session should end
    pub fn execute(&mut self, command: ConsoleCommand) -> anyhow::Result<ControlFlow<(), String>> {
        let output = match command {
            ConsoleCommand::Mode(mode) => {
                let report = self.mux.switch_to(mode)?;
                let mut out = match report.from {
                    Some(from) => format!("switched {} -> {}", from, report.to),
                    None => format!("enabled {}", report.to),
                };
                if !report.is_clean() {
                    out.push_str(" (with transport errors, see 'events')");
                }
                out
            }
            ConsoleCommand::Write {
                context,
                peripheral,
                text,
            } => {
                let tag = BufferTag::new(peripheral, BufferKind::Data, self.next_sequence());
                self.mux.dispatch_write(context, text.as_bytes(), tag)?;
                format!("wrote {} bytes ({})", text.len(), tag)
            }
            ConsoleCommand::Read { context } => {
                self.mux.dispatch_queue_read(context)?;
                format!("read queued for context {}", context)
            }
            ConsoleCommand::Inject { context, text } => {
                if self.usb.inject(context, text.as_bytes()) {
                    format!("delivered {} bytes to context {}", text.len(), context)
                } else {
                    format!("no read pending on context {}, dropped", context)
                }
            }
            ConsoleCommand::Close {
                context,
                peripheral,
            } => {
                self.mux.dispatch_close_peripheral(context, peripheral)?;
                format!("closed peripheral {} on context {}", peripheral, context)
            }
            ConsoleCommand::Drain { context } => {
                let entries = self.memory_device.drain(context);
                let mut out = format!("{} entries", entries.len());
                for entry in entries {
                    let _ = write!(
                        out,
                        "\n  {}: {}",
                        entry.tag,
                        String::from_utf8_lossy(&entry.data)
                    );
                }
                out
            }
            ConsoleCommand::Status => self.status(),
            ConsoleCommand::Events => {
                let events = self.mux.drain_events();
                if events.is_empty() {
                    "no events".to_string()
                } else {
                    events
                        .iter()
                        .map(describe_event)
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            ConsoleCommand::Save => {
                let mut settings = self.settings.clone();
                if let Some(mode) = self.mux.mode() {
                    settings.initial_mode = mode;
                }
                let path = settings.save()?;
                self.settings = settings;
                format!("saved {}", path.display())
            }
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => return Ok(ControlFlow::Break(())),
        };
        Ok(ControlFlow::Continue(output))
    }

    /// Disable logging and drop all registrations
    pub fn shutdown(&self) {
        self.mux.shutdown();
    }

    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn status(&self) -> String {
        let mode = self
            .mux
            .mode()
            .map_or_else(|| "none".to_string(), |m| m.to_string());
        let mut out = format!(
            "mode: {}  duplication suppressed: {}  policy: {}",
            mode,
            self.mux.coupling().duplication_suppressed(),
            self.mux.config().switch_policy.name()
        );
        for (context, ops) in &self.contexts {
            let _ = write!(
                out,
                "\n  [{}] {:<8} usb: {}{}  md: {} ({} pending)  reads: {}  released: {}",
                context,
                ops.name(),
                if self.usb.is_connected(*context) {
                    "connected"
                } else {
                    "disconnected"
                },
                if self.usb.read_pending(*context) {
                    ", read pending"
                } else {
                    ""
                },
                if self.memory_device.is_open(*context) {
                    "open"
                } else {
                    "closed"
                },
                self.memory_device.pending(*context),
                ops.reads_done(),
                ops.writes_done()
            );
        }
        out
    }
}

fn describe_event(event: &MuxEvent) -> String {
    match event {
        MuxEvent::Initialized { mode } => format!("initialized ({})", mode),
        MuxEvent::ContextRegistered { context, token } => {
            format!("context {} registered (token {})", context, token)
        }
        MuxEvent::RegistrationFailed {
            context,
            mode,
            error,
        } => format!("context {} rejected by {}: {}", context, mode, error),
        MuxEvent::ModeSwitched(report) => {
            let mut out = match report.from {
                Some(from) => format!("switched {} -> {}", from, report.to),
                None => format!("enabled {}", report.to),
            };
            if let Some(Err(e)) = &report.close {
                let _ = write!(out, "; close failed: {}", e);
            }
            if let Some(Err(e)) = &report.open {
                let _ = write!(out, "; open failed: {}", e);
            }
            out
        }
        MuxEvent::SwitchAborted {
            requested,
            current,
            error,
        } => format!(
            "switch to {} aborted, staying on {}: {}",
            requested, current, error
        ),
        MuxEvent::Shutdown => "shut down".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use diag_sim::{create_sim_transports, SimConfig};

    use super::*;
    use crate::commands::parse_command;

    fn start() -> (Console, UsbHost) {
        let settings = Settings::default();
        let sim = create_sim_transports(&settings.sim);
        Console::start(settings, sim).unwrap()
    }

    fn run(console: &mut Console, line: &str) -> String {
        match console.execute(parse_command(line).unwrap()).unwrap() {
            ControlFlow::Continue(out) => out,
            ControlFlow::Break(()) => panic!("unexpected quit"),
        }
    }

    #[test]
    fn test_start_enables_usb() {
        let (console, _host) = start();
        assert_eq!(console.mux.mode(), Some(TransportMode::Usb));
        assert!(console.usb.is_connected(0));
        assert!(console.usb.is_connected(1));
        assert_eq!(console.contexts.len(), 2);
    }

    #[test]
    fn test_write_reaches_usb_host() {
        let (mut console, mut host) = start();
        run(&mut console, "write 1 2 hello");

        let packet = host.try_recv().unwrap();
        assert_eq!(packet.context, 1);
        assert_eq!(packet.data, b"hello");
        assert_eq!(packet.tag.peripheral(), 2);
        assert_eq!(console.contexts[1].1.writes_done(), 1);
    }

    #[test]
    fn test_md_write_then_drain() {
        let (mut console, mut host) = start();
        assert!(run(&mut console, "mode md").contains("usb -> memory-device"));

        run(&mut console, "write 0 1 one");
        run(&mut console, "write 0 1 two");
        assert!(host.try_recv().is_none());
        assert!(run(&mut console, "status").contains("2 pending"));

        let out = run(&mut console, "drain 0");
        assert!(out.starts_with("2 entries"));
        assert!(out.contains("one"));
        assert!(out.contains("two"));
        assert_eq!(console.memory_device.pending(0), 0);
    }

    #[test]
    fn test_read_then_inject() {
        let (mut console, _host) = start();
        assert!(run(&mut console, "inject 0 early").contains("dropped"));

        run(&mut console, "read 0");
        assert!(run(&mut console, "inject 0 ping").contains("delivered"));
        assert_eq!(console.contexts[0].1.reads_done(), 1);
    }

    #[test]
    fn test_invalid_context_is_error() {
        let (mut console, _host) = start();
        let result = console.execute(ConsoleCommand::Read { context: 9 });
        assert!(result.is_err());
    }

    #[test]
    fn test_events_and_quit() {
        let (mut console, _host) = start();
        let out = run(&mut console, "events");
        assert!(out.contains("initialized (usb)"));
        assert!(out.contains("context 0 registered"));
        assert!(out.contains("enabled usb"));
        assert_eq!(run(&mut console, "events"), "no events");

        assert_eq!(
            console.execute(ConsoleCommand::Quit).unwrap(),
            ControlFlow::Break(())
        );
    }

    #[test]
    fn test_out_of_range_context_is_skipped() {
        let mut settings = Settings::default();
        settings.contexts.push(crate::settings::ConfiguredContext {
            context: 7,
            token: 7,
            name: "far".to_string(),
        });
        let sim = create_sim_transports(&SimConfig::default());
        let (console, _host) = Console::start(settings, sim).unwrap();
        assert_eq!(console.contexts.len(), 2);
    }
}
