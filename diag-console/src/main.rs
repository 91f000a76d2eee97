//! Diagnostic Multiplexer Console
//!
//! An interactive front end that runs the transport multiplexer over the
//! simulated USB and memory-device backends. Commands are read from stdin;
//! packets reaching the simulated USB host are logged as they arrive.

mod commands;
mod console;
mod settings;

use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::Context;
use commands::{parse_command, CommandError};
use console::Console;
use diag_sim::{create_sim_transports, UsbHost};
use settings::Settings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "diagmux=info,diag_mux=info,diag_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting diagnostic multiplexer console");

    let settings = match config_arg()? {
        Some(path) => Settings::load_from(&path)?,
        None => Settings::load(),
    };
    let sim = create_sim_transports(&settings.sim);
    let (mut console, host) = Console::start(settings, sim)?;
    let host_task = tokio::spawn(watch_host(host));

    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(CommandError::Empty) => continue,
            Err(e) => {
                println!("error: {}", e);
                continue;
            }
        };

        match console.execute(command) {
            Ok(ControlFlow::Continue(output)) => println!("{}", output),
            Ok(ControlFlow::Break(())) => break,
            Err(e) => println!("error: {:#}", e),
        }
    }

    console.shutdown();
    host_task.abort();
    info!("Console stopped");
    Ok(())
}

/// `--config <path>` overrides the settings file
fn config_arg() -> anyhow::Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(None),
        Some("--config" | "-c") => args
            .next()
            .map(|path| Some(PathBuf::from(path)))
            .context("--config needs a path"),
        Some(other) => anyhow::bail!("unexpected argument '{}'", other),
    }
}

/// Log everything the device sends to the simulated host
async fn watch_host(mut host: UsbHost) {
    while let Some(packet) = host.recv().await {
        info!(
            "[usb host] context {} {}: {}",
            packet.context,
            packet.tag,
            String::from_utf8_lossy(&packet.data)
        );
    }
    debug!("USB link gone, host watcher exiting");
}
