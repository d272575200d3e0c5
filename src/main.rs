//! # EmbeddedComm
//!
//! Command-line front end for the EmbeddedComm memory-access protocol.
//!
//! - `demo` runs a controller against a simulated responder on an in-process
//!   bus, with the responder's cooperative loop driven by a tokio interval.
//! - `write`, `read` and `status` perform one transaction against a responder
//!   reachable through the serial port from `[serial]`.
//!
//! # Examples
//!
//! ```bash
//! embedded-comm demo --cycles 10
//! embedded-comm --config embedded-comm.toml write --address 0x7D0 --data 01ff
//! embedded-comm read --address 2000 --length 5 --json
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use embedded_comm::config::Config;
use embedded_comm::logging::init_logging;
use embedded_comm::transport::bus::SimulatedBus;
use embedded_comm::transport::serial::{SerialPeer, SerialTransport};
use embedded_comm::{Controller, ControllerOptions, Responder, SharedResponder, Status};

/// Address watched by the demo callback
const DEMO_WATCH_ADDRESS: u32 = 2000;

/// Width of the demo's callback counter (little-endian u32)
const COUNTER_SIZE: u32 = 4;

/// EmbeddedComm controller/responder tool
#[derive(Parser, Debug)]
#[command(name = "embedded-comm", version)]
struct Cli {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exercise a simulated responder until Ctrl+C or `--cycles` complete.
    Demo {
        /// Number of cycles to run (0 = until Ctrl+C).
        #[arg(long, default_value = "0")]
        cycles: u64,
        /// Pause between cycles in milliseconds.
        #[arg(long, default_value = "100")]
        period_ms: u64,
    },
    /// Write bytes to responder memory.
    Write {
        /// Start address (decimal or 0x-prefixed hex).
        #[arg(long, value_parser = parse_number)]
        address: u32,
        /// Payload as hex, e.g. 01ff2a.
        #[arg(long, value_parser = parse_hex)]
        data: HexBytes,
    },
    /// Read bytes from responder memory.
    Read {
        /// Start address (decimal or 0x-prefixed hex).
        #[arg(long, value_parser = parse_number)]
        address: u32,
        /// Number of bytes to read.
        #[arg(long, value_parser = parse_number)]
        length: u32,
    },
    /// Read the responder's status register.
    Status,
}

/// Hex payload parsed from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

/// One-shot command result
#[derive(Debug, Serialize)]
struct Report {
    operation: &'static str,
    peer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<u32>,
    status: Status,
    flags: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

/// Demo outcome
#[derive(Debug, Default, Serialize)]
struct DemoSummary {
    cycles: u64,
    failures: u64,
    restores_observed: u64,
    callback_counter: u32,
}

fn parse_number(value: &str) -> std::result::Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", value, e))
}

fn parse_hex(value: &str) -> std::result::Result<HexBytes, String> {
    let digits: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(format!("'{}' is not an even number of hex digits", value));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map(HexBytes)
        .map_err(|e| format!("invalid hex '{}': {}", value, e))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Watched address and counter address for a memory region of `memory_size`
fn demo_layout(memory_size: usize) -> Result<(u32, u32)> {
    let memory_size = u32::try_from(memory_size).context("memory_size does not fit 32 bits")?;
    if memory_size < 8 {
        bail!("demo needs a memory region of at least 8 bytes, got {}", memory_size);
    }

    let watch = DEMO_WATCH_ADDRESS.min(memory_size - 1 - COUNTER_SIZE);
    Ok((watch, watch + 1))
}

fn read_counter(memory: &[u8], counter_address: u32) -> u32 {
    let start = counter_address as usize;
    let mut raw = [0u8; COUNTER_SIZE as usize];
    if let Some(bytes) = memory.get(start..start + raw.len()) {
        raw.copy_from_slice(bytes);
    }
    u32::from_le_bytes(raw)
}

fn increment_counter(memory: &mut [u8], counter_address: u32) {
    let value = read_counter(memory, counter_address).wrapping_add(1);
    let start = counter_address as usize;
    if let Some(bytes) = memory.get_mut(start..start + COUNTER_SIZE as usize) {
        bytes.copy_from_slice(&value.to_le_bytes());
    }
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    match (&report.address, &report.data) {
        (Some(address), Some(data)) => {
            println!("{} @ {} on {}: {} [{}]", report.operation, address, report.peer, report.status, data)
        }
        (Some(address), None) => println!("{} @ {} on {}: {}", report.operation, address, report.peer, report.status),
        _ => println!("{} on {}: {}", report.operation, report.peer, report.status),
    }
    Ok(())
}

/// Run one controller transaction against the configured serial peer
async fn run_serial(config: &Config, command: Command, json: bool) -> Result<()> {
    let peer = SerialPeer::from_config(&config.serial);
    let transport = SerialTransport::from_config(&config.serial);
    let options = ControllerOptions::from(&config.controller);

    let report = tokio::task::spawn_blocking(move || -> Result<Report> {
        let mut controller = Controller::with_options(transport, options);
        let peer_name = peer.to_string();

        let (operation, address, status, data) = match command {
            Command::Write { address, data } => {
                ("write", Some(address), controller.write(&peer, address, &data.0)?, None)
            }
            Command::Read { address, length } => {
                let mut buffer = vec![0u8; length as usize];
                let status = controller.read(&peer, address, &mut buffer)?;
                ("read", Some(address), status, Some(to_hex(&buffer)))
            }
            Command::Status => ("status", None, controller.read_status(&peer)?, None),
            Command::Demo { .. } => bail!("demo does not use the serial transport"),
        };

        Ok(Report {
            operation,
            peer: peer_name,
            address,
            status,
            flags: status.flag_names(),
            data,
        })
    })
    .await
    .context("serial task panicked")??;

    print_report(&report, json)
}

/// Controller side of one demo cycle; returns (failed, restore observed)
fn demo_cycle(
    controller: &mut Controller<SimulatedBus>,
    bus_address: u8,
    watch: u32,
    cycle: u64,
) -> embedded_comm::Result<(bool, bool)> {
    let value = (cycle & 0xFF) as u8;

    let written = controller.write(&bus_address, watch, &[value])?;
    let corrupted = controller.write_corrupted(&bus_address, watch, &[!value])?;
    let ready = controller.wait_ready(&bus_address)?;

    let mut readback = [0u8; 1];
    let read = controller.read(&bus_address, watch, &mut readback)?;

    debug!(
        "Cycle {}: write {}, corrupted write {}, ready {}, read {} -> 0x{:02X}",
        cycle, written, corrupted, ready, read, readback[0]
    );

    let restored = corrupted.contains(Status::DATA_CORRUPTED) || corrupted.is_busy();
    let failed = !written.is_ok() || !ready.is_ok() || !read.is_ok() || readback[0] != value;
    Ok((failed, restored))
}

/// Simulated bus demo
async fn run_demo(config: &Config, cycles: u64, period_ms: u64, json: bool) -> Result<()> {
    let (watch, counter_address) = demo_layout(config.responder.memory_size)?;
    let bus_address = config.responder.bus_address;

    let mut responder = Responder::from_config(&config.responder);
    responder.on_memory_change(watch..watch + 1, move |memory: &mut [u8]| {
        increment_counter(memory, counter_address);
    })?;
    let responder = SharedResponder::new(responder);

    let bus = SimulatedBus::new();
    bus.attach(bus_address, responder.clone())?;
    info!(
        "Responder at 0x{:02X}: {} bytes, watching address {}",
        bus_address, config.responder.memory_size, watch
    );

    // Cooperative loop of the responder
    let poller = bus.clone();
    let mut process_interval = interval(Duration::from_millis(config.responder.process_interval_ms));
    let poll_task = tokio::spawn(async move {
        loop {
            process_interval.tick().await;
            poller.poll_all();
        }
    });

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let options = ControllerOptions::from(&config.controller);
    let mut controller = Controller::with_options(bus, options);

    let mut cycles_task = tokio::task::spawn_blocking(move || -> embedded_comm::Result<DemoSummary> {
        let mut summary = DemoSummary::default();

        while !stop_flag.load(Ordering::Relaxed) && (cycles == 0 || summary.cycles < cycles) {
            let (failed, restored) = demo_cycle(&mut controller, bus_address, watch, summary.cycles)?;
            summary.cycles += 1;
            summary.failures += u64::from(failed);
            summary.restores_observed += u64::from(restored);

            if failed {
                warn!("Demo cycle {} failed", summary.cycles);
            }
            thread::sleep(Duration::from_millis(period_ms));
        }

        Ok(summary)
    });

    info!("Running demo, press Ctrl+C to exit");

    let result = tokio::select! {
        result = &mut cycles_task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            stop.store(true, Ordering::Relaxed);
            cycles_task.await
        }
    };
    poll_task.abort();

    let mut summary = result.context("demo task panicked")??;
    summary.callback_counter = read_counter(responder.lock().memory(), counter_address);

    info!(
        "Demo finished: {} cycle(s), {} failure(s), callback counter {}",
        summary.cycles, summary.failures, summary.callback_counter
    );

    if json {
        println!("{}", serde_json::to_string(&summary)?);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let _log_guard = init_logging(&config.logging)?;
    info!("EmbeddedComm v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Demo { cycles, period_ms } => run_demo(&config, cycles, period_ms, cli.json).await,
        command => run_serial(&config, command, cli.json).await,
    }
}
