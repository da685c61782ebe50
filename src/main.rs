// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sdsync::config::{self, SessionConfig};
use sdsync::files::{self, FileEntry};
use sdsync::serial::{RealSerialPort, Transport};
use sdsync::{device, validator};

#[derive(Parser)]
#[command(name = "sdsync")]
#[command(about = "Mirror a folder onto a serial-attached SD card and resend files the device rejects", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyACM0 or COM4)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate [default: 921600]
    #[arg(short, long)]
    baud: Option<u32>,

    /// Config file [default: ~/.config/sdsync/config.toml]
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Milliseconds to wait for each reply from the device
    #[arg(long, value_name = "MS")]
    ack_timeout: Option<u64>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TransferArgs {
    /// Body chunk size in bytes [default: 256]
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Attempts per file before giving up, 0 for no limit [default: 5]
    #[arg(long, value_name = "N", conflicts_with = "retry_forever")]
    max_attempts: Option<u32>,

    /// Resend a rejected file until the device accepts it
    #[arg(long)]
    retry_forever: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a folder against the card and resend files that fail
    Sync {
        /// Folder to mirror onto the card
        folder: PathBuf,

        #[command(flatten)]
        transfer: TransferArgs,

        /// Abort the whole session after this many seconds
        #[arg(long, value_name = "SECS")]
        session_timeout: Option<u64>,

        /// Validate each repaired file again before moving on
        #[arg(long)]
        revalidate: bool,
    },
    /// Send a single file in transmit mode
    Send {
        /// File to send
        file: PathBuf,

        /// Path on the card [default: the file name]
        #[arg(long = "as", value_name = "PATH")]
        remote_path: Option<String>,

        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// Print firmware and SD content versions
    Version,
    /// Switch the hardware MCU into firmware input mode
    HwFirmware,
}

impl TransferArgs {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(n) = self.max_attempts {
            config.retry.set_max_attempts(n);
        }
        if self.retry_forever {
            config.retry = config.retry.clone().unbounded();
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn open_transport(config: &SessionConfig) -> Result<Transport> {
    let port_name = config
        .port
        .as_deref()
        .context("no serial port given; pass --port or set `port` in the config file")?;

    log::info!("Opening serial port: {} at {} baud", port_name, config.baud);
    let port = RealSerialPort::open(port_name, config.baud, config.ack_timeout)
        .with_context(|| format!("failed to open serial port {}", port_name))?;

    Ok(Transport::new(Box::new(port), config.ack_timeout).with_deadline(config.session_timeout))
}

fn run(cli: Cli) -> Result<()> {
    let mut config = config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.port.is_some() {
        config.port = cli.port;
    }
    if let Some(baud) = cli.baud {
        config.baud = baud;
    }
    if let Some(ms) = cli.ack_timeout {
        config.ack_timeout = Duration::from_millis(ms);
    }

    match cli.command {
        Commands::Sync { folder, transfer, session_timeout, revalidate } => {
            transfer.apply(&mut config);
            if let Some(secs) = session_timeout {
                config.session_timeout = Some(Duration::from_secs(secs));
            }
            config.revalidate_repaired |= revalidate;
            config.validate()?;

            let entries = files::enumerate(&folder)
                .with_context(|| format!("failed to list {}", folder.display()))?;

            let transport = open_transport(&config)?;
            let report = validator::run(transport, entries, &config)?;

            log::info!(
                "Checked {} files: {} already valid, {} resent",
                report.total,
                report.validated,
                report.repaired.len()
            );
            for (path, stats) in &report.repaired {
                log::debug!("  {} ({} attempts)", path, stats.attempts);
            }
            let secs = report.elapsed.as_secs();
            println!("Sync complete in {}m {}s", secs / 60, secs % 60);
        }
        Commands::Send { file, remote_path, transfer } => {
            transfer.apply(&mut config);
            config.validate()?;

            let entry = FileEntry::from_file(&file, remote_path.as_deref())?;
            let transport = open_transport(&config)?;
            let stats = validator::transmit_one(transport, &entry, &config)?;
            println!(
                "Sent {} ({} bytes, {} attempts)",
                entry.relative_path, stats.bytes_sent, stats.attempts
            );
        }
        Commands::Version => {
            let mut transport = open_transport(&config)?;
            for (kind, version) in device::query_versions(&mut transport, &config.pacing)? {
                println!("{}: {}", kind, version);
            }
        }
        Commands::HwFirmware => {
            let mut transport = open_transport(&config)?;
            device::enter_hw_firmware_input(&mut transport, &config.pacing)?;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
