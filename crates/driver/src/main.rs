//! z800ctl
//!
//! Command-line control for eMagin Z800 3DVisor headsets: query firmware,
//! put the displays to sleep, switch stereoscopic mode, and keep headsets
//! awake while they are plugged in.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use common::setup_logging;
use driver::lifecycle::{LifecycleError, node_name};
use driver::usb::{DeviceManager, spawn_usb_worker};
use driver::{DeviceSession, DriverConfig, LifecycleManager, config, control};
use protocol::Command;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "z800ctl")]
#[command(author, version, about = "Control eMagin Z800 3DVisor headsets")]
#[command(long_about = "
Sends control commands to an eMagin Z800 3DVisor over USB.

EXAMPLES:
    # Show the firmware version of the first headset
    z800ctl firmware

    # Enable stereoscopic mode on the second headset
    z800ctl --device 1 stereo on

    # Keep headsets awake while they are plugged in
    z800ctl watch

CONFIGURATION:
    The configuration is looked up in the following order:
    1. Path specified with --config
    2. ~/.config/z800/driver.toml
    3. /etc/z800/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List bound headsets
    #[arg(long)]
    list_devices: bool,

    /// Registry index of the headset to control
    #[arg(short, long, value_name = "INDEX", default_value_t = 0)]
    device: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Cmd {
    /// Print the firmware version
    Firmware,
    /// Put the displays to sleep
    Sleep,
    /// Wake the displays
    Wake,
    /// Step the display brightness
    Brightness,
    /// Switch stereoscopic (3D) mode
    Stereo {
        #[arg(value_enum)]
        mode: Toggle,
    },
    /// Read one EEPROM byte
    Peek {
        #[arg(value_parser = parse_byte)]
        address: u8,
    },
    /// Send a raw command frame
    Raw {
        #[arg(value_parser = parse_byte)]
        verb: u8,
        #[arg(value_parser = parse_byte)]
        noun: u8,
    },
    /// Bind headsets as they are plugged in until Ctrl+C
    Watch,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
}

/// Parse a byte given in decimal or with a `0x` prefix
fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid byte '{}': {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = DriverConfig::default();
        let path = DriverConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(&path.to_string_lossy()).context("Failed to load configuration")?
    } else {
        DriverConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("z800ctl v{}", env!("CARGO_PKG_VERSION"));

    let lifecycle = Arc::new(LifecycleManager::new(
        config.device_table().context("Invalid device table")?,
    ));

    if let Some(Cmd::Watch) = args.command {
        return run_watch(config, lifecycle).await;
    }

    tokio::task::spawn_blocking(move || run_once(&config, &lifecycle, &args))
        .await
        .context("Command thread panicked")?
}

/// Bind present headsets, run one command and release everything
fn run_once(config: &DriverConfig, lifecycle: &Arc<LifecycleManager>, args: &Args) -> Result<()> {
    let mut manager = DeviceManager::new(lifecycle.clone(), config.bind_options())
        .context("Failed to initialise USB")?;
    manager
        .enumerate_devices()
        .context("Failed to enumerate USB devices")?;

    if args.list_devices {
        list_devices(lifecycle);
    }

    let result = match args.command {
        Some(command) => {
            let session = lifecycle
                .open(args.device)
                .with_context(|| format!("Failed to open {}", node_name(args.device)))?;
            let result = execute(&session, command);
            debug!("Session stats: {:?}", session.stats());
            lifecycle.close(session);
            result
        }
        None if args.list_devices => Ok(()),
        None => {
            println!("No command given, see --help");
            Ok(())
        }
    };

    lifecycle.shutdown();
    result
}

fn list_devices(lifecycle: &LifecycleManager) {
    let devices = lifecycle.devices();
    if devices.is_empty() {
        println!("No Z800 headsets found.");
        return;
    }

    println!("Found {} headset(s):\n", devices.len());
    for device in devices {
        println!(
            "  [{}] {} {} (minor {}){}",
            device.index,
            device.node,
            device.id,
            device.minor,
            if device.in_use { " in use" } else { "" }
        );
    }
}

fn execute(session: &DeviceSession, command: Cmd) -> Result<()> {
    match command {
        Cmd::Firmware => {
            let version = control::get_firmware_version(session)?;
            println!("Z800 firmware version: {}", version);
        }
        Cmd::Sleep => control::sleep(session)?,
        Cmd::Wake => control::wake(session)?,
        Cmd::Brightness => control::cycle_brightness(session)?,
        Cmd::Stereo { mode } => control::set_stereo_3d(session, mode == Toggle::On)?,
        Cmd::Peek { address } => {
            let byte = session.request_eeprom_byte(address)?;
            println!("EEPROM[{:#04x}] = {:#04x}", address, byte);
        }
        Cmd::Raw { verb, noun } => session.write_command(Command::raw(verb, noun))?,
        Cmd::Watch => bail!("watch cannot run as a one-shot command"),
    }
    Ok(())
}

/// Track hot-plugged headsets until Ctrl+C, sending keep-alives if configured
async fn run_watch(config: DriverConfig, lifecycle: Arc<LifecycleManager>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let worker = spawn_usb_worker(lifecycle.clone(), config.bind_options(), running.clone())
        .context("Failed to spawn USB worker thread")?;

    info!("Watching for headsets, press Ctrl+C to stop");

    match config.keepalive_interval() {
        Some(period) => {
            info!("Keep-alive every {}s", period.as_secs());
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("Error waiting for Ctrl+C: {}", e);
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        let lifecycle = lifecycle.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || keep_alive(&lifecycle)).await {
                            error!("Keep-alive task panicked: {}", e);
                        }
                    }
                }
            }
        }
        None => {
            if let Err(e) = signal::ctrl_c().await {
                error!("Error waiting for Ctrl+C: {}", e);
            }
        }
    }

    info!("Shutting down...");
    running.store(false, Ordering::Release);
    match worker.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker failed: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    lifecycle.shutdown();
    Ok(())
}

/// Wake every bound headset that nobody else has open
fn keep_alive(lifecycle: &LifecycleManager) {
    for device in lifecycle.devices() {
        match lifecycle.open(device.index) {
            Ok(session) => {
                if let Err(e) = control::wake(&session) {
                    warn!("Keep-alive for {} failed: {}", device.node, e);
                }
                lifecycle.close(session);
            }
            Err(LifecycleError::Busy { .. }) => {
                debug!("Skipping keep-alive for {}, in use", device.node);
            }
            Err(e) => warn!("Keep-alive could not open {}: {}", device.node, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0x8b"), Ok(0x8B));
        assert_eq!(parse_byte("0X01"), Ok(0x01));
        assert_eq!(parse_byte("17"), Ok(17));
        assert!(parse_byte("0x100").is_err());
        assert!(parse_byte("sleep").is_err());
    }

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from(["z800ctl", "--device", "2", "stereo", "on"]).unwrap();
        assert_eq!(args.device, 2);
        assert!(matches!(
            args.command,
            Some(Cmd::Stereo { mode: Toggle::On })
        ));

        let args = Args::try_parse_from(["z800ctl", "raw", "0x8b", "1"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Cmd::Raw {
                verb: 0x8B,
                noun: 0x01
            })
        ));
    }
}
