//! Modbus daemon entry point.
//!
//! Wires a [`mb_client::ClientEngine`] or [`mb_server::ServerEngine`]
//! to a real transport (TCP/UDP/serial) and drives it from a
//! supervised [`mb_runtime::ActivePart`], with signal handling and
//! ring-store persistence for the server role.

mod part;
mod register_handler;
mod signals;
mod store;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use mb_client::{ClientEngine, Transaction};
use mb_codec::adu::Framing;
use mb_common::config::{ClientConfig, StackConfig, TransportKind};
use mb_persist::{default_alphabet, RingStore, Versioned};
use mb_runtime::{ActionOutcome, ActivePart, PartConfig};
use mb_server::ServerEngine;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::part::{ClientPart, ServerPart};
use crate::register_handler::RegisterBankHandler;
use crate::signals::SignalHandler;
use crate::store::ProcessImage;

/// Default size of the server's in-memory register/coil banks.
const DEFAULT_IMAGE_SIZE: usize = 128;

/// Modbus daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "mb-daemon",
    about = "Modbus client/server daemon",
    version,
    long_about = None
)]
struct Args {
    /// Path to a stack configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Number of poll cycles to run in client role before exiting (0 = infinite).
    #[arg(long, default_value = "0")]
    max_cycles: u64,

    /// Starting holding-register address to poll, in client role.
    #[arg(long, default_value = "0")]
    read_address: u16,

    /// Number of holding registers to poll, in client role.
    #[arg(long, default_value = "4")]
    read_count: u16,

    /// Delay between polls, in client role.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    poll_interval: Duration,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting mb-daemon");

    let config = load_config(&args)?;
    info!(?config.transport.kind, "configuration loaded");

    let signal_handler = SignalHandler::new().context("failed to set up signal handlers")?;

    if config.server.is_some() {
        run_server(&config, &signal_handler)
    } else if config.client.is_some() {
        run_client(&config, &signal_handler, &args)
    } else {
        anyhow::bail!("configuration must set either [server] or [client]")
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "mb_daemon={level},mb_client={level},mb_server={level},mb_runtime={level},mb_codec={level},mb_persist={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or fall back to built-in defaults.
fn load_config(args: &Args) -> Result<StackConfig> {
    if let Some(path) = &args.config {
        StackConfig::from_file(path).with_context(|| format!("failed to load config from {path:?}"))
    } else {
        let default_path = PathBuf::from("config/default.toml");
        if default_path.exists() {
            info!(?default_path, "using default configuration file");
            StackConfig::from_file(&default_path)
                .with_context(|| format!("failed to load default config from {default_path:?}"))
        } else {
            info!("no config file found, using built-in defaults");
            Ok(StackConfig::default())
        }
    }
}

fn framing_for(config: &StackConfig, unit_id: u8) -> Framing {
    match config.transport.kind {
        TransportKind::Rtu => Framing::Rtu { address: unit_id },
        TransportKind::Tcp => Framing::Mbap {
            transaction_id: 0,
            unit_id,
        },
    }
}

/// Max tries for a poll's `Transaction`: the configured `retries` plus the
/// first attempt, or (when `retries` is left at its struct default) the
/// stream/datagram defaults a bare transport implies.
fn max_tries_for(client_config: &ClientConfig, transport: &mb_common::config::TransportConfig) -> u8 {
    if client_config.retries != ClientConfig::default().retries {
        return client_config.retries.saturating_add(1);
    }
    let is_datagram = transport.tcp.as_ref().is_some_and(|tcp| tcp.datagram);
    if is_datagram {
        3
    } else {
        1
    }
}

/// Run as a server: listen for requests and answer from a persisted process image.
fn run_server(config: &StackConfig, signal_handler: &SignalHandler) -> Result<()> {
    let server_config = config.server.clone().expect("checked by caller");
    let transport = transport::build_transport(&config.transport)?;
    let framing_kind = match config.transport.kind {
        TransportKind::Rtu => mb_server::FramingKind::Rtu,
        TransportKind::Tcp => mb_server::FramingKind::Mbap,
    };

    let mut store = RingStore::new(
        config.persist.directory.clone(),
        "mb-daemon-image",
        "json",
        &default_alphabet(config.persist.file_count),
        config.persist.auto_create_path,
    );
    let loaded = store.load::<ProcessImage>();
    for e in &loaded.errors {
        warn!(error = %e, "ignoring corrupt process image slot");
    }
    let image = loaded
        .value
        .unwrap_or_else(|| ProcessImage::new(DEFAULT_IMAGE_SIZE, DEFAULT_IMAGE_SIZE));
    info!(sequence = image.version_sequence_number(), "process image loaded");
    let image = Arc::new(Mutex::new(image));

    let handler = RegisterBankHandler::new("holding-registers", Arc::clone(&image));
    let engine = ServerEngine::new(transport, handler, server_config, framing_kind);
    let part_handler = ServerPart::new(
        engine,
        image,
        store,
        Duration::from_millis(100),
        Duration::from_secs(30),
    );

    let part = ActivePart::spawn("mb-server", part_handler, PartConfig::default())
        .context("failed to start server active part")?;
    part.go_online(true)
        .context("go_online submit failed")?
        .wait();
    info!(state = ?part.state().use_state(), "server online");

    while !signal_handler.shutdown_requested() {
        if signal_handler.take_reload_request() {
            info!("reload signal received (config reload not implemented)");
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down server");
    part.go_offline()
        .context("go_offline submit failed")?
        .wait();
    part.stop();
    Ok(())
}

/// Run as a client: periodically poll a remote server and log the result.
fn run_client(config: &StackConfig, signal_handler: &SignalHandler, args: &Args) -> Result<()> {
    let client_config = config.client.clone().expect("checked by caller");
    let unit_id = client_config.unit_id;
    let response_timeout = client_config.response_timeout;
    let max_tries = max_tries_for(&client_config, &config.transport);
    let transport = transport::build_transport(&config.transport)?;
    let engine = ClientEngine::new(transport, client_config);
    let part_handler = ClientPart::new(engine);

    let part = ActivePart::spawn("mb-client", part_handler, PartConfig::default())
        .context("failed to start client active part")?;
    part.go_online(true)
        .context("go_online submit failed")?
        .wait();
    info!(state = ?part.state().use_state(), "client online");

    let framing = framing_for(config, unit_id);
    let mut cycles_run = 0u64;

    while !signal_handler.shutdown_requested() {
        if args.max_cycles > 0 && cycles_run >= args.max_cycles {
            info!(cycles = cycles_run, "maximum cycle count reached");
            break;
        }

        let address = args.read_address;
        let count = args.read_count;
        let handle = part
            .submit("poll-holding-registers", move |client: &mut ClientPart, _publisher| {
                let mut tx = match Transaction::new(
                    0x03,
                    framing,
                    [address, count, 0, 0],
                    response_timeout,
                    max_tries,
                ) {
                    Ok(tx) => tx,
                    Err(e) => return ActionOutcome::failure(e.to_string()),
                };
                if client.engine.run(&mut tx) {
                    let values = tx.get_registers().unwrap_or_default();
                    tracing::info!(?values, "poll succeeded");
                    ActionOutcome::success()
                } else {
                    let reason = tx.error().map(|e| e.description.clone()).unwrap_or_default();
                    tracing::warn!(reason, "poll failed");
                    ActionOutcome::failure(reason)
                }
            })
            .context("submit failed")?;
        let _ = handle.wait();

        cycles_run += 1;
        std::thread::sleep(args.poll_interval);
    }

    info!("shutting down client");
    part.go_offline()
        .context("go_offline submit failed")?
        .wait();
    part.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_defaults() {
        let args = Args::parse_from(["mb-daemon"]);
        assert!(args.config.is_none());
        assert_eq!(args.max_cycles, 0);
        assert_eq!(args.read_count, 4);
    }

    #[test]
    fn args_parse_overrides() {
        let args = Args::parse_from([
            "mb-daemon",
            "-c",
            "test.toml",
            "--read-address",
            "10",
            "--read-count",
            "2",
            "--poll-interval",
            "250ms",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("test.toml")));
        assert_eq!(args.read_address, 10);
        assert_eq!(args.read_count, 2);
        assert_eq!(args.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn default_config_has_neither_role() {
        let config = StackConfig::default();
        assert!(config.client.is_none());
        assert!(config.server.is_none());
    }
}
