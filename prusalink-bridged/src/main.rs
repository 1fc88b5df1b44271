//! Bridge daemon entry point: reads configuration, opens the serial link,
//! wires the dispatcher/queue/state-manager/poller together, and forwards
//! state changes and remote commands between the printer and the connect
//! service.
//!
//! This binary is deliberately thin — everything interesting lives in
//! `prusalink-serial`, `prusalink-state`, `prusalink-commands` and
//! `prusalink-connect`. It exists only to give those crates a `main` to run
//! inside, the way the teacher's `print3rs-console` wires
//! `print3rs-core`/`print3rs-commands` together behind a CLI.

mod config;
mod translate;

use std::{sync::Arc, time::Duration};

use clap::Parser;
use prusalink_connect::{ConnectClient, ConnectConfig, TelemetryResponse};
use prusalink_serial::{Dispatcher, Instruction, SerialQueue};
use prusalink_state::{Poller, StateManager};
use tokio_serial::SerialPortBuilderExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, ConfigError};

/// Confirmation timeout for a single outgoing instruction. Not part of
/// `intervals` (spec §6 only names the three poll/quit/telemetry
/// intervals); kept as a constant the way the teacher hardcodes per-call
/// timeouts in `print3rs-core`.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(about = "Bridges a serial-attached 3D printer to a remote connect service")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "prusalink.toml")]
    config: std::path::PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not open serial port: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("could not reach connect service: {0}")]
    Connect(#[from] prusalink_connect::ConnectError),
}

fn setup_logging() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_env_var("PRUSALINK_LOG")
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    setup_logging();
    let args = Args::parse();

    // ConfigInvalid is fatal at startup only (spec §7).
    let config = Config::load(&args.config)?;
    tracing::info!(config = %args.config.display(), "loaded configuration");

    let port = tokio_serial::new(config.serial.port.as_str(), config.serial.baudrate).open_native_async()?;
    let dispatcher = Dispatcher::spawn(port);

    let manager = Arc::new(StateManager::new());
    prusalink_state::register_observers(&dispatcher, manager.clone());

    let info = Arc::new(prusalink_commands::InfoCache::new());
    prusalink_commands::register_info_observer(&dispatcher, info.clone());

    let queue = SerialQueue::spawn(dispatcher.clone(), CONFIRM_TIMEOUT);
    let poller = Poller::spawn(
        dispatcher.clone(),
        manager.clone(),
        config.intervals.status_update_interval(),
        config.intervals.quit_interval(),
    );

    let connect_config = ConnectConfig {
        address: config.connect.address.clone(),
        port: config.connect.port,
        token: config.connect.token.clone(),
        tls: config.connect.tls,
    };
    let connect = Arc::new(ConnectClient::new(&connect_config)?);

    let state_forward = tokio::spawn(forward_state_changes(manager.clone(), connect.clone()));
    let telemetry_loop = tokio::spawn(run_telemetry_loop(
        manager.clone(),
        queue.clone(),
        info.clone(),
        connect.clone(),
        config.intervals.telemetry_send_interval(),
    ));

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    tracing::info!("shutdown requested");

    // Cancellation is observed leaf-first (spec §5): poller, then the serial
    // queue's writer context, then the dispatcher's reader/writer contexts.
    // Each `stop` sets a shared flag the context's loop polls (or races
    // against in a `select!`), and `join` waits for it to actually exit
    // before moving to the next leaf.
    poller.stop();
    poller.join().await;
    queue.stop();
    queue.join().await;
    dispatcher.stop();
    dispatcher.join().await;
    state_forward.abort();
    telemetry_loop.abort();

    Ok(())
}

/// Forwards every composed-state transition upstream as a `STATE_CHANGED`
/// event, carrying whatever job id the manager currently tracks.
async fn forward_state_changes(manager: Arc<StateManager>, connect: Arc<ConnectClient>) {
    let mut changes = manager.subscribe();
    loop {
        match changes.recv().await {
            Ok(changed) => {
                let event = translate::event_from_state_changed(changed, manager.job_id());
                connect.emit_event(event).await;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Periodically reports telemetry and acts on whatever the connect service
/// sends back: a remote command is run through the command handlers and its
/// outcome reported; a raw gcode line (the original's `text/x.gcode`
/// content-type special case) is enqueued directly with no correlation id.
async fn run_telemetry_loop(
    manager: Arc<StateManager>,
    queue: SerialQueue,
    info: Arc<prusalink_commands::InfoCache>,
    connect: Arc<ConnectClient>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let telemetry = prusalink_connect::Telemetry {
            state: Some(translate::state_name_owned(manager.state())),
            job_id: manager.job_id(),
            ..Default::default()
        };
        match connect.send_telemetry(&telemetry).await {
            Ok(TelemetryResponse::None) => {}
            Ok(TelemetryResponse::Gcode(line)) => {
                queue.enqueue_one(Instruction::plain(line), false);
            }
            Ok(TelemetryResponse::Command(envelope)) => {
                let manager = manager.clone();
                let queue = queue.clone();
                let info = info.clone();
                let connect = connect.clone();
                tokio::spawn(async move {
                    let event = match translate::request_from_envelope(envelope) {
                        Ok(request) => {
                            let outcome = prusalink_commands::handle(request, &manager, &queue, &info).await;
                            translate::event_from_outcome(outcome)
                        }
                        Err(rejection) => rejection,
                    };
                    connect.emit_event(event).await;
                });
            }
            Err(err) => tracing::debug!("telemetry post failed: {err}"),
        }
    }
}
