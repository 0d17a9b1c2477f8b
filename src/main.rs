#![forbid(unsafe_code)]

//! `session-broker`: desktop session manager daemon.
//!
//! Bootstraps configuration, loads the saved or failsafe session, starts the
//! client and control listeners, and drives the session manager until the
//! session ends.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use session_broker::config::GlobalConfig;
use session_broker::ipc::client_link::{spawn_client_listener, ConnectionHub};
use session_broker::ipc::server::spawn_ipc_server;
use session_broker::manager::services::{PowerAction, PowerControl, Services};
use session_broker::manager::{LoadOutcome, Manager, ManagerEvent};
use session_broker::orchestrator::desktop::StaticDesktop;
use session_broker::orchestrator::dialogs::HeadlessDialogs;
use session_broker::orchestrator::power::SystemPower;
use session_broker::orchestrator::reactor::{self, run_reactor, ReactorExit};
use session_broker::orchestrator::spawner::ProcessLauncher;
use session_broker::session::timers::SystemClock;
use session_broker::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "session-broker", about = "Desktop session manager", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the directory holding session files.
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Override the session name to load and save.
    #[arg(long)]
    session: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("session-broker bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => {
            let path = GlobalConfig::default_path();
            if path.is_file() {
                GlobalConfig::load_from_path(&path)?
            } else {
                warn!(path = %path.display(), "no configuration file, using defaults");
                GlobalConfig::default()
            }
        }
    };
    if let Some(dir) = args.session_dir {
        config.session_dir = Some(dir);
    }
    if let Some(name) = args.session.filter(|n| !n.trim().is_empty()) {
        config.session_name = name;
    }
    let config = Arc::new(config);
    info!(
        session = %config.session_name,
        file = %config.session_file().display(),
        "configuration loaded"
    );

    // ── Build collaborators ─────────────────────────────
    let ct = CancellationToken::new();
    let (events_tx, events_rx) = reactor::channel();

    let hub = Arc::new(ConnectionHub::new());
    let power: Arc<dyn PowerControl> = Arc::new(SystemPower::new(config.power.clone()));
    let services = Services {
        transport: Arc::clone(&hub) as _,
        launcher: Arc::new(ProcessLauncher::new(config.display.clone(), events_tx.clone())),
        power: Arc::clone(&power),
        desktop: Arc::new(StaticDesktop::new(&config.desktop)),
        dialogs: Arc::new(HeadlessDialogs::new(
            config.logout.clone(),
            config.session_name.clone(),
            events_tx.clone(),
        )),
    };
    let mut manager = Manager::new(Arc::clone(&config), services, Arc::new(SystemClock));
    let observer_handle = tokio::spawn(log_manager_events(manager.subscribe(), ct.clone()));

    // ── Start listeners ─────────────────────────────────
    let client_handle = spawn_client_listener(
        &config.ipc_name,
        Arc::clone(&hub),
        events_tx.clone(),
        ct.clone(),
    )?;
    let control_handle = spawn_ipc_server(&config.control_ipc_name, events_tx.clone(), ct.clone())?;

    // ── Load and start the session ──────────────────────
    match manager.load() {
        Ok(LoadOutcome::Logout) => {
            info!("logout chosen before the session started");
            ct.cancel();
            let _ = tokio::join!(client_handle, control_handle, observer_handle);
            return Ok(());
        }
        Ok(outcome) => info!(?outcome, "session selected"),
        Err(err) => {
            error!(%err, "no session could be loaded");
            ct.cancel();
            let _ = tokio::join!(client_handle, control_handle, observer_handle);
            return Err(err);
        }
    }
    manager.startup();

    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    // ── Drive the session ───────────────────────────────
    let exit = run_reactor(&mut manager, events_rx, ct.clone()).await;
    ct.cancel();

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(client_handle, control_handle, observer_handle);

    if let ReactorExit::Session(reason) = exit {
        info!(%reason, shutdown_type = ?manager.shutdown_type(), "session ended");
        if let Some(action @ (PowerAction::Shutdown | PowerAction::Restart)) =
            PowerAction::for_shutdown(manager.shutdown_type())
        {
            if let Err(err) = power.try_action(action) {
                error!(%err, ?action, "power transition failed");
                return Err(err);
            }
        }
    } else {
        warn!(?exit, "session interrupted");
    }

    info!("session-broker shut down");
    Ok(())
}

async fn log_manager_events(mut events: broadcast::Receiver<ManagerEvent>, ct: CancellationToken) {
    loop {
        tokio::select! {
            () = ct.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => debug!(?event, "manager event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "manager event observer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
