//! autohostd
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                  AUTOHOSTD                    │
//!                         │                                               │
//!   Client connection     │  ┌─────────┐    ┌─────────┐    ┌──────────┐  │
//!   ──────────────────────┼─▶│   net   │───▶│ session │───▶│  vhost   │  │
//!                         │  │listener │    │ control │    │  engine  │  │
//!                         │  └─────────┘    └────┬────┘    └────┬─────┘  │
//!                         │                      │              │        │
//!                         │                      │  route       ▼        │
//!   Greeting / replies    │                      │        ┌──────────┐   │     Per-host
//!   ◀─────────────────────┼──────────────────────┘◀───────│ bindings │◀──┼──── fragments
//!                         │                               └──────────┘   │
//!                         │  ┌────────────────────────────────────────┐  │
//!                         │  │          Cross-Cutting Concerns        │  │
//!                         │  │  config + watcher · observability ·    │  │
//!                         │  │  admin API · lifecycle                 │  │
//!                         │  └────────────────────────────────────────┘  │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use autohost::admin::{setup_admin_router, AdminState};
use autohost::config::watcher::ConfigWatcher;
use autohost::config::{load_config, DaemonConfig};
use autohost::lifecycle::signals::{SignalEvent, Signals};
use autohost::lifecycle::startup::{bootstrap, rebuild_state, Bootstrap};
use autohost::lifecycle::Shutdown;
use autohost::net::tls::load_tls_acceptor;
use autohost::observability::{logging, metrics};
use autohost::session::ControlServer;
use autohost::vhost::{DescriptorLoader, ResolutionEngine};

#[derive(Parser)]
#[command(name = "autohostd", version)]
#[command(about = "Control-channel daemon with dynamic virtual hosts", long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/etc/autohost/autohost.toml")]
    config: PathBuf,

    /// Seconds to wait for open connections on shutdown.
    #[arg(long, default_value_t = 30)]
    drain_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "autohostd starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let tls = match &config.tls {
        Some(tls) => Some(load_tls_acceptor(&tls.cert_path, &tls.key_path)?),
        None => None,
    };

    let Bootstrap {
        state,
        listeners,
        primary_addr,
    } = bootstrap(&config).await?;

    let listening: Vec<u16> = listeners
        .iter()
        .filter_map(|l| l.local_addr().ok())
        .map(|addr| addr.port())
        .collect();

    let engine = Arc::new(ResolutionEngine::new(state, DescriptorLoader::default()));
    let shutdown = Shutdown::new();
    let server = Arc::new(ControlServer::new(Arc::clone(&engine), tls, shutdown.clone()));

    for listener in listeners {
        tokio::spawn(Arc::clone(&server).serve(listener));
    }

    if config.admin.enabled {
        spawn_admin(&config, &server, &shutdown).await?;
    }

    let (watcher, mut updates) = ConfigWatcher::new(&args.config);
    let _watcher = match watcher.run() {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, reload on SIGHUP only");
            None
        }
    };

    let mut signals = Signals::new()?;
    loop {
        tokio::select! {
            Some(new_config) = updates.recv() => {
                reload(&engine, &new_config, primary_addr, &listening);
            }
            event = signals.recv() => match event {
                SignalEvent::Reload => match load_config(&args.config) {
                    Ok(new_config) => reload(&engine, &new_config, primary_addr, &listening),
                    Err(e) => tracing::error!(error = %e, "Failed to reload config, keeping current configuration"),
                },
                SignalEvent::Shutdown => break,
            },
        }
    }

    tracing::info!(active_connections = server.tracker().active_count(), "Shutting down");
    shutdown.trigger();
    if !server
        .tracker()
        .wait_for_drain(Duration::from_secs(args.drain_timeout_secs))
        .await
    {
        tracing::warn!(
            active_connections = server.tracker().active_count(),
            "Drain deadline passed, exiting with open connections"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn spawn_admin(
    config: &DaemonConfig,
    server: &ControlServer,
    shutdown: &Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = config.admin.bind_address.parse()?;
    let router = setup_admin_router(AdminState {
        engine: Arc::clone(server.engine()),
        tracker: server.tracker().clone(),
        api_key: Arc::from(config.admin.api_key.as_str()),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Admin API listening");

    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Admin API stopped");
        }
    });
    Ok(())
}

fn reload(engine: &ResolutionEngine, config: &DaemonConfig, primary_addr: SocketAddr, listening: &[u16]) {
    match rebuild_state(config, primary_addr, listening) {
        Ok(state) => {
            engine.reset(state);
            tracing::info!("Configuration reloaded");
        }
        Err(e) => tracing::error!(error = %e, "Failed to rebuild engine state, keeping current state"),
    }
}
