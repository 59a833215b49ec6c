// Rangzen Linux: LAN discovery, TCP exchange transport, periodic tick daemon.

mod config;
mod discovery;
mod journal;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rangzen_core::{
    Clock, Coordinator, ExchangeConfig, Keypair, PeerRegistry, Stores, SystemClock, TransportSpeaker,
};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::journal::{Journal, JOURNAL_FILE};
use crate::transport::TcpSpeaker;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const IDENTITY_FILE: &str = "identity.key";
/// How long a running exchange gets to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("rangzen-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("creating data dir {}", cfg.data_dir.display()))?;

    let keypair = Keypair::load_or_create(cfg.data_dir.join(IDENTITY_FILE)).context("loading identity")?;
    let address = keypair.device_address();
    let stores = Stores::open(&cfg.data_dir).context("opening stores")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(PeerRegistry::with_timeout(clock, cfg.peer_timeout()));
    let speaker = Arc::new(
        TcpSpeaker::bind(cfg.exchange_port, cfg.exchange_timeout())
            .with_context(|| format!("binding exchange port {}", cfg.exchange_port))?,
    );
    let journal_path = cfg.record_exchanges.then(|| cfg.data_dir.join(JOURNAL_FILE));
    let coordinator = Arc::new(Coordinator::new(
        address.clone(),
        registry,
        stores.clone(),
        speaker.clone(),
        Arc::new(Journal::new(journal_path, "lan")),
        ExchangeConfig {
            max_messages: cfg.max_messages,
            timeout: cfg.exchange_timeout(),
        },
    ));

    info!(
        %address,
        friend_code = %keypair.friend_code(),
        messages = stores.messages.count().unwrap_or(0),
        friends = stores.friends.count().unwrap_or(0),
        exchange_port = cfg.exchange_port,
        discovery_port = cfg.discovery_port,
        "rangzen node starting"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();

        let disc_address = address.clone();
        let (disc_port, exchange_port) = (cfg.discovery_port, cfg.exchange_port);
        tokio::spawn(async move {
            if let Err(e) = discovery::run_discovery(disc_address, disc_port, exchange_port, event_tx).await {
                warn!(error = %e, "discovery stopped");
            }
        });

        let coord_events = coordinator.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                coord_events.handle_event(event);
            }
        });

        let coord_tick = coordinator.clone();
        let tick_interval = cfg.tick_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let c = coord_tick.clone();
                let done = tokio::task::spawn_blocking(move || {
                    c.tasks();
                    c.tick()
                })
                .await;
                if let Err(e) = done {
                    warn!(error = %e, "tick panicked");
                }
            }
        });

        shutdown_signal().await
    })?;

    info!("shutting down");
    coordinator.stop();
    speaker.set_enabled(false);
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix). On shutdown, runtime and tasks exit; systemd may restart if configured.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
