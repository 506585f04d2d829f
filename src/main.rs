use clap::Parser;
use roomgate::application::BridgeService;
use roomgate::config::{Cli, Config};
use roomgate::infrastructure::media::BridgeTracks;
use roomgate::infrastructure::protocols::webrtc::{
    ConnectionLifecycleMonitor, NegotiationEngine, PeerConnectionRegistry, PeerFactory,
};
use roomgate::infrastructure::room::{AccessTokenIssuer, RoomLink};
use roomgate::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting RoomGate");

    // Load configuration: defaults, file, environment, then flags
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_cli(&cli)?;
    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e.into());
    }
    info!("Configuration loaded: {:?}", config);

    let prometheus_handle = init_metrics()?;

    let shutdown = CancellationToken::new();
    let tracks = Arc::new(BridgeTracks::new());
    let factory = Arc::new(PeerFactory::new(&config.webrtc.ice_servers)?);
    let timeout = config.webrtc.negotiation_timeout();

    // Join the room before accepting any client
    let token = AccessTokenIssuer::new(&config.room.api_key, &config.room.api_secret).issue(
        &config.room.room_name,
        &config.room.identity,
        Duration::from_secs(config.room.token_ttl_secs),
    )?;
    let room = RoomLink::connect(
        &config.room,
        &token,
        tracks.clone(),
        &factory,
        timeout,
        shutdown.child_token(),
    )
    .await?;

    let registry = Arc::new(PeerConnectionRegistry::new());
    let (monitor, monitor_handle) =
        ConnectionLifecycleMonitor::spawn(registry.clone(), tracks.clone(), shutdown.clone());
    let engine = NegotiationEngine::new(factory, tracks, monitor.clone(), timeout);
    let bridge = Arc::new(BridgeService::new(
        engine,
        registry,
        monitor,
        shutdown.clone(),
    ));

    let app = build_router(AppState::new(bridge.clone()), prometheus_handle);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Signaling server listening on {}", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, shutting down gracefully...");
            signal_token.cancel();
        })
        .await?;

    bridge.shutdown().await;
    room.close().await;
    let _ = monitor_handle.await;

    info!("RoomGate stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
