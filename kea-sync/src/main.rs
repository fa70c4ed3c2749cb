//! kea-sync: keeps a Kea DHCPv4 server in line with NetBox IPAM.
//!
//! The daemon can:
//! - Rebuild the whole DHCP configuration from NetBox at startup
//! - Listen for NetBox webhooks and resync the changed object

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kea_sync::rest::{AppState, create_router};
use kea_sync::{Args, Config, NetboxClient, Reconciler, StagingStore, kea, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    // RUST_LOG wins over configured levels
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_filter())?,
    };
    logging::init(filter, config.syslog_level_prefix)?;

    info!("netbox: {}, kea: {}", config.netbox_url, config.kea_url);

    let netbox = NetboxClient::new(&config.netbox_url, config.netbox_token.clone())?
        .with_filters(
            config.prefix_filter.clone(),
            config.iprange_filter.clone(),
            config.ipaddress_filter.clone(),
        );
    let transport = kea::connect(&config.kea_url).await?;
    let store = StagingStore::new(transport, config.subnet_correlation);
    let mut reconciler = Reconciler::new(
        Box::new(netbox),
        store,
        config.maps.clone(),
        config.check_only,
    );

    if !config.full_sync_at_startup && !config.listen {
        warn!("Neither full sync nor listen mode has been asked");
    }

    if config.full_sync_at_startup {
        info!("Start full sync");
        reconciler
            .sync_all()
            .await
            .context("Full synchronization failed")?;
    }

    if config.listen {
        serve(&config, reconciler).await?;
    }

    Ok(())
}

async fn serve(config: &Config, reconciler: Reconciler) -> Result<()> {
    let state = Arc::new(AppState {
        reconciler: Mutex::new(reconciler),
        secret: config.secret.clone(),
        secret_header: config.secret_header.clone(),
    });
    let router = create_router(state);

    let ip: IpAddr = config
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind))?;
    let addr = SocketAddr::new(ip, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listen for events on {}", addr);

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal::ctrl_c() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
