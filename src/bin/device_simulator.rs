use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, UdpSocket},
    signal,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reefer_monitor::{
    config::SimulatorConfig,
    models::DeviceIdentity,
    simulator::{self, udp, SimState},
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = SimulatorConfig::from_env()?;
    let state = SimState::shared(DeviceIdentity::new(&config.device_id, &config.device_name));

    let udp_addr: SocketAddr = format!("{}:{}", config.host, config.discovery_port)
        .parse()
        .context("SIMULATOR_HOST must be an IP address")?;
    let socket = UdpSocket::bind(udp_addr)
        .await
        .with_context(|| format!("failed to bind UDP discovery socket on {udp_addr}"))?;
    tokio::spawn(udp::serve(
        socket,
        udp::Advertisement::new(&config.advertise_address, &config.device_id, &config.device_name),
    ));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, device_id = %config.device_id, "Device simulator listening");

    axum::serve(listener, simulator::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
