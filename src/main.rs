use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    signal,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reefer_monitor::{
    alerts::{AlarmController, AlertEngine, LogAlarmSurface},
    cloud::{CloudClient, CloudRegistry},
    config::Config,
    control::{CommandDispatcher, CommandSink, ConsoleCommand},
    device::DeviceClient,
    discovery::{
        broadcast::BroadcastConfig, probe::HttpProber, scan::ScanRange, Discovery, DiscoveryPlan,
        RegistryLookup,
    },
    events::{ChannelKind, EventDispatcher, MonitorEvent},
    monitor::{LocalLink, MonitorSession, Poller, PollerHandle, STATUS_RECONNECTING},
    reading_cache::ReadingCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(mode = ?config.mode, "Starting reefer monitor");

    let http = Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let events = EventDispatcher::default();

    let cloud = config
        .cloud
        .as_ref()
        .map(|c| CloudClient::new(http.clone(), &c.base_url, &c.api_key));

    let commands = CommandDispatcher::new(
        None,
        cloud
            .clone()
            .map(|c| Arc::new(c) as Arc<dyn CommandSink>),
        events.clone(),
    );
    let session = MonitorSession::new(
        ReadingCache::new(),
        AlertEngine::new(config.thresholds(), config.policy()),
        AlarmController::new(Arc::new(LogAlarmSurface)),
        commands,
        events.clone(),
    );

    tokio::spawn(log_events(events.subscribe()));

    let cloud_poller = cloud.clone().map(|c| {
        Poller::start(
            session.clone(),
            Arc::new(c),
            config.cloud_poll_interval(),
            ChannelKind::Cloud,
        )
    });

    let local = LocalLink::new();
    if config.mode.uses_device() {
        start_local(&local, &config, &http, &session, cloud.as_ref());
    }

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line(), if stdin_open => line,
        };

        let line = match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed; running until a shutdown signal");
                stdin_open = false;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                stdin_open = false;
                continue;
            }
        };

        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Silence(Some(id)) => match session.silence(&id) {
                Some(t) => println!("{id}: {} -> {}", t.from.label(), t.to.label()),
                None => println!("{id}: no alarm to silence"),
            },
            ConsoleCommand::Silence(None) => {
                let silenced = session.silence_all();
                println!("silenced {} device(s)", silenced.len());
                if let Some(cloud) = &cloud {
                    let local: HashSet<String> =
                        silenced.into_iter().map(|t| t.device_id).collect();
                    tokio::spawn(silence_upstream(cloud.clone(), session.clone(), local));
                }
            }
            ConsoleCommand::RelayOff(Some(id)) => {
                session.relay_off(&id);
            }
            ConsoleCommand::RelayOff(None) => {
                for id in session.cache().device_ids().await {
                    session.relay_off(&id);
                }
            }
            ConsoleCommand::Reconnect => {
                if !config.mode.uses_device() {
                    println!("reconnect only applies to local or both mode");
                    continue;
                }
                if local.is_connecting() {
                    println!("reconnect already in progress");
                    continue;
                }
                session.set_status(STATUS_RECONNECTING);
                start_local(&local, &config, &http, &session, cloud.as_ref());
            }
            ConsoleCommand::Status => print_status(&session).await,
            ConsoleCommand::Help => println!("{}", reefer_monitor::control::console::HELP),
            ConsoleCommand::Quit => break,
        }
    }

    local.shutdown().await;
    if let Some(poller) = cloud_poller {
        poller.stop().await;
    }
    info!("Monitor stopped");
    Ok(())
}

/// Connect to the local device on a background task. Returns `false` when an
/// earlier attempt is still running.
fn start_local(
    link: &LocalLink,
    config: &Config,
    http: &Client,
    session: &MonitorSession,
    cloud: Option<&CloudClient>,
) -> bool {
    let config = config.clone();
    let http = http.clone();
    let session = session.clone();
    let cloud = cloud.cloned();
    link.reconnect(move || async move { connect_local(&config, &http, &session, cloud.as_ref()).await })
}

/// Silence every unit the backend still lists with an unresolved alert that
/// the local silence did not already cover.
async fn silence_upstream(cloud: CloudClient, session: MonitorSession, covered: HashSet<String>) {
    match cloud.alerting_devices().await {
        Ok(ids) => {
            for id in ids.into_iter().filter(|id| !covered.contains(id)) {
                session.silence_upstream(&id);
            }
        }
        Err(e) => warn!(error = %e, "Could not list open alerts in the data store"),
    }
}

/// Resolve the device address (configured or discovered), install its
/// thresholds and start polling it.
async fn connect_local(
    config: &Config,
    http: &Client,
    session: &MonitorSession,
    cloud: Option<&CloudClient>,
) -> Option<PollerHandle> {
    let address = match &config.device_address {
        Some(address) => address.clone(),
        None => {
            let discovery = Discovery::from_plan(
                discovery_plan(config, cloud),
                Arc::new(HttpProber::new(http.clone())),
            );
            let outcome = discovery.discover().await;
            session.events().send(MonitorEvent::DiscoveryFinished {
                result: outcome.as_ref().ok().cloned(),
            });
            match outcome {
                Ok(found) => found.address,
                Err(e) => {
                    error!(error = %e, "Device discovery failed");
                    println!("{e}");
                    session.set_status(&e.to_string());
                    return None;
                }
            }
        }
    };

    let client = DeviceClient::new(http.clone(), &address);
    match client.get_status().await {
        Ok(snapshot) => match client.get_config().await {
            Ok(device_config) => {
                session
                    .engine()
                    .set_thresholds(&snapshot.identity.id, device_config.thresholds());
                info!(
                    device_id = %snapshot.identity.id,
                    temp_critical = device_config.temp_critical,
                    alert_delay_sec = device_config.alert_delay_sec,
                    "Device thresholds installed"
                );
            }
            Err(e) => warn!(error = %e, "Could not read device config; using defaults"),
        },
        Err(e) => warn!(address = %address, error = %e, "Device did not answer the first status read"),
    }

    session
        .commands()
        .set_device_sink(Some(Arc::new(client.clone())));
    Some(Poller::start(
        session.clone(),
        Arc::new(client),
        config.local_poll_interval(),
        ChannelKind::Device,
    ))
}

fn discovery_plan(config: &Config, cloud: Option<&CloudClient>) -> DiscoveryPlan {
    DiscoveryPlan {
        known: config.known_addresses.clone(),
        hostnames: config.hostname_candidates.clone(),
        registry: cloud.map(|c| {
            Arc::new(CloudRegistry::new(c.clone(), config.known_device_ids.clone()))
                as Arc<dyn RegistryLookup>
        }),
        broadcast: Some(BroadcastConfig::on_port(config.discovery_port)),
        scan: config
            .scan_prefix
            .as_ref()
            .map(|prefix| ScanRange::new(prefix.as_str(), config.scan_start, config.scan_end)),
        scan_parallelism: config.scan_parallelism,
        timeout: config.discovery_timeout(),
        ..DiscoveryPlan::default()
    }
}

async fn print_status(session: &MonitorSession) {
    println!("status: {}", session.status());
    for device in session.cache().all().await {
        let state = session.engine().state(&device.identity.id);
        let temp = device
            .reading
            .temperature()
            .map(|t| format!("{t:.1}°C"))
            .unwrap_or_else(|| "--".to_owned());
        println!(
            "{:<16} {:<24} {:>8}  door={}  relay={}  alert={}",
            device.identity.id,
            device.identity.display_name,
            temp,
            if device.reading.door_open { "open" } else { "closed" },
            if device.reading.relay_on { "on" } else { "off" },
            state.label(),
        );
    }
}

async fn log_events(mut rx: reefer_monitor::events::EventReceiver) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match rx.recv().await {
            Ok(MonitorEvent::AlertChanged { device_id, from, to }) => {
                info!(device_id = %device_id, from = from.label(), to = to.label(), "Alert transition");
            }
            Ok(MonitorEvent::CommandDelivered { device_id, kind }) => {
                info!(device_id = %device_id, command = %kind, "Command acknowledged by a channel");
            }
            Ok(MonitorEvent::CommandFailed { device_id, kind, reason }) => {
                warn!(device_id = %device_id, command = %kind, reason = %reason, "Command failed on every channel");
            }
            Ok(MonitorEvent::DiscoveryFinished { result }) => {
                info!(result = ?result, "Discovery finished");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
            Err(RecvError::Closed) => break,
        }
    }
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
