//! `run`: the long-lived bridge process.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dali2mqtt_config::{Config, DevicesNames};
use dali2mqtt_core::{Bridge, ExitReason, StatePublisher};

use crate::error::CliError;
use crate::mqtt::{self, MqttLink, MqttPublisher, Topics};

/// MQTT startup attempts before giving up.
const STARTUP_ATTEMPTS: u32 = 10;
/// Bounds of the random pause between startup attempts, in seconds.
const STARTUP_PAUSE_SECS: std::ops::RangeInclusive<u64> = 1..=10;
/// How long the event loop may take to flush the final messages.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn handle(config: Config) -> Result<(), CliError> {
    let topics = Topics::new(&config.mqtt.base_topic);
    let names = Arc::new(DevicesNames::load(&config.devices_names_file)?);
    let link = connect_with_retry(&config, &topics).await?;
    let MqttLink { client, eventloop } = link;

    let publisher = Arc::new(MqttPublisher::new(
        client.clone(),
        topics.clone(),
        &config.ha_discovery_prefix,
    ));
    if let Err(e) = publisher.announce_bridge(&config.dali.driver.to_string()).await {
        warn!(error = %e, "could not announce bridge device");
    }

    let bridge = Bridge::new(
        config.to_bridge_config(),
        super::transport(&config),
        publisher.clone(),
        names,
    );
    let cancel = CancellationToken::new();
    let event_loop = tokio::spawn(mqtt::run_event_loop(
        eventloop,
        client.clone(),
        topics,
        bridge.clone(),
        cancel.clone(),
    ));
    bridge.publish_bridge_status().await;

    let outcome = match bridge.start().await {
        Ok(_) => Ok(tokio::select! {
            reason = bridge.wait() => reason,
            () = shutdown_signal() => {
                info!("shutdown signal received");
                ExitReason::Shutdown
            }
        }),
        Err(e) => {
            error!(error = %e, "bridge failed to start");
            Err(CliError::from(e))
        }
    };
    bridge.shutdown().await;

    // Leave retained offline markers behind before disconnecting.
    if matches!(
        outcome,
        Ok(ExitReason::RestartRequested | ExitReason::TransportDead)
    ) {
        if let Err(e) = publisher.publish_offline_status().await {
            warn!(error = %e, "could not publish offline status");
        }
    }
    if let Err(e) = publisher.publish_availability(false).await {
        warn!(error = %e, "could not publish availability");
    }
    if let Err(e) = client.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    if tokio::time::timeout(FLUSH_TIMEOUT, event_loop).await.is_err() {
        warn!("MQTT event loop did not stop in time");
    }
    cancel.cancel();

    match outcome? {
        ExitReason::Shutdown => {
            info!("bridge stopped");
            Ok(())
        }
        ExitReason::TransportDead => Err(CliError::TransportDead {
            seconds: config.health.restart_after_secs,
        }),
        ExitReason::RestartRequested => Err(CliError::RestartRequested),
    }
}

/// Retry MQTT startup with a random pause between attempts.
async fn connect_with_retry(config: &Config, topics: &Topics) -> Result<MqttLink, CliError> {
    let mut attempt = 1;
    loop {
        match mqtt::connect(&config.mqtt, topics).await {
            Ok(link) => return Ok(link),
            Err(e) if attempt < STARTUP_ATTEMPTS => {
                let pause = Duration::from_secs(rand::thread_rng().gen_range(STARTUP_PAUSE_SECS));
                warn!(
                    attempt,
                    max_attempts = STARTUP_ATTEMPTS,
                    pause_secs = pause.as_secs(),
                    error = %e,
                    "MQTT startup failed, retrying"
                );
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
