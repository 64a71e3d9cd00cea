//! MQTT adapter.
//!
//! Owns the `rumqttc` client and its event loop. Inbound messages are
//! parsed on the event-loop task and handed to the bridge with a
//! non-blocking submit; nothing on this task ever waits for the bus.

pub mod inbound;
pub mod publisher;
pub mod topics;

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dali2mqtt_config::MqttSettings;
use dali2mqtt_core::{Bridge, BridgeHandle};

use crate::error::CliError;

pub use publisher::{MqttPublisher, OFFLINE, ONLINE};
pub use topics::Topics;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 256;
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// A connected client and the event loop that drives it.
pub struct MqttLink {
    pub client: AsyncClient,
    pub eventloop: EventLoop,
}

fn options(settings: &MqttSettings, topics: &Topics) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.server, settings.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_last_will(LastWill::new(
        topics.availability(),
        OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    if let Some(ref username) = settings.username {
        let password = settings
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_owned())
            .unwrap_or_default();
        options.set_credentials(username, password);
    }
    options
}

/// Connect and wait for the broker's acknowledgement, then subscribe and
/// announce availability.
pub async fn connect(settings: &MqttSettings, topics: &Topics) -> Result<MqttLink, CliError> {
    let (client, mut eventloop) = AsyncClient::new(options(settings, topics), REQUEST_CAPACITY);
    let failed = |reason: String| CliError::Mqtt {
        server: format!("{}:{}", settings.server, settings.port),
        reason,
    };

    let acked = tokio::time::timeout(CONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e.to_string()),
            }
        }
    })
    .await;
    match acked {
        Ok(Ok(())) => {}
        Ok(Err(reason)) => return Err(failed(reason)),
        Err(_) => {
            return Err(failed(format!(
                "no acknowledgement within {}s",
                CONNECT_TIMEOUT.as_secs()
            )));
        }
    }

    info!(server = %settings.server, port = settings.port, "connected to MQTT broker");
    on_connected(&client, topics);
    Ok(MqttLink { client, eventloop })
}

/// Subscribe to the command topics and mark the bridge available. Must not
/// block: it runs on the event-loop task.
fn on_connected(client: &AsyncClient, topics: &Topics) {
    for filter in topics.subscriptions() {
        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
            warn!(filter, error = %e, "subscribe failed");
        }
    }
    if let Err(e) = client.try_publish(topics.availability(), QoS::AtLeastOnce, true, ONLINE) {
        warn!(error = %e, "could not publish availability");
    }
}

fn dispatch(topics: &Topics, handle: &BridgeHandle, topic: &str, payload: &[u8]) {
    match inbound::parse_request(topics, topic, payload) {
        Ok(request) => {
            debug!(topic, ?request, "request received");
            if let Err(e) = handle.submit(request) {
                warn!(topic, error = %e, "request dropped");
            }
        }
        Err(e) => warn!(topic, error = %e, "ignoring message"),
    }
}

/// Drive the client until it disconnects or `cancel` fires. `rumqttc`
/// reconnects on the next poll after an error.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: Topics,
    bridge: Bridge,
    cancel: CancellationToken,
) {
    let handle = bridge.handle();
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(msg))) => {
                dispatch(&topics, &handle, &msg.topic, &msg.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("reconnected to MQTT broker");
                on_connected(&client, &topics);
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.publish_bridge_status().await });
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(ERROR_PAUSE) => {}
                }
            }
        }
    }
    debug!("MQTT event loop stopped");
}
