//! Remote client.
//!
//! Long-lived MQTT client bridging the agent to the route-computation
//! control plane. Incoming publishes on the receive topic are handed to a
//! `MessageHandler` strictly in delivery order; handler and decode
//! failures are logged and the message counts as delivered (the broker
//! gives at-least-once, the kernel programmer is idempotent).
//!
//! A non-empty client id with QoS >= 1 makes the session persistent, so
//! the broker replays routes queued while the agent was down. That replay
//! is the whole resync story; there is no explicit ack to the remote
//! control plane.

use std::future::Future;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeReasonCode};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AgentError, Result};

/// Initial reconnect backoff.
const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
/// Backoff ceiling.
const BACKOFF_MAX: Duration = Duration::from_secs(8);
/// Grace period for the final disconnect.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Handler for payloads received on the receive topic.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, payload: &[u8]) -> impl Future<Output = Result<()>> + Send;
}

/// Parse a broker URL of the form `tcp://host:port` (or `mqtt://`).
pub(crate) fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .ok_or_else(|| {
            AgentError::InvalidConfig(format!("mqtt_url '{}' must be tcp:// or mqtt://", url))
        })?;

    if rest.is_empty() {
        return Err(AgentError::InvalidConfig(format!(
            "mqtt_url '{}' has no host",
            url
        )));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| {
                AgentError::InvalidConfig(format!("mqtt_url '{}' has invalid port", url))
            })?;
            if host.is_empty() {
                return Err(AgentError::InvalidConfig(format!(
                    "mqtt_url '{}' has no host",
                    url
                )));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), 1883)),
    }
}

/// Map the configured QoS level.
pub(crate) fn qos_level(qos: u8) -> Result<QoS> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(AgentError::InvalidConfig(format!(
            "mqtt_qos must be 0-2, got {}",
            other
        ))),
    }
}

/// Clean vs persistent session. Persistence needs both a stable client
/// identity and a QoS the broker will queue for.
pub(crate) fn clean_session(client_id: &str, qos: u8) -> bool {
    client_id.is_empty() || qos == 0
}

/// Publishing half of the remote client. Clonable; hands payloads to the
/// client's request queue.
#[derive(Clone)]
pub struct RemoteSender {
    client: AsyncClient,
    topic: String,
    qos: QoS,
}

impl RemoteSender {
    /// Publish a payload on the send topic. Failures are logged and the
    /// payload is dropped; retry is the caller's responsibility.
    pub async fn send(&self, payload: Vec<u8>) {
        if let Err(err) = self
            .client
            .publish(self.topic.as_str(), self.qos, false, payload)
            .await
        {
            warn!(topic = %self.topic, error = %err, "publish failed, dropping payload");
        }
    }
}

/// Receiving half: owns the event loop and the subscription.
pub struct RemoteClient<H> {
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
    topic_receive: String,
    qos: QoS,
    handler: H,
}

impl<H: MessageHandler> RemoteClient<H> {
    /// Build the client and its sender handle from configuration.
    pub fn new(config: &Config, handler: H) -> Result<(Self, RemoteSender)> {
        let (host, port) = parse_broker_url(&config.mqtt_url)?;
        let qos = qos_level(config.mqtt_qos)?;

        // The MQTT client refuses an empty id. An unconfigured id means a
        // clean session anyway, so a per-process identity loses nothing.
        let client_id = if config.mqtt_clientid.is_empty() {
            format!("galactic-agent-{}", std::process::id())
        } else {
            config.mqtt_clientid.clone()
        };

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(clean_session(&config.mqtt_clientid, config.mqtt_qos));
        if !config.mqtt_username.is_empty() {
            options.set_credentials(config.mqtt_username.clone(), config.mqtt_password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);

        let sender = RemoteSender {
            client: client.clone(),
            topic: config.mqtt_topic_send.clone(),
            qos,
        };

        Ok((
            Self {
                client,
                eventloop,
                topic_receive: config.mqtt_topic_receive.clone(),
                qos,
                handler,
            },
            sender,
        ))
    }

    /// Run the connect/subscribe/receive loop until shutdown.
    ///
    /// Connection errors back off and retry indefinitely; the broker being
    /// down is an operational state, not a task failure.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(topic = %self.topic_receive, "broker client starting");
        let mut backoff = BACKOFF_INITIAL;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("broker connected");
                        backoff = BACKOFF_INITIAL;
                        if let Err(err) = self.client.try_subscribe(self.topic_receive.as_str(), self.qos) {
                            warn!(error = %err, "subscribe request failed, reconnecting");
                            let _ = self.client.try_disconnect();
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        let rejected = ack
                            .return_codes
                            .iter()
                            .any(|code| matches!(code, SubscribeReasonCode::Failure));
                        if rejected {
                            warn!(topic = %self.topic_receive, "subscribe rejected, reconnecting");
                            let _ = self.client.try_disconnect();
                        } else {
                            info!(topic = %self.topic_receive, "subscribed");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Err(err) = self.handler.handle(&publish.payload).await {
                            // At-least-once: the message still counts as
                            // delivered, redelivery converges via replace
                            // semantics.
                            warn!(error = %err, "receive handler failed");
                        }
                    }
                    Ok(event) => {
                        debug!(?event, "broker event");
                    }
                    Err(err) => {
                        warn!(error = %err, backoff = ?backoff, "broker connection error");
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                    }
                }
            }
        }

        let _ = self.client.try_disconnect();
        let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        info!("broker client stopped");
        Ok(())
    }
}
