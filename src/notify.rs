//! Event notifications.
//!
//! On every event start the notifier dispatches one message per delivery
//! channel, fire-and-forget with a bounded retry count. Persistent failure
//! is logged and counted, never fatal: a lost alert must not take the
//! pipeline down.
//!
//! The default channel is MQTT (QoS 1, with an availability topic and Last
//! Will so consumers can track daemon liveness). A log-only transport is
//! used when no broker is configured, and an in-memory transport backs the
//! tests.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::v5::LastWill, mqttbytes::QoS, Client, Connection, Event as MqttEvent, MqttOptions};
use serde::Serialize;

use crate::Event;

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";

/// Delivery channel for notifications.
pub trait NotifyTransport: Send {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Flush and tear down the channel. Called once at shutdown.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Notification payload published on event start.
#[derive(Serialize)]
pub struct EventNotification {
    pub event_id: String,
    pub label: String,
    pub started_at_ms: u64,
    pub confidence: f32,
    /// Representative frame within the recorded segment.
    pub frame_seq: u64,
    /// Clip segment directory, when recording succeeded.
    pub segment: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NotifierConfig {
    /// MQTT topic prefix; events go to `<prefix>/event/<label>` and a
    /// `<prefix>/events` firehose.
    pub topic_prefix: String,
    /// Minimum confidence for an event to be announced.
    pub min_confidence: f32,
    /// Labels to announce; empty means all.
    pub labels: Vec<String>,
    /// Additional delivery attempts after the first failure.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "sentry".to_string(),
            min_confidence: 0.0,
            labels: Vec::new(),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Dispatches event-start alerts through a [`NotifyTransport`].
pub struct Notifier {
    config: NotifierConfig,
    transport: Box<dyn NotifyTransport>,
    published: u64,
    failures: u64,
}

impl Notifier {
    pub fn new(config: NotifierConfig, transport: Box<dyn NotifyTransport>) -> Self {
        Self {
            config,
            transport,
            published: 0,
            failures: 0,
        }
    }

    /// Announce a started event, unless filtered out.
    pub fn event_started(&mut self, event: &Event, segment: Option<&Path>) {
        if event.peak_confidence < self.config.min_confidence {
            return;
        }
        if !self.config.labels.is_empty()
            && !self.config.labels.iter().any(|l| l.as_str() == event.label)
        {
            return;
        }

        let notification = EventNotification {
            event_id: event.id.to_string(),
            label: event.label.clone(),
            started_at_ms: event.started_at_ms,
            confidence: event.peak_confidence,
            frame_seq: event.representative_seq,
            segment: segment.map(|p| p.display().to_string()),
        };
        let payload = match serde_json::to_vec(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("notification error: serialize event {}: {}", event.id, e);
                self.failures += 1;
                return;
            }
        };

        let label_topic = format!("{}/event/{}", self.config.topic_prefix, event.label);
        let firehose_topic = format!("{}/events", self.config.topic_prefix);
        let delivered = self.publish_with_retry(&label_topic, &payload)
            && self.publish_with_retry(&firehose_topic, &payload);

        if delivered {
            self.published += 1;
            log::info!("notified {} for event {}", label_topic, event.id);
        } else {
            self.failures += 1;
        }
    }

    fn publish_with_retry(&mut self, topic: &str, payload: &[u8]) -> bool {
        let attempts = self.config.max_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.transport.publish(topic, payload) {
                Ok(()) => return true,
                Err(e) => {
                    log::warn!(
                        "notification error: publish {} (attempt {}/{}): {:#}",
                        topic,
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts && !self.config.retry_backoff.is_zero() {
                        std::thread::sleep(self.config.retry_backoff);
                    }
                }
            }
        }
        false
    }

    pub fn shutdown(&mut self) {
        if let Err(e) = self.transport.shutdown() {
            log::warn!("notification error: shutdown: {:#}", e);
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    /// Notifications lost to persistent delivery failure.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

// ----------------------------------------------------------------------------
// MQTT transport
// ----------------------------------------------------------------------------

/// MQTT delivery via a local broker.
///
/// Publishes with QoS 1 and maintains an availability topic with a Last
/// Will so consumers notice when the daemon dies.
pub struct MqttTransport {
    client: Client,
    availability_topic: String,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttTransport {
    pub fn connect(broker_addr: &str, client_id: &str, topic_prefix: &str) -> Result<Self> {
        let (host, port) = split_host_port(broker_addr)?;
        let availability_topic = format!("{}/status", topic_prefix);

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        let will = LastWill::new(
            availability_topic.as_str(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        );
        options.set_last_will(will);

        let (client, connection) = Client::new(options, 10);
        let handle = spawn_connection_loop(connection);

        client
            .publish(
                availability_topic.as_str(),
                QoS::AtLeastOnce,
                true,
                PAYLOAD_ONLINE.as_bytes().to_vec(),
            )
            .context("publish availability")?;
        log::info!("connected to MQTT broker at {}", broker_addr);

        Ok(Self {
            client,
            availability_topic,
            connection_handle: Some(handle),
        })
    }
}

impl NotifyTransport for MqttTransport {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .with_context(|| format!("mqtt publish to {}", topic))?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.client
            .publish(
                self.availability_topic.as_str(),
                QoS::AtLeastOnce,
                true,
                PAYLOAD_OFFLINE.as_bytes().to_vec(),
            )
            .ok();
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn spawn_connection_loop(mut connection: Connection) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(MqttEvent::Incoming(_)) | Ok(MqttEvent::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let addr = addr
        .trim()
        .strip_prefix("mqtt://")
        .unwrap_or(addr.trim());
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

// ----------------------------------------------------------------------------
// Log-only transport
// ----------------------------------------------------------------------------

/// Local alert channel: notifications land in the daemon log. Used when no
/// broker is configured.
#[derive(Default)]
pub struct LogTransport;

impl LogTransport {
    pub fn new() -> Self {
        Self
    }
}

impl NotifyTransport for LogTransport {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        log::info!("[{}] {}", topic, String::from_utf8_lossy(payload));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory transport for tests
// ----------------------------------------------------------------------------

/// Collects published messages in memory; failures can be scripted.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    messages: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    fail_remaining: Arc<Mutex<u32>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` publishes before succeeding again.
    pub fn fail_times(&self, n: u32) {
        *self.fail_remaining.lock().expect("transport lock") = n;
    }

    pub fn messages(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().expect("transport lock").clone()
    }
}

impl NotifyTransport for MemoryTransport {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut remaining = self.fail_remaining.lock().expect("transport lock");
        if *remaining > 0 {
            *remaining -= 1;
            return Err(anyhow!("scripted publish failure"));
        }
        drop(remaining);
        self.messages
            .lock()
            .expect("transport lock")
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}
