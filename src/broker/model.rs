use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bon::Builder;
use strum_macros::Display;

pub(crate) const DEFAULT_HOST: &str = "localhost";
pub(crate) const DEFAULT_PORT: u16 = 1883;
pub(crate) const DEFAULT_CLIENT_ID: &str = "mqrelay";
pub(crate) const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// MQTT delivery guarantee used for subscriptions and publishes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display)]
pub enum QosLevel {
    /// Fire and forget.
    #[default]
    #[strum(to_string = "0")]
    AtMostOnce,
    /// Acknowledged delivery, may duplicate.
    #[strum(to_string = "1")]
    AtLeastOnce,
    /// Exactly-once handshake.
    #[strum(to_string = "2")]
    ExactlyOnce,
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => Self::AtMostOnce,
            QosLevel::AtLeastOnce => Self::AtLeastOnce,
            QosLevel::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// Connection settings for the real MQTT backend.
#[derive(Clone, Builder)]
pub struct BrokerSettings {
    #[builder(into, default = DEFAULT_HOST.to_string())]
    host: String,
    #[builder(default = DEFAULT_PORT)]
    port: u16,
    #[builder(into)]
    username: Option<String>,
    #[builder(into)]
    password: Option<String>,
    #[builder(into, default = DEFAULT_CLIENT_ID.to_string())]
    client_id: String,
    #[builder(default = DEFAULT_KEEP_ALIVE)]
    keep_alive: Duration,
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    #[builder(default)]
    qos: QosLevel,
}

impl BrokerSettings {
    /// Returns the broker host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker TCP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the optional user name.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub(crate) fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns the MQTT client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns how long to wait for the broker to accept the connection.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the delivery guarantee.
    #[must_use]
    pub fn qos(&self) -> QosLevel {
        self.qos
    }
}

impl fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .field("qos", &self.qos)
            .finish()
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One message delivered by the broker.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
}

impl InboundMessage {
    /// Creates an inbound message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Returns the topic the message arrived on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// One message the relay handed to the broker.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PublishedMessage {
    topic: String,
    payload: Vec<u8>,
}

impl PublishedMessage {
    /// Creates a published-message record.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Returns the destination topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the raw payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Shared record of everything published through the fake broker.
#[derive(Debug, Clone, Default)]
pub struct PublishLog {
    entries: Arc<Mutex<Vec<PublishedMessage>>>,
}

impl PublishLog {
    /// Returns every recorded publish, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.lock().clone()
    }

    /// Returns the payloads published to one topic, oldest first.
    #[must_use]
    pub fn payloads_for(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .filter(|message| message.topic() == topic)
            .map(|message| message.payload().to_vec())
            .collect()
    }

    pub(crate) fn record(&self, message: PublishedMessage) {
        self.lock().push(message);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PublishedMessage>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
