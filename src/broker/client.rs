use async_trait::async_trait;
use tokio::sync::mpsc;

use super::fake_backend::{FakeBrokerConfig, FakeConnector};
use super::model::{BrokerSettings, InboundMessage};
use super::rumqttc_backend::RumqttcConnector;
use crate::error::BrokerError;

/// Capacity of the channel carrying inbound broker messages to the relay loop.
pub(crate) const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Creates a connector for a real MQTT broker.
#[must_use]
pub fn real_broker_connector(settings: BrokerSettings) -> Box<dyn BrokerConnector> {
    Box::new(RumqttcConnector::new(settings))
}

/// Creates a connector for the in-process fake broker.
#[must_use]
pub fn fake_broker_connector(config: FakeBrokerConfig) -> Box<dyn BrokerConnector> {
    Box::new(FakeConnector::new(config))
}

/// Opens a broker connection.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Human-readable broker location, used in logs and the session banner.
    fn describe(&self) -> String;

    /// Connects and returns the client half plus the inbound message stream.
    async fn connect(self: Box<Self>) -> Result<BrokerConnection, BrokerError>;
}

/// Operations the relay performs against a connected broker.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Subscribes to one topic.
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Drops a subscription.
    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;

    /// Publishes one non-retained payload.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Disconnects and stops background work.
    async fn close(self: Box<Self>) -> Result<(), BrokerError>;
}

/// A connected broker: the client half and the inbound message stream.
pub struct BrokerConnection {
    client: Box<dyn BrokerClient>,
    inbound: mpsc::Receiver<InboundMessage>,
}

impl BrokerConnection {
    pub(crate) fn new(
        client: Box<dyn BrokerClient>,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> Self {
        Self { client, inbound }
    }

    /// Splits the connection into its client and inbound halves.
    #[must_use]
    pub fn into_parts(self) -> (Box<dyn BrokerClient>, mpsc::Receiver<InboundMessage>) {
        (self.client, self.inbound)
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection").finish_non_exhaustive()
    }
}
