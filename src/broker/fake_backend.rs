use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use super::client::{BrokerClient, BrokerConnection, BrokerConnector, INBOUND_CHANNEL_CAPACITY};
use super::model::{InboundMessage, PublishLog, PublishedMessage};
use crate::error::{BrokerError, FixtureError};
use crate::protocol::TopicKind;

const HEX_PREFIX: &str = "hex:";

/// One scripted inbound message, keyed by topic leaf.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InboundFixture {
    channel: TopicKind,
    payload: Vec<u8>,
}

impl InboundFixture {
    /// Creates a fixture for an inbound channel.
    #[must_use]
    pub fn new(channel: TopicKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// Returns the channel the fixture is delivered on.
    #[must_use]
    pub fn channel(&self) -> TopicKind {
        self.channel
    }

    /// Returns the fixture payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl FromStr for InboundFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (channel, payload) = value.split_once('|').ok_or(FixtureError::InvalidRecord)?;
        let channel = channel.trim();
        let kind = TopicKind::from_leaf(channel).ok_or_else(|| FixtureError::UnknownChannel {
            channel: channel.to_string(),
        })?;
        if !kind.is_inbound() {
            return Err(FixtureError::OutboundChannel { channel: kind });
        }

        let payload = match payload.strip_prefix(HEX_PREFIX) {
            Some(raw_hex) => {
                let cleaned: String = raw_hex.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(cleaned)?
            }
            None => payload.as_bytes().to_vec(),
        };
        Ok(Self::new(kind, payload))
    }
}

/// Parsed `;`-separated inbound fixture records.
#[derive(Debug, Clone, Default, Eq, PartialEq, derive_more::Into)]
pub struct InboundFixtures {
    fixtures: Vec<InboundFixture>,
}

impl FromStr for InboundFixtures {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let fixtures = value
            .split(';')
            .filter(|record| !record.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fixtures })
    }
}

impl From<Vec<InboundFixture>> for InboundFixtures {
    fn from(fixtures: Vec<InboundFixture>) -> Self {
        Self { fixtures }
    }
}

/// Settings for constructing the fake broker.
#[derive(Debug, Clone, Default, Builder)]
pub struct FakeBrokerConfig {
    #[builder(default)]
    fixtures: InboundFixtures,
    #[builder(default)]
    publish_log: PublishLog,
    /// Fail every publish, to exercise error reporting.
    #[builder(default)]
    reject_publishes: bool,
}

#[derive(Debug)]
pub(crate) struct FakeConnector {
    config: FakeBrokerConfig,
}

impl FakeConnector {
    pub(crate) fn new(config: FakeBrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConnector for FakeConnector {
    fn describe(&self) -> String {
        "fake broker".to_string()
    }

    async fn connect(self: Box<Self>) -> Result<BrokerConnection, BrokerError> {
        let FakeBrokerConfig {
            fixtures,
            publish_log,
            reject_publishes,
        } = self.config;
        let fixtures: Vec<InboundFixture> = fixtures.into();
        // Every fixture fits in the channel, so delivery never waits on the reader.
        let (sender, receiver) = mpsc::channel(fixtures.len().max(INBOUND_CHANNEL_CAPACITY));
        let client = FakeBrokerClient {
            pending: Mutex::new(fixtures),
            publish_log,
            reject_publishes,
            sender,
        };
        Ok(BrokerConnection::new(Box::new(client), receiver))
    }
}

/// Fake broker client. Fixtures are delivered once, when a topic with the
/// matching leaf is first subscribed.
#[derive(Debug)]
struct FakeBrokerClient {
    pending: Mutex<Vec<InboundFixture>>,
    publish_log: PublishLog,
    reject_publishes: bool,
    sender: mpsc::Sender<InboundMessage>,
}

impl FakeBrokerClient {
    fn take_fixtures_for(&self, topic: &str) -> Vec<InboundFixture> {
        let Some(kind) = topic.rsplit('/').next().and_then(TopicKind::from_leaf) else {
            return Vec::new();
        };
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (matching, rest) = pending
            .drain(..)
            .partition(|fixture| fixture.channel() == kind);
        *pending = rest;
        matching
    }
}

#[async_trait]
impl BrokerClient for FakeBrokerClient {
    #[instrument(skip(self), level = "debug")]
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        for fixture in self.take_fixtures_for(topic) {
            debug!(topic, payload_len = fixture.payload().len(), "delivering fixture");
            self.sender
                .try_send(InboundMessage::new(topic, fixture.payload))
                .map_err(|_| BrokerError::Closed)?;
        }
        Ok(())
    }

    async fn unsubscribe(&self, _topic: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.reject_publishes {
            return Err(BrokerError::Publish {
                topic: topic.to_string(),
                source: Box::new(BrokerError::Closed),
            });
        }
        self.publish_log
            .record(PublishedMessage::new(topic, payload.to_vec()));
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        Ok(())
    }
}
