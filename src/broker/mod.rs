mod client;
mod fake_backend;
mod model;
mod rumqttc_backend;

pub use self::client::{
    BrokerClient, BrokerConnection, BrokerConnector, fake_broker_connector, real_broker_connector,
};
pub use self::fake_backend::{FakeBrokerConfig, InboundFixture, InboundFixtures};
pub use self::model::{BrokerSettings, InboundMessage, PublishLog, PublishedMessage, QosLevel};
pub(crate) use self::model::{
    DEFAULT_CLIENT_ID, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_KEEP_ALIVE, DEFAULT_PORT,
};
