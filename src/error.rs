use std::path::PathBuf;

use derive_more::From;
use thiserror::Error;

use crate::protocol::TopicKind;

/// Example configuration shown when the startup configuration is unusable.
pub(crate) const CONFIG_EXAMPLE: &str = r#"{"target":"30:ED:A0:31:BE:64","control":"activate"}"#;

/// A control value other than `activate` or `deactivate`.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("control must be `activate` or `deactivate`, got `{value}`")]
pub struct InvalidControlState {
    pub value: String,
}

/// Errors returned while loading the relay configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "configuration file `{}` was not found; example contents: {example}",
        path.display(),
        example = CONFIG_EXAMPLE
    )]
    NotFound { path: PathBuf },
    #[error("failed to read configuration file `{}`", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(
        "configuration file `{}` is not valid; example contents: {example}",
        path.display(),
        example = CONFIG_EXAMPLE
    )]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(
        "configuration file `{}` has an empty `target` field; example contents: {example}",
        path.display(),
        example = CONFIG_EXAMPLE
    )]
    EmptyTarget { path: PathBuf },
}

/// Errors returned by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed")]
    Client(#[from] rumqttc::ClientError),
    #[error("broker connection failed")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("timed out after {timeout:?} waiting for the broker to accept the connection")]
    ConnectTimeout { timeout: std::time::Duration },
    #[error("the broker connection is closed")]
    Closed,
    #[error("publish to `{topic}` failed")]
    Publish {
        topic: String,
        #[source]
        source: Box<BrokerError>,
    },
}

/// Errors returned when parsing an operator command line.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ConsoleCommandError {
    #[error("usage: frame <cmd> <subtype> <data>")]
    FrameUsage,
    #[error("frame {field} must be numeric (e.g. 2 or 0x02), got `{value}`")]
    NonNumericField { field: &'static str, value: String },
}

/// Errors returned when parsing fake broker fixtures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FixtureError {
    #[error("fixture records must have the form `channel|payload`")]
    InvalidRecord,
    #[error("unknown fixture channel `{channel}`; expected `to_server` or `status`")]
    UnknownChannel { channel: String },
    #[error("fixture channel `{channel}` is not subscribed by the relay")]
    OutboundChannel { channel: TopicKind },
    #[error("fixture payload is not valid hex")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("--fake-inbound fixtures require --fake")]
    FixturesWithoutFake,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level relay errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum RelayError {
    #[error(transparent)]
    #[from(ConfigError, Box<ConfigError>)]
    Config(Box<ConfigError>),
    #[error(transparent)]
    #[from(BrokerError, Box<BrokerError>)]
    Broker(Box<BrokerError>),
}
