use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::broker::{
    BrokerSettings, DEFAULT_CLIENT_ID, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_KEEP_ALIVE,
    DEFAULT_PORT, FakeBrokerConfig, InboundFixtures, PublishLog, QosLevel,
};
use crate::cli::codec::{DecodeArgs, EncodeArgs};
use crate::cli::relay::RunArgs;
use crate::error::{CliConfigError, FixtureError};

/// Command-line options for the MQTT device relay.
#[derive(Debug, Parser)]
#[command(
    name = "mqrelay",
    about = "Relay operator commands to an embedded device over MQTT."
)]
pub struct Args {
    /// Broker host name.
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,
    /// Broker TCP port.
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Broker user name.
    #[arg(long, global = true, env = "MQRELAY_USERNAME")]
    username: Option<String>,
    /// Broker password.
    #[arg(long, global = true, env = "MQRELAY_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// MQTT client identifier.
    #[arg(long, global = true, default_value = DEFAULT_CLIENT_ID)]
    client_id: String,
    /// Keep-alive interval (e.g. `30s`, `1m`).
    #[arg(long, global = true, value_parser = parse_duration)]
    keep_alive: Option<Duration>,
    /// How long to wait for the broker to accept the connection.
    #[arg(long, global = true, value_parser = parse_duration)]
    connect_timeout: Option<Duration>,
    /// Delivery guarantee for subscriptions and publishes.
    #[arg(long, global = true, value_enum, default_value_t = QosArg::Zero)]
    qos: QosArg,
    /// Overrides `RUST_LOG` for this run.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Uses an in-process fake broker instead of connecting.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake inbound messages in the form `channel|payload;...`, where the
    /// channel is `to_server` or `status` and the payload is text or `hex:<bytes>`.
    /// Records are queued when their topic is subscribed, in the order given.
    #[arg(long, global = true, requires = "fake")]
    fake_inbound: Option<InboundFixtures>,
    #[arg(skip)]
    fake_override: Option<FakeArgs>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use mqrelay::{Args, Command, RunArgs};
    ///
    /// let args = Args::new(Command::Run(RunArgs::new("target.json")));
    /// assert_eq!(None, args.log_level());
    /// assert_eq!("localhost", args.broker_settings().host());
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            keep_alive: None,
            connect_timeout: None,
            qos: QosArg::Zero,
            log_level: None,
            fake: false,
            fake_inbound: None,
            fake_override: None,
            command,
        }
    }

    /// Enables fake broker mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        self.fake = true;
        self.fake_override = Some(fake);
        self
    }

    /// Returns the explicit log level, if one was given.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the real broker settings described by the flags.
    #[must_use]
    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings::builder()
            .host(self.host.clone())
            .port(self.port)
            .maybe_username(self.username.clone())
            .maybe_password(self.password.clone())
            .client_id(self.client_id.clone())
            .keep_alive(self.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE))
            .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .qos(self.qos.into())
            .build()
    }

    /// Splits parsed CLI arguments into command and optional fake-broker settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_inbound,
            fake_override,
            command,
            ..
        } = self;

        let fake_args = match (fake, fake_inbound) {
            (true, _) if fake_override.is_some() => fake_override,
            (true, inbound) => Some(FakeArgs {
                inbound: inbound.unwrap_or_default(),
                publish_log: PublishLog::default(),
                reject_publishes: false,
            }),
            (false, Some(_)) => return Err(CliConfigError::FixturesWithoutFake.into()),
            (false, None) => None,
        };

        Ok((command, fake_args))
    }
}

/// Fake broker arguments for programmatic runs.
#[derive(Debug, Clone, Builder)]
pub struct FakeArgs {
    #[builder(
        default,
        with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() }
    )]
    inbound: InboundFixtures,
    /// Receives every publish the relay makes.
    #[builder(default)]
    publish_log: PublishLog,
    /// Fails every publish.
    #[builder(default)]
    reject_publishes: bool,
}

impl FakeArgs {
    /// Returns the log that records publishes.
    #[must_use]
    pub fn publish_log(&self) -> &PublishLog {
        &self.publish_log
    }

    pub(crate) fn into_backend_config(self) -> FakeBrokerConfig {
        let Self {
            inbound,
            publish_log,
            reject_publishes,
        } = self;

        FakeBrokerConfig::builder()
            .fixtures(inbound)
            .publish_log(publish_log)
            .reject_publishes(reject_publishes)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the broker and relay console input, status, and config changes.
    Run(RunArgs),
    /// Print the wire bytes of one frame.
    Encode(EncodeArgs),
    /// Decode hexadecimal bytes as a frame.
    Decode(DecodeArgs),
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// `--qos` values.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
enum QosArg {
    #[value(name = "0")]
    Zero,
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl From<QosArg> for QosLevel {
    fn from(value: QosArg) -> Self {
        match value {
            QosArg::Zero => Self::AtMostOnce,
            QosArg::One => Self::AtLeastOnce,
            QosArg::Two => Self::ExactlyOnce,
        }
    }
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn fake_inbound_requires_fake_mode() {
        let result = Args::try_parse_from(["mqrelay", "--fake-inbound", "status|hi", "run"]);

        let error = result.expect_err("--fake-inbound should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_inbound_rejects_outbound_channels() {
        let result = Args::try_parse_from([
            "mqrelay",
            "--fake",
            "--fake-inbound",
            "control|activate",
            "run",
        ]);

        let error = result.expect_err("control fixtures should be rejected");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let args = Args::try_parse_from([
            "mqrelay",
            "--fake",
            "--fake-inbound",
            "status|esp aktif",
            "run",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = args
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Run(_));
        assert_matches!(fake_args, Some(_));
    }

    #[test]
    fn broker_flags_map_to_settings() {
        let args = Args::try_parse_from([
            "mqrelay",
            "--host",
            "broker.lan",
            "--port",
            "8883",
            "--client-id",
            "bench",
            "--keep-alive",
            "30s",
            "--qos",
            "1",
            "run",
        ])
        .expect("valid broker arguments should parse");

        let settings = args.broker_settings();
        assert_eq!("broker.lan", settings.host());
        assert_eq!(8883, settings.port());
        assert_eq!("bench", settings.client_id());
        assert_eq!(Duration::from_secs(30), settings.keep_alive());
        assert_eq!(QosLevel::AtLeastOnce, settings.qos());
    }

    #[rstest]
    #[case("3")]
    #[case("exactly")]
    fn qos_rejects_unknown_levels(#[case] value: &str) {
        let result = Args::try_parse_from(["mqrelay", "--qos", value, "run"]);
        let error = result.expect_err("invalid qos should fail");
        assert_eq!(ErrorKind::InvalidValue, error.kind());
    }
}
