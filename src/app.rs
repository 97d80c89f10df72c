use std::io;

use anyhow::Result;
use tracing::instrument;

use crate::broker::{
    BrokerConnector, BrokerSettings, fake_broker_connector as build_fake_broker_connector,
    real_broker_connector as build_real_broker_connector,
};
use crate::cli::{Command, FakeArgs, LogLevel};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const SERVICE_NAME: &str = "mqrelay";

/// Creates a broker connector backed by a real MQTT connection.
#[must_use]
pub fn real_broker_connector(settings: BrokerSettings) -> Box<dyn BrokerConnector> {
    build_real_broker_connector(settings)
}

/// Creates a broker connector backed by the in-process fake broker.
#[must_use]
pub fn fake_broker_connector(fake_args: FakeArgs) -> Box<dyn BrokerConnector> {
    build_fake_broker_connector(fake_args.into_backend_config())
}

/// Runs the CLI command with the system terminal.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = mqrelay::Args::try_parse_from(["mqrelay", "--fake", "decode", "63 02 05 68 69 76"])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let connector = match maybe_fake_args {
///     Some(fake_args) => mqrelay::fake_broker_connector(fake_args),
///     None => mqrelay::real_broker_connector(mqrelay::BrokerSettings::default()),
/// };
/// let mut out = Vec::new();
/// mqrelay::run(command, &mut out, connector).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the relay cannot start,
/// or output writing fails.
pub async fn run<W>(command: Command, out: &mut W, connector: Box<dyn BrokerConnector>) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, connector, None).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the relay cannot start,
/// or output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    connector: Box<dyn BrokerConnector>,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, &SystemTerminalClient, connector, log_level)
        .await
}

/// Runs the CLI command with injected clients.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the relay cannot start,
/// or output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    connector: Box<dyn BrokerConnector>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, connector, None).await
}

/// Runs the CLI command with injected clients and explicit telemetry settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl mqrelay::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
///     fn console_lines(&self) -> mqrelay::ConsoleLines {
///         mqrelay::scripted_console_lines(["quit"])
///     }
/// }
///
/// let args = mqrelay::Args::try_parse_from([
///     "mqrelay",
///     "--log-level",
///     "off",
///     "--fake",
///     "encode",
///     "2",
///     "5",
///     "hi",
/// ])?;
/// let log_level = args.log_level();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let connector = match maybe_fake_args {
///     Some(fake_args) => mqrelay::fake_broker_connector(fake_args),
///     None => mqrelay::real_broker_connector(mqrelay::BrokerSettings::default()),
/// };
/// let mut out = Vec::new();
/// mqrelay::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     connector,
///     log_level,
/// ).await?;
/// assert_eq!("63 02 05 68 69 76\n", String::from_utf8(out)?);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the relay cannot start,
/// or output writing fails.
#[instrument(
    skip(out, terminal_client, connector),
    level = "info",
    fields(command = %command_name(&command), ?log_level)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    connector: Box<dyn BrokerConnector>,
    log_level: Option<LogLevel>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        SERVICE_NAME,
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Run(args) => crate::cli::relay::run(connector, &args, out, terminal_client).await,
        Command::Encode(args) => crate::cli::codec::encode(&args, out, terminal_client),
        Command::Decode(args) => crate::cli::codec::decode(&args, out, terminal_client),
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Run(_args) => "run",
        Command::Encode(_args) => "encode",
        Command::Decode(_args) => "decode",
    }
}
