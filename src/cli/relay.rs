use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{Span, debug, info, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::broker::{BrokerConnection, BrokerConnector, InboundMessage};
use crate::config::{ConfigSource, ConfigWatcher, DEFAULT_CONFIG_PATH, JsonFileConfig, RelayConfig};
use crate::control::{
    ControlHandle, ControlReconciler, ControlState, DEFAULT_MIN_RESEND_INTERVAL,
};
use crate::error::{BrokerError, RelayError};
use crate::notification::{DEFAULT_RECONNECT_MARKERS, StatusMarkers};
use crate::session::{AutomationOutcome, RelaySession, SessionEvent};
use crate::terminal::{ConsoleLines, Interrupt, TerminalClient};

use super::command::parse_duration;
use super::ui::{Painter, SessionEndView, SessionEventView, SessionReadyView, StopReason};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Inbound messages handled back to back before the tick and console get a
/// turn.
const MAX_INBOUND_BURST: usize = 32;

/// Arguments for the `run` command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// JSON configuration file with `target`, `control` and `send_message`.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// How often the configuration file is re-read (e.g. `500ms`, `2s`).
    #[arg(long, value_parser = parse_duration)]
    poll_interval: Option<Duration>,
    /// Minimum spacing between reconnect-triggered control resends.
    #[arg(long, value_parser = parse_duration)]
    resend_interval: Option<Duration>,
    /// Status phrase that means the device reconnected. Repeat to give
    /// several; replaces the built-in list.
    #[arg(long = "reconnect-marker", value_name = "PHRASE")]
    reconnect_markers: Vec<String>,
    /// Do not read operator commands from standard input.
    #[arg(long)]
    headless: bool,
}

impl RunArgs {
    /// Creates run arguments for a configuration file with default timings.
    #[must_use]
    pub fn new(config: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
            poll_interval: None,
            resend_interval: None,
            reconnect_markers: Vec::new(),
            headless: false,
        }
    }

    /// Disables console input.
    #[must_use]
    pub fn headless(mut self) -> Self {
        self.headless = true;
        self
    }

    /// Overrides the configuration poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Replaces the reconnection phrases.
    #[must_use]
    pub fn with_reconnect_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reconnect_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn config_path(&self) -> &Path {
        &self.config
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    fn resend_interval(&self) -> Duration {
        self.resend_interval.unwrap_or(DEFAULT_MIN_RESEND_INTERVAL)
    }

    fn status_markers(&self) -> StatusMarkers {
        if self.reconnect_markers.is_empty() {
            StatusMarkers::new(DEFAULT_RECONNECT_MARKERS)
        } else {
            StatusMarkers::new(&self.reconnect_markers)
        }
    }
}

/// Executes the `run` command until Ctrl+C, `quit`, console EOF, or broker
/// shutdown.
pub(crate) async fn run<W>(
    connector: Box<dyn BrokerConnector>,
    args: &RunArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let Established {
        broker,
        source,
        initial,
        mut session,
        inbound,
    } = establish(connector, args)
        .await
        .context("failed to start relay")?;
    writeln!(
        out,
        "{}",
        SessionReadyView::new(
            &broker,
            session.topics(),
            session.control().state(),
            !args.headless,
            &painter,
        )
    )?;

    let loop_result: Result<StopReason> = async {
        let events = session.start().await?;
        write_events(out, &events, &painter)?;

        let relay = RelayLoop {
            watcher: ConfigWatcher::new(Box::new(source), initial),
            inbound,
            inbound_burst: 0,
            interrupt: terminal_client.interrupted(),
            console: (!args.headless).then(|| terminal_client.console_lines()),
            poll: poll_interval(args.poll_interval()),
        };
        relay.run(&mut session, out, &painter).await
    }
    .await;

    let closed = session.close().await;
    let stop_reason = loop_result?;
    closed.context("failed to disconnect from broker")?;

    writeln!(out, "{}", SessionEndView::new(stop_reason, &painter))?;
    Ok(())
}

struct Established {
    broker: String,
    source: JsonFileConfig,
    initial: RelayConfig,
    session: RelaySession,
    inbound: mpsc::Receiver<InboundMessage>,
}

/// Loads the startup configuration, then connects. The broker is never
/// contacted when the configuration is unusable.
async fn establish(
    connector: Box<dyn BrokerConnector>,
    args: &RunArgs,
) -> Result<Established, RelayError> {
    let source = JsonFileConfig::new(args.config_path());
    let initial = source.load()?;

    let broker = connector.describe();
    let (client, inbound) = connect(connector).await?.into_parts();
    let control = ControlHandle::new(ControlReconciler::new(
        ControlState::Unset,
        args.resend_interval(),
    ));
    let session = RelaySession::new(client, &initial, control, args.status_markers());

    Ok(Established {
        broker,
        source,
        initial,
        session,
        inbound,
    })
}

#[instrument(skip(connector), level = "info", fields(broker = %connector.describe()))]
async fn connect(connector: Box<dyn BrokerConnector>) -> Result<BrokerConnection, BrokerError> {
    let span = Span::current();
    span.pb_set_message("Connecting to broker");
    match connector.connect().await {
        Ok(connection) => {
            span.pb_set_finish_message(&format!("{} Connected", "✓".green()));
            Ok(connection)
        }
        Err(error) => {
            span.pb_set_finish_message(&format!("{} Connection failed", "✗".red()));
            Err(error)
        }
    }
}

fn poll_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

struct RelayLoop {
    interrupt: Interrupt,
    watcher: ConfigWatcher,
    inbound: mpsc::Receiver<InboundMessage>,
    /// Inbound messages handled since the tick or console last had a turn.
    inbound_burst: usize,
    console: Option<ConsoleLines>,
    poll: Interval,
}

impl RelayLoop {
    async fn run<W>(
        mut self,
        session: &mut RelaySession,
        out: &mut W,
        painter: &Painter,
    ) -> Result<StopReason>
    where
        W: io::Write,
    {
        let stop_reason = loop {
            let inbound_open = self.inbound_burst < MAX_INBOUND_BURST;
            tokio::select! {
                biased;
                signal = &mut self.interrupt => {
                    signal.context("failed to listen for interrupt")?;
                    break StopReason::Interrupted;
                }
                message = self.inbound.recv(), if inbound_open => {
                    let Some(message) = message else {
                        break StopReason::BrokerClosed;
                    };
                    self.inbound_burst += 1;
                    let events = session.handle_inbound(message).await;
                    write_events(out, &events, painter)?;
                }
                _ = self.poll.tick() => {
                    self.inbound_burst = 0;
                    self.poll_config(session, out, painter).await?;
                }
                line = next_line(&mut self.console) => {
                    self.inbound_burst = 0;
                    let Some(line) = line else {
                        break StopReason::ConsoleClosed;
                    };
                    let line = line.context("failed to read console input")?;
                    let events = session.handle_console_line(&line).await;
                    write_events(out, &events, painter)?;
                    if events.iter().any(|event| matches!(event, SessionEvent::Quit)) {
                        break StopReason::Quit;
                    }
                }
                () = std::future::ready(()), if !inbound_open => {
                    debug!("inbound burst yielded with no operator input pending");
                    self.inbound_burst = 0;
                }
            }
        };

        info!(%stop_reason, "relay loop stopped");
        Ok(stop_reason)
    }

    async fn poll_config<W>(
        &mut self,
        session: &mut RelaySession,
        out: &mut W,
        painter: &Painter,
    ) -> Result<()>
    where
        W: io::Write,
    {
        if let Some(update) = self.watcher.poll() {
            info!(
                target_changed = update.target_changed(),
                control_changed = update.control_changed(),
                "configuration changed"
            );
            let events = session.apply_update(&update).await;
            write_events(out, &events, painter)?;
        }

        let Some(message) = self.watcher.pending_message().map(str::to_owned) else {
            return Ok(());
        };
        let outcome = session.send_automation(&message).await;
        if outcome.is_handled() {
            self.watcher.mark_message_handled(&message);
        }
        match outcome {
            AutomationOutcome::Sent(event) => write_events(out, &[event], painter)?,
            AutomationOutcome::Rejected(error) => {
                write_events(out, &[SessionEvent::UsageError(error)], painter)?;
            }
            AutomationOutcome::Held | AutomationOutcome::Empty => {
                debug!("automation message not sent this tick");
            }
        }
        Ok(())
    }
}

async fn next_line(console: &mut Option<ConsoleLines>) -> Option<io::Result<String>> {
    match console {
        Some(lines) => lines.next().await,
        None => std::future::pending().await,
    }
}

fn write_events<W>(out: &mut W, events: &[SessionEvent], painter: &Painter) -> io::Result<()>
where
    W: io::Write,
{
    for event in events {
        writeln!(out, "{}", SessionEventView::new(event, painter))?;
    }
    Ok(())
}
