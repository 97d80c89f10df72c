use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::control::ControlState;
use crate::handlers::{ConsoleCommand, Frame};
use crate::notification::InboundEvent;
use crate::protocol::{DeviceTopics, TopicKind};
use crate::session::{OutboundSource, SessionEvent};
use crate::utils::format_hex;

use super::painter::Painter;
use super::table::Table;

const HELP_LINES: [(&str, &str); 6] = [
    ("activate", "publish `activate` to the control topic"),
    ("deactivate", "publish `deactivate` to the control topic"),
    (
        "frame <cmd> <subtype> <data...>",
        "send a binary frame (cmd/subtype accept 2, 0x02, 0b10)",
    ),
    ("<any other text>", "send the text as-is"),
    ("help", "show this list"),
    ("quit | exit", "end the session"),
];

/// Renders the banner printed once the broker connection is up.
pub(crate) struct SessionReadyView<'a> {
    broker: &'a str,
    topics: &'a DeviceTopics,
    control: ControlState,
    interactive: bool,
    painter: &'a Painter,
}

impl<'a> SessionReadyView<'a> {
    pub(crate) fn new(
        broker: &'a str,
        topics: &'a DeviceTopics,
        control: ControlState,
        interactive: bool,
        painter: &'a Painter,
    ) -> Self {
        Self {
            broker,
            topics,
            control,
            interactive,
            painter,
        }
    }
}

impl Display for SessionReadyView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let subscribed = self.topics.inbound().collect::<Vec<_>>().join(", ");
        let control = if self.control.is_set() {
            self.painter.value(self.control.to_string())
        } else {
            self.painter.muted(self.control.to_string())
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("broker", self.painter.value(self.broker)),
                ("target", self.painter.value(self.topics.device_id())),
                ("control", control),
                ("subscribed", subscribed),
                (
                    "sending_to",
                    self.topics.topic(TopicKind::FromServer).to_string(),
                ),
            ],
        );

        write!(f, "{}", self.painter.heading("Relay session:"))?;
        write!(f, "\n{table}")?;
        if self.interactive {
            write!(
                f,
                "\n{}",
                self.painter.muted("Type `help` for commands, `quit` to exit.")
            )?;
        }
        Ok(())
    }
}

/// Renders one session event as a single line (or the help list).
pub(crate) struct SessionEventView<'a> {
    event: &'a SessionEvent,
    painter: &'a Painter,
}

impl<'a> SessionEventView<'a> {
    pub(crate) fn new(event: &'a SessionEvent, painter: &'a Painter) -> Self {
        Self { event, painter }
    }

    fn incoming(&self, f: &mut Formatter<'_>, kind: TopicKind, event: &InboundEvent) -> fmt::Result {
        let label = self.painter.muted(format!("← {kind}"));
        match event {
            InboundEvent::Frame(frame) => write!(f, "{label} {}", self.frame(frame)),
            InboundEvent::Text { text, .. } => write!(f, "{label} {text}"),
        }
    }

    fn frame(&self, frame: &Frame) -> String {
        format!(
            "frame {} {}",
            self.painter.value(frame.to_string()),
            self.painter.muted(format!("[{}]", format_hex(&frame.to_bytes())))
        )
    }

    fn warning(&self, f: &mut Formatter<'_>, message: String, error: &dyn Error) -> fmt::Result {
        write!(
            f,
            "{} {message}: {}",
            self.painter.warning("!"),
            error_chain(error)
        )
    }
}

impl Display for SessionEventView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let painter = self.painter;
        match self.event {
            SessionEvent::Inbound { kind, event, .. } => self.incoming(f, *kind, event),
            SessionEvent::ActivityChanged(activity) => write!(
                f,
                "{} device is {}",
                painter.muted("•"),
                painter.value(activity.to_string())
            ),
            SessionEvent::ControlPublished { trigger, state, .. } => write!(
                f,
                "{} {} {}",
                painter.success(format!("→ {}", TopicKind::Control)),
                painter.value(state.to_string()),
                painter.muted(format!("({trigger})"))
            ),
            SessionEvent::PayloadSent {
                source, command, ..
            } => {
                let body = match command {
                    ConsoleCommand::Frame(frame) => self.frame(frame),
                    ConsoleCommand::Raw(text) => format!("{text:?}"),
                    other => format!("{other:?}"),
                };
                write!(
                    f,
                    "{} {body}",
                    painter.success(format!("→ {}", TopicKind::FromServer))
                )?;
                if *source == OutboundSource::Automation {
                    write!(f, " {}", painter.muted(format!("({source})")))?;
                }
                Ok(())
            }
            SessionEvent::PublishFailed { error, .. } => {
                write!(f, "{} {}", painter.warning("!"), error_chain(error))
            }
            SessionEvent::SubscriptionFailed { topic, error } => self.warning(
                f,
                format!("subscription change for `{topic}` failed"),
                error,
            ),
            SessionEvent::Retargeted { from, to } => write!(
                f,
                "{} target changed from {} to {}",
                painter.muted("•"),
                painter.value(from),
                painter.value(to)
            ),
            SessionEvent::UsageError(error) => write!(f, "{} {error}", painter.warning("!")),
            SessionEvent::Help => {
                write!(f, "{}", painter.heading("Commands:"))?;
                for (usage, description) in HELP_LINES {
                    write!(f, "\n  {:<32} {}", usage, painter.muted(description))?;
                }
                Ok(())
            }
            SessionEvent::Quit => write!(f, "{} ending session", painter.muted("•")),
        }
    }
}

/// Why the relay loop stopped.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
pub(crate) enum StopReason {
    #[strum(to_string = "interrupted")]
    Interrupted,
    #[strum(to_string = "operator quit")]
    Quit,
    #[strum(to_string = "console input closed")]
    ConsoleClosed,
    #[strum(to_string = "broker connection closed")]
    BrokerClosed,
}

/// Renders the closing line.
pub(crate) struct SessionEndView<'a> {
    reason: StopReason,
    painter: &'a Painter,
}

impl<'a> SessionEndView<'a> {
    pub(crate) fn new(reason: StopReason, painter: &'a Painter) -> Self {
        Self { reason, painter }
    }
}

impl Display for SessionEndView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.painter.heading("Session ended:"),
            self.painter.value(self.reason.to_string())
        )
    }
}

fn error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
