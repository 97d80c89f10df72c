use strum_macros::Display;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::broker::{BrokerClient, InboundMessage};
use crate::config::{ConfigUpdate, RelayConfig};
use crate::control::{ControlHandle, ControlState};
use crate::error::{BrokerError, ConsoleCommandError};
use crate::handlers::ConsoleCommand;
use crate::notification::{DeviceActivity, InboundClassifier, InboundEvent, StatusMarkers};
use crate::protocol::{DeviceTopics, TopicKind};

/// What caused a control-topic publish.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum ControlTrigger {
    /// Startup publish of the configured state.
    #[strum(to_string = "startup")]
    Startup,
    /// An explicit `activate` or `deactivate` line.
    #[strum(to_string = "operator")]
    Operator,
    /// The device reported that it reconnected.
    #[strum(to_string = "reconnect")]
    Reconnect,
    /// A new configuration generation changed the target or control state.
    #[strum(to_string = "config")]
    Config,
}

/// Where an outbound payload came from.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum OutboundSource {
    /// Typed on the console.
    #[strum(to_string = "console")]
    Console,
    /// The configuration's `send_message` field.
    #[strum(to_string = "automation")]
    Automation,
}

/// Something the session did or observed, in the order it happened.
#[derive(Debug)]
pub enum SessionEvent {
    /// A message arrived on one of the device topics.
    Inbound {
        topic: String,
        kind: TopicKind,
        event: InboundEvent,
    },
    /// The device reported a new activity state.
    ActivityChanged(DeviceActivity),
    /// The control state was published.
    ControlPublished {
        trigger: ControlTrigger,
        state: ControlState,
        topic: String,
    },
    /// A frame or raw text was published to the outbound topic.
    PayloadSent {
        source: OutboundSource,
        command: ConsoleCommand,
        topic: String,
    },
    /// A publish was rejected. It is not retried.
    PublishFailed { topic: String, error: BrokerError },
    /// A subscription change failed while switching targets.
    SubscriptionFailed { topic: String, error: BrokerError },
    /// The session switched to a new device identifier.
    Retargeted { from: String, to: String },
    /// A console line could not be parsed.
    UsageError(ConsoleCommandError),
    /// The operator asked for the command list.
    Help,
    /// The operator asked to end the session.
    Quit,
}

/// Result of offering an automation message to the session.
#[derive(Debug)]
pub enum AutomationOutcome {
    /// The message was published, or its publish failed and is not retried.
    Sent(SessionEvent),
    /// The device last reported itself inactive; offer it again later.
    Held,
    /// The message is a malformed `frame` line.
    Rejected(ConsoleCommandError),
    /// The message was blank.
    Empty,
}

impl AutomationOutcome {
    /// Returns whether the message should be considered handled.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::Held)
    }
}

/// One relay session: the broker handle, the device topics, and the control
/// state that must converge on the device.
pub struct RelaySession {
    client: Box<dyn BrokerClient>,
    topics: DeviceTopics,
    control: ControlHandle,
    activity: DeviceActivity,
    markers: StatusMarkers,
}

impl RelaySession {
    /// Creates a session for the configured target. Nothing is sent until
    /// [`RelaySession::start`].
    #[must_use]
    pub fn new(
        client: Box<dyn BrokerClient>,
        config: &RelayConfig,
        control: ControlHandle,
        markers: StatusMarkers,
    ) -> Self {
        control.set_state(config.control());
        Self {
            client,
            topics: DeviceTopics::new(config.target()),
            control,
            activity: DeviceActivity::default(),
            markers,
        }
    }

    /// Returns the current device topics.
    #[must_use]
    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Returns the shared control handle.
    #[must_use]
    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    /// Returns the last activity the device reported.
    #[must_use]
    pub fn activity(&self) -> DeviceActivity {
        self.activity
    }

    /// Subscribes to the inbound topics, then publishes the configured
    /// control state once, bypassing the resend throttle.
    ///
    /// # Errors
    ///
    /// Returns an error when a subscription fails. A failed control publish is
    /// reported as an event instead.
    #[instrument(skip(self), level = "info", fields(target = %self.topics))]
    pub async fn start(&mut self) -> Result<Vec<SessionEvent>, BrokerError> {
        self.subscribe_inbound().await?;
        let mut events = Vec::new();
        if let Some(state) = self.control.initial_publish() {
            events.extend(self.publish_control(state, ControlTrigger::Startup).await);
        }
        Ok(events)
    }

    /// Parses and executes one console line.
    #[instrument(skip(self), level = "debug")]
    pub async fn handle_console_line(&mut self, line: &str) -> Vec<SessionEvent> {
        match ConsoleCommand::parse(line) {
            Ok(Some(command)) => self.handle_command(command).await,
            Ok(None) => Vec::new(),
            Err(error) => {
                debug!(error = %error, "rejected console line");
                vec![SessionEvent::UsageError(error)]
            }
        }
    }

    /// Executes one parsed console command.
    pub async fn handle_command(&mut self, command: ConsoleCommand) -> Vec<SessionEvent> {
        match command {
            ConsoleCommand::Control(state) => {
                self.control.record_operator_command(state, Instant::now());
                self.publish_control(state, ControlTrigger::Operator)
                    .await
                    .into_iter()
                    .collect()
            }
            ConsoleCommand::Help => vec![SessionEvent::Help],
            ConsoleCommand::Quit => vec![SessionEvent::Quit],
            command @ (ConsoleCommand::Frame(_) | ConsoleCommand::Raw(_)) => {
                vec![self.publish_outbound(command, OutboundSource::Console).await]
            }
        }
    }

    /// Classifies one inbound message and reacts to status markers.
    ///
    /// Messages for topics other than the current device's are dropped.
    #[instrument(
        skip(self, message),
        level = "debug",
        fields(topic = message.topic(), payload_len = message.payload().len())
    )]
    pub async fn handle_inbound(&mut self, message: InboundMessage) -> Vec<SessionEvent> {
        let Some(kind) = self.topics.kind_of(message.topic()) else {
            debug!("dropping message for a topic outside the current target");
            return Vec::new();
        };

        let event = InboundClassifier::classify(Some(kind), message.payload(), &self.markers);
        let signals = match &event {
            InboundEvent::Text { signals, .. } => Some(*signals),
            InboundEvent::Frame(_) => None,
        };
        let mut events = vec![SessionEvent::Inbound {
            topic: message.topic().to_string(),
            kind,
            event,
        }];

        let Some(signals) = signals else {
            return events;
        };
        if let Some(activity) = signals.activity
            && activity != self.activity
        {
            info!(%activity, "device activity changed");
            self.activity = activity;
            events.push(SessionEvent::ActivityChanged(activity));
        }
        if signals.reconnected {
            info!("device reported reconnection");
            if let Some(state) = self.control.maybe_resend(Instant::now()) {
                events.extend(self.publish_control(state, ControlTrigger::Reconnect).await);
            }
        }
        events
    }

    /// Applies a new configuration generation without reconnecting.
    ///
    /// A changed target moves the inbound subscriptions to the new topics.
    /// Either change then publishes the new control state, when set.
    #[instrument(
        skip(self, update),
        level = "info",
        fields(
            target = update.snapshot().target(),
            control = %update.snapshot().control(),
        )
    )]
    pub async fn apply_update(&mut self, update: &ConfigUpdate) -> Vec<SessionEvent> {
        let snapshot = update.snapshot();
        let mut events = Vec::new();

        if update.target_changed() {
            let topics = DeviceTopics::new(snapshot.target());
            for topic in self.topics.inbound() {
                if let Err(error) = self.client.unsubscribe(topic).await {
                    warn!(topic, error = %error, "failed to unsubscribe old topic");
                    events.push(SessionEvent::SubscriptionFailed {
                        topic: topic.to_string(),
                        error,
                    });
                }
            }
            let from = self.topics.device_id().to_string();
            self.topics = topics;
            self.activity = DeviceActivity::Unknown;
            info!(from = %from, to = self.topics.device_id(), "switched target");
            events.push(SessionEvent::Retargeted {
                from,
                to: self.topics.device_id().to_string(),
            });
            for topic in self.topics.inbound() {
                if let Err(error) = self.client.subscribe(topic).await {
                    warn!(topic, error = %error, "failed to subscribe new topic");
                    events.push(SessionEvent::SubscriptionFailed {
                        topic: topic.to_string(),
                        error,
                    });
                }
            }
        }

        self.control.set_state(snapshot.control());
        if let Some(state) = self.control.initial_publish() {
            events.extend(self.publish_control(state, ControlTrigger::Config).await);
        }
        events
    }

    /// Offers the configuration's automation message.
    #[instrument(skip(self), level = "debug", fields(activity = %self.activity))]
    pub async fn send_automation(&mut self, message: &str) -> AutomationOutcome {
        if self.activity == DeviceActivity::Inactive {
            debug!("holding automation message while the device is inactive");
            return AutomationOutcome::Held;
        }
        match ConsoleCommand::parse_automation(message) {
            Ok(Some(command)) => AutomationOutcome::Sent(
                self.publish_outbound(command, OutboundSource::Automation)
                    .await,
            ),
            Ok(None) => AutomationOutcome::Empty,
            Err(error) => {
                warn!(error = %error, "rejected automation message");
                AutomationOutcome::Rejected(error)
            }
        }
    }

    /// Disconnects from the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the disconnect request fails.
    pub async fn close(self) -> Result<(), BrokerError> {
        self.client.close().await
    }

    async fn subscribe_inbound(&self) -> Result<(), BrokerError> {
        for topic in self.topics.inbound() {
            self.client.subscribe(topic).await?;
            debug!(topic, "subscribed");
        }
        Ok(())
    }

    async fn publish_control(
        &self,
        state: ControlState,
        trigger: ControlTrigger,
    ) -> Option<SessionEvent> {
        let payload = state.payload()?;
        let topic = self.topics.topic(TopicKind::Control).to_string();
        Some(match self.client.publish(&topic, payload.as_bytes()).await {
            Ok(()) => {
                info!(%state, %trigger, topic = %topic, "published control state");
                SessionEvent::ControlPublished {
                    trigger,
                    state,
                    topic,
                }
            }
            Err(error) => publish_failed(topic, error),
        })
    }

    async fn publish_outbound(
        &self,
        command: ConsoleCommand,
        source: OutboundSource,
    ) -> SessionEvent {
        let topic = self.topics.topic(TopicKind::FromServer).to_string();
        let payload = command.outbound_payload().unwrap_or_default();
        match self.client.publish(&topic, &payload).await {
            Ok(()) => {
                info!(%source, topic = %topic, payload_len = payload.len(), "published payload");
                SessionEvent::PayloadSent {
                    source,
                    command,
                    topic,
                }
            }
            Err(error) => publish_failed(topic, error),
        }
    }
}

fn publish_failed(topic: String, error: BrokerError) -> SessionEvent {
    warn!(topic = %topic, error = %error, "publish failed");
    SessionEvent::PublishFailed { topic, error }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("topics", &self.topics)
            .field("control", &self.control.state())
            .field("activity", &self.activity)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}
