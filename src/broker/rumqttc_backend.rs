use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::{BrokerClient, BrokerConnection, BrokerConnector, INBOUND_CHANNEL_CAPACITY};
use super::model::{BrokerSettings, InboundMessage};
use crate::error::BrokerError;

const REQUEST_CHANNEL_CAPACITY: usize = 32;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const CLOSE_GRACE: Duration = Duration::from_millis(500);

type SubscriptionSet = Arc<Mutex<BTreeSet<String>>>;

#[derive(Debug)]
pub(crate) struct RumqttcConnector {
    settings: BrokerSettings,
}

impl RumqttcConnector {
    pub(crate) fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }

    fn options(&self) -> MqttOptions {
        let settings = &self.settings;
        let mut options =
            MqttOptions::new(settings.client_id(), settings.host(), settings.port());
        options.set_keep_alive(settings.keep_alive());
        if let Some(username) = settings.username() {
            options.set_credentials(username, settings.password().unwrap_or_default());
        }
        options
    }
}

#[async_trait]
impl BrokerConnector for RumqttcConnector {
    fn describe(&self) -> String {
        format!("mqtt://{}:{}", self.settings.host(), self.settings.port())
    }

    #[instrument(
        skip(self),
        level = "info",
        fields(host = %self.settings.host(), port = self.settings.port())
    )]
    async fn connect(self: Box<Self>) -> Result<BrokerConnection, BrokerError> {
        let options = self.options();
        let qos = QoS::from(self.settings.qos());
        let connect_timeout = self.settings.connect_timeout();

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        timeout(connect_timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_elapsed| BrokerError::ConnectTimeout {
                timeout: connect_timeout,
            })??;
        info!("connected to broker");

        let subscriptions = SubscriptionSet::default();
        let cancel = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let task = tokio::spawn(drive_event_loop(
            event_loop,
            EventLoopContext {
                client: client.clone(),
                qos,
                subscriptions: Arc::clone(&subscriptions),
                sender,
                cancel: cancel.clone(),
            },
        ));

        let client = RumqttcClient {
            client,
            qos,
            subscriptions,
            cancel,
            task,
        };
        Ok(BrokerConnection::new(Box::new(client), receiver))
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), BrokerError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            debug!(code = ?ack.code, "broker accepted connection");
            return Ok(());
        }
    }
}

struct EventLoopContext {
    client: AsyncClient,
    qos: QoS,
    subscriptions: SubscriptionSet,
    sender: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
}

/// Polls the rumqttc event loop until cancelled, forwarding publishes and
/// restoring subscriptions after the client reconnects on its own.
async fn drive_event_loop(mut event_loop: EventLoop, context: EventLoopContext) {
    loop {
        let event = tokio::select! {
            () = context.cancel.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                if context.sender.send(message).await.is_err() {
                    debug!("inbound receiver dropped; stopping event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("broker connection re-established");
                resubscribe(&context);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(error = %error, "broker connection lost; retrying");
                tokio::select! {
                    () = context.cancel.cancelled() => break,
                    () = sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

fn resubscribe(context: &EventLoopContext) {
    for topic in lock(&context.subscriptions).iter() {
        if let Err(error) = context.client.try_subscribe(topic.as_str(), context.qos) {
            warn!(topic = %topic, error = %error, "failed to restore subscription");
        }
    }
}

fn lock(subscriptions: &SubscriptionSet) -> MutexGuard<'_, BTreeSet<String>> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct RumqttcClient {
    client: AsyncClient,
    qos: QoS,
    subscriptions: SubscriptionSet,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[async_trait]
impl BrokerClient for RumqttcClient {
    #[instrument(skip(self), level = "debug")]
    async fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        lock(&self.subscriptions).insert(topic.to_string());
        self.client.subscribe(topic, self.qos).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        lock(&self.subscriptions).remove(topic);
        self.client.unsubscribe(topic).await?;
        Ok(())
    }

    #[instrument(skip(self, payload), level = "debug", fields(payload_len = payload.len()))]
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.client
            .publish(topic, self.qos, false, payload.to_vec())
            .await
            .map_err(|source| BrokerError::Publish {
                topic: topic.to_string(),
                source: Box::new(BrokerError::Client(source)),
            })
    }

    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        let Self {
            client,
            cancel,
            mut task,
            ..
        } = *self;

        let disconnected = client.disconnect().await;
        if timeout(CLOSE_GRACE, &mut task).await.is_err() {
            debug!("event loop did not stop after disconnect; cancelling");
            cancel.cancel();
            if let Err(error) = task.await {
                debug!(error = %error, "event loop task ended abnormally");
            }
        }
        disconnected.map_err(BrokerError::from)
    }
}
