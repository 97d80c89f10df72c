use strum_macros::Display;
use tracing::instrument;

use crate::handlers::{Frame, FrameCodec};
use crate::protocol::TopicKind;
use crate::utils::decode_text_lossy;

/// Reconnection phrases the device firmware is known to publish on its status topic.
pub const DEFAULT_RECONNECT_MARKERS: [&str; 3] = [
    "mqtt reconnected",
    "mqtt yeniden bağlandı",
    "yeniden baglandi",
];

const ACTIVE_MARKER: &str = "esp aktif";
const INACTIVE_MARKER: &str = "esp pasif";

/// Last activity the device reported on its status topic.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display)]
pub enum DeviceActivity {
    /// No activity report seen yet.
    #[default]
    #[strum(to_string = "unknown")]
    Unknown,
    /// The device reported itself active.
    #[strum(to_string = "active")]
    Active,
    /// The device reported itself inactive.
    #[strum(to_string = "inactive")]
    Inactive,
}

/// Case-insensitive phrases recognised in status-topic text.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StatusMarkers {
    reconnect: Vec<String>,
}

impl StatusMarkers {
    /// Creates markers from a custom set of reconnection phrases.
    ///
    /// ```
    /// use mqrelay::StatusMarkers;
    ///
    /// let markers = StatusMarkers::new(["Link Restored"]);
    /// assert!(markers.is_reconnect("link restored at 10:02"));
    /// assert!(!markers.is_reconnect("mqtt reconnected"));
    /// ```
    #[must_use]
    pub fn new<I, S>(reconnect: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let reconnect = reconnect
            .into_iter()
            .map(|marker| marker.as_ref().trim().to_lowercase())
            .filter(|marker| !marker.is_empty())
            .collect();
        Self { reconnect }
    }

    /// Returns the normalised reconnection phrases.
    #[must_use]
    pub fn reconnect_markers(&self) -> &[String] {
        &self.reconnect
    }

    /// Returns whether `text` contains any reconnection phrase.
    #[must_use]
    pub fn is_reconnect(&self, text: &str) -> bool {
        let normalised = normalise(text);
        self.reconnect
            .iter()
            .any(|marker| normalised.contains(marker.as_str()))
    }

    /// Returns the activity reported by `text`, if any.
    #[must_use]
    pub fn activity(&self, text: &str) -> Option<DeviceActivity> {
        let normalised = normalise(text);
        if normalised.contains(ACTIVE_MARKER) {
            Some(DeviceActivity::Active)
        } else if normalised.contains(INACTIVE_MARKER) {
            Some(DeviceActivity::Inactive)
        } else {
            None
        }
    }
}

impl Default for StatusMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_MARKERS)
    }
}

/// Status signals extracted from one text message.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct StatusSignals {
    /// The device announced that its broker connection came back.
    pub reconnected: bool,
    /// The device announced a new activity state.
    pub activity: Option<DeviceActivity>,
}

/// Typed view of one inbound broker message.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum InboundEvent {
    /// The payload decoded as a device frame.
    Frame(Frame),
    /// The payload was not a frame and is shown as text.
    Text {
        /// Payload decoded as UTF-8 with invalid sequences dropped.
        text: String,
        /// Markers found when the message arrived on the status topic.
        signals: StatusSignals,
    },
}

/// Classifies inbound payloads.
pub struct InboundClassifier;

impl InboundClassifier {
    /// Decodes a payload as a frame, falling back to text.
    ///
    /// Status markers are only looked for in text that arrived on the status
    /// topic.
    ///
    /// ```
    /// use mqrelay::{InboundClassifier, InboundEvent, StatusMarkers, TopicKind};
    ///
    /// let markers = StatusMarkers::default();
    /// let event = InboundClassifier::classify(Some(TopicKind::Status), b"MQTT Reconnected", &markers);
    /// assert!(matches!(event, InboundEvent::Text { signals, .. } if signals.reconnected));
    /// ```
    #[must_use]
    #[instrument(skip(payload, markers), level = "trace", fields(payload_len = payload.len()))]
    pub fn classify(
        topic: Option<TopicKind>,
        payload: &[u8],
        markers: &StatusMarkers,
    ) -> InboundEvent {
        if let Some(frame) = FrameCodec::decode(payload) {
            return InboundEvent::Frame(frame);
        }

        let text = decode_text_lossy(payload);
        let signals = if topic == Some(TopicKind::Status) {
            StatusSignals {
                reconnected: markers.is_reconnect(&text),
                activity: markers.activity(&text),
            }
        } else {
            StatusSignals::default()
        };
        InboundEvent::Text { text, signals }
    }
}

fn normalise(text: &str) -> String {
    text.trim().to_lowercase()
}
