use std::fmt;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// The four per-device topics, named by their leaf segment.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum TopicKind {
    /// Activation commands (`activate` / `deactivate`).
    #[strum(to_string = "control")]
    Control,
    /// Operator to device payloads.
    #[strum(to_string = "from_server")]
    FromServer,
    /// Device to operator payloads.
    #[strum(to_string = "to_server")]
    ToServer,
    /// Device health and connectivity reports.
    #[strum(to_string = "status")]
    Status,
}

impl TopicKind {
    /// Returns whether the relay subscribes to this topic.
    #[must_use]
    pub fn is_inbound(self) -> bool {
        matches!(self, Self::ToServer | Self::Status)
    }

    /// Resolves a topic leaf such as `status` to its kind.
    #[must_use]
    pub fn from_leaf(leaf: &str) -> Option<Self> {
        Self::iter().find(|kind| kind.to_string() == leaf)
    }
}

/// Topic names derived from a single device identifier.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceTopics {
    device_id: String,
    control: String,
    from_server: String,
    to_server: String,
    status: String,
}

impl DeviceTopics {
    /// Derives all topics for `device_id`.
    ///
    /// ```
    /// use mqrelay::{DeviceTopics, TopicKind};
    ///
    /// let topics = DeviceTopics::new("AA:BB:CC:DD:EE:FF");
    /// assert_eq!("AA:BB:CC:DD:EE:FF/control", topics.topic(TopicKind::Control));
    /// assert_eq!("AA:BB:CC:DD:EE:FF/status", topics.topic(TopicKind::Status));
    /// ```
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        let derive = |kind: TopicKind| format!("{device_id}/{kind}");
        Self {
            control: derive(TopicKind::Control),
            from_server: derive(TopicKind::FromServer),
            to_server: derive(TopicKind::ToServer),
            status: derive(TopicKind::Status),
            device_id,
        }
    }

    /// Returns the device identifier the topics were derived from.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the full topic name for one kind.
    #[must_use]
    pub fn topic(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::Control => &self.control,
            TopicKind::FromServer => &self.from_server,
            TopicKind::ToServer => &self.to_server,
            TopicKind::Status => &self.status,
        }
    }

    /// Returns the topics the relay subscribes to, in subscription order.
    pub fn inbound(&self) -> impl Iterator<Item = &str> {
        TopicKind::iter()
            .filter(|kind| kind.is_inbound())
            .map(|kind| self.topic(kind))
    }

    /// Maps a full topic name back to its kind, if it belongs to this device.
    #[must_use]
    pub fn kind_of(&self, topic: &str) -> Option<TopicKind> {
        TopicKind::iter().find(|kind| self.topic(*kind) == topic)
    }
}

impl fmt::Display for DeviceTopics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.device_id)
    }
}
