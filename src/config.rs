use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::control::ControlState;
use crate::error::ConfigError;

/// Configuration file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "target.json";

/// One validated snapshot of the relay configuration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RelayConfig {
    target: String,
    control: ControlState,
    send_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    control: Option<ControlState>,
    #[serde(default)]
    send_message: Option<String>,
}

impl RelayConfig {
    /// Creates a snapshot directly, without reading a file.
    ///
    /// ```
    /// use mqrelay::{ControlState, RelayConfig};
    ///
    /// let config = RelayConfig::new("AA:BB:CC:DD:EE:FF", ControlState::Activate);
    /// assert_eq!("AA:BB:CC:DD:EE:FF", config.target());
    /// ```
    #[must_use]
    pub fn new(target: impl Into<String>, control: ControlState) -> Self {
        Self {
            target: target.into(),
            control,
            send_message: None,
        }
    }

    /// Sets the automation message.
    #[must_use]
    pub fn with_send_message(mut self, message: impl Into<String>) -> Self {
        self.send_message = non_empty(message.into());
        self
    }

    /// Parses and validates JSON configuration text read from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the text is not valid JSON, `control` is not a
    /// known value, or `target` is missing or blank.
    pub fn from_json(path: &Path, raw: &str) -> Result<Self, ConfigError> {
        let parsed: RawConfig =
            serde_json::from_str(raw).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let target = parsed
            .target
            .as_deref()
            .map(str::trim)
            .filter(|target| !target.is_empty())
            .ok_or_else(|| ConfigError::EmptyTarget {
                path: path.to_path_buf(),
            })?
            .to_string();

        Ok(Self {
            target,
            control: parsed.control.unwrap_or_default(),
            send_message: parsed.send_message.and_then(non_empty),
        })
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the configured control state.
    #[must_use]
    pub fn control(&self) -> ControlState {
        self.control
    }

    /// Returns the trimmed automation message, if any.
    #[must_use]
    pub fn send_message(&self) -> Option<&str> {
        self.send_message.as_deref()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// A place the relay configuration is read from.
pub trait ConfigSource: Send + Sync + fmt::Debug {
    /// Reads and validates the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration cannot be read or is invalid.
    fn load(&self) -> Result<RelayConfig, ConfigError>;

    /// Human-readable location of the source.
    fn describe(&self) -> String;
}

/// Configuration stored in a JSON file on disk.
#[derive(Debug, Clone)]
pub struct JsonFileConfig {
    path: PathBuf,
}

impl JsonFileConfig {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the configured file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for JsonFileConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

impl ConfigSource for JsonFileConfig {
    #[instrument(skip(self), level = "trace", fields(path = %self.path.display()))]
    fn load(&self) -> Result<RelayConfig, ConfigError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                ConfigError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        RelayConfig::from_json(&self.path, &raw)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A configuration generation that differs from the previous one in a way
/// that affects the session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConfigUpdate {
    snapshot: RelayConfig,
    target_changed: bool,
    control_changed: bool,
}

impl ConfigUpdate {
    /// Describes a new generation and which of its fields changed.
    #[must_use]
    pub fn new(snapshot: RelayConfig, target_changed: bool, control_changed: bool) -> Self {
        Self {
            snapshot,
            target_changed,
            control_changed,
        }
    }

    /// Returns the new snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &RelayConfig {
        &self.snapshot
    }

    /// Returns whether the device identifier changed.
    #[must_use]
    pub fn target_changed(&self) -> bool {
        self.target_changed
    }

    /// Returns whether the control state changed.
    #[must_use]
    pub fn control_changed(&self) -> bool {
        self.control_changed
    }
}

/// Polls a [`ConfigSource`] for new generations and pending automation
/// messages.
#[derive(Debug)]
pub struct ConfigWatcher {
    source: Box<dyn ConfigSource>,
    current: RelayConfig,
    last_message: Option<String>,
}

impl ConfigWatcher {
    /// Starts watching from an already-loaded snapshot.
    ///
    /// The snapshot's automation message counts as not yet sent.
    #[must_use]
    pub fn new(source: Box<dyn ConfigSource>, initial: RelayConfig) -> Self {
        Self {
            source,
            current: initial,
            last_message: None,
        }
    }

    /// Returns the latest snapshot.
    #[must_use]
    pub fn current(&self) -> &RelayConfig {
        &self.current
    }

    /// Returns the watched source.
    #[must_use]
    pub fn source(&self) -> &dyn ConfigSource {
        self.source.as_ref()
    }

    /// Re-reads the source. Read failures are skipped until the next poll.
    #[instrument(skip(self), level = "trace")]
    pub fn poll(&mut self) -> Option<ConfigUpdate> {
        let snapshot = match self.source.load() {
            Ok(snapshot) => snapshot,
            Err(error) => {
                debug!(error = %error, "skipping configuration poll");
                return None;
            }
        };

        let target_changed = snapshot.target != self.current.target;
        let control_changed = snapshot.control != self.current.control;
        self.current = snapshot;

        (target_changed || control_changed).then(|| ConfigUpdate {
            snapshot: self.current.clone(),
            target_changed,
            control_changed,
        })
    }

    /// Returns the automation message when it differs from the last one handled.
    #[must_use]
    pub fn pending_message(&self) -> Option<&str> {
        let message = self.current.send_message()?;
        (self.last_message.as_deref() != Some(message)).then_some(message)
    }

    /// Records that `message` was sent or rejected and must not be retried.
    pub fn mark_message_handled(&mut self, message: &str) {
        self.last_message = Some(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct MemorySource {
        raw: Arc<Mutex<String>>,
    }

    impl MemorySource {
        fn set(&self, raw: &str) {
            *self.raw.lock().expect("memory source lock") = raw.to_string();
        }
    }

    impl ConfigSource for MemorySource {
        fn load(&self) -> Result<RelayConfig, ConfigError> {
            let raw = self.raw.lock().expect("memory source lock").clone();
            RelayConfig::from_json(Path::new("memory.json"), &raw)
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    fn parse(raw: &str) -> Result<RelayConfig, ConfigError> {
        RelayConfig::from_json(Path::new("target.json"), raw)
    }

    #[test]
    fn parses_full_configuration() {
        let config = parse(
            r#"{"target":" AA:BB:CC:DD:EE:FF ","control":"Activate","send_message":" frame 2 5 hi "}"#,
        )
        .expect("valid configuration");

        assert_eq!("AA:BB:CC:DD:EE:FF", config.target());
        assert_eq!(ControlState::Activate, config.control());
        assert_eq!(Some("frame 2 5 hi"), config.send_message());
    }

    #[test]
    fn control_and_message_are_optional() {
        let config = parse(r#"{"target":"dev","control":null,"send_message":"  "}"#)
            .expect("valid configuration");
        assert_eq!(RelayConfig::new("dev", ControlState::Unset), config);
    }

    #[rstest]
    #[case::missing(r#"{"control":"activate"}"#)]
    #[case::blank(r#"{"target":"   "}"#)]
    #[case::null(r#"{"target":null}"#)]
    fn rejects_missing_target(#[case] raw: &str) {
        assert_matches!(parse(raw), Err(ConfigError::EmptyTarget { .. }));
    }

    #[rstest]
    #[case::bad_control(r#"{"target":"dev","control":"on"}"#)]
    #[case::not_json("target=dev")]
    #[case::wrong_type(r#"{"target":42}"#)]
    fn rejects_malformed_documents(#[case] raw: &str) {
        assert_matches!(parse(raw), Err(ConfigError::Json { .. }));
    }

    #[test]
    fn missing_file_reports_example() {
        let source = JsonFileConfig::new("/nonexistent/mqrelay/target.json");
        let error = source.load().expect_err("missing file should fail");
        assert_matches!(error, ConfigError::NotFound { .. });
        assert!(error.to_string().contains(r#""target""#));
    }

    #[test]
    fn poll_reports_target_and_control_changes() {
        let source = MemorySource::default();
        source.set(r#"{"target":"dev","control":"activate"}"#);
        let initial = source.load().expect("initial configuration");
        let mut watcher = ConfigWatcher::new(Box::new(source.clone()), initial);

        assert_eq!(None, watcher.poll());

        source.set(r#"{"target":"dev","control":"deactivate"}"#);
        let update = watcher.poll().expect("control change should be reported");
        assert!(update.control_changed());
        assert!(!update.target_changed());
        assert_eq!(ControlState::Deactivate, update.snapshot().control());

        source.set(r#"{"target":"other","control":"deactivate"}"#);
        let update = watcher.poll().expect("target change should be reported");
        assert!(update.target_changed());
        assert!(!update.control_changed());
    }

    #[test]
    fn poll_skips_unreadable_generations() {
        let source = MemorySource::default();
        source.set(r#"{"target":"dev"}"#);
        let initial = source.load().expect("initial configuration");
        let mut watcher = ConfigWatcher::new(Box::new(source.clone()), initial);

        source.set("{ truncated");
        assert_eq!(None, watcher.poll());
        assert_eq!("dev", watcher.current().target());
    }

    #[test]
    fn pending_message_is_reported_once_per_distinct_value() {
        let source = MemorySource::default();
        source.set(r#"{"target":"dev","send_message":"hello"}"#);
        let initial = source.load().expect("initial configuration");
        let mut watcher = ConfigWatcher::new(Box::new(source.clone()), initial);

        assert_eq!(Some("hello"), watcher.pending_message());
        watcher.mark_message_handled("hello");
        assert_eq!(None, watcher.pending_message());

        source.set(r#"{"target":"dev","send_message":"again"}"#);
        assert_eq!(None, watcher.poll());
        assert_eq!(Some("again"), watcher.pending_message());
    }
}
