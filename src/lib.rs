mod app;
mod broker;
mod cli;
mod config;
mod control;
mod error;
mod handlers;
mod notification;
mod protocol;
mod session;
mod telemetry;
mod terminal;
mod utils;

pub use app::{
    fake_broker_connector, real_broker_connector, run, run_with_clients,
    run_with_clients_and_log_level, run_with_log_level,
};
pub use broker::{
    BrokerClient, BrokerConnection, BrokerConnector, BrokerSettings, FakeBrokerConfig,
    InboundFixture, InboundFixtures, InboundMessage, PublishLog, PublishedMessage, QosLevel,
};
pub use cli::{Args, Command, DecodeArgs, EncodeArgs, FakeArgs, LogLevel, RunArgs};
pub use config::{
    ConfigSource, ConfigUpdate, ConfigWatcher, DEFAULT_CONFIG_PATH, JsonFileConfig, RelayConfig,
};
pub use control::{
    ControlHandle, ControlReconciler, ControlState, DEFAULT_MIN_RESEND_INTERVAL, ResendThrottle,
};
pub use error::{
    BrokerError, ConfigError, ConsoleCommandError, FixtureError, InvalidControlState, RelayError,
};
pub use handlers::{
    ConsoleCommand, FRAME_END, FRAME_START, Frame, FrameCodec, MAX_FRAME_PAYLOAD_LEN,
};
pub use notification::{
    DEFAULT_RECONNECT_MARKERS, DeviceActivity, InboundClassifier, InboundEvent, StatusMarkers,
    StatusSignals,
};
pub use protocol::{DeviceTopics, TopicKind};
pub use session::{AutomationOutcome, ControlTrigger, OutboundSource, RelaySession, SessionEvent};
pub use terminal::{ConsoleLines, Interrupt, TerminalClient, scripted_console_lines};
