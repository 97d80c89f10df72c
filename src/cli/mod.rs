pub(crate) mod codec;
pub(crate) mod command;
pub(crate) mod relay;
pub(crate) mod ui;

pub use self::codec::{DecodeArgs, EncodeArgs};
pub use self::command::{Args, Command, FakeArgs, LogLevel};
pub use self::relay::RunArgs;
