mod console_command;
mod frame_codec;

pub use self::console_command::ConsoleCommand;
pub(crate) use self::console_command::parse_integer;
pub use self::frame_codec::{FRAME_END, FRAME_START, Frame, FrameCodec, MAX_FRAME_PAYLOAD_LEN};
