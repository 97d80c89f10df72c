mod codec_view;
mod painter;
mod session_view;
mod table;

pub(crate) use self::codec_view::{DecodedFrameView, EncodedFrameView};
pub(crate) use self::painter::Painter;
pub(crate) use self::session_view::{
    SessionEndView, SessionEventView, SessionReadyView, StopReason,
};
