use std::fmt::{self, Display, Formatter};

use crate::handlers::Frame;
use crate::utils::format_hex;

use super::painter::Painter;
use super::table::Table;

/// Renders the wire bytes of an encoded frame.
pub(crate) struct EncodedFrameView<'a> {
    frame: &'a Frame,
    painter: &'a Painter,
}

impl<'a> EncodedFrameView<'a> {
    pub(crate) fn new(frame: &'a Frame, painter: &'a Painter) -> Self {
        Self { frame, painter }
    }
}

impl Display for EncodedFrameView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.painter.value(format_hex(&self.frame.to_bytes())))
    }
}

/// Renders the outcome of decoding bytes as a frame.
pub(crate) struct DecodedFrameView<'a> {
    frame: Option<&'a Frame>,
    painter: &'a Painter,
}

impl<'a> DecodedFrameView<'a> {
    pub(crate) fn new(frame: Option<&'a Frame>, painter: &'a Painter) -> Self {
        Self { frame, painter }
    }
}

impl Display for DecodedFrameView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Some(frame) = self.frame else {
            return write!(f, "{}", self.painter.warning("not a frame"));
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("cmd", self.painter.value(format!("0x{:02X}", frame.command()))),
                ("subtype", self.painter.value(format!("0x{:02X}", frame.subtype()))),
                ("payload_len", frame.payload().len().to_string()),
                ("payload", format_hex(frame.payload())),
                ("text", format!("{:?}", frame.text())),
            ],
        );
        write!(f, "{}", self.painter.heading("Frame:"))?;
        write!(f, "\n{table}")
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn encoded_frame_is_hex() {
        let painter = Painter::new(false);
        let frame = Frame::new(2, 5, "hello");
        assert_snapshot!(
            EncodedFrameView::new(&frame, &painter).to_string(),
            @"63 02 05 68 65 6C 6C 6F 76"
        );
    }

    #[test]
    fn non_frame_is_reported() {
        let painter = Painter::new(false);
        assert_snapshot!(DecodedFrameView::new(None, &painter).to_string(), @"not a frame");
    }

    #[test]
    fn decoded_frame_lists_fields() {
        let painter = Painter::new(false);
        let frame = Frame::new(0x10, 0xFF, "");
        let rendered = DecodedFrameView::new(Some(&frame), &painter).to_string();
        assert!(rendered.starts_with("Frame:"));
        assert!(rendered.contains("│ cmd         │ 0x10    │"));
        assert!(rendered.contains("│ payload     │ <empty> │"));
        assert!(rendered.contains(r#"│ text        │ ""      │"#));
    }
}
