use std::io;

use anyhow::{Context, Result};
use clap::Args;

use crate::handlers::{Frame, FrameCodec, parse_integer};
use crate::terminal::TerminalClient;

use super::ui::{DecodedFrameView, EncodedFrameView, Painter};

/// Arguments for the `encode` command.
#[derive(Debug, Args)]
pub struct EncodeArgs {
    /// Command byte (e.g. `2`, `0x02`); masked to 8 bits.
    #[arg(allow_hyphen_values = true)]
    command: String,
    /// Subtype byte; masked to 8 bits.
    #[arg(allow_hyphen_values = true)]
    subtype: String,
    /// Payload text, truncated to 128 bytes.
    #[arg(default_value = "")]
    text: String,
}

impl EncodeArgs {
    /// Creates encode arguments directly.
    #[must_use]
    pub fn new(command: impl Into<String>, subtype: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            subtype: subtype.into(),
            text: text.into(),
        }
    }
}

/// Arguments for the `decode` command.
#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Hexadecimal bytes; whitespace is ignored.
    hex: String,
}

impl DecodeArgs {
    /// Creates decode arguments directly.
    #[must_use]
    pub fn new(hex: impl Into<String>) -> Self {
        Self { hex: hex.into() }
    }
}

/// Executes the `encode` command.
pub(crate) fn encode<W>(args: &EncodeArgs, out: &mut W, terminal_client: &dyn TerminalClient) -> Result<()>
where
    W: io::Write,
{
    let command = parse_integer("cmd", &args.command)?;
    let subtype = parse_integer("subtype", &args.subtype)?;
    let frame = Frame::masked(command, subtype, &args.text);

    let painter = Painter::new(terminal_client.stdout_is_terminal());
    writeln!(out, "{}", EncodedFrameView::new(&frame, &painter))?;
    Ok(())
}

/// Executes the `decode` command.
pub(crate) fn decode<W>(args: &DecodeArgs, out: &mut W, terminal_client: &dyn TerminalClient) -> Result<()>
where
    W: io::Write,
{
    let cleaned: String = args.hex.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).with_context(|| format!("`{}` is not valid hex", args.hex))?;
    let frame = FrameCodec::decode(&bytes);

    let painter = Painter::new(terminal_client.stdout_is_terminal());
    writeln!(out, "{}", DecodedFrameView::new(frame.as_ref(), &painter))?;
    Ok(())
}
