use tracing::instrument;

use crate::control::ControlState;
use crate::error::ConsoleCommandError;

use super::Frame;

const FRAME_KEYWORD: &str = "frame";
const FRAME_HEADER_FIELDS: usize = 3;

/// How the `frame` keyword is recognised.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum KeywordMatch {
    /// Console lines: the keyword must be lowercase.
    Exact,
    /// Automation messages: any ASCII case.
    IgnoreCase,
}

impl KeywordMatch {
    fn matches(self, word: &str) -> bool {
        match self {
            Self::Exact => word == FRAME_KEYWORD,
            Self::IgnoreCase => word.eq_ignore_ascii_case(FRAME_KEYWORD),
        }
    }
}

/// One parsed operator input line.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConsoleCommand {
    /// `activate` or `deactivate`, published to the control topic.
    Control(ControlState),
    /// `frame <cmd> <subtype> <data...>`, encoded and sent to the outbound topic.
    Frame(Frame),
    /// Any other text, sent verbatim to the outbound topic.
    Raw(String),
    /// `help`: print the command list.
    Help,
    /// `quit` or `exit`: end the session.
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line. Blank lines yield `Ok(None)`.
    ///
    /// ```
    /// use mqrelay::{ConsoleCommand, ControlState};
    ///
    /// let command = ConsoleCommand::parse("activate")?;
    /// assert_eq!(Some(ConsoleCommand::Control(ControlState::Activate)), command);
    ///
    /// let command = ConsoleCommand::parse("frame 0x02 5 hello world")?;
    /// assert!(matches!(command, Some(ConsoleCommand::Frame(_))));
    /// # Ok::<(), mqrelay::ConsoleCommandError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when a `frame` line is missing fields or its header
    /// fields are not integers.
    #[instrument(level = "trace", ret)]
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleCommandError> {
        let line = line.trim();
        match line {
            "" => Ok(None),
            "activate" => Ok(Some(Self::Control(ControlState::Activate))),
            "deactivate" => Ok(Some(Self::Control(ControlState::Deactivate))),
            "help" => Ok(Some(Self::Help)),
            "quit" | "exit" => Ok(Some(Self::Quit)),
            _ => Self::parse_payload(line, KeywordMatch::Exact),
        }
    }

    /// Parses an automation message, which only knows frames and raw text.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed `frame` lines.
    pub fn parse_automation(message: &str) -> Result<Option<Self>, ConsoleCommandError> {
        let message = message.trim();
        if message.is_empty() {
            return Ok(None);
        }
        Self::parse_payload(message, KeywordMatch::IgnoreCase)
    }

    /// Returns the wire payload for outbound-topic commands.
    #[must_use]
    pub fn outbound_payload(&self) -> Option<Vec<u8>> {
        match self {
            Self::Frame(frame) => Some(frame.to_bytes()),
            Self::Raw(text) => Some(text.as_bytes().to_vec()),
            Self::Control(_) | Self::Help | Self::Quit => None,
        }
    }

    fn parse_payload(
        line: &str,
        keyword: KeywordMatch,
    ) -> Result<Option<Self>, ConsoleCommandError> {
        let (fields, data) = split_frame_fields(line);
        let is_frame = fields.first().is_some_and(|word| keyword.matches(word));
        if !is_frame {
            return Ok(Some(Self::Raw(line.to_string())));
        }

        let (Some(data), [_, command, subtype]) = (data, fields.as_slice()) else {
            return Err(ConsoleCommandError::FrameUsage);
        };
        let command = parse_integer("cmd", command)?;
        let subtype = parse_integer("subtype", subtype)?;
        Ok(Some(Self::Frame(Frame::masked(command, subtype, data))))
    }
}

/// Splits `frame <cmd> <subtype> <data...>` into three leading fields and the
/// untouched remainder.
fn split_frame_fields(line: &str) -> (Vec<&str>, Option<&str>) {
    let mut fields = Vec::with_capacity(FRAME_HEADER_FIELDS);
    let mut rest = line.trim_start();
    while fields.len() < FRAME_HEADER_FIELDS && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    let data = (!rest.is_empty()).then_some(rest);
    (fields, data)
}

/// Parses an integer literal with an optional sign, `0x`/`0o`/`0b` prefix and
/// `_` digit separators. Decimal literals may not have leading zeros.
pub(crate) fn parse_integer(field: &'static str, raw: &str) -> Result<i64, ConsoleCommandError> {
    let invalid = || ConsoleCommandError::NonNumericField {
        field,
        value: raw.to_string(),
    };

    let (negative, unsigned) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let lowered = unsigned.to_ascii_lowercase();
    let (radix, digits) = if let Some(digits) = lowered.strip_prefix("0x") {
        (16, digits.strip_prefix('_').unwrap_or(digits))
    } else if let Some(digits) = lowered.strip_prefix("0o") {
        (8, digits.strip_prefix('_').unwrap_or(digits))
    } else if let Some(digits) = lowered.strip_prefix("0b") {
        (2, digits.strip_prefix('_').unwrap_or(digits))
    } else {
        (10, lowered.as_str())
    };

    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let has_leading_zero = cleaned.len() > 1 && cleaned.starts_with('0');
    if radix == 10 && has_leading_zero && cleaned.bytes().any(|digit| digit != b'0') {
        return Err(invalid());
    }

    let magnitude = i64::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    Ok(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", None)]
    #[case("   ", None)]
    #[case("activate", Some(ConsoleCommand::Control(ControlState::Activate)))]
    #[case(" deactivate ", Some(ConsoleCommand::Control(ControlState::Deactivate)))]
    #[case("help", Some(ConsoleCommand::Help))]
    #[case("exit", Some(ConsoleCommand::Quit))]
    #[case("Activate", Some(ConsoleCommand::Raw("Activate".into())))]
    #[case("led on  now", Some(ConsoleCommand::Raw("led on  now".into())))]
    #[case("FRAME 1 2 x", Some(ConsoleCommand::Raw("FRAME 1 2 x".into())))]
    #[case("Frame 1", Some(ConsoleCommand::Raw("Frame 1".into())))]
    fn parse_recognises_keywords_and_raw_text(
        #[case] line: &str,
        #[case] expected: Option<ConsoleCommand>,
    ) {
        assert_eq!(Ok(expected), ConsoleCommand::parse(line));
    }

    #[test]
    fn frame_command_encodes_expected_bytes() {
        let command = ConsoleCommand::parse("frame 2 5 hello")
            .expect("valid frame line")
            .expect("non-empty line");
        assert_eq!(
            Some(vec![0x63, 0x02, 0x05, b'h', b'e', b'l', b'l', b'o', 0x76]),
            command.outbound_payload()
        );
    }

    #[test]
    fn frame_data_keeps_inner_spaces() {
        let command = ConsoleCommand::parse("frame 1 1 hello   big world")
            .expect("valid frame line")
            .expect("non-empty line");
        assert_matches!(command, ConsoleCommand::Frame(frame) if frame.text() == "hello   big world");
    }

    #[rstest]
    #[case("frame 0x02 0x05 x", 0x02, 0x05)]
    #[case("frame 2 5 x", 0x02, 0x05)]
    #[case("frame 0X1_0 0b101 x", 0x10, 0x05)]
    #[case("frame 258 -1 x", 0x02, 0xFF)]
    #[case("frame 0o17 +3 x", 0x0F, 0x03)]
    fn frame_header_accepts_integer_literals(
        #[case] line: &str,
        #[case] command: u8,
        #[case] subtype: u8,
    ) {
        let parsed = ConsoleCommand::parse(line)
            .expect("valid frame line")
            .expect("non-empty line");
        assert_matches!(
            parsed,
            ConsoleCommand::Frame(frame) if frame.command() == command && frame.subtype() == subtype
        );
    }

    #[rstest]
    #[case("frame")]
    #[case("frame 1")]
    #[case("frame 1 2")]
    #[case("frame 1 2   ")]
    fn frame_without_data_is_usage_error(#[case] line: &str) {
        assert_eq!(Err(ConsoleCommandError::FrameUsage), ConsoleCommand::parse(line));
    }

    #[rstest]
    #[case("frame abc 1 data", "cmd", "abc")]
    #[case("frame 1 zz data", "subtype", "zz")]
    #[case("frame 010 1 data", "cmd", "010")]
    #[case("frame 0x 1 data", "cmd", "0x")]
    #[case("frame 1__0 1 data", "cmd", "1__0")]
    fn frame_with_bad_header_is_rejected(
        #[case] line: &str,
        #[case] field: &'static str,
        #[case] value: &str,
    ) {
        assert_eq!(
            Err(ConsoleCommandError::NonNumericField {
                field,
                value: value.to_string(),
            }),
            ConsoleCommand::parse(line)
        );
    }

    #[test]
    fn automation_treats_keywords_as_raw_text() {
        assert_eq!(
            Ok(Some(ConsoleCommand::Raw("activate".into()))),
            ConsoleCommand::parse_automation("activate")
        );
    }

    #[test]
    fn automation_parses_frames() {
        let parsed = ConsoleCommand::parse_automation(" FRAME 3 4 ping ")
            .expect("valid frame message")
            .expect("non-empty message");
        assert_eq!(ConsoleCommand::Frame(Frame::new(3, 4, "ping")), parsed);
    }

    #[test]
    fn zero_is_a_valid_decimal_literal() {
        assert_eq!(Ok(0), parse_integer("cmd", "00"));
    }
}
