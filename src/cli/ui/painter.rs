use owo_colors::{OwoColorize, Style};

/// Colour roles used by the relay's terminal output.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Tone {
    Heading,
    Success,
    Warning,
    Muted,
    Value,
}

impl Tone {
    fn style(self) -> Style {
        match self {
            Self::Heading => Style::new().bold().cyan(),
            Self::Success => Style::new().green(),
            Self::Warning => Style::new().bold().yellow(),
            Self::Muted => Style::new().dimmed(),
            Self::Value => Style::new().bold(),
        }
    }
}

/// Applies colour to terminal text when stdout is a terminal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Heading, text.as_ref())
    }

    /// Outbound publishes.
    pub(crate) fn success(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Success, text.as_ref())
    }

    pub(crate) fn warning(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Warning, text.as_ref())
    }

    pub(crate) fn muted(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Muted, text.as_ref())
    }

    pub(crate) fn value(&self, text: impl AsRef<str>) -> String {
        self.paint(Tone::Value, text.as_ref())
    }

    fn paint(self, tone: Tone, text: &str) -> String {
        if self.use_colour {
            text.style(tone.style()).to_string()
        } else {
            text.to_owned()
        }
    }
}
