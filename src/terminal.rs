use std::future::Future;
use std::io::{self, BufRead, IsTerminal};
use std::pin::Pin;
use std::thread;

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

const CONSOLE_CHANNEL_CAPACITY: usize = 16;
const CONSOLE_THREAD_NAME: &str = "mqrelay-console";

/// Operator input lines, in the order they were typed.
pub type ConsoleLines = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;

/// Resolves when the operator asks the relay to stop.
pub type Interrupt = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Terminal capabilities and operator input, injectable for tests.
pub trait TerminalClient: Send + Sync {
    /// Returns whether standard output is attached to a terminal.
    fn stdout_is_terminal(&self) -> bool;

    /// Returns whether standard error is attached to a terminal.
    fn stderr_is_terminal(&self) -> bool;

    /// Opens the operator input stream.
    fn console_lines(&self) -> ConsoleLines;

    /// Waits for an interrupt. Defaults to Ctrl+C.
    fn interrupted(&self) -> Interrupt {
        Box::pin(tokio::signal::ctrl_c())
    }
}

/// The process's real standard streams.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }

    fn console_lines(&self) -> ConsoleLines {
        spawn_line_reader(io::BufReader::new(io::stdin()))
    }
}

/// Reads lines on a dedicated thread so a pending read never holds up runtime
/// shutdown. The thread exits at EOF, on a read error, or once the stream is
/// dropped and the next line arrives.
pub(crate) fn spawn_line_reader<R>(reader: R) -> ConsoleLines
where
    R: BufRead + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(CONSOLE_CHANNEL_CAPACITY);
    let spawned = thread::Builder::new()
        .name(CONSOLE_THREAD_NAME.to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if sender.blocking_send(line).is_err() {
                    debug!("console stream dropped; stopping reader");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

    match spawned {
        Ok(_handle) => Box::pin(ReceiverStream::new(receiver)),
        Err(error) => Box::pin(tokio_stream::once(Err(error))),
    }
}

/// Builds console input from fixed lines.
///
/// ```
/// use tokio_stream::StreamExt;
///
/// # async fn demo() -> std::io::Result<()> {
/// let mut lines = mqrelay::scripted_console_lines(["activate", "quit"]);
/// assert_eq!(Some("activate".to_string()), lines.next().await.transpose()?);
/// # Ok(())
/// # }
/// ```
#[must_use]
pub fn scripted_console_lines<I, S>(lines: I) -> ConsoleLines
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let lines: Vec<io::Result<String>> = lines.into_iter().map(|line| Ok(line.into())).collect();
    Box::pin(tokio_stream::iter(lines))
}
