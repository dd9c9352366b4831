//! Where surviving lines end up.
//!
//! The tail tasks hand every line to a [`LineSink`]. The binary prints to
//! stdout; tests collect lines through [`ChannelSink`] instead.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::core::registry::lock;
use crate::core::supervisor::TaskGroup;
use crate::filter::{keep, FilterSpec};
use crate::format::{decode_record, format_record};

pub const RESET_COLOR: &str = "\x1b[0m";

/// Colors handed out to files in registration order.
pub const PALETTE: [&str; 6] = [
    "\x1b[31m", // Red
    "\x1b[32m", // Green
    "\x1b[33m", // Yellow
    "\x1b[34m", // Blue
    "\x1b[35m", // Magenta
    "\x1b[36m", // Cyan
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// Lines are printed as read.
    #[default]
    Plain,
    /// JSON lines are formatted and every line is wrapped in its file's color.
    Pretty,
}

impl DisplayMode {
    pub fn from_pretty_flag(pretty: bool) -> Self {
        if pretty {
            DisplayMode::Pretty
        } else {
            DisplayMode::Plain
        }
    }

    pub fn is_pretty(self) -> bool {
        matches!(self, DisplayMode::Pretty)
    }
}

/// Run one raw line through decode, filter and format.
///
/// Returns `None` when the filter drops the line. Lines that are not JSON
/// objects are never filtered.
pub fn render_line(
    line: &str,
    filter: Option<&FilterSpec>,
    mode: DisplayMode,
    color: Option<&str>,
) -> Option<String> {
    let body = match decode_record(line) {
        Some(record) => {
            if !keep(&record, filter) {
                return None;
            }
            match mode {
                DisplayMode::Pretty => format_record(&record),
                DisplayMode::Plain => line.to_string(),
            }
        }
        None => line.to_string(),
    };

    match (mode, color) {
        (DisplayMode::Pretty, Some(color)) => Some(format!("{color}{body}{RESET_COLOR}")),
        _ => Some(body),
    }
}

/// A line ready for display, tagged with the file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailedLine {
    pub source: PathBuf,
    pub text: String,
}

pub trait LineSink: Send + Sync {
    fn emit(&self, source: &Path, text: String);
}

/// Writes each line to `W` under one lock, so lines from different files
/// never interleave mid-line.
///
/// A closed reader (`| head`) stops output and asks the task group to
/// shut down.
pub struct WriterSink<W> {
    writer: Mutex<W>,
    closed: AtomicBool,
    group: TaskGroup,
}

pub type StdoutSink = WriterSink<io::Stdout>;

impl StdoutSink {
    pub fn stdout(group: TaskGroup) -> Self {
        Self::new(io::stdout(), group)
    }
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W, group: TaskGroup) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            group,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<W> std::fmt::Debug for WriterSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterSink")
            .field("closed", &self.closed)
            .finish()
    }
}

impl<W: Write + Send> LineSink for WriterSink<W> {
    fn emit(&self, source: &Path, text: String) {
        if self.is_closed() {
            return;
        }

        let mut writer = lock(&self.writer);
        let result = writeln!(writer, "{text}").and_then(|()| writer.flush());
        match result {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                if !self.closed.swap(true, Ordering::AcqRel) {
                    tracing::info!("Output closed, shutting down");
                    self.group.request_shutdown();
                }
            }
            Err(err) => {
                tracing::warn!("Failed to write line from {}: {}", source.display(), err);
            }
        }
    }
}

/// Forwards lines into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TailedLine>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TailedLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LineSink for ChannelSink {
    fn emit(&self, source: &Path, text: String) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(TailedLine {
            source: source.to_path_buf(),
            text,
        });
    }
}
