use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::RecursiveMode;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::events::WatchEventKind;
use super::registry::{ClaimId, ColorRegistry, PathClaims};
use super::supervisor::ShutdownSignal;
use super::watcher::{PathWatcher, WatchHub, WatchSignal};
use crate::config::WatcherConfig;
use crate::error::{Result, TailError};
use crate::filter::FilterSpec;
use crate::output::{render_line, DisplayMode, LineSink};

/// Everything a tail task shares with its siblings. Cloning is cheap.
#[derive(Clone)]
pub struct TailContext {
    pub colors: Arc<ColorRegistry>,
    pub claims: Arc<PathClaims>,
    pub hub: WatchHub,
    pub filter: Option<Arc<FilterSpec>>,
    pub mode: DisplayMode,
    pub config: Arc<WatcherConfig>,
    pub sink: Arc<dyn LineSink>,
}

impl TailContext {
    /// Fails only when the OS file watcher cannot be started.
    pub fn new(
        mode: DisplayMode,
        filter: Option<FilterSpec>,
        config: WatcherConfig,
        sink: Arc<dyn LineSink>,
    ) -> Result<Self> {
        let colors = if mode.is_pretty() {
            ColorRegistry::new()
        } else {
            ColorRegistry::disabled()
        };

        Ok(Self {
            colors: Arc::new(colors),
            claims: Arc::new(PathClaims::new()),
            hub: WatchHub::new()?,
            filter: filter.map(Arc::new),
            mode,
            config: Arc::new(config),
            sink,
        })
    }
}

/// Where a new tail starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Emit whatever the file already holds.
    Beginning,
    /// Only emit what gets appended from now on.
    End,
}

/// One bounded read step.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Chunk {
    pub lines: Vec<String>,
    /// More bytes were available than the read limit allowed.
    pub more: bool,
}

/// Read position inside one file, plus an unterminated trailing line that
/// is held back until its newline shows up.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TailCursor {
    offset: u64,
    partial: Vec<u8>,
    /// The rest of an oversized line is dropped up to its newline.
    discarding: bool,
    /// End of the bytes skipped when the tail started at the end of the file.
    skipped: Option<u64>,
}

impl TailCursor {
    pub fn at(offset: u64) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    /// Start at `len`, remembering that `0..len` was never emitted.
    pub fn at_end(len: u64) -> Self {
        Self {
            offset: len,
            skipped: (len > 0).then_some(len),
            ..Self::default()
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read up to `max_read_bytes` past the cursor and return the complete,
    /// non-blank lines in file order.
    ///
    /// A file shorter than the cursor was truncated; reading restarts at 0.
    pub async fn read_chunk(&mut self, path: &Path, config: &WatcherConfig) -> io::Result<Chunk> {
        let mut file = File::open(path).await?;
        let len = file.metadata().await?.len();

        if len < self.offset {
            tracing::info!("{} was truncated, reading from the start", path.display());
            *self = Self::at(0);
        }

        if len == self.offset {
            return Ok(Chunk::default());
        }

        file.seek(SeekFrom::Start(self.offset)).await?;

        let available = len - self.offset;
        let limit = available.min(config.max_read_bytes);
        let mut buf = Vec::with_capacity(limit as usize);
        let read = file.take(limit).read_to_end(&mut buf).await?;
        self.offset += read as u64;

        Ok(Chunk {
            lines: self.split_lines(&buf, config.max_partial_line_bytes, path),
            more: (read as u64) < available,
        })
    }

    /// Complete lines from the bytes skipped at startup. Yields them once.
    pub async fn read_skipped(&mut self, path: &Path, config: &WatcherConfig) -> io::Result<Vec<String>> {
        let Some(end) = self.skipped.take() else {
            return Ok(Vec::new());
        };

        let file = File::open(path).await?;
        let mut buf = Vec::new();
        file.take(end.min(config.max_read_bytes))
            .read_to_end(&mut buf)
            .await?;

        // A line running past `end` was already read from the cursor.
        let complete = match buf.iter().rposition(|b| *b == b'\n') {
            Some(last) => &buf[..last],
            None => return Ok(Vec::new()),
        };
        Ok(to_lines(complete.split(|b| *b == b'\n')))
    }

    fn split_lines(&mut self, bytes: &[u8], max_partial: usize, path: &Path) -> Vec<String> {
        let mut bytes = bytes;
        if self.discarding {
            match bytes.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    bytes = &bytes[end + 1..];
                }
                None => return Vec::new(),
            }
        }

        let mut data = std::mem::take(&mut self.partial);
        data.extend_from_slice(bytes);

        let mut segments: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
        // The last segment is either empty (data ended in '\n') or a line
        // still being written.
        let tail = segments.pop().unwrap_or_default();
        if tail.len() > max_partial {
            tracing::warn!(
                "Discarding oversized incomplete line ({} bytes) in {}",
                tail.len(),
                path.display()
            );
            self.discarding = true;
        } else {
            self.partial = tail.to_vec();
        }

        to_lines(segments)
    }
}

fn to_lines<'a>(segments: impl IntoIterator<Item = &'a [u8]>) -> Vec<String> {
    segments
        .into_iter()
        .map(|segment| segment.strip_suffix(b"\r").unwrap_or(segment))
        .map(|segment| String::from_utf8_lossy(segment).into_owned())
        .filter(|line| !line.trim().is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailCommand {
    /// The file turned out to be new: emit what was skipped at startup.
    Backfill,
}

/// Lets the directory task talk to a running tail.
#[derive(Debug, Clone)]
pub struct TailHandle {
    tx: UnboundedSender<TailCommand>,
}

impl TailHandle {
    /// Returns `false` once the tail has ended.
    pub fn backfill(&self) -> bool {
        self.tx.send(TailCommand::Backfill).is_ok()
    }
}

/// Streams newly appended lines of one file into the output pipeline.
#[derive(Debug)]
pub struct FileTail {
    path: PathBuf,
    watcher: PathWatcher,
    cursor: TailCursor,
    drain_on_start: bool,
    control: UnboundedSender<TailCommand>,
    commands: UnboundedReceiver<TailCommand>,
}

impl FileTail {
    /// Subscribe to changes of `path` and position the cursor.
    pub fn open(path: impl Into<PathBuf>, start: StartPosition, hub: &WatchHub) -> Result<Self> {
        let path = path.into();
        let watcher = hub.subscribe(&path, RecursiveMode::NonRecursive)?;

        let cursor = match start {
            StartPosition::Beginning => TailCursor::at(0),
            StartPosition::End => {
                let len = std::fs::metadata(&path)
                    .map_err(|source| TailError::Read {
                        path: path.clone(),
                        source,
                    })?
                    .len();
                TailCursor::at_end(len)
            }
        };

        let (control, commands) = mpsc::unbounded_channel();
        Ok(Self {
            path,
            watcher,
            cursor,
            drain_on_start: start == StartPosition::Beginning,
            control,
            commands,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> &TailCursor {
        &self.cursor
    }

    pub fn handle(&self) -> TailHandle {
        TailHandle {
            tx: self.control.clone(),
        }
    }

    /// Event loop. Ends on shutdown, when the watch closes, or when the file
    /// is removed; `claim` is given back either way.
    pub async fn run(
        mut self,
        ctx: TailContext,
        claim: ClaimId,
        mut shutdown: ShutdownSignal,
    ) -> anyhow::Result<()> {
        ctx.colors.assign_if_absent(&self.path);
        tracing::debug!("Tailing {} from offset {}", self.path.display(), self.cursor.offset());

        if self.drain_on_start {
            self.drain(&ctx).await;
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::debug!("Stopping tail of {}", self.path.display());
                    break;
                }
                Some(command) = self.commands.recv() => match command {
                    TailCommand::Backfill => self.backfill(&ctx).await,
                },
                signal = self.watcher.next() => match signal {
                    Some(WatchSignal::Event(event)) => match event.kind {
                        WatchEventKind::Modified => self.drain(&ctx).await,
                        WatchEventKind::Removed => {
                            tracing::info!("{} was removed, no longer tailing it", self.path.display());
                            break;
                        }
                        _ => {}
                    },
                    Some(WatchSignal::Error(err)) => {
                        tracing::warn!("Error watching {}: {}", self.path.display(), err);
                    }
                    None => {
                        tracing::debug!("Watch on {} closed", self.path.display());
                        break;
                    }
                }
            }
        }

        ctx.claims.release(&self.path, claim);
        Ok(())
    }

    async fn drain(&mut self, ctx: &TailContext) {
        loop {
            match self.cursor.read_chunk(&self.path, &ctx.config).await {
                Ok(chunk) => {
                    for line in &chunk.lines {
                        self.emit(ctx, line);
                    }
                    if !chunk.more {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!("Failed to read {}: {}", self.path.display(), err);
                    break;
                }
            }
        }
    }

    async fn backfill(&mut self, ctx: &TailContext) {
        match self.cursor.read_skipped(&self.path, &ctx.config).await {
            Ok(lines) => {
                if !lines.is_empty() {
                    tracing::debug!("{} is new, emitting {} earlier lines", self.path.display(), lines.len());
                }
                for line in &lines {
                    self.emit(ctx, line);
                }
            }
            Err(err) => tracing::warn!("Failed to read {}: {}", self.path.display(), err),
        }
    }

    fn emit(&self, ctx: &TailContext, line: &str) {
        let color = ctx.colors.color_of(&self.path);
        if let Some(text) = render_line(line, ctx.filter.as_deref(), ctx.mode, color) {
            ctx.sink.emit(&self.path, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> WatcherConfig {
        WatcherConfig::default()
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_split_holds_back_partial_line() {
        let mut cursor = TailCursor::default();
        let path = Path::new("a.log");

        assert_eq!(cursor.split_lines(b"one\ntw", 1024, path), vec!["one"]);
        assert_eq!(cursor.split_lines(b"o\r\n\n   \nthree\n", 1024, path), vec!["two", "three"]);
        assert!(cursor.partial.is_empty());
    }

    #[test]
    fn test_split_skips_rest_of_oversized_line() {
        let mut cursor = TailCursor::default();
        let path = Path::new("a.log");

        assert!(cursor.split_lines(b"0123456789", 4, path).is_empty());
        assert!(cursor.partial.is_empty());
        assert!(cursor.split_lines(b"abcdef", 4, path).is_empty());
        assert_eq!(cursor.split_lines(b"ghi\nok\n", 4, path), vec!["ok"]);
        assert!(!cursor.discarding);
    }

    #[tokio::test]
    async fn test_cursor_only_returns_new_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "old\n").unwrap();

        let mut cursor = TailCursor::at(std::fs::metadata(&path).unwrap().len());
        assert_eq!(cursor.read_chunk(&path, &config()).await.unwrap(), Chunk::default());

        append(&path, "new 1\nnew 2\n");
        let chunk = cursor.read_chunk(&path, &config()).await.unwrap();
        assert_eq!(chunk.lines, vec!["new 1", "new 2"]);
        assert!(!chunk.more);

        append(&path, "new 3\n");
        let chunk = cursor.read_chunk(&path, &config()).await.unwrap();
        assert_eq!(chunk.lines, vec!["new 3"]);
    }

    #[tokio::test]
    async fn test_cursor_resets_after_truncation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "a fairly long first line\n").unwrap();

        let mut cursor = TailCursor::at(0);
        cursor.read_chunk(&path, &config()).await.unwrap();

        std::fs::write(&path, "short\n").unwrap();
        let chunk = cursor.read_chunk(&path, &config()).await.unwrap();
        assert_eq!(chunk.lines, vec!["short"]);
        assert_eq!(cursor.offset(), 6);
    }

    #[tokio::test]
    async fn test_cursor_respects_read_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "aaaa\nbbbb\n").unwrap();

        let config = WatcherConfig {
            max_read_bytes: 5,
            ..WatcherConfig::default()
        };
        let mut cursor = TailCursor::at(0);

        let first = cursor.read_chunk(&path, &config).await.unwrap();
        assert_eq!(first.lines, vec!["aaaa"]);
        assert!(first.more);

        let second = cursor.read_chunk(&path, &config).await.unwrap();
        assert_eq!(second.lines, vec!["bbbb"]);
        assert!(!second.more);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_read_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cursor = TailCursor::default();
        assert!(cursor.read_chunk(&dir.path().join("gone.log"), &config()).await.is_err());
    }

    #[test]
    fn test_open_positions_cursor() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "12345\n").unwrap();

        let hub = WatchHub::new().unwrap();
        let tail = FileTail::open(&path, StartPosition::End, &hub).unwrap();
        assert_eq!(tail.cursor().offset(), 6);
        assert_eq!(tail.path(), path.as_path());

        let tail = FileTail::open(&path, StartPosition::Beginning, &hub).unwrap();
        assert_eq!(tail.cursor().offset(), 0);

        assert!(FileTail::open(dir.path().join("missing.log"), StartPosition::End, &hub).is_err());
    }

    #[tokio::test]
    async fn test_skipped_bytes_are_read_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "early 1\nearly 2\nhalf").unwrap();

        let mut cursor = TailCursor::at_end(std::fs::metadata(&path).unwrap().len());
        append(&path, " line\nlater\n");

        let chunk = cursor.read_chunk(&path, &config()).await.unwrap();
        assert_eq!(chunk.lines, vec![" line", "later"]);

        let skipped = cursor.read_skipped(&path, &config()).await.unwrap();
        assert_eq!(skipped, vec!["early 1", "early 2"]);
        assert!(cursor.read_skipped(&path, &config()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncation_forgets_skipped_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "old history\n").unwrap();

        let mut cursor = TailCursor::at_end(12);
        std::fs::write(&path, "new\n").unwrap();
        assert_eq!(cursor.read_chunk(&path, &config()).await.unwrap().lines, vec!["new"]);
        assert!(cursor.read_skipped(&path, &config()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backfill_command_emits_skipped_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "written before the tail opened\n").unwrap();

        let (sink, mut rx) = crate::output::ChannelSink::new();
        let ctx = TailContext::new(DisplayMode::Plain, None, config(), Arc::new(sink)).unwrap();
        let group = crate::core::TaskGroup::new();

        let tail = FileTail::open(&path, StartPosition::End, &ctx.hub).unwrap();
        let handle = tail.handle();
        let claim = ctx.claims.claim(&path).unwrap();
        group.spawn("tail", tail.run(ctx.clone(), claim, group.shutdown_signal()));

        assert!(handle.backfill());
        let line = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.text, "written before the tail opened");

        assert!(handle.backfill());
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(300), rx.recv())
                .await
                .is_err()
        );

        group.shutdown().await;
        assert!(!ctx.claims.is_claimed(&path));
    }
}
