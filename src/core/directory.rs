use std::collections::HashMap;
use std::path::{Path, PathBuf};

use notify::RecursiveMode;

use super::events::WatchEventKind;
use super::supervisor::{ShutdownSignal, TaskGroup};
use super::tail::{FileTail, StartPosition, TailContext, TailHandle};
use super::watcher::{PathWatcher, WatchSignal};
use crate::error::{Result, TailError};
use crate::filter::FileFilter;

/// Keeps exactly one tail task running per matching file in a directory.
///
/// Files present at startup are found by walking the tree once; afterwards
/// only creation and removal events directly inside the directory are
/// followed.
#[derive(Debug)]
pub struct DirectoryWatch {
    filter: FileFilter,
    watcher: PathWatcher,
    tails: HashMap<PathBuf, TailHandle>,
}

impl DirectoryWatch {
    /// Watch `dir`, then start a tail for every matching file already in it.
    ///
    /// Watch and enumeration failures on the directory are fatal; a single
    /// file that cannot be tailed is logged and skipped.
    pub fn start<P: AsRef<Path>>(dir: P, ctx: &TailContext, group: &TaskGroup) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(TailError::NotADirectory(dir.to_path_buf()));
        }
        let root = dir.canonicalize().map_err(|source| TailError::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        let watcher = ctx.hub.subscribe(&root, RecursiveMode::NonRecursive)?;
        let filter = FileFilter::new(&root, ctx.config.log_extension.clone());

        let start = if ctx.config.from_start {
            StartPosition::Beginning
        } else {
            StartPosition::End
        };
        let files = filter.get_watchable_files()?;
        tracing::info!("Watching {} ({} existing log files)", root.display(), files.len());

        let mut tails = HashMap::new();
        for file in files {
            if let Some(handle) = spawn_tail(file.clone(), start, ctx, group) {
                tails.insert(file, handle);
            }
        }
        tracing::debug!("{} OS watches registered", ctx.hub.registered_len());

        Ok(Self {
            filter,
            watcher,
            tails,
        })
    }

    pub fn root(&self) -> &Path {
        self.watcher.path()
    }

    pub async fn run(
        mut self,
        ctx: TailContext,
        group: TaskGroup,
        mut shutdown: ShutdownSignal,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                signal = self.watcher.next() => match signal {
                    Some(WatchSignal::Event(event)) => match event.kind {
                        WatchEventKind::Created => {
                            for path in event.paths {
                                self.on_created(path, &ctx, &group);
                            }
                        }
                        WatchEventKind::Removed => {
                            for path in event.paths {
                                self.on_removed(&path, &ctx);
                            }
                        }
                        _ => {}
                    },
                    Some(WatchSignal::Error(err)) => {
                        tracing::warn!("Error watching directory {}: {}", self.root().display(), err);
                    }
                    None => {
                        tracing::debug!("Watch on {} closed", self.root().display());
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn on_created(&mut self, path: PathBuf, ctx: &TailContext, group: &TaskGroup) {
        if !self.filter.should_watch(&path) || path.is_dir() {
            return;
        }

        if let Some(handle) = spawn_tail(path.clone(), StartPosition::Beginning, ctx, group) {
            tracing::info!("New log file detected: {}", path.display());
            self.tails.insert(path, handle);
        } else if let Some(handle) = self.tails.get(&path) {
            // Created after the watch began but already opened by the
            // startup walk, so everything in it is new.
            handle.backfill();
        }
    }

    fn on_removed(&mut self, path: &Path, ctx: &TailContext) {
        if !self.filter.should_watch(path) {
            return;
        }

        // Removal and re-creation reach this task in order.
        self.tails.remove(path);
        if ctx.claims.revoke(path) {
            tracing::debug!("Released {} after removal", path.display());
        }
    }
}

/// Claim `path` and start its tail. Paths already claimed are skipped, so a
/// file seen by both the startup walk and a creation event is tailed once.
pub fn spawn_tail(
    path: PathBuf,
    start: StartPosition,
    ctx: &TailContext,
    group: &TaskGroup,
) -> Option<TailHandle> {
    let Some(claim) = ctx.claims.claim(&path) else {
        tracing::debug!("{} is already being tailed", path.display());
        return None;
    };

    match FileTail::open(&path, start, &ctx.hub) {
        Ok(tail) => {
            let handle = tail.handle();
            group.spawn(
                format!("tail {}", path.display()),
                tail.run(ctx.clone(), claim, group.shutdown_signal()),
            );
            Some(handle)
        }
        Err(err) => {
            ctx.claims.release(&path, claim);
            tracing::error!("Failed to start tailing {}: {}", path.display(), err);
            None
        }
    }
}
