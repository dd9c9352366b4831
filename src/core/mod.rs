//! Core functionality module
//!
//! Contains file and directory watching, the tail tasks, and the state they
//! share.

pub mod directory;
pub mod events;
pub mod registry;
pub mod supervisor;
pub mod tail;
pub mod watcher;

use std::path::Path;

// Re-export main types
pub use directory::{spawn_tail, DirectoryWatch};
pub use events::{WatchEvent, WatchEventKind};
pub use registry::{ClaimId, ColorRegistry, PathClaims};
pub use supervisor::{ShutdownSignal, TaskGroup};
pub use tail::{Chunk, FileTail, StartPosition, TailCommand, TailContext, TailCursor, TailHandle};
pub use watcher::{PathWatcher, WatchHub, WatchSignal};

use crate::error::Result;

fn initial_position(ctx: &TailContext) -> StartPosition {
    if ctx.config.from_start {
        StartPosition::Beginning
    } else {
        StartPosition::End
    }
}

/// Start tailing a single file. Failing to watch it is fatal.
pub fn watch_file<P: AsRef<Path>>(path: P, ctx: &TailContext, group: &TaskGroup) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    let tail = FileTail::open(&path, initial_position(ctx), &ctx.hub)?;
    let Some(claim) = ctx.claims.claim(&path) else {
        tracing::debug!("{} is already being tailed", path.display());
        return Ok(());
    };

    tracing::info!("Watching {}", path.display());
    group.spawn(
        format!("tail {}", path.display()),
        tail.run(ctx.clone(), claim, group.shutdown_signal()),
    );
    Ok(())
}

/// Start the directory task and the tails for the files it already holds.
pub fn watch_directory<P: AsRef<Path>>(dir: P, ctx: &TailContext, group: &TaskGroup) -> Result<()> {
    let watch = DirectoryWatch::start(dir, ctx, group)?;
    group.spawn(
        format!("directory {}", watch.root().display()),
        watch.run(ctx.clone(), group.clone(), group.shutdown_signal()),
    );
    Ok(())
}
