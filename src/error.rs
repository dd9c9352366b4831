//! Startup error taxonomy.
//!
//! Everything in here is fatal: the entry point prints the message and exits
//! non-zero. Steady-state failures inside tail tasks are logged instead and
//! never reach this type.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("invalid filter format '{0}': filter must be in the format key[value]")]
    InvalidFilter(String),

    #[error("the provided path is not a valid file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("the provided path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("please provide either a directory to watch using the -d flag or a file path directly")]
    MissingTarget,

    #[error("expected at most one file path, got {0}")]
    TooManyTargets(usize),

    #[error("failed to start the file watcher: {0}")]
    Watcher(#[source] notify::Error),

    #[error("failed to watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to find log files in directory {}: {source}", .path.display())]
    Enumerate {
        path: PathBuf,
        #[source]
        source: ignore::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = TailError> = std::result::Result<T, E>;
