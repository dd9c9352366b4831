pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod filter;
pub mod format;
pub mod output;

pub use crate::core::*;
pub use config::{TailConfig, WatcherConfig};
pub use error::TailError;
pub use filter::{keep, FileFilter, FilterSpec};
pub use format::{decode_record, format_record, LogRecord};
pub use output::*;
