use std::path::PathBuf;

use clap::Parser;

use crate::config::TailConfig;
use crate::error::{Result, TailError};
use crate::filter::FilterSpec;
use crate::output::DisplayMode;

#[derive(Parser, Debug, Default)]
#[command(name = "logtail")]
#[command(version)]
#[command(about = "Tail log files live, with JSON formatting, filtering and per-file colors")]
#[command(long_about = "logtail follows a single file or every .log file in a directory, printing new lines as they are appended. JSON lines can be filtered by a key/value pair and, with -p, formatted and colored per source file.")]
pub struct Cli {
    /// Single file to tail
    #[arg(value_name = "FILE", help = "Tail this file directly (-d is ignored)")]
    pub files: Vec<PathBuf>,

    /// Directory to watch for log files
    #[arg(short = 'd', long = "dir", value_name = "DIR", help = "Directory to watch for log files")]
    pub directory: Option<PathBuf>,

    /// Color-coded, formatted output
    #[arg(short = 'p', long = "pretty", help = "Enable color-coded output for each file")]
    pub pretty: bool,

    /// Key/value filter for JSON lines
    #[arg(long, value_name = "key[value]", help = "Filter logs by a key-value pair, e.g. log_level[debug]")]
    pub filter: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Configuration file
    #[arg(long, value_name = "FILE", help = "Read settings from a TOML file")]
    pub config: Option<PathBuf>,

    /// Log file extension
    #[arg(long = "ext", value_name = "EXT", help = "Extension of files picked up in directory mode")]
    pub extension: Option<String>,

    /// Print existing content first
    #[arg(long, help = "Emit the existing content of files found at startup")]
    pub from_start: bool,
}

/// What the entry point hands to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    File(PathBuf),
    Directory(PathBuf),
}

impl Cli {
    /// One positional path wins over `-d`; otherwise `-d` is required.
    pub fn target(&self) -> Result<WatchTarget> {
        match self.files.as_slice() {
            [file] => {
                if let Some(dir) = &self.directory {
                    tracing::warn!("Ignoring -d {} because a file was given", dir.display());
                }
                if !file.is_file() {
                    return Err(TailError::NotAFile(file.clone()));
                }
                let file = file.canonicalize().map_err(|source| TailError::Read {
                    path: file.clone(),
                    source,
                })?;
                Ok(WatchTarget::File(file))
            }
            [] => match &self.directory {
                Some(dir) if dir.is_dir() => Ok(WatchTarget::Directory(dir.clone())),
                Some(dir) => Err(TailError::NotADirectory(dir.clone())),
                None => Err(TailError::MissingTarget),
            },
            many => Err(TailError::TooManyTargets(many.len())),
        }
    }

    pub fn filter_spec(&self) -> Result<Option<FilterSpec>> {
        self.filter.as_deref().map(FilterSpec::parse).transpose()
    }

    pub fn display_mode(&self) -> DisplayMode {
        DisplayMode::from_pretty_flag(self.pretty)
    }

    /// Defaults, then the config file, then the environment, then flags.
    pub fn load_config(&self) -> Result<TailConfig> {
        let config = match &self.config {
            Some(path) => TailConfig::from_file(path)?,
            None => TailConfig::default(),
        };
        let mut config = config.apply_env();

        if let Some(ext) = &self.extension {
            config.watcher.log_extension = ext.clone();
        }
        if self.from_start {
            config.watcher.from_start = true;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}
