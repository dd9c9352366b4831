use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ignore::WalkBuilder;
use regex::Regex;
use serde_json::Value;

use crate::error::{Result, TailError};
use crate::format::LogRecord;

/// Key/value restriction applied to decoded log records.
///
/// Both halves are always set; no filter at all is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    key: String,
    value: String,
}

fn filter_syntax() -> &'static Regex {
    static SYNTAX: OnceLock<Regex> = OnceLock::new();
    SYNTAX.get_or_init(|| {
        Regex::new(r"^(\w+)\[([^\]]+)\]$").expect("filter syntax regex is valid")
    })
}

impl FilterSpec {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse `key[value]`, e.g. `log_level[debug]`.
    pub fn parse(input: &str) -> Result<Self> {
        let captures = filter_syntax()
            .captures(input)
            .ok_or_else(|| TailError::InvalidFilter(input.to_string()))?;

        Ok(Self::new(&captures[1], &captures[2]))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Scalars are compared through their JSON text form, so `level[3]`
    /// matches both `"level": 3` and `"level": "3"`. Arrays and objects
    /// never match, nor does a missing key.
    pub fn matches(&self, record: &LogRecord) -> bool {
        match record.get(&self.key) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            Some(Value::Null) => self.value == "null",
            Some(Value::Array(_)) | Some(Value::Object(_)) | None => false,
        }
    }
}

/// Decide whether a decoded record survives the optional filter.
pub fn keep(record: &LogRecord, spec: Option<&FilterSpec>) -> bool {
    spec.map_or(true, |spec| spec.matches(record))
}

/// Selects the files a directory watch is responsible for.
#[derive(Debug, Clone)]
pub struct FileFilter {
    root_path: PathBuf,
    extension: String,
}

impl FileFilter {
    pub fn new<P: AsRef<Path>>(root_path: P, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            root_path: root_path.as_ref().to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    pub fn should_watch<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Walk the whole tree once and collect every matching file.
    ///
    /// Ignore files are not honoured, so gitignored `*.log` files are found.
    pub fn get_watchable_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for result in WalkBuilder::new(&self.root_path)
            .standard_filters(false)
            .follow_links(false)
            .build()
        {
            let entry = result.map_err(|source| TailError::Enumerate {
                path: self.root_path.clone(),
                source,
            })?;

            let path = entry.path();
            if entry.file_type().map_or(false, |ft| ft.is_file()) && self.should_watch(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }
}
