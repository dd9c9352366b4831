//! State shared by every tail task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::output::PALETTE;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock leaves the map itself consistent.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Path to display color, handed out round-robin in first-sight order.
///
/// The i-th distinct path gets `palette[i % palette.len()]`. When color
/// output is off the registry is disabled and never takes its lock.
#[derive(Debug)]
pub struct ColorRegistry {
    palette: &'static [&'static str],
    colors: Option<Mutex<HashMap<PathBuf, &'static str>>>,
}

impl ColorRegistry {
    pub fn new() -> Self {
        Self::with_palette(&PALETTE)
    }

    /// An empty palette behaves like [`ColorRegistry::disabled`].
    pub fn with_palette(palette: &'static [&'static str]) -> Self {
        Self {
            palette,
            colors: (!palette.is_empty()).then(|| Mutex::new(HashMap::new())),
        }
    }

    pub fn disabled() -> Self {
        Self {
            palette: &[],
            colors: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.colors.is_some()
    }

    /// Bind a color to `path` unless one is bound already, and return the
    /// bound color. Check and insert happen under one lock.
    pub fn assign_if_absent(&self, path: &Path) -> Option<&'static str> {
        let colors = self.colors.as_ref()?;
        let mut colors = lock(colors);

        if let Some(color) = colors.get(path) {
            return Some(*color);
        }

        let color = self.palette[colors.len() % self.palette.len()];
        colors.insert(path.to_path_buf(), color);
        Some(color)
    }

    /// Color previously bound by [`ColorRegistry::assign_if_absent`].
    pub fn color_of(&self, path: &Path) -> Option<&'static str> {
        let colors = self.colors.as_ref()?;
        let color = lock(colors).get(path).copied();
        if color.is_none() {
            tracing::debug!("No color registered for {}", path.display());
        }
        color
    }

    pub fn len(&self) -> usize {
        self.colors.as_ref().map_or(0, |colors| lock(colors).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ColorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of ownership of a claimed path, handed to the tail that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimId(u64);

#[derive(Debug, Default)]
struct ClaimTable {
    next: u64,
    owners: HashMap<PathBuf, ClaimId>,
}

/// Paths that already have a tail task. The first claim wins.
///
/// A claim can only be released by its owner, so a tail that ends late
/// never frees the claim of the tail that replaced it.
#[derive(Debug, Default)]
pub struct PathClaims {
    table: Mutex<ClaimTable>,
}

impl PathClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a claim only for the first caller with a given path.
    pub fn claim(&self, path: &Path) -> Option<ClaimId> {
        let mut table = lock(&self.table);
        if table.owners.contains_key(path) {
            return None;
        }
        let id = ClaimId(table.next);
        table.next += 1;
        table.owners.insert(path.to_path_buf(), id);
        Some(id)
    }

    /// Give a path back. Does nothing unless `id` still owns it.
    pub fn release(&self, path: &Path, id: ClaimId) -> bool {
        let mut table = lock(&self.table);
        if table.owners.get(path) == Some(&id) {
            table.owners.remove(path);
            true
        } else {
            false
        }
    }

    /// Drop whatever claim `path` has, e.g. once the file is gone.
    pub fn revoke(&self, path: &Path) -> bool {
        lock(&self.table).owners.remove(path).is_some()
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        lock(&self.table).owners.contains_key(path)
    }

    pub fn len(&self) -> usize {
        lock(&self.table).owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
