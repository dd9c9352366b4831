//! One notify watcher shared by every task, with events routed by path.
//!
//! Each tail or directory task subscribes to the paths it cares about and
//! gets its own pair of channels. A file directly inside a watched
//! directory is served by the directory's OS watch, so a directory of many
//! log files costs one inotify instance and one watch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::events::WatchEvent;
use super::registry::lock;
use crate::error::{Result, TailError};

struct Subscriber {
    id: u64,
    events: UnboundedSender<WatchEvent>,
    errors: UnboundedSender<Arc<notify::Error>>,
}

#[derive(Default)]
struct Route {
    subscribers: Vec<Subscriber>,
    /// An OS watch exists for this exact path.
    registered: bool,
}

type RouteTable = Mutex<HashMap<PathBuf, Route>>;

struct HubInner {
    watcher: Mutex<RecommendedWatcher>,
    routes: Arc<RouteTable>,
    next_id: AtomicU64,
}

impl HubInner {
    fn unsubscribe(&self, path: &Path, id: u64) {
        let unwatch = {
            let mut routes = lock(&self.routes);
            let Some(route) = routes.get_mut(path) else {
                return;
            };
            route.subscribers.retain(|sub| sub.id != id);
            if !route.subscribers.is_empty() {
                return;
            }
            routes.remove(path).map_or(false, |route| route.registered)
        };

        if unwatch {
            // notify drops watches on deleted paths by itself.
            if let Err(err) = lock(&self.watcher).unwatch(path) {
                tracing::debug!("Released watch on {}: {}", path.display(), err);
            }
        }
    }
}

/// Runs on notify's event thread.
fn dispatch(routes: &RouteTable, res: notify::Result<notify::Event>) {
    let routes = lock(routes);
    match res {
        Ok(event) => {
            let event = WatchEvent::from(event);
            for sub in subscribers_for(&routes, &event.paths) {
                // A closed receiver belongs to a task that is unsubscribing.
                let _ = sub.events.send(event.clone());
            }
        }
        Err(err) => {
            let targets: Vec<&Subscriber> = if err.paths.is_empty() {
                routes.values().flat_map(|route| &route.subscribers).collect()
            } else {
                subscribers_for(&routes, &err.paths)
            };
            if targets.is_empty() {
                tracing::warn!("Unrouted watch error: {}", err);
                return;
            }
            let err = Arc::new(err);
            for sub in targets {
                let _ = sub.errors.send(Arc::clone(&err));
            }
        }
    }
}

/// Subscribers of each path and of its parent directory, each at most once.
fn subscribers_for<'a>(routes: &'a HashMap<PathBuf, Route>, paths: &[PathBuf]) -> Vec<&'a Subscriber> {
    let mut found: Vec<&Subscriber> = Vec::new();
    for path in paths {
        let exact = routes.get(path.as_path());
        let parent = path.parent().and_then(|parent| routes.get(parent));
        for route in exact.into_iter().chain(parent) {
            for sub in &route.subscribers {
                if !found.iter().any(|seen| seen.id == sub.id) {
                    found.push(sub);
                }
            }
        }
    }
    found
}

/// Handle to the shared watcher. Cloning is cheap.
#[derive(Clone)]
pub struct WatchHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHub")
            .field("routes", &lock(&self.inner.routes).len())
            .finish()
    }
}

impl WatchHub {
    pub fn new() -> Result<Self> {
        let routes: Arc<RouteTable> = Arc::default();
        let table = Arc::clone(&routes);
        let watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| dispatch(&table, res))
                .map_err(TailError::Watcher)?;

        Ok(Self {
            inner: Arc::new(HubInner {
                watcher: Mutex::new(watcher),
                routes,
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Start receiving events for `path`.
    ///
    /// Fails when `path` does not exist or the OS refuses the watch. No OS
    /// watch is added when `path` or its parent directory already has one.
    pub fn subscribe<P: AsRef<Path>>(&self, path: P, mode: RecursiveMode) -> Result<PathWatcher> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(TailError::Watch {
                source: notify::Error::path_not_found().add_path(path.clone()),
                path,
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (event_tx, events) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();

        let covered = {
            let mut routes = lock(&self.inner.routes);
            let covered = routes.get(&path).map_or(false, |route| route.registered)
                || path
                    .parent()
                    .and_then(|parent| routes.get(parent))
                    .map_or(false, |route| route.registered);
            routes.entry(path.clone()).or_default().subscribers.push(Subscriber {
                id,
                events: event_tx,
                errors: error_tx,
            });
            covered
        };

        if !covered {
            // The route lock is not held here: notify's thread takes it to
            // dispatch while `watch` waits on that same thread.
            let result = lock(&self.inner.watcher).watch(&path, mode);
            if let Err(source) = result {
                self.inner.unsubscribe(&path, id);
                return Err(TailError::Watch { path, source });
            }
            if let Some(route) = lock(&self.inner.routes).get_mut(&path) {
                route.registered = true;
            }
        }

        Ok(PathWatcher {
            hub: Arc::clone(&self.inner),
            id,
            path,
            events,
            errors,
        })
    }

    /// Number of paths with an OS watch of their own.
    pub fn registered_len(&self) -> usize {
        lock(&self.inner.routes)
            .values()
            .filter(|route| route.registered)
            .count()
    }
}

/// One subscription on the shared watcher.
///
/// Dropping it unsubscribes, and releases the OS watch once nobody else
/// is subscribed to the path.
pub struct PathWatcher {
    hub: Arc<HubInner>,
    id: u64,
    path: PathBuf,
    events: UnboundedReceiver<WatchEvent>,
    errors: UnboundedReceiver<Arc<notify::Error>>,
}

impl std::fmt::Debug for PathWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathWatcher")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

impl PathWatcher {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next event or asynchronous watch error.
    ///
    /// Returns `None` once either channel is closed. Cancel safe.
    pub async fn next(&mut self) -> Option<WatchSignal> {
        tokio::select! {
            event = self.events.recv() => event.map(WatchSignal::Event),
            err = self.errors.recv() => err.map(WatchSignal::Error),
        }
    }
}

impl Drop for PathWatcher {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.path, self.id);
    }
}

#[derive(Debug)]
pub enum WatchSignal {
    Event(WatchEvent),
    Error(Arc<notify::Error>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::WatchEventKind;
    use std::time::Duration;

    async fn wait_for_kind(watcher: &mut PathWatcher, kind: WatchEventKind) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(signal) = watcher.next().await {
                if let WatchSignal::Event(event) = signal {
                    if event.kind == kind {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    #[test]
    fn test_watch_missing_path_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.log");
        let hub = WatchHub::new().unwrap();

        let err = hub.subscribe(&missing, RecursiveMode::NonRecursive).unwrap_err();
        assert!(matches!(err, TailError::Watch { ref path, .. } if *path == missing));
        assert_eq!(hub.registered_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_produces_modified_event() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.log");
        std::fs::write(&file, "").unwrap();

        let hub = WatchHub::new().unwrap();
        let mut watcher = hub.subscribe(&file, RecursiveMode::NonRecursive).unwrap();
        assert_eq!(watcher.path(), file.as_path());

        std::fs::write(&file, "line\n").unwrap();

        assert!(
            wait_for_kind(&mut watcher, WatchEventKind::Modified).await,
            "expected a modified event for {}",
            file.display()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_children_share_the_directory_watch() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let a = root.join("a.log");
        let b = root.join("b.log");
        std::fs::write(&a, "").unwrap();
        std::fs::write(&b, "").unwrap();

        let hub = WatchHub::new().unwrap();
        let mut directory = hub.subscribe(&root, RecursiveMode::NonRecursive).unwrap();
        let mut tail_a = hub.subscribe(&a, RecursiveMode::NonRecursive).unwrap();
        let _tail_b = hub.subscribe(&b, RecursiveMode::NonRecursive).unwrap();
        assert_eq!(hub.registered_len(), 1);

        std::fs::write(&a, "line\n").unwrap();
        assert!(wait_for_kind(&mut tail_a, WatchEventKind::Modified).await);
        assert!(wait_for_kind(&mut directory, WatchEventKind::Modified).await);

        std::fs::write(root.join("c.log"), "").unwrap();
        assert!(wait_for_kind(&mut directory, WatchEventKind::Created).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_last_subscriber_releases_the_watch() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.log");
        std::fs::write(&file, "").unwrap();

        let hub = WatchHub::new().unwrap();
        let first = hub.subscribe(&file, RecursiveMode::NonRecursive).unwrap();
        let mut second = hub.subscribe(&file, RecursiveMode::NonRecursive).unwrap();
        assert_eq!(hub.registered_len(), 1);

        drop(first);
        assert_eq!(hub.registered_len(), 1);
        std::fs::write(&file, "still routed\n").unwrap();
        assert!(wait_for_kind(&mut second, WatchEventKind::Modified).await);

        drop(second);
        assert_eq!(hub.registered_len(), 0);
    }
}
