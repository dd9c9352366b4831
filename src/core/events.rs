use std::path::PathBuf;

use notify::event::ModifyKind;
use notify::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    /// File content changed. Metadata-only changes are not reported as this.
    Modified,
    Removed,
    Other,
}

impl From<&EventKind> for WatchEventKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => WatchEventKind::Created,
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                WatchEventKind::Modified
            }
            EventKind::Remove(_) => WatchEventKind::Removed,
            _ => WatchEventKind::Other,
        }
    }
}

/// A file-system change narrowed down to what the tail tasks care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub paths: Vec<PathBuf>,
}

impl From<notify::Event> for WatchEvent {
    fn from(event: notify::Event) -> Self {
        Self {
            kind: WatchEventKind::from(&event.kind),
            paths: event.paths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            WatchEventKind::from(&EventKind::Create(CreateKind::File)),
            WatchEventKind::Created
        );
        assert_eq!(
            WatchEventKind::from(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            WatchEventKind::Modified
        );
        assert_eq!(
            WatchEventKind::from(&EventKind::Modify(ModifyKind::Any)),
            WatchEventKind::Modified
        );
        assert_eq!(
            WatchEventKind::from(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            WatchEventKind::Other
        );
        assert_eq!(
            WatchEventKind::from(&EventKind::Remove(RemoveKind::File)),
            WatchEventKind::Removed
        );
    }

    #[test]
    fn test_from_notify_event_keeps_paths() {
        let event = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/logs/b.log"));
        let event = WatchEvent::from(event);

        assert_eq!(event.kind, WatchEventKind::Created);
        assert_eq!(event.paths, vec![PathBuf::from("/logs/b.log")]);
    }
}
