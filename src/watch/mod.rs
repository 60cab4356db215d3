use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Events emitted by the repository watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WatchEvent {
    /// HEAD or branch configuration moved; the upstream may differ
    HeadChanged,
    /// A config file was written
    ConfigChanged,
}

/// Files inside the git dir whose writes can change the checked-out upstream
const GIT_FILES: [&str; 2] = ["HEAD", "config"];

/// Map a changed path to the event it stands for
pub fn classify(path: &Path, git_dir: &Path, config_files: &[PathBuf]) -> Option<WatchEvent> {
    if config_files.iter().any(|c| c == path) {
        return Some(WatchEvent::ConfigChanged);
    }
    let name = path.file_name()?.to_str()?;
    if path.parent() == Some(git_dir) && GIT_FILES.contains(&name) {
        return Some(WatchEvent::HeadChanged);
    }
    None
}

/// A debounced watcher over the git dir and the config files
pub struct RepoWatcher {
    _watcher: notify_debouncer_mini::Debouncer<RecommendedWatcher>,
}

impl RepoWatcher {
    /// Start watching. Events are debounced by `debounce_ms` milliseconds
    /// and deduplicated per batch.
    pub fn new(
        git_dir: &Path,
        config_files: Vec<PathBuf>,
        debounce_ms: u64,
        tx: UnboundedSender<WatchEvent>,
    ) -> Result<Self> {
        let owned_git_dir = git_dir.to_path_buf();
        let files = config_files.clone();
        let mut debouncer = new_debouncer(
            Duration::from_millis(debounce_ms),
            move |result: std::result::Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match result {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("file watcher error: {}", e);
                        return;
                    }
                };
                let kinds: BTreeSet<WatchEvent> = events
                    .iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any)
                    .filter_map(|e| classify(&e.path, &owned_git_dir, &files))
                    .collect();
                for kind in kinds {
                    debug!(?kind, "watch event");
                    // Receiver is gone once the UI loop exits
                    let _ = tx.send(kind);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(git_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", git_dir.display()))?;

        // Config files may not exist yet, so watch their directories
        let dirs: BTreeSet<&Path> = config_files.iter().filter_map(|f| f.parent()).collect();
        for dir in dirs {
            if dir.is_dir() {
                debouncer.watcher().watch(dir, RecursiveMode::NonRecursive)?;
            }
        }

        Ok(RepoWatcher {
            _watcher: debouncer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_git_and_config_paths() {
        let git_dir = Path::new("/repo/.git");
        let configs = vec![
            PathBuf::from("/repo/.radicle-patches.toml"),
            PathBuf::from("/home/u/.config/radicle-patches/config.toml"),
        ];
        assert_eq!(
            classify(Path::new("/repo/.git/HEAD"), git_dir, &configs),
            Some(WatchEvent::HeadChanged)
        );
        assert_eq!(
            classify(Path::new("/repo/.git/config"), git_dir, &configs),
            Some(WatchEvent::HeadChanged)
        );
        assert_eq!(
            classify(Path::new("/repo/.radicle-patches.toml"), git_dir, &configs),
            Some(WatchEvent::ConfigChanged)
        );
        assert_eq!(classify(Path::new("/repo/.git/index"), git_dir, &configs), None);
        assert_eq!(classify(Path::new("/repo/.git/refs/HEAD"), git_dir, &configs), None);
        assert_eq!(classify(Path::new("/repo/src/config"), git_dir, &configs), None);
    }
}
