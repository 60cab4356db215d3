//! File-change children of a patch node.
//!
//! Both sides of each change are written to disk so an external diff tool
//! can open them. Paths are deterministic:
//! `<root>/<short commit>/<relative path>`, with `<root>/empty` standing in
//! for the missing side of an added or deleted file.

use super::{Action, Icon, Tone, TreeNode};
use crate::httpd::types::{DiffResponse, FileRef};
use crate::patch::shorten_hash;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Name of the shared empty placeholder under the snapshot root
pub const PLACEHOLDER_FILE: &str = "empty";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    Moved,
    Copied,
}

impl ChangeKind {
    fn icon(&self) -> Icon {
        match self {
            ChangeKind::Added => Icon::new("+", Tone::Green),
            ChangeKind::Deleted => Icon::new("-", Tone::Red),
            ChangeKind::Modified => Icon::new("~", Tone::Yellow),
            ChangeKind::Moved => Icon::new("R", Tone::Yellow),
            ChangeKind::Copied => Icon::new("C", Tone::Yellow),
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Modified => "modified",
            ChangeKind::Moved => "moved",
            ChangeKind::Copied => "copied",
        }
    }
}

/// One changed file, with snapshot paths when content was available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub kind: ChangeKind,
    /// Path after the change
    pub path: String,
    /// Source path of a move or copy
    pub old_path: Option<String>,
    pub old_file: Option<PathBuf>,
    pub new_file: Option<PathBuf>,
}

impl FileChange {
    /// Both sides to hand to a diff tool; moves and copies have none
    pub fn snapshot_pair(&self) -> Option<(&Path, &Path)> {
        Some((self.old_file.as_deref()?, self.new_file.as_deref()?))
    }
}

/// Writes file snapshots below a root directory
#[derive(Debug, Clone)]
pub struct Snapshots {
    root: PathBuf,
}

impl Snapshots {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn placeholder(&self) -> PathBuf {
        self.root.join(PLACEHOLDER_FILE)
    }

    /// `<root>/<short commit>/<path>`, or `None` when `path` would escape it
    pub fn path_for(&self, commit: &str, path: &str) -> Option<PathBuf> {
        let rel = Path::new(path);
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        Some(self.root.join(shorten_hash(commit)).join(rel))
    }

    async fn ensure_placeholder(&self) -> Result<PathBuf> {
        let path = self.placeholder();
        if tokio::fs::metadata(&path).await.is_err() {
            tokio::fs::create_dir_all(&self.root)
                .await
                .with_context(|| format!("Failed to create {}", self.root.display()))?;
            tokio::fs::write(&path, b"")
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(path)
    }

    /// Write one side of a change. Binary, missing, or unsafe entries fall
    /// back to the placeholder so the diff tool still opens.
    async fn write_side(&self, diff: &DiffResponse, commit: &str, path: &str, file: &FileRef) -> Result<PathBuf> {
        let (Some(target), Some(content)) = (self.path_for(commit, path), diff.content_of(file)) else {
            return self.ensure_placeholder().await;
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, content)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok(target)
    }

    /// Materialize every change of `diff` between `base` and `oid`.
    /// Returned changes are sorted by path.
    pub async fn materialize(&self, diff: &DiffResponse, base: &str, oid: &str) -> Result<Vec<FileChange>> {
        let mut changes = Vec::new();

        for file in &diff.diff.added {
            changes.push(FileChange {
                kind: ChangeKind::Added,
                path: file.path.clone(),
                old_path: None,
                old_file: Some(self.ensure_placeholder().await?),
                new_file: Some(self.write_side(diff, oid, &file.path, &file.new).await?),
            });
        }
        for file in &diff.diff.deleted {
            changes.push(FileChange {
                kind: ChangeKind::Deleted,
                path: file.path.clone(),
                old_path: None,
                old_file: Some(self.write_side(diff, base, &file.path, &file.old).await?),
                new_file: Some(self.ensure_placeholder().await?),
            });
        }
        for file in &diff.diff.modified {
            changes.push(FileChange {
                kind: ChangeKind::Modified,
                path: file.path.clone(),
                old_path: None,
                old_file: Some(self.write_side(diff, base, &file.path, &file.old).await?),
                new_file: Some(self.write_side(diff, oid, &file.path, &file.new).await?),
            });
        }
        for (kind, renames) in [
            (ChangeKind::Moved, &diff.diff.moved),
            (ChangeKind::Copied, &diff.diff.copied),
        ] {
            for file in renames {
                changes.push(FileChange {
                    kind,
                    path: file.new_path.clone(),
                    old_path: Some(file.old_path.clone()),
                    old_file: None,
                    new_file: None,
                });
            }
        }

        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changes)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Tree nodes for sorted changes. Files sharing a basename show their
/// directory so they can be told apart.
pub fn file_nodes(changes: &[FileChange]) -> Vec<TreeNode> {
    let mut basenames: HashMap<&str, usize> = HashMap::new();
    for change in changes {
        *basenames.entry(basename(&change.path)).or_default() += 1;
    }

    changes
        .iter()
        .map(|change| {
            let name = basename(&change.path);
            let duplicate = basenames.get(name).copied().unwrap_or(0) > 1;
            let description = match (&change.old_path, duplicate) {
                (Some(old), _) => Some(format!("from {old}")),
                (None, true) => Some(parent_dir(&change.path).to_string()).filter(|d| !d.is_empty()),
                (None, false) => None,
            };
            let tooltip = match &change.old_path {
                Some(old) => format!("{} → {} ({})", old, change.path, change.kind.verb()),
                None => format!("{} ({})", change.path, change.kind.verb()),
            };
            TreeNode {
                label: name.to_string(),
                description,
                tooltip: Some(tooltip),
                icon: Some(change.kind.icon()),
                collapsible: false,
                action: Action::OpenDiff(change.clone()),
            }
        })
        .collect()
}

/// Leaf shown instead of file changes when the diff cannot be loaded
pub fn diff_failed_node(err: &dyn std::fmt::Display) -> TreeNode {
    warn!("loading patch diff failed: {}", err);
    TreeNode::info("Unable to load the changed files of this patch")
        .with_tooltip(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::httpd::types::{AddedFile, DeletedFile, DiffBlob, ModifiedFile, RenamedFile};
    use tempfile::TempDir;

    const BASE: &str = "1111111aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const OID: &str = "2222222bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn file(oid: &str) -> FileRef {
        FileRef {
            oid: oid.to_string(),
            mode: "blob".to_string(),
        }
    }

    fn blob(content: &str) -> DiffBlob {
        DiffBlob {
            binary: false,
            content: Some(content.to_string()),
        }
    }

    fn change(path: &str) -> FileChange {
        FileChange {
            kind: ChangeKind::Modified,
            path: path.to_string(),
            old_path: None,
            old_file: None,
            new_file: None,
        }
    }

    fn sample_diff() -> DiffResponse {
        let mut diff = DiffResponse::default();
        diff.diff.modified.push(ModifiedFile {
            path: "src/lib.rs".into(),
            old: file("o1"),
            new: file("o2"),
        });
        diff.diff.added.push(AddedFile {
            path: "docs/new.md".into(),
            new: file("o3"),
        });
        diff.diff.deleted.push(DeletedFile {
            path: "old.txt".into(),
            old: file("o4"),
        });
        diff.diff.moved.push(RenamedFile {
            old_path: "a/x.rs".into(),
            new_path: "b/x.rs".into(),
        });
        diff.files.insert("o1".into(), blob("fn old() {}\n"));
        diff.files.insert("o2".into(), blob("fn new() {}\n"));
        diff.files.insert("o3".into(), blob("# New\n"));
        diff.files.insert("o4".into(), blob("gone\n"));
        diff
    }

    #[test]
    fn duplicate_basenames_show_their_directory() {
        let nodes = file_nodes(&[
            change("src/a/README.md"),
            change("src/a/main.ts"),
            change("src/b/README.md"),
        ]);
        assert_eq!(nodes[0].label, "README.md");
        assert_eq!(nodes[0].description.as_deref(), Some("src/a"));
        assert_eq!(nodes[1].label, "main.ts");
        assert_eq!(nodes[1].description, None);
        assert_eq!(nodes[2].description.as_deref(), Some("src/b"));
    }

    #[test]
    fn snapshot_paths_are_deterministic() {
        let snaps = Snapshots::new(PathBuf::from("/tmp/radicle"));
        assert_eq!(
            snaps.path_for(OID, "src/lib.rs"),
            Some(PathBuf::from("/tmp/radicle/2222222/src/lib.rs"))
        );
        assert_eq!(snaps.path_for(OID, "../escape"), None);
        assert_eq!(snaps.path_for(OID, "/etc/passwd"), None);
    }

    #[tokio::test]
    async fn materialize_writes_both_sides() {
        let dir = TempDir::new().unwrap();
        let snaps = Snapshots::new(dir.path().join("radicle"));
        let changes = snaps.materialize(&sample_diff(), BASE, OID).await.unwrap();

        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["b/x.rs", "docs/new.md", "old.txt", "src/lib.rs"]);

        let modified = &changes[3];
        let (old, new) = modified.snapshot_pair().unwrap();
        assert_eq!(old, dir.path().join("radicle/1111111/src/lib.rs"));
        assert_eq!(new, dir.path().join("radicle/2222222/src/lib.rs"));
        assert_eq!(std::fs::read_to_string(old).unwrap(), "fn old() {}\n");
        assert_eq!(std::fs::read_to_string(new).unwrap(), "fn new() {}\n");

        let placeholder = snaps.placeholder();
        let added = &changes[1];
        assert_eq!(added.old_file.as_deref(), Some(placeholder.as_path()));
        assert_eq!(std::fs::read_to_string(added.new_file.as_ref().unwrap()).unwrap(), "# New\n");
        let deleted = &changes[2];
        assert_eq!(deleted.new_file.as_deref(), Some(placeholder.as_path()));
        assert_eq!(std::fs::read(&placeholder).unwrap(), b"");

        let moved = &changes[0];
        assert_eq!(moved.kind, ChangeKind::Moved);
        assert!(moved.snapshot_pair().is_none());
    }

    #[tokio::test]
    async fn binary_side_uses_placeholder() {
        let dir = TempDir::new().unwrap();
        let snaps = Snapshots::new(dir.path().to_path_buf());
        let mut diff = DiffResponse::default();
        diff.diff.added.push(AddedFile {
            path: "logo.png".into(),
            new: file("bin"),
        });
        diff.files.insert(
            "bin".into(),
            DiffBlob {
                binary: true,
                content: None,
            },
        );
        let changes = snaps.materialize(&diff, BASE, OID).await.unwrap();
        assert_eq!(changes[0].new_file, Some(snaps.placeholder()));
    }

    #[test]
    fn renamed_files_describe_their_source() {
        let mut moved = change("b/x.rs");
        moved.kind = ChangeKind::Moved;
        moved.old_path = Some("a/x.rs".into());
        let nodes = file_nodes(&[moved]);
        assert_eq!(nodes[0].description.as_deref(), Some("from a/x.rs"));
        assert_eq!(nodes[0].tooltip.as_deref(), Some("a/x.rs → b/x.rs (moved)"));
    }
}
