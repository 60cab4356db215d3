use crate::config::RpvConfig;
use crate::httpd::types::RepoInfo;
use crate::view::{Action, FileChange, RootChildren, TreeNode};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

/// One visible line of the flattened tree
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub depth: usize,
    pub node: TreeNode,
    pub expanded: bool,
    /// Patch the row belongs to (itself for patch rows)
    pub patch_id: Option<String>,
}

pub struct App {
    pub repo_root: PathBuf,

    /// Repository metadata from httpd, once known
    pub repo: Option<RepoInfo>,

    /// Top-level nodes as last projected
    roots: Vec<TreeNode>,

    /// Loaded file-change nodes per patch id
    children: HashMap<String, Vec<TreeNode>>,

    expanded: HashSet<String>,

    /// Patches whose children are being fetched
    loading: HashSet<String>,

    /// A root load is in flight
    pub root_loading: bool,

    /// Flattened view of `roots` + expanded children
    pub rows: Vec<Row>,

    pub selected: usize,

    /// Show the tooltip pane next to the tree
    pub show_detail: bool,

    pub should_quit: bool,

    /// Status bar message
    pub notification: Option<String>,

    /// Ticks since the message was shown (for auto-clearing)
    notification_ticks: u8,

    /// When a failed root load should be retried
    pub retry_at: Option<Instant>,

    /// Patch currently marked as checked out in the tree
    pub checked_out: Option<String>,

    pub config: RpvConfig,
}

impl App {
    pub fn new(repo_root: PathBuf, config: RpvConfig) -> Self {
        Self {
            repo_root,
            repo: None,
            roots: Vec::new(),
            children: HashMap::new(),
            expanded: HashSet::new(),
            loading: HashSet::new(),
            root_loading: false,
            rows: Vec::new(),
            selected: 0,
            show_detail: config.display.show_tooltip,
            should_quit: false,
            notification: None,
            notification_ticks: 0,
            retry_at: None,
            checked_out: None,
            config,
        }
    }

    /// Display name for the top bar: httpd name, else the directory name
    pub fn repo_label(&self) -> String {
        if let Some(repo) = &self.repo {
            return repo.name.clone();
        }
        self.repo_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.repo_root.display().to_string())
    }

    pub fn patch_count(&self) -> usize {
        self.roots.iter().filter(|n| n.patch_id().is_some()).count()
    }

    // ── Tree updates ──

    /// Replace the top level. Cached children of patches that are gone are
    /// dropped; the selection follows the previously selected patch.
    pub fn set_roots(&mut self, root: RootChildren) {
        let keep = self.selected_row().and_then(|r| r.patch_id.clone());
        self.root_loading = false;
        self.retry_at = root.retry_after.map(|d| Instant::now() + d);
        self.checked_out = root.checked_out;
        self.roots = root.nodes;

        let ids: HashSet<String> = self
            .roots
            .iter()
            .filter_map(|n| n.patch_id().map(str::to_string))
            .collect();
        self.children.retain(|id, _| ids.contains(id));
        self.expanded.retain(|id| ids.contains(id));
        self.loading.retain(|id| ids.contains(id));

        self.rebuild_rows();
        if let Some(id) = keep {
            self.select_patch(&id);
        }
        self.clamp_selection();
    }

    pub fn set_children(&mut self, id: &str, nodes: Vec<TreeNode>) {
        self.loading.remove(id);
        self.children.insert(id.to_string(), nodes);
        self.rebuild_rows();
    }

    /// Swap in a recomputed patch node, leaving the rest of the tree alone.
    /// `None` if the patch is not in the tree; otherwise whether it is
    /// expanded and its children must be loaded again.
    pub fn replace_patch_node(&mut self, node: TreeNode) -> Option<bool> {
        let id = node.patch_id()?.to_string();
        let slot = self
            .roots
            .iter_mut()
            .find(|n| n.patch_id() == Some(id.as_str()))?;
        *slot = node;
        self.children.remove(&id);
        let reload = self.expanded.contains(&id);
        if reload {
            self.loading.insert(id);
        }
        self.rebuild_rows();
        Some(reload)
    }

    /// Expand or collapse the selected patch. Returns the id whose children
    /// must be fetched, if any.
    pub fn toggle_selected(&mut self) -> Option<String> {
        let id = match &self.selected_row()?.node.action {
            Action::Patch { id } => id.clone(),
            _ => return None,
        };
        if self.expanded.remove(&id) {
            self.rebuild_rows();
            return None;
        }
        self.expanded.insert(id.clone());
        let needs_load = !self.children.contains_key(&id) && self.loading.insert(id.clone());
        self.rebuild_rows();
        needs_load.then_some(id)
    }

    /// Collapse the patch the selection belongs to and select it
    pub fn collapse_selected(&mut self) {
        let Some(id) = self.selected_row().and_then(|r| r.patch_id.clone()) else {
            return;
        };
        if self.expanded.remove(&id) {
            self.rebuild_rows();
        }
        self.select_patch(&id);
    }

    /// Drop every cached child list (e.g. after the store was reset)
    pub fn clear_children(&mut self) {
        self.children.clear();
        self.loading.clear();
        self.expanded.clear();
        self.rebuild_rows();
    }

    fn rebuild_rows(&mut self) {
        let mut rows = Vec::with_capacity(self.roots.len());
        for node in &self.roots {
            let id = node.patch_id().map(str::to_string);
            let expanded = id.as_ref().is_some_and(|id| self.expanded.contains(id));
            rows.push(Row {
                depth: 0,
                node: node.clone(),
                expanded,
                patch_id: id.clone(),
            });
            let Some(id) = id.filter(|_| expanded) else {
                continue;
            };
            match self.children.get(&id) {
                Some(children) => {
                    for child in children {
                        rows.push(Row {
                            depth: 1,
                            node: child.clone(),
                            expanded: false,
                            patch_id: Some(id.clone()),
                        });
                    }
                }
                None => rows.push(Row {
                    depth: 1,
                    node: TreeNode::info("Loading…"),
                    expanded: false,
                    patch_id: Some(id.clone()),
                }),
            }
        }
        self.rows = rows;
        self.clamp_selection();
    }

    // ── Selection ──

    pub fn selected_row(&self) -> Option<&Row> {
        self.rows.get(self.selected)
    }

    pub fn selected_patch_id(&self) -> Option<&str> {
        self.selected_row()?.patch_id.as_deref()
    }

    pub fn selected_file(&self) -> Option<&FileChange> {
        match &self.selected_row()?.node.action {
            Action::OpenDiff(change) => Some(change),
            _ => None,
        }
    }

    pub fn next(&mut self) {
        if self.selected + 1 < self.rows.len() {
            self.selected += 1;
        }
    }

    pub fn prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn select_patch(&mut self, id: &str) {
        if let Some(pos) = self
            .rows
            .iter()
            .position(|r| r.depth == 0 && r.patch_id.as_deref() == Some(id))
        {
            self.selected = pos;
        }
    }

    fn clamp_selection(&mut self) {
        if self.selected >= self.rows.len() {
            self.selected = self.rows.len().saturating_sub(1);
        }
    }

    // ── Notifications ──

    pub fn notify(&mut self, msg: &str) {
        self.notification = Some(msg.to_string());
        self.notification_ticks = 0;
    }

    /// Tick called on every loop iteration, used for notification auto-clear
    pub fn tick(&mut self) {
        if self.notification.is_some() {
            self.notification_ticks += 1;
            if self.notification_ticks > 30 {
                self.notification = None;
                self.notification_ticks = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::files::ChangeKind;

    fn patch_node(id: &str) -> TreeNode {
        TreeNode {
            label: format!("Patch {id}"),
            description: None,
            tooltip: None,
            icon: None,
            collapsible: true,
            action: Action::Patch { id: id.to_string() },
        }
    }

    fn file_node(path: &str) -> TreeNode {
        TreeNode {
            label: path.to_string(),
            description: None,
            tooltip: None,
            icon: None,
            collapsible: false,
            action: Action::OpenDiff(FileChange {
                kind: ChangeKind::Modified,
                path: path.to_string(),
                old_path: None,
                old_file: None,
                new_file: None,
            }),
        }
    }

    fn app_with(ids: &[&str]) -> App {
        let mut app = App::new(PathBuf::from("/tmp/repo"), RpvConfig::default());
        app.set_roots(RootChildren {
            nodes: ids.iter().map(|id| patch_node(id)).collect(),
            ..RootChildren::default()
        });
        app
    }

    fn labels(app: &App) -> Vec<String> {
        app.rows.iter().map(|r| r.node.label.clone()).collect()
    }

    #[test]
    fn expanding_requests_children_once() {
        let mut app = app_with(&["a", "b"]);
        assert_eq!(app.toggle_selected(), Some("a".to_string()));
        assert_eq!(labels(&app), vec!["Patch a", "Loading…", "Patch b"]);

        app.set_children("a", vec![file_node("x.rs"), file_node("y.rs")]);
        assert_eq!(labels(&app), vec!["Patch a", "x.rs", "y.rs", "Patch b"]);

        // Collapse then expand again: cached
        assert_eq!(app.toggle_selected(), None);
        assert_eq!(labels(&app), vec!["Patch a", "Patch b"]);
        assert_eq!(app.toggle_selected(), None);
        assert_eq!(app.rows.len(), 4);
    }

    #[test]
    fn file_rows_know_their_patch() {
        let mut app = app_with(&["a"]);
        app.toggle_selected();
        app.set_children("a", vec![file_node("x.rs")]);
        app.next();
        assert_eq!(app.selected_patch_id(), Some("a"));
        assert_eq!(app.selected_file().unwrap().path, "x.rs");

        app.collapse_selected();
        assert_eq!(app.selected, 0);
        assert_eq!(app.rows.len(), 1);
    }

    #[test]
    fn replacing_a_node_touches_only_that_patch() {
        let mut app = app_with(&["a", "b"]);
        app.toggle_selected();
        app.set_children("a", vec![file_node("x.rs")]);

        let mut renamed = patch_node("b");
        renamed.label = "Renamed".into();
        assert_eq!(app.replace_patch_node(renamed), Some(false));
        assert_eq!(labels(&app), vec!["Patch a", "x.rs", "Renamed"]);

        let mut changed = patch_node("a");
        changed.label = "Changed".into();
        assert_eq!(app.replace_patch_node(changed), Some(true));
        assert_eq!(labels(&app), vec!["Changed", "Loading…", "Renamed"]);

        assert_eq!(app.replace_patch_node(patch_node("unknown")), None);
    }

    #[test]
    fn new_roots_keep_selection_and_drop_stale_children() {
        let mut app = app_with(&["a", "b"]);
        app.next();
        app.toggle_selected();
        app.set_children("b", vec![file_node("x.rs")]);

        app.set_roots(RootChildren {
            nodes: vec![patch_node("c"), patch_node("b")],
            checked_out: Some("b".into()),
            ..RootChildren::default()
        });
        assert_eq!(app.selected_patch_id(), Some("b"));
        assert_eq!(app.checked_out.as_deref(), Some("b"));
        assert_eq!(labels(&app), vec!["Patch c", "Patch b", "x.rs"]);

        app.set_roots(RootChildren {
            nodes: vec![TreeNode::info("0 patches")],
            retry_after: Some(std::time::Duration::from_secs(3)),
            checked_out: None,
        });
        assert_eq!(app.selected, 0);
        assert!(app.retry_at.is_some());
        assert!(app.checked_out.is_none());
        assert_eq!(app.patch_count(), 0);
    }

    #[test]
    fn notifications_expire() {
        let mut app = app_with(&[]);
        app.notify("hello");
        for _ in 0..30 {
            app.tick();
        }
        assert!(app.notification.is_some());
        app.tick();
        assert!(app.notification.is_none());
    }
}
