use super::files::{diff_failed_node, file_nodes, Snapshots};
use super::{time, tooltip, Action, Icon, Tone, TreeNode};
use crate::error::StoreError;
use crate::patch::{shorten_hash, AugmentedPatch, PatchState, Timestamp};
use crate::store::{now_secs, PatchStore, SharedPatch};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry delay per consecutive failed load
pub const RETRY_STEP: Duration = Duration::from_secs(3);

pub const NO_REPOSITORY_LABEL: &str = "No Radicle repository is open here";
pub const FETCH_FAILED_LABEL: &str = "Unable to fetch patches. Select to retry.";
pub const EMPTY_LABEL: &str = "0 patches";

/// Top-level nodes plus, after a failed load, when to try again
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RootChildren {
    pub nodes: Vec<TreeNode>,
    pub retry_after: Option<Duration>,
    /// Patch the nodes mark as checked out
    pub checked_out: Option<String>,
}

impl RootChildren {
    fn leaf(node: TreeNode) -> Self {
        Self {
            nodes: vec![node],
            ..Self::default()
        }
    }
}

/// Icon for a patch state. Every state must be listed.
pub fn status_icon(state: &PatchState) -> Icon {
    match state {
        PatchState::Draft => Icon::new("◌", Tone::Muted),
        PatchState::Open { .. } => Icon::new("●", Tone::Green),
        PatchState::Archived => Icon::new("▣", Tone::Yellow),
        PatchState::Merged { .. } => Icon::new("✔", Tone::Purple),
    }
}

/// Bucket by status (draft, open, archived, merged), newest activity first
/// within each bucket.
pub fn order_patches(patches: Vec<SharedPatch>) -> Vec<SharedPatch> {
    let mut keyed: Vec<_> = patches
        .into_iter()
        .map(|p| {
            let key = {
                let guard = p.read();
                (guard.status(), Reverse(guard.last_activity()))
            };
            (key, p)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, p)| p).collect()
}

pub struct PatchesView {
    store: PatchStore,
    snapshots: Snapshots,
    /// Consecutive failed root loads
    failures: AtomicU32,
    clock: fn() -> Timestamp,
}

impl PatchesView {
    pub fn new(store: PatchStore, snapshots: Snapshots) -> Self {
        Self::with_clock(store, snapshots, now_secs)
    }

    pub fn with_clock(store: PatchStore, snapshots: Snapshots, clock: fn() -> Timestamp) -> Self {
        Self {
            store,
            snapshots,
            failures: AtomicU32::new(0),
            clock,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &PatchStore {
        &self.store
    }

    #[cfg(test)]
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    pub async fn root_children(&self) -> RootChildren {
        if self.store.rid().await.is_none() {
            return RootChildren::leaf(TreeNode::info(NO_REPOSITORY_LABEL));
        }

        let mut init = self.store.init_store_if_needed().await;
        // A reset dropped the fetch we waited on; start over with a fresh one
        while matches!(init, Err(StoreError::Superseded)) {
            debug!("patch load superseded by a reset; fetching again");
            init = self.store.init_store_if_needed().await;
        }
        let Some(patches) = self.store.patches() else {
            let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
            let retry_after = RETRY_STEP * failures;
            let mut node = TreeNode::info(FETCH_FAILED_LABEL).with_action(Action::Refresh);
            node.icon = Some(Icon::new("⟳", Tone::Red));
            if let Err(e) = init {
                warn!(failures, "patch load failed: {}", e);
                node = node.with_tooltip(e.to_string());
            }
            debug!(retry_in_secs = retry_after.as_secs(), "scheduling patch reload");
            return RootChildren {
                retry_after: Some(retry_after),
                ..RootChildren::leaf(node)
            };
        };
        self.failures.store(0, Ordering::Relaxed);

        if patches.is_empty() {
            return RootChildren::leaf(TreeNode::info(EMPTY_LABEL));
        }

        let checked_out = self.store.checked_out_id();
        let nodes = order_patches(patches)
            .iter()
            .map(|p| {
                let patch = p.read();
                let is_checked_out = checked_out.as_deref() == Some(patch.id.as_str());
                self.patch_node(&patch, is_checked_out)
            })
            .collect();
        RootChildren {
            nodes,
            retry_after: None,
            checked_out,
        }
    }

    pub fn patch_node(&self, patch: &AugmentedPatch, checked_out: bool) -> TreeNode {
        let now = (self.clock)();
        let label = if checked_out {
            format!("[✓] {}", patch.title)
        } else {
            patch.title.clone()
        };
        let description = format!(
            "{} · {} · {}",
            time::relative(patch.last_activity(), now),
            patch.activity_identity().display_name(),
            shorten_hash(&patch.id)
        );
        TreeNode {
            label,
            description: Some(description),
            tooltip: Some(tooltip::patch_tooltip(patch, checked_out, now)),
            icon: Some(status_icon(&patch.state)),
            collapsible: true,
            action: Action::Patch {
                id: patch.id.clone(),
            },
        }
    }

    /// Recompute the node of a single patch after it changed in the store
    pub fn refresh_patch_node(&self, id: &str) -> Option<TreeNode> {
        let entry = self.store.find_patch_by_id(id)?;
        let checked_out = self.store.checked_out_id();
        let patch = entry.read();
        let is_checked_out = checked_out.as_deref() == Some(patch.id.as_str());
        Some(self.patch_node(&patch, is_checked_out))
    }

    /// File changes of the patch's latest revision
    pub async fn patch_children(&self, id: &str) -> Vec<TreeNode> {
        let Some(entry) = self.store.find_patch_by_id(id) else {
            return vec![TreeNode::info("This patch is no longer available")];
        };
        let (base, oid) = {
            let patch = entry.read();
            let latest = patch.latest_revision();
            (latest.base.clone(), latest.oid.clone())
        };

        let diff = match self.store.fetch_diff(&base, &oid).await {
            Ok(diff) => diff,
            Err(e) => return vec![diff_failed_node(&e)],
        };
        match self.snapshots.materialize(&diff, &base, &oid).await {
            Ok(changes) if changes.is_empty() => vec![TreeNode::info("No files changed")],
            Ok(changes) => file_nodes(&changes),
            Err(e) => vec![diff_failed_node(&format!("{e:#}"))],
        }
    }
}
