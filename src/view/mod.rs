//! Projection of the patch store into tree nodes.
//!
//! Nothing here draws; `ui` turns nodes into widgets.

pub mod files;
pub mod patches;
pub mod time;
pub mod tooltip;

pub use files::{FileChange, Snapshots};
pub use patches::{PatchesView, RootChildren};

/// Semantic color of an icon, mapped to a palette by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Muted,
    Green,
    Yellow,
    Red,
    Purple,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icon {
    pub glyph: &'static str,
    pub tone: Tone,
}

impl Icon {
    pub const fn new(glyph: &'static str, tone: Tone) -> Self {
        Self { glyph, tone }
    }
}

/// What activating a node does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    /// Retry the failed fetch
    Refresh,
    /// Expand or collapse the patch's file changes
    Patch { id: String },
    OpenDiff(FileChange),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub label: String,
    pub description: Option<String>,
    /// Markdown
    pub tooltip: Option<String>,
    pub icon: Option<Icon>,
    pub collapsible: bool,
    pub action: Action,
}

impl TreeNode {
    /// Plain informational leaf
    pub fn info(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
            tooltip: None,
            icon: Some(Icon::new("ℹ", Tone::Blue)),
            collapsible: false,
            action: Action::None,
        }
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn patch_id(&self) -> Option<&str> {
        match &self.action {
            Action::Patch { id } => Some(id),
            _ => None,
        }
    }
}
