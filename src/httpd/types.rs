use crate::patch::Patch;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `GET /`: service identity
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootInfo {
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub version: String,
    /// Absent on old httpd releases
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchCounts {
    #[serde(default)]
    pub draft: u64,
    #[serde(default)]
    pub open: u64,
    #[serde(default)]
    pub archived: u64,
    #[serde(default)]
    pub merged: u64,
}

/// `GET /repos/{rid}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub patches: PatchCounts,
}

/// An element of a patch listing. Malformed entries are kept aside so one
/// bad patch does not sink the whole listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListedPatch {
    Valid(Patch),
    Invalid(serde_json::Value),
}

/// Body of a successful `PATCH .../patches/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct MutationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub id: Option<String>,
}

// ── Diff ──

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileRef {
    pub oid: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddedFile {
    pub path: String,
    pub new: FileRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeletedFile {
    pub path: String,
    pub old: FileRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModifiedFile {
    pub path: String,
    pub old: FileRef,
    pub new: FileRef,
}

/// Moved and copied entries only carry the rename
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamedFile {
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Diff {
    #[serde(default)]
    pub added: Vec<AddedFile>,
    #[serde(default)]
    pub deleted: Vec<DeletedFile>,
    #[serde(default)]
    pub modified: Vec<ModifiedFile>,
    #[serde(default)]
    pub moved: Vec<RenamedFile>,
    #[serde(default)]
    pub copied: Vec<RenamedFile>,
}

/// Content of one blob referenced by the diff, keyed by OID in `files`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiffBlob {
    #[serde(default)]
    pub binary: bool,
    #[serde(default)]
    pub content: Option<String>,
}

/// `GET .../diff/{base}/{oid}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiffResponse {
    pub diff: Diff,
    #[serde(default)]
    pub files: HashMap<String, DiffBlob>,
}

impl DiffResponse {
    /// Text content of the blob a file reference points at. Binary or
    /// missing blobs yield `None`.
    pub fn content_of(&self, file: &FileRef) -> Option<&str> {
        let blob = self.files.get(&file.oid)?;
        if blob.binary {
            return None;
        }
        blob.content.as_deref()
    }
}
