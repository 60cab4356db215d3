pub mod cob;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Seconds since the Unix epoch
pub type Timestamp = i64;

/// Number of hex characters shown for commit hashes and patch ids
pub const SHORT_HASH_LEN: usize = 7;

// ── Identity ──

/// A Radicle node identity (`did:key:<nodeid>`) with its optional alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, alias: Option<&str>) -> Self {
        Self {
            id: id.into(),
            alias: alias.map(str::to_string),
        }
    }

    /// Alias when known, otherwise the shortened DID
    pub fn display_name(&self) -> String {
        match self.alias.as_deref() {
            Some(alias) if !alias.is_empty() => alias.to_string(),
            _ => shorten_did(&self.id),
        }
    }
}

/// `did:key:z6MkltRpzcq2ybm13yQpyre58JUeMvZY6toxoZVpLZ8YarsB` → `did:key:z6Mklt…8YarsB`
pub fn shorten_did(did: &str) -> String {
    let key = did.strip_prefix("did:key:").unwrap_or(did);
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return did.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("did:key:{head}…{tail}")
}

/// First seven characters of a commit hash or patch id
pub fn shorten_hash(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

// ── State ──

/// Patch status without the per-state payload. Declaration order is the
/// display priority used when bucketing patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchStatus {
    Draft,
    Open,
    Archived,
    Merged,
}

impl PatchStatus {
    pub const ALL: [PatchStatus; 4] = [
        PatchStatus::Draft,
        PatchStatus::Open,
        PatchStatus::Archived,
        PatchStatus::Merged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchStatus::Draft => "draft",
            PatchStatus::Open => "open",
            PatchStatus::Archived => "archived",
            PatchStatus::Merged => "merged",
        }
    }
}

impl fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PatchStatus::Draft),
            "open" => Ok(PatchStatus::Open),
            "archived" => Ok(PatchStatus::Archived),
            "merged" => Ok(PatchStatus::Merged),
            other => Err(format!("unknown patch status '{other}'")),
        }
    }
}

/// Lifecycle state as reported by the service.
///
/// Decoding an unknown `status` is an error: there is deliberately no
/// catch-all variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PatchState {
    Draft,
    Open {
        /// `(revision id, conflicting oid)` pairs
        #[serde(default)]
        conflicts: Vec<(String, String)>,
    },
    Archived,
    Merged {
        revision: String,
        commit: String,
    },
}

impl PatchState {
    pub fn status(&self) -> PatchStatus {
        match self {
            PatchState::Draft => PatchStatus::Draft,
            PatchState::Open { .. } => PatchStatus::Open,
            PatchState::Archived => PatchStatus::Archived,
            PatchState::Merged { .. } => PatchStatus::Merged,
        }
    }
}

// ── Discussion ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub name: String,
    pub content: String,
}

/// One entry in a description or comment edit history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub author: Identity,
    #[serde(default)]
    pub body: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CodeRange {
    Lines { range: LineRange },
    Chars { line: u64, range: LineRange },
}

/// Anchor of a comment or reaction inside a file of a given commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub commit: String,
    pub path: String,
    #[serde(default)]
    pub old: Option<CodeRange>,
    #[serde(default)]
    pub new: Option<CodeRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    #[serde(default)]
    pub authors: Vec<Identity>,
    #[serde(default)]
    pub location: Option<CodeLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author: Identity,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub edits: Vec<Edit>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub location: Option<CodeLocation>,
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub id: Option<String>,
    pub author: Identity,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub timestamp: Timestamp,
}

// ── Revision ──

/// One proposed version of a patch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub author: Identity,
    /// Markdown body. Derived from the earliest edit when edits are present.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub edits: Vec<Edit>,
    pub base: String,
    pub oid: String,
    #[serde(default)]
    pub refs: Vec<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default, alias = "discussion")]
    pub discussions: Vec<Comment>,
    pub timestamp: Timestamp,
}

impl Revision {
    /// Replace `description` with the body of the earliest-timestamped edit.
    fn normalize(&mut self) {
        let mut earliest: Option<&Edit> = None;
        for edit in &self.edits {
            if earliest.map_or(true, |e| edit.timestamp < e.timestamp) {
                earliest = Some(edit);
            }
        }
        if let Some(edit) = earliest {
            self.description = edit.body.clone();
        }
    }
}

/// Ordered, never-empty list of revisions.
///
/// Revisions are only ever appended, so the list can be validated once when
/// it is decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Revision>", into = "Vec<Revision>")]
pub struct Revisions(Vec<Revision>);

impl Revisions {
    pub fn new(revisions: Vec<Revision>) -> Option<Self> {
        if revisions.is_empty() {
            return None;
        }
        let mut revisions = revisions;
        revisions.iter_mut().for_each(Revision::normalize);
        Some(Self(revisions))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Revision> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Earliest by timestamp; the first inserted wins on ties
    pub fn first(&self) -> &Revision {
        let mut best = &self.0[0];
        for rev in &self.0[1..] {
            if rev.timestamp < best.timestamp {
                best = rev;
            }
        }
        best
    }

    /// Latest by timestamp; the last inserted wins on ties
    pub fn latest(&self) -> &Revision {
        let mut best = &self.0[0];
        for rev in &self.0[1..] {
            if rev.timestamp >= best.timestamp {
                best = rev;
            }
        }
        best
    }

    /// Ascending by timestamp, stable on ties
    pub fn sorted(&self) -> Vec<&Revision> {
        let mut sorted: Vec<&Revision> = self.0.iter().collect();
        sorted.sort_by_key(|r| r.timestamp);
        sorted
    }

    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.0.iter().find(|r| r.id == id)
    }
}

impl TryFrom<Vec<Revision>> for Revisions {
    type Error = String;

    fn try_from(revisions: Vec<Revision>) -> Result<Self, Self::Error> {
        Revisions::new(revisions).ok_or_else(|| "a patch must have at least one revision".to_string())
    }
}

impl From<Revisions> for Vec<Revision> {
    fn from(revisions: Revisions) -> Self {
        revisions.0
    }
}

// ── Patch ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merge {
    pub author: Identity,
    pub revision: String,
    pub commit: String,
    pub timestamp: Timestamp,
}

/// A proposed change under review; the aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub id: String,
    pub title: String,
    pub author: Identity,
    pub state: PatchState,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub merges: Vec<Merge>,
    #[serde(default)]
    pub assignees: Vec<String>,
    pub revisions: Revisions,
}

impl Patch {
    pub fn status(&self) -> PatchStatus {
        self.state.status()
    }

    pub fn first_revision(&self) -> &Revision {
        self.revisions.first()
    }

    pub fn latest_revision(&self) -> &Revision {
        self.revisions.latest()
    }

    /// Latest merge by timestamp; the last inserted wins on ties
    pub fn latest_merge(&self) -> Option<&Merge> {
        let mut best: Option<&Merge> = None;
        for merge in &self.merges {
            if best.map_or(true, |b| merge.timestamp >= b.timestamp) {
                best = Some(merge);
            }
        }
        best
    }

    /// Latest merge timestamp for merged patches, latest revision otherwise
    pub fn last_activity(&self) -> Timestamp {
        match (&self.state, self.latest_merge()) {
            (PatchState::Merged { .. }, Some(merge)) => merge.timestamp,
            _ => self.latest_revision().timestamp,
        }
    }

    /// Who to credit in summaries: the merger for merged patches, else the author
    pub fn activity_identity(&self) -> &Identity {
        match (&self.state, self.latest_merge()) {
            (PatchState::Merged { .. }, Some(merge)) => &merge.author,
            _ => &self.author,
        }
    }
}

/// A patch as held by the store, stamped with the time it was last fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentedPatch {
    #[serde(flatten)]
    pub patch: Patch,
    #[serde(default)]
    pub last_fetched: Option<Timestamp>,
}

impl AugmentedPatch {
    pub fn new(patch: Patch, last_fetched: Option<Timestamp>) -> Self {
        Self {
            patch,
            last_fetched,
        }
    }
}

impl std::ops::Deref for AugmentedPatch {
    type Target = Patch;

    fn deref(&self) -> &Patch {
        &self.patch
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn identity(alias: &str) -> Identity {
        Identity::new(
            format!("did:key:z6Mk{alias}0000000000000000000000000000000000000"),
            Some(alias),
        )
    }

    pub fn revision(id: &str, timestamp: Timestamp) -> Revision {
        Revision {
            id: id.to_string(),
            author: identity("alice"),
            description: format!("revision {id}"),
            edits: Vec::new(),
            base: format!("{id}base000000000000000000000000000000000"),
            oid: format!("{id}oid0000000000000000000000000000000000000"),
            refs: Vec::new(),
            reviews: Vec::new(),
            discussions: Vec::new(),
            timestamp,
        }
    }

    pub fn patch(id: &str, state: PatchState, revision_timestamps: &[Timestamp]) -> Patch {
        let revisions = revision_timestamps
            .iter()
            .enumerate()
            .map(|(i, ts)| revision(&format!("{id}r{i}"), *ts))
            .collect();
        Patch {
            id: id.to_string(),
            title: format!("Patch {id}"),
            author: identity("alice"),
            state,
            target: "delegates".to_string(),
            labels: BTreeSet::new(),
            merges: Vec::new(),
            assignees: Vec::new(),
            revisions: Revisions::new(revisions).expect("fixture needs revisions"),
        }
    }

    pub fn open() -> PatchState {
        PatchState::Open {
            conflicts: Vec::new(),
        }
    }

    pub fn merged() -> PatchState {
        PatchState::Merged {
            revision: "r".to_string(),
            commit: "c".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn revision_order_ignores_input_order() {
        let p = patch("abc", open(), &[30, 10, 20]);
        assert_eq!(p.first_revision().timestamp, 10);
        assert_eq!(p.latest_revision().timestamp, 30);
        let order: Vec<Timestamp> = p.revisions.sorted().iter().map(|r| r.timestamp).collect();
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[test]
    fn revision_ties_are_insertion_ordered() {
        let p = patch("abc", open(), &[5, 5, 5]);
        assert_eq!(p.first_revision().id, "abcr0");
        assert_eq!(p.latest_revision().id, "abcr2");
    }

    #[test]
    fn last_activity_uses_merge_for_merged_patches() {
        let mut p = patch("abc", merged(), &[50]);
        p.merges.push(Merge {
            author: identity("bob"),
            revision: "abcr0".into(),
            commit: "c".into(),
            timestamp: 100,
        });
        assert_eq!(p.last_activity(), 100);
        assert_eq!(p.activity_identity().display_name(), "bob");

        let open_patch = patch("def", open(), &[200, 150]);
        assert_eq!(open_patch.last_activity(), 200);
        assert_eq!(open_patch.activity_identity().display_name(), "alice");
    }

    #[test]
    fn merged_without_merge_records_falls_back_to_revision() {
        let p = patch("abc", merged(), &[70]);
        assert_eq!(p.last_activity(), 70);
    }

    #[test]
    fn decode_rejects_unknown_status() {
        let json = r#"{"status": "abandoned"}"#;
        assert!(serde_json::from_str::<PatchState>(json).is_err());
    }

    #[test]
    fn decode_open_state_with_conflicts() {
        let json = r#"{"status": "open", "conflicts": [["rev1", "oid1"]]}"#;
        let state: PatchState = serde_json::from_str(json).unwrap();
        assert_eq!(
            state,
            PatchState::Open {
                conflicts: vec![("rev1".into(), "oid1".into())]
            }
        );
        assert_eq!(state.status(), PatchStatus::Open);
    }

    #[test]
    fn decode_rejects_patch_without_revisions() {
        let json = r#"{
            "id": "abc", "title": "t",
            "author": {"id": "did:key:z6Mkabc"},
            "state": {"status": "draft"},
            "revisions": []
        }"#;
        assert!(serde_json::from_str::<Patch>(json).is_err());
    }

    #[test]
    fn decode_fills_defaults_and_derives_description() {
        let json = r#"{
            "id": "abc", "title": "Fix it",
            "author": {"id": "did:key:z6Mkabc"},
            "state": {"status": "merged", "revision": "r1", "commit": "c1"},
            "revisions": [{
                "id": "r1",
                "author": {"id": "did:key:z6Mkabc", "alias": "alice"},
                "description": "stale",
                "edits": [
                    {"author": {"id": "did:key:z6Mkabc"}, "body": "second", "timestamp": 20},
                    {"author": {"id": "did:key:z6Mkabc"}, "body": "first", "timestamp": 10}
                ],
                "base": "b", "oid": "o", "timestamp": 10,
                "discussion": [{
                    "id": "c1", "author": {"id": "did:key:z6Mkbob"},
                    "body": "lgtm", "timestamp": 11, "replyTo": null
                }]
            }]
        }"#;
        let p: Patch = serde_json::from_str(json).unwrap();
        assert!(p.labels.is_empty());
        assert!(p.merges.is_empty());
        assert_eq!(p.first_revision().description, "first");
        assert_eq!(p.first_revision().discussions.len(), 1);
        assert_eq!(p.author.alias, None);
    }

    #[test]
    fn shorten_helpers() {
        assert_eq!(shorten_hash("0123456789abcdef"), "0123456");
        assert_eq!(shorten_hash("abc"), "abc");
        assert_eq!(
            shorten_did("did:key:z6MkltRpzcq2ybm13yQpyre58JUeMvZY6toxoZVpLZ8YarsB"),
            "did:key:z6Mklt…8YarsB"
        );
        assert_eq!(shorten_did("did:key:z6Mk"), "did:key:z6Mk");
    }

    #[test]
    fn display_name_prefers_alias() {
        assert_eq!(identity("carol").display_name(), "carol");
        let anon = Identity::new("did:key:z6MkltRpzcq2ybm13yQpyre58JUeMvZY6toxoZVpLZ8YarsB", Some(""));
        assert_eq!(anon.display_name(), "did:key:z6Mklt…8YarsB");
    }

    #[test]
    fn status_parses_and_prints() {
        for status in PatchStatus::ALL {
            assert_eq!(status.as_str().parse::<PatchStatus>().unwrap(), status);
        }
        assert!("closed".parse::<PatchStatus>().is_err());
    }
}
