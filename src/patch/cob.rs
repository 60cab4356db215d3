//! Normalization of `rad cob show --type xyz.radicle.patch` output.
//!
//! The CLI prints the raw collaborative object: revisions, merges, comments
//! and reviews are maps keyed by their ids (or by author), and timestamps
//! are in milliseconds. `normalize` turns that into the same [`Patch`] the
//! HTTP API yields. A patch is either converted entirely or rejected.

use super::{
    CodeLocation, Comment, Edit, Embed, Identity, Merge, Patch, PatchState, Reaction, Revision,
    Revisions, Review, Timestamp, Verdict,
};
use crate::error::CobError;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Authors appear either as a bare DID / node id or as `{ "id": ... }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawIdentity {
    Did(String),
    Object {
        id: String,
        #[serde(default)]
        alias: Option<String>,
    },
}

impl RawIdentity {
    fn into_identity(self) -> Identity {
        match self {
            RawIdentity::Did(id) => Identity { id: to_did(&id), alias: None },
            RawIdentity::Object { id, alias } => Identity { id: to_did(&id), alias },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawState {
    status: String,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    conflicts: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct RawEdit {
    author: RawIdentity,
    #[serde(default)]
    body: String,
    timestamp: i64,
    #[serde(default)]
    embeds: Vec<Embed>,
}

#[derive(Debug, Deserialize)]
struct RawReaction {
    author: RawIdentity,
    emoji: String,
    #[serde(default)]
    location: Option<CodeLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawComment {
    author: RawIdentity,
    edits: Vec<RawEdit>,
    #[serde(default)]
    reactions: Vec<RawReaction>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    location: Option<CodeLocation>,
    #[serde(default)]
    resolved: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawThread {
    #[serde(default)]
    comments: BTreeMap<String, RawComment>,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    verdict: Option<Verdict>,
    #[serde(default)]
    summary: Option<String>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RawRevision {
    author: RawIdentity,
    #[serde(default)]
    description: Vec<RawEdit>,
    base: String,
    oid: String,
    #[serde(default)]
    discussion: RawThread,
    /// Keyed by reviewer; `null` for redacted reviews
    #[serde(default)]
    reviews: BTreeMap<String, Option<RawReview>>,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RawMerge {
    revision: String,
    commit: String,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct RawCobPatch {
    title: String,
    author: RawIdentity,
    state: RawState,
    #[serde(default)]
    target: String,
    #[serde(default)]
    labels: BTreeSet<String>,
    /// Keyed by the merging node
    #[serde(default)]
    merges: BTreeMap<String, RawMerge>,
    #[serde(default)]
    assignees: Vec<String>,
    revisions: BTreeMap<String, Option<RawRevision>>,
}

/// Convert `rad cob show` JSON for patch `patch_id` into a [`Patch`].
pub fn normalize(patch_id: &str, json: &str) -> Result<Patch, CobError> {
    let raw: RawCobPatch = serde_json::from_str(json)?;
    normalize_raw(patch_id, raw)
}

fn normalize_raw(patch_id: &str, raw: RawCobPatch) -> Result<Patch, CobError> {
    let state = convert_state(raw.state)?;

    let mut revisions = Vec::with_capacity(raw.revisions.len());
    // Redacted revisions are `null` in the object and have no content to show
    for (id, rev) in raw.revisions {
        if let Some(rev) = rev {
            revisions.push(convert_revision(id, rev)?);
        }
    }
    revisions.sort_by_key(|r| r.timestamp);

    let mut merges = Vec::with_capacity(raw.merges.len());
    for (node, merge) in raw.merges {
        if !revisions.iter().any(|r| r.id == merge.revision) {
            return Err(CobError::DanglingMerge {
                author: node,
                revision: merge.revision,
            });
        }
        merges.push(Merge {
            author: Identity { id: to_did(&node), alias: None },
            revision: merge.revision,
            commit: merge.commit,
            timestamp: ms_to_secs(merge.timestamp),
        });
    }
    merges.sort_by_key(|m| m.timestamp);

    let revisions =
        Revisions::new(revisions).ok_or_else(|| CobError::NoRevisions(patch_id.to_string()))?;

    Ok(Patch {
        id: patch_id.to_string(),
        title: raw.title,
        author: raw.author.into_identity(),
        state,
        target: raw.target,
        labels: raw.labels,
        merges,
        assignees: raw.assignees.iter().map(|a| to_did(a)).collect(),
        revisions,
    })
}

fn convert_state(raw: RawState) -> Result<PatchState, CobError> {
    match raw.status.as_str() {
        "draft" => Ok(PatchState::Draft),
        "open" => Ok(PatchState::Open {
            conflicts: raw.conflicts,
        }),
        "archived" => Ok(PatchState::Archived),
        "merged" => match (raw.revision, raw.commit) {
            (Some(revision), Some(commit)) => Ok(PatchState::Merged { revision, commit }),
            _ => Err(CobError::UnknownStatus(
                "merged (missing revision or commit)".to_string(),
            )),
        },
        other => Err(CobError::UnknownStatus(other.to_string())),
    }
}

fn convert_revision(id: String, raw: RawRevision) -> Result<Revision, CobError> {
    if raw.base.is_empty() || raw.oid.is_empty() {
        return Err(CobError::Revision {
            revision: id,
            reason: "missing base or oid".to_string(),
        });
    }

    let edits: Vec<Edit> = raw.description.into_iter().map(convert_edit).collect();

    let mut discussions = Vec::with_capacity(raw.discussion.comments.len());
    for (comment_id, comment) in raw.discussion.comments {
        discussions.push(convert_comment(&id, comment_id, comment)?);
    }
    discussions.sort_by_key(|c| c.timestamp);

    let mut reviews: Vec<Review> = raw
        .reviews
        .into_iter()
        .filter_map(|(reviewer, review)| {
            review.map(|r| Review {
                id: r.id,
                author: Identity { id: to_did(&reviewer), alias: None },
                verdict: r.verdict,
                summary: r.summary,
                comments: Vec::new(),
                timestamp: ms_to_secs(r.timestamp),
            })
        })
        .collect();
    reviews.sort_by_key(|r| r.timestamp);

    // Description is filled in from the earliest edit by `Revisions::new`
    Ok(Revision {
        id,
        author: raw.author.into_identity(),
        description: String::new(),
        edits,
        base: raw.base,
        oid: raw.oid,
        refs: Vec::new(),
        reviews,
        discussions,
        timestamp: ms_to_secs(raw.timestamp),
    })
}

fn convert_comment(revision: &str, id: String, raw: RawComment) -> Result<Comment, CobError> {
    let edits: Vec<Edit> = raw.edits.into_iter().map(convert_edit).collect();
    let first = edits
        .iter()
        .min_by_key(|e| e.timestamp)
        .ok_or_else(|| CobError::Revision {
            revision: revision.to_string(),
            reason: format!("comment {id} has no edits"),
        })?;
    let (body, timestamp, embeds) = (first.body.clone(), first.timestamp, first.embeds.clone());

    // Group per (emoji, location) the way the HTTP API reports reactions
    let mut reactions: Vec<Reaction> = Vec::new();
    for r in raw.reactions {
        let author = r.author.into_identity();
        match reactions
            .iter_mut()
            .find(|x| x.emoji == r.emoji && x.location == r.location)
        {
            Some(existing) => existing.authors.push(author),
            None => reactions.push(Reaction {
                emoji: r.emoji,
                authors: vec![author],
                location: r.location,
            }),
        }
    }

    Ok(Comment {
        id,
        author: raw.author.into_identity(),
        body,
        edits,
        embeds,
        reactions,
        timestamp,
        reply_to: raw.reply_to,
        location: raw.location,
        resolved: raw.resolved,
    })
}

fn convert_edit(raw: RawEdit) -> Edit {
    Edit {
        author: raw.author.into_identity(),
        body: raw.body,
        timestamp: ms_to_secs(raw.timestamp),
        embeds: raw.embeds,
    }
}

fn ms_to_secs(ms: i64) -> Timestamp {
    ms / 1000
}

fn to_did(id: &str) -> String {
    if id.starts_with("did:") {
        id.to_string()
    } else {
        format!("did:key:{id}")
    }
}
