//! Markdown hover text for patch nodes.
//!
//! Three sections separated by rules: status header, content, provenance.
//! Inline HTML is left as-is; whoever renders the markdown sanitizes it.

use super::time;
use crate::patch::{shorten_hash, AugmentedPatch, PatchState, Timestamp};
use std::fmt::Write;

pub fn patch_tooltip(patch: &AugmentedPatch, checked_out: bool, now: Timestamp) -> String {
    let mut md = String::new();

    // ── Header ──
    let _ = write!(md, "**{}** · `{}`", status_label(&patch.state), shorten_hash(&patch.id));
    if checked_out {
        md.push_str(" · checked out");
    }
    md.push_str("\n\n---\n\n");

    // ── Content ──
    let _ = writeln!(md, "### {}\n", patch.title);
    let description = patch.first_revision().description.trim();
    if !description.is_empty() {
        let _ = writeln!(md, "{}\n", description);
    }
    if !patch.labels.is_empty() {
        let labels: Vec<String> = patch.labels.iter().map(|l| format!("`{l}`")).collect();
        let _ = writeln!(md, "Labels: {}\n", labels.join(" "));
    }
    md.push_str("---\n\n");

    // ── Provenance ──
    let first = patch.first_revision();
    let _ = writeln!(
        md,
        "Opened by **{}** on {}\n",
        patch.author.display_name(),
        time::both(first.timestamp, now)
    );
    if let (PatchState::Merged { .. }, Some(merge)) = (&patch.state, patch.latest_merge()) {
        let _ = writeln!(
            md,
            "Merged by **{}** at `{}` on {}\n",
            merge.author.display_name(),
            shorten_hash(&merge.commit),
            time::both(merge.timestamp, now)
        );
    }
    let latest = patch.latest_revision();
    if patch.revisions.len() > 1 {
        let _ = writeln!(
            md,
            "Revision `{}` by **{}** on {} ({} revisions)\n",
            shorten_hash(&latest.id),
            latest.author.display_name(),
            time::both(latest.timestamp, now),
            patch.revisions.len()
        );
    }
    let _ = write!(
        md,
        "Base `{}` → head `{}`",
        shorten_hash(&latest.base),
        shorten_hash(&latest.oid)
    );
    if let Some(fetched) = patch.last_fetched {
        let _ = write!(md, "\n\n_Updated {}_", time::relative(fetched, now));
    }
    md
}

fn status_label(state: &PatchState) -> &'static str {
    match state {
        PatchState::Draft => "Draft",
        PatchState::Open { conflicts } if !conflicts.is_empty() => "Open (conflicts)",
        PatchState::Open { .. } => "Open",
        PatchState::Archived => "Archived",
        PatchState::Merged { .. } => "Merged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::fixtures::{identity, merged, open, patch};
    use crate::patch::Merge;

    const NOW: Timestamp = 1_700_000_000;

    #[test]
    fn has_three_sections() {
        let mut p = patch("abc1234567", open(), &[NOW - 3600]);
        p.labels.insert("bug".into());
        let md = patch_tooltip(&AugmentedPatch::new(p, Some(NOW)), true, NOW);

        assert_eq!(md.matches("\n---\n").count(), 2);
        assert!(md.starts_with("**Open** · `abc1234` · checked out"));
        assert!(md.contains("### Patch abc1234567"));
        assert!(md.contains("Labels: `bug`"));
        assert!(md.contains("Opened by **alice**"));
        assert!(md.contains("(1h ago)"));
        assert!(!md.contains("Merged by"));
    }

    #[test]
    fn merged_patch_credits_merger() {
        let mut p = patch("abc", merged(), &[NOW - 7200, NOW - 3600]);
        p.merges.push(Merge {
            author: identity("bob"),
            revision: "abcr1".into(),
            commit: "deadbeefcafe".into(),
            timestamp: NOW - 60,
        });
        let md = patch_tooltip(&AugmentedPatch::new(p, None), false, NOW);
        assert!(md.contains("Merged by **bob** at `deadbee`"));
        assert!(md.contains("(2 revisions)"));
        assert!(!md.contains("checked out"));
        assert!(!md.contains("_Updated"));
    }
}
