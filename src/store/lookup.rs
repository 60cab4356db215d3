//! Id and branch matching used by the store's lookups.

/// Remote-tracking namespace `rad patch checkout` sets as upstream
pub const PATCH_UPSTREAM_PREFIX: &str = "rad/patches/";

/// How an id fragment relates to the stored ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMatch {
    /// The fragment equals the id at this index
    Exact(usize),
    /// Exactly one id contains the fragment
    Unique(usize),
    /// More than one id contains the fragment
    Ambiguous(usize),
    None,
}

impl IdMatch {
    pub fn index(&self) -> Option<usize> {
        match self {
            IdMatch::Exact(i) | IdMatch::Unique(i) => Some(*i),
            IdMatch::Ambiguous(_) | IdMatch::None => None,
        }
    }
}

/// Resolve `fragment` against `ids`. An exact match always wins; otherwise
/// the fragment must select a single id.
pub fn match_id<'a>(ids: impl IntoIterator<Item = &'a str>, fragment: &str, prefix_only: bool) -> IdMatch {
    if fragment.is_empty() {
        return IdMatch::None;
    }
    let mut found = None;
    let mut count = 0;
    for (i, id) in ids.into_iter().enumerate() {
        if id == fragment {
            return IdMatch::Exact(i);
        }
        let hit = if prefix_only {
            id.starts_with(fragment)
        } else {
            id.contains(fragment)
        };
        if hit {
            count += 1;
            found.get_or_insert(i);
        }
    }
    match (found, count) {
        (Some(i), 1) => IdMatch::Unique(i),
        (Some(_), n) => IdMatch::Ambiguous(n),
        _ => IdMatch::None,
    }
}

/// Patch id (or id prefix) encoded in an upstream branch name such as
/// `rad/patches/8c1e0a3…` or `refs/remotes/rad/patches/8c1e0a3…`.
pub fn patch_id_from_upstream(branch: &str) -> Option<&str> {
    let start = branch.find(PATCH_UPSTREAM_PREFIX)? + PATCH_UPSTREAM_PREFIX.len();
    let rest = &branch[start..];
    let id = rest.split('/').next().unwrap_or(rest);
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: [&str; 3] = [
        "abc1230000000000000000000000000000000000",
        "abd4560000000000000000000000000000000000",
        "fff0000000000000000000000000000000000000",
    ];

    #[test]
    fn unique_prefix_resolves() {
        assert_eq!(match_id(IDS, "abc1", true), IdMatch::Unique(0));
        assert_eq!(match_id(IDS, "abc1", true).index(), Some(0));
    }

    #[test]
    fn exact_beats_ambiguity() {
        let ids = ["abc", "abcdef"];
        assert_eq!(match_id(ids, "abc", true), IdMatch::Exact(0));
    }

    #[test]
    fn colliding_prefix_is_ambiguous() {
        assert_eq!(match_id(IDS, "ab", true), IdMatch::Ambiguous(2));
        assert_eq!(match_id(IDS, "ab", true).index(), None);
    }

    #[test]
    fn substring_mode_matches_inside() {
        assert_eq!(match_id(IDS, "d456", false), IdMatch::Unique(1));
        assert_eq!(match_id(IDS, "d456", true), IdMatch::None);
    }

    #[test]
    fn empty_fragment_matches_nothing() {
        assert_eq!(match_id(IDS, "", false), IdMatch::None);
    }

    #[test]
    fn upstream_parsing() {
        assert_eq!(patch_id_from_upstream("rad/patches/abc123"), Some("abc123"));
        assert_eq!(
            patch_id_from_upstream("refs/remotes/rad/patches/abc123"),
            Some("abc123")
        );
        assert_eq!(patch_id_from_upstream("rad/patches/"), None);
        assert_eq!(patch_id_from_upstream("rad/patches/not-hex"), None);
        assert_eq!(patch_id_from_upstream("origin/main"), None);
        assert_eq!(patch_id_from_upstream("rad/master"), None);
    }
}
