//! Statically declared request shapes.
//!
//! Each endpoint is a type whose associated `Response` names the JSON it
//! returns, so call sites get the expected shape checked at compile time.
//! Nothing here validates bodies beyond decoding them.

use super::types::{DiffResponse, ListedPatch, MutationResponse, RepoInfo, RootInfo};
use crate::patch::{Patch, PatchStatus};
use reqwest::Method;
use serde::de::DeserializeOwned;

/// Page size requested from paginated endpoints unless overridden
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// First httpd API version that names the patch filter `status` and the
/// repository collection `repos`
pub const STATUS_QUERY_SINCE: (u64, u64, u64) = (0, 2, 0);

pub trait Endpoint {
    type Response: DeserializeOwned;

    fn method(&self) -> Method {
        Method::GET
    }

    /// Path relative to the API root, starting with `/`
    fn path(&self) -> String;

    fn query(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// Whether the default `page`/`perPage` parameters apply
    fn paginated(&self) -> bool {
        true
    }

    fn body(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Naming differences between httpd API generations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    /// `/repos/{rid}`, `?status=`
    Current,
    /// `/projects/{rid}`, `?state=`
    Legacy,
}

impl ApiFlavor {
    pub fn from_root(root: &RootInfo) -> Self {
        match root.api_version.as_deref().and_then(parse_version) {
            Some(version) if version >= STATUS_QUERY_SINCE => ApiFlavor::Current,
            _ => ApiFlavor::Legacy,
        }
    }

    pub fn repos_segment(&self) -> &'static str {
        match self {
            ApiFlavor::Current => "repos",
            ApiFlavor::Legacy => "projects",
        }
    }

    pub fn status_key(&self) -> &'static str {
        match self {
            ApiFlavor::Current => "status",
            ApiFlavor::Legacy => "state",
        }
    }

    fn repo_path(&self, rid: &str) -> String {
        format!("/{}/{}", self.repos_segment(), rid)
    }
}

/// `"0.3.1"` / `"v1.2"` → `(0, 3, 1)` / `(1, 2, 0)`
fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let raw = raw.trim().trim_start_matches('v');
    let core = raw.split(|c: char| c == '-' || c == '+').next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parts.next().map(str::parse::<u64>).transpose().ok()?.unwrap_or(0);
    let patch = parts.next().map(str::parse::<u64>).transpose().ok()?.unwrap_or(0);
    Some((major, minor, patch))
}

// ── Endpoints ──

pub struct Root;

impl Endpoint for Root {
    type Response = RootInfo;

    fn path(&self) -> String {
        "/".to_string()
    }

    fn paginated(&self) -> bool {
        false
    }
}

pub struct GetRepo<'a> {
    pub flavor: ApiFlavor,
    pub rid: &'a str,
}

impl Endpoint for GetRepo<'_> {
    type Response = RepoInfo;

    fn path(&self) -> String {
        self.flavor.repo_path(self.rid)
    }
}

pub struct ListPatches<'a> {
    pub flavor: ApiFlavor,
    pub rid: &'a str,
    pub status: PatchStatus,
}

impl Endpoint for ListPatches<'_> {
    type Response = Vec<ListedPatch>;

    fn path(&self) -> String {
        format!("{}/patches", self.flavor.repo_path(self.rid))
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        vec![(self.flavor.status_key(), self.status.as_str().to_string())]
    }
}

pub struct GetPatch<'a> {
    pub flavor: ApiFlavor,
    pub rid: &'a str,
    pub id: &'a str,
}

impl Endpoint for GetPatch<'_> {
    type Response = Patch;

    fn path(&self) -> String {
        format!("{}/patches/{}", self.flavor.repo_path(self.rid), self.id)
    }
}

/// Request a lifecycle transition. The result is only trusted once the
/// patch has been fetched again.
pub struct UpdatePatchStatus<'a> {
    pub flavor: ApiFlavor,
    pub rid: &'a str,
    pub id: &'a str,
    pub status: PatchStatus,
}

impl Endpoint for UpdatePatchStatus<'_> {
    type Response = MutationResponse;

    fn method(&self) -> Method {
        Method::PATCH
    }

    fn path(&self) -> String {
        format!("{}/patches/{}", self.flavor.repo_path(self.rid), self.id)
    }

    fn paginated(&self) -> bool {
        false
    }

    fn body(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "type": "lifecycle",
            "state": { "status": self.status.as_str() },
        }))
    }
}

pub struct GetDiff<'a> {
    pub flavor: ApiFlavor,
    pub rid: &'a str,
    pub base: &'a str,
    pub oid: &'a str,
}

impl Endpoint for GetDiff<'_> {
    type Response = DiffResponse;

    fn path(&self) -> String {
        format!("{}/diff/{}/{}", self.flavor.repo_path(self.rid), self.base, self.oid)
    }

    fn paginated(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(api_version: Option<&str>) -> RootInfo {
        RootInfo {
            api_version: api_version.map(str::to_string),
            ..RootInfo::default()
        }
    }

    #[test]
    fn flavor_follows_api_version() {
        assert_eq!(ApiFlavor::from_root(&root(None)), ApiFlavor::Legacy);
        assert_eq!(ApiFlavor::from_root(&root(Some("0.1.9"))), ApiFlavor::Legacy);
        assert_eq!(ApiFlavor::from_root(&root(Some("0.2.0"))), ApiFlavor::Current);
        assert_eq!(ApiFlavor::from_root(&root(Some("v1.0"))), ApiFlavor::Current);
        assert_eq!(ApiFlavor::from_root(&root(Some("garbage"))), ApiFlavor::Legacy);
    }

    #[test]
    fn parse_version_variants() {
        assert_eq!(parse_version("0.3.1"), Some((0, 3, 1)));
        assert_eq!(parse_version("2"), Some((2, 0, 0)));
        assert_eq!(parse_version("1.4.0-rc.1"), Some((1, 4, 0)));
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn list_patches_uses_flavor_names() {
        let current = ListPatches {
            flavor: ApiFlavor::Current,
            rid: "rad:z3gq",
            status: PatchStatus::Archived,
        };
        assert_eq!(current.path(), "/repos/rad:z3gq/patches");
        assert_eq!(current.query(), vec![("status", "archived".to_string())]);

        let legacy = ListPatches {
            flavor: ApiFlavor::Legacy,
            rid: "rad:z3gq",
            status: PatchStatus::Open,
        };
        assert_eq!(legacy.path(), "/projects/rad:z3gq/patches");
        assert_eq!(legacy.query(), vec![("state", "open".to_string())]);
    }

    #[test]
    fn root_probe_is_not_paginated() {
        assert!(!Root.paginated());
        assert_eq!(Root.path(), "/");
    }

    #[test]
    fn status_update_body() {
        let ep = UpdatePatchStatus {
            flavor: ApiFlavor::Current,
            rid: "rad:z3gq",
            id: "abc",
            status: PatchStatus::Archived,
        };
        assert_eq!(ep.method(), Method::PATCH);
        assert_eq!(ep.body().unwrap()["state"]["status"], "archived");
    }

    #[test]
    fn diff_path() {
        let ep = GetDiff {
            flavor: ApiFlavor::Current,
            rid: "rad:z3gq",
            base: "b",
            oid: "o",
        };
        assert_eq!(ep.path(), "/repos/rad:z3gq/diff/b/o");
    }
}
