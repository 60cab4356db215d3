//! Canonical in-memory collection of the open repository's patches.
//!
//! The store is the only writer of the collection. Consumers hold
//! [`SharedPatch`] handles; a refetch writes into the existing handle so
//! every holder observes the update.

pub mod lookup;

use crate::error::{StoreError, StoreResult};
use crate::httpd::endpoint::ApiFlavor;
use crate::httpd::types::{DiffResponse, RepoInfo};
use crate::httpd::HttpdApi;
use crate::patch::{AugmentedPatch, Patch, PatchStatus, Timestamp};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use lookup::{match_id, patch_id_from_upstream, IdMatch};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub type SharedPatch = Arc<RwLock<AugmentedPatch>>;

/// Where the store learns which repository is open and what is checked out
#[async_trait]
pub trait RepoContext: Send + Sync {
    async fn rid(&self) -> Option<String>;
    async fn upstream_branch(&self) -> Option<String>;
}

/// Change notifications for views
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    PatchesReplaced,
    PatchUpdated { id: String },
    PatchesReset,
    CheckedOutChanged { id: Option<String> },
}

type FetchAll = Shared<BoxFuture<'static, StoreResult<()>>>;

#[derive(Default)]
struct State {
    /// `None` until the first successful fetch
    patches: Option<Vec<SharedPatch>>,
    last_full_fetch: Option<Timestamp>,
    upstream_branch: Option<String>,
    flavor: Option<ApiFlavor>,
    /// Bumped on reset; results of fetches started earlier are dropped
    generation: u64,
}

struct Inner {
    api: Arc<dyn HttpdApi>,
    repo: Arc<dyn RepoContext>,
    state: RwLock<State>,
    in_flight: Mutex<Option<(u64, FetchAll)>>,
    fetch_seq: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
    clock: fn() -> Timestamp,
}

#[derive(Clone)]
pub struct PatchStore {
    inner: Arc<Inner>,
}

pub fn now_secs() -> Timestamp {
    chrono::Utc::now().timestamp()
}

impl PatchStore {
    pub fn new(api: Arc<dyn HttpdApi>, repo: Arc<dyn RepoContext>) -> Self {
        Self::with_clock(api, repo, now_secs)
    }

    pub fn with_clock(
        api: Arc<dyn HttpdApi>,
        repo: Arc<dyn RepoContext>,
        clock: fn() -> Timestamp,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                api,
                repo,
                state: RwLock::new(State::default()),
                in_flight: Mutex::new(None),
                fetch_seq: AtomicU64::new(0),
                events,
                clock,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the collection; `None` if nothing was ever fetched
    pub fn patches(&self) -> Option<Vec<SharedPatch>> {
        self.inner.state.read().patches.clone()
    }

    pub fn last_full_fetch(&self) -> Option<Timestamp> {
        self.inner.state.read().last_full_fetch
    }

    pub async fn rid(&self) -> Option<String> {
        self.inner.repo.rid().await
    }

    /// Refresh every patch of the repository.
    ///
    /// Concurrent callers share one in-flight request and see the same
    /// outcome. If any status listing fails the collection is left as it was.
    pub async fn fetch_all_patches(&self) -> StoreResult<()> {
        let fetch = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some((_, fetch)) => {
                    debug!("joining in-flight patch fetch");
                    fetch.clone()
                }
                None => {
                    let seq = self.inner.fetch_seq.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let fetch = async move {
                        let result = inner.fetch_all().await;
                        let mut slot = inner.in_flight.lock();
                        if matches!(slot.as_ref(), Some((s, _)) if *s == seq) {
                            *slot = None;
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some((seq, fetch.clone()));
                    fetch
                }
            }
        };
        fetch.await
    }

    /// Fetch all patches unless a full fetch already happened
    pub async fn init_store_if_needed(&self) -> StoreResult<()> {
        if self.last_full_fetch().is_some() {
            return Ok(());
        }
        self.fetch_all_patches().await
    }

    /// Fetch one patch and merge it into the collection, keeping the
    /// existing handle when the patch is already known.
    pub async fn refetch_patch(&self, id: &str) -> StoreResult<SharedPatch> {
        let generation = self.inner.state.read().generation;
        let rid = self.inner.repo.rid().await.ok_or(StoreError::NoRepository)?;
        let flavor = self.inner.flavor().await?;
        let patch = self.inner.api.patch(flavor, &rid, id).await.map_err(|e| {
            warn!(patch = id, "refetch failed: {}", e);
            StoreError::from(e)
        })?;
        let now = (self.inner.clock)();
        let patch_id = patch.id.clone();

        let entry = {
            let mut state = self.inner.state.write();
            if state.generation != generation {
                return Err(StoreError::Superseded);
            }
            let existing = state
                .patches
                .as_ref()
                .and_then(|all| all.iter().find(|p| p.read().id == patch_id).cloned());
            match existing {
                Some(entry) => {
                    *entry.write() = AugmentedPatch::new(patch, Some(now));
                    entry
                }
                None => {
                    let entry = Arc::new(RwLock::new(AugmentedPatch::new(patch, Some(now))));
                    state
                        .patches
                        .get_or_insert_with(Vec::new)
                        .push(Arc::clone(&entry));
                    entry
                }
            }
        };

        debug!(patch = %patch_id, "patch refetched");
        self.emit(StoreEvent::PatchUpdated { id: patch_id });
        Ok(entry)
    }

    /// Ask the service for a lifecycle transition, then reconcile by refetching.
    pub async fn update_patch_status(&self, id: &str, status: PatchStatus) -> StoreResult<SharedPatch> {
        let rid = self.inner.repo.rid().await.ok_or(StoreError::NoRepository)?;
        let flavor = self.inner.flavor().await?;
        self.inner
            .api
            .update_patch_status(flavor, &rid, id, status)
            .await?;
        info!(patch = id, %status, "requested status change");
        self.refetch_patch(id).await
    }

    /// File-level diff between two commits of the open repository
    pub async fn fetch_diff(&self, base: &str, oid: &str) -> StoreResult<DiffResponse> {
        let rid = self.inner.repo.rid().await.ok_or(StoreError::NoRepository)?;
        let flavor = self.inner.flavor().await?;
        Ok(self.inner.api.diff(flavor, &rid, base, oid).await?)
    }

    pub async fn repository(&self) -> StoreResult<RepoInfo> {
        let rid = self.inner.repo.rid().await.ok_or(StoreError::NoRepository)?;
        let flavor = self.inner.flavor().await?;
        Ok(self.inner.api.repo(flavor, &rid).await?)
    }

    /// Exact id first; otherwise the single id containing `fragment`.
    /// Fragments that match several ids resolve to nothing.
    pub fn find_patch_by_id(&self, fragment: &str) -> Option<SharedPatch> {
        self.find_by_id(fragment, false)
    }

    /// First patch whose title contains `fragment`
    pub fn find_patch_by_title(&self, fragment: &str) -> Option<SharedPatch> {
        let patches = self.patches()?;
        patches.into_iter().find(|p| p.read().title.contains(fragment))
    }

    fn find_by_id(&self, fragment: &str, prefix_only: bool) -> Option<SharedPatch> {
        let patches = self.patches()?;
        let ids: Vec<String> = patches.iter().map(|p| p.read().id.clone()).collect();
        let found = match_id(ids.iter().map(String::as_str), fragment, prefix_only);
        if let IdMatch::Ambiguous(n) = found {
            debug!(fragment, matches = n, "ambiguous patch id");
        }
        found.index().map(|i| Arc::clone(&patches[i]))
    }

    /// Drop everything; the next read fetches from scratch.
    pub fn reset_all_patches(&self) {
        {
            let mut state = self.inner.state.write();
            state.patches = None;
            state.last_full_fetch = None;
            state.flavor = None;
            state.generation += 1;
        }
        *self.inner.in_flight.lock() = None;
        debug!("patch store reset");
        self.emit(StoreEvent::PatchesReset);
    }

    /// The patch whose upstream branch is checked out, derived on every call
    pub fn checked_out_patch(&self) -> Option<SharedPatch> {
        let branch = self.inner.state.read().upstream_branch.clone()?;
        let prefix = patch_id_from_upstream(&branch)?;
        self.find_by_id(prefix, true)
    }

    /// Record the upstream of the current branch, notifying when this
    /// changes which patch is checked out.
    pub fn set_upstream_branch(&self, branch: Option<String>) {
        let before = self.checked_out_id();
        self.inner.state.write().upstream_branch = branch;
        let after = self.checked_out_id();
        if before != after {
            debug!(patch = ?after, "checked-out patch changed");
            self.emit(StoreEvent::CheckedOutChanged { id: after });
        }
    }

    pub async fn refresh_upstream_branch(&self) {
        let branch = self.inner.repo.upstream_branch().await;
        self.set_upstream_branch(branch);
    }

    pub fn checked_out_id(&self) -> Option<String> {
        self.checked_out_patch().map(|p| p.read().id.clone())
    }

    fn emit(&self, event: StoreEvent) {
        self.inner.emit(event);
    }
}

impl Inner {
    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn probe_flavor(&self) -> StoreResult<ApiFlavor> {
        let root = self.api.root().await?;
        let flavor = ApiFlavor::from_root(&root);
        debug!(
            service = %root.service,
            version = %root.version,
            node = ?root.node_id,
            api_version = ?root.api_version,
            ?flavor,
            "probed httpd"
        );
        Ok(flavor)
    }

    async fn flavor(&self) -> StoreResult<ApiFlavor> {
        let cached = self.state.read().flavor;
        if let Some(flavor) = cached {
            return Ok(flavor);
        }
        let flavor = self.probe_flavor().await?;
        self.state.write().flavor = Some(flavor);
        Ok(flavor)
    }

    async fn fetch_all(&self) -> StoreResult<()> {
        let generation = self.state.read().generation;
        let rid = self.repo.rid().await.ok_or(StoreError::NoRepository)?;
        let flavor = self.probe_flavor().await?;
        let started = Instant::now();

        let (draft, open, archived, merged) = futures::join!(
            self.api.list_patches(flavor, &rid, PatchStatus::Draft),
            self.api.list_patches(flavor, &rid, PatchStatus::Open),
            self.api.list_patches(flavor, &rid, PatchStatus::Archived),
            self.api.list_patches(flavor, &rid, PatchStatus::Merged),
        );

        let mut all: Vec<Patch> = Vec::new();
        let mut seen = HashSet::new();
        for (status, result) in PatchStatus::ALL.into_iter().zip([draft, open, archived, merged]) {
            match result {
                Ok(patches) => {
                    // A patch changing state between listings shows up twice
                    all.extend(patches.into_iter().filter(|p| seen.insert(p.id.clone())));
                }
                Err(source) => {
                    warn!(%rid, %status, "patch listing failed: {}", source);
                    return Err(StoreError::PartialFetch {
                        status: status.as_str(),
                        source,
                    });
                }
            }
        }

        let now = (self.clock)();
        let count = all.len();
        {
            let mut state = self.state.write();
            if state.generation != generation {
                debug!("dropping patch fetch started before a reset");
                return Err(StoreError::Superseded);
            }
            state.patches = Some(
                all.into_iter()
                    .map(|p| Arc::new(RwLock::new(AugmentedPatch::new(p, Some(now)))))
                    .collect(),
            );
            state.last_full_fetch = Some(now);
            state.flavor = Some(flavor);
        }

        info!(
            %rid,
            count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched all patches"
        );
        self.emit(StoreEvent::PatchesReplaced);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::TransportError;
    use crate::httpd::types::RootInfo;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// In-memory httpd with call counters
    #[derive(Default)]
    pub struct FakeApi {
        pub api_version: Option<String>,
        pub lists: Mutex<HashMap<PatchStatus, Result<Vec<Patch>, TransportError>>>,
        pub singles: Mutex<HashMap<String, Patch>>,
        pub diffs: Mutex<HashMap<(String, String), DiffResponse>>,
        pub root_calls: AtomicUsize,
        pub list_calls: AtomicUsize,
        pub status_updates: Mutex<Vec<(String, PatchStatus)>>,
        pub flavors: Mutex<Vec<ApiFlavor>>,
        /// Listing latency so concurrent callers can overlap
        pub delay: Option<Duration>,
    }

    impl FakeApi {
        pub fn set_list(&self, status: PatchStatus, patches: Vec<Patch>) {
            self.lists.lock().insert(status, Ok(patches));
        }

        pub fn fail_list(&self, status: PatchStatus) {
            self.lists.lock().insert(
                status,
                Err(TransportError::Network {
                    url: format!("http://fake/{status}"),
                    message: "connection refused".into(),
                }),
            );
        }

        pub fn set_single(&self, patch: Patch) {
            self.singles.lock().insert(patch.id.clone(), patch);
        }

        pub fn set_diff(&self, base: &str, oid: &str, diff: DiffResponse) {
            self.diffs
                .lock()
                .insert((base.to_string(), oid.to_string()), diff);
        }
    }

    fn not_found(what: &str) -> TransportError {
        TransportError::Status {
            status: 404,
            url: format!("http://fake/{what}"),
            body: String::new(),
        }
    }

    #[async_trait]
    impl HttpdApi for FakeApi {
        async fn root(&self) -> Result<RootInfo, TransportError> {
            self.root_calls.fetch_add(1, Ordering::SeqCst);
            Ok(RootInfo {
                api_version: self.api_version.clone(),
                ..RootInfo::default()
            })
        }

        async fn repo(&self, _flavor: ApiFlavor, rid: &str) -> Result<RepoInfo, TransportError> {
            Ok(RepoInfo {
                name: format!("repo-{rid}"),
                description: String::new(),
                default_branch: "master".into(),
                patches: Default::default(),
            })
        }

        async fn list_patches(
            &self,
            flavor: ApiFlavor,
            _rid: &str,
            status: PatchStatus,
        ) -> Result<Vec<Patch>, TransportError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.flavors.lock().push(flavor);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let result = self.lists.lock().get(&status).cloned();
            result.unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn patch(&self, _flavor: ApiFlavor, _rid: &str, id: &str) -> Result<Patch, TransportError> {
            let found = self.singles.lock().get(id).cloned();
            found.ok_or_else(|| not_found(id))
        }

        async fn update_patch_status(
            &self,
            _flavor: ApiFlavor,
            _rid: &str,
            id: &str,
            status: PatchStatus,
        ) -> Result<(), TransportError> {
            self.status_updates.lock().push((id.to_string(), status));
            Ok(())
        }

        async fn diff(
            &self,
            _flavor: ApiFlavor,
            _rid: &str,
            base: &str,
            oid: &str,
        ) -> Result<DiffResponse, TransportError> {
            let found = self
                .diffs
                .lock()
                .get(&(base.to_string(), oid.to_string()))
                .cloned();
            found.ok_or_else(|| not_found("diff"))
        }
    }

    pub struct FakeRepo {
        pub rid: Option<String>,
        pub upstream: Mutex<Option<String>>,
    }

    impl FakeRepo {
        pub fn new(rid: Option<&str>) -> Self {
            Self {
                rid: rid.map(str::to_string),
                upstream: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl RepoContext for FakeRepo {
        async fn rid(&self) -> Option<String> {
            self.rid.clone()
        }

        async fn upstream_branch(&self) -> Option<String> {
            self.upstream.lock().clone()
        }
    }

    pub fn fixed_clock() -> Timestamp {
        1_700_000_000
    }

    pub fn store_with(api: Arc<FakeApi>, rid: Option<&str>) -> PatchStore {
        PatchStore::with_clock(api, Arc::new(FakeRepo::new(rid)), fixed_clock)
    }
}
