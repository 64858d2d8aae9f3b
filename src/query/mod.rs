//! Per-entity query and mutation layer on top of the shared [`QueryCache`].
//!
//! [`QueryCache`]: crate::cache::QueryCache

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheClient, CachedData, FetchOutcome, MutationId, OptimisticOp, QueryKey};
use crate::config::ConsoleConfig;
use crate::domain::{EntityDescriptor, Page, PageMeta, PageParams, Record, RecordId};
use crate::error::ApiError;
use crate::transport::EntityClient;

/// A fetch that keeps losing to invalidations gives up after this many tries.
const MAX_SUPERSEDED_REFETCHES: usize = 3;

#[derive(Default)]
struct QueryState {
    params: PageParams,
    /// Last list key that loaded, shown while a new key is loading.
    displayed: Option<QueryKey>,
    total: Option<u64>,
    error: Option<(QueryKey, ApiError)>,
}

#[derive(Default)]
struct InFlightCounters {
    listing: AtomicUsize,
    fetching_detail: AtomicUsize,
    creating: AtomicUsize,
    updating: AtomicUsize,
    deleting: AtomicUsize,
}

/// Increments a counter for as long as it is alive.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of the list query for the current page parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ListState {
    pub params: PageParams,
    pub page: Option<Page>,
    /// `page` belongs to the previous parameters; the current ones are loading.
    pub is_placeholder: bool,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub error: Option<ApiError>,
}

impl ListState {
    pub fn meta(&self) -> Option<&PageMeta> {
        self.page.as_ref().map(|page| &page.meta)
    }

    pub fn rows(&self) -> &[Record] {
        self.page.as_ref().map(|page| page.data.as_slice()).unwrap_or(&[])
    }
}

/// List, detail and mutation operations for one entity.
///
/// Cloning is cheap; clones share page parameters and in-flight flags.
#[derive(Clone)]
pub struct EntityQuery {
    client: EntityClient,
    cache: CacheClient,
    state: Arc<Mutex<QueryState>>,
    in_flight: Arc<InFlightCounters>,
    list_retries: usize,
    retry_delay: Duration,
}

impl EntityQuery {
    pub fn new(client: EntityClient, cache: CacheClient, config: &ConsoleConfig) -> Self {
        let state = QueryState {
            params: PageParams::new(config.default_limit, 1),
            ..QueryState::default()
        };
        Self {
            client,
            cache,
            state: Arc::new(Mutex::new(state)),
            in_flight: Arc::new(InFlightCounters::default()),
            list_retries: config.list_retries,
            retry_delay: config.retry_delay,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        self.client.descriptor()
    }

    pub fn entity(&self) -> &str {
        &self.descriptor().name
    }

    pub fn params(&self) -> PageParams {
        self.state().params
    }

    /// Changes the page size and goes back to the first page.
    pub fn set_limit(&self, limit: u32) {
        let mut state = self.state();
        state.params = state.params.with_limit(limit);
        debug!(entity = %self.entity(), limit = state.params.limit, "Page size changed");
    }

    pub fn set_page(&self, page: u32) {
        let mut state = self.state();
        let mut page = page.max(1);
        if let Some(total) = state.total {
            let last = PageMeta { total, ..PageMeta::default() }.page_count(state.params.limit);
            page = page.min(last);
        }
        state.params = state.params.with_page(page);
    }

    pub fn next_page(&self) {
        let page = self.params().page.saturating_add(1);
        self.set_page(page);
    }

    pub fn previous_page(&self) {
        let page = self.params().page.saturating_sub(1);
        self.set_page(page);
    }

    pub fn list_key(&self) -> QueryKey {
        QueryKey::list(self.entity(), self.params())
    }

    /// Whether any list or detail fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.is_listing() || self.in_flight.fetching_detail.load(Ordering::SeqCst) > 0
    }

    pub fn is_listing(&self) -> bool {
        self.in_flight.listing.load(Ordering::SeqCst) > 0
    }

    pub fn is_creating(&self) -> bool {
        self.in_flight.creating.load(Ordering::SeqCst) > 0
    }

    pub fn is_updating(&self) -> bool {
        self.in_flight.updating.load(Ordering::SeqCst) > 0
    }

    pub fn is_deleting(&self) -> bool {
        self.in_flight.deleting.load(Ordering::SeqCst) > 0
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        op.retry(
            ConstantBuilder::default()
                .with_delay(self.retry_delay)
                .with_max_times(self.list_retries),
        )
        .when(|e: &ApiError| e.should_retry())
        .notify(|e: &ApiError, dur: Duration| {
            warn!(
                "{} query failed, retrying after {:.2}s: {}",
                self.entity(),
                dur.as_secs_f64(),
                e
            )
        })
        .await
    }

    /// Loads the current page, from cache while fresh.
    #[instrument(skip(self), fields(entity = %self.entity()))]
    pub async fn list(&self) -> Result<Page, ApiError> {
        let key = self.list_key();
        if let Some(view) = self.cache.lookup(key.clone()).await? {
            if view.fresh {
                if let Some(page) = view.data.into_page() {
                    debug!(key = %key, "Serving fresh page from cache");
                    self.record_list(&key, Ok(&page));
                    return Ok(page);
                }
            }
        }

        let _listing = InFlight::enter(&self.in_flight.listing);
        let result = self.with_retry(|| self.fetch_list(&key)).await;
        match &result {
            Ok(page) => self.record_list(&key, Ok(page)),
            Err(e) => {
                error!(key = %key, error = %e, "List query failed");
                self.record_list(&key, Err(e));
            }
        }
        result
    }

    async fn fetch_list(&self, key: &QueryKey) -> Result<Page, ApiError> {
        let QueryKey::List { params, .. } = key else {
            return Err(ApiError::Decode(format!("{key} is not a list query")));
        };
        let mut last = Page::default();
        for attempt in 1..=MAX_SUPERSEDED_REFETCHES {
            let ticket = self.cache.begin_fetch(self.entity().to_string()).await?;
            let page = self.client.list(*params).await?;
            match self
                .cache
                .complete_fetch(key.clone(), ticket, CachedData::Page(page.clone()))
                .await?
            {
                FetchOutcome::Stored(view) => return Ok(view.data.into_page().unwrap_or(page)),
                FetchOutcome::Superseded => {
                    debug!(key = %key, attempt, "Fetch superseded by a mutation, refetching");
                    last = page;
                }
            }
        }
        warn!(key = %key, "Fetch kept being superseded, returning uncached result");
        Ok(last)
    }

    fn record_list(&self, key: &QueryKey, result: Result<&Page, &ApiError>) {
        let mut state = self.state();
        match result {
            Ok(page) => {
                state.displayed = Some(key.clone());
                state.total = Some(page.meta.total);
                if state.error.as_ref().is_some_and(|(k, _)| k == key) {
                    state.error = None;
                }
            }
            Err(e) => state.error = Some((key.clone(), e.clone())),
        }
    }

    /// Cached view of the current page, or the previous page while this one loads.
    pub async fn list_state(&self) -> Result<ListState, ApiError> {
        let key = self.list_key();
        let (displayed, error) = {
            let state = self.state();
            let error = state
                .error
                .as_ref()
                .filter(|(k, _)| *k == key)
                .map(|(_, e)| e.clone());
            (state.displayed.clone(), error)
        };

        let mut page = self
            .cache
            .lookup(key.clone())
            .await?
            .and_then(|view| view.data.into_page());
        let mut is_placeholder = false;
        if page.is_none() {
            if let Some(previous) = displayed.filter(|previous| *previous != key) {
                page = self
                    .cache
                    .lookup(previous)
                    .await?
                    .and_then(|view| view.data.into_page());
                is_placeholder = page.is_some();
            }
        }

        let is_fetching = self.is_listing();
        Ok(ListState {
            params: key_params(&key),
            is_loading: is_fetching && (page.is_none() || is_placeholder),
            is_fetching,
            is_placeholder,
            page,
            error,
        })
    }

    /// Loads one record, from cache while fresh.
    #[instrument(skip(self), fields(entity = %self.entity(), id = %id))]
    pub async fn fetch_by_id(&self, id: &RecordId) -> Result<Record, ApiError> {
        let key = QueryKey::detail(self.entity(), id.clone());
        if let Some(view) = self.cache.lookup(key.clone()).await? {
            if view.fresh {
                return self.detail_record(id, view.data);
            }
        }

        let _fetching = InFlight::enter(&self.in_flight.fetching_detail);
        let result = self.with_retry(|| self.fetch_detail(&key, id)).await;
        if let Err(e) = &result {
            error!(error = %e, "Detail query failed");
        }
        result
    }

    async fn fetch_detail(&self, key: &QueryKey, id: &RecordId) -> Result<Record, ApiError> {
        let mut last = None;
        for attempt in 1..=MAX_SUPERSEDED_REFETCHES {
            let ticket = self.cache.begin_fetch(self.entity().to_string()).await?;
            let record = self.client.get_by_id(id).await?;
            match self
                .cache
                .complete_fetch(key.clone(), ticket, CachedData::Record(record.clone()))
                .await?
            {
                FetchOutcome::Stored(view) => return self.detail_record(id, view.data),
                FetchOutcome::Superseded => {
                    debug!(key = %key, attempt, "Fetch superseded by a mutation, refetching");
                    last = Some(record);
                }
            }
        }
        warn!(key = %key, "Fetch kept being superseded, returning uncached result");
        last.ok_or_else(|| self.not_found(id))
    }

    fn detail_record(&self, id: &RecordId, data: CachedData) -> Result<Record, ApiError> {
        match data {
            CachedData::Record(record) => Ok(record),
            _ => Err(self.not_found(id)),
        }
    }

    fn not_found(&self, id: &RecordId) -> ApiError {
        ApiError::NotFound {
            entity: self.entity().to_string(),
            id: id.to_string(),
        }
    }

    /// Records the outcome of a mutation and marks the entity stale.
    async fn settle<T>(&self, mutation: MutationId, result: Result<T, ApiError>) -> Result<T, ApiError> {
        self.cache.settle(mutation, result.is_ok()).await?;
        self.cache.invalidate(self.entity().to_string()).await?;
        if let Err(e) = &result {
            error!(mutation = %mutation, error = %e, "Mutation failed, optimistic change rolled back");
        }
        result
    }

    #[instrument(skip(self, record), fields(entity = %self.entity()))]
    pub async fn create(&self, record: Record) -> Result<Record, ApiError> {
        let _creating = InFlight::enter(&self.in_flight.creating);
        let op = OptimisticOp::Create {
            target: self.list_key(),
            record: record.clone(),
        };
        let mutation = self.cache.apply_optimistic(self.entity().to_string(), op).await?;
        let result = self.client.create(&record).await;
        let created = self.settle(mutation, result).await?;
        info!(id = ?created.id(self.descriptor()).map(|id| id.to_string()), "Record created");
        Ok(created)
    }

    #[instrument(skip(self, patch), fields(entity = %self.entity(), id = %id))]
    pub async fn update(&self, id: &RecordId, patch: Record) -> Result<Record, ApiError> {
        let _updating = InFlight::enter(&self.in_flight.updating);
        let op = OptimisticOp::Update {
            id_field: self.descriptor().id_field.clone(),
            id: id.clone(),
            patch: patch.clone(),
        };
        let mutation = self.cache.apply_optimistic(self.entity().to_string(), op).await?;
        let result = self.client.update(id, &patch).await;
        let updated = self.settle(mutation, result).await?;
        info!("Record updated");
        Ok(updated)
    }

    #[instrument(skip(self), fields(entity = %self.entity(), id = %id))]
    pub async fn delete(&self, id: &RecordId) -> Result<(), ApiError> {
        let _deleting = InFlight::enter(&self.in_flight.deleting);
        let op = OptimisticOp::Delete {
            id_field: self.descriptor().id_field.clone(),
            id: id.clone(),
        };
        let mutation = self.cache.apply_optimistic(self.entity().to_string(), op).await?;
        let result = self.client.delete(id).await;
        self.settle(mutation, result).await?;
        info!("Record deleted");
        Ok(())
    }
}

fn key_params(key: &QueryKey) -> PageParams {
    match key {
        QueryKey::List { params, .. } => *params,
        QueryKey::Detail { .. } => PageParams::default(),
    }
}
