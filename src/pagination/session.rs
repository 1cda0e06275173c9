//! Per-entity pagination session.

use crate::chain::{merge_entries, ChainWalker, ResolvedCache, WalkStop};
use crate::content::ContentStoreClient;
use crate::error::{HistoryError, Result};
use crate::events::EventLog;
use crate::types::{
    Completeness, ContentId, EntityId, EntrySource, HistoryEntry, PageView, PaginationState,
};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lifecycle of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Loading { page: u32 },
    Ready,
    Error { message: String },
}

#[derive(Default)]
struct SessionInner {
    state: SessionState,
    generation: u64,
    in_flight: CancellationToken,
    /// Loaded event pages by `(page, page_size)`.
    pages: HashMap<(u32, u32), PageView>,
    /// Deep-walk pages by `(start, page, page_size)`.
    walks: HashMap<(ContentId, u32, u32), PageView>,
    /// Event count reported by the log on the last load.
    total_items: Option<u64>,
    /// Every entry this session resolved, by version.
    chain: BTreeMap<u64, HistoryEntry>,
}

/// History view of a single entity.
pub struct HistorySession {
    entity_id: EntityId,
    content: Arc<ContentStoreClient>,
    log: Arc<dyn EventLog>,
    cache: Arc<ResolvedCache>,
    walker: ChainWalker,
    max_concurrent_fetches: usize,
    inner: Mutex<SessionInner>,
}

impl HistorySession {
    pub(crate) fn new(
        entity_id: EntityId,
        content: Arc<ContentStoreClient>,
        log: Arc<dyn EventLog>,
        cache: Arc<ResolvedCache>,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            walker: ChainWalker::new(Arc::clone(&content), Arc::clone(&cache)),
            entity_id,
            content,
            log,
            cache,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    /// Number of distinct versions this session has resolved.
    pub fn known_versions(&self) -> usize {
        self.inner.lock().chain.len()
    }

    /// Load one page of the entity's event log, newest first.
    ///
    /// A page that loaded completely is returned as-is until the session is
    /// invalidated. Partial pages are fetched again on the next request.
    pub async fn load_page(&self, page: u32, page_size: u32) -> Result<PageView> {
        check_page_size(page_size)?;
        {
            let inner = self.inner.lock();
            if let Some(view) = inner.pages.get(&(page, page_size)) {
                return Ok(view.clone());
            }
            let total_pages = inner
                .total_items
                .map(|total| PaginationState::compute(page, page_size, total).total_pages);
            check_page(page, total_pages)?;
        }

        let (generation, loaded) = self.guarded(page, self.fetch_page(page, page_size)).await?;
        let (view, resolved) = loaded;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return Err(HistoryError::Cancelled);
        }
        for entry in &resolved {
            self.cache.insert(&self.entity_id, entry);
            inner.chain.entry(entry.version()).or_insert_with(|| entry.clone());
        }
        inner.total_items = Some(view.pagination.total_items);
        if view.completeness.is_complete() {
            inner.pages.insert((page, page_size), view.clone());
        }
        inner.state = SessionState::Ready;

        Ok(view)
    }

    /// Page through the full chain behind `start`, walking pointers as needed.
    pub async fn walk_full_history(
        &self,
        start: &HistoryEntry,
        page: u32,
        page_size: u32,
    ) -> Result<PageView> {
        check_page_size(page_size)?;
        start.snapshot.validate()?;
        let total_items = start.version() + 1;
        let pagination = PaginationState::compute(page, page_size, total_items);
        check_page(page, Some(pagination.total_pages))?;

        let key = (start.content_id.clone(), page, page_size);
        let known = {
            let inner = self.inner.lock();
            if let Some(view) = inner.walks.get(&key) {
                return Ok(view.clone());
            }
            self.contiguous_from(&inner.chain, start)
        };

        let needed = ((page as u64) * (page_size as u64)).min(total_items) as usize;

        let (generation, (chain, completeness, unreachable)) = self
            .guarded(page, async {
                let tail = known.last().cloned().unwrap_or_else(|| start.clone());
                if known.len() >= needed || tail.snapshot.is_genesis() {
                    return Ok((known.clone(), Completeness::Complete, Vec::new()));
                }

                let outcome = self
                    .walker
                    .walk_backward(&self.entity_id, &tail, needed - known.len())
                    .await;

                let (completeness, unreachable) = match &outcome.stop {
                    WalkStop::BrokenLink {
                        content_id,
                        expected_version,
                        reason,
                    } => (
                        Completeness::Partial {
                            reason: format!("version {} unreachable: {}", expected_version, reason),
                        },
                        vec![content_id.clone()],
                    ),
                    _ => (Completeness::Complete, Vec::new()),
                };
                Ok((merge_entries(&known, outcome.entries), completeness, unreachable))
            })
            .await?;

        let skip = (page as usize - 1) * page_size as usize;
        let entries: Vec<HistoryEntry> = chain
            .iter()
            .skip(skip)
            .take(page_size as usize)
            .cloned()
            .collect();

        let view = PageView {
            entries,
            pagination,
            completeness,
            unreachable,
        };

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return Err(HistoryError::Cancelled);
        }
        for entry in &chain {
            inner.chain.entry(entry.version()).or_insert_with(|| entry.clone());
        }
        // Partial walks are not pinned so a retry can get further
        if view.completeness.is_complete() {
            inner.walks.insert(key, view.clone());
        }
        inner.state = SessionState::Ready;

        Ok(view)
    }

    /// Cancel the in-flight request, if any. Its results are discarded.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.in_flight.cancel();
        if matches!(inner.state, SessionState::Loading { .. }) {
            inner.state = SessionState::Idle;
        }
    }

    /// Drop loaded pages and totals; the next request re-fetches.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.in_flight.cancel();
        inner.pages.clear();
        inner.walks.clear();
        inner.total_items = None;
        inner.state = SessionState::Idle;
    }

    /// Run `work` as the session's current request.
    ///
    /// Any earlier in-flight request is cancelled. Returns the generation the
    /// work ran under; callers must re-check it before applying results.
    async fn guarded<T>(
        &self,
        page: u32,
        work: impl Future<Output = Result<T>>,
    ) -> Result<(u64, T)> {
        let (generation, token) = {
            let mut inner = self.inner.lock();
            inner.in_flight.cancel();
            inner.generation += 1;
            inner.in_flight = CancellationToken::new();
            inner.state = SessionState::Loading { page };
            (inner.generation, inner.in_flight.clone())
        };

        let result = tokio::select! {
            _ = token.cancelled() => Err(HistoryError::Cancelled),
            result = work => result,
        };

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(entity = %self.entity_id, page, "discarding superseded request");
            return Err(HistoryError::Cancelled);
        }

        match result {
            Ok(value) => Ok((generation, value)),
            Err(HistoryError::Cancelled) => Err(HistoryError::Cancelled),
            Err(e) => {
                warn!(entity = %self.entity_id, page, error = %e, "history load failed");
                inner.state = SessionState::Error {
                    message: e.to_string(),
                };
                Err(e)
            }
        }
    }

    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<(PageView, Vec<HistoryEntry>)> {
        let event_page = self.log.query_page(&self.entity_id, page, page_size).await?;

        let mut results: Vec<(usize, ContentId, Result<HistoryEntry>)> =
            stream::iter(event_page.events.into_iter().enumerate())
                .map(|(i, event)| async move {
                    let id = event.content_identifier;
                    let result = self.resolve_entry(&id).await;
                    (i, id, result)
                })
                .buffer_unordered(self.max_concurrent_fetches)
                .collect()
                .await;
        results.sort_by_key(|(i, _, _)| *i);

        let mut resolved = Vec::with_capacity(results.len());
        let mut unreachable = Vec::new();
        for (i, id, result) in results {
            match result {
                Ok(entry) => resolved.push(entry),
                // The newest event is the first thing the page renders
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    warn!(
                        entity = %self.entity_id,
                        content_id = %id,
                        error = %e,
                        "event unresolvable"
                    );
                    unreachable.push(id);
                }
            }
        }

        let completeness = if unreachable.is_empty() {
            Completeness::Complete
        } else {
            Completeness::Partial {
                reason: format!("{} of the page's versions are unreachable", unreachable.len()),
            }
        };

        let view = PageView {
            entries: merge_entries(&[], resolved.iter().cloned()),
            pagination: PaginationState::compute(page, page_size, event_page.total_items),
            completeness,
            unreachable,
        };
        Ok((view, resolved))
    }

    async fn resolve_entry(&self, content_id: &ContentId) -> Result<HistoryEntry> {
        if let Some(entry) = self.cache.get_by_content(&self.entity_id, content_id) {
            return Ok(entry);
        }
        let snapshot = self.content.resolve(content_id).await?;
        Ok(HistoryEntry::new(content_id.clone(), snapshot, EntrySource::Fetched))
    }

    /// Entries known to continue the chain behind `start` without a gap,
    /// newest first, `start` included.
    fn contiguous_from(
        &self,
        chain: &BTreeMap<u64, HistoryEntry>,
        start: &HistoryEntry,
    ) -> Vec<HistoryEntry> {
        let mut run = vec![start.clone()];
        let mut current = start.clone();

        while let Some(prev_version) = current.version().checked_sub(1) {
            let next = chain
                .get(&prev_version)
                .cloned()
                .or_else(|| self.cache.get(&self.entity_id, prev_version));
            match next {
                Some(entry) if entry.content_id == current.snapshot.previous_version => {
                    run.push(entry.clone());
                    current = entry;
                }
                _ => break,
            }
        }

        run
    }
}

fn check_page_size(page_size: u32) -> Result<()> {
    if page_size == 0 {
        return Err(HistoryError::InvalidArgument("page size must be at least 1".into()));
    }
    Ok(())
}

fn check_page(page: u32, total_pages: Option<u32>) -> Result<()> {
    let out_of_range = match total_pages {
        _ if page == 0 => true,
        Some(total) => page > total.max(1),
        None => false,
    };
    if out_of_range {
        return Err(HistoryError::InvalidPage {
            page,
            total_pages: total_pages.unwrap_or(0),
        });
    }
    Ok(())
}
