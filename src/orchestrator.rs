//! Scrape orchestrator: single-flight, strictly sequential runs over sources.
//!
//! # Run lifecycle
//!
//! 1. A run claims the process-wide run flag (compare-and-set). A second start
//!    request while a run is active fails with [`RunError::Busy`]; it is never
//!    queued.
//! 2. The source list is resolved in registration order and a [`ScrapeRun`] is
//!    entered into the ledger and persisted.
//! 3. The sources are processed one at a time inside a spawned task that owns
//!    the run flag. Each source is stamped attempted, extracted, normalized and
//!    upserted, then stamped succeeded or counted as an error, and gets an
//!    audit row.
//! 4. An unbounded run waits for the task. A bounded run races it against a
//!    timer; on expiry the caller gets the partial result with `timedOut` set,
//!    no further source is started, and the in-flight source finishes in the
//!    background before the run flag is released.
//!
//! Failures are absorbed at the narrowest scope: a bad item is skipped, a bad
//! source is recorded as failed. Only [`RunError`]s escape.

use crate::error::{ExtractError, RunError, StoreError};
use crate::fetcher::Fetch;
use crate::ledger::RunLedger;
use crate::models::{
    RawItem, RunLogEntry, RunResult, RunStatus, ScrapeRun, Source, SourceRunDetail,
    SourceRunStatus, SourceTimestamp,
};
use crate::normalize::{normalize, resolve_url};
use crate::scrapers::{Extractor, page};
use crate::store::Store;
use crate::utils::truncate_for_log;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

/// Bounds for a selected run. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Wall-clock limit after which the caller gets a partial result.
    pub timeout: Option<Duration>,
    /// Stop starting new sources once this many net-new articles were stored.
    pub max_articles: Option<usize>,
}

/// Holds the run flag; releases it on drop, including on panic.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type SharedRun = Arc<Mutex<ScrapeRun>>;

struct Inner {
    fetcher: Arc<dyn Fetch>,
    store: Arc<dyn Store>,
    mirror_instances: Vec<String>,
    running: Arc<AtomicBool>,
    ledger: Mutex<RunLedger>,
}

/// Cheap to clone; clones share the run flag and the ledger.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        store: Arc<dyn Store>,
        mirror_instances: Vec<String>,
        ledger_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                mirror_instances,
                running: Arc::new(AtomicBool::new(false)),
                ledger: Mutex::new(RunLedger::new(ledger_capacity)),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Ledger entries, newest first.
    pub fn recent_runs(&self) -> Vec<ScrapeRun> {
        lock(&self.inner.ledger).recent()
    }

    pub fn get_run(&self, id: &str) -> Option<ScrapeRun> {
        lock(&self.inner.ledger).get(id).cloned()
    }

    fn try_acquire(&self) -> Result<RunGuard, RunError> {
        self.inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunGuard(Arc::clone(&self.inner.running)))
            .map_err(|_| {
                warn!("Rejected run request: a scrape is already in progress");
                RunError::Busy
            })
    }

    /// Scrape every enabled source.
    ///
    /// # Errors
    ///
    /// [`RunError::Busy`] if a run is active, [`RunError::Store`] if the source
    /// list cannot be read.
    pub async fn run_all(&self) -> Result<RunResult, RunError> {
        let guard = self.try_acquire()?;
        let sources = self.inner.store.list_enabled_sources().await?;
        self.execute(guard, sources, RunOptions::default()).await
    }

    /// Scrape the given sources, in registration order, within `options`.
    ///
    /// Explicitly selected sources run even when disabled; ids that are not
    /// registered are logged and ignored.
    pub async fn run_selected(
        &self,
        source_ids: &[i64],
        options: RunOptions,
    ) -> Result<RunResult, RunError> {
        let guard = self.try_acquire()?;
        let sources: Vec<Source> = self
            .inner
            .store
            .list_sources()
            .await?
            .into_iter()
            .filter(|s| source_ids.contains(&s.id))
            .collect();

        let unknown: Vec<i64> = source_ids
            .iter()
            .copied()
            .filter(|id| !sources.iter().any(|s| s.id == *id))
            .collect();
        if !unknown.is_empty() {
            warn!(?unknown, "Ignoring unregistered source ids");
        }

        self.execute(guard, sources, options).await
    }

    /// Scrape exactly one source, with the same bookkeeping as a full run.
    pub async fn run_single(&self, source_id: i64) -> Result<RunResult, RunError> {
        let guard = self.try_acquire()?;
        let source = self
            .inner
            .store
            .get_source(source_id)
            .await?
            .ok_or(RunError::UnknownSource(source_id))?;
        self.execute(guard, vec![source], RunOptions::default()).await
    }

    async fn execute(
        &self,
        guard: RunGuard,
        sources: Vec<Source>,
        options: RunOptions,
    ) -> Result<RunResult, RunError> {
        let started = Instant::now();
        let run = ScrapeRun::start(Uuid::new_v4().to_string(), sources.len());
        info!(
            run_id = %run.id,
            sources = sources.len(),
            timeout_ms = ?options.timeout.map(|t| t.as_millis()),
            max_articles = ?options.max_articles,
            "Scrape run started"
        );
        lock(&self.inner.ledger).insert(run.clone());
        if let Err(e) = self.inner.store.save_run(&run).await {
            warn!(run_id = %run.id, error = %e, "Failed to persist run start");
        }

        let shared: SharedRun = Arc::new(Mutex::new(run));
        let stop = Arc::new(AtomicBool::new(false));
        let mut task = {
            let this = self.clone();
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            tokio::spawn(
                async move {
                    // Dropped last, after the run is settled.
                    let _guard = guard;
                    let processed = AssertUnwindSafe(this.process_sources(
                        sources,
                        options.max_articles,
                        &shared,
                        &stop,
                    ))
                    .catch_unwind()
                    .await;
                    let timed_out = stop.load(Ordering::Acquire);
                    this.settle(processed.is_ok(), &shared, started, timed_out)
                        .await
                }
                .in_current_span(),
            )
        };

        let Some(limit) = options.timeout else {
            return task.await.map_err(|e| RunError::Aborted(e.to_string()))?;
        };

        tokio::select! {
            biased;
            joined = &mut task => joined.map_err(|e| RunError::Aborted(e.to_string()))?,
            _ = tokio::time::sleep(limit) => {
                let snapshot = {
                    let run = lock(&shared);
                    if run.details.len() < run.total {
                        stop.store(true, Ordering::Release);
                    }
                    run.clone()
                };
                let timed_out = snapshot.details.len() < snapshot.total;
                warn!(
                    run_id = %snapshot.id,
                    finished = snapshot.details.len(),
                    total = snapshot.total,
                    timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    timed_out,
                    "Run deadline passed; returning current result"
                );
                let mut result = snapshot.to_result(elapsed_ms(started));
                result.timed_out = timed_out;
                Ok(result)
            }
        }
    }

    /// Freeze the run, persist it and build the result. Called from the run task.
    async fn settle(
        &self,
        completed: bool,
        shared: &SharedRun,
        started: Instant,
        timed_out: bool,
    ) -> Result<RunResult, RunError> {
        let status = if completed {
            RunStatus::Completed
        } else {
            RunStatus::Error
        };
        let run = {
            let mut run = lock(shared);
            run.finish(status, timed_out);
            run.clone()
        };
        lock(&self.inner.ledger).update(&run);
        if let Err(e) = self.inner.store.save_run(&run).await {
            warn!(run_id = %run.id, error = %e, "Failed to persist run result");
        }

        let duration_ms = elapsed_ms(started);
        if !completed {
            error!(run_id = %run.id, finished = run.details.len(), "Scrape run panicked");
            return Err(RunError::Aborted("run task panicked".to_string()));
        }
        info!(
            run_id = %run.id,
            total = run.total,
            successful = run.successful,
            failed = run.failed,
            articles = run.articles,
            elapsed_ms = duration_ms,
            timed_out,
            "Scrape run finished"
        );
        Ok(run.to_result(duration_ms))
    }

    async fn process_sources(
        &self,
        sources: Vec<Source>,
        max_articles: Option<usize>,
        shared: &SharedRun,
        stop: &AtomicBool,
    ) {
        let run_id = lock(shared).id.clone();
        for (index, source) in sources.iter().enumerate() {
            if stop.load(Ordering::Acquire) {
                info!(remaining = sources.len() - index, "Stop requested; remaining sources not started");
                break;
            }

            let detail = self.run_source(&run_id, source).await;
            let run = {
                let mut run = lock(shared);
                run.record(detail);
                run.clone()
            };
            lock(&self.inner.ledger).update(&run);

            if max_articles.is_some_and(|cap| run.articles >= cap) {
                info!(
                    articles = run.articles,
                    cap = ?max_articles,
                    skipped = sources.len() - index - 1,
                    "Article cap reached; stopping run early"
                );
                break;
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(source = %source.name, source_id = source.id))]
    async fn run_source(&self, run_id: &str, source: &Source) -> SourceRunDetail {
        let store = &self.inner.store;
        let started = Instant::now();
        if let Err(e) = store
            .update_source_timestamp(source.id, SourceTimestamp::Attempted)
            .await
        {
            warn!(error = %e, "Failed to stamp source attempt");
        }

        let outcome = self.scrape_source(source).await;
        let duration_ms = elapsed_ms(started);

        let detail = match outcome {
            Ok(articles) => {
                if let Err(e) = store
                    .update_source_timestamp(source.id, SourceTimestamp::Succeeded)
                    .await
                {
                    warn!(error = %e, "Failed to stamp source success");
                }
                info!(articles, elapsed_ms = duration_ms, "Source scraped");
                SourceRunDetail {
                    source: source.name.clone(),
                    status: SourceRunStatus::Success,
                    articles,
                    duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, elapsed_ms = duration_ms, "Source failed");
                if let Err(e) = store.increment_source_error(source.id, &message).await {
                    warn!(error = %e, "Failed to record source error");
                }
                SourceRunDetail {
                    source: source.name.clone(),
                    status: SourceRunStatus::Failed,
                    articles: 0,
                    duration_ms,
                    error: Some(message),
                }
            }
        };

        let entry = RunLogEntry {
            run_id: run_id.to_string(),
            source_id: source.id,
            detail: detail.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = store.append_run_log(&entry).await {
            warn!(error = %e, "Failed to append run log");
        }
        detail
    }

    /// Extract and store one source's items; returns the net-new article count.
    async fn scrape_source(&self, source: &Source) -> Result<usize, ExtractError> {
        let items = Extractor::for_source(source)
            .extract(self.inner.fetcher.as_ref(), &self.inner.mirror_instances)
            .await?;
        debug!(found = items.len(), "Extracted items");

        let mut added = 0;
        for raw in items {
            let url = raw.url.clone();
            match self.ingest(source, raw).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!(%url, error = %e, "Failed to store item; skipping"),
            }
        }
        Ok(added)
    }

    /// Store one item. Returns `true` when the URL was not stored before.
    ///
    /// Known URLs take the fast path: their text fields are refreshed, nothing
    /// else is fetched and no tags are added.
    async fn ingest(&self, source: &Source, mut raw: RawItem) -> Result<bool, StoreError> {
        let store = &self.inner.store;
        let url = resolve_url(&source.url, &raw.url);

        if let Some(existing) = store.find_article_by_url(&url).await? {
            // A body fetched earlier outlives listing observations that carry none.
            let observed = raw.content.as_deref().is_some_and(|c| !c.trim().is_empty());
            let fetched_body = existing.content.filter(|c| *c != existing.excerpt);
            if !observed && fetched_body.is_some() {
                raw.content = fetched_body;
            }
            store.upsert_article(&normalize(raw, source, Utc::now())).await?;
            debug!(%url, "Refreshed known article");
            return Ok(false);
        }

        if source.fetch_full_content {
            match page::fetch_article_content(self.inner.fetcher.as_ref(), &url).await {
                Ok(body) if !body.is_empty() => raw.content = Some(body),
                Ok(_) => debug!(%url, "No article body found; keeping excerpt"),
                Err(e) => warn!(%url, error = %e, "Failed to fetch article body; keeping excerpt"),
            }
        }

        let article = normalize(raw, source, Utc::now());
        let stored = store.upsert_article(&article).await?;
        store.add_tags(stored.id, &article.tags).await?;
        debug!(
            %url,
            id = stored.id,
            title = %truncate_for_log(&article.title, 80),
            category = article.category.as_str(),
            "Stored new article"
        );
        Ok(true)
    }
}
