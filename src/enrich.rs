//! Resumable enrichment pipeline.
//!
//! Items lacking a summary or embedding are queued in a durable
//! [`IndexJob`] and processed in fixed-size chunks:
//!
//! ```text
//! chunk ─► readme fetch pool ─► AI summary batches ─► embed + write pool
//!          (bounded, cached)    (sequential)           (bounded)
//!       ─► checkpoint job
//! ```
//!
//! The job is saved after every chunk, so an interrupted run resumes from
//! its last checkpoint. Per-item failures are logged and counted, and the
//! item stays unenriched for a later run. Auth failures stop the run
//! without touching the checkpoint.
//!
//! Only one run may be active per service. [`EnrichmentService::run`] and
//! [`EnrichmentService::start`] take a single-flight guard and fail with
//! [`ShelfError::EnrichmentInProgress`] while another run holds it.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use starshelf_core::clients::{embedding_text, AiClient, EnrichRequest, EnrichResult, SourceClient};
use starshelf_core::error::{is_auth_error, ShelfError};
use starshelf_core::index::IndexBackend;
use starshelf_core::models::{IndexJob, Item, ItemId};
use starshelf_core::store::{ItemStore, VECTOR_SNAPSHOT};
use starshelf_core::text::truncate_chars;

use crate::config::EnrichmentConfig;
use crate::progress::{EnrichProgressEvent, EnrichProgressReporter, NoProgress};

#[derive(Debug, Clone)]
pub struct EnrichSettings {
    pub fetch_concurrency: usize,
    pub write_concurrency: usize,
    pub ai_batch_size: usize,
    pub chunk_size: usize,
    pub readme_max_chars: usize,
}

impl From<&EnrichmentConfig> for EnrichSettings {
    fn from(c: &EnrichmentConfig) -> Self {
        Self {
            fetch_concurrency: c.fetch_concurrency.max(1),
            write_concurrency: c.write_concurrency.max(1),
            ai_batch_size: c.ai_batch_size.max(1),
            chunk_size: c.chunk_size.max(1),
            readme_max_chars: c.readme_max_chars,
        }
    }
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self::from(&EnrichmentConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichOptions {
    /// Re-fetch cached readmes and queue already-enriched items too.
    pub force: bool,
    /// Stop after this many chunks, leaving the job persisted.
    pub max_chunks: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    pub job_id: Option<String>,
    /// Items taken off the queue in this run.
    pub processed: usize,
    pub enriched: usize,
    pub failed: usize,
    /// Items still queued when the run ended.
    pub remaining: usize,
    pub resumed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichStatus {
    pub running: bool,
    pub job: Option<IndexJob>,
    pub total_items: usize,
    pub pending_items: usize,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    enriched: usize,
    failed: usize,
}

/// Holds the single-flight flag for the duration of a run.
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ShelfError::EnrichmentInProgress)?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct EnrichmentService<S, I> {
    store: Arc<S>,
    source: Arc<dyn SourceClient>,
    ai: Arc<dyn AiClient>,
    indexes: Arc<I>,
    settings: EnrichSettings,
    progress: Arc<dyn EnrichProgressReporter>,
    running: Arc<AtomicBool>,
}

impl<S, I> EnrichmentService<S, I>
where
    S: ItemStore + 'static,
    I: IndexBackend + 'static,
{
    pub fn new(
        store: Arc<S>,
        source: Arc<dyn SourceClient>,
        ai: Arc<dyn AiClient>,
        indexes: Arc<I>,
        settings: EnrichSettings,
    ) -> Self {
        Self {
            store,
            source,
            ai,
            indexes,
            settings,
            progress: Arc::new(NoProgress),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn EnrichProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run to completion (or `max_chunks`) on the current task.
    pub async fn run(&self, opts: EnrichOptions) -> Result<EnrichReport> {
        let guard = RunGuard::acquire(&self.running)?;
        self.run_guarded(guard, opts).await
    }

    /// Take the guard now and run on a background task.
    pub fn start(
        self: &Arc<Self>,
        opts: EnrichOptions,
    ) -> Result<JoinHandle<Result<EnrichReport>>> {
        let guard = RunGuard::acquire(&self.running)?;
        let service = self.clone();
        Ok(tokio::spawn(async move {
            let result = service.run_guarded(guard, opts).await;
            if let Err(e) = &result {
                error!("background enrichment failed: {:#}", e);
            }
            result
        }))
    }

    /// Startup reconciliation: resume a persisted job with work left.
    pub async fn resume_pending(&self) -> Result<Option<EnrichReport>> {
        match self.store.load_job().await? {
            Some(job) if !job.is_complete() => {
                info!(
                    job_id = %job.id,
                    remaining = job.queue.len(),
                    "resuming persisted enrichment job"
                );
                self.run(EnrichOptions::default()).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    pub async fn status(&self) -> Result<EnrichStatus> {
        let items = self.store.list_items().await?;
        Ok(EnrichStatus {
            running: self.is_running(),
            job: self.store.load_job().await?,
            total_items: items.len(),
            pending_items: items.iter().filter(|i| i.needs_enrichment()).count(),
        })
    }

    async fn run_guarded(&self, _guard: RunGuard, opts: EnrichOptions) -> Result<EnrichReport> {
        let (mut job, resumed) = match self.store.load_job().await? {
            Some(job) if !job.is_complete() => (job, true),
            stale => {
                if let Some(done) = stale {
                    self.store.clear_job(&done.id).await?;
                }
                let items = self.store.list_items().await?;
                let queue: Vec<ItemId> = items
                    .iter()
                    .filter(|i| opts.force || i.needs_enrichment())
                    .map(|i| i.id)
                    .collect();
                if queue.is_empty() {
                    info!("nothing to enrich");
                    return Ok(EnrichReport::default());
                }
                let job = IndexJob::new(uuid::Uuid::new_v4().to_string(), queue);
                self.store.save_job(&job).await?;
                (job, false)
            }
        };

        info!(job_id = %job.id, done = job.done, total = job.total, resumed, "enrichment started");
        self.progress.report(EnrichProgressEvent::Started {
            total: job.total,
            done: job.done,
            resumed,
        });

        let mut report = EnrichReport {
            job_id: Some(job.id.clone()),
            resumed,
            ..Default::default()
        };
        let mut chunks = 0usize;

        while !job.is_complete() {
            if opts.max_chunks.is_some_and(|max| chunks >= max) {
                break;
            }
            let take = self.settings.chunk_size.min(job.queue.len());
            let chunk: Vec<ItemId> = job.queue[..take].to_vec();

            // An error here (auth) leaves the last checkpoint as it was.
            let outcome = self.process_chunk(&chunk, opts.force, job.created_at).await?;

            job.advance(take);
            if let Err(violation) = job.check_invariant() {
                error!(job_id = %job.id, "{}", violation);
            }
            self.store.save_job(&job).await?;

            chunks += 1;
            report.processed += take;
            report.enriched += outcome.enriched;
            report.failed += outcome.failed;
            debug!(job_id = %job.id, done = job.done, total = job.total, "checkpoint saved");
            self.progress.report(EnrichProgressEvent::Checkpoint {
                done: job.done,
                total: job.total,
                failed: report.failed,
            });
        }

        report.remaining = job.queue.len();
        if job.is_complete() {
            self.store.clear_job(&job.id).await?;
            let snapshot = self.indexes.snapshot().await?;
            self.store.save_snapshot(VECTOR_SNAPSHOT, &snapshot).await?;
            info!(
                job_id = %job.id,
                enriched = report.enriched,
                failed = report.failed,
                "enrichment complete"
            );
        } else {
            info!(job_id = %job.id, remaining = report.remaining, "enrichment paused");
        }

        self.progress.report(EnrichProgressEvent::Finished {
            processed: report.processed,
            enriched: report.enriched,
            failed: report.failed,
        });
        Ok(report)
    }

    /// Enrich one chunk of queued ids. Items already enriched (or, under
    /// `force`, re-enriched since the job was created) are counted and
    /// skipped: they were written before an interrupted checkpoint.
    async fn process_chunk(
        &self,
        ids: &[ItemId],
        force: bool,
        job_started: DateTime<Utc>,
    ) -> Result<ChunkOutcome> {
        let items = self.store.get_items(ids).await?;
        if items.len() < ids.len() {
            debug!(missing = ids.len() - items.len(), "queued items no longer in store");
        }

        let (done, mut items): (Vec<Item>, Vec<Item>) = items
            .into_iter()
            .partition(|item| already_enriched(item, force, job_started));
        if !done.is_empty() {
            debug!(skipped = done.len(), "skipping items that are already enriched");
        }

        self.fetch_readmes(&mut items, force).await?;
        let results = self.summarize(&items).await?;
        let mut outcome = self.write_results(items, results).await?;
        outcome.enriched += done.len();
        Ok(outcome)
    }

    /// Fill in readmes through the bounded fetch pool. Cached readmes are
    /// kept unless `force`. A repository without a readme caches as empty.
    async fn fetch_readmes(&self, items: &mut [Item], force: bool) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.settings.fetch_concurrency));
        let mut tasks = JoinSet::new();

        for item in items.iter().filter(|i| force || i.readme.is_none()) {
            let source = self.source.clone();
            let semaphore = semaphore.clone();
            let (id, owner, name) = (item.id, item.owner.clone(), item.name.clone());
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (id, source.fetch_readme(&owner, &name).await)
            });
        }

        let mut fetched: HashMap<ItemId, String> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (id, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("readme fetch task failed: {}", e);
                    continue;
                }
            };
            match result {
                Ok(text) => {
                    let text = text.unwrap_or_default();
                    let text = truncate_chars(&text, self.settings.readme_max_chars);
                    fetched.insert(id, text.to_string());
                }
                Err(e) if is_auth_error(&e) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => warn!(item_id = id, "readme fetch failed: {:#}", e),
            }
        }

        for item in items.iter_mut() {
            if let Some(text) = fetched.remove(&item.id) {
                item.readme = Some(text);
            }
        }
        Ok(())
    }

    /// Summaries for every item, one AI batch at a time. A failed batch,
    /// or ids a batch left out, fall back to single-item calls.
    async fn summarize(&self, items: &[Item]) -> Result<HashMap<ItemId, EnrichResult>> {
        let mut results: HashMap<ItemId, EnrichResult> = HashMap::new();

        for batch in items.chunks(self.settings.ai_batch_size) {
            let requests: Vec<EnrichRequest> = batch
                .iter()
                .map(|i| EnrichRequest::from_item(i, self.settings.readme_max_chars))
                .collect();

            let missing: Vec<&EnrichRequest> = match self.ai.summarize_and_tag(&requests).await {
                Ok(answers) => {
                    for answer in answers {
                        results.entry(answer.id).or_insert(answer);
                    }
                    requests.iter().filter(|r| !results.contains_key(&r.id)).collect()
                }
                Err(e) if is_auth_error(&e) => return Err(e),
                Err(e) => {
                    warn!(batch = requests.len(), "AI batch failed, retrying per item: {:#}", e);
                    requests.iter().collect()
                }
            };

            for request in missing {
                match self.ai.summarize_and_tag(std::slice::from_ref(request)).await {
                    Ok(answers) => match answers.into_iter().find(|a| a.id == request.id) {
                        Some(answer) => {
                            results.insert(answer.id, answer);
                        }
                        None => warn!(item_id = request.id, "AI returned no summary"),
                    },
                    Err(e) if is_auth_error(&e) => return Err(e),
                    Err(e) => warn!(item_id = request.id, "AI summary failed: {:#}", e),
                }
            }
        }

        Ok(results)
    }

    /// Embed and persist through the bounded write pool. Items without a
    /// summary are still written so their readme stays cached.
    async fn write_results(
        &self,
        items: Vec<Item>,
        mut results: HashMap<ItemId, EnrichResult>,
    ) -> Result<ChunkOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.settings.write_concurrency));
        let mut tasks = JoinSet::new();

        for mut item in items {
            let result = results.remove(&item.id);
            let (store, indexes, ai) = (self.store.clone(), self.indexes.clone(), self.ai.clone());
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let id = item.id;
                let enriched = write_item(&*store, &*indexes, &*ai, &mut item, result).await;
                (id, enriched)
            });
        }

        let mut outcome = ChunkOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(true))) => outcome.enriched += 1,
                Ok((_, Ok(false))) => outcome.failed += 1,
                Ok((_, Err(e))) if is_auth_error(&e) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Ok((id, Err(e))) => {
                    warn!(item_id = id, "failed to write item: {:#}", e);
                    outcome.failed += 1;
                }
                Err(e) => {
                    warn!("write task failed: {}", e);
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }
}

fn already_enriched(item: &Item, force: bool, job_started: DateTime<Utc>) -> bool {
    if item.needs_enrichment() {
        return false;
    }
    !force || item.enriched_at.is_some_and(|t| t >= job_started)
}

/// Apply one summary, embed, and write to the store and indexes.
/// Returns whether the item ended up fully enriched.
async fn write_item<S: ItemStore, I: IndexBackend>(
    store: &S,
    indexes: &I,
    ai: &dyn AiClient,
    item: &mut Item,
    result: Option<EnrichResult>,
) -> Result<bool> {
    if let Some(result) = result {
        item.ai_summary = Some(result.summary);
        item.ai_tags = result.tags;
        match ai.embed(&embedding_text(item)).await {
            Ok(vector) if !vector.is_empty() => {
                item.embedding = vector;
                item.enriched_at = Some(Utc::now());
            }
            Ok(_) => warn!(item_id = item.id, "AI returned an empty embedding"),
            Err(e) if is_auth_error(&e) => return Err(e),
            Err(e) => warn!(item_id = item.id, "embedding failed: {:#}", e),
        }
    }

    store.upsert_item(item).await?;
    indexes.upsert(item.clone()).await?;
    Ok(!item.needs_enrichment())
}
