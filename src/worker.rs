//! Worker loop: the state machine that ties queue, fetch, classifier, and
//! media pipeline together for one worker process.
//!
//! Modes: queue (serve known pending work), explore (probe the identifier
//! space when the queue is empty), chain (ride locality among adjacent
//! identifiers), cooldown (full stop after repeated consecutive failures).
//! All cross-worker coordination goes through the [`Queue`] seam; the worker
//! itself holds no shared state and survives store outages by pausing and
//! retrying the iteration.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::classify::Classify;
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{Fetch, FetchError};
use crate::media::Archive;
use crate::model::{CertId, ItemOutcome, WorkItem};

/// Width of the hash-derived exploration offset. A heuristic for collision
/// reduction between pods, not a correctness guarantee — `insert_if_absent`
/// absorbs the rare collision.
const OFFSET_WIDTH: u64 = 1000;

/// How long to pause when the store is unreachable before retrying.
const STORE_RETRY: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The queue store's atomic operations, as seen by the worker loop.
pub trait Queue {
    fn claim_next(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<WorkItem>>> + Send;

    fn insert_if_absent(&self, id: CertId) -> impl Future<Output = Result<bool>> + Send;

    fn claim_for_chain(
        &self,
        id: CertId,
        worker_id: &str,
    ) -> impl Future<Output = Result<Option<WorkItem>>> + Send;

    fn mark(
        &self,
        id: CertId,
        outcome: ItemOutcome,
    ) -> impl Future<Output = Result<()>> + Send;

    fn pending_exists(&self) -> impl Future<Output = Result<bool>> + Send;
}

// ---------------------------------------------------------------------------
// Configuration and session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub cert_min: i64,
    pub cert_max: i64,
    pub jump_range: (i64, i64),
    pub wait_range_secs: (u64, u64),
    pub cooldown: Duration,
    pub error_threshold: u32,
    pub max_items: u64,
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            cert_min: config.cert_min,
            cert_max: config.cert_max,
            jump_range: config.jump_range,
            wait_range_secs: config.wait_range_secs,
            cooldown: config.cooldown,
            error_threshold: config.error_threshold,
            max_items: config.max_items,
        }
    }
}

/// Ephemeral per-process session state. Lost on restart; a restarted worker
/// simply resumes in queue mode.
#[derive(Debug)]
struct Session {
    consecutive_errors: u32,
    total_processed: u64,
    last_candidate: Option<i64>,
    offset: i64,
}

/// Deterministic per-identity offset so concurrently exploring workers
/// sample low-collision regions of the address space.
pub fn explore_offset(worker_id: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    worker_id.hash(&mut hasher);
    (hasher.finish() % OFFSET_WIDTH) as i64
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Orchestrator mode. Queue mode is both the initial state and where every
/// broken chain returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Queue,
    Explore,
    Chain { cursor: CertId },
    Cooldown,
}

pub struct Worker<Q, F, C, A> {
    queue: Q,
    fetcher: F,
    classifier: C,
    archive: A,
    config: WorkerConfig,
    session: Session,
    shutdown: Arc<Notify>,
    stopping: Arc<AtomicBool>,
}

impl<Q, F, C, A> Worker<Q, F, C, A>
where
    Q: Queue,
    F: Fetch,
    C: Classify,
    A: Archive,
{
    pub fn new(queue: Q, fetcher: F, classifier: C, archive: A, config: WorkerConfig) -> Self {
        let offset = explore_offset(&config.worker_id);
        Self {
            queue,
            fetcher,
            classifier,
            archive,
            config,
            session: Session {
                consecutive_errors: 0,
                total_processed: 0,
                last_candidate: None,
                offset,
            },
            shutdown: Arc::new(Notify::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for an external stop signal. The current in-flight item always
    /// finishes its `mark` call before the loop exits.
    pub fn shutdown_notify(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    /// Run until an external stop signal or the configured maximum processed
    /// count is reached.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            worker = %self.config.worker_id,
            offset = self.session.offset,
            "worker started in queue mode"
        );

        let mut mode = Mode::Queue;
        while !self.stopping() && self.session.total_processed < self.config.max_items {
            mode = match mode {
                Mode::Queue => self.queue_step().await,
                Mode::Explore => self.explore_step().await,
                Mode::Chain { cursor } => self.chain_step(cursor).await,
                Mode::Cooldown => self.cooldown_step().await,
            };
        }

        info!(
            worker = %self.config.worker_id,
            processed = self.session.total_processed,
            "worker stopped"
        );
        Ok(())
    }

    // -- mode steps ---------------------------------------------------------

    async fn queue_step(&mut self) -> Mode {
        match self.queue.claim_next(&self.config.worker_id).await {
            Ok(Some(item)) => {
                debug!(cert = %item.cert_id, "claimed from queue");
                self.run_item(item.cert_id).await
            }
            Ok(None) => {
                debug!("queue empty, switching to exploration");
                Mode::Explore
            }
            Err(e) => {
                warn!("store unreachable during claim: {e}");
                self.pause(STORE_RETRY).await;
                Mode::Queue
            }
        }
    }

    async fn explore_step(&mut self) -> Mode {
        let candidate = self.next_candidate();
        self.session.last_candidate = Some(candidate.0);

        match self.queue.insert_if_absent(candidate).await {
            Ok(false) => {
                // Already known; recheck the queue before probing further, in
                // case another worker enqueued fresh work meanwhile.
                debug!(cert = %candidate, "exploration candidate already known");
                match self.queue.pending_exists().await {
                    Ok(true) => Mode::Queue,
                    Ok(false) => Mode::Explore,
                    Err(e) => {
                        warn!("store unreachable during pending check: {e}");
                        self.pause(STORE_RETRY).await;
                        Mode::Queue
                    }
                }
            }
            Ok(true) => match self
                .queue
                .claim_for_chain(candidate, &self.config.worker_id)
                .await
            {
                Ok(Some(_)) => {
                    info!(cert = %candidate, "exploring new identifier");
                    self.run_item(candidate).await
                }
                // Another worker raced us to the row we just inserted.
                // Benign; fall back to the queue.
                Ok(None) => Mode::Queue,
                Err(e) => {
                    warn!("store unreachable during exploration claim: {e}");
                    self.pause(STORE_RETRY).await;
                    Mode::Queue
                }
            },
            Err(e) => {
                warn!("store unreachable during exploration insert: {e}");
                self.pause(STORE_RETRY).await;
                Mode::Queue
            }
        }
    }

    async fn chain_step(&mut self, cursor: CertId) -> Mode {
        if cursor.0 > self.config.cert_max {
            debug!(cert = %cursor, "chain ran past the upper bound");
            return Mode::Queue;
        }

        match self
            .queue
            .claim_for_chain(cursor, &self.config.worker_id)
            .await
        {
            Ok(Some(_)) => self.run_item(cursor).await,
            Ok(None) => {
                debug!(cert = %cursor, "chain neighbor owned elsewhere, returning to queue");
                Mode::Queue
            }
            Err(e) => {
                warn!("store unreachable during chain claim: {e}");
                self.pause(STORE_RETRY).await;
                Mode::Queue
            }
        }
    }

    async fn cooldown_step(&mut self) -> Mode {
        warn!(
            errors = self.session.consecutive_errors,
            secs = self.config.cooldown.as_secs(),
            "consecutive-error threshold reached, cooling down"
        );
        self.pause(self.config.cooldown).await;
        self.session.consecutive_errors = 0;
        Mode::Queue
    }

    // -- per-item processing ------------------------------------------------

    /// Process one claimed identifier and report its outcome to the store
    /// before deciding the next mode, so store state and worker state cannot
    /// diverge across a crash.
    async fn run_item(&mut self, id: CertId) -> Mode {
        let outcome = self.process(id).await;

        if let Err(e) = self.queue.mark(id, outcome).await {
            warn!(cert = %id, "failed to record outcome: {e}");
            self.pause(STORE_RETRY).await;
            return Mode::Queue;
        }
        self.session.total_processed += 1;

        let next = match outcome {
            ItemOutcome::Done => {
                self.session.consecutive_errors = 0;
                // Forward chain: adjacent identifiers tend to share fate.
                Mode::Chain { cursor: id.succ() }
            }
            ItemOutcome::Skipped => {
                // Deliberate skip on a healthy fetch.
                self.session.consecutive_errors = 0;
                Mode::Queue
            }
            ItemOutcome::Stale | ItemOutcome::Error => {
                // A sustained run of either means upstream rate limiting or
                // bot checks, so both feed the cooldown counter.
                self.session.consecutive_errors += 1;
                if self.session.consecutive_errors >= self.config.error_threshold {
                    Mode::Cooldown
                } else {
                    Mode::Queue
                }
            }
        };

        self.pace().await;
        next
    }

    async fn process(&self, id: CertId) -> ItemOutcome {
        let html = match self.fetcher.fetch(id).await {
            Ok(html) => html,
            Err(FetchError::Network(e)) => {
                warn!(cert = %id, "fetch network error: {e}");
                return ItemOutcome::Error;
            }
            Err(e @ (FetchError::Timeout | FetchError::Challenge)) => {
                warn!(cert = %id, "page failed to load: {e}");
                return ItemOutcome::Stale;
            }
        };

        if !self.classifier.page_matches(&html, id) {
            warn!(cert = %id, "rendered page does not show this cert");
            return ItemOutcome::Stale;
        }

        let record = self.classifier.classify(&html);
        if let Some(reason) = record.exclusion {
            info!(cert = %id, %reason, "ineligible, skipping");
            return ItemOutcome::Skipped;
        }
        if record.media.is_empty() {
            info!(cert = %id, "no live media references, skipping");
            return ItemOutcome::Skipped;
        }

        match self.archive.archive(id, record.grade, &record.media).await {
            Ok(0) => ItemOutcome::Error,
            Ok(sides) => {
                info!(cert = %id, grade = %record.grade, sides, "archived");
                ItemOutcome::Done
            }
            Err(e) => {
                warn!(cert = %id, "media pipeline error: {e}");
                ItemOutcome::Error
            }
        }
    }

    // -- pacing and candidates ----------------------------------------------

    /// Synthesize the next exploration candidate: resume from the last
    /// position, jump a random distance, add the identity offset, wrap at
    /// the bounds.
    fn next_candidate(&self) -> CertId {
        let (jump_min, jump_max) = self.config.jump_range;
        let start = self
            .session
            .last_candidate
            .unwrap_or(self.config.cert_min)
            .max(self.config.cert_min);

        let jump = rand::thread_rng().gen_range(jump_min..=jump_max);
        let mut candidate = start + jump + self.session.offset;
        if candidate > self.config.cert_max || candidate < self.config.cert_min {
            debug!(bound = self.config.cert_max, "exploration wrapped to lower bound");
            candidate = self.config.cert_min;
        }
        CertId(candidate)
    }

    /// Random inter-request wait, so the fleet's requests never synchronize.
    async fn pace(&self) {
        let (lo, hi) = self.config.wait_range_secs;
        let wait = rand::thread_rng().gen_range(lo as f64..=hi as f64);
        self.pause(Duration::from_secs_f64(wait)).await;
    }

    /// Sleep that wakes early on the stop signal.
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.shutdown.notified() => {
                info!("stop signal received, finishing up");
                self.stopping.store(true, Ordering::Relaxed);
            }
            _ = tokio::time::sleep(duration) => {}
        }
    }
}
