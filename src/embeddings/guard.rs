// retrieval-core/src/embeddings/guard.rs
//
// Timeout and bounded retry around an encoder

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::VectorEncoder;
use crate::config::EmbeddingConfig;
use crate::error::EncodeError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How an encoder call is bounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-call deadline; `None` runs the call inline without a deadline
    pub timeout: Option<Duration>,
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

impl From<&EmbeddingConfig> for RetryPolicy {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            timeout: Some(Duration::from_millis(config.timeout_ms)),
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

type Reply = Sender<Result<Vec<f32>, EncodeError>>;

/// One encoder call handed to a worker. Calls still queued after their
/// deadline are dropped without running.
struct Job {
    text: String,
    deadline: Instant,
    reply: Reply,
}

/// Wraps an encoder with a deadline per call and retries with exponential
/// backoff. Non-retryable errors are returned immediately.
///
/// Timed calls run on a fixed set of worker threads. A call that outlives
/// its deadline keeps its worker busy until the encoder returns, and its late
/// result is dropped, so at most `workers` timed-out calls are ever in
/// flight. Workers exit once the guard is dropped and their current call
/// finishes.
pub struct GuardedEncoder {
    inner: Arc<dyn VectorEncoder>,
    policy: RetryPolicy,
    jobs: Option<Sender<Job>>,
    workers: usize,
}

impl GuardedEncoder {
    /// One worker per available core.
    pub fn new(inner: Arc<dyn VectorEncoder>, policy: RetryPolicy) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_workers(inner, policy, workers)
    }

    pub fn with_workers(
        inner: Arc<dyn VectorEncoder>,
        policy: RetryPolicy,
        workers: usize,
    ) -> Self {
        if policy.timeout.is_none() {
            return Self {
                inner,
                policy,
                jobs: None,
                workers: 0,
            };
        }

        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let mut spawned = 0;
        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let inner = Arc::clone(&inner);
            let started = std::thread::Builder::new()
                .name(format!("encoder-worker-{i}"))
                .spawn(move || worker_loop(inner.as_ref(), &rx));
            match started {
                Ok(_) => spawned += 1,
                Err(e) => tracing::error!(error = %e, "cannot spawn encoder worker"),
            }
        }
        Self {
            inner,
            policy,
            jobs: (spawned > 0).then_some(tx),
            workers: spawned,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Worker threads serving timed calls; zero when calls run inline.
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn encode_once(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        let Some(timeout) = self.policy.timeout else {
            return self.inner.encode(text);
        };
        let Some(jobs) = &self.jobs else {
            return Err(EncodeError::Unavailable("no encoder worker threads".to_string()));
        };

        let (reply, rx) = crossbeam_channel::bounded(1);
        let job = Job {
            text: text.to_owned(),
            deadline: Instant::now() + timeout,
            reply,
        };
        jobs.send(job)
            .map_err(|_| EncodeError::Unavailable("encoder workers stopped".to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EncodeError::Timeout(timeout)),
            // expired in the queue
            Err(RecvTimeoutError::Disconnected) => Err(EncodeError::Timeout(timeout)),
        }
    }
}

fn worker_loop(inner: &dyn VectorEncoder, jobs: &Receiver<Job>) {
    for job in jobs.iter() {
        if Instant::now() >= job.deadline {
            continue;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| inner.encode(&job.text)))
            .unwrap_or_else(|_| Err(EncodeError::Failed("encoder call panicked".to_string())));
        // caller may have timed out already
        let _ = job.reply.send(result);
    }
}

impl VectorEncoder for GuardedEncoder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn is_guarded(&self) -> bool {
        true
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        let mut attempt = 1;
        loop {
            match self.encode_once(text) {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff_for(attempt);
                    tracing::debug!(attempt, ?delay, error = %e, "encoder call failed, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(attempts = attempt, error = %e, "encoder call gave up");
                    return Err(e);
                }
            }
        }
    }
}
