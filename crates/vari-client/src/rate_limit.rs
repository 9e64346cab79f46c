//! Token-bucket admission control for outbound requests.
//!
//! Tokens are reconciled lazily: every public operation reads the clock and
//! adds `elapsed * refill_rate` before doing anything else, so there is no
//! background ticker that could outlive the limiter. Callers that find the
//! bucket empty either fail fast or wait in a bounded FIFO queue that a
//! single drain task serves.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{VariError, VariResult};

/// Limiter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Sustained admission rate.
    pub requests_per_second: f64,

    /// Bucket capacity; also the number of tokens available at start.
    pub max_burst: u32,

    /// Whether callers wait for a token instead of failing immediately.
    pub queue_requests: bool,

    /// Maximum number of waiting callers.
    pub max_queue_size: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            max_burst: 10,
            queue_requests: true,
            max_queue_size: 100,
        }
    }
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Whole tokens currently available.
    pub tokens_available: u32,
    /// Callers waiting for admission.
    pub queue_depth: usize,
    pub max_tokens: u32,
}

type Waiter = oneshot::Sender<VariResult<()>>;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    queue: VecDeque<Waiter>,
    draining: bool,
}

struct Inner {
    max_tokens: f64,
    refill_per_ms: f64,
    queue_requests: bool,
    max_queue_size: usize,
    state: Mutex<BucketState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // Critical sections never panic; a poisoned lock still holds a consistent bucket.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(state.last_refill).as_secs_f64() * 1000.0;
        state.tokens = (state.tokens + elapsed_ms * self.refill_per_ms).min(self.max_tokens);
        state.last_refill = now;
    }

    /// Drop waiters whose callers have gone away so they hold no queue slot.
    fn prune_cancelled(&self, state: &mut BucketState) {
        state.queue.retain(|waiter| !waiter.is_closed());
    }

    fn time_until_next_token(&self, state: &BucketState) -> Duration {
        let deficit = (1.0 - state.tokens).max(0.0);
        let ms = (deficit / self.refill_per_ms).ceil().max(1.0);
        Duration::from_millis(ms as u64)
    }
}

enum Admission {
    Granted,
    Queued(oneshot::Receiver<VariResult<()>>),
}

/// Token-bucket rate limiter with an optional bounded FIFO wait queue.
///
/// Cloning is cheap and every clone shares the same bucket.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("status", &self.status())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter with a full bucket.
    pub fn new(config: RateLimiterConfig) -> VariResult<Self> {
        if !(config.requests_per_second.is_finite() && config.requests_per_second > 0.0) {
            return Err(VariError::Config {
                message: format!(
                    "requests_per_second must be positive, got {}",
                    config.requests_per_second
                ),
            });
        }
        if config.max_burst == 0 {
            return Err(VariError::Config {
                message: "max_burst must be at least 1".to_string(),
            });
        }

        let max_tokens = f64::from(config.max_burst);
        Ok(Self {
            inner: Arc::new(Inner {
                max_tokens,
                refill_per_ms: config.requests_per_second / 1000.0,
                queue_requests: config.queue_requests,
                max_queue_size: config.max_queue_size,
                state: Mutex::new(BucketState {
                    tokens: max_tokens,
                    last_refill: Instant::now(),
                    queue: VecDeque::new(),
                    draining: false,
                }),
            }),
        })
    }

    /// Obtain permission for one unit of work.
    ///
    /// Returns immediately when a token is free and nobody is waiting.
    /// Otherwise fails with [`VariError::RateLimited`] if queueing is off or
    /// the queue is full, or waits until admitted in FIFO order. A waiting
    /// caller is failed (not admitted) by [`RateLimiter::reset`].
    pub async fn acquire(&self) -> VariResult<()> {
        match self.admit()? {
            Admission::Granted => Ok(()),
            Admission::Queued(rx) => rx
                .await
                .unwrap_or_else(|_| Err(VariError::rate_limited("rate limiter dropped", None))),
        }
    }

    fn admit(&self) -> VariResult<Admission> {
        let mut state = self.inner.lock();
        self.inner.refill(&mut state, Instant::now());
        self.inner.prune_cancelled(&mut state);

        // A new caller never overtakes queued ones.
        if state.queue.is_empty() && state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(Admission::Granted);
        }

        let retry_after = Some(self.inner.time_until_next_token(&state));

        if !self.inner.queue_requests {
            debug!(tokens = state.tokens, "rate limited, queueing disabled");
            return Err(VariError::rate_limited("no tokens available", retry_after));
        }

        if state.queue.len() >= self.inner.max_queue_size {
            debug!(queue_depth = state.queue.len(), "rate limited, queue full");
            return Err(VariError::rate_limited(
                format!("request queue full ({} waiting)", state.queue.len()),
                retry_after,
            ));
        }

        let (tx, rx) = oneshot::channel();
        state.queue.push_back(tx);
        debug!(queue_depth = state.queue.len(), "request queued");

        if !state.draining {
            state.draining = true;
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }

        Ok(Admission::Queued(rx))
    }

    /// Snapshot of the bucket after reconciling refill.
    pub fn status(&self) -> RateLimitStatus {
        let mut state = self.inner.lock();
        self.inner.refill(&mut state, Instant::now());
        self.inner.prune_cancelled(&mut state);
        RateLimitStatus {
            tokens_available: state.tokens.floor() as u32,
            queue_depth: state.queue.len(),
            max_tokens: self.inner.max_tokens as u32,
        }
    }

    /// Refill the bucket and fail every waiting caller.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.tokens = self.inner.max_tokens;
        state.last_refill = Instant::now();

        let waiting = state.queue.len();
        for waiter in state.queue.drain(..) {
            let _ = waiter.send(Err(VariError::rate_limited("rate limiter reset", None)));
        }
        debug!(failed_waiters = waiting, "rate limiter reset");
    }
}

/// Serves the wait queue until it is empty. At most one runs per limiter.
async fn drain(inner: Arc<Inner>) {
    loop {
        let wait = {
            let mut state = inner.lock();
            inner.refill(&mut state, Instant::now());

            while state.tokens >= 1.0 {
                let Some(waiter) = state.queue.pop_front() else {
                    break;
                };
                state.tokens -= 1.0;
                if waiter.send(Ok(())).is_err() {
                    // Caller went away while queued; the token stays in the bucket.
                    state.tokens += 1.0;
                }
            }

            if state.queue.is_empty() {
                state.draining = false;
                return;
            }

            inner.time_until_next_token(&state)
        };

        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn make_limiter(rps: f64, burst: u32, queue: bool, max_queue: usize) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            requests_per_second: rps,
            max_burst: burst,
            queue_requests: queue,
            max_queue_size: max_queue,
        })
        .unwrap()
    }

    async fn wait_for_queue_depth(limiter: &RateLimiter, depth: usize) {
        for _ in 0..100 {
            if limiter.status().queue_depth == depth {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!(
            "queue depth never reached {depth}, at {}",
            limiter.status().queue_depth
        );
    }

    fn spawn_acquire(limiter: &RateLimiter) -> tokio::task::JoinHandle<VariResult<()>> {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.acquire().await })
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = RateLimiter::new(RateLimiterConfig {
            requests_per_second: 0.0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, VariError::Config { .. }));

        let err = RateLimiter::new(RateLimiterConfig {
            max_burst: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, VariError::Config { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_reject_without_queue() {
        let limiter = make_limiter(10.0, 3, false, 0);

        for _ in 0..3 {
            limiter.acquire().await.unwrap();
        }

        let err = limiter.acquire().await.unwrap_err();
        match err {
            VariError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_millis(100)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(limiter.status().tokens_available, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_queue_never_grants_extra_token() {
        let limiter = make_limiter(1.0, 2, true, 10);
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        let waiter = spawn_acquire(&limiter);
        wait_for_queue_depth(&limiter, 1).await;
        assert!(!waiter.is_finished());
        assert_eq!(limiter.status().tokens_available, 0);

        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.status().queue_depth, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_proportional_and_capped() {
        let limiter = make_limiter(10.0, 10, false, 0);
        for _ in 0..10 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(limiter.status().tokens_available, 0);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.status().tokens_available, 5);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(limiter.status().tokens_available, 7);

        tokio::time::advance(Duration::from_secs(60)).await;
        let status = limiter.status();
        assert_eq!(status.tokens_available, 10);
        assert_eq!(status.max_tokens, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_admission_is_fifo() {
        let limiter = make_limiter(1.0, 1, true, 10);
        limiter.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let mut handles = Vec::new();
        for label in ["a", "b", "c"] {
            let task_limiter = limiter.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                task_limiter.acquire().await.unwrap();
                order.lock().unwrap().push((label, start.elapsed()));
            }));
            wait_for_queue_depth(&limiter, handles.len()).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let order = order.lock().unwrap().clone();
        let labels: Vec<_> = order.iter().map(|(l, _)| *l).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);

        let times: Vec<_> = order.iter().map(|(_, t)| t.as_millis()).collect();
        assert_eq!(times, vec![1000, 2000, 3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_caller_does_not_overtake_queue() {
        let limiter = make_limiter(1.0, 1, true, 10);
        limiter.acquire().await.unwrap();

        let first = spawn_acquire(&limiter);
        wait_for_queue_depth(&limiter, 1).await;

        // Exactly when the next token lands a fresh caller arrives; it must queue behind.
        tokio::time::advance(Duration::from_millis(1000)).await;
        let second = spawn_acquire(&limiter);

        first.await.unwrap().unwrap();
        assert!(!second.is_finished());
        second.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_rejects_synchronously() {
        let max_queue = 3;
        let limiter = make_limiter(1.0, 1, true, max_queue);
        limiter.acquire().await.unwrap();

        let mut waiters = Vec::new();
        for depth in 1..=max_queue {
            waiters.push(spawn_acquire(&limiter));
            wait_for_queue_depth(&limiter, depth).await;
        }

        let before = Instant::now();
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, VariError::RateLimited { .. }));
        assert_eq!(Instant::now(), before, "rejection must not wait");
        assert_eq!(limiter.status().queue_depth, max_queue);

        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_fails_every_waiter() {
        let limiter = make_limiter(0.5, 2, true, 10);
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        let a = spawn_acquire(&limiter);
        wait_for_queue_depth(&limiter, 1).await;
        let b = spawn_acquire(&limiter);
        wait_for_queue_depth(&limiter, 2).await;

        limiter.reset();

        assert!(matches!(
            a.await.unwrap(),
            Err(VariError::RateLimited { .. })
        ));
        assert!(matches!(
            b.await.unwrap(),
            Err(VariError::RateLimited { .. })
        ));

        let status = limiter.status();
        assert_eq!(status.tokens_available, 2);
        assert_eq!(status.queue_depth, 0);

        // Full bucket again after reset.
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_returns_token() {
        let limiter = make_limiter(1.0, 1, true, 10);
        limiter.acquire().await.unwrap();

        let start = Instant::now();
        let abandoned = spawn_acquire(&limiter);
        wait_for_queue_depth(&limiter, 1).await;
        abandoned.abort();
        let _ = abandoned.await;
        assert_eq!(limiter.status().queue_depth, 0);

        let kept = spawn_acquire(&limiter);
        wait_for_queue_depth(&limiter, 1).await;
        kept.await.unwrap().unwrap();

        // The abandoned caller consumed nothing; the first refilled token is the kept one's.
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(limiter.status().queue_depth, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_frees_queue_slot() {
        let limiter = make_limiter(1.0, 1, true, 1);
        limiter.acquire().await.unwrap();

        let abandoned = spawn_acquire(&limiter);
        wait_for_queue_depth(&limiter, 1).await;
        abandoned.abort();
        let _ = abandoned.await;

        // The queue is at capacity only by a caller that no longer exists.
        let kept = spawn_acquire(&limiter);
        wait_for_queue_depth(&limiter, 1).await;
        assert!(!kept.is_finished());
        kept.await.unwrap().unwrap();
    }

    proptest! {
        #[test]
        fn test_refill_monotonic_and_capped(
            rps in 0.5f64..50.0,
            burst in 1u32..20,
            advances in prop::collection::vec(0u64..2000, 1..20),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            runtime.block_on(async {
                let limiter = make_limiter(rps, burst, false, 0);
                for _ in 0..burst {
                    limiter.acquire().await.unwrap();
                }
                assert_eq!(limiter.status().tokens_available, 0);

                let mut elapsed_ms = 0u64;
                let mut previous = 0;
                for step in advances {
                    tokio::time::advance(Duration::from_millis(step)).await;
                    elapsed_ms += step;

                    let tokens = limiter.status().tokens_available;
                    let exact = (elapsed_ms as f64 * rps / 1000.0).min(f64::from(burst));
                    assert!(tokens >= previous, "tokens went down: {previous} -> {tokens}");
                    assert!(tokens <= burst, "tokens {tokens} above capacity {burst}");
                    assert!(
                        (f64::from(tokens) - exact.floor()).abs() <= 1.0,
                        "tokens {tokens} far from expected {exact}"
                    );
                    previous = tokens;
                }
            });
        }
    }
}
