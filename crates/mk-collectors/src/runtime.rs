//! Shared polling, batching and retry machinery.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use mk_model::{TelemetryRecord, TelemetrySource};

use crate::config::CollectorConfig;
use crate::health::CollectorHealth;
use crate::{CollectorContext, CollectorError};

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Run `op` with a per-attempt timeout, retrying transient failures
/// with exponential backoff (1 s, ×2, capped at 30 s) up to `retries`
/// additional attempts. Permanent failures return immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    retries: u32,
    timeout: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, CollectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollectorError>>,
{
    let mut delay = BACKOFF_INITIAL;
    let mut attempt = 0u32;
    loop {
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => CollectorError::Timeout,
        };
        if !outcome.is_transient() || attempt >= retries {
            return Err(outcome);
        }
        attempt += 1;
        log::debug!("transient failure ({outcome}), retry {attempt}/{retries} in {delay:?}");
        tokio::select! {
            _ = cancel.cancelled() => return Err(CollectorError::Shutdown),
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(BACKOFF_MAX);
    }
}

/// Buffers records until either `batch_size` is reached or the flush
/// interval elapses, whichever comes first.
pub struct Batcher {
    buffer: Vec<TelemetryRecord>,
    batch_size: usize,
    flush_interval: Duration,
    deadline: Instant,
}

impl Batcher {
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Batcher {
            buffer: Vec::new(),
            batch_size,
            flush_interval,
            deadline: Instant::now() + flush_interval,
        }
    }

    pub fn push(&mut self, record: TelemetryRecord) {
        self.buffer.push(record);
    }

    pub fn extend(&mut self, records: Vec<TelemetryRecord>) {
        self.buffer.extend(records);
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Take the buffered records and re-arm the flush deadline.
    pub fn take(&mut self) -> Vec<TelemetryRecord> {
        self.deadline = Instant::now() + self.flush_interval;
        std::mem::take(&mut self.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// The shared poll loop: fixed-interval ticks with single-flight
/// semantics (an overrunning poll skips the next tick), per-poll retry
/// with backoff, batching on size or flush interval, cancellation at
/// every suspension point.
pub async fn run_poll_loop<F, Fut>(
    name: &'static str,
    source: TelemetrySource,
    config: &CollectorConfig,
    health: &CollectorHealth,
    ctx: &CollectorContext,
    mut collect: F,
) -> Result<(), CollectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<TelemetryRecord>, CollectorError>>,
{
    let mut ticker = interval(config.poll_interval);
    // Single-flight: when a poll overruns the next tick, skip it rather
    // than bursting.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut batcher = Batcher::new(config.batch_size, config.flush_interval);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                // Drain what is buffered before stopping.
                let remaining = batcher.take();
                if !remaining.is_empty() {
                    let _ = ctx.sink.emit(name, source, remaining).await;
                }
                log::info!("{name} collector stopped");
                return Ok(());
            }
            _ = tokio::time::sleep_until(batcher.deadline()) => {
                let batch = batcher.take();
                ctx.sink.emit(name, source, batch).await?;
            }
            _ = ticker.tick() => {
                match retry_with_backoff(config.retries, config.timeout, &ctx.cancel, &mut collect)
                    .await
                {
                    Ok(records) => {
                        health.record_success(chrono::Utc::now());
                        batcher.extend(records);
                        if batcher.is_full() {
                            let batch = batcher.take();
                            ctx.sink.emit(name, source, batch).await?;
                        }
                    }
                    Err(CollectorError::Shutdown) => return Ok(()),
                    Err(e) => {
                        // Abandoned poll: partial results discarded, the
                        // next tick proceeds.
                        health.record_error();
                        log::warn!("{name} poll failed: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::TelemetrySink;
    use mk_model::{ManualPayload, TelemetryPayload};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn record(note: &str) -> TelemetryRecord {
        TelemetryRecord::new(
            TelemetryPayload::Manual(ManualPayload {
                note: note.to_string(),
                attributes: Default::default(),
            }),
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient() {
        tokio::time::pause();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = attempts.clone();
        let result = retry_with_backoff(3, Duration::from_secs(5), &cancel, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CollectorError::Timeout)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_at_budget() {
        tokio::time::pause();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = attempts.clone();
        let result: Result<(), _> =
            retry_with_backoff(2, Duration::from_secs(5), &cancel, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CollectorError::Timeout)
                }
            })
            .await;
        assert!(result.is_err());
        // 1 initial + 2 retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let counter = attempts.clone();
        let result: Result<(), _> =
            retry_with_backoff(5, Duration::from_secs(5), &cancel, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CollectorError::Config("bad".to_string()))
                }
            })
            .await;
        assert!(matches!(result, Err(CollectorError::Config(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_loop_batches_and_flushes() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let sink = TelemetrySink::new(tx, None);
        let cancel = CancellationToken::new();
        let ctx = CollectorContext {
            sink,
            cancel: cancel.clone(),
        };
        let health = CollectorHealth::new();
        let mut config = CollectorConfig::default();
        config.poll_interval = Duration::from_secs(1);
        config.flush_interval = Duration::from_secs(2);
        config.batch_size = 100;
        config.retries = 0;

        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let counter = AtomicU32::new(0);
            run_poll_loop(
                "test",
                mk_model::TelemetrySource::Manual,
                &config,
                &health,
                &ctx,
                || {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(vec![record(&format!("poll-{n}"))]) }
                },
            )
            .await
        });

        // Advance past several ticks and one flush interval.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first.source, mk_model::TelemetrySource::Manual);

        loop_cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
