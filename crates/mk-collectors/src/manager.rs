//! Collector lifecycle management.
//!
//! Owns the collector set and the shared transport. Startup is
//! sequential; if any collector fails to start, the ones already
//! started are stopped in reverse order and the error surfaces.
//! A 30-second sweep logs per-collector health; shutdown honors a
//! bounded drain window before aborting stragglers.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::health::HealthSnapshot;
use crate::{Collector, CollectorContext, CollectorError, TelemetrySink};

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_secs(30);

pub struct CollectorManager {
    collectors: Vec<Box<dyn Collector>>,
    sink: TelemetrySink,
    drain_window: Duration,
}

impl CollectorManager {
    pub fn new(sink: TelemetrySink) -> Self {
        CollectorManager {
            collectors: Vec::new(),
            sink,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }

    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }

    pub fn register(&mut self, collector: Box<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    /// Start every enabled collector sequentially. On failure,
    /// already-started collectors are stopped in reverse order and the
    /// error returned.
    async fn start_all(&mut self) -> Result<(), CollectorError> {
        let mut started: Vec<usize> = Vec::new();
        for i in 0..self.collectors.len() {
            let name = self.collectors[i].name();
            if !self.collectors[i].enabled() {
                log::info!("collector {name} disabled, skipping");
                continue;
            }
            match self.collectors[i].start().await {
                Ok(()) => {
                    log::info!("collector {name} started");
                    started.push(i);
                }
                Err(e) => {
                    log::error!("collector {name} failed to start: {e}");
                    for &j in started.iter().rev() {
                        let rollback_name = self.collectors[j].name();
                        self.collectors[j].stop().await;
                        log::info!("collector {rollback_name} rolled back");
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Start everything and run until `cancel` fires, then drain.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), CollectorError> {
        self.start_all().await?;
        self.collectors.retain(|c| c.enabled());

        let ctx = CollectorContext {
            sink: self.sink.clone(),
            cancel: cancel.clone(),
        };

        let mut tasks = JoinSet::new();
        let mut healths: Vec<(&'static str, std::sync::Arc<crate::CollectorHealth>)> = Vec::new();
        for mut collector in self.collectors.drain(..) {
            let name = collector.name();
            healths.push((name, collector.health()));
            let task_ctx = ctx.clone();
            tasks.spawn(async move {
                let result = collector.run(task_ctx).await;
                if let Err(ref e) = result {
                    log::error!("collector {} terminated: {e}", collector.name());
                }
                (name, result)
            });
        }

        let mut sweep = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        sweep.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    for (name, health) in &healths {
                        let snapshot = health.snapshot();
                        log_health(name, &snapshot);
                    }
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((name, Ok(())))) => log::info!("collector {name} finished"),
                    Some(Ok((name, Err(_)))) => {
                        log::warn!("collector {name} exited with error; others continue");
                    }
                    Some(Err(e)) => log::error!("collector task panicked: {e}"),
                    None => {
                        log::warn!("all collectors exited before shutdown");
                        break;
                    }
                }
            }
        }

        // Bounded drain, then forceful termination.
        log::info!("draining collectors (window {:?})", self.drain_window);
        let drained = tokio::time::timeout(self.drain_window, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            log::warn!("drain window expired, aborting remaining collector tasks");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        log::info!("collector manager stopped");
        Ok(())
    }
}

fn log_health(name: &str, snapshot: &HealthSnapshot) {
    match snapshot.last_success {
        Some(at) => log::debug!(
            "health {name}: last success {at}, {} errors, {} targets",
            snapshot.error_count,
            snapshot.target_count
        ),
        None => log::warn!(
            "health {name}: no successful collection yet ({} errors)",
            snapshot.error_count
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::CollectorHealth;
    use async_trait::async_trait;
    use mk_model::TelemetrySource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FakeCollector {
        name: &'static str,
        fail_start: bool,
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        health: Arc<CollectorHealth>,
    }

    impl FakeCollector {
        fn new(name: &'static str, fail_start: bool) -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
            let started = Arc::new(AtomicBool::new(false));
            let stopped = Arc::new(AtomicBool::new(false));
            (
                FakeCollector {
                    name,
                    fail_start,
                    started: started.clone(),
                    stopped: stopped.clone(),
                    health: Arc::new(CollectorHealth::new()),
                },
                started,
                stopped,
            )
        }
    }

    #[async_trait]
    impl Collector for FakeCollector {
        fn name(&self) -> &'static str {
            self.name
        }

        fn source(&self) -> TelemetrySource {
            TelemetrySource::Manual
        }

        fn health(&self) -> Arc<CollectorHealth> {
            self.health.clone()
        }

        async fn start(&mut self) -> Result<(), CollectorError> {
            if self.fail_start {
                return Err(CollectorError::Config("boom".to_string()));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&mut self, ctx: CollectorContext) -> Result<(), CollectorError> {
            ctx.cancel.cancelled().await;
            Ok(())
        }

        async fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn sink() -> TelemetrySink {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        std::mem::forget(rx);
        TelemetrySink::new(tx, None)
    }

    #[tokio::test]
    async fn test_failed_start_rolls_back_in_reverse() {
        let (a, a_started, a_stopped) = FakeCollector::new("a", false);
        let (b, b_started, b_stopped) = FakeCollector::new("b", false);
        let (c, _, _) = FakeCollector::new("c", true);

        let mut manager = CollectorManager::new(sink());
        manager.register(Box::new(a));
        manager.register(Box::new(b));
        manager.register(Box::new(c));

        let result = manager.run(CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(a_started.load(Ordering::SeqCst));
        assert!(b_started.load(Ordering::SeqCst));
        assert!(a_stopped.load(Ordering::SeqCst));
        assert!(b_stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_clean_shutdown_on_cancel() {
        let (a, started, _) = FakeCollector::new("a", false);
        let mut manager = CollectorManager::new(sink());
        manager.register(Box::new(a));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let handle = tokio::spawn(manager.run(cancel));
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
        handle.await.unwrap().unwrap();
        assert!(started.load(Ordering::SeqCst));
    }
}
