use chrono::{Duration as DayDelta, Local, NaiveDate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::application::services::kpi_service::{BuildReport, KpiService};
use crate::config::KpiConfig;
use crate::domain::errors::KpiError;
use crate::task_runner::{run_with_retry, RetryPolicy};

/// Message for the recompute actor
#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeMessage {
    /// Rebuild the rollups of one (brand, date)
    Recompute { brand_id: i64, date: NaiveDate },
    /// Finish in-flight units, then stop
    Shutdown,
}

/// Final result of one recompute unit
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeOutcome {
    pub brand_id: i64,
    pub date: NaiveDate,
    pub attempts: u32,
    pub result: Result<BuildReport, KpiError>,
}

type UnitKey = (i64, NaiveDate);

/// Per-(brand, date) locks. Units on the same key run one after another,
/// different keys run in parallel.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<UnitKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock_for(&self, key: UnitKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_default().clone()
    }

    /// Drop the lock entry once no unit holds or waits on it.
    async fn release(&self, key: UnitKey) {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(&key) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&key);
            }
        }
    }
}

/// Actor that runs daily rollup rebuilds as isolated, retried units
pub struct RecomputeActor {
    service: Arc<KpiService>,
    permits: Arc<Semaphore>,
    key_locks: Arc<KeyLocks>,
    policy: RetryPolicy,
    refresh_interval: Option<Duration>,
    tx: mpsc::Sender<RecomputeOutcome>,
}

impl RecomputeActor {
    pub fn new(
        service: Arc<KpiService>,
        config: &KpiConfig,
        tx: mpsc::Sender<RecomputeOutcome>,
    ) -> Self {
        RecomputeActor {
            service,
            permits: Arc::new(Semaphore::new(config.worker_concurrency.max(1))),
            key_locks: Arc::new(KeyLocks::default()),
            policy: RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(config.initial_retry_delay_ms),
                Duration::from_millis(config.max_retry_delay_ms),
            ),
            refresh_interval: None,
            tx,
        }
    }

    /// Periodically rebuild today and yesterday for every brand.
    pub fn with_refresh(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = Some(refresh_interval);
        self
    }

    /// Run the recompute actor
    pub async fn run(self, mut rx: mpsc::Receiver<RecomputeMessage>) {
        info!(
            "Starting recompute actor (concurrency {}, refresh {:?})",
            self.permits.available_permits(),
            self.refresh_interval
        );

        let mut units = JoinSet::new();
        let mut ticker = self
            .refresh_interval
            .filter(|every| !every.is_zero())
            .map(interval);

        loop {
            tokio::select! {
                // Periodic refresh
                _ = async {
                    match ticker.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.enqueue_refresh(&mut units).await;
                }

                // Handle incoming messages
                msg = rx.recv() => {
                    match msg {
                        Some(RecomputeMessage::Recompute { brand_id, date }) => {
                            self.spawn_unit(&mut units, brand_id, date);
                        }
                        Some(RecomputeMessage::Shutdown) => {
                            info!("Recompute actor shutting down");
                            break;
                        }
                        None => {
                            warn!("Recompute actor message channel closed");
                            break;
                        }
                    }
                }

                // Reap finished units so the set does not grow unbounded
                Some(joined) = units.join_next(), if !units.is_empty() => {
                    if let Err(e) = joined {
                        error!("Recompute unit panicked: {}", e);
                    }
                }
            }
        }

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                error!("Recompute unit panicked: {}", e);
            }
        }
        info!("Recompute actor stopped");
    }

    async fn enqueue_refresh(&self, units: &mut JoinSet<()>) {
        let brands = match self.service.records().list_brands().await {
            Ok(brands) => brands,
            Err(e) => {
                error!("Failed to list brands for refresh: {}", e);
                return;
            }
        };

        let today = Local::now().date_naive();
        let yesterday = today - DayDelta::days(1);
        for brand in &brands {
            for date in [yesterday, today] {
                self.spawn_unit(units, brand.id, date);
            }
        }
        debug!(brands = brands.len(), "Enqueued periodic refresh");
    }

    fn spawn_unit(&self, units: &mut JoinSet<()>, brand_id: i64, date: NaiveDate) {
        let service = self.service.clone();
        let permits = self.permits.clone();
        let key_locks = self.key_locks.clone();
        let policy = self.policy.clone();
        let tx = self.tx.clone();

        units.spawn(async move {
            let outcome = run_unit(&service, &permits, &key_locks, &policy, brand_id, date).await;
            if tx.send(outcome).await.is_err() {
                debug!(brand_id, %date, "Outcome receiver dropped");
            }
        });
    }
}

async fn run_unit(
    service: &KpiService,
    permits: &Semaphore,
    key_locks: &KeyLocks,
    policy: &RetryPolicy,
    brand_id: i64,
    date: NaiveDate,
) -> RecomputeOutcome {
    let key = (brand_id, date);
    let lock = key_locks.lock_for(key).await;

    let tries = AtomicU32::new(0);

    let result = {
        let _serialized = lock.lock().await;
        match permits.acquire().await {
            Ok(_permit) => {
                let task_name = format!("recompute {}:{}", brand_id, date);
                run_with_retry(&task_name, policy, KpiError::is_retryable, || {
                    tries.fetch_add(1, Ordering::SeqCst);
                    service.recompute_day(brand_id, date)
                })
                .await
                .map_err(|failure| {
                    if failure.error.is_retryable() {
                        KpiError::UnitFailed {
                            brand_id,
                            date,
                            attempts: failure.attempts,
                            reason: failure.error.to_string(),
                        }
                    } else {
                        failure.error
                    }
                })
            }
            Err(e) => Err(KpiError::UnitFailed {
                brand_id,
                date,
                attempts: 0,
                reason: e.to_string(),
            }),
        }
    };
    let attempts = tries.load(Ordering::SeqCst);

    drop(lock);
    key_locks.release(key).await;

    if let Err(e) = &result {
        error!(brand_id, %date, attempts, "Recompute unit failed: {}", e);
    }

    RecomputeOutcome {
        brand_id,
        date,
        attempts,
        result,
    }
}

/// Spawn a recompute actor
pub fn spawn_recompute_actor(
    service: Arc<KpiService>,
    config: &KpiConfig,
    refresh_interval: Option<Duration>,
) -> (
    mpsc::Sender<RecomputeMessage>,
    mpsc::Receiver<RecomputeOutcome>,
    JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel::<RecomputeOutcome>(100);
    let (msg_tx, msg_rx) = mpsc::channel::<RecomputeMessage>(100);

    let mut actor = RecomputeActor::new(service, config, tx);
    if let Some(every) = refresh_interval {
        actor = actor.with_refresh(every);
    }

    let handle = tokio::spawn(async move {
        actor.run(msg_rx).await;
    });

    (msg_tx, rx, handle)
}
