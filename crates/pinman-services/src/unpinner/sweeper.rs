//! Unpin sweeper.
//!
//! Background reconciliation of pins flagged for removal: clears the
//! sticky flag on the owning pool and deletes the record once the pool
//! confirms. A pool error leaves the record in `Unpinning` for the next
//! sweep; the sweep itself never fails because of a single pin.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use pinman_core::models::{Pin, PinState};
use pinman_core::PinError;
use pinman_db::PinDao;
use pinman_remote::{Pools, RemoteError, SetSticky};

/// Counters for one sweep iteration.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnpinStats {
    /// Records deleted without contacting any pool (no pool assigned, or
    /// the sticky token is shared with another live pin).
    pub skipped: u64,
    /// Records whose sticky flag was cleared and which were deleted.
    pub cleared: u64,
    /// Records left in `Unpinning` for the next sweep.
    pub deferred: u64,
}

pub struct UnpinSweeper {
    dao: Arc<dyn PinDao>,
    pools: Arc<dyn Pools>,
    /// Bounds concurrent in-flight clear requests so a sweep over many
    /// records cannot overwhelm the pool fleet.
    max_concurrency: usize,
}

impl UnpinSweeper {
    pub fn new(dao: Arc<dyn PinDao>, pools: Arc<dyn Pools>, max_concurrency: usize) -> Self {
        Self {
            dao,
            pools,
            max_concurrency,
        }
    }

    /// Spawn the periodic sweep loop. The first run happens after
    /// `initial_delay` to let the system settle post-startup.
    pub fn start(
        self: Arc<Self>,
        initial_delay: Duration,
        interval: Duration,
    ) -> (tokio::task::JoinHandle<()>, mpsc::Sender<()>) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(stats) => {
                                if stats.skipped + stats.cleared + stats.deferred > 0 {
                                    tracing::info!(
                                        skipped = stats.skipped,
                                        cleared = stats.cleared,
                                        deferred = stats.deferred,
                                        "Unpin sweep completed"
                                    );
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "Unpin sweep failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::info!("Unpin sweeper stopped");
        });
        (handle, shutdown_tx)
    }

    /// One sweep over all pins in `Unpinning`.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<UnpinStats, PinError> {
        let pins = self.dao.list_by_state(PinState::Unpinning).await?;

        let mut stats = UnpinStats::default();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut clears: JoinSet<bool> = JoinSet::new();

        for pin in pins {
            if pin.pool.is_none() || self.dao.has_shared_sticky(&pin).await? {
                // Nothing to clear on any pool; another live pin may still
                // depend on the shared sticky token.
                if self.delete_record(&pin).await {
                    stats.skipped += 1;
                } else {
                    stats.deferred += 1;
                }
                continue;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let dao = self.dao.clone();
            let pools = self.pools.clone();
            let timeout = self.pools.timeout();
            clears.spawn(async move {
                let _permit = permit;
                clear_one(dao, pools, timeout, pin).await
            });
        }

        // The sweep as a whole accounts for every dispatched clear before
        // the task instance completes.
        while let Some(result) = clears.join_next().await {
            match result {
                Ok(true) => stats.cleared += 1,
                Ok(false) => stats.deferred += 1,
                Err(e) => {
                    stats.deferred += 1;
                    tracing::error!(error = %e, "Clear-sticky task panicked");
                }
            }
        }

        Ok(stats)
    }

    async fn delete_record(&self, pin: &Pin) -> bool {
        match self.dao.delete(pin).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(pin_id = pin.pin_id, error = %e, "Failed to delete pin record");
                false
            }
        }
    }
}

/// Clear the sticky flag for one pin and delete the record on success.
/// Returns false when the record is left for the next sweep.
async fn clear_one(
    dao: Arc<dyn PinDao>,
    pools: Arc<dyn Pools>,
    timeout: Duration,
    pin: Pin,
) -> bool {
    let pool = match &pin.pool {
        Some(pool) => pool.clone(),
        None => return false,
    };

    let request = SetSticky {
        pool: pool.clone(),
        file_id: pin.file_id.clone(),
        sticky: pin.sticky.clone(),
        on: false,
        expires_at: None,
    };

    let outcome = match tokio::time::timeout(timeout, pools.set_sticky(request)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(format!("Pool {} did not respond", pool))),
    };

    match outcome {
        // File already gone from the pool counts as cleared.
        Ok(()) | Err(RemoteError::FileNotInRepository(_)) => match dao.delete(&pin).await {
            Ok(_) => {
                tracing::debug!(pin_id = pin.pin_id, pool = %pool, "Sticky flag cleared");
                true
            }
            Err(e) => {
                tracing::error!(pin_id = pin.pin_id, error = %e, "Failed to delete pin record");
                false
            }
        },
        Err(e) => {
            tracing::warn!(
                pin_id = pin.pin_id,
                pool = %pool,
                error = %e,
                "Failed to clear sticky flag, leaving pin for next sweep"
            );
            false
        }
    }
}
