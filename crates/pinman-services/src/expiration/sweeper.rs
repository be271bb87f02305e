//! Expiration sweeper.
//!
//! Periodically moves pins whose lifetime has elapsed into `Unpinning`,
//! handing them to the unpin sweep. Database errors abort only the current
//! iteration; the next scheduled run tries again.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use pinman_core::PinError;
use pinman_db::PinDao;

pub struct ExpirationSweeper {
    dao: Arc<dyn PinDao>,
}

impl ExpirationSweeper {
    pub fn new(dao: Arc<dyn PinDao>) -> Self {
        Self { dao }
    }

    /// Spawn the periodic expiration loop.
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
                            Ok(0) => {}
                            Ok(expired) => {
                                tracing::info!(expired, "Expired pins handed to unpin sweep");
                            }
                            Err(e) => tracing::error!(error = %e, "Expiration sweep failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::info!("Expiration sweeper stopped");
        });
        (handle, shutdown_tx)
    }

    /// Transition every pin whose expiration has passed into `Unpinning`.
    pub async fn run_once(&self) -> Result<u64, PinError> {
        self.dao.mark_expired_unpinning(Utc::now()).await
    }
}
