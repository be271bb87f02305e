//! Coordinator facade.
//!
//! Externally visible entry point wiring the processor and sweepers
//! together: pin, unpin, extend, listing, and periodic task scheduling.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pinman_core::models::{FileId, Owner, Pin, PinState};
use pinman_core::{PinError, PinManagerConfig, StagePermission};
use pinman_db::PinDao;
use pinman_remote::{Namespace, PoolManager, Pools, SetSticky};

use crate::expiration::ExpirationSweeper;
use crate::pinner::processor::terminal;
use crate::pinner::{PinReply, PinRequest, PinRequestProcessor};
use crate::unpinner::UnpinSweeper;

/// Handles to the running sweepers.
///
/// [`SweeperHandles::shutdown`] signals both loops to stop; it does not
/// wait for an in-flight sweep to finish.
pub struct SweeperHandles {
    unpin_shutdown: mpsc::Sender<()>,
    expiration_shutdown: mpsc::Sender<()>,
    pub unpin: JoinHandle<()>,
    pub expiration: JoinHandle<()>,
}

impl SweeperHandles {
    pub async fn shutdown(&self) {
        let _ = self.unpin_shutdown.send(()).await;
        let _ = self.expiration_shutdown.send(()).await;
    }
}

pub struct PinCoordinator {
    config: PinManagerConfig,
    dao: Arc<dyn PinDao>,
    pools: Arc<dyn Pools>,
    processor: PinRequestProcessor,
}

impl PinCoordinator {
    pub fn new(
        config: PinManagerConfig,
        dao: Arc<dyn PinDao>,
        pool_manager: Arc<dyn PoolManager>,
        pools: Arc<dyn Pools>,
        namespace: Arc<dyn Namespace>,
        stage_permission: StagePermission,
    ) -> Self {
        let processor = PinRequestProcessor::new(
            dao.clone(),
            pool_manager,
            pools.clone(),
            namespace,
            Arc::new(stage_permission),
            config.clone(),
        );
        Self {
            config,
            dao,
            pools,
            processor,
        }
    }

    /// Spawn the unpin and expiration sweepers.
    pub fn start_sweepers(&self) -> SweeperHandles {
        let unpin_sweeper = Arc::new(UnpinSweeper::new(
            self.dao.clone(),
            self.pools.clone(),
            self.config.max_unpin_concurrency,
        ));
        let expiration_sweeper = Arc::new(ExpirationSweeper::new(self.dao.clone()));

        let (unpin, unpin_shutdown) = unpin_sweeper.start(
            self.config.initial_sweep_delay,
            self.config.sweep_interval,
        );
        let (expiration, expiration_shutdown) = expiration_sweeper.start(
            self.config.initial_sweep_delay,
            self.config.sweep_interval,
        );

        SweeperHandles {
            unpin_shutdown,
            expiration_shutdown,
            unpin,
            expiration,
        }
    }

    /// Pin a file. Completes once the pin is `Pinned` or the attempt has
    /// terminally failed.
    pub async fn pin(&self, request: PinRequest) -> Result<PinReply, PinError> {
        self.processor.pin(request).await
    }

    /// Flag pins of a file for removal. Returns immediately; the actual
    /// sticky-flag clearing happens in the unpin sweep.
    #[tracing::instrument(skip(self, owner), fields(file_id = %file_id, uid = owner.uid))]
    pub async fn unpin(
        &self,
        owner: &Owner,
        file_id: &FileId,
        pin_id: Option<i64>,
    ) -> Result<(), PinError> {
        match pin_id {
            Some(pin_id) => {
                let pin = self.load_owned(owner, file_id, pin_id).await?;
                self.dao.mark_unpinning(pin.pin_id).await?;
            }
            None if owner.is_root() => {
                self.dao.mark_all_unpinning(file_id).await?;
            }
            None => {
                for pin in self.dao.list_by_file(file_id).await? {
                    if pin.is_owned_by(owner.uid) {
                        self.dao.mark_unpinning(pin.pin_id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Extend the lifetime of a pinned file. Lifetimes may only be
    /// lengthened, never shortened.
    #[tracing::instrument(skip(self, owner), fields(pin_id, uid = owner.uid))]
    pub async fn extend(
        &self,
        owner: &Owner,
        pin_id: i64,
        file_id: &FileId,
        lifetime_ms: i64,
    ) -> Result<Option<DateTime<Utc>>, PinError> {
        let pin = self.load_owned(owner, file_id, pin_id).await?;
        if pin.state != PinState::Pinned {
            return Err(PinError::InvalidRequest(format!(
                "Pin {} is not in a valid state for extension",
                pin_id
            )));
        }

        let lifetime_ms = self.config.clamp_lifetime(lifetime_ms);
        let new_expiration = match lifetime_ms {
            -1 => None,
            ms => Some(Utc::now() + ChronoDuration::milliseconds(ms)),
        };

        match (new_expiration, pin.expires_at) {
            (Some(_), None) => {
                return Err(PinError::InvalidRequest(
                    "Pin lifetime cannot be shortened".to_string(),
                ));
            }
            (Some(new), Some(current)) if new < current => {
                return Err(PinError::InvalidRequest(
                    "Pin lifetime cannot be shortened".to_string(),
                ));
            }
            _ => {}
        }

        // The pool-side flag carries a drift margin beyond the logical
        // expiration; only when the new lifetime outgrows that margin does
        // the flag have to be refreshed with the pool.
        if self.needs_flag_refresh(&pin, new_expiration) {
            self.refresh_flag(&pin, new_expiration).await?;
        }

        let updated = self
            .dao
            .extend(pin.pin_id, new_expiration)
            .await?
            .ok_or_else(|| PinError::NotFound(format!("Pin {} is no longer pinned", pin_id)))?;

        tracing::info!(
            pin_id = updated.pin_id,
            expires_at = ?updated.expires_at,
            "Pin lifetime extended"
        );
        Ok(updated.expires_at)
    }

    /// All pins, for the administrative surface.
    pub async fn pins(&self) -> Result<Vec<Pin>, PinError> {
        self.dao.list().await
    }

    /// All pins on one file.
    pub async fn pins_for(&self, file_id: &FileId) -> Result<Vec<Pin>, PinError> {
        self.dao.list_by_file(file_id).await
    }

    async fn load_owned(
        &self,
        owner: &Owner,
        file_id: &FileId,
        pin_id: i64,
    ) -> Result<Pin, PinError> {
        let pin = self
            .dao
            .get(pin_id)
            .await?
            .filter(|p| &p.file_id == file_id)
            .ok_or_else(|| PinError::NotFound(format!("No pin {} on file {}", pin_id, file_id)))?;
        if !owner.is_root() && !pin.is_owned_by(owner.uid) {
            return Err(PinError::PermissionDenied(format!(
                "Pin {} is owned by uid {}",
                pin_id, pin.uid
            )));
        }
        Ok(pin)
    }

    fn needs_flag_refresh(&self, pin: &Pin, new_expiration: Option<DateTime<Utc>>) -> bool {
        let margin = ChronoDuration::from_std(self.config.clock_drift_margin)
            .unwrap_or_else(|_| ChronoDuration::MAX);
        match (new_expiration, pin.expires_at) {
            // Going infinite: the finite pool flag must be replaced.
            (None, Some(_)) => true,
            (Some(new), Some(current)) => new > current + margin,
            (None, None) => false,
            // Rejected by the monotonicity check above.
            (Some(_), None) => false,
        }
    }

    async fn refresh_flag(
        &self,
        pin: &Pin,
        new_expiration: Option<DateTime<Utc>>,
    ) -> Result<(), PinError> {
        let Some(pool) = pin.pool.clone() else {
            return Ok(());
        };
        let margin = ChronoDuration::from_std(self.config.clock_drift_margin)
            .unwrap_or_else(|_| ChronoDuration::MAX);
        let request = SetSticky {
            pool: pool.clone(),
            file_id: pin.file_id.clone(),
            sticky: pin.sticky.clone(),
            on: true,
            expires_at: new_expiration.map(|t| t + margin),
        };
        let call = self.pools.set_sticky(request);
        match tokio::time::timeout(self.pools.timeout(), call).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(terminal(e)),
            Err(_) => Err(PinError::Timeout(format!("Pool {} did not respond", pool))),
        }
    }
}
