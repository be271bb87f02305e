//! Pin request processor.
//!
//! A pin request goes through several steps to pin a file on a pool:
//!
//! - create a record in state `Pinning` (one transaction with the
//!   idempotency check)
//! - optionally refresh the file attributes from the namespace
//! - select a read pool (which may involve staging)
//! - record the pool name on the pin
//! - create the sticky flag on the pool
//! - move the record to `Pinned`
//!
//! If during any step the record is no longer in `Pinning` the operation
//! is aborted. A database error is fatal to the attempt; the record stays
//! in `Pinning` until it is explicitly unpinned or its protocol deadline
//! expires. Remote calls are retried according to the failure class, never
//! past the caller-visible validity window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use pinman_core::models::{FileAttributes, Owner, Pin, ProtocolInfo};
use pinman_core::{PinError, PinManagerConfig, StagePermission};
use pinman_db::{Admission, PinDao};
use pinman_remote::{Namespace, PoolManager, Pools, RemoteError, SelectReadPool, SetSticky};

use super::task::PinTask;

/// A request to pin one file.
#[derive(Debug, Clone)]
pub struct PinRequest {
    pub attributes: FileAttributes,
    pub protocol: ProtocolInfo,
    pub owner: Owner,
    /// Idempotency key permitting safe resubmission.
    pub request_id: Option<String>,
    /// Requested lifetime in milliseconds; `-1` means the pin never expires.
    pub lifetime_ms: i64,
    /// Caller-visible timeout budget for the whole request.
    pub ttl: Duration,
}

/// Successful outcome of a pin request.
#[derive(Debug, Clone)]
pub struct PinReply {
    pub pin_id: i64,
    pub pool: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PinReply {
    fn from_pin(pin: &Pin) -> Self {
        Self {
            pin_id: pin.pin_id,
            pool: pin.pool.clone(),
            expires_at: pin.expires_at,
        }
    }
}

/// Outcome of one pass through the protocol steps.
enum Attempt {
    /// Transient condition; run the steps again after `delay`.
    Retry { delay: Duration, reason: String },
    /// Terminal for this attempt.
    Fail(PinError),
}

/// Map a terminal remote error onto the caller-facing taxonomy.
pub(crate) fn terminal(err: RemoteError) -> PinError {
    match err {
        RemoteError::PermissionDenied(m) => PinError::PermissionDenied(m),
        RemoteError::NotFound(m) | RemoteError::FileNotInRepository(m) => PinError::NotFound(m),
        RemoteError::NoRoute(m) | RemoteError::PoolDisabled(m) => PinError::PoolUnavailable(m),
        RemoteError::Timeout(m) => PinError::Timeout(m),
        RemoteError::Failure(m) => PinError::Remote(m),
    }
}

/// Orchestrates the pin creation protocol.
pub struct PinRequestProcessor {
    dao: Arc<dyn PinDao>,
    pool_manager: Arc<dyn PoolManager>,
    pools: Arc<dyn Pools>,
    namespace: Arc<dyn Namespace>,
    stage_permission: Arc<StagePermission>,
    config: PinManagerConfig,
}

impl PinRequestProcessor {
    pub fn new(
        dao: Arc<dyn PinDao>,
        pool_manager: Arc<dyn PoolManager>,
        pools: Arc<dyn Pools>,
        namespace: Arc<dyn Namespace>,
        stage_permission: Arc<StagePermission>,
        config: PinManagerConfig,
    ) -> Self {
        Self {
            dao,
            pool_manager,
            pools,
            namespace,
            stage_permission,
            config,
        }
    }

    /// Run the full pin protocol for one request.
    #[tracing::instrument(skip(self, request), fields(file_id = %request.attributes.file_id))]
    pub async fn pin(&self, mut request: PinRequest) -> Result<PinReply, PinError> {
        request.lifetime_ms = self.config.clamp_lifetime(request.lifetime_ms);

        let sticky = format!("pinman-{}", Uuid::new_v4());
        let admission = self
            .dao
            .admit(
                &request.owner,
                &request.attributes.file_id,
                request.request_id.as_deref(),
                &sticky,
                self.deadline_for_pool_selection(),
            )
            .await?;

        let pin = match admission {
            Admission::Existing(pin) => {
                tracing::debug!(pin_id = pin.pin_id, "Resubmission of a completed pin");
                return Ok(PinReply::from_pin(&pin));
            }
            Admission::Created(pin) => pin,
        };

        let mut task = PinTask::new(request, pin);
        match self.drive(&mut task).await {
            Ok(reply) => Ok(reply),
            Err(PinError::Aborted) => {
                // Something else resolved or cancelled this pin while we
                // were working on it; the record is no longer ours.
                tracing::debug!(pin_id = task.pin().pin_id, "Pin operation was aborted");
                Err(PinError::Aborted)
            }
            Err(e) => {
                tracing::warn!(
                    pin_id = task.pin().pin_id,
                    error = %e,
                    "Pin request failed"
                );
                self.clear_pin(&task).await;
                Err(e)
            }
        }
    }

    /// Retry loop around one protocol pass.
    async fn drive(&self, task: &mut PinTask) -> Result<PinReply, PinError> {
        loop {
            match self.attempt(task).await {
                Ok(reply) => return Ok(reply),
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry { delay, reason }) => {
                    if !task.valid_in(delay) {
                        return Err(PinError::Timeout("Pin request TTL exceeded".to_string()));
                    }
                    tracing::debug!(
                        pin_id = task.pin().pin_id,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Retrying pin protocol step"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One pass: attribute refresh, pool selection, sticky-flag placement.
    async fn attempt(&self, task: &mut PinTask) -> Result<PinReply, Attempt> {
        if !task.attributes().is_complete() {
            self.refresh_attributes(task).await?;
        }

        let pool = self.select_pool(task).await?;
        self.commit_to_pool(task, &pool).await
    }

    /// Refresh the file attributes from the namespace, keeping the record's
    /// protocol deadline ahead of the lookup.
    async fn refresh_attributes(&self, task: &mut PinTask) -> Result<(), Attempt> {
        self.refresh_deadline(task, self.deadline_for_namespace_lookup())
            .await?;

        let file_id = task.attributes().file_id.clone();
        let call = self.namespace.file_attributes(&file_id);
        match tokio::time::timeout(self.namespace.timeout(), call).await {
            Ok(Ok(attributes)) => {
                task.set_attributes(attributes);
                Ok(())
            }
            Ok(Err(RemoteError::NoRoute(m))) => Err(Attempt::Retry {
                delay: self.config.retry_delay,
                reason: format!("Namespace unreachable: {}", m),
            }),
            Ok(Err(RemoteError::Timeout(m))) => Err(Attempt::Retry {
                delay: self.config.small_delay,
                reason: format!("Namespace request timed out: {}", m),
            }),
            Err(_) => Err(Attempt::Retry {
                delay: self.config.small_delay,
                reason: "Namespace did not respond".to_string(),
            }),
            Ok(Err(e)) => Err(Attempt::Fail(terminal(e))),
        }
    }

    /// Ask the pool-selection service for a pool, constrained by the
    /// stage-permission decision.
    async fn select_pool(&self, task: &mut PinTask) -> Result<String, Attempt> {
        self.refresh_deadline(task, self.deadline_for_pool_selection())
            .await?;

        let allow_staging = self
            .stage_permission
            .can_stage(&task.request().owner, task.attributes());

        let request = SelectReadPool {
            attributes: task.attributes().clone(),
            protocol: task.request().protocol.clone(),
            allow_staging,
        };

        let call = self.pool_manager.select_read_pool(request);
        match tokio::time::timeout(self.pool_manager.timeout(), call).await {
            Ok(Ok(selection)) => Ok(selection.pool),
            Ok(Err(RemoteError::NoRoute(m))) => Err(Attempt::Retry {
                delay: self.config.retry_delay,
                reason: format!("Pool manager unreachable: {}", m),
            }),
            Ok(Err(RemoteError::Timeout(m))) => Err(Attempt::Retry {
                delay: self.config.small_delay,
                reason: format!("Pool selection timed out: {}", m),
            }),
            Err(_) => Err(Attempt::Retry {
                delay: self.config.small_delay,
                reason: "Pool manager did not respond".to_string(),
            }),
            Ok(Err(e)) => Err(Attempt::Fail(terminal(e))),
        }
    }

    /// Record the pool on the pin, place the sticky flag, and finalize.
    async fn commit_to_pool(&self, task: &mut PinTask, pool: &str) -> Result<PinReply, Attempt> {
        // Store the pool name before contacting it, so we know what to
        // clean up if anything fails from here on.
        let pin = self
            .dao
            .assign_pool(
                task.pin().pin_id,
                &task.pin().sticky,
                pool,
                self.deadline_for_setting_flag(),
            )
            .await
            .map_err(Attempt::Fail)?
            .ok_or(Attempt::Fail(PinError::Aborted))?;
        task.set_pin(pin);
        task.add_location(pool);

        // The lifetime counts from the moment the file is actually pinned;
        // the pool-side flag gets a drift margin on top so it slightly
        // outlives the logical pin.
        let pin_expiration = task.freeze_expiration();
        let pool_expiration = pin_expiration
            .map(|t| t + chrono_margin(self.config.clock_drift_margin));

        let request = SetSticky {
            pool: pool.to_string(),
            file_id: task.attributes().file_id.clone(),
            sticky: task.pin().sticky.clone(),
            on: true,
            expires_at: pool_expiration,
        };

        let call = self.pools.set_sticky(request);
        match tokio::time::timeout(self.pools.timeout(), call).await {
            Ok(Ok(())) => {
                let pin = self
                    .dao
                    .mark_pinned(task.pin().pin_id, &task.pin().sticky, pin_expiration)
                    .await
                    .map_err(Attempt::Fail)?
                    .ok_or(Attempt::Fail(PinError::Aborted))?;
                task.set_pin(pin);
                tracing::info!(
                    pin_id = task.pin().pin_id,
                    pool = %pool,
                    expires_at = ?task.pin().expires_at,
                    "Pin established"
                );
                Ok(PinReply::from_pin(task.pin()))
            }
            Ok(Err(RemoteError::PoolDisabled(m))) => Err(Attempt::Retry {
                // Pool manager had outdated information about the pool;
                // give it a chance to catch up.
                delay: self.config.retry_delay,
                reason: format!("Pool disabled: {}", m),
            }),
            Ok(Err(RemoteError::NoRoute(m))) => Err(Attempt::Retry {
                delay: self.config.retry_delay,
                reason: format!("Pool unreachable: {}", m),
            }),
            Ok(Err(RemoteError::FileNotInRepository(m))) => Err(Attempt::Retry {
                // The pool dropped its stale replica information as a
                // result of this error; a quick retry re-selects a pool.
                delay: self.config.small_delay,
                reason: format!("File not in repository: {}", m),
            }),
            Ok(Err(RemoteError::Timeout(m))) => {
                // No response from the pool, typically overload. Terminal.
                Err(Attempt::Fail(PinError::Timeout(m)))
            }
            Err(_) => Err(Attempt::Fail(PinError::Timeout(format!(
                "Pool {} did not respond",
                pool
            )))),
            Ok(Err(e)) => Err(Attempt::Fail(terminal(e))),
        }
    }

    /// Ensure the record is still ours and stays valid for the duration of
    /// the next step.
    async fn refresh_deadline(
        &self,
        task: &mut PinTask,
        deadline: DateTime<Utc>,
    ) -> Result<(), Attempt> {
        let pin = self
            .dao
            .refresh_deadline(task.pin().pin_id, &task.pin().sticky, deadline)
            .await
            .map_err(Attempt::Fail)?
            .ok_or(Attempt::Fail(PinError::Aborted))?;
        task.set_pin(pin);
        Ok(())
    }

    /// Clear the pin after a terminal failure.
    ///
    /// If a pool was assigned the commit may have partially succeeded
    /// before the failure was observed, so the record is replaced by a
    /// fresh `Unpinning` record for the unpin sweep to reconcile. Without a
    /// pool there is nothing to reconcile and the record is simply removed.
    async fn clear_pin(&self, task: &PinTask) {
        let pin = task.pin();
        let result = if pin.pool.is_some() {
            self.dao.replace_with_unpinning(pin).await
        } else {
            self.dao.delete(pin).await.map(|_| ())
        };
        if let Err(e) = result {
            tracing::error!(
                pin_id = pin.pin_id,
                error = %e,
                "Failed to clear pin after failed attempt"
            );
        }
    }

    fn deadline_for_namespace_lookup(&self) -> DateTime<Utc> {
        self.step_deadline(self.namespace.timeout() + self.config.retry_delay)
    }

    fn deadline_for_pool_selection(&self) -> DateTime<Utc> {
        self.step_deadline(self.pool_manager.timeout() + self.config.retry_delay)
    }

    fn deadline_for_setting_flag(&self) -> DateTime<Utc> {
        self.step_deadline(self.pools.timeout())
    }

    /// Protocol-step deadlines always exceed the worst case of at least one
    /// full retry cycle.
    fn step_deadline(&self, cycle: Duration) -> DateTime<Utc> {
        Utc::now() + chrono_margin(cycle) + chrono_margin(cycle)
    }
}

fn chrono_margin(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::MAX)
}
