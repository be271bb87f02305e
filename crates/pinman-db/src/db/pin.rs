use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use pinman_core::models::{FileId, Owner, Pin, PinState};
use pinman_core::PinError;

/// Outcome of the admission transaction.
#[derive(Debug)]
pub enum Admission {
    /// A previous pin for the same `(file_id, request_id)` already
    /// completed; no new work is needed.
    Existing(Pin),
    /// A fresh `Pinning` record was created (any in-flight predecessor was
    /// superseded into `Unpinning`).
    Created(Pin),
}

/// Contract of the pin record store.
///
/// All operations are safe under concurrent invocation from multiple
/// protocol instances. The guarded transitions (`refresh_deadline`,
/// `assign_pool`, `mark_pinned`, `extend`) return `None` when the record no
/// longer matches the guard, which callers interpret as "operation was
/// aborted". Store failures are fatal for the current protocol step and are
/// never retried.
#[async_trait]
pub trait PinDao: Send + Sync {
    /// Admission / idempotency check plus record creation, as one atomic
    /// unit. A resubmission whose predecessor already reached `Pinned`
    /// returns it unchanged; an in-flight predecessor is never resumed,
    /// only superseded (its reply continuation is assumed lost).
    async fn admit(
        &self,
        owner: &Owner,
        file_id: &FileId,
        request_id: Option<&str>,
        sticky: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Admission, PinError>;

    async fn get(&self, pin_id: i64) -> Result<Option<Pin>, PinError>;

    async fn get_by_request(
        &self,
        file_id: &FileId,
        request_id: &str,
    ) -> Result<Option<Pin>, PinError>;

    async fn list(&self) -> Result<Vec<Pin>, PinError>;

    async fn list_by_file(&self, file_id: &FileId) -> Result<Vec<Pin>, PinError>;

    async fn list_by_state(&self, state: PinState) -> Result<Vec<Pin>, PinError>;

    /// Extend the protocol-step deadline of a record still in `Pinning`.
    async fn refresh_deadline(
        &self,
        pin_id: i64,
        sticky: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Pin>, PinError>;

    /// Record the selected pool and the sticky-flag-setting deadline.
    async fn assign_pool(
        &self,
        pin_id: i64,
        sticky: &str,
        pool: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Pin>, PinError>;

    /// Transition `Pinning` to `Pinned`, freezing the semantic lifetime.
    async fn mark_pinned(
        &self,
        pin_id: i64,
        sticky: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Pin>, PinError>;

    /// Update the expiration of a record still in `Pinned` (extend path).
    async fn extend(
        &self,
        pin_id: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Pin>, PinError>;

    async fn mark_unpinning(&self, pin_id: i64) -> Result<Option<Pin>, PinError>;

    /// Move all pins of a file into `Unpinning`; returns how many.
    async fn mark_all_unpinning(&self, file_id: &FileId) -> Result<u64, PinError>;

    /// Move every pin whose expiration lies at or before `now` into
    /// `Unpinning`; returns how many. Used by the expiration sweep.
    async fn mark_expired_unpinning(&self, now: DateTime<Utc>) -> Result<u64, PinError>;

    /// Delete the record permanently. The delete is guarded by the sticky
    /// token and state snapshot so a superseded record is left alone.
    async fn delete(&self, pin: &Pin) -> Result<bool, PinError>;

    /// Delete the record and insert a brand-new `Unpinning` record for the
    /// same owner, file, pool and sticky token, as one transaction. Used
    /// after a terminal failure where the pool commit may have partially
    /// succeeded: the fresh record lets the unpin sweep reconcile a sticky
    /// flag that might already exist on the pool.
    async fn replace_with_unpinning(&self, pin: &Pin) -> Result<(), PinError>;

    /// True if another live pin references the same `(pool, sticky)` pair.
    /// Legacy-migration guard consulted by the unpin sweep before clearing.
    async fn has_shared_sticky(&self, pin: &Pin) -> Result<bool, PinError>;
}

/// Postgres-backed pin record store.
#[derive(Clone)]
pub struct PgPinDao {
    pool: PgPool,
}

impl PgPinDao {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the pins-table migration.
    pub async fn migrate(pool: &PgPool) -> Result<(), PinError> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| PinError::Internal(format!("Migration failed: {}", e)))
    }
}

const RETURNING: &str =
    "RETURNING pin_id, file_id, request_id, uid, gid, state, pool, sticky, created_at, expires_at";

#[async_trait]
impl PinDao for PgPinDao {
    async fn admit(
        &self,
        owner: &Owner,
        file_id: &FileId,
        request_id: Option<&str>,
        sticky: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Admission, PinError> {
        let mut tx = self.pool.begin().await?;

        if let Some(request_id) = request_id {
            let existing = sqlx::query_as::<_, Pin>(
                "SELECT * FROM pins WHERE file_id = $1 AND request_id = $2 FOR UPDATE",
            )
            .bind(file_id.as_str())
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(pin) = existing {
                if pin.state == PinState::Pinned {
                    tx.commit().await?;
                    return Ok(Admission::Existing(pin));
                }
                // An in-flight predecessor: abandon it so the unpin sweep
                // can reconcile whatever it may already have done.
                sqlx::query(
                    "UPDATE pins SET state = $1, request_id = NULL WHERE pin_id = $2",
                )
                .bind(PinState::Unpinning.to_string())
                .bind(pin.pin_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        let pin = sqlx::query_as::<_, Pin>(&format!(
            "INSERT INTO pins (file_id, request_id, uid, gid, state, sticky, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now(), $7) {}",
            RETURNING
        ))
        .bind(file_id.as_str())
        .bind(request_id)
        .bind(owner.uid)
        .bind(owner.gid)
        .bind(PinState::Pinning.to_string())
        .bind(sticky)
        .bind(deadline)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Admission::Created(pin))
    }

    async fn get(&self, pin_id: i64) -> Result<Option<Pin>, PinError> {
        let pin = sqlx::query_as::<_, Pin>("SELECT * FROM pins WHERE pin_id = $1")
            .bind(pin_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(pin)
    }

    async fn get_by_request(
        &self,
        file_id: &FileId,
        request_id: &str,
    ) -> Result<Option<Pin>, PinError> {
        let pin = sqlx::query_as::<_, Pin>(
            "SELECT * FROM pins WHERE file_id = $1 AND request_id = $2",
        )
        .bind(file_id.as_str())
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(pin)
    }

    async fn list(&self) -> Result<Vec<Pin>, PinError> {
        let pins = sqlx::query_as::<_, Pin>("SELECT * FROM pins ORDER BY pin_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(pins)
    }

    async fn list_by_file(&self, file_id: &FileId) -> Result<Vec<Pin>, PinError> {
        let pins = sqlx::query_as::<_, Pin>(
            "SELECT * FROM pins WHERE file_id = $1 ORDER BY pin_id",
        )
        .bind(file_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(pins)
    }

    async fn list_by_state(&self, state: PinState) -> Result<Vec<Pin>, PinError> {
        let pins = sqlx::query_as::<_, Pin>(
            "SELECT * FROM pins WHERE state = $1 ORDER BY pin_id",
        )
        .bind(state.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(pins)
    }

    async fn refresh_deadline(
        &self,
        pin_id: i64,
        sticky: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Pin>, PinError> {
        let pin = sqlx::query_as::<_, Pin>(&format!(
            "UPDATE pins SET expires_at = $1 \
             WHERE pin_id = $2 AND sticky = $3 AND state = $4 {}",
            RETURNING
        ))
        .bind(deadline)
        .bind(pin_id)
        .bind(sticky)
        .bind(PinState::Pinning.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(pin)
    }

    async fn assign_pool(
        &self,
        pin_id: i64,
        sticky: &str,
        pool: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Pin>, PinError> {
        let pin = sqlx::query_as::<_, Pin>(&format!(
            "UPDATE pins SET pool = $1, expires_at = $2 \
             WHERE pin_id = $3 AND sticky = $4 AND state = $5 {}",
            RETURNING
        ))
        .bind(pool)
        .bind(deadline)
        .bind(pin_id)
        .bind(sticky)
        .bind(PinState::Pinning.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(pin)
    }

    async fn mark_pinned(
        &self,
        pin_id: i64,
        sticky: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Pin>, PinError> {
        let pin = sqlx::query_as::<_, Pin>(&format!(
            "UPDATE pins SET state = $1, expires_at = $2 \
             WHERE pin_id = $3 AND sticky = $4 AND state = $5 {}",
            RETURNING
        ))
        .bind(PinState::Pinned.to_string())
        .bind(expires_at)
        .bind(pin_id)
        .bind(sticky)
        .bind(PinState::Pinning.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(pin)
    }

    async fn extend(
        &self,
        pin_id: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Pin>, PinError> {
        let pin = sqlx::query_as::<_, Pin>(&format!(
            "UPDATE pins SET expires_at = $1 WHERE pin_id = $2 AND state = $3 {}",
            RETURNING
        ))
        .bind(expires_at)
        .bind(pin_id)
        .bind(PinState::Pinned.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(pin)
    }

    async fn mark_unpinning(&self, pin_id: i64) -> Result<Option<Pin>, PinError> {
        let pin = sqlx::query_as::<_, Pin>(&format!(
            "UPDATE pins SET state = $1, request_id = NULL WHERE pin_id = $2 {}",
            RETURNING
        ))
        .bind(PinState::Unpinning.to_string())
        .bind(pin_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(pin)
    }

    async fn mark_all_unpinning(&self, file_id: &FileId) -> Result<u64, PinError> {
        let result = sqlx::query(
            "UPDATE pins SET state = $1, request_id = NULL \
             WHERE file_id = $2 AND state <> $1",
        )
        .bind(PinState::Unpinning.to_string())
        .bind(file_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_expired_unpinning(&self, now: DateTime<Utc>) -> Result<u64, PinError> {
        let result = sqlx::query(
            "UPDATE pins SET state = $1, request_id = NULL \
             WHERE state <> $1 AND expires_at IS NOT NULL AND expires_at <= $2",
        )
        .bind(PinState::Unpinning.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, pin: &Pin) -> Result<bool, PinError> {
        let result = sqlx::query(
            "DELETE FROM pins WHERE pin_id = $1 AND sticky = $2 AND state = $3",
        )
        .bind(pin.pin_id)
        .bind(&pin.sticky)
        .bind(pin.state.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_with_unpinning(&self, pin: &Pin) -> Result<(), PinError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pins WHERE pin_id = $1")
            .bind(pin.pin_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO pins (file_id, uid, gid, state, pool, sticky, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(pin.file_id.as_str())
        .bind(pin.uid)
        .bind(pin.gid)
        .bind(PinState::Unpinning.to_string())
        .bind(pin.pool.as_deref())
        .bind(&pin.sticky)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn has_shared_sticky(&self, pin: &Pin) -> Result<bool, PinError> {
        let Some(pool) = &pin.pool else {
            return Ok(false);
        };
        let shared: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pins \
             WHERE pool = $1 AND sticky = $2 AND pin_id <> $3)",
        )
        .bind(pool)
        .bind(&pin.sticky)
        .bind(pin.pin_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(shared)
    }
}
