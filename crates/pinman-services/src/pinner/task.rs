use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::time::Instant;

use pinman_core::models::{FileAttributes, Pin};

use super::processor::PinRequest;

/// Transient per-request coordination state for one in-flight pin attempt:
/// the original request, its validity window, and the current pin snapshot.
/// Never persisted; lives only for the duration of the protocol.
pub(crate) struct PinTask {
    request: PinRequest,
    started: Instant,
    pin: Pin,
}

impl PinTask {
    pub fn new(request: PinRequest, pin: Pin) -> Self {
        Self {
            request,
            started: Instant::now(),
            pin,
        }
    }

    pub fn request(&self) -> &PinRequest {
        &self.request
    }

    pub fn pin(&self) -> &Pin {
        &self.pin
    }

    pub fn set_pin(&mut self, pin: Pin) {
        self.pin = pin;
    }

    pub fn attributes(&self) -> &FileAttributes {
        &self.request.attributes
    }

    /// Merge attributes fetched from the namespace into the request.
    pub fn set_attributes(&mut self, attributes: FileAttributes) {
        self.request.attributes = attributes;
    }

    pub fn add_location(&mut self, pool: &str) {
        let locations = &mut self.request.attributes.locations;
        if !locations.iter().any(|l| l == pool) {
            locations.push(pool.to_string());
        }
    }

    /// True if the caller-visible validity window still covers a retry
    /// scheduled `delay` from now. Retries are never scheduled past it.
    pub fn valid_in(&self, delay: Duration) -> bool {
        self.started.elapsed() + delay < self.request.ttl
    }

    /// Compute the pin's semantic expiration as of this moment.
    ///
    /// The lifetime counts from when the file is actually pinned, which due
    /// to staging may be much later than when the pin was requested.
    pub fn freeze_expiration(&self) -> Option<DateTime<Utc>> {
        match self.request.lifetime_ms {
            -1 => None,
            ms => Some(Utc::now() + ChronoDuration::milliseconds(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinman_core::models::{FileId, Owner, PinState, ProtocolInfo};

    fn task(lifetime_ms: i64, ttl: Duration) -> PinTask {
        let file_id = FileId::new("F1");
        let request = PinRequest {
            attributes: FileAttributes::new(file_id.clone()),
            protocol: ProtocolInfo::new("dcap-3.0", "client.example.org"),
            owner: Owner::new(100, 100),
            request_id: None,
            lifetime_ms,
            ttl,
        };
        let pin = Pin {
            pin_id: 1,
            file_id,
            request_id: None,
            uid: 100,
            gid: 100,
            state: PinState::Pinning,
            pool: None,
            sticky: "pinman-test".to_string(),
            created_at: Utc::now(),
            expires_at: None,
        };
        PinTask::new(request, pin)
    }

    #[tokio::test]
    async fn retry_within_ttl_is_valid() {
        let t = task(-1, Duration::from_secs(60));
        assert!(t.valid_in(Duration::from_secs(30)));
        assert!(!t.valid_in(Duration::from_secs(61)));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_consumes_the_ttl() {
        let t = task(-1, Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(t.valid_in(Duration::from_secs(10)));
        assert!(!t.valid_in(Duration::from_secs(20)));
    }

    #[tokio::test]
    async fn infinite_lifetime_freezes_to_none() {
        assert_eq!(task(-1, Duration::from_secs(60)).freeze_expiration(), None);
    }

    #[tokio::test]
    async fn finite_lifetime_freezes_relative_to_now() {
        let before = Utc::now();
        let frozen = task(60_000, Duration::from_secs(60))
            .freeze_expiration()
            .unwrap();
        let after = Utc::now();
        assert!(frozen >= before + ChronoDuration::milliseconds(60_000));
        assert!(frozen <= after + ChronoDuration::milliseconds(60_000));
    }

    #[tokio::test]
    async fn add_location_deduplicates() {
        let mut t = task(-1, Duration::from_secs(60));
        t.add_location("pool_a");
        t.add_location("pool_a");
        assert_eq!(t.attributes().locations, vec!["pool_a"]);
    }
}
