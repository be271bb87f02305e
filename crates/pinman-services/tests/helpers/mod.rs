//! Shared fixtures: an in-memory pin record store with the same guard
//! semantics as the Postgres one, and scriptable collaborator stubs.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pinman_core::models::{
    AccessLatency, FileAttributes, FileId, Owner, Pin, PinState, ProtocolInfo,
};
use pinman_core::{PinError, PinManagerConfig, StagePermission};
use pinman_db::{Admission, PinDao};
use pinman_remote::{
    Namespace, PoolManager, PoolSelection, Pools, RemoteError, RemoteResult, SelectReadPool,
    SetSticky,
};
use pinman_services::{PinCoordinator, PinRequest, PinRequestProcessor};

pub struct MemoryPinDao {
    pins: Mutex<HashMap<i64, Pin>>,
    next_id: AtomicI64,
}

impl MemoryPinDao {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pins: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        })
    }

    pub fn insert(&self, pin: Pin) {
        self.pins.lock().unwrap().insert(pin.pin_id, pin);
    }

    pub fn snapshot(&self) -> Vec<Pin> {
        let mut pins: Vec<Pin> = self.pins.lock().unwrap().values().cloned().collect();
        pins.sort_by_key(|p| p.pin_id);
        pins
    }

    fn fresh_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl PinDao for MemoryPinDao {
    async fn admit(
        &self,
        owner: &Owner,
        file_id: &FileId,
        request_id: Option<&str>,
        sticky: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Admission, PinError> {
        let mut pins = self.pins.lock().unwrap();

        if let Some(request_id) = request_id {
            let predecessor = pins
                .values()
                .find(|p| &p.file_id == file_id && p.request_id.as_deref() == Some(request_id))
                .map(|p| p.pin_id);
            if let Some(pin_id) = predecessor {
                let pin = pins.get_mut(&pin_id).unwrap();
                if pin.state == PinState::Pinned {
                    return Ok(Admission::Existing(pin.clone()));
                }
                pin.state = PinState::Unpinning;
                pin.request_id = None;
            }
        }

        let pin = Pin {
            pin_id: self.fresh_id(),
            file_id: file_id.clone(),
            request_id: request_id.map(str::to_string),
            uid: owner.uid,
            gid: owner.gid,
            state: PinState::Pinning,
            pool: None,
            sticky: sticky.to_string(),
            created_at: Utc::now(),
            expires_at: Some(deadline),
        };
        pins.insert(pin.pin_id, pin.clone());
        Ok(Admission::Created(pin))
    }

    async fn get(&self, pin_id: i64) -> Result<Option<Pin>, PinError> {
        Ok(self.pins.lock().unwrap().get(&pin_id).cloned())
    }

    async fn get_by_request(
        &self,
        file_id: &FileId,
        request_id: &str,
    ) -> Result<Option<Pin>, PinError> {
        Ok(self
            .pins
            .lock()
            .unwrap()
            .values()
            .find(|p| &p.file_id == file_id && p.request_id.as_deref() == Some(request_id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Pin>, PinError> {
        Ok(self.snapshot())
    }

    async fn list_by_file(&self, file_id: &FileId) -> Result<Vec<Pin>, PinError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|p| &p.file_id == file_id)
            .collect())
    }

    async fn list_by_state(&self, state: PinState) -> Result<Vec<Pin>, PinError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|p| p.state == state)
            .collect())
    }

    async fn refresh_deadline(
        &self,
        pin_id: i64,
        sticky: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Pin>, PinError> {
        let mut pins = self.pins.lock().unwrap();
        match pins.get_mut(&pin_id) {
            Some(p) if p.sticky == sticky && p.state == PinState::Pinning => {
                p.expires_at = Some(deadline);
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn assign_pool(
        &self,
        pin_id: i64,
        sticky: &str,
        pool: &str,
        deadline: DateTime<Utc>,
    ) -> Result<Option<Pin>, PinError> {
        let mut pins = self.pins.lock().unwrap();
        match pins.get_mut(&pin_id) {
            Some(p) if p.sticky == sticky && p.state == PinState::Pinning => {
                p.pool = Some(pool.to_string());
                p.expires_at = Some(deadline);
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_pinned(
        &self,
        pin_id: i64,
        sticky: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Pin>, PinError> {
        let mut pins = self.pins.lock().unwrap();
        match pins.get_mut(&pin_id) {
            Some(p) if p.sticky == sticky && p.state == PinState::Pinning => {
                p.state = PinState::Pinned;
                p.expires_at = expires_at;
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn extend(
        &self,
        pin_id: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Pin>, PinError> {
        let mut pins = self.pins.lock().unwrap();
        match pins.get_mut(&pin_id) {
            Some(p) if p.state == PinState::Pinned => {
                p.expires_at = expires_at;
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_unpinning(&self, pin_id: i64) -> Result<Option<Pin>, PinError> {
        let mut pins = self.pins.lock().unwrap();
        match pins.get_mut(&pin_id) {
            Some(p) => {
                p.state = PinState::Unpinning;
                p.request_id = None;
                Ok(Some(p.clone()))
            }
            None => Ok(None),
        }
    }

    async fn mark_all_unpinning(&self, file_id: &FileId) -> Result<u64, PinError> {
        let mut pins = self.pins.lock().unwrap();
        let mut affected = 0;
        for p in pins.values_mut() {
            if &p.file_id == file_id && p.state != PinState::Unpinning {
                p.state = PinState::Unpinning;
                p.request_id = None;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn mark_expired_unpinning(&self, now: DateTime<Utc>) -> Result<u64, PinError> {
        let mut pins = self.pins.lock().unwrap();
        let mut affected = 0;
        for p in pins.values_mut() {
            if p.state != PinState::Unpinning && p.is_expired_at(now) {
                p.state = PinState::Unpinning;
                p.request_id = None;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, pin: &Pin) -> Result<bool, PinError> {
        let mut pins = self.pins.lock().unwrap();
        match pins.get(&pin.pin_id) {
            Some(p) if p.sticky == pin.sticky && p.state == pin.state => {
                pins.remove(&pin.pin_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn replace_with_unpinning(&self, pin: &Pin) -> Result<(), PinError> {
        let mut pins = self.pins.lock().unwrap();
        pins.remove(&pin.pin_id);
        let replacement = Pin {
            pin_id: self.fresh_id(),
            file_id: pin.file_id.clone(),
            request_id: None,
            uid: pin.uid,
            gid: pin.gid,
            state: PinState::Unpinning,
            pool: pin.pool.clone(),
            sticky: pin.sticky.clone(),
            created_at: Utc::now(),
            expires_at: None,
        };
        pins.insert(replacement.pin_id, replacement);
        Ok(())
    }

    async fn has_shared_sticky(&self, pin: &Pin) -> Result<bool, PinError> {
        let Some(pool) = &pin.pool else {
            return Ok(false);
        };
        Ok(self
            .pins
            .lock()
            .unwrap()
            .values()
            .any(|p| p.pin_id != pin.pin_id && p.pool.as_ref() == Some(pool) && p.sticky == pin.sticky))
    }
}

/// Scriptable pool-selection stub. Scripted outcomes are consumed front to
/// back; once the script is exhausted every call selects `pool_a`.
pub struct StubPoolManager {
    script: Mutex<VecDeque<RemoteResult<PoolSelection>>>,
    pub calls: Mutex<Vec<SelectReadPool>>,
}

impl StubPoolManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, outcome: RemoteResult<PoolSelection>) {
        self.script.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl PoolManager for StubPoolManager {
    async fn select_read_pool(&self, request: SelectReadPool) -> RemoteResult<PoolSelection> {
        self.calls.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PoolSelection {
                    pool: "pool_a".to_string(),
                })
            })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Scriptable pool-fleet stub, same scripting model as [`StubPoolManager`].
pub struct StubPools {
    script: Mutex<VecDeque<RemoteResult<()>>>,
    pub calls: Mutex<Vec<SetSticky>>,
}

impl StubPools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, outcome: RemoteResult<()>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn sticky_calls(&self) -> Vec<SetSticky> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Pools for StubPools {
    async fn set_sticky(&self, request: SetSticky) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(request);
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

/// Scriptable namespace stub; exhausted script returns complete online
/// attributes for the requested file.
pub struct StubNamespace {
    script: Mutex<VecDeque<RemoteResult<FileAttributes>>>,
    pub calls: Mutex<Vec<FileId>>,
}

impl StubNamespace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, outcome: RemoteResult<FileAttributes>) {
        self.script.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl Namespace for StubNamespace {
    async fn file_attributes(&self, file_id: &FileId) -> RemoteResult<FileAttributes> {
        self.calls.lock().unwrap().push(file_id.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(complete_attributes(file_id.as_str())))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}

pub struct Harness {
    pub dao: Arc<MemoryPinDao>,
    pub pool_manager: Arc<StubPoolManager>,
    pub pools: Arc<StubPools>,
    pub namespace: Arc<StubNamespace>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dao: MemoryPinDao::new(),
            pool_manager: StubPoolManager::new(),
            pools: StubPools::new(),
            namespace: StubNamespace::new(),
        }
    }

    pub fn processor(&self, config: PinManagerConfig) -> PinRequestProcessor {
        PinRequestProcessor::new(
            self.dao.clone(),
            self.pool_manager.clone(),
            self.pools.clone(),
            self.namespace.clone(),
            Arc::new(StagePermission::allow_all()),
            config,
        )
    }

    pub fn coordinator(&self, config: PinManagerConfig) -> PinCoordinator {
        PinCoordinator::new(
            config,
            self.dao.clone(),
            self.pool_manager.clone(),
            self.pools.clone(),
            self.namespace.clone(),
            StagePermission::allow_all(),
        )
    }
}

pub fn test_config() -> PinManagerConfig {
    PinManagerConfig {
        retry_delay: Duration::from_secs(30),
        small_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

pub fn complete_attributes(file_id: &str) -> FileAttributes {
    FileAttributes {
        file_id: FileId::new(file_id),
        storage_class: Some("data:disk".to_string()),
        hsm: Some("osm".to_string()),
        access_latency: Some(AccessLatency::Online),
        locations: vec!["pool_a".to_string()],
    }
}

pub fn pin_request(file_id: &str, lifetime_ms: i64) -> PinRequest {
    PinRequest {
        attributes: complete_attributes(file_id),
        protocol: ProtocolInfo::new("http", "client.example.org"),
        owner: Owner::new(100, 100),
        request_id: None,
        lifetime_ms,
        ttl: Duration::from_secs(24 * 3600),
    }
}

pub fn pinned(pin_id: i64, file_id: &str, uid: i64) -> Pin {
    Pin {
        pin_id,
        file_id: FileId::new(file_id),
        request_id: None,
        uid,
        gid: uid,
        state: PinState::Pinned,
        pool: Some("pool_a".to_string()),
        sticky: format!("pinman-test-{}", pin_id),
        created_at: Utc::now(),
        expires_at: None,
    }
}

pub fn no_route(target: &str) -> RemoteError {
    RemoteError::NoRoute(target.to_string())
}
