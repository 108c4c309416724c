//! Shared fixtures for custody integration tests.
#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use keyward_custody::{
    Actor, Asset, CustodyService, Role,
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult},
};
use keyward_storage::{MemoryBackend, UserId};
use keyward_token::{
    LocationTokenService, TokenConfig,
    testutil::{TEST_SECRET, test_service},
};
use parking_lot::Mutex;

/// Audit logger that keeps every event for inspection.
#[derive(Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingLogger {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn results_for(&self, action: AuditAction) -> Vec<AuditResult> {
        self.events.lock().iter().filter(|e| e.action == action).map(|e| e.result.clone()).collect()
    }
}

#[async_trait]
impl AuditLogger for RecordingLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub tokens: Arc<LocationTokenService>,
    pub audit: Arc<RecordingLogger>,
    pub service: Arc<CustodyService<MemoryBackend>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_tokens(test_service())
    }

    /// A fixture whose codes are single-use: each nonce is accepted once.
    pub fn single_use() -> Self {
        let config = TokenConfig::builder()
            .secret(TEST_SECRET.to_owned())
            .replay_cache_capacity(10_000)
            .build()
            .expect("config");
        Self::with_tokens(Arc::new(LocationTokenService::new(&config).expect("tokens")))
    }

    pub fn with_tokens(tokens: Arc<LocationTokenService>) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let audit = Arc::new(RecordingLogger::default());
        let service = CustodyService::builder()
            .backend(Arc::clone(&backend))
            .tokens(Arc::clone(&tokens))
            .audit(Arc::clone(&audit) as Arc<dyn AuditLogger>)
            .build();
        Self { backend, tokens, audit, service: Arc::new(service) }
    }

    /// Registers an asset at `location`.
    pub async fn asset(&self, name: &str, location: &str) -> Asset {
        self.service.create_asset(&admin(), name, location).await.expect("create asset")
    }

    /// Registers assets until one with `id` exists; returns that one.
    pub async fn asset_with_id(&self, id: i64, location: &str) -> Asset {
        loop {
            let asset = self.asset(&format!("Key {id}"), location).await;
            if asset.id.0 >= id {
                assert_eq!(asset.id.0, id, "ids are allocated sequentially");
                return asset;
            }
        }
    }

    /// A fresh code for `location`, minted by an administrator.
    pub async fn code(&self, location: &str) -> String {
        self.service.mint_token(location, &admin()).await.expect("mint").token
    }
}

pub fn admin() -> Actor {
    Actor::new(UserId(1), "Facilities", Role::Admin).expect("admin")
}

pub fn student() -> Actor {
    Actor::new(UserId(42), "Ada", Role::Student).expect("student")
}

pub fn staff() -> Actor {
    Actor::new(UserId(7), "Grace", Role::Staff).expect("staff")
}
