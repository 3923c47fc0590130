//! Shared fixtures for the controller integration tests.
//!
//! Tests run in real time against the simulated cabinet with a short poll
//! interval and response timeout, so whole workflows finish in tens of
//! milliseconds.

#![allow(dead_code)]

use medcab_controller::{
    CabinetController, CabinetEvent, ControllerConfig, ControllerPhase, RecordingSink,
};
use medcab_core::Credential;
use medcab_hardware::ConnectionConfig;
use medcab_hardware::mock::{MockCabinetHandle, MockLink};
use medcab_storage::{
    AuditEntry, AuditLogRepository, Database, SlotRecord, SlotRepository, SqliteStore, UserRecord,
    UserRepository,
};
use std::time::Duration;

pub const PASSKEY: &str = "4821";
pub const WAIT: Duration = Duration::from_secs(3);

pub struct Rig {
    pub controller: CabinetController<MockLink, SqliteStore>,
    pub store: SqliteStore,
    pub cabinet: MockCabinetHandle,
    pub events: RecordingSink,
    pub user_id: i64,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("medcab_controller=debug,medcab_hardware=debug")
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_connection(
            ConnectionConfig::default()
                .with_connect_base_delay(Duration::from_millis(10))
                .with_write_retry_delay(Duration::from_millis(5))
                .with_response_timeout(Duration::from_millis(200)),
        )
}

/// Controller over a fresh cabinet and database with one operator and
/// twelve provisioned slots. Not connected yet.
pub async fn rig() -> Rig {
    rig_with(test_config()).await
}

pub async fn rig_with(config: ControllerConfig) -> Rig {
    init_tracing();
    let store = SqliteStore::new(Database::in_memory().await.unwrap());
    store.ensure_slots(12).await.unwrap();
    let user_id = store
        .create(&UserRecord::new("Ward 3", "nurse", PASSKEY))
        .await
        .unwrap();

    let (link, cabinet) = MockLink::new();
    cabinet.set_polarity(config.polarity);
    let events = RecordingSink::new();
    let controller = CabinetController::new(
        link,
        store.clone(),
        std::sync::Arc::new(events.clone()),
        config,
    )
    .unwrap();

    Rig {
        controller,
        store,
        cabinet,
        events,
        user_id,
    }
}

/// Connected rig whose initial status broadcast has been seen.
pub async fn connected_rig() -> Rig {
    let rig = rig().await;
    rig.controller.initialize().await.unwrap();
    rig.wait_for_event("init-res").await;
    rig
}

pub fn credential() -> Credential {
    Credential::new(PASSKEY).unwrap()
}

/// Poll `check` until it yields a value or [`WAIT`] passes.
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let result = tokio::time::timeout(WAIT, async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    match result {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

impl Rig {
    pub async fn slot(&self, slot_id: i64) -> SlotRecord {
        self.store.find_slot(slot_id).await.unwrap().unwrap()
    }

    pub async fn audit(&self, process: &str) -> Vec<AuditEntry> {
        self.store.find_by_process(process, 50).await.unwrap()
    }

    pub async fn wait_for_event(&self, name: &str) -> CabinetEvent {
        let events = self.events.clone();
        eventually(name, || {
            let found = events.named(name).pop();
            async move { found }
        })
        .await
    }

    pub async fn wait_for_phase(&self, phase: ControllerPhase) {
        let controller = &self.controller;
        eventually(phase.as_str(), move || async move {
            (controller.phase().await == phase).then_some(())
        })
        .await
    }

    pub async fn wait_for_audit(&self, process: &str) -> AuditEntry {
        eventually(process, move || async move {
            self.audit(process).await.into_iter().next()
        })
        .await
    }

    /// Wait for the lock-back event of the current workflow.
    pub async fn wait_for_lock_back(&self, name: &str) -> CabinetEvent {
        let events = self.events.clone();
        eventually(name, || {
            let found = events.named(name).into_iter().find(|event| {
                matches!(
                    event,
                    CabinetEvent::Unlocking { locked_back: true, .. }
                        | CabinetEvent::Dispensing { locked_back: true, .. }
                )
            });
            async move { found }
        })
        .await
    }
}
