//! Shared fixtures for the transport integration tests.

#![allow(dead_code)]

use medcab_hardware::mock::{MockCabinetHandle, MockLink};
use medcab_hardware::{ConnectionConfig, ConnectionManager, LinkEvent, SerialConfig};
use medcab_protocol::{ParsedResponse, parse_response};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Rig {
    pub manager: Arc<ConnectionManager<MockLink>>,
    pub events: mpsc::Receiver<LinkEvent>,
    pub cabinet: MockCabinetHandle,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("medcab_hardware=debug")
        .with_test_writer()
        .try_init();
}

/// Disconnected manager over a fresh simulated cabinet.
pub fn rig(config: ConnectionConfig) -> Rig {
    init_tracing();
    let (link, cabinet) = MockLink::new();
    let (manager, events) = ConnectionManager::new(link, SerialConfig::default(), config);
    Rig {
        manager: Arc::new(manager),
        events,
        cabinet,
    }
}

/// Next packet event, parsed. Framing events are skipped.
pub async fn next_response(events: &mut mpsc::Receiver<LinkEvent>) -> ParsedResponse {
    loop {
        match events.recv().await {
            Some(LinkEvent::Packet(bytes)) => {
                return parse_response(&bytes).expect("cabinet sends valid packets");
            }
            Some(LinkEvent::Framing(_)) => continue,
            other => panic!("expected a packet, got {other:?}"),
        }
    }
}
