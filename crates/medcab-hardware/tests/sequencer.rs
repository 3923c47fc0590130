//! Integration tests for CommandSequencer
//!
//! The sequencer keeps one command in flight; these tests check ordering,
//! response matching, retries and cancellation against the simulated
//! cabinet.

mod common;

use common::{next_response, rig};
use medcab_core::DeviceAddress;
use medcab_hardware::{
    CommandSequencer, ConnectionConfig, HealthStatus, LinkEvent, TransportError,
};
use medcab_protocol::{DeviceProfile, Ds12Profile, Packet, build_status_request, build_unlock};
use std::sync::Arc;
use std::time::Duration;

fn status() -> Packet {
    build_status_request(DeviceAddress::default())
}

fn version() -> Packet {
    Ds12Profile.build_get_version(DeviceAddress::default())
}

#[tokio::test]
async fn test_command_round_trip() {
    let mut rig = rig(ConnectionConfig::default());
    rig.manager.connect().await.unwrap();
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    sequencer
        .send(build_unlock(DeviceAddress::default(), 3).unwrap())
        .await
        .unwrap();
    let response = next_response(&mut rig.events).await;

    assert!(response.unlock_success());
    assert!(sequencer.response_received(response.packet.command));
    assert!(!rig.cabinet.is_locked(3));
    assert_eq!(rig.cabinet.received_opcodes(), vec![0x81]);

    sequencer.shutdown().await;
}

/// The next command waits until the in-flight one is answered.
#[tokio::test]
async fn test_single_command_in_flight() {
    let rig = rig(ConnectionConfig::default());
    rig.cabinet.set_silent(true);
    rig.manager.connect().await.unwrap();
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    sequencer.send(status()).await.unwrap();
    let second = sequencer.enqueue(version());

    assert_eq!(sequencer.in_flight(), Some(0x80));
    assert_eq!(sequencer.queue_depth(), 1);

    // A response to another opcode does not release the channel
    assert!(!sequencer.response_received(0x8F));
    assert_eq!(sequencer.in_flight(), Some(0x80));

    assert!(sequencer.response_received(0x80));
    second.await.unwrap().unwrap();
    assert_eq!(sequencer.in_flight(), Some(0x8F));
    assert_eq!(sequencer.queue_depth(), 0);

    sequencer.shutdown().await;
}

/// An unanswered command is sent again after each response timeout; the
/// last silent send releases the channel and is reported.
#[tokio::test(start_paused = true)]
async fn test_unanswered_command_times_out() {
    let mut rig = rig(
        ConnectionConfig::default()
            .with_response_timeout(Duration::from_millis(1000))
            .with_write_attempts(2)
            .with_write_retry_delay(Duration::from_millis(100)),
    );
    rig.cabinet.set_silent(true);
    rig.manager.connect().await.unwrap();
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    sequencer.send(status()).await.unwrap();
    assert_eq!(sequencer.in_flight(), Some(0x80));

    // Resent at 1100ms
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(rig.cabinet.received_opcodes(), vec![0x80, 0x80]);
    assert_eq!(sequencer.in_flight(), Some(0x80));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(sequencer.in_flight(), None);
    assert!(!sequencer.response_received(0x80));
    assert_eq!(
        rig.events.recv().await,
        Some(LinkEvent::ResponseTimeout {
            opcode: 0x80,
            sends: 2
        })
    );
    assert_eq!(rig.cabinet.received_opcodes().len(), 2);

    sequencer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_response_to_resend_releases_channel() {
    let mut rig =
        rig(ConnectionConfig::default().with_response_timeout(Duration::from_millis(1000)));
    rig.cabinet.set_silent(true);
    rig.manager.connect().await.unwrap();
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    sequencer.send(status()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(rig.cabinet.received_opcodes().len(), 2);

    assert!(sequencer.response_received(0x80));
    assert_eq!(sequencer.in_flight(), None);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rig.events.try_recv().is_err());
    assert_eq!(rig.cabinet.received_opcodes().len(), 2);

    sequencer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_resend() {
    let mut rig = rig(
        ConnectionConfig::default()
            .with_response_timeout(Duration::from_millis(1000))
            .with_write_retry_delay(Duration::from_millis(500)),
    );
    rig.cabinet.set_silent(true);
    rig.manager.connect().await.unwrap();
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    sequencer.send(status()).await.unwrap();
    // Timed out at 1000ms, resend due at 1500ms
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(sequencer.in_flight(), Some(0x80));

    sequencer.cancel_pending();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(rig.cabinet.received_opcodes(), vec![0x80]);
    assert_eq!(sequencer.in_flight(), None);
    assert!(rig.events.try_recv().is_err());

    sequencer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_write_retries_exhausted() {
    let rig = rig(ConnectionConfig::default().with_write_attempts(3));
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    let err = sequencer.send(status()).await.unwrap_err();

    match err {
        TransportError::RetriesExhausted { attempts, message } => {
            assert_eq!(attempts, 3);
            assert!(message.contains("not connected"));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(sequencer.in_flight(), None);

    sequencer.shutdown().await;
}

#[tokio::test]
async fn test_emergency_stop_cancels_queue() {
    let rig = rig(ConnectionConfig::default());
    rig.cabinet.set_silent(true);
    rig.manager.connect().await.unwrap();
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    sequencer.send(status()).await.unwrap();
    let queued: Vec<_> = (0..3).map(|_| sequencer.enqueue(version())).collect();
    assert_eq!(sequencer.queue_depth(), 3);

    assert_eq!(sequencer.emergency_stop().await, 3);

    for ack in queued {
        assert!(matches!(ack.await.unwrap(), Err(TransportError::Cancelled)));
    }
    assert_eq!(sequencer.queue_depth(), 0);
    assert_eq!(sequencer.in_flight(), None);
    assert!(!rig.manager.is_connected());

    // Idempotent
    assert_eq!(sequencer.emergency_stop().await, 0);
    assert_eq!(sequencer.health().status, HealthStatus::Failed);

    sequencer.shutdown().await;
}

#[tokio::test]
async fn test_deep_queue_degrades_health() {
    let rig = rig(ConnectionConfig::default());
    rig.cabinet.set_silent(true);
    rig.manager.connect().await.unwrap();
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    sequencer.send(status()).await.unwrap();
    assert_eq!(sequencer.health().status, HealthStatus::Healthy);

    let _pending: Vec<_> = (0..6).map(|_| sequencer.enqueue(status())).collect();
    let health = sequencer.health();
    assert_eq!(health.queue_depth, 6);
    assert_eq!(health.status, HealthStatus::Degraded);

    sequencer.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_after_shutdown_is_cancelled() {
    let rig = rig(ConnectionConfig::default());
    let sequencer = CommandSequencer::new(Arc::clone(&rig.manager));

    sequencer.shutdown().await;

    let err = sequencer.send(status()).await.unwrap_err();
    assert!(matches!(err, TransportError::Cancelled));
}
