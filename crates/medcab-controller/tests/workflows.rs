//! Load and pickup workflows end to end
//!
//! Every test drives a CabinetController over the simulated cabinet and an
//! in-memory database, then checks phase, slot rows, events and audit rows.
//!
//! Run with: cargo test --package medcab-controller --test workflows

mod common;

use common::{connected_rig, credential, rig};
use medcab_controller::{
    CabinetEvent, ControllerPhase, OperationError, OperationKind, ReasonCode,
};
use medcab_core::Credential;
use medcab_protocol::AskStatus;
use medcab_storage::{AuditLogRepository, SlotRepository, SlotUpdate};
use rstest::rstest;

const UNLOCK: u8 = 0x81;

fn unlock_commands(rig: &common::Rig) -> usize {
    rig.cabinet
        .received_opcodes()
        .into_iter()
        .filter(|&opcode| opcode == UNLOCK)
        .count()
}

#[tokio::test]
async fn test_load_workflow_marks_slot_occupied() {
    let rig = connected_rig().await;

    rig.controller.unlock(3, "HN1", &credential()).await.unwrap();
    let context = rig.controller.context().await.unwrap();
    assert_eq!(context.kind, OperationKind::Unlock);
    assert_eq!(context.slot.get(), 3);
    assert_eq!(context.user_id, rig.user_id);

    rig.wait_for_phase(ControllerPhase::AwaitingLockBack).await;
    assert!(rig.slot(3).await.opening);
    assert!(!rig.cabinet.is_locked(3));

    // Still open: polling keeps the workflow waiting
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(rig.controller.phase().await, ControllerPhase::AwaitingLockBack);

    rig.cabinet.close_slot(3);
    let event = rig.wait_for_lock_back("unlocking").await;
    rig.wait_for_phase(ControllerPhase::Idle).await;

    assert_eq!(
        event,
        CabinetEvent::Unlocking {
            operation_id: context.id,
            slot_id: 3,
            record_id: "HN1".to_string(),
            locked_back: true,
        }
    );
    let locked_back = rig
        .events
        .named("unlocking")
        .into_iter()
        .filter(|e| matches!(e, CabinetEvent::Unlocking { locked_back: true, .. }))
        .count();
    assert_eq!(locked_back, 1);

    let slot = rig.slot(3).await;
    assert!(slot.occupied);
    assert!(!slot.opening);
    assert_eq!(slot.record_id(), Some("HN1"));
    assert!(rig.controller.context().await.is_none());

    let entry = rig.wait_for_audit("unlock").await;
    assert!(entry.success);
    assert_eq!(entry.slot_id, Some(3));
    assert_eq!(entry.user_id, Some(rig.user_id));
}

#[tokio::test]
async fn test_dispense_workflow_empties_slot() {
    let rig = connected_rig().await;
    rig.store
        .update_slot(5, &SlotUpdate::loaded("HN5"))
        .await
        .unwrap();

    rig.controller.dispense(5, "HN5", &credential()).await.unwrap();
    rig.wait_for_phase(ControllerPhase::AwaitingDispenseLockBack).await;
    assert!(!rig.events.named("dispensing").is_empty());
    assert!(rig.events.named("unlocking").is_empty());

    rig.cabinet.close_slot(5);
    rig.wait_for_lock_back("dispensing").await;
    rig.wait_for_phase(ControllerPhase::Idle).await;

    let slot = rig.slot(5).await;
    assert!(!slot.occupied);
    assert_eq!(slot.record_id(), None);

    let entry = rig.wait_for_audit("dispense-complete").await;
    assert!(entry.success);
    assert_eq!(entry.record_id.as_deref(), Some("HN5"));
}

#[tokio::test]
async fn test_dispense_requires_occupied_slot() {
    let rig = connected_rig().await;

    let err = rig
        .controller
        .dispense(5, "HN5", &credential())
        .await
        .unwrap_err();

    assert!(matches!(err, OperationError::SlotNotOccupied { slot: 5 }));
    assert_eq!(unlock_commands(&rig), 0);
    assert_eq!(rig.controller.phase().await, ControllerPhase::Idle);

    let entries = rig.store.find_by_slot(5, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].success);
    assert_eq!(entries[0].reason.as_deref(), Some("not-occupied"));
}

#[tokio::test]
async fn test_dispense_requires_record_id() {
    let rig = connected_rig().await;
    rig.store
        .update_slot(
            6,
            &SlotUpdate {
                occupied: Some(true),
                ..SlotUpdate::default()
            },
        )
        .await
        .unwrap();

    let err = rig
        .controller
        .dispense(6, "HN6", &credential())
        .await
        .unwrap_err();

    assert!(matches!(err, OperationError::MissingRecordId));
    assert_eq!(unlock_commands(&rig), 0);
}

#[tokio::test]
async fn test_unknown_credential_is_rejected() {
    let rig = connected_rig().await;
    let stranger = Credential::new("0000").unwrap();

    let err = rig.controller.unlock(3, "HN1", &stranger).await.unwrap_err();

    assert!(matches!(err, OperationError::NoAuthenticatedUser));
    assert_eq!(unlock_commands(&rig), 0);

    let entry = rig.wait_for_audit("unlock").await;
    assert!(!entry.success);
    assert_eq!(entry.user_id, None);
    assert_eq!(entry.reason.as_deref(), Some("not-authenticated"));

    let failed = rig.wait_for_event("operation-failed").await;
    assert!(matches!(
        failed,
        CabinetEvent::OperationFailed {
            reason: ReasonCode::NotAuthenticated,
            slot_id: Some(3),
            ..
        }
    ));
}

#[rstest]
#[case(0)]
#[case(13)]
#[case(-1)]
#[tokio::test]
async fn test_slot_out_of_range(#[case] slot: i64) {
    let rig = connected_rig().await;

    let err = rig
        .controller
        .unlock(slot, "HN1", &credential())
        .await
        .unwrap_err();

    assert!(matches!(err, OperationError::InvalidSlot { max: 12, .. }));
    assert_eq!(err.reason_code(), ReasonCode::InvalidSlot);
    assert_eq!(unlock_commands(&rig), 0);
    assert_eq!(rig.audit("unlock").await.len(), 1);
}

#[tokio::test]
async fn test_unlock_requires_connection() {
    let rig = rig().await;

    let err = rig
        .controller
        .unlock(3, "HN1", &credential())
        .await
        .unwrap_err();

    assert!(matches!(err, OperationError::NotConnected));
    assert_eq!(rig.controller.phase().await, ControllerPhase::Idle);
    assert!(!rig.slot(3).await.opening);
}

#[tokio::test]
async fn test_blank_record_id_is_rejected() {
    let rig = connected_rig().await;

    let err = rig
        .controller
        .unlock(3, "  ", &credential())
        .await
        .unwrap_err();

    assert!(matches!(err, OperationError::MissingRecordId));
    assert_eq!(unlock_commands(&rig), 0);
}

#[tokio::test]
async fn test_second_operation_is_refused() {
    let rig = connected_rig().await;

    rig.controller.unlock(3, "HN1", &credential()).await.unwrap();
    rig.wait_for_phase(ControllerPhase::AwaitingLockBack).await;
    let err = rig
        .controller
        .unlock(4, "HN2", &credential())
        .await
        .unwrap_err();

    assert!(matches!(err, OperationError::OperationInProgress { .. }));
    assert_eq!(unlock_commands(&rig), 1);
    assert_eq!(rig.controller.context().await.unwrap().slot.get(), 3);
    assert!(!rig.slot(4).await.opening);
}

#[tokio::test]
async fn test_hardware_rejection_aborts_workflow() {
    let rig = connected_rig().await;
    rig.cabinet.set_unlock_ask(AskStatus::Failed);

    // The command was written; the rejection arrives asynchronously
    rig.controller.unlock(3, "HN1", &credential()).await.unwrap();

    let failed = rig.wait_for_event("operation-failed").await;
    assert!(matches!(
        failed,
        CabinetEvent::OperationFailed {
            reason: ReasonCode::HardwareRejected,
            slot_id: Some(3),
            ..
        }
    ));
    rig.wait_for_phase(ControllerPhase::Idle).await;

    assert!(rig.controller.context().await.is_none());
    assert!(rig.cabinet.is_locked(3));
    let slot = rig.slot(3).await;
    assert!(!slot.opening);
    assert!(!slot.occupied);
    assert!(rig.events.named("unlocking").is_empty());

    let entries = rig.audit("unlock").await;
    assert!(
        entries
            .iter()
            .any(|e| !e.success && e.reason.as_deref() == Some("hardware-rejected"))
    );
    // No retry at this layer
    assert_eq!(unlock_commands(&rig), 1);
}

#[tokio::test]
async fn test_inactive_slot_is_refused() {
    let rig = connected_rig().await;

    rig.controller.deactivate(7, &credential()).await.unwrap();
    assert!(!rig.slot(7).await.active);

    let err = rig
        .controller
        .unlock(7, "HN7", &credential())
        .await
        .unwrap_err();
    assert!(matches!(err, OperationError::SlotInactive { slot: 7 }));
    assert_eq!(unlock_commands(&rig), 0);

    rig.controller.reactivate(7, &credential()).await.unwrap();
    assert!(rig.slot(7).await.active);
    rig.controller.unlock(7, "HN7", &credential()).await.unwrap();
    rig.wait_for_phase(ControllerPhase::AwaitingLockBack).await;
}

/// Start a workflow on slot 3 and wait until it reaches `phase`. A silent
/// cabinet holds it before the unlock ack.
async fn start_workflow(rig: &common::Rig, phase: ControllerPhase) {
    if matches!(phase, ControllerPhase::Unlocking | ControllerPhase::Dispensing) {
        rig.cabinet.set_silent(true);
    }
    match phase {
        ControllerPhase::Unlocking | ControllerPhase::AwaitingLockBack => {
            rig.controller.unlock(3, "HN1", &credential()).await.unwrap();
        }
        _ => {
            rig.store
                .update_slot(3, &SlotUpdate::loaded("HN1"))
                .await
                .unwrap();
            rig.controller.dispense(3, "HN1", &credential()).await.unwrap();
        }
    }
    rig.wait_for_phase(phase).await;
}

#[tokio::test]
async fn test_lost_unlock_ack_aborts_workflow() {
    let rig = connected_rig().await;
    rig.cabinet.set_silent(true);

    rig.controller.unlock(3, "HN1", &credential()).await.unwrap();
    assert_eq!(rig.controller.phase().await, ControllerPhase::Unlocking);

    let failed = rig.wait_for_event("operation-failed").await;
    assert!(matches!(
        failed,
        CabinetEvent::OperationFailed {
            reason: ReasonCode::TransportError,
            slot_id: Some(3),
            ..
        }
    ));
    rig.wait_for_phase(ControllerPhase::Idle).await;

    assert!(rig.controller.context().await.is_none());
    assert!(!rig.slot(3).await.opening);
    // Sent once, then resent up to the write attempt limit
    assert_eq!(unlock_commands(&rig), 3);

    let failures: Vec<_> = rig
        .audit("unlock")
        .await
        .into_iter()
        .filter(|e| !e.success)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].reason.as_deref(), Some("transport-error"));
    assert_eq!(failures[0].user_id, Some(rig.user_id));

    // The board answers again: a new workflow starts normally
    rig.cabinet.set_silent(false);
    rig.controller.unlock(3, "HN1", &credential()).await.unwrap();
    rig.wait_for_phase(ControllerPhase::AwaitingLockBack).await;
}

#[tokio::test]
async fn test_lost_dispense_ack_keeps_slot_occupied() {
    let rig = connected_rig().await;
    start_workflow(&rig, ControllerPhase::Dispensing).await;

    let failed = rig.wait_for_event("operation-failed").await;
    assert!(matches!(
        failed,
        CabinetEvent::OperationFailed {
            reason: ReasonCode::TransportError,
            ..
        }
    ));
    rig.wait_for_phase(ControllerPhase::Idle).await;

    let slot = rig.slot(3).await;
    assert!(slot.occupied);
    assert!(!slot.opening);
    assert_eq!(slot.record_id(), Some("HN1"));
    assert!(rig.events.named("dispensing").is_empty());
}

#[rstest]
#[case(ControllerPhase::AwaitingLockBack, true)]
#[case(ControllerPhase::AwaitingLockBack, false)]
#[case(ControllerPhase::Unlocking, false)]
#[case(ControllerPhase::Dispensing, true)]
#[case(ControllerPhase::AwaitingDispenseLockBack, false)]
#[tokio::test]
async fn test_activity_change_clears_workflow(
    #[case] phase: ControllerPhase,
    #[case] reactivate: bool,
) {
    let rig = connected_rig().await;
    start_workflow(&rig, phase).await;
    let occupied = rig.slot(3).await.occupied;

    if reactivate {
        rig.controller.reactivate(9, &credential()).await.unwrap();
    } else {
        rig.controller.deactivate(9, &credential()).await.unwrap();
    }

    assert_eq!(rig.controller.phase().await, ControllerPhase::Idle);
    assert!(rig.controller.context().await.is_none());
    assert!(!rig.slot(3).await.opening);
    assert_eq!(rig.slot(9).await.active, reactivate);

    let event = rig.wait_for_event("device-state-reset").await;
    assert_eq!(
        event,
        CabinetEvent::DeviceStateReset {
            slot_id: 9,
            active: reactivate,
            previous_phase: phase,
        }
    );

    // Neither a late timeout nor closing the abandoned slot completes
    // anything
    rig.cabinet.set_silent(false);
    rig.cabinet.close_slot(3);
    tokio::time::sleep(std::time::Duration::from_millis(800)).await;
    assert_eq!(rig.slot(3).await.occupied, occupied);
    assert!(rig.events.named("operation-failed").is_empty());
    assert_eq!(rig.controller.phase().await, ControllerPhase::Idle);
}

#[tokio::test]
async fn test_reset_slot_clears_occupancy() {
    let rig = rig().await;
    rig.store
        .update_slot(2, &SlotUpdate::loaded("HN2"))
        .await
        .unwrap();

    // Persistence only: no connection needed
    rig.controller.reset_slot(2, &credential()).await.unwrap();

    let slot = rig.slot(2).await;
    assert!(!slot.occupied);
    assert_eq!(slot.record_id(), None);
    assert_eq!(
        rig.wait_for_event("slot-reset").await,
        CabinetEvent::SlotReset { slot_id: 2 }
    );
    assert!(rig.wait_for_audit("reset").await.success);
}

#[tokio::test]
async fn test_emergency_stop_from_workflow() {
    let rig = connected_rig().await;
    rig.controller.unlock(3, "HN1", &credential()).await.unwrap();
    rig.wait_for_phase(ControllerPhase::AwaitingLockBack).await;

    rig.controller.emergency_stop().await;

    assert_eq!(rig.controller.phase().await, ControllerPhase::Idle);
    assert!(rig.controller.context().await.is_none());
    assert!(!rig.controller.is_connected());
    assert!(!rig.slot(3).await.opening);
    assert!(matches!(
        rig.wait_for_event("emergency-disconnect").await,
        CabinetEvent::EmergencyDisconnect {
            previous_phase: ControllerPhase::AwaitingLockBack,
            ..
        }
    ));

    // Idempotent
    rig.controller.emergency_stop().await;
    assert_eq!(rig.events.named("emergency-disconnect").len(), 2);
    assert!(matches!(
        rig.events.named("emergency-disconnect").last(),
        Some(CabinetEvent::EmergencyDisconnect {
            cancelled_commands: 0,
            previous_phase: ControllerPhase::Idle,
        })
    ));

    let err = rig
        .controller
        .unlock(4, "HN2", &credential())
        .await
        .unwrap_err();
    assert!(matches!(err, OperationError::NotConnected));
}

#[tokio::test]
async fn test_phase_history_records_workflow() {
    let rig = connected_rig().await;
    rig.controller.unlock(3, "HN1", &credential()).await.unwrap();
    rig.wait_for_phase(ControllerPhase::AwaitingLockBack).await;
    rig.cabinet.close_slot(3);
    rig.wait_for_phase(ControllerPhase::Idle).await;

    let phases: Vec<_> = rig
        .controller
        .phase_history()
        .await
        .into_iter()
        .map(|t| (t.from, t.to))
        .collect();
    assert_eq!(
        phases,
        vec![
            (ControllerPhase::Idle, ControllerPhase::Unlocking),
            (ControllerPhase::Unlocking, ControllerPhase::AwaitingLockBack),
            (ControllerPhase::AwaitingLockBack, ControllerPhase::Idle),
        ]
    );
}
