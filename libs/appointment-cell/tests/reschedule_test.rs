mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use appointment_cell::{
    AppointmentError, AppointmentOrigin, AppointmentStatus, AuditEventType, RescheduleAppointmentRequest,
};

use common::Harness;

#[tokio::test]
async fn test_reschedule_links_successor_and_moves_capacity() {
    let h = Harness::new();
    let slots = h.slots((9, 0), (10, 0), 30, 1).await;
    let original = h.book(slots[0], h.client_id).await;

    let successor = h
        .engine
        .lifecycle
        .reschedule(h.tenant_id, original.id, h.move_to_slot(slots[1]))
        .await
        .unwrap();

    assert_eq!(successor.status, AppointmentStatus::Confirmed);
    assert_eq!(successor.rescheduled_from, Some(original.id));
    assert_eq!(successor.client_id, original.client_id);
    assert_eq!(successor.start_time, h.at(9, 30));
    assert_eq!(successor.slot_id, Some(slots[1]));

    let source = h.engine.lifecycle.get_appointment(h.tenant_id, original.id).await.unwrap();
    assert_eq!(source.status, AppointmentStatus::Cancelled);

    assert_eq!(h.used(slots[0]).await, 0);
    assert_eq!(h.used(slots[1]).await, 1);

    let successor_history = h.engine.audit.history(h.tenant_id, successor.id).await.unwrap();
    let rescheduled = successor_history
        .iter()
        .find(|e| e.event_type == AuditEventType::Rescheduled)
        .unwrap();
    assert_eq!(rescheduled.diff["slot_id"], json!({ "from": slots[0], "to": slots[1] }));
    assert_eq!(rescheduled.diff["start_time"]["to"], json!(h.at(9, 30)));
    assert!(rescheduled.diff.get("professional_id").is_none());
    assert_eq!(rescheduled.reason.as_deref(), Some("client asked"));

    let source_history = h.engine.audit.history(h.tenant_id, original.id).await.unwrap();
    let last = source_history.last().unwrap();
    assert_eq!(last.event_type, AuditEventType::Cancelled);
    assert_eq!(last.diff["rescheduled_to"], json!(successor.id));

    let chain = h.engine.lifecycle.reschedule_chain(h.tenant_id, successor.id).await.unwrap();
    let ids: Vec<Uuid> = chain.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![successor.id, original.id]);
}

#[tokio::test]
async fn test_chain_limit_blocks_sixth_reschedule() {
    let h = Harness::new();
    let slots = h.slots((9, 0), (12, 30), 30, 1).await;
    assert_eq!(slots.len(), 7);

    let mut current = h.book(slots[0], h.client_id).await;
    for slot_id in &slots[1..6] {
        current = h
            .engine
            .lifecycle
            .reschedule(h.tenant_id, current.id, h.move_to_slot(*slot_id))
            .await
            .unwrap();
    }

    let err = h
        .engine
        .lifecycle
        .reschedule(h.tenant_id, current.id, h.move_to_slot(slots[6]))
        .await
        .unwrap_err();

    assert_eq!(err, AppointmentError::RescheduleLimitExceeded { length: 5, max: 5 });
    assert_eq!(h.used(slots[5]).await, 1);
    assert_eq!(h.used(slots[6]).await, 0);

    let chain = h.engine.lifecycle.reschedule_chain(h.tenant_id, current.id).await.unwrap();
    assert_eq!(chain.len(), 6);
    assert_eq!(chain.last().unwrap().rescheduled_from, None);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.counter("appointment_operations_total{operation=reschedule,outcome=ok}"), 5);
    assert_eq!(snapshot.counter("appointment_operations_total{operation=reschedule,outcome=rejected}"), 1);
}

#[tokio::test]
async fn test_full_target_leaves_source_untouched() {
    let h = Harness::new();
    let slots = h.slots((9, 0), (10, 0), 30, 1).await;
    let original = h.book(slots[0], h.client_id).await;
    h.book(slots[1], Uuid::new_v4()).await;

    let err = h
        .engine
        .lifecycle
        .reschedule(h.tenant_id, original.id, h.move_to_slot(slots[1]))
        .await
        .unwrap_err();

    assert_eq!(err, AppointmentError::CapacityExceeded { slot_id: slots[1] });

    let source = h.engine.lifecycle.get_appointment(h.tenant_id, original.id).await.unwrap();
    assert_eq!(source.status, AppointmentStatus::Confirmed);
    assert_eq!(h.used(slots[0]).await, 1);
    assert_eq!(h.used(slots[1]).await, 1);
}

#[tokio::test]
async fn test_cancelled_source_cannot_be_rescheduled() {
    let h = Harness::new();
    let slots = h.slots((9, 0), (10, 0), 30, 1).await;
    let original = h.book(slots[0], h.client_id).await;

    h.engine
        .lifecycle
        .cancel(h.tenant_id, original.id, h.cancel_by(AppointmentOrigin::Operator))
        .await
        .unwrap();

    assert_matches!(
        h.engine
            .lifecycle
            .reschedule(h.tenant_id, original.id, h.move_to_slot(slots[1]))
            .await,
        Err(AppointmentError::InvalidStatusTransition {
            from: AppointmentStatus::Cancelled,
            to: AppointmentStatus::Rescheduled
        })
    );
    assert_eq!(h.used(slots[1]).await, 0);
}

#[tokio::test]
async fn test_manual_reschedule_ignores_own_interval() {
    let h = Harness::new();
    let original = h
        .engine
        .lifecycle
        .create(h.manual(h.at(10, 0), h.at(10, 30)))
        .await
        .unwrap();

    let shifted = h
        .engine
        .lifecycle
        .reschedule(
            h.tenant_id,
            original.id,
            RescheduleAppointmentRequest {
                new_slot_id: None,
                new_start_time: Some(h.at(10, 15)),
                new_end_time: Some(h.at(10, 45)),
                ..h.move_to_slot(Uuid::nil())
            },
        )
        .await
        .unwrap();

    assert_eq!(shifted.start_time, h.at(10, 15));
    assert_eq!(shifted.slot_id, None);

    assert_matches!(
        h.engine
            .lifecycle
            .reschedule(
                h.tenant_id,
                shifted.id,
                RescheduleAppointmentRequest {
                    new_slot_id: None,
                    ..h.move_to_slot(Uuid::nil())
                },
            )
            .await,
        Err(AppointmentError::MissingSchedule)
    );
}

#[tokio::test]
async fn test_manual_reschedule_onto_busy_time_conflicts() {
    let h = Harness::new();
    let original = h
        .engine
        .lifecycle
        .create(h.manual(h.at(10, 0), h.at(10, 30)))
        .await
        .unwrap();
    let blocker = h
        .engine
        .lifecycle
        .create(h.manual(h.at(11, 0), h.at(12, 0)))
        .await
        .unwrap();

    let err = h
        .engine
        .lifecycle
        .reschedule(
            h.tenant_id,
            original.id,
            RescheduleAppointmentRequest {
                new_slot_id: None,
                new_start_time: Some(h.at(11, 30)),
                new_end_time: Some(h.at(12, 0)),
                ..h.move_to_slot(Uuid::nil())
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err, AppointmentError::ScheduleConflict { conflicting: vec![blocker.id] });
    let source = h.engine.lifecycle.get_appointment(h.tenant_id, original.id).await.unwrap();
    assert_eq!(source.status, AppointmentStatus::Confirmed);
}

#[tokio::test]
async fn test_reschedule_within_same_full_slot() {
    let h = Harness::new();
    let slots = h.slots((9, 0), (9, 30), 30, 1).await;
    let original = h
        .engine
        .lifecycle
        .create(appointment_cell::CreateAppointmentRequest {
            slot_id: Some(slots[0]),
            end_time: Some(h.at(9, 20)),
            ..h.request(AppointmentOrigin::Operator)
        })
        .await
        .unwrap();

    let successor = h
        .engine
        .lifecycle
        .reschedule(h.tenant_id, original.id, h.move_to_slot(slots[0]))
        .await
        .unwrap();

    assert_eq!(successor.slot_id, Some(slots[0]));
    assert_eq!(successor.end_time, h.at(9, 30));
    assert_eq!(h.used(slots[0]).await, 1);
}

#[tokio::test]
async fn test_client_reschedule_needs_notice() {
    let h = Harness::new();
    let soon = Utc::now() + Duration::hours(1);
    let original = h
        .engine
        .lifecycle
        .create(h.manual(soon, soon + Duration::minutes(30)))
        .await
        .unwrap();

    let err = h
        .engine
        .lifecycle
        .reschedule(
            h.tenant_id,
            original.id,
            RescheduleAppointmentRequest {
                new_slot_id: None,
                new_start_time: Some(h.at(9, 0)),
                new_end_time: Some(h.at(9, 30)),
                requested_by: AppointmentOrigin::Client,
                ..h.move_to_slot(Uuid::nil())
            },
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::CancellationTooLate { .. });
}

#[tokio::test]
async fn test_reschedule_notifies_with_successor() {
    let h = Harness::new();
    let slots = h.slots((9, 0), (10, 0), 30, 1).await;
    let original = h.book(slots[0], h.client_id).await;

    let successor = h
        .engine
        .lifecycle
        .reschedule(h.tenant_id, original.id, h.move_to_slot(slots[1]))
        .await
        .unwrap();

    let last = h.notifier.sent_to(h.client_id).pop().unwrap();
    assert_eq!(last.kind, "appointment_rescheduled");
    assert!(last.message.contains(&successor.start_time.format("%H:%M").to_string()));
}

#[tokio::test]
async fn test_reschedule_rejects_start_outside_target_slot() {
    let h = Harness::new();
    let slots = h.slots((9, 0), (10, 0), 30, 1).await;
    let original = h.book(slots[0], h.client_id).await;

    let err = h
        .engine
        .lifecycle
        .reschedule(
            h.tenant_id,
            original.id,
            RescheduleAppointmentRequest {
                new_start_time: Some(h.at(15, 0)),
                ..h.move_to_slot(slots[1])
            },
        )
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::InvalidTime(_));
    let source = h.engine.lifecycle.get_appointment(h.tenant_id, original.id).await.unwrap();
    assert_eq!(source.status, AppointmentStatus::Confirmed);
    assert_eq!(h.used(slots[0]).await, 1);
    assert_eq!(h.used(slots[1]).await, 0);
}

#[tokio::test]
async fn test_same_slot_reschedule_keeps_unit_above_ceiling() {
    let h = Harness::new();
    let slots = h.slots((9, 0), (9, 30), 30, 1).await;
    let original = h.book(slots[0], h.client_id).await;

    // Left over from an earlier overbooking policy
    {
        let mut guard = h
            .engine
            .slot_store
            .lock_slot(h.tenant_id, slots[0])
            .await
            .unwrap()
            .unwrap();
        guard.used_capacity = 2;
    }

    let successor = h
        .engine
        .lifecycle
        .reschedule(h.tenant_id, original.id, h.move_to_slot(slots[0]))
        .await
        .unwrap();

    assert_eq!(successor.slot_id, Some(slots[0]));
    assert_eq!(successor.rescheduled_from, Some(original.id));
    assert_eq!(h.used(slots[0]).await, 2);
}
