//! End-to-end call flows: two controllers sharing one signaling channel,
//! each with its own scripted media transport.

#![allow(clippy::unwrap_used)]

mod common;

use carecall::prelude::*;
use common::MockTransport;
use std::sync::Arc;
use std::time::Duration;

struct Side {
    controller: Arc<CallController<InMemoryChannel>>,
    transport: Arc<MockTransport>,
}

fn side(channel: &Arc<InMemoryChannel>, id: &str) -> Side {
    common::init_tracing();
    let transport = MockTransport::new();
    let controller = CallControllerBuilder::new(
        Arc::clone(channel),
        Arc::clone(&transport) as Arc<dyn MediaTransport>,
        Arc::new(StaticTokenProvider),
        ParticipantId::new(id),
    )
    .build();
    Side {
        controller,
        transport,
    }
}

fn patient_id() -> ParticipantId {
    ParticipantId::new("patient-7")
}

#[tokio::test]
async fn test_accepted_call_connects_both_sides_in_the_same_room() {
    let channel = Arc::new(InMemoryChannel::new());
    let caregiver = side(&channel, "caregiver");
    let patient = side(&channel, "patient-7");

    let mut caregiver_events = caregiver.controller.subscribe_events();
    let call_id = caregiver
        .controller
        .place_call(&patient_id(), "Dr. Lee")
        .await
        .unwrap();
    assert!(matches!(
        caregiver_events.recv().await.unwrap(),
        CallEvent::Initiated { .. }
    ));

    let mut incoming = patient.controller.incoming_call();
    let visible = incoming.wait_for(Option::is_some).await.unwrap().clone();
    let record = visible.unwrap();
    assert_eq!(record.call_id, call_id);
    assert_eq!(record.caller_name, "Dr. Lee");

    patient.controller.accept_incoming().await.unwrap();

    let mut patient_ui = patient.controller.ui_state();
    patient_ui
        .wait_for(|ui| ui.connection_state == ConnectionState::Connected)
        .await
        .unwrap();

    // The caller joins in the background once it observes the acceptance
    let mut caregiver_ui = caregiver.controller.ui_state();
    caregiver_ui
        .wait_for(|ui| ui.connection_state == ConnectionState::Connected)
        .await
        .unwrap();

    // Both sides computed the same room without coordinating
    assert_eq!(
        caregiver.transport.connected_rooms(),
        patient.transport.connected_rooms()
    );
    assert_eq!(
        caregiver.transport.connected_rooms(),
        vec![RoomName::for_patient(&patient_id())]
    );
}

#[tokio::test]
async fn test_rejected_call_never_touches_media() {
    let channel = Arc::new(InMemoryChannel::new());
    let caregiver = side(&channel, "caregiver");
    let patient = side(&channel, "patient-7");

    caregiver
        .controller
        .place_call(&patient_id(), "Dr. Lee")
        .await
        .unwrap();
    patient
        .controller
        .incoming_call()
        .wait_for(Option::is_some)
        .await
        .unwrap();

    patient.controller.reject_incoming().await.unwrap();

    let mut caregiver_ui = caregiver.controller.ui_state();
    caregiver_ui
        .wait_for(|ui| ui.active_call.is_none())
        .await
        .unwrap();

    assert_eq!(caregiver.transport.connect_calls(), 0);
    assert_eq!(patient.transport.connect_calls(), 0);
}

#[tokio::test]
async fn test_caller_hang_up_while_ringing_cancels() {
    let channel = Arc::new(InMemoryChannel::new());
    let caregiver = side(&channel, "caregiver");
    let patient = side(&channel, "patient-7");

    let call_id = caregiver
        .controller
        .place_call(&patient_id(), "Dr. Lee")
        .await
        .unwrap();
    let mut incoming = patient.controller.incoming_call();
    incoming.wait_for(Option::is_some).await.unwrap();

    caregiver.controller.hang_up().await.unwrap();

    incoming.wait_for(Option::is_none).await.unwrap();
    let store = CallStore::new(Arc::clone(&channel));
    let stored = store
        .fetch(&patient_id(), &call_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CallStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out_on_both_sides() {
    let channel = Arc::new(InMemoryChannel::new());
    let caregiver = side(&channel, "caregiver");
    let patient = side(&channel, "patient-7");

    caregiver
        .controller
        .place_call(&patient_id(), "Dr. Lee")
        .await
        .unwrap();
    let mut incoming = patient.controller.incoming_call();
    incoming.wait_for(Option::is_some).await.unwrap();

    // Nobody answers; the receiver's ring timeout cancels the call
    incoming.wait_for(Option::is_none).await.unwrap();

    let mut caregiver_ui = caregiver.controller.ui_state();
    caregiver_ui
        .wait_for(|ui| ui.active_call.is_none())
        .await
        .unwrap();
    assert_eq!(caregiver.transport.connect_calls(), 0);
}

#[tokio::test]
async fn test_media_failure_does_not_disturb_the_accepted_record() {
    let channel = Arc::new(InMemoryChannel::new());
    let caregiver = side(&channel, "caregiver");
    let patient = side(&channel, "patient-7");
    patient.transport.fail_device(MediaKind::Video);

    let call_id = caregiver
        .controller
        .place_call(&patient_id(), "Dr. Lee")
        .await
        .unwrap();
    patient
        .controller
        .incoming_call()
        .wait_for(Option::is_some)
        .await
        .unwrap();

    let err = patient.controller.accept_incoming().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::DeviceUnavailable);

    // The accept write already landed; the record stays accepted
    let store = CallStore::new(Arc::clone(&channel));
    let stored = store
        .fetch(&patient_id(), &call_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CallStatus::Accepted);
}

#[tokio::test]
async fn test_hang_up_after_connect_tears_the_session_down() {
    let channel = Arc::new(InMemoryChannel::new());
    let caregiver = side(&channel, "caregiver");
    let patient = side(&channel, "patient-7");

    caregiver
        .controller
        .place_call(&patient_id(), "Dr. Lee")
        .await
        .unwrap();
    patient
        .controller
        .incoming_call()
        .wait_for(Option::is_some)
        .await
        .unwrap();
    patient.controller.accept_incoming().await.unwrap();

    let mut patient_ui = patient.controller.ui_state();
    patient_ui
        .wait_for(|ui| ui.connection_state == ConnectionState::Connected)
        .await
        .unwrap();

    patient.controller.hang_up().await.unwrap();
    patient_ui
        .wait_for(|ui| ui.connection_state == ConnectionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(patient.transport.room().disconnect_count(), 1);
    for track in patient.transport.acquired_tracks() {
        assert!(track.is_stopped());
    }

    // Toggling with no live tracks is inert, not a crash
    assert!(!patient.controller.toggle_audio().await);

    // give the caller's background join a moment before the test ends
    tokio::time::sleep(Duration::from_millis(20)).await;
}
