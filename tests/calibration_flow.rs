// Integration tests for the calibration wizard running through a dashboard
//
// Every test drives a real Dashboard over a MockTransport:
// 1. Operator actions go through the session and out as frames
// 2. Backend notifications are queued as inbound frames
// 3. A tick routes them back into the session

use std::time::Instant;

use proptest::prelude::*;
use serde_json::{Value, json};

use teledash::calibration::{CalibrationSession, Phase, PhaseState};
use teledash::connection::{ConnectionSupervisor, MockTransport, SupervisorConfig};
use teledash::protocol::{CalibrationAction, CalibrationRequest, Direction, Frame, OutboundMessage};
use teledash::{Dashboard, TeledashError};

fn connected_dashboard() -> Dashboard<MockTransport> {
    let supervisor =
        ConnectionSupervisor::new(MockTransport::accepting(), SupervisorConfig::default());
    let mut dashboard = Dashboard::new(supervisor);
    dashboard.start();
    dashboard.tick(Instant::now());
    dashboard.open_calibration();
    take_sent(&mut dashboard);
    dashboard
}

fn take_sent(dashboard: &mut Dashboard<MockTransport>) -> Vec<OutboundMessage> {
    dashboard
        .supervisor_mut()
        .transport_mut()
        .take_sent()
        .iter()
        .filter_map(Frame::as_message)
        .collect()
}

fn backend_says(dashboard: &mut Dashboard<MockTransport>, data: Value) {
    dashboard
        .supervisor_mut()
        .transport_mut()
        .push_frame(Frame::new("Calibration", data));
    dashboard.tick(Instant::now());
}

fn session(dashboard: &Dashboard<MockTransport>) -> &CalibrationSession {
    dashboard.calibration().expect("calibration session is open")
}

fn press(dashboard: &mut Dashboard<MockTransport>, index: usize) -> Result<(), TeledashError> {
    dashboard.with_calibration(|session, sink| session.press_button(index, sink))?
}

fn set(dashboard: &mut Dashboard<MockTransport>, field: &str, value: &str) {
    dashboard
        .with_calibration(|session, _| session.set_input(field, value))
        .unwrap()
        .unwrap();
}

/// Walks the left calibration up to the measurement substep with the run finished.
fn left_measurement_substep(dashboard: &mut Dashboard<MockTransport>) {
    dashboard
        .with_calibration(|session, sink| session.go_to_step(1, sink))
        .unwrap()
        .unwrap();
    press(dashboard, 0).unwrap();
    press(dashboard, 0).unwrap();
    assert!(session(dashboard).is_run_in_progress());
    backend_says(dashboard, json!({ "action": "calibration_run_done" }));
    assert!(!session(dashboard).is_run_in_progress());
    take_sent(dashboard);
}

fn submit_left(dashboard: &mut Dashboard<MockTransport>) {
    set(dashboard, "distance1", "12");
    set(dashboard, "distance2", "34");
    set(dashboard, "distance3", "56");
    press(dashboard, 1).unwrap();
}

#[test]
fn test_open_starts_at_first_step() {
    let mut dashboard = connected_dashboard();
    let session = session(&dashboard);
    assert!(session.is_open());
    assert_eq!(session.step_index(), 0);
    assert_eq!(session.substep_id(), None);
    assert!(take_sent(&mut dashboard).is_empty());
}

#[test]
fn test_continue_on_left_step() {
    let mut dashboard = connected_dashboard();
    dashboard
        .with_calibration(|session, sink| session.go_to_step(1, sink))
        .unwrap()
        .unwrap();
    assert_eq!(
        take_sent(&mut dashboard),
        vec![OutboundMessage::calibration(CalibrationAction::GetStatus)]
    );

    press(&mut dashboard, 0).unwrap();
    assert_eq!(
        take_sent(&mut dashboard),
        vec![
            OutboundMessage::calibration_directed(CalibrationAction::Continue, Direction::Left),
            OutboundMessage::calibration_directed(CalibrationAction::CurrentAngle, Direction::Left),
        ]
    );
    assert_eq!(session(&dashboard).substep_id(), Some("step2_substep1"));
    assert!(session(&dashboard).is_calibration_in_progress());
    assert!(!session(&dashboard).is_run_in_progress());
}

#[test]
fn test_submit_measurements_then_calibration_done() {
    let mut dashboard = connected_dashboard();
    left_measurement_substep(&mut dashboard);
    assert_eq!(session(&dashboard).substep_id(), Some("step2_substep2"));

    submit_left(&mut dashboard);
    assert_eq!(
        take_sent(&mut dashboard),
        vec![
            OutboundMessage::calibration_directed(CalibrationAction::CurrentAngle, Direction::Left),
            OutboundMessage::Calibration(CalibrationRequest {
                action: CalibrationAction::SubmitMeasurements,
                direction: Some(Direction::Left),
                distances: Some(
                    [
                        ("d1".to_string(), Some(12)),
                        ("d2".to_string(), Some(34)),
                        ("d3".to_string(), Some(56)),
                    ]
                    .into()
                ),
            }),
        ]
    );
    let pending = session(&dashboard).pending_submission().unwrap();
    assert_eq!(pending.direction, Direction::Left);
    assert_eq!(pending.fallback, "step2_substep1");
    assert_eq!(session(&dashboard).substep_id(), Some("step2_substep2"));
    assert_eq!(
        session(&dashboard).phase_state(Phase::Left),
        PhaseState::Submitting
    );

    backend_says(&mut dashboard, json!({ "action": "calibration_done" }));
    assert_eq!(session(&dashboard).substep_id(), None);
    assert!(!session(&dashboard).is_calibration_in_progress());
    assert!(session(&dashboard).pending_submission().is_none());
    assert_eq!(
        take_sent(&mut dashboard),
        vec![OutboundMessage::calibration(CalibrationAction::GetStatus)]
    );

    backend_says(
        &mut dashboard,
        json!({ "action": "calibration_status", "left": true }),
    );
    assert!(session(&dashboard).flags().left);
    assert_eq!(session(&dashboard).step_title(), "Left Calibration - Completed");
}

#[test]
fn test_measurements_received_first_wins() {
    let mut dashboard = connected_dashboard();
    left_measurement_substep(&mut dashboard);
    submit_left(&mut dashboard);
    take_sent(&mut dashboard);

    backend_says(&mut dashboard, json!({ "action": "measurements_received" }));
    assert_eq!(session(&dashboard).substep_id(), Some("step2_substep1"));
    assert!(session(&dashboard).pending_submission().is_none());

    backend_says(&mut dashboard, json!({ "action": "calibration_done" }));
    assert_eq!(session(&dashboard).substep_id(), Some("step2_substep1"));
    assert!(session(&dashboard).is_calibration_in_progress());
    assert!(take_sent(&mut dashboard).is_empty());
}

#[test]
fn test_calibration_done_first_wins() {
    let mut dashboard = connected_dashboard();
    left_measurement_substep(&mut dashboard);
    submit_left(&mut dashboard);
    take_sent(&mut dashboard);

    backend_says(&mut dashboard, json!({ "action": "calibration_done" }));
    assert_eq!(session(&dashboard).substep_id(), None);
    assert!(!session(&dashboard).is_calibration_in_progress());
    assert_eq!(
        take_sent(&mut dashboard),
        vec![OutboundMessage::calibration(CalibrationAction::GetStatus)]
    );

    backend_says(&mut dashboard, json!({ "action": "measurements_received" }));
    assert_eq!(session(&dashboard).substep_id(), None);
    assert!(take_sent(&mut dashboard).is_empty());
}

#[test]
fn test_both_confirmations_in_one_tick() {
    let mut dashboard = connected_dashboard();
    left_measurement_substep(&mut dashboard);
    submit_left(&mut dashboard);
    take_sent(&mut dashboard);

    let transport = dashboard.supervisor_mut().transport_mut();
    transport.push_frame(Frame::new(
        "Calibration",
        json!({ "action": "measurements_received" }),
    ));
    transport.push_frame(Frame::new(
        "Calibration",
        json!({ "action": "calibration_done" }),
    ));
    dashboard.tick(Instant::now());
    assert_eq!(session(&dashboard).substep_id(), Some("step2_substep1"));
    assert!(take_sent(&mut dashboard).is_empty());
}

#[test]
fn test_second_submission_is_rejected_while_pending() {
    let mut dashboard = connected_dashboard();
    left_measurement_substep(&mut dashboard);
    submit_left(&mut dashboard);
    take_sent(&mut dashboard);

    assert!(matches!(
        press(&mut dashboard, 1),
        Err(TeledashError::SubmissionPending)
    ));
    assert!(take_sent(&mut dashboard).is_empty());
}

#[test]
fn test_run_in_progress_blocks_rerun_and_submit() {
    let mut dashboard = connected_dashboard();
    dashboard
        .with_calibration(|session, sink| session.go_to_step(1, sink))
        .unwrap()
        .unwrap();
    press(&mut dashboard, 0).unwrap();
    press(&mut dashboard, 0).unwrap();
    take_sent(&mut dashboard);

    assert!(session(&dashboard).is_button_disabled_during_run("Re-run"));
    assert!(session(&dashboard).is_button_disabled_during_run("Submit Measurements"));
    assert!(matches!(
        press(&mut dashboard, 0),
        Err(TeledashError::ButtonDisabledDuringRun { .. })
    ));
    assert!(matches!(
        press(&mut dashboard, 1),
        Err(TeledashError::ButtonDisabledDuringRun { .. })
    ));
    assert!(take_sent(&mut dashboard).is_empty());
    assert!(session(&dashboard).pending_submission().is_none());

    backend_says(&mut dashboard, json!({ "action": "calibration_run_done" }));
    assert!(!session(&dashboard).is_button_disabled_during_run("Re-run"));
    press(&mut dashboard, 0).unwrap();
    assert_eq!(
        take_sent(&mut dashboard),
        vec![OutboundMessage::calibration_directed(
            CalibrationAction::ReRun,
            Direction::Left
        )]
    );
    assert_eq!(session(&dashboard).substep_id(), Some("step2_substep1"));
}

#[test]
fn test_step_entry_resets_distances() {
    let mut dashboard = connected_dashboard();
    left_measurement_substep(&mut dashboard);
    set(&mut dashboard, "distance1", "999");
    set(&mut dashboard, "distance2", "");
    dashboard
        .with_calibration(|session, sink| {
            session.next_step(sink);
            session.previous_step(sink);
            session.go_to_substep("step2_substep2")
        })
        .unwrap()
        .unwrap();
    let inputs = session(&dashboard).input_snapshot();
    for id in ["distance1", "distance2", "distance3"] {
        assert_eq!(inputs[id].as_number(), Some(0), "{id}");
    }
}

#[test]
fn test_test_run_gated_until_steering_complete() {
    let mut dashboard = connected_dashboard();
    dashboard
        .with_calibration(|session, sink| session.go_to_step(3, sink))
        .unwrap()
        .unwrap();
    take_sent(&mut dashboard);
    assert!(matches!(
        press(&mut dashboard, 0),
        Err(TeledashError::ButtonGated { .. })
    ));

    backend_says(
        &mut dashboard,
        json!({ "action": "calibration_status", "left": true, "right": true }),
    );
    press(&mut dashboard, 0).unwrap();
    press(&mut dashboard, 0).unwrap();
    assert_eq!(session(&dashboard).substep_id(), Some("step4_substep2"));
    backend_says(&mut dashboard, json!({ "action": "test_run_done" }));
    assert!(session(&dashboard).flags().test_run);
    assert_eq!(
        session(&dashboard).phase_state(Phase::TestRun),
        PhaseState::Completed
    );
}

#[test]
fn test_saved_archive_reaches_the_session() {
    let mut dashboard = connected_dashboard();
    backend_says(
        &mut dashboard,
        json!({ "action": "calibration_status", "left": true, "right": true, "backward": true, "test_run": true }),
    );
    dashboard
        .with_calibration(|session, sink| session.go_to_step(7, sink))
        .unwrap()
        .unwrap();
    take_sent(&mut dashboard);
    press(&mut dashboard, 0).unwrap();
    assert_eq!(
        take_sent(&mut dashboard),
        vec![OutboundMessage::calibration(CalibrationAction::SaveCalibration)]
    );
    backend_says(
        &mut dashboard,
        json!({ "action": "calibration_saved", "success": true, "zipData": "UEsFBg==" }),
    );
    assert!(session(&dashboard).is_calibration_saved());
    let archive = dashboard
        .with_calibration(|session, _| session.take_archive())
        .unwrap();
    assert_eq!(archive.as_deref(), Some("UEsFBg=="));
}

#[test]
fn test_exit_is_idempotent_and_drops_late_events() {
    let mut dashboard = connected_dashboard();
    left_measurement_substep(&mut dashboard);
    submit_left(&mut dashboard);
    take_sent(&mut dashboard);

    dashboard.exit_calibration();
    dashboard.exit_calibration();
    assert_eq!(
        take_sent(&mut dashboard),
        vec![
            OutboundMessage::Klem {
                value: Default::default()
            },
            OutboundMessage::calibration(CalibrationAction::Exit),
        ]
    );
    backend_says(&mut dashboard, json!({ "action": "calibration_done" }));
    assert!(dashboard.calibration().is_none());
    assert!(take_sent(&mut dashboard).is_empty());
}

#[test]
fn test_save_gating_every_flag_combination() {
    for bits in 0u8..16 {
        let flags = [bits & 1 != 0, bits & 2 != 0, bits & 4 != 0, bits & 8 != 0];
        let mut dashboard = connected_dashboard();
        backend_says(
            &mut dashboard,
            json!({
                "action": "calibration_status",
                "left": flags[0],
                "right": flags[1],
                "backward": flags[2],
                "test_run": flags[3]
            }),
        );
        assert_eq!(
            session(&dashboard).is_save_button_disabled(),
            bits != 0b1111,
            "flags {:?}",
            flags
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_save_gating_matches_flags(left: bool, right: bool, backward: bool, test_run: bool) {
        let mut dashboard = connected_dashboard();
        backend_says(
            &mut dashboard,
            json!({
                "action": "calibration_status",
                "left": left,
                "right": right,
                "backward": backward,
                "test_run": test_run
            }),
        );
        let all = left && right && backward && test_run;
        prop_assert_eq!(session(&dashboard).is_save_button_disabled(), !all);
    }
}
