use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::TeledashError;
use crate::connection::MessageSink;
use crate::protocol::{
    CalibrationAction, CalibrationEvent, CalibrationRequest, Direction, KlState, OutboundMessage,
};
use crate::schedule::Timeout;

use super::steps::{
    CalibrationContext, CalibrationStep, InputKind, InputValue, Inputs, NavTarget,
    calibration_steps, validate_steps,
};
use super::{CompletionFlags, CurveData, Phase, PhaseState, PhaseStates, PolynomialData};

/// How long the "saved" confirmation stays up.
pub const SAVED_FLAG_MS: u64 = 3000;
pub const DEFAULT_STEERING_ANGLE: f64 = 15.0;

/// A measurement submission the backend has not confirmed yet.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingSubmission {
    pub direction: Direction,
    /// Substep to go back to when the backend acknowledges the measurements.
    pub fallback: String,
}

/// Walks the operator through the calibration wizard.
///
/// All outgoing traffic is handed to the [`MessageSink`] passed into each operation.
/// Backend confirmations arrive through [`CalibrationSession::handle_event`] in any
/// order; a measurement submission is resolved by whichever of `measurements_received`
/// and `calibration_done` comes first and the other one is ignored.
#[derive(Debug)]
pub struct CalibrationSession {
    pub(crate) steps: Vec<CalibrationStep>,
    open: bool,
    pub(crate) step_index: usize,
    pub(crate) substep_id: Option<String>,
    pub(crate) flags: CompletionFlags,
    phases: PhaseStates,
    pub(crate) calibration_in_progress: bool,
    pub(crate) run_in_progress: bool,
    pending: Option<PendingSubmission>,
    previous_kl: KlState,
    pub(crate) steering_angle: f64,
    /// Backward run speed in mm/s.
    pub(crate) speed: f64,
    corrected_steer: Option<f64>,
    pub(crate) polynomial: Option<PolynomialData>,
    pub(crate) zero_offset: Option<CurveData>,
    saved: bool,
    saved_timer: Timeout,
    archive: Option<String>,
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self::with_steps(calibration_steps())
    }
}

impl CalibrationSession {
    /// A session over custom steps. The steps must pass [`validate_steps`], which also
    /// rejects an empty list.
    pub fn new(steps: Vec<CalibrationStep>) -> Result<Self, TeledashError> {
        validate_steps(&steps)?;
        Ok(Self::with_steps(steps))
    }

    fn with_steps(steps: Vec<CalibrationStep>) -> Self {
        Self {
            steps,
            open: false,
            step_index: 0,
            substep_id: None,
            flags: CompletionFlags::default(),
            phases: PhaseStates::default(),
            calibration_in_progress: false,
            run_in_progress: false,
            pending: None,
            previous_kl: KlState::Off,
            steering_angle: DEFAULT_STEERING_ANGLE,
            speed: 0.0,
            corrected_steer: None,
            polynomial: None,
            zero_offset: None,
            saved: false,
            saved_timer: Timeout::new(Duration::from_millis(SAVED_FLAG_MS)),
            archive: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn steps(&self) -> &[CalibrationStep] {
        &self.steps
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn substep_id(&self) -> Option<&str> {
        self.substep_id.as_deref()
    }

    pub fn flags(&self) -> CompletionFlags {
        self.flags
    }

    pub fn is_calibration_in_progress(&self) -> bool {
        self.calibration_in_progress
    }

    pub fn is_run_in_progress(&self) -> bool {
        self.run_in_progress
    }

    pub fn pending_submission(&self) -> Option<&PendingSubmission> {
        self.pending.as_ref()
    }

    pub fn steering_angle(&self) -> f64 {
        self.steering_angle
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn corrected_steer(&self) -> Option<f64> {
        self.corrected_steer
    }

    pub fn polynomial_data(&self) -> Option<&PolynomialData> {
        self.polynomial.as_ref()
    }

    pub fn zero_offset_spline(&self) -> Option<&CurveData> {
        self.zero_offset.as_ref()
    }

    /// KL state to restore when the session closes.
    pub fn previous_kl(&self) -> KlState {
        self.previous_kl
    }

    pub fn is_calibration_saved(&self) -> bool {
        self.saved
    }

    /// Base64 zip of the last successfully saved calibration, if not yet taken.
    pub fn take_archive(&mut self) -> Option<String> {
        self.archive.take()
    }

    pub fn phase_state(&self, phase: Phase) -> PhaseState {
        if self.flags.get(phase) {
            PhaseState::Completed
        } else {
            self.phases.get(phase)
        }
    }

    /// The step or substep being shown.
    pub fn current_step(&self) -> &CalibrationStep {
        let step = &self.steps[self.step_index];
        self.substep_id
            .as_deref()
            .and_then(|id| step.find_substep(id))
            .unwrap_or(step)
    }

    fn current_step_mut(&mut self) -> &mut CalibrationStep {
        let step = &mut self.steps[self.step_index];
        let path = self
            .substep_id
            .as_deref()
            .and_then(|id| step.substep_path(id))
            .unwrap_or_default();
        step.descend_mut(&path)
    }

    fn current_phase(&self) -> Option<Phase> {
        self.steps[self.step_index].phase
    }

    pub fn input_snapshot(&self) -> Inputs {
        self.current_step().input_snapshot()
    }

    /// Starts a fresh session: forgets all progress, switches the vehicle to KL 30 and
    /// asks the backend to start calibrating. `previous_kl` is restored on exit.
    pub fn open(&mut self, previous_kl: KlState, sink: &mut dyn MessageSink) {
        self.reset();
        self.open = true;
        self.previous_kl = previous_kl;
        info!("Opening calibration session, KL was {}", previous_kl);
        sink.send(OutboundMessage::Klem {
            value: KlState::Run,
        });
        sink.send(OutboundMessage::calibration(CalibrationAction::Start));
    }

    fn reset(&mut self) {
        self.step_index = 0;
        self.substep_id = None;
        self.flags = CompletionFlags::default();
        self.phases = PhaseStates::default();
        self.calibration_in_progress = false;
        self.run_in_progress = false;
        self.pending = None;
        self.corrected_steer = None;
        self.polynomial = None;
        self.zero_offset = None;
        self.saved = false;
        self.saved_timer.cancel();
        self.archive = None;
        self.current_step_mut().reset_distance_inputs();
    }

    /// Restores the previous KL state and tells the backend calibration was abandoned.
    /// Does nothing when the session is not open.
    pub fn exit(&mut self, sink: &mut dyn MessageSink) {
        if !self.open {
            debug!("Calibration session already closed");
            return;
        }
        self.close(CalibrationAction::Exit, sink);
    }

    pub fn complete(&mut self, sink: &mut dyn MessageSink) -> Result<(), TeledashError> {
        if !self.open {
            return Err(TeledashError::NoCalibrationSession);
        }
        self.close(CalibrationAction::Complete, sink);
        Ok(())
    }

    fn close(&mut self, action: CalibrationAction, sink: &mut dyn MessageSink) {
        info!("Closing calibration session ({:?})", action);
        sink.send(OutboundMessage::Klem {
            value: self.previous_kl,
        });
        sink.send(OutboundMessage::calibration(action));
        self.reset();
        self.open = false;
    }

    pub fn go_to_step(
        &mut self,
        index: usize,
        sink: &mut dyn MessageSink,
    ) -> Result<(), TeledashError> {
        if index >= self.steps.len() {
            return Err(TeledashError::StepOutOfRange { index });
        }
        self.step_index = index;
        self.substep_id = None;
        self.calibration_in_progress = false;
        self.current_step_mut().reset_distance_inputs();
        if self.steps[index].refreshes_status {
            sink.send(OutboundMessage::calibration(CalibrationAction::GetStatus));
        }
        Ok(())
    }

    /// Moves to the next step. On the last step only the substep is left.
    pub fn next_step(&mut self, sink: &mut dyn MessageSink) {
        if self.step_index + 1 < self.steps.len() {
            let next = self.step_index + 1;
            let _ = self.go_to_step(next, sink);
        } else {
            self.leave_substep();
        }
    }

    /// Moves to the previous step. On the first step only the substep is left.
    pub fn previous_step(&mut self, sink: &mut dyn MessageSink) {
        if self.step_index > 0 {
            let previous = self.step_index - 1;
            let _ = self.go_to_step(previous, sink);
        } else {
            self.leave_substep();
        }
    }

    fn leave_substep(&mut self) {
        self.substep_id = None;
        self.calibration_in_progress = false;
    }

    /// Shows substep `id` of the current step. Entering a substep of a physical-run
    /// step marks calibration as in progress; it never starts a run by itself.
    pub fn go_to_substep(&mut self, id: &str) -> Result<(), TeledashError> {
        let step = &self.steps[self.step_index];
        if step.find_substep(id).is_none() {
            return Err(TeledashError::InvalidNavigationTarget {
                target: id.to_string(),
            });
        }
        self.substep_id = Some(id.to_string());
        if step.phase.is_some() {
            self.calibration_in_progress = true;
        }
        self.current_step_mut().reset_distance_inputs();
        Ok(())
    }

    pub fn navigate_to(
        &mut self,
        target: &NavTarget,
        sink: &mut dyn MessageSink,
    ) -> Result<(), TeledashError> {
        match target {
            NavTarget::Parent => {
                self.leave_substep();
                Ok(())
            }
            NavTarget::Id(id) => match self.steps.iter().position(|s| &s.id == id) {
                Some(index) => self.go_to_step(index, sink),
                None => self.go_to_substep(id),
            },
        }
    }

    /// Presses button `index` of the current step: runs its callbacks in order, then
    /// navigates. Buttons blocked by a running calibration run or by missing phases are
    /// rejected without side effects.
    pub fn press_button(
        &mut self,
        index: usize,
        sink: &mut dyn MessageSink,
    ) -> Result<(), TeledashError> {
        if !self.open {
            return Err(TeledashError::NoCalibrationSession);
        }
        let button = self
            .current_step()
            .buttons
            .get(index)
            .cloned()
            .ok_or(TeledashError::UnknownButton { index })?;
        let text = self.render_text(&button.text);
        if self.is_button_disabled_during_run(&text) {
            return Err(TeledashError::ButtonDisabledDuringRun { text });
        }
        if button.gate.is_some_and(|gate| self.is_gate_closed(gate)) {
            return Err(TeledashError::ButtonGated { text });
        }
        debug!("Pressed '{}'", text);

        if button.action.invokes() {
            let inputs = self.input_snapshot();
            let mut context = SessionContext {
                session: &mut *self,
                sink: &mut *sink,
            };
            for callback in &button.callbacks {
                callback.invoke(&mut context, &inputs)?;
            }
        }
        if button.action.navigates() {
            if let Some(target) = &button.target {
                self.navigate_to(target, sink)?;
            }
        }
        Ok(())
    }

    /// Updates an input field of the current step from raw operator text. Number fields
    /// keep only the digits; nothing left means no value.
    pub fn set_input(&mut self, field_id: &str, raw: &str) -> Result<(), TeledashError> {
        let step = self.current_step_mut();
        let field = step
            .inputs
            .iter_mut()
            .find(|f| f.id == field_id)
            .ok_or_else(|| TeledashError::InvalidUserInput {
                field: field_id.to_string(),
                reason: "no such field on this step".to_string(),
            })?;
        field.value = match &field.kind {
            InputKind::Number => {
                let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    InputValue::Number(None)
                } else {
                    let value = digits.parse::<u64>().map_err(|e| {
                        TeledashError::InvalidUserInput {
                            field: field_id.to_string(),
                            reason: e.to_string(),
                        }
                    })?;
                    InputValue::Number(Some(value))
                }
            }
            InputKind::Select(options) => {
                if !options.iter().any(|o| o == raw) {
                    return Err(TeledashError::InvalidUserInput {
                        field: field_id.to_string(),
                        reason: format!("expected one of {}", options.join(", ")),
                    });
                }
                InputValue::Text(raw.to_string())
            }
            InputKind::Text => InputValue::Text(raw.to_string()),
        };
        let value = field.value.clone();
        if field_id == "steeringAngle" {
            if let Some(angle) = value.as_number() {
                self.steering_angle = angle as f64;
            }
        }
        Ok(())
    }

    /// Sends the measured distances for `direction` and waits for the backend to confirm
    /// them. Navigation happens when the confirmation arrives.
    pub fn submit_measurements(
        &mut self,
        inputs: &Inputs,
        direction: Direction,
        fallback: &str,
        sink: &mut dyn MessageSink,
    ) -> Result<(), TeledashError> {
        if !self.open {
            return Err(TeledashError::NoCalibrationSession);
        }
        if self.pending.is_some() {
            return Err(TeledashError::SubmissionPending);
        }
        let distance = |id: &str| inputs.get(id).and_then(InputValue::as_number);
        let distances: BTreeMap<String, Option<u64>> = match direction {
            Direction::Backward => [("d".to_string(), distance("distance"))].into(),
            Direction::Left | Direction::Right => [
                ("d1".to_string(), distance("distance1")),
                ("d2".to_string(), distance("distance2")),
                ("d3".to_string(), distance("distance3")),
            ]
            .into(),
        };

        sink.send(OutboundMessage::calibration_directed(
            CalibrationAction::CurrentAngle,
            direction,
        ));
        sink.send(OutboundMessage::Calibration(CalibrationRequest {
            action: CalibrationAction::SubmitMeasurements,
            direction: Some(direction),
            distances: Some(distances),
        }));
        self.phases
            .set(Phase::from_direction(direction), PhaseState::Submitting);
        self.pending = Some(PendingSubmission {
            direction,
            fallback: fallback.to_string(),
        });
        Ok(())
    }

    /// Applies a backend calibration notification. Unexpected or duplicate notifications
    /// are ignored.
    pub fn handle_event(
        &mut self,
        event: &CalibrationEvent,
        now: Instant,
        sink: &mut dyn MessageSink,
    ) {
        if !self.open {
            debug!("Calibration session closed, ignoring {:?}", event);
            return;
        }
        match event {
            CalibrationEvent::CurrentAngle { data } => self.steering_angle = *data,
            CalibrationEvent::CurrentSpeed { data } => self.speed = *data,
            CalibrationEvent::MeasurementsReceived => {
                let Some(pending) = self.pending.take() else {
                    debug!("measurements_received without a pending submission");
                    return;
                };
                self.phases
                    .set(Phase::from_direction(pending.direction), PhaseState::AwaitingRun);
                if let Err(e) = self.go_to_substep(&pending.fallback) {
                    warn!("Cannot return to {} after submission: {}", pending.fallback, e);
                }
            }
            CalibrationEvent::CalibrationDone => {
                let Some(pending) = self.pending.take() else {
                    debug!("calibration_done without a pending submission");
                    return;
                };
                self.phases
                    .set(Phase::from_direction(pending.direction), PhaseState::NotStarted);
                self.leave_substep();
                sink.send(OutboundMessage::calibration(CalibrationAction::GetStatus));
            }
            CalibrationEvent::DirectionSequenceDone => {}
            CalibrationEvent::CalibrationRunDone { corrected_steer } => {
                self.run_in_progress = false;
                if corrected_steer.is_some() {
                    self.corrected_steer = *corrected_steer;
                }
            }
            CalibrationEvent::CalibrationStatus {
                left,
                right,
                backward,
                test_run,
            } => {
                self.flags = CompletionFlags {
                    left: *left,
                    right: *right,
                    backward: *backward,
                    test_run: *test_run,
                };
            }
            CalibrationEvent::TestRunDone => {
                self.flags.test_run = true;
                self.run_in_progress = false;
            }
            CalibrationEvent::CalibrationSaved { success, zip_data } => {
                if *success {
                    info!("Calibration saved");
                    self.saved = true;
                    self.saved_timer.arm(now);
                    if zip_data.is_some() {
                        self.archive = zip_data.clone();
                    }
                } else {
                    warn!("Backend could not save the calibration");
                }
            }
            CalibrationEvent::PolynomialData {
                has_data,
                speed_data,
                steer_data,
                limit_points_data,
            } => {
                self.polynomial = Some(PolynomialData {
                    has_data: *has_data,
                    speed: speed_data.clone(),
                    steer: steer_data.clone(),
                    limit_points: limit_points_data.clone(),
                });
            }
            CalibrationEvent::ZeroOffsetSplineData { zero_offset_data } => {
                self.zero_offset = zero_offset_data.clone();
            }
            CalibrationEvent::Unknown => debug!("Ignoring unknown calibration action"),
        }
    }

    /// Expires the "saved" confirmation.
    pub fn poll(&mut self, now: Instant) {
        if self.saved_timer.poll(now) {
            self.saved = false;
        }
    }

    /// Keeps per-phase progress in step with what the wizard sends.
    fn track_outbound(&mut self, message: &OutboundMessage) {
        let Some(phase) = self.current_phase() else {
            return;
        };
        match message.calibration_action() {
            Some(CalibrationAction::Continue) => self.phases.set(phase, PhaseState::AwaitingRun),
            Some(CalibrationAction::Run | CalibrationAction::ReRun | CalibrationAction::TestRun) => {
                self.phases.set(phase, PhaseState::AwaitingMeasurement)
            }
            Some(CalibrationAction::Exit) => self.phases.set(phase, PhaseState::NotStarted),
            _ => {}
        }
    }
}

/// What step callbacks get to work with while a button is being pressed.
struct SessionContext<'a> {
    session: &'a mut CalibrationSession,
    sink: &'a mut dyn MessageSink,
}

impl CalibrationContext for SessionContext<'_> {
    fn send(&mut self, message: OutboundMessage) {
        self.session.track_outbound(&message);
        self.sink.send(message);
    }

    fn set_run_in_progress(&mut self, in_progress: bool) {
        self.session.run_in_progress = in_progress;
    }

    fn submit_measurements(
        &mut self,
        inputs: &Inputs,
        direction: Direction,
        fallback: &str,
    ) -> Result<(), TeledashError> {
        self.session
            .submit_measurements(inputs, direction, fallback, &mut *self.sink)
    }

    fn request_polynomial_data(&mut self) {
        self.send(OutboundMessage::calibration(
            CalibrationAction::GetPolynomialData,
        ));
    }

    fn request_zero_offset_spline_data(&mut self) {
        self.send(OutboundMessage::calibration(
            CalibrationAction::GetZeroOffsetSplineData,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationInputField;
    use crate::protocol::Direction;
    use proptest::prelude::*;

    fn measured_step(id: &str, substeps: Vec<CalibrationStep>) -> CalibrationStep {
        CalibrationStep {
            id: id.to_string(),
            description: format!("Measure {}", id),
            inputs: vec![
                CalibrationInputField::distance("distance1", "d1 (mm)"),
                CalibrationInputField::distance("distance2", "d2 (mm)"),
            ],
            substeps,
            ..Default::default()
        }
    }

    /// Three steps that all carry distance inputs; the middle one has a substep too.
    fn measured_session() -> (CalibrationSession, Vec<OutboundMessage>) {
        let steps = vec![
            measured_step("front", vec![]),
            measured_step("middle", vec![measured_step("middle_substep1", vec![])]),
            measured_step("back", vec![]),
        ];
        let mut session = CalibrationSession::new(steps).unwrap();
        let mut sent = Vec::new();
        session.open(KlState::Off, &mut sent);
        (session, sent)
    }

    fn distances(session: &CalibrationSession) -> Vec<Option<u64>> {
        session
            .current_step()
            .inputs
            .iter()
            .filter(|f| f.id.contains("distance"))
            .map(|f| f.value.as_number())
            .collect()
    }

    fn fill_distances(session: &mut CalibrationSession) {
        session.set_input("distance1", "120").unwrap();
        session.set_input("distance2", "45").unwrap();
        assert_eq!(distances(session), vec![Some(120), Some(45)]);
    }

    fn open_session() -> (CalibrationSession, Vec<OutboundMessage>) {
        let mut session = CalibrationSession::default();
        let mut sent = Vec::new();
        session.open(KlState::Accessory, &mut sent);
        sent.clear();
        (session, sent)
    }

    fn get_status() -> OutboundMessage {
        OutboundMessage::calibration(CalibrationAction::GetStatus)
    }

    #[test]
    fn test_open_switches_kl_and_starts() {
        let mut session = CalibrationSession::default();
        let mut sent = Vec::new();
        session.open(KlState::Accessory, &mut sent);
        assert!(session.is_open());
        assert_eq!(session.step_index(), 0);
        assert_eq!(
            sent,
            vec![
                OutboundMessage::Klem {
                    value: KlState::Run
                },
                OutboundMessage::calibration(CalibrationAction::Start),
            ]
        );
    }

    #[test]
    fn test_exit_is_idempotent() {
        let (mut session, mut sent) = open_session();
        session.exit(&mut sent);
        session.exit(&mut sent);
        assert_eq!(
            sent,
            vec![
                OutboundMessage::Klem {
                    value: KlState::Accessory
                },
                OutboundMessage::calibration(CalibrationAction::Exit),
            ]
        );
        assert!(!session.is_open());
    }

    #[test]
    fn test_complete_restores_kl() {
        let (mut session, mut sent) = open_session();
        session.go_to_step(7, &mut sent).unwrap();
        sent.clear();
        session.complete(&mut sent).unwrap();
        assert_eq!(
            sent,
            vec![
                OutboundMessage::Klem {
                    value: KlState::Accessory
                },
                OutboundMessage::calibration(CalibrationAction::Complete),
            ]
        );
        assert_eq!(session.step_index(), 0);
        assert!(matches!(
            session.complete(&mut sent),
            Err(TeledashError::NoCalibrationSession)
        ));
    }

    #[test]
    fn test_step_navigation_requests_status() {
        let (mut session, mut sent) = open_session();
        session.next_step(&mut sent);
        assert_eq!(session.step_index(), 1);
        assert_eq!(sent, vec![get_status()]);

        sent.clear();
        session.previous_step(&mut sent);
        assert_eq!(session.step_index(), 0);
        assert!(sent.is_empty());

        session.previous_step(&mut sent);
        assert_eq!(session.step_index(), 0);
        assert!(matches!(
            session.go_to_step(8, &mut sent),
            Err(TeledashError::StepOutOfRange { index: 8 })
        ));
    }

    #[test]
    fn test_go_to_substep_marks_calibration_in_progress() {
        let (mut session, mut sent) = open_session();
        session.go_to_step(1, &mut sent).unwrap();
        session.go_to_substep("step2_substep1").unwrap();
        assert!(session.is_calibration_in_progress());
        assert!(!session.is_run_in_progress());

        session.navigate_to(&NavTarget::Parent, &mut sent).unwrap();
        assert_eq!(session.substep_id(), None);
        assert!(!session.is_calibration_in_progress());
        assert_eq!(session.step_index(), 1);
    }

    #[test]
    fn test_invalid_target_leaves_state_untouched() {
        let (mut session, mut sent) = open_session();
        session.go_to_step(1, &mut sent).unwrap();
        session.go_to_substep("step2_substep1").unwrap();
        let result = session.navigate_to(&NavTarget::id("step3_substep1"), &mut sent);
        assert!(matches!(
            result,
            Err(TeledashError::InvalidNavigationTarget { .. })
        ));
        assert_eq!(session.substep_id(), Some("step2_substep1"));
    }

    #[test]
    fn test_start_run_sets_run_in_progress_until_done() {
        let (mut session, mut sent) = open_session();
        session.go_to_step(1, &mut sent).unwrap();
        session.press_button(0, &mut sent).unwrap();
        assert_eq!(session.phase_state(Phase::Left), PhaseState::AwaitingRun);
        session.press_button(0, &mut sent).unwrap();
        assert!(session.is_run_in_progress());
        assert_eq!(session.substep_id(), Some("step2_substep2"));
        assert_eq!(
            session.phase_state(Phase::Left),
            PhaseState::AwaitingMeasurement
        );

        session.handle_event(
            &CalibrationEvent::CalibrationRunDone {
                corrected_steer: Some(1.5),
            },
            Instant::now(),
            &mut sent,
        );
        assert!(!session.is_run_in_progress());
        assert_eq!(session.corrected_steer(), Some(1.5));
    }

    #[test]
    fn test_second_submission_is_rejected_while_pending() {
        let (mut session, mut sent) = open_session();
        let inputs = Inputs::new();
        session
            .submit_measurements(&inputs, Direction::Left, "step2_substep1", &mut sent)
            .unwrap();
        assert!(matches!(
            session.submit_measurements(&inputs, Direction::Left, "step2_substep1", &mut sent),
            Err(TeledashError::SubmissionPending)
        ));
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn test_backward_submission_uses_single_distance() {
        let (mut session, mut sent) = open_session();
        let inputs = Inputs::from([("distance".to_string(), InputValue::Number(Some(420)))]);
        session
            .submit_measurements(&inputs, Direction::Backward, "step6_substep1", &mut sent)
            .unwrap();
        assert_eq!(
            sent[1],
            OutboundMessage::Calibration(CalibrationRequest {
                action: CalibrationAction::SubmitMeasurements,
                direction: Some(Direction::Backward),
                distances: Some([("d".to_string(), Some(420))].into()),
            })
        );
        assert_eq!(session.phase_state(Phase::Backward), PhaseState::Submitting);
    }

    #[test]
    fn test_set_input_keeps_digits_only() {
        let (mut session, mut sent) = open_session();
        session.go_to_step(1, &mut sent).unwrap();
        session.go_to_substep("step2_substep2").unwrap();
        session.set_input("distance1", "1a2-3").unwrap();
        session.set_input("distance2", "abc").unwrap();
        let inputs = session.input_snapshot();
        assert_eq!(inputs["distance1"], InputValue::Number(Some(123)));
        assert_eq!(inputs["distance2"], InputValue::Number(None));
        assert!(session.set_input("distance9", "1").is_err());
    }

    #[test]
    fn test_calibration_status_replaces_flags() {
        let (mut session, mut sent) = open_session();
        let now = Instant::now();
        session.handle_event(&CalibrationEvent::TestRunDone, now, &mut sent);
        assert!(session.flags().test_run);
        session.handle_event(
            &CalibrationEvent::CalibrationStatus {
                left: true,
                right: true,
                backward: false,
                test_run: false,
            },
            now,
            &mut sent,
        );
        assert_eq!(
            session.flags(),
            CompletionFlags {
                left: true,
                right: true,
                backward: false,
                test_run: false
            }
        );
        assert_eq!(session.phase_state(Phase::Left), PhaseState::Completed);
        assert!(sent.is_empty());
    }

    #[test]
    fn test_saved_flag_expires() {
        let (mut session, mut sent) = open_session();
        let now = Instant::now();
        session.handle_event(
            &CalibrationEvent::CalibrationSaved {
                success: true,
                zip_data: Some("UEsFBgAAAAAAAAAAAAAAAAAAAAAAAA==".to_string()),
            },
            now,
            &mut sent,
        );
        assert!(session.is_calibration_saved());
        session.poll(now + Duration::from_millis(2999));
        assert!(session.is_calibration_saved());
        session.poll(now + Duration::from_millis(3000));
        assert!(!session.is_calibration_saved());
        assert!(session.take_archive().is_some());
        assert!(session.take_archive().is_none());
    }

    #[test]
    fn test_events_after_exit_are_ignored() {
        let (mut session, mut sent) = open_session();
        session
            .submit_measurements(&Inputs::new(), Direction::Right, "step3_substep1", &mut sent)
            .unwrap();
        session.exit(&mut sent);
        sent.clear();
        session.handle_event(&CalibrationEvent::CalibrationDone, Instant::now(), &mut sent);
        assert!(sent.is_empty());
        assert!(session.pending_submission().is_none());
    }

    #[test]
    fn test_recalibrate_returns_to_first_step() {
        let (mut session, mut sent) = open_session();
        session.go_to_step(3, &mut sent).unwrap();
        session.go_to_substep("step4_substep3").unwrap();
        sent.clear();
        session.press_button(0, &mut sent).unwrap();
        assert_eq!(
            sent,
            vec![
                OutboundMessage::calibration(CalibrationAction::Exit),
                OutboundMessage::calibration(CalibrationAction::Start),
            ]
        );
        assert_eq!(session.step_index(), 0);
        assert_eq!(session.substep_id(), None);
    }

    #[test]
    fn test_gated_button_is_rejected() {
        let (mut session, mut sent) = open_session();
        session.go_to_step(7, &mut sent).unwrap();
        sent.clear();
        assert!(matches!(
            session.press_button(0, &mut sent),
            Err(TeledashError::ButtonGated { .. })
        ));
        assert!(sent.is_empty());

        session.handle_event(
            &CalibrationEvent::CalibrationStatus {
                left: true,
                right: true,
                backward: true,
                test_run: true,
            },
            Instant::now(),
            &mut sent,
        );
        session.press_button(0, &mut sent).unwrap();
        assert_eq!(
            sent,
            vec![OutboundMessage::calibration(
                CalibrationAction::SaveCalibration
            )]
        );
    }

    #[test]
    fn test_empty_steps_are_rejected() {
        assert!(matches!(
            CalibrationSession::new(Vec::new()),
            Err(TeledashError::NoCalibrationSteps)
        ));
    }

    #[test]
    fn test_custom_steps_must_validate() {
        let steps = vec![measured_step("front", vec![]), measured_step("front", vec![])];
        assert!(matches!(
            CalibrationSession::new(steps),
            Err(TeledashError::InvalidNavigationTarget { target }) if target == "front"
        ));
    }

    #[test]
    fn test_step_entry_resets_own_distances() {
        let (mut session, mut sent) = measured_session();

        fill_distances(&mut session);
        session.next_step(&mut sent);
        assert_eq!(session.step_index(), 1);
        fill_distances(&mut session);
        session.previous_step(&mut sent);
        assert_eq!(session.step_index(), 0);
        assert_eq!(distances(&session), vec![Some(0), Some(0)]);

        session.next_step(&mut sent);
        assert_eq!(distances(&session), vec![Some(0), Some(0)]);

        session.go_to_step(2, &mut sent).unwrap();
        fill_distances(&mut session);
        session.go_to_step(1, &mut sent).unwrap();
        session.go_to_step(2, &mut sent).unwrap();
        assert_eq!(distances(&session), vec![Some(0), Some(0)]);

        // re-entering the step being shown counts as entering it
        fill_distances(&mut session);
        session.go_to_step(2, &mut sent).unwrap();
        assert_eq!(distances(&session), vec![Some(0), Some(0)]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_navigation_lands_on_zeroed_distances(moves in prop::collection::vec(0u8..5, 1..60)) {
            let (mut session, mut sent) = measured_session();
            for (n, kind) in moves.into_iter().enumerate() {
                // leave something behind on whatever is shown before moving on
                let value = (n as u64 + 1).to_string();
                session.set_input("distance1", &value).unwrap();
                session.set_input("distance2", &value).unwrap();

                let before = session.step_index();
                let entered = match kind {
                    0 => {
                        session.next_step(&mut sent);
                        session.step_index() != before
                    }
                    1 => {
                        session.previous_step(&mut sent);
                        session.step_index() != before
                    }
                    2 => session.go_to_step(n % 3, &mut sent).is_ok(),
                    3 => session.go_to_substep("middle_substep1").is_ok(),
                    _ => session.go_to_step(3 + n, &mut sent).is_ok(),
                };
                if entered {
                    prop_assert_eq!(distances(&session), vec![Some(0), Some(0)]);
                }
            }
        }
    }
}
