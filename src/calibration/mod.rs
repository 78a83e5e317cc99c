//! The calibration wizard.
//!
//! [`steps`] defines what the wizard looks like, [`session`] walks an operator through it
//! against the backend and [`view`] derives everything a frontend shows from the session
//! flags.

pub mod session;
pub mod spline;
pub mod steps;
pub mod view;

use serde::{Deserialize, Serialize};

use crate::protocol::Direction;

pub use session::{CalibrationSession, PendingSubmission};
pub use spline::{CurveData, LimitPoints, SplineData};
pub use steps::{
    ButtonAction, ButtonGate, CalibrationButton, CalibrationContext, CalibrationInputField,
    CalibrationStep, Callback, InputKind, InputValue, Inputs, NavTarget, calibration_steps,
    validate_steps,
};

/// A physical calibration procedure whose completion the backend tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Left,
    Right,
    TestRun,
    Backward,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Left, Phase::Right, Phase::TestRun, Phase::Backward];

    /// The phase a measurement submission in `direction` belongs to.
    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Left => Phase::Left,
            Direction::Right => Phase::Right,
            Direction::Backward => Phase::Backward,
        }
    }

    fn index(&self) -> usize {
        match self {
            Phase::Left => 0,
            Phase::Right => 1,
            Phase::TestRun => 2,
            Phase::Backward => 3,
        }
    }
}

/// Progress of a single phase as seen from the dashboard.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    #[default]
    NotStarted,
    /// Vehicle placed, waiting for the operator to start a run.
    AwaitingRun,
    /// A run was started; its measurements have not been submitted yet.
    AwaitingMeasurement,
    /// Measurements were sent and the backend has not confirmed them yet.
    Submitting,
    Completed,
}

/// Completion flags, only ever written from backend confirmations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionFlags {
    pub left: bool,
    pub right: bool,
    pub backward: bool,
    pub test_run: bool,
}

impl CompletionFlags {
    pub fn get(&self, phase: Phase) -> bool {
        match phase {
            Phase::Left => self.left,
            Phase::Right => self.right,
            Phase::TestRun => self.test_run,
            Phase::Backward => self.backward,
        }
    }

    pub fn all_complete(&self) -> bool {
        self.left && self.right && self.backward && self.test_run
    }

    pub fn steering_complete(&self) -> bool {
        self.left && self.right
    }
}

/// Per-phase progress indexed by [`Phase`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PhaseStates([PhaseState; 4]);

impl PhaseStates {
    pub(crate) fn get(&self, phase: Phase) -> PhaseState {
        self.0[phase.index()]
    }

    pub(crate) fn set(&mut self, phase: Phase, state: PhaseState) {
        self.0[phase.index()] = state;
    }
}

/// Fitted curves the backend sends for the visualization step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolynomialData {
    pub has_data: bool,
    pub speed: Option<CurveData>,
    pub steer: Option<CurveData>,
    pub limit_points: Option<LimitPoints>,
}
