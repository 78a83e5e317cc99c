use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    rc::Rc,
};

use crate::TeledashError;
use crate::protocol::{CalibrationAction, Direction, OutboundMessage};

use super::Phase;

/// Snapshot of the current step's input values keyed by field id.
pub type Inputs = BTreeMap<String, InputValue>;

#[derive(Clone, Debug, PartialEq)]
pub enum InputValue {
    /// A number field; `None` while the field is empty.
    Number(Option<u64>),
    Text(String),
}

impl InputValue {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            InputValue::Number(value) => *value,
            InputValue::Text(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputKind {
    Text,
    Number,
    Select(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationInputField {
    pub id: String,
    pub label: String,
    pub kind: InputKind,
    pub default: InputValue,
    pub value: InputValue,
    pub required: bool,
}

impl CalibrationInputField {
    /// A required distance in millimetres, starting at zero.
    pub fn distance(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: InputKind::Number,
            default: InputValue::Number(Some(0)),
            value: InputValue::Number(Some(0)),
            required: true,
        }
    }
}

/// The operations step callbacks are allowed to perform on the running session.
pub trait CalibrationContext {
    fn send(&mut self, message: OutboundMessage);
    fn set_run_in_progress(&mut self, in_progress: bool);
    fn submit_measurements(
        &mut self,
        inputs: &Inputs,
        direction: Direction,
        fallback: &str,
    ) -> Result<(), TeledashError>;
    fn request_polynomial_data(&mut self);
    fn request_zero_offset_spline_data(&mut self);
}

type NoArgsFn = dyn Fn(&mut dyn CalibrationContext) -> Result<(), TeledashError>;
type WithInputsFn = dyn Fn(&mut dyn CalibrationContext, &Inputs) -> Result<(), TeledashError>;

/// Work a button does before it navigates. Whether the callback wants the input snapshot
/// is fixed when the step is defined.
#[derive(Clone)]
pub enum Callback {
    NoArgs(Rc<NoArgsFn>),
    WithInputs(Rc<WithInputsFn>),
}

impl Callback {
    pub fn no_args(
        f: impl Fn(&mut dyn CalibrationContext) -> Result<(), TeledashError> + 'static,
    ) -> Self {
        Callback::NoArgs(Rc::new(f))
    }

    pub fn with_inputs(
        f: impl Fn(&mut dyn CalibrationContext, &Inputs) -> Result<(), TeledashError> + 'static,
    ) -> Self {
        Callback::WithInputs(Rc::new(f))
    }

    pub fn invoke(
        &self,
        context: &mut dyn CalibrationContext,
        inputs: &Inputs,
    ) -> Result<(), TeledashError> {
        match self {
            Callback::NoArgs(f) => f(context),
            Callback::WithInputs(f) => f(context, inputs),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::NoArgs(_) => f.write_str("Callback::NoArgs"),
            Callback::WithInputs(_) => f.write_str("Callback::WithInputs"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Invoke,
    Navigate,
    InvokeAndNavigate,
}

impl ButtonAction {
    pub fn invokes(&self) -> bool {
        matches!(self, Self::Invoke | Self::InvokeAndNavigate)
    }

    pub fn navigates(&self) -> bool {
        matches!(self, Self::Navigate | Self::InvokeAndNavigate)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavTarget {
    /// Leave the current substep for its step.
    Parent,
    /// A step id, or a substep id of the current step.
    Id(String),
}

impl NavTarget {
    pub fn id(id: &str) -> Self {
        NavTarget::Id(id.to_string())
    }
}

impl fmt::Display for NavTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavTarget::Parent => f.write_str("..parent"),
            NavTarget::Id(id) => f.write_str(id),
        }
    }
}

/// Completion requirement a button is subject to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonGate {
    TestRun,
    Backward,
    ZeroOffsetSpline,
    Visualization,
    Save,
}

#[derive(Clone, Debug)]
pub struct CalibrationButton {
    /// Label, may contain the same placeholders as step descriptions.
    pub text: String,
    pub action: ButtonAction,
    pub target: Option<NavTarget>,
    pub callbacks: Vec<Callback>,
    pub gate: Option<ButtonGate>,
}

impl CalibrationButton {
    pub fn invoke(text: &str, callbacks: Vec<Callback>) -> Self {
        Self {
            text: text.to_string(),
            action: ButtonAction::Invoke,
            target: None,
            callbacks,
            gate: None,
        }
    }

    pub fn navigate(text: &str, target: NavTarget) -> Self {
        Self {
            text: text.to_string(),
            action: ButtonAction::Navigate,
            target: Some(target),
            callbacks: Vec::new(),
            gate: None,
        }
    }

    pub fn invoke_and_navigate(text: &str, target: NavTarget, callbacks: Vec<Callback>) -> Self {
        Self {
            text: text.to_string(),
            action: ButtonAction::InvokeAndNavigate,
            target: Some(target),
            callbacks,
            gate: None,
        }
    }

    pub fn gated(mut self, gate: ButtonGate) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct CalibrationStep {
    pub id: String,
    pub title: Option<String>,
    /// Text with `{placeholder}`s resolved when rendered.
    pub description: String,
    pub image: Option<String>,
    pub inputs: Vec<CalibrationInputField>,
    pub buttons: Vec<CalibrationButton>,
    pub substeps: Vec<CalibrationStep>,
    /// Phase whose completion this step reflects.
    pub phase: Option<Phase>,
    /// Entering the step asks the backend for fresh completion flags.
    pub refreshes_status: bool,
}

impl CalibrationStep {
    fn new(id: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            ..Default::default()
        }
    }

    fn titled(id: &str, title: &str, description: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            ..Self::new(id, description)
        }
    }

    fn image(mut self, path: &str) -> Self {
        self.image = Some(path.to_string());
        self
    }

    fn inputs(mut self, inputs: Vec<CalibrationInputField>) -> Self {
        self.inputs = inputs;
        self
    }

    fn buttons(mut self, buttons: Vec<CalibrationButton>) -> Self {
        self.buttons = buttons;
        self
    }

    fn substeps(mut self, substeps: Vec<CalibrationStep>) -> Self {
        self.substeps = substeps;
        self
    }

    fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    fn refreshes_status(mut self) -> Self {
        self.refreshes_status = true;
        self
    }

    /// Finds a substep by id anywhere below this step.
    pub fn find_substep(&self, id: &str) -> Option<&CalibrationStep> {
        self.substeps
            .iter()
            .find_map(|s| if s.id == id { Some(s) } else { s.find_substep(id) })
    }

    /// Child indices leading from this step to substep `id`.
    pub fn substep_path(&self, id: &str) -> Option<Vec<usize>> {
        for (i, substep) in self.substeps.iter().enumerate() {
            if substep.id == id {
                return Some(vec![i]);
            }
            if let Some(mut path) = substep.substep_path(id) {
                path.insert(0, i);
                return Some(path);
            }
        }
        None
    }

    /// Follows a path obtained from [`CalibrationStep::substep_path`] on this step.
    pub fn descend_mut(&mut self, path: &[usize]) -> &mut CalibrationStep {
        path.iter().fold(self, |step, &i| &mut step.substeps[i])
    }

    pub fn input_snapshot(&self) -> Inputs {
        self.inputs
            .iter()
            .map(|field| (field.id.clone(), field.value.clone()))
            .collect()
    }

    /// Sets every distance field back to zero.
    pub fn reset_distance_inputs(&mut self) {
        for field in self.inputs.iter_mut().filter(|f| f.id.contains("distance")) {
            field.value = InputValue::Number(Some(0));
        }
    }
}

fn send(message: OutboundMessage) -> Callback {
    Callback::no_args(move |ctx| {
        ctx.send(message.clone());
        Ok(())
    })
}

fn send_directed(action: CalibrationAction, direction: Direction) -> Callback {
    send(OutboundMessage::calibration_directed(action, direction))
}

/// Marks a physical run as started and sends the command that starts it.
fn start_run(action: CalibrationAction, direction: Direction) -> Callback {
    Callback::no_args(move |ctx| {
        ctx.set_run_in_progress(true);
        ctx.send(OutboundMessage::calibration_directed(action, direction));
        Ok(())
    })
}

fn submit(direction: Direction, fallback: &str) -> Callback {
    let fallback = fallback.to_string();
    Callback::with_inputs(move |ctx, inputs| ctx.submit_measurements(inputs, direction, &fallback))
}

const PLACEMENT_TEXT: &str = "Position the vehicle as illustrated. Ensure it is on a level surface with the wheels aligned straight.";

/// Left and right calibration share their shape.
fn steering_step(
    id: &str,
    title: &str,
    direction: Direction,
    phase: Phase,
    placement_image: &str,
    measurement_image: &str,
) -> CalibrationStep {
    let start_id = format!("{}_substep1", id);
    let measure_id = format!("{}_substep2", id);
    CalibrationStep::titled(id, title, PLACEMENT_TEXT)
        .image(placement_image)
        .phase(phase)
        .refreshes_status()
        .buttons(vec![CalibrationButton::invoke_and_navigate(
            "Continue",
            NavTarget::id(&start_id),
            vec![
                send_directed(CalibrationAction::Continue, direction),
                send_directed(CalibrationAction::CurrentAngle, direction),
            ],
        )])
        .substeps(vec![
            CalibrationStep::new(
                &start_id,
                "After placing the vehicle correctly, you can start the calibration runs. The vehicle will move forward testing a steering angle of {steeringAngle} degrees.",
            )
            .buttons(vec![CalibrationButton::invoke_and_navigate(
                "Start {steeringAngle}° Run",
                NavTarget::id(&measure_id),
                vec![start_run(CalibrationAction::Run, direction)],
            )]),
            CalibrationStep::new(
                &measure_id,
                "After the vehicle has stopped, measure the distances shown in the image and enter them in the fields below for the {steeringAngle}° run.",
            )
            .image(measurement_image)
            .inputs(vec![
                CalibrationInputField::distance("distance1", "d1 (mm)"),
                CalibrationInputField::distance("distance2", "d2 (mm)"),
                CalibrationInputField::distance("distance3", "d3 (mm)"),
            ])
            .buttons(vec![
                CalibrationButton::invoke_and_navigate(
                    "Re-run",
                    NavTarget::id(&start_id),
                    vec![start_run(CalibrationAction::ReRun, direction)],
                ),
                CalibrationButton::invoke(
                    "Submit Measurements",
                    vec![submit(direction, &start_id)],
                ),
            ]),
        ])
}

/// The calibration wizard as the dashboard runs it.
pub fn calibration_steps() -> Vec<CalibrationStep> {
    vec![
        CalibrationStep::titled(
            "step1",
            "Track",
            "Lay out a straight line with a minimum length of 3 meters. Ensure there is at least 3 meters of unobstructed space on the side where the vehicle will be calibrated.",
        )
        .image("/assets/calibration/track.svg"),
        steering_step(
            "step2",
            "Left Calibration",
            Direction::Left,
            Phase::Left,
            "/assets/calibration/placement_left.svg",
            "/assets/calibration/measurements_left.svg",
        ),
        steering_step(
            "step3",
            "Right Calibration",
            Direction::Right,
            Phase::Right,
            "/assets/calibration/placement_right.svg",
            "/assets/calibration/measurements_right.svg",
        ),
        CalibrationStep::titled("step4", "Test Run", "{incompleteCalibMessage}")
            .image("/assets/calibration/placement_left.svg")
            .phase(Phase::TestRun)
            .refreshes_status()
            .buttons(vec![
                CalibrationButton::invoke_and_navigate(
                    "Continue",
                    NavTarget::id("step4_substep1"),
                    vec![
                        send_directed(CalibrationAction::Continue, Direction::Right),
                        send_directed(CalibrationAction::CurrentAngle, Direction::Right),
                    ],
                )
                .gated(ButtonGate::TestRun),
            ])
            .substeps(vec![
                CalibrationStep::new(
                    "step4_substep1",
                    "After placing the vehicle correctly, you can start the test run. The vehicle will move forward testing a steering angle of 0 degrees.",
                )
                .buttons(vec![CalibrationButton::invoke_and_navigate(
                    "Start 0° Run",
                    NavTarget::id("step4_substep2"),
                    vec![start_run(CalibrationAction::TestRun, Direction::Left)],
                )]),
                CalibrationStep::new(
                    "step4_substep2",
                    "After the vehicle has stopped, press one of the buttons below to continue.",
                )
                .buttons(vec![
                    CalibrationButton::invoke_and_navigate(
                        "Straight",
                        NavTarget::Parent,
                        vec![start_run(CalibrationAction::TestRunDone, Direction::Left)],
                    ),
                    CalibrationButton::invoke_and_navigate(
                        "Left/Right",
                        NavTarget::id("step4_substep3"),
                        vec![Callback::no_args(|ctx| {
                            ctx.set_run_in_progress(true);
                            Ok(())
                        })],
                    ),
                ]),
                CalibrationStep::new(
                    "step4_substep3",
                    "Because the vehicle did not move as expected, please recalibrate the vehicle.",
                )
                .buttons(vec![CalibrationButton::invoke_and_navigate(
                    "Recalibrate",
                    NavTarget::id("step1"),
                    vec![
                        send(OutboundMessage::calibration(CalibrationAction::Exit)),
                        send(OutboundMessage::calibration(CalibrationAction::Start)),
                    ],
                )]),
            ]),
        CalibrationStep::titled("step5", "0 Offset Spline Visualization", "{zeroOffsetMessage}")
            .refreshes_status()
            .buttons(vec![
                CalibrationButton::invoke(
                    "Load Plot",
                    vec![Callback::no_args(|ctx| {
                        ctx.request_zero_offset_spline_data();
                        Ok(())
                    })],
                )
                .gated(ButtonGate::ZeroOffsetSpline),
            ]),
        CalibrationStep::titled("step6", "Backward Calibration", "{incompleteBackwardMessage}")
            .image("/assets/calibration/placement_backwards.svg")
            .phase(Phase::Backward)
            .refreshes_status()
            .buttons(vec![
                CalibrationButton::invoke_and_navigate(
                    "Continue",
                    NavTarget::id("step6_substep1"),
                    vec![
                        send_directed(CalibrationAction::Continue, Direction::Backward),
                        send_directed(CalibrationAction::CurrentAngle, Direction::Backward),
                    ],
                )
                .gated(ButtonGate::Backward),
            ])
            .substeps(vec![
                CalibrationStep::new(
                    "step6_substep1",
                    "After placing the vehicle correctly, you can start the calibration runs. The vehicle will move backward in a straight line with a speed of {speed} cm/s.",
                )
                .buttons(vec![CalibrationButton::invoke_and_navigate(
                    "Start {speed} cm/s Run",
                    NavTarget::id("step6_substep2"),
                    vec![start_run(CalibrationAction::Run, Direction::Backward)],
                )]),
                CalibrationStep::new(
                    "step6_substep2",
                    "After the vehicle has stopped, measure the distance shown in the image and enter it in the field below for the {speed} cm/s backward run.",
                )
                .image("/assets/calibration/measurements_backwards.svg")
                .inputs(vec![CalibrationInputField::distance("distance", "d (mm)")])
                .buttons(vec![
                    CalibrationButton::invoke_and_navigate(
                        "Re-run",
                        NavTarget::id("step6_substep1"),
                        vec![start_run(CalibrationAction::ReRun, Direction::Backward)],
                    ),
                    CalibrationButton::invoke(
                        "Submit Measurements",
                        vec![submit(Direction::Backward, "step6_substep1")],
                    ),
                ]),
            ]),
        CalibrationStep::titled("step7", "Calibration Visualization", "{visualizationMessage}")
            .refreshes_status()
            .buttons(vec![
                CalibrationButton::invoke(
                    "Load Plots",
                    vec![Callback::no_args(|ctx| {
                        ctx.request_polynomial_data();
                        Ok(())
                    })],
                )
                .gated(ButtonGate::Visualization),
            ]),
        CalibrationStep::titled("step8", "Save New Calibration", "{incompleteSaveMessage}")
            .buttons(vec![
                CalibrationButton::invoke(
                    "Save & Download",
                    vec![send(OutboundMessage::calibration(
                        CalibrationAction::SaveCalibration,
                    ))],
                )
                .gated(ButtonGate::Save),
            ]),
    ]
}

fn collect_ids<'a>(step: &'a CalibrationStep, ids: &mut Vec<&'a str>) {
    ids.push(&step.id);
    for substep in &step.substeps {
        collect_ids(substep, ids);
    }
}

fn validate_buttons(
    steps: &[CalibrationStep],
    root: &CalibrationStep,
    step: &CalibrationStep,
) -> Result<(), TeledashError> {
    for button in &step.buttons {
        if let Some(NavTarget::Id(target)) = &button.target {
            let is_step = steps.iter().any(|s| &s.id == target);
            if !is_step && root.find_substep(target).is_none() {
                return Err(TeledashError::InvalidNavigationTarget {
                    target: target.clone(),
                });
            }
        }
    }
    for substep in &step.substeps {
        validate_buttons(steps, root, substep)?;
    }
    Ok(())
}

/// Checks that there is at least one step, that ids are unique and that every button
/// target resolves from where the button is shown.
pub fn validate_steps(steps: &[CalibrationStep]) -> Result<(), TeledashError> {
    if steps.is_empty() {
        return Err(TeledashError::NoCalibrationSteps);
    }
    let mut ids = Vec::new();
    for step in steps {
        collect_ids(step, &mut ids);
    }
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(TeledashError::InvalidNavigationTarget {
                target: id.to_string(),
            });
        }
    }
    for step in steps {
        validate_buttons(steps, step, step)?;
    }
    Ok(())
}
