use super::session::CalibrationSession;
use super::steps::ButtonGate;
use super::CompletionFlags;

/// Joins names as "A", "A and B" or "A, B and C".
fn join_names(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [only] => only.to_string(),
        [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
    }
}

fn missing<'a>(required: &[(bool, &'a str)]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|(done, _)| !done)
        .map(|(_, name)| *name)
        .collect()
}

pub fn incomplete_calib_message(flags: &CompletionFlags) -> String {
    let missing = missing(&[(flags.left, "Left"), (flags.right, "Right")]);
    if missing.is_empty() {
        return "Position the vehicle as illustrated. Ensure it is on a level surface with the wheels aligned straight.".to_string();
    }
    format!(
        "You must complete {} calibration before you can run the test.",
        join_names(&missing)
    )
}

pub fn incomplete_backward_message(flags: &CompletionFlags) -> String {
    let missing = missing(&[
        (flags.left, "Left"),
        (flags.right, "Right"),
        (flags.test_run, "Test Run"),
    ]);
    if missing.is_empty() {
        return "Position the vehicle as illustrated. Ensure it is on a level surface with the wheels aligned straight. The vehicle will move backward at different speeds with straight steering.".to_string();
    }
    format!(
        "You must complete {} before you can run backward calibration.",
        join_names(&missing)
    )
}

pub fn incomplete_save_message(flags: &CompletionFlags) -> String {
    let missing = missing(&[
        (flags.left, "Left calibration"),
        (flags.right, "Right calibration"),
        (flags.backward, "Backward calibration"),
        (flags.test_run, "Test Run"),
    ]);
    if missing.is_empty() {
        return "Save the new calibration settings.".to_string();
    }
    format!(
        "You must complete {} before you can save.",
        join_names(&missing)
    )
}

pub fn visualization_message(flags: &CompletionFlags, has_polynomial_data: bool) -> String {
    if !flags.all_complete() {
        "You must complete Left, Right, Test Run and Backward calibration before viewing the polynomial plots. Please go back and complete the calibration runs.".to_string()
    } else if !has_polynomial_data {
        "Click \"Load Plots\" to visualize the calibration polynomial functions for Speed and Steering.".to_string()
    } else {
        "Below are the polynomial functions fitted to your calibration data.".to_string()
    }
}

pub fn zero_offset_message(flags: &CompletionFlags, has_spline: bool) -> String {
    let missing = missing(&[
        (flags.left, "Left"),
        (flags.right, "Right"),
        (flags.test_run, "Test Run"),
    ]);
    if !missing.is_empty() {
        return format!(
            "You must complete {} calibration before viewing the 0-offset spline.",
            join_names(&missing)
        );
    }
    if !has_spline {
        return "Click \"Load Plot\" to visualize the spline used for the zero offset calculation.".to_string();
    }
    "This plot shows the cubic spline used to determine the steering offset. This helps to correct any mechanical misalignments in the steering assembly.".to_string()
}

/// Labels of controls that would start or resolve a physical run.
pub fn blocks_during_run(text: &str) -> bool {
    text.contains("Re-run")
        || text.contains("Submit Measurements")
        || matches!(text, "Left" | "Right" | "Straight" | "Left/Right")
}

impl CalibrationSession {
    pub fn step_title(&self) -> String {
        let step = &self.steps[self.step_index];
        let title = step.title.clone().unwrap_or_default();
        let completed = step.phase.is_some_and(|phase| self.flags.get(phase));
        if self.substep_id.is_none() && completed {
            format!("{} - Completed", title)
        } else {
            title
        }
    }

    /// Resolves the placeholders of `text` against the session.
    pub fn render_text(&self, text: &str) -> String {
        let has_polynomial = self.polynomial.as_ref().is_some_and(|p| p.has_data);
        text.replace("{steeringAngle}", &self.steering_angle.to_string())
            .replace("{speed}", &(self.speed / 10.0).to_string())
            .replace(
                "{incompleteCalibMessage}",
                &incomplete_calib_message(&self.flags),
            )
            .replace(
                "{incompleteBackwardMessage}",
                &incomplete_backward_message(&self.flags),
            )
            .replace(
                "{incompleteSaveMessage}",
                &incomplete_save_message(&self.flags),
            )
            .replace(
                "{visualizationMessage}",
                &visualization_message(&self.flags, has_polynomial),
            )
            .replace(
                "{zeroOffsetMessage}",
                &zero_offset_message(&self.flags, self.zero_offset.is_some()),
            )
    }

    pub fn description(&self) -> String {
        self.render_text(&self.current_step().description)
    }

    pub fn is_first_step(&self) -> bool {
        self.step_index == 0 && self.substep_id.is_none()
    }

    pub fn is_last_step(&self) -> bool {
        if self.step_index + 1 != self.steps.len() {
            return false;
        }
        let step = &self.steps[self.step_index];
        match (step.substeps.last(), self.substep_id.as_deref()) {
            (None, _) => true,
            (Some(last), Some(current)) => last.id == current,
            (Some(_), None) => false,
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        (self.step_index + 1) as f64 / self.steps.len() as f64 * 100.0
    }

    pub fn is_save_button_disabled(&self) -> bool {
        !self.flags.all_complete()
    }

    pub fn is_test_run_button_disabled(&self) -> bool {
        !self.flags.steering_complete()
    }

    pub fn is_backward_button_disabled(&self) -> bool {
        !(self.flags.steering_complete() && self.flags.test_run)
    }

    pub fn is_zero_offset_spline_button_disabled(&self) -> bool {
        !(self.flags.steering_complete() && self.flags.test_run)
    }

    pub fn is_visualization_button_disabled(&self) -> bool {
        !self.flags.all_complete()
    }

    pub fn is_button_disabled_during_run(&self, text: &str) -> bool {
        self.run_in_progress && blocks_during_run(text)
    }

    pub(crate) fn is_gate_closed(&self, gate: ButtonGate) -> bool {
        match gate {
            ButtonGate::TestRun => self.is_test_run_button_disabled(),
            ButtonGate::Backward => self.is_backward_button_disabled(),
            ButtonGate::ZeroOffsetSpline => self.is_zero_offset_spline_button_disabled(),
            ButtonGate::Visualization => self.is_visualization_button_disabled(),
            ButtonGate::Save => self.is_save_button_disabled(),
        }
    }

    /// Whether button `index` of the current step can be pressed right now.
    pub fn is_button_enabled(&self, index: usize) -> bool {
        self.current_step().buttons.get(index).is_some_and(|button| {
            !self.is_button_disabled_during_run(&self.render_text(&button.text))
                && !button.gate.is_some_and(|gate| self.is_gate_closed(gate))
        })
    }
}
