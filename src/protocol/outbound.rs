use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ignition state of the vehicle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum KlState {
    #[default]
    #[serde(rename = "0")]
    Off,
    #[serde(rename = "15")]
    Accessory,
    #[serde(rename = "30")]
    Run,
}

impl KlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "0",
            Self::Accessory => "15",
            Self::Run => "30",
        }
    }
}

impl fmt::Display for KlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DrivingMode {
    #[default]
    Stop,
    Manual,
    Legacy,
    Auto,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
            Self::Backward => f.write_str("backward"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationAction {
    Start,
    Continue,
    Run,
    #[serde(rename = "re-run")]
    ReRun,
    TestRun,
    TestRunDone,
    SubmitMeasurements,
    GetStatus,
    GetPolynomialData,
    GetZeroOffsetSplineData,
    SaveCalibration,
    Exit,
    Complete,
    CurrentAngle,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalibrationRequest {
    #[serde(rename = "Action")]
    pub action: CalibrationAction,
    #[serde(rename = "Direction", default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Measured distances in millimetres keyed `d1`..`d3` (or `d` for backward runs).
    #[serde(rename = "Distances", default, skip_serializing_if = "Option::is_none")]
    pub distances: Option<BTreeMap<String, Option<u64>>>,
}

impl CalibrationRequest {
    pub fn new(action: CalibrationAction) -> Self {
        Self {
            action,
            direction: None,
            distances: None,
        }
    }

    pub fn directed(action: CalibrationAction, direction: Direction) -> Self {
        Self {
            action,
            direction: Some(direction),
            distances: None,
        }
    }
}

/// Open-loop manoeuvre: drive at `speed` with `steer` for `time` seconds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ControlManeuver {
    #[serde(rename = "Time")]
    pub time: f64,
    #[serde(rename = "Speed")]
    pub speed: f64,
    #[serde(rename = "Steer")]
    pub steer: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "Name")]
pub enum OutboundMessage {
    SessionAccess,
    SessionEnd,
    Klem {
        #[serde(rename = "Value")]
        value: KlState,
    },
    DrivingMode {
        #[serde(rename = "Value")]
        value: DrivingMode,
    },
    /// Speed setpoint in tenths, sent as a string.
    SpeedMotor {
        #[serde(rename = "Value")]
        value: String,
    },
    /// Steering setpoint in tenths of a degree, sent as a string.
    SteerMotor {
        #[serde(rename = "Value")]
        value: String,
    },
    Brake,
    Record {
        #[serde(rename = "Value")]
        value: bool,
    },
    Control {
        #[serde(rename = "Value")]
        value: ControlManeuver,
    },
    Calibration(CalibrationRequest),
    GetCurrentSerialConnectionState,
    Heartbeat,
}

impl OutboundMessage {
    pub fn calibration(action: CalibrationAction) -> Self {
        Self::Calibration(CalibrationRequest::new(action))
    }

    pub fn calibration_directed(action: CalibrationAction, direction: Direction) -> Self {
        Self::Calibration(CalibrationRequest::directed(action, direction))
    }

    pub fn calibration_action(&self) -> Option<CalibrationAction> {
        match self {
            Self::Calibration(request) => Some(request.action),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_messages_carry_only_name() {
        assert_eq!(
            serde_json::to_value(OutboundMessage::Heartbeat).unwrap(),
            json!({ "Name": "Heartbeat" })
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::SessionEnd).unwrap(),
            json!({ "Name": "SessionEnd" })
        );
    }

    #[test]
    fn test_klem_and_driving_mode_values() {
        assert_eq!(
            serde_json::to_value(OutboundMessage::Klem {
                value: KlState::Run
            })
            .unwrap(),
            json!({ "Name": "Klem", "Value": "30" })
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::DrivingMode {
                value: DrivingMode::Legacy
            })
            .unwrap(),
            json!({ "Name": "DrivingMode", "Value": "legacy" })
        );
    }

    #[test]
    fn test_calibration_request_omits_empty_fields() {
        let message = OutboundMessage::calibration(CalibrationAction::GetStatus);
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "Name": "Calibration", "Action": "get_status" })
        );

        let message = OutboundMessage::calibration_directed(CalibrationAction::ReRun, Direction::Left);
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "Name": "Calibration", "Action": "re-run", "Direction": "left" })
        );
    }

    #[test]
    fn test_submit_measurements_shape() {
        let mut distances = BTreeMap::new();
        distances.insert("d1".to_string(), Some(12));
        distances.insert("d2".to_string(), None);
        let message = OutboundMessage::Calibration(CalibrationRequest {
            action: CalibrationAction::SubmitMeasurements,
            direction: Some(Direction::Right),
            distances: Some(distances),
        });
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "Name": "Calibration",
                "Action": "submit_measurements",
                "Direction": "right",
                "Distances": { "d1": 12, "d2": null }
            })
        );
    }

    #[test]
    fn test_control_maneuver_shape() {
        let message = OutboundMessage::Control {
            value: ControlManeuver {
                time: 2.0,
                speed: 20.0,
                steer: -5.0,
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "Name": "Control", "Value": { "Time": 2.0, "Speed": 20.0, "Steer": -5.0 } })
        );
    }

    #[test]
    fn test_messages_decode_back() {
        let value = json!({ "Name": "Calibration", "Action": "test_run", "Direction": "left" });
        let message: OutboundMessage = serde_json::from_value(value).unwrap();
        assert_eq!(
            message.calibration_action(),
            Some(CalibrationAction::TestRun)
        );
    }
}
