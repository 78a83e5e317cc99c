use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calibration::spline::{CurveData, LimitPoints};

use super::Frame;

/// Periodic telemetry channels. Their payloads are kept as raw JSON; displaying them is
/// left to whoever consumes the snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryChannel {
    BatteryLvl,
    CurrentSpeed,
    CurrentSteer,
    SteeringLimits,
    InstantConsumption,
    Location,
    Semaphores,
    WarningSignal,
    CpuChannel,
    MemoryChannel,
    ResourceMonitor,
    SerialCamera,
}

impl TelemetryChannel {
    pub const ALL: [TelemetryChannel; 12] = [
        Self::BatteryLvl,
        Self::CurrentSpeed,
        Self::CurrentSteer,
        Self::SteeringLimits,
        Self::InstantConsumption,
        Self::Location,
        Self::Semaphores,
        Self::WarningSignal,
        Self::CpuChannel,
        Self::MemoryChannel,
        Self::ResourceMonitor,
        Self::SerialCamera,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::BatteryLvl => "BatteryLvl",
            Self::CurrentSpeed => "CurrentSpeed",
            Self::CurrentSteer => "CurrentSteer",
            Self::SteeringLimits => "SteeringLimits",
            Self::InstantConsumption => "InstantConsumption",
            Self::Location => "Location",
            Self::Semaphores => "Semaphores",
            Self::WarningSignal => "WarningSignal",
            Self::CpuChannel => "cpu_channel",
            Self::MemoryChannel => "memory_channel",
            Self::ResourceMonitor => "ResourceMonitor",
            Self::SerialCamera => "serialCamera",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Calibration notifications, discriminated by their `action` field.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CalibrationEvent {
    /// Steering angle in degrees the next run will test.
    CurrentAngle { data: f64 },
    /// Speed in mm/s the next backward run will use.
    CurrentSpeed { data: f64 },
    CalibrationDone,
    MeasurementsReceived,
    DirectionSequenceDone,
    CalibrationRunDone {
        #[serde(default)]
        corrected_steer: Option<f64>,
    },
    CalibrationStatus {
        #[serde(default)]
        left: bool,
        #[serde(default)]
        right: bool,
        #[serde(default)]
        backward: bool,
        #[serde(default)]
        test_run: bool,
    },
    TestRunDone,
    CalibrationSaved {
        #[serde(default)]
        success: bool,
        /// Base64 zip of the generated calibration sources.
        #[serde(rename = "zipData", default)]
        zip_data: Option<String>,
    },
    PolynomialData {
        #[serde(rename = "hasData", default)]
        has_data: bool,
        #[serde(rename = "speedData", default)]
        speed_data: Option<CurveData>,
        #[serde(rename = "steerData", default)]
        steer_data: Option<CurveData>,
        #[serde(rename = "limitPointsData", default)]
        limit_points_data: Option<LimitPoints>,
    },
    ZeroOffsetSplineData {
        #[serde(rename = "zeroOffsetData", default)]
        zero_offset_data: Option<CurveData>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    SessionAccess(bool),
    SerialConnectionState(Value),
    Heartbeat,
    HeartbeatDisconnect,
    Telemetry {
        channel: TelemetryChannel,
        value: Value,
    },
    /// Settings table snapshot (`loadBack`).
    SettingsTable(Value),
    Calibration(CalibrationEvent),
    EnableButton(Value),
    Unhandled {
        channel: String,
        data: Value,
    },
}

/// Backend payloads wrap their content as `{"value": ..}` or `{"data": ..}`.
fn unwrap_payload(data: Value) -> Value {
    match data {
        Value::Object(mut map) => {
            if let Some(value) = map.remove("value") {
                value
            } else if let Some(value) = map.remove("data") {
                value
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

impl InboundEvent {
    pub fn from_frame(frame: Frame) -> Self {
        let Frame { channel, data } = frame;
        match channel.as_str() {
            "session_access" => {
                Self::SessionAccess(unwrap_payload(data).as_bool().unwrap_or(false))
            }
            "current_serial_connection_state" => Self::SerialConnectionState(unwrap_payload(data)),
            "heartbeat" => Self::Heartbeat,
            "heartbeat_disconnect" => Self::HeartbeatDisconnect,
            "loadBack" => Self::SettingsTable(unwrap_payload(data)),
            "EnableButton" => Self::EnableButton(unwrap_payload(data)),
            "Calibration" => match serde_json::from_value::<CalibrationEvent>(data.clone()) {
                Ok(event) => Self::Calibration(event),
                Err(e) => {
                    debug!("Ignoring malformed calibration event {}: {}", data, e);
                    Self::Unhandled { channel, data }
                }
            },
            name => match TelemetryChannel::from_name(name) {
                Some(channel) => Self::Telemetry {
                    channel,
                    value: unwrap_payload(data),
                },
                None => Self::Unhandled { channel, data },
            },
        }
    }
}
