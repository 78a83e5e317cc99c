//! Messages exchanged with the vehicle backend.
//!
//! Everything travels as a [`Frame`]: a channel name plus a JSON payload. Outbound
//! commands go out on the `message` channel (the settings table uses `save`/`load`),
//! inbound notifications arrive on a channel named after the event.

pub mod inbound;
pub mod outbound;

use serde::{Deserialize, Serialize};

use crate::TeledashError;

pub use inbound::{CalibrationEvent, InboundEvent};
pub use outbound::{
    CalibrationAction, CalibrationRequest, ControlManeuver, Direction, DrivingMode, KlState,
    OutboundMessage,
};

pub const MESSAGE_CHANNEL: &str = "message";
pub const SAVE_CHANNEL: &str = "save";
pub const LOAD_CHANNEL: &str = "load";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(channel: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            data,
        }
    }

    pub fn message(message: &OutboundMessage) -> Result<Self, TeledashError> {
        let data = serde_json::to_value(message)
            .map_err(|e| TeledashError::MessageEncodeError { source: e })?;
        Ok(Self::new(MESSAGE_CHANNEL, data))
    }

    /// Persists the settings table on the backend.
    pub fn save_table(table: serde_json::Value) -> Self {
        Self::new(SAVE_CHANNEL, table)
    }

    /// Asks the backend for the settings table; the answer arrives as `loadBack`.
    pub fn load_table() -> Self {
        Self::new(LOAD_CHANNEL, serde_json::json!({ "Name": "load" }))
    }

    /// The outbound message carried by this frame, if it is one.
    pub fn as_message(&self) -> Option<OutboundMessage> {
        if self.channel != MESSAGE_CHANNEL {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// The JSON text carried by one WebSocket message.
    pub fn to_text(&self) -> Result<String, TeledashError> {
        serde_json::to_string(self).map_err(|e| TeledashError::MessageEncodeError { source: e })
    }

    pub fn from_text(text: &str) -> Result<Self, TeledashError> {
        serde_json::from_str(text).map_err(|e| TeledashError::FrameDecodeError {
            text: text.to_string(),
            source: e,
        })
    }
}
