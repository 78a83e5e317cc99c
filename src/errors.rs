// Error types for teledash

use snafu::Snafu;
use std::io;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Snafu)]
pub enum TeledashError {
    // Errors for the backend transport
    #[snafu(display("Unable to connect to backend at {url}"))]
    BackendConnectError {
        url: String,
        source: Box<tungstenite::Error>,
    },
    #[snafu(display("Backend at {url} did not answer within {timeout_ms}ms"))]
    BackendConnectTimeout { url: String, timeout_ms: u64 },
    #[snafu(display("Unable to start the backend link runtime"))]
    LinkRuntimeError { source: io::Error },
    #[snafu(display("Error writing frame to backend"))]
    TransportWriteError { source: Box<tungstenite::Error> },
    #[snafu(display("Transport is not connected"))]
    TransportNotConnected,

    // Protocol errors
    #[snafu(display("Error encoding outbound message"))]
    MessageEncodeError { source: serde_json::Error },
    #[snafu(display("Error decoding frame: {text}"))]
    FrameDecodeError {
        text: String,
        source: serde_json::Error,
    },

    // Calibration wizard errors
    #[snafu(display("Navigation target does not exist: {target}"))]
    InvalidNavigationTarget { target: String },
    #[snafu(display("Step index {index} is out of range"))]
    StepOutOfRange { index: usize },
    #[snafu(display("No button {index} on the current step"))]
    UnknownButton { index: usize },
    #[snafu(display("Button '{text}' is disabled while a calibration run is in progress"))]
    ButtonDisabledDuringRun { text: String },
    #[snafu(display("Button '{text}' needs other calibration phases to be completed first"))]
    ButtonGated { text: String },
    #[snafu(display("A measurement submission is already waiting for the backend"))]
    SubmissionPending,
    #[snafu(display("Invalid user input: {field} - {reason}"))]
    InvalidUserInput { field: String, reason: String },
    #[snafu(display("No calibration session is open"))]
    NoCalibrationSession,
    #[snafu(display("A calibration session needs at least one step"))]
    NoCalibrationSteps,

    // Errors for the transcript writer
    #[snafu(display("Error writing transcript file"))]
    TranscriptWriterError { source: io::Error },
    #[snafu(display("Error loading transcript file"))]
    TranscriptLoaderError { source: io::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // CLI errors
    #[snafu(display("Could not set Ctrl-C handler: {description}"))]
    SignalHandlerError { description: String },

    // Calibration archive errors
    #[snafu(display("Calibration archive is not valid base64"))]
    ArchiveDecodeError { source: base64::DecodeError },
    #[snafu(display("Error writing calibration archive"))]
    ArchiveWriteError { source: io::Error },
}
