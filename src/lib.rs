// Library interface for teledash
// This allows integration tests and benches to access internal modules

pub mod archive;
pub mod calibration;
pub mod config;
pub mod connection;
pub mod dashboard;
pub mod drive;
pub mod errors;
pub mod protocol;
pub mod schedule;
pub mod transcript;

// Re-export commonly used types
pub use calibration::{CalibrationSession, CompletionFlags, Phase, PhaseState};
pub use connection::{ConnectionStatus, ConnectionSupervisor, SupervisorConfig};
pub use dashboard::Dashboard;
pub use errors::TeledashError;
pub use protocol::{CalibrationEvent, Frame, InboundEvent, OutboundMessage};
