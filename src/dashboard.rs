//! The single-threaded owner of everything the dashboard does.

use std::{collections::HashMap, time::Instant};

use log::debug;
use serde_json::Value;

use crate::TeledashError;
use crate::calibration::CalibrationSession;
use crate::connection::{ConnectionSupervisor, MessageSink, Transport};
use crate::drive::{DriveKey, ManualDrive};
use crate::protocol::inbound::TelemetryChannel;
use crate::protocol::{DrivingMode, Frame, InboundEvent, KlState, OutboundMessage};

/// Latest value seen on each telemetry channel plus session liveness.
#[derive(Debug, Default)]
pub struct TelemetrySnapshot {
    values: HashMap<TelemetryChannel, Value>,
    pub session_access: Option<bool>,
    pub serial_connection_state: Option<Value>,
    pub settings_table: Option<Value>,
    pub enabled_buttons: Option<Value>,
    pub last_heartbeat: Option<Instant>,
    pub heartbeat_lost: bool,
}

impl TelemetrySnapshot {
    pub fn get(&self, channel: TelemetryChannel) -> Option<&Value> {
        self.values.get(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = (&TelemetryChannel, &Value)> {
        self.values.iter()
    }

    /// Folds `event` into the snapshot. Returns false for events that carry no
    /// telemetry.
    pub fn apply(&mut self, event: &InboundEvent, now: Instant) -> bool {
        match event {
            InboundEvent::Telemetry { channel, value } => {
                self.values.insert(*channel, value.clone());
            }
            InboundEvent::SessionAccess(granted) => self.session_access = Some(*granted),
            InboundEvent::SerialConnectionState(state) => {
                self.serial_connection_state = Some(state.clone())
            }
            InboundEvent::Heartbeat => {
                self.last_heartbeat = Some(now);
                self.heartbeat_lost = false;
            }
            InboundEvent::HeartbeatDisconnect => self.heartbeat_lost = true,
            InboundEvent::SettingsTable(table) => self.settings_table = Some(table.clone()),
            InboundEvent::EnableButton(value) => self.enabled_buttons = Some(value.clone()),
            InboundEvent::Calibration(_) | InboundEvent::Unhandled { .. } => return false,
        }
        true
    }
}

/// Routes backend events to the telemetry snapshot and to the calibration session, when
/// one is open, and operator actions to the backend.
pub struct Dashboard<T: Transport> {
    supervisor: ConnectionSupervisor<T>,
    calibration: Option<CalibrationSession>,
    drive: ManualDrive,
    telemetry: TelemetrySnapshot,
}

impl<T: Transport> Dashboard<T> {
    pub fn new(supervisor: ConnectionSupervisor<T>) -> Self {
        Self {
            supervisor,
            calibration: None,
            drive: ManualDrive::default(),
            telemetry: TelemetrySnapshot::default(),
        }
    }

    pub fn start(&mut self) {
        self.supervisor.connect();
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<T> {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut ConnectionSupervisor<T> {
        &mut self.supervisor
    }

    pub fn telemetry(&self) -> &TelemetrySnapshot {
        &self.telemetry
    }

    pub fn drive(&self) -> &ManualDrive {
        &self.drive
    }

    pub fn calibration(&self) -> Option<&CalibrationSession> {
        self.calibration.as_ref()
    }

    /// Advances everything to `now` and returns the events received since the last
    /// tick.
    pub fn tick(&mut self, now: Instant) -> Vec<InboundEvent> {
        let events = self.supervisor.poll(now);
        for event in &events {
            if self.telemetry.apply(event, now) {
                continue;
            }
            match event {
                InboundEvent::Calibration(calibration_event) => match self.calibration.as_mut() {
                    Some(session) => {
                        session.handle_event(calibration_event, now, &mut self.supervisor)
                    }
                    None => debug!("No calibration session, dropping {:?}", calibration_event),
                },
                InboundEvent::Unhandled { channel, .. } => {
                    debug!("Unhandled event on channel {}", channel)
                }
                _ => {}
            }
        }
        if let Some(session) = self.calibration.as_mut() {
            session.poll(now);
        }
        self.drive.tick(now, &mut self.supervisor);
        events
    }

    pub fn send(&mut self, message: OutboundMessage) {
        self.supervisor.send(message);
    }

    pub fn request_settings_table(&mut self) {
        self.supervisor.send_frame(Frame::load_table());
    }

    pub fn save_settings_table(&mut self, table: Value) {
        self.supervisor.send_frame(Frame::save_table(table));
    }

    pub fn request_serial_connection_state(&mut self) {
        self.supervisor
            .send(OutboundMessage::GetCurrentSerialConnectionState);
    }

    pub fn set_kl(&mut self, kl: KlState) {
        self.drive.set_kl(kl, &mut self.supervisor);
    }

    pub fn set_driving_mode(&mut self, mode: DrivingMode) {
        self.drive.set_mode(mode, &mut self.supervisor);
    }

    pub fn key_down(&mut self, key: DriveKey) {
        self.drive.key_down(key, &mut self.supervisor);
    }

    pub fn key_up(&mut self, key: DriveKey, now: Instant) {
        self.drive.key_up(key, now);
    }

    pub fn brake(&mut self) {
        self.drive.brake(&mut self.supervisor);
    }

    /// Opens a fresh calibration session, replacing any open one.
    pub fn open_calibration(&mut self) -> &mut CalibrationSession {
        self.exit_calibration();
        let mut session = CalibrationSession::default();
        session.open(self.drive.kl(), &mut self.supervisor);
        self.drive.note_kl(KlState::Run);
        self.calibration.insert(session)
    }

    /// Runs `f` against the open calibration session.
    pub fn with_calibration<R>(
        &mut self,
        f: impl FnOnce(&mut CalibrationSession, &mut dyn MessageSink) -> R,
    ) -> Result<R, TeledashError> {
        let session = self
            .calibration
            .as_mut()
            .ok_or(TeledashError::NoCalibrationSession)?;
        Ok(f(session, &mut self.supervisor))
    }

    /// Abandons the open calibration session, if any. Late events for it are dropped.
    pub fn exit_calibration(&mut self) {
        if let Some(mut session) = self.calibration.take() {
            let previous_kl = session.previous_kl();
            session.exit(&mut self.supervisor);
            self.drive.note_kl(previous_kl);
        }
    }

    pub fn complete_calibration(&mut self) -> Result<(), TeledashError> {
        let mut session = self
            .calibration
            .take()
            .ok_or(TeledashError::NoCalibrationSession)?;
        let previous_kl = session.previous_kl();
        session.complete(&mut self.supervisor)?;
        self.drive.note_kl(previous_kl);
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.exit_calibration();
        self.drive.shutdown();
        self.supervisor.shutdown();
    }
}
