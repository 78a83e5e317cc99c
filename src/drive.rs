//! Vehicle state switches and manual driving.

use std::time::{Duration, Instant};

use log::debug;

use crate::connection::MessageSink;
use crate::protocol::{DrivingMode, KlState, OutboundMessage};
use crate::schedule::Interval;

pub const SPEED_INCREMENT: f64 = 5.0;
pub const MAX_SPEED: f64 = 50.0;
pub const STEER_INCREMENT: f64 = 2.5;
pub const MAX_STEER: f64 = 25.0;
pub const STEER_DECAY_MS: u64 = 100;

/// Manual drive keys (`w`, `s`, `a`, `d`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveKey {
    Faster,
    Slower,
    SteerLeft,
    SteerRight,
}

impl DriveKey {
    pub fn from_char(key: char) -> Option<Self> {
        match key {
            'w' => Some(Self::Faster),
            's' => Some(Self::Slower),
            'a' => Some(Self::SteerLeft),
            'd' => Some(Self::SteerRight),
            _ => None,
        }
    }

    fn steers(&self) -> bool {
        matches!(self, Self::SteerLeft | Self::SteerRight)
    }
}

/// Setpoints go out ×10 as integer strings.
fn scaled(value: f64) -> String {
    ((value * 10.0).round() as i64).to_string()
}

/// KL state, driving mode and the manual speed/steer setpoints.
///
/// Speed keys act once per press; steering repeats while held. When no steering key is
/// held, steering returns to centre by one increment per decay tick.
#[derive(Debug)]
pub struct ManualDrive {
    kl: KlState,
    mode: DrivingMode,
    speed: f64,
    steer: f64,
    faster_held: bool,
    slower_held: bool,
    steer_held: bool,
    steer_decay: Interval,
}

impl Default for ManualDrive {
    fn default() -> Self {
        Self::new(Duration::from_millis(STEER_DECAY_MS))
    }
}

impl ManualDrive {
    pub fn new(steer_decay_period: Duration) -> Self {
        Self {
            kl: KlState::Off,
            mode: DrivingMode::Stop,
            speed: 0.0,
            steer: 0.0,
            faster_held: false,
            slower_held: false,
            steer_held: false,
            steer_decay: Interval::new(steer_decay_period),
        }
    }

    pub fn kl(&self) -> KlState {
        self.kl
    }

    pub fn mode(&self) -> DrivingMode {
        self.mode
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn steer(&self) -> f64 {
        self.steer
    }

    pub fn is_decaying(&self) -> bool {
        self.steer_decay.is_running()
    }

    pub fn set_kl(&mut self, kl: KlState, sink: &mut dyn MessageSink) {
        self.kl = kl;
        sink.send(OutboundMessage::Klem { value: kl });
    }

    /// Records a KL change made elsewhere without sending anything.
    pub fn note_kl(&mut self, kl: KlState) {
        self.kl = kl;
    }

    /// Switches driving mode. Leaving manual mode zeroes both setpoints first.
    pub fn set_mode(&mut self, mode: DrivingMode, sink: &mut dyn MessageSink) {
        if self.mode == DrivingMode::Manual && mode != DrivingMode::Manual {
            self.reset_speed(sink);
            self.reset_steer(sink);
            self.faster_held = false;
            self.slower_held = false;
            self.steer_held = false;
            self.steer_decay.stop();
        }
        self.mode = mode;
        sink.send(OutboundMessage::DrivingMode { value: mode });
    }

    pub fn key_down(&mut self, key: DriveKey, sink: &mut dyn MessageSink) {
        if self.mode != DrivingMode::Manual {
            return;
        }
        match key {
            DriveKey::Faster => {
                if !self.faster_held {
                    self.faster_held = true;
                    self.change_speed(SPEED_INCREMENT, sink);
                }
            }
            DriveKey::Slower => {
                if !self.slower_held {
                    self.slower_held = true;
                    self.change_speed(-SPEED_INCREMENT, sink);
                }
            }
            DriveKey::SteerLeft => {
                self.steer_held = true;
                self.steer_decay.stop();
                self.change_steer(-STEER_INCREMENT, sink);
            }
            DriveKey::SteerRight => {
                self.steer_held = true;
                self.steer_decay.stop();
                self.change_steer(STEER_INCREMENT, sink);
            }
        }
    }

    pub fn key_up(&mut self, key: DriveKey, now: Instant) {
        if self.mode != DrivingMode::Manual {
            return;
        }
        match key {
            DriveKey::Faster => self.faster_held = false,
            DriveKey::Slower => self.slower_held = false,
            _ if key.steers() => {
                self.steer_held = false;
                if self.steer != 0.0 {
                    self.steer_decay.start(now);
                }
            }
            _ => {}
        }
    }

    /// Runs the steering decay. Stops itself once steering is centred.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn MessageSink) {
        if !self.steer_decay.poll(now) || self.steer_held {
            return;
        }
        let step = STEER_INCREMENT.min(self.steer.abs());
        let delta = if self.steer > 0.0 { -step } else { step };
        self.change_steer(delta, sink);
        if self.steer == 0.0 {
            debug!("Steering centred");
            self.steer_decay.stop();
        }
    }

    pub fn brake(&mut self, sink: &mut dyn MessageSink) {
        self.speed = 0.0;
        sink.send(OutboundMessage::Brake);
    }

    pub fn shutdown(&mut self) {
        self.steer_decay.stop();
    }

    fn change_speed(&mut self, delta: f64, sink: &mut dyn MessageSink) {
        self.speed = (self.speed + delta).clamp(-MAX_SPEED, MAX_SPEED);
        sink.send(OutboundMessage::SpeedMotor {
            value: scaled(self.speed),
        });
    }

    fn change_steer(&mut self, delta: f64, sink: &mut dyn MessageSink) {
        self.steer = (self.steer + delta).clamp(-MAX_STEER, MAX_STEER);
        sink.send(OutboundMessage::SteerMotor {
            value: scaled(self.steer),
        });
    }

    fn reset_speed(&mut self, sink: &mut dyn MessageSink) {
        self.speed = 0.0;
        sink.send(OutboundMessage::SpeedMotor { value: scaled(0.0) });
    }

    fn reset_steer(&mut self, sink: &mut dyn MessageSink) {
        self.steer = 0.0;
        sink.send(OutboundMessage::SteerMotor { value: scaled(0.0) });
    }
}

impl Drop for ManualDrive {
    fn drop(&mut self) {
        self.shutdown();
    }
}
