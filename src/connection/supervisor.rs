use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, Sender},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::protocol::{Frame, InboundEvent, OutboundMessage};
use crate::schedule::Interval;
use crate::transcript::TranscriptEntry;

use super::{ConnectionStatus, MessageSink, StatusBroadcaster, Transport, TransportEvent};

pub const RECONNECT_INTERVAL_MS: u64 = 2000;

/// What `send` does with a message while there is no connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendPolicy {
    /// Discard it.
    #[default]
    Drop,
    /// Keep up to `capacity` messages and flush them in order once connected. The oldest
    /// message is discarded when the queue is full.
    Queue { capacity: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SupervisorConfig {
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Option<Duration>,
    pub send_policy: SendPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(RECONNECT_INTERVAL_MS),
            heartbeat_interval: None,
            send_policy: SendPolicy::Drop,
        }
    }
}

/// Owns the single logical connection to the backend.
///
/// The supervisor never blocks and never returns transport failures to its callers:
/// they become [`ConnectionStatus`] transitions, and while the link is down a reconnect
/// attempt is made on every tick of the reconnect interval. All of it is driven by
/// [`ConnectionSupervisor::poll`].
pub struct ConnectionSupervisor<T: Transport> {
    transport: T,
    config: SupervisorConfig,
    status: ConnectionStatus,
    broadcaster: StatusBroadcaster,
    reconnect_timer: Interval,
    heartbeat_timer: Option<Interval>,
    queue: VecDeque<OutboundMessage>,
    reconnect_attempts: usize,
    transcript: Option<Sender<TranscriptEntry>>,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(transport: T, config: SupervisorConfig) -> Self {
        let reconnect_timer = Interval::new(config.reconnect_interval);
        let heartbeat_timer = config.heartbeat_interval.map(Interval::new);
        Self {
            transport,
            config,
            status: ConnectionStatus::Disconnected,
            broadcaster: StatusBroadcaster::new(ConnectionStatus::Disconnected),
            reconnect_timer,
            heartbeat_timer,
            queue: VecDeque::new(),
            reconnect_attempts: 0,
            transcript: None,
        }
    }

    /// Records every frame sent or received through `transcript`.
    pub fn with_transcript(mut self, transcript: Sender<TranscriptEntry>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Opens the connection unless it is already open or being opened.
    pub fn connect(&mut self) {
        if self.transport.is_connected() || self.transport.is_connecting() {
            debug!("connect() ignored, connection already {}", self.status);
            return;
        }
        self.transport.open();
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.status
    }

    /// A new subscription to status transitions. Only transitions that happen after this
    /// call are delivered.
    pub fn status_changes(&mut self) -> Receiver<ConnectionStatus> {
        self.broadcaster.subscribe()
    }

    /// Starts a fresh connection attempt whatever the current state is.
    pub fn reconnect(&mut self) {
        self.reconnect_attempts += 1;
        debug!("Reconnect attempt {}", self.reconnect_attempts);
        if self.status == ConnectionStatus::Connected {
            self.set_status(ConnectionStatus::Disconnected);
        }
        self.transport.open();
    }

    pub fn reconnect_attempts(&self) -> usize {
        self.reconnect_attempts
    }

    pub fn start_auto_reconnect(&mut self, now: Instant) {
        self.reconnect_timer.start(now);
    }

    pub fn stop_auto_reconnect(&mut self) {
        self.reconnect_timer.stop();
    }

    pub fn is_auto_reconnecting(&self) -> bool {
        self.reconnect_timer.is_running()
    }

    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    /// Fire-and-forget delivery of `message`. While disconnected the configured
    /// [`SendPolicy`] decides what happens to it.
    pub fn send(&mut self, message: OutboundMessage) {
        if self.status != ConnectionStatus::Connected {
            match self.config.send_policy {
                SendPolicy::Drop => {
                    warn!("Not connected, dropping message {:?}", message);
                }
                SendPolicy::Queue { capacity } => {
                    self.queue.push_back(message);
                    while self.queue.len() > capacity {
                        if let Some(dropped) = self.queue.pop_front() {
                            warn!("Send queue full, dropping message {:?}", dropped);
                        }
                    }
                }
            }
            return;
        }
        self.write_message(&message);
    }

    /// Sends a raw frame, such as the settings table on its own channel. Frames are
    /// never queued.
    pub fn send_frame(&mut self, frame: Frame) {
        if self.status != ConnectionStatus::Connected {
            warn!("Not connected, dropping frame on channel {}", frame.channel);
            return;
        }
        self.write_frame(frame);
    }

    fn write_message(&mut self, message: &OutboundMessage) {
        match Frame::message(message) {
            Ok(frame) => self.write_frame(frame),
            Err(e) => error!("Could not encode {:?}: {}", message, e),
        }
    }

    fn write_frame(&mut self, frame: Frame) {
        if let Err(e) = self.transport.send(&frame) {
            warn!("Could not send frame on channel {}: {}", frame.channel, e);
            return;
        }
        self.record(TranscriptEntry::outbound(frame));
    }

    fn record(&mut self, entry: TranscriptEntry) {
        if let Some(transcript) = &self.transcript {
            if let Err(e) = transcript.send(entry) {
                warn!("Transcript writer went away, no longer recording: {}", e);
                self.transcript = None;
            }
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        if self.broadcaster.publish(status) {
            info!("Backend connection is now {}", status);
        }
    }

    /// Advances the supervisor to `now`: applies transport events, runs the reconnect and
    /// heartbeat timers, and returns the inbound events received since the last call.
    pub fn poll(&mut self, now: Instant) -> Vec<InboundEvent> {
        let mut inbound = Vec::new();
        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected => {
                    self.set_status(ConnectionStatus::Connected);
                    self.reconnect_timer.stop();
                    if let Some(heartbeat) = self.heartbeat_timer.as_mut() {
                        heartbeat.start(now);
                    }
                    self.flush_queue();
                }
                TransportEvent::Disconnected => {
                    self.set_status(ConnectionStatus::Disconnected);
                    self.on_link_lost(now);
                }
                TransportEvent::ConnectError(reason) => {
                    debug!("Connection attempt failed: {}", reason);
                    self.set_status(ConnectionStatus::Error);
                    self.on_link_lost(now);
                }
                TransportEvent::Frame(frame) => {
                    self.record(TranscriptEntry::inbound(frame.clone()));
                    inbound.push(InboundEvent::from_frame(frame));
                }
            }
        }

        if self.reconnect_timer.poll(now) && self.status != ConnectionStatus::Connected {
            self.reconnect();
        }

        let heartbeat_due = self
            .heartbeat_timer
            .as_mut()
            .is_some_and(|heartbeat| heartbeat.poll(now));
        if heartbeat_due && self.status == ConnectionStatus::Connected {
            self.write_message(&OutboundMessage::Heartbeat);
        }

        inbound
    }

    fn on_link_lost(&mut self, now: Instant) {
        if let Some(heartbeat) = self.heartbeat_timer.as_mut() {
            heartbeat.stop();
        }
        self.reconnect_timer.start(now);
    }

    fn flush_queue(&mut self) {
        if !self.queue.is_empty() {
            debug!("Flushing {} queued messages", self.queue.len());
        }
        while let Some(message) = self.queue.pop_front() {
            self.write_message(&message);
        }
    }

    /// Stops every timer and closes the transport. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.reconnect_timer.stop();
        if let Some(heartbeat) = self.heartbeat_timer.as_mut() {
            heartbeat.stop();
        }
        self.transport.close();
        if self.status != ConnectionStatus::Disconnected {
            self.set_status(ConnectionStatus::Disconnected);
        }
    }
}

impl<T: Transport> MessageSink for ConnectionSupervisor<T> {
    fn send(&mut self, message: OutboundMessage) {
        ConnectionSupervisor::send(self, message);
    }
}

impl<T: Transport> Drop for ConnectionSupervisor<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
