use std::{
    collections::VecDeque,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_tungstenite::tungstenite::Message;

use crate::TeledashError;
use crate::protocol::Frame;

use super::TransportEvent;

/// Bounds name resolution, the TCP connect and the upgrade handshake together.
const CONNECT_TIMEOUT_MS: u64 = 1500;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A bidirectional frame channel to the backend.
///
/// Implementations never block the caller: `open` only starts an attempt and its
/// outcome shows up later in `poll_events`, and `send` only hands the frame over.
pub trait Transport {
    /// Starts a new connection attempt, abandoning the current link if there is one.
    fn open(&mut self);

    /// Closes the current link without reporting a `Disconnected` event.
    fn close(&mut self);

    fn is_connected(&self) -> bool;

    fn is_connecting(&self) -> bool;

    /// Queues one frame for the backend. Fails when there is no link.
    fn send(&mut self, frame: &Frame) -> Result<(), TeledashError>;

    /// Drains everything that happened since the previous call, in order.
    fn poll_events(&mut self) -> Vec<TransportEvent>;
}

enum LinkMessage {
    Established(u64),
    Failed(u64, String),
    Frame(u64, Frame),
    Closed(u64),
}

/// `host:port` becomes `ws://host:port/`, anything that already names a WebSocket
/// scheme is used as is.
pub fn backend_url(addr: &str) -> String {
    if addr.starts_with("ws://") || addr.starts_with("wss://") {
        addr.to_string()
    } else {
        format!("ws://{}/", addr)
    }
}

/// JSON frames carried as WebSocket text messages.
///
/// Every link lives on its own thread running a single-threaded tokio runtime. The
/// owner only pushes frames into the link's queue, and whatever the link observes comes
/// back through a channel tagged with the link generation.
pub struct WsTransport {
    url: String,
    outbound: Option<UnboundedSender<Message>>,
    connected: bool,
    connecting: bool,
    generation: u64,
    link_tx: Sender<LinkMessage>,
    link_rx: Receiver<LinkMessage>,
}

impl WsTransport {
    pub fn new(addr: &str) -> Self {
        let (link_tx, link_rx) = mpsc::channel();
        Self {
            url: backend_url(addr),
            outbound: None,
            connected: false,
            connecting: false,
            generation: 0,
            link_tx,
            link_rx,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn run_link(
    url: String,
    generation: u64,
    link_tx: Sender<LinkMessage>,
    outbound: UnboundedReceiver<Message>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TeledashError::LinkRuntimeError { source: e })
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = link_tx.send(LinkMessage::Failed(generation, e.to_string()));
            return;
        }
    };
    runtime.block_on(drive_link(&url, generation, &link_tx, outbound));
}

async fn connect(url: &str) -> Result<WsStream, TeledashError> {
    let attempt = tokio_tungstenite::connect_async(url);
    match tokio::time::timeout(Duration::from_millis(CONNECT_TIMEOUT_MS), attempt).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => Err(TeledashError::BackendConnectError {
            url: url.to_string(),
            source: Box::new(e),
        }),
        Err(_) => Err(TeledashError::BackendConnectTimeout {
            url: url.to_string(),
            timeout_ms: CONNECT_TIMEOUT_MS,
        }),
    }
}

async fn drive_link(
    url: &str,
    generation: u64,
    link_tx: &Sender<LinkMessage>,
    mut outbound: UnboundedReceiver<Message>,
) {
    let stream = match connect(url).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = link_tx.send(LinkMessage::Failed(generation, e.to_string()));
            return;
        }
    };
    if link_tx.send(LinkMessage::Established(generation)).is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        warn!("{}", TeledashError::TransportWriteError { source: Box::new(e) });
                        break;
                    }
                }
                // the owner dropped this link
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match Frame::from_text(text.as_str()) {
                    Ok(frame) => {
                        if link_tx.send(LinkMessage::Frame(generation, frame)).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("Dropping undecodable frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Backend read failed: {}", e);
                    break;
                }
            },
        }
    }
    let _ = link_tx.send(LinkMessage::Closed(generation));
}

impl Transport for WsTransport {
    fn open(&mut self) {
        self.close();
        self.connecting = true;
        let (outbound_tx, outbound_rx) = unbounded_channel();
        self.outbound = Some(outbound_tx);
        let generation = self.generation;
        let url = self.url.clone();
        let link_tx = self.link_tx.clone();
        debug!("Connecting to backend at {}", url);
        thread::spawn(move || run_link(url, generation, link_tx, outbound_rx));
    }

    fn close(&mut self) {
        // dropping the queue tells the link to hang up
        self.outbound = None;
        // anything still in flight from the old link is stale from now on
        self.generation += 1;
        self.connected = false;
        self.connecting = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_connecting(&self) -> bool {
        self.connecting
    }

    fn send(&mut self, frame: &Frame) -> Result<(), TeledashError> {
        let outbound = match (&self.outbound, self.connected) {
            (Some(outbound), true) => outbound,
            _ => return Err(TeledashError::TransportNotConnected),
        };
        let text = frame.to_text()?;
        outbound
            .send(Message::Text(text.into()))
            .map_err(|_| TeledashError::TransportNotConnected)
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.link_rx.try_recv() {
            match message {
                LinkMessage::Established(generation) if generation == self.generation => {
                    info!("Connected to backend at {}", self.url);
                    self.connected = true;
                    self.connecting = false;
                    events.push(TransportEvent::Connected);
                }
                LinkMessage::Failed(generation, reason) if generation == self.generation => {
                    self.outbound = None;
                    self.connecting = false;
                    events.push(TransportEvent::ConnectError(reason));
                }
                LinkMessage::Frame(generation, frame) if generation == self.generation => {
                    events.push(TransportEvent::Frame(frame));
                }
                LinkMessage::Closed(generation) if generation == self.generation => {
                    self.outbound = None;
                    if self.connected {
                        self.connected = false;
                        events.push(TransportEvent::Disconnected);
                    }
                }
                _ => debug!("Ignoring message from a previous backend link"),
            }
        }
        events
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// A scripted transport for tests and offline replay.
///
/// Queued events are handed out by `poll_events`; frames sent while connected are
/// recorded in `sent`.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub sent: Vec<Frame>,
    pub open_attempts: usize,
    /// Queue a `Connected` event for every `open` call.
    pub accept_connections: bool,
    pending: VecDeque<TransportEvent>,
    connected: bool,
    connecting: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepting() -> Self {
        Self {
            accept_connections: true,
            ..Default::default()
        }
    }

    /// A transport that connects once and then delivers `frames` in order.
    pub fn from_frames(frames: impl IntoIterator<Item = Frame>) -> Self {
        let mut transport = Self::accepting();
        transport.pending.extend(frames.into_iter().map(TransportEvent::Frame));
        transport
    }

    pub fn push_event(&mut self, event: TransportEvent) {
        self.pending.push_back(event);
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.pending.push_back(TransportEvent::Frame(frame));
    }

    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn take_sent(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MockTransport {
    fn open(&mut self) {
        self.open_attempts += 1;
        self.connected = false;
        self.connecting = true;
        if self.accept_connections {
            self.pending.push_front(TransportEvent::Connected);
        }
    }

    fn close(&mut self) {
        self.connected = false;
        self.connecting = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn is_connecting(&self) -> bool {
        self.connecting
    }

    fn send(&mut self, frame: &Frame) -> Result<(), TeledashError> {
        if !self.connected {
            return Err(TeledashError::TransportNotConnected);
        }
        self.sent.push(frame.clone());
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let events: Vec<TransportEvent> = self.pending.drain(..).collect();
        for event in &events {
            match event {
                TransportEvent::Connected => {
                    self.connected = true;
                    self.connecting = false;
                }
                TransportEvent::Disconnected | TransportEvent::ConnectError(_) => {
                    self.connected = false;
                    self.connecting = false;
                }
                TransportEvent::Frame(_) => {}
            }
        }
        events
    }
}
