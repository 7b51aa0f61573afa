//! Duplex channel to the voice agent
//!
//! A [`Connector`] opens one connection per session and reports everything
//! that happens on it as [`TransportEvent`]s tagged with the connection id, so
//! events from a connection the session already dropped are recognisable.

pub mod protocol;
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};
pub use websocket::WebSocketConnector;

use crate::config::ServerConfig;
use crate::{Result, VoxError};
use reqwest::Url;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-voice agent endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// `<ws_base>/ws/voice/<voice_id>`, with the token as `authorization` query parameter
    pub fn new(server: &ServerConfig, voice_id: u64) -> Result<Self> {
        let raw = format!("{}/ws/voice/{}", server.ws_base(), voice_id);
        let mut url = Url::parse(&raw)
            .map_err(|e| VoxError::ConfigError(format!("Invalid endpoint {}: {}", raw, e)))?;
        if let Some(token) = server.token.as_deref().filter(|t| !t.is_empty()) {
            url.query_pairs_mut()
                .append_pair("authorization", &format!("Bearer {}", token));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// URL safe for logs (credential stripped)
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.to_string()
    }
}

/// What happened on a connection
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The channel is open
    Ready,
    Message(ServerMessage),
    /// One reply audio payload
    Binary(Vec<u8>),
    /// The channel failed; a Closed event follows
    Error(String),
    Closed,
}

/// Frames queued for the writer
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Audio(Vec<u8>),
    Control(ClientMessage),
    Close,
}

/// Where a connection reports its events
#[derive(Clone, Debug)]
pub struct EventSink {
    connection: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub fn new(connection: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Report an event; false once the session is gone
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.connection, event)).is_ok()
    }
}

/// Session side of an open connection
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound }
    }

    /// Transmit one audio segment as a binary frame
    pub fn send_audio(&self, bytes: Vec<u8>) -> Result<()> {
        self.send(Outbound::Audio(bytes))
    }

    pub fn send_control(&self, message: ClientMessage) -> Result<()> {
        self.send(Outbound::Control(message))
    }

    /// Ask the writer to close the channel; safe on an already closed channel
    pub fn close(&self) {
        if self.send(Outbound::Close).is_err() {
            debug!("Transport already closed");
        }
    }

    fn send(&self, frame: Outbound) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| VoxError::TransportError("Connection is closed".into()))
    }
}

/// Opens connections to the agent
pub trait Connector {
    /// Start connecting to `endpoint`
    ///
    /// Returns immediately. `Ready` is reported on `events` once the channel is
    /// open, or `Error` then `Closed` if it cannot be opened.
    fn connect(&self, endpoint: &Endpoint, events: EventSink) -> Result<TransportHandle>;
}
