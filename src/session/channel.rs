use crate::protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};
use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

/// Something read from the client side of the channel
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ClientMessage),
    Invalid(ProtocolError),
    Disconnected,
}

/// Something to write to the client, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Message(ServerMessage),
    /// One complete encoded audio frame
    Frame(Vec<u8>),
}

/// Ordered writer half of a channel
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Outgoing>,
}

impl Outbound {
    pub fn new(tx: mpsc::Sender<Outgoing>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, message: ServerMessage) -> Result<()> {
        debug!("-> {}", message.kind());
        self.tx
            .send(Outgoing::Message(message))
            .await
            .map_err(|_| anyhow!("channel closed"))
    }

    pub async fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        debug!("-> frame ({} bytes)", frame.len());
        self.tx
            .send(Outgoing::Frame(frame))
            .await
            .map_err(|_| anyhow!("channel closed"))
    }

    pub async fn send_error(&self, code: ErrorCode, message: impl Into<String>) -> Result<()> {
        self.send(ServerMessage::error(code, message)).await
    }

    pub async fn pong(&self, ts: Option<i64>) -> Result<()> {
        let ts = ts.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        self.send(ServerMessage::Pong { ts }).await
    }
}

/// Why a running session should stop at the current safe point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    CloseRequested,
    Disconnected,
}

/// Both halves of one client channel
pub struct ChannelLink {
    inbound: mpsc::Receiver<Inbound>,
    pub outbound: Outbound,
    /// Requests that arrived while a session was running
    deferred: VecDeque<ClientMessage>,
}

impl ChannelLink {
    pub fn new(inbound: mpsc::Receiver<Inbound>, outbound: Outbound) -> Self {
        Self {
            inbound,
            outbound,
            deferred: VecDeque::new(),
        }
    }

    /// In-process channel pair: returns the link plus the client's ends
    pub fn pair(buffer: usize) -> (Self, mpsc::Sender<Inbound>, mpsc::Receiver<Outgoing>) {
        let (in_tx, in_rx) = mpsc::channel(buffer);
        let (out_tx, out_rx) = mpsc::channel(buffer);
        (Self::new(in_rx, Outbound::new(out_tx)), in_tx, out_rx)
    }

    /// Next thing to handle: deferred requests first, then the wire
    pub async fn next(&mut self) -> Inbound {
        if let Some(message) = self.deferred.pop_front() {
            return Inbound::Message(message);
        }
        self.inbound.recv().await.unwrap_or(Inbound::Disconnected)
    }

    /// Drain whatever arrived while the session was busy, without waiting.
    ///
    /// Pings are answered and protocol errors reported on the spot; `close`
    /// or a disconnect stop the session; a second `init` is refused; replay
    /// and nack requests wait until the session is done.
    pub async fn poll_control(&mut self) -> Result<Option<StopReason>> {
        loop {
            let inbound = match self.inbound.try_recv() {
                Ok(inbound) => inbound,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Ok(Some(StopReason::Disconnected)),
            };

            match inbound {
                Inbound::Disconnected => return Ok(Some(StopReason::Disconnected)),
                Inbound::Invalid(err) => self.outbound.send(err.to_message()).await?,
                Inbound::Message(message) => match message {
                    ClientMessage::Close {} => return Ok(Some(StopReason::CloseRequested)),
                    ClientMessage::Ping { ts } => self.outbound.pong(ts).await?,
                    ClientMessage::Init(_) => {
                        self.outbound
                            .send_error(ErrorCode::SessionBusy, "A guide is already streaming on this channel")
                            .await?
                    }
                    other => self.deferred.push_back(other),
                },
            }
        }
    }
}
