use super::channel::{ChannelLink, Inbound};
use super::controller::{SessionController, SessionEnd};
use super::replay::ReplayHandler;
use crate::protocol::{ClientMessage, ErrorCode};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Serves one client channel until it closes.
///
/// `init` starts a session; `replay` and `nack` are answered without one;
/// malformed messages are reported and the channel stays usable.
pub struct ChannelDriver {
    controller: Arc<SessionController>,
    replay: ReplayHandler,
}

impl ChannelDriver {
    pub fn new(controller: Arc<SessionController>, replay: ReplayHandler) -> Self {
        Self { controller, replay }
    }

    pub async fn run(&self, mut link: ChannelLink) {
        loop {
            let keep_open = match link.next().await {
                Inbound::Disconnected => {
                    info!("Client disconnected");
                    false
                }
                Inbound::Invalid(err) => {
                    warn!("Rejected client message: {}", err);
                    link.outbound.send(err.to_message()).await.is_ok()
                }
                Inbound::Message(message) => match self.handle(message, &mut link).await {
                    Ok(keep_open) => keep_open,
                    Err(e) => {
                        error!("Channel failed: {:#}", e);
                        let _ = link
                            .outbound
                            .send_error(ErrorCode::StreamError, e.to_string())
                            .await;
                        false
                    }
                },
            };

            if !keep_open {
                break;
            }
        }
        info!("Channel closed");
    }

    /// Returns whether the channel should stay open
    async fn handle(&self, message: ClientMessage, link: &mut ChannelLink) -> Result<bool> {
        match message {
            ClientMessage::Ping { ts } => link.outbound.pong(ts).await?,
            ClientMessage::Close {} => {
                info!("Client requested close");
                return Ok(false);
            }
            ClientMessage::Init(init) => match init.validate() {
                Err(err) => {
                    warn!("Invalid init: {}", err);
                    link.outbound.send(err.to_message()).await?;
                }
                Ok(request) => match self.controller.run(request, link).await {
                    Ok(SessionEnd::Completed(summary)) => {
                        info!(
                            "Guide {} complete: {} sentence(s), {} segment(s), {}ms",
                            summary.guide_id, summary.sentences, summary.segments, summary.total_duration_ms
                        );
                    }
                    Ok(SessionEnd::Cancelled(_)) => return Ok(false),
                    // Already reported to the client by the controller
                    Err(_) => return Ok(false),
                },
            },
            ClientMessage::Replay(request) => {
                if let Err(e) = self.replay.replay(&request, &link.outbound).await {
                    warn!("Replay of {} failed: {:#}", request.guide_id, e);
                    link.outbound
                        .send_error(ErrorCode::ReplayError, e.to_string())
                        .await?;
                }
            }
            ClientMessage::Nack { seq } => self.replay.nack(seq, &link.outbound).await?,
        }
        Ok(true)
    }
}
