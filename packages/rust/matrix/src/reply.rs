//! Replying to, redacting and acknowledging one room message.

use std::sync::Arc;

use async_trait::async_trait;
use matrix_sdk::Room;
use matrix_sdk::ruma::api::client::receipt::create_receipt::v3::ReceiptType;
use matrix_sdk::ruma::events::receipt::ReceiptThread;
use matrix_sdk::ruma::events::relation::InReplyTo;
use matrix_sdk::ruma::events::room::message::{Relation, RoomMessageEventContent};
use matrix_sdk::ruma::{EventId, OwnedEventId};
use tracing::{debug, error};

use wayback_core::{Channel, Reply, ReplySink, render_chat, render_chat_plain};
use wayback_shared::{Result, WaybackError};

/// The room operations a reply needs.
#[async_trait]
pub trait ReplyRoom: Send + Sync {
    /// Send a message event to the room.
    async fn post(&self, content: RoomMessageEventContent) -> Result<()>;

    /// Redact `event_id` with `reason`.
    async fn redact_event(&self, event_id: &EventId, reason: &str) -> Result<()>;

    /// Send a read receipt for `event_id`.
    async fn mark_read(&self, event_id: &EventId) -> Result<()>;
}

fn transport(action: &str, e: impl std::fmt::Display) -> WaybackError {
    WaybackError::Transport(format!("{action} failed: {e}"))
}

#[async_trait]
impl ReplyRoom for Room {
    async fn post(&self, content: RoomMessageEventContent) -> Result<()> {
        Room::send(self, content)
            .await
            .map_err(|e| transport("sending message", e))?;
        Ok(())
    }

    async fn redact_event(&self, event_id: &EventId, reason: &str) -> Result<()> {
        Room::redact(self, event_id, Some(reason), None)
            .await
            .map_err(|e| transport("redaction", e))?;
        Ok(())
    }

    async fn mark_read(&self, event_id: &EventId) -> Result<()> {
        self.send_single_receipt(
            ReceiptType::Read,
            ReceiptThread::Unthreaded,
            event_id.to_owned(),
        )
        .await
        .map_err(|e| transport("read receipt", e))
    }
}

/// Replies to one room message and acknowledges it.
pub struct MatrixReply {
    room: Arc<dyn ReplyRoom>,
    event_id: OwnedEventId,
    text: String,
}

impl MatrixReply {
    pub fn new(room: Arc<dyn ReplyRoom>, event_id: OwnedEventId, text: impl Into<String>) -> Self {
        Self {
            room,
            event_id,
            text: text.into(),
        }
    }

    /// The original message body.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Redact the original message, logging failures.
    pub async fn redact(&self, reason: &str) -> bool {
        match self.room.redact_event(&self.event_id, reason).await {
            Ok(()) => true,
            Err(e) => {
                error!(event_id = %self.event_id, error = %e, "redacting message failed");
                false
            }
        }
    }

    /// Send `content` threaded to the original message.
    async fn send(&self, mut content: RoomMessageEventContent) -> Result<()> {
        content.relates_to = Some(Relation::Reply {
            in_reply_to: InReplyTo::new(self.event_id.clone()),
        });
        self.room.post(content).await?;
        debug!(event_id = %self.event_id, "reply sent");
        Ok(())
    }
}

#[async_trait]
impl ReplySink for MatrixReply {
    fn channel(&self) -> Channel {
        Channel::Matrix
    }

    async fn render(&self, reply: &Reply<'_>) -> Result<()> {
        match reply {
            // The redaction reason carries the notice.
            Reply::NoUrl { .. } => Ok(()),
            Reply::Failed { error, .. } => {
                self.send(RoomMessageEventContent::text_plain(format!(
                    "Archive failed: {error}"
                )))
                .await
            }
            Reply::Archived { results, .. } => {
                let html = render_chat(results)?;
                self.send(RoomMessageEventContent::text_html(
                    render_chat_plain(results),
                    html,
                ))
                .await
            }
        }
    }

    async fn acknowledge(&self, reply: &Reply<'_>) -> Result<()> {
        let reason = match reply {
            Reply::NoUrl { .. } => format!("URL no found. Original message: {}", self.text),
            _ => format!("Wayback completed. Original message: {}", self.text),
        };
        let redacted = self.redact(&reason).await;
        self.room.mark_read(&self.event_id).await?;

        if !redacted {
            return Err(WaybackError::Transport(
                "original message was not redacted".into(),
            ));
        }
        Ok(())
    }
}
