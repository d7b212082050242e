use crate::domain::Message;
use crate::error::{AppError, Result};
use crate::services::inbox::InboxController;
use std::sync::Arc;
use uuid::Uuid;

/// One opened conversation: the ascending message list plus the reply flow.
///
/// Opening is a side-effecting read: viewing the thread acknowledges every
/// unread message in it. The counterpart for a reply is resolved from the
/// loaded messages, newest to oldest, because the store does not record a
/// thread participant list anywhere else.
#[derive(Debug)]
pub struct ThreadSession {
    conversation_key: Uuid,
    controller: Arc<InboxController>,
    messages: Vec<Message>,
}

impl ThreadSession {
    /// Loads the conversation and marks its unread messages as read.
    ///
    /// # Errors
    /// Returns `NotFound` when no message exists under the key for this
    /// user. A failed read-mark is logged, not propagated: the controller
    /// has already reverted its optimistic marks and the loaded messages
    /// are still valid to show.
    pub async fn open(controller: Arc<InboxController>, conversation_key: Uuid) -> Result<Self> {
        let messages = controller.load_thread(conversation_key).await?;
        if messages.is_empty() {
            return Err(AppError::NotFound);
        }

        if let Err(e) = controller.mark_thread_read(conversation_key).await {
            tracing::warn!(error = %e, %conversation_key, "Read acknowledgement failed; unread state kept");
        }

        Ok(Self { conversation_key, controller, messages })
    }

    #[must_use]
    pub const fn conversation_key(&self) -> Uuid {
        self.conversation_key
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The other participant, resolved by scanning the loaded messages from
    /// newest to oldest for the first row with an other-party id recorded.
    #[must_use]
    pub fn counterpart(&self) -> Option<Uuid> {
        let me = self.controller.me();
        self.messages.iter().rev().find_map(|m| m.counterpart_of(me))
    }

    /// Sends a reply into this conversation and reloads it.
    ///
    /// # Errors
    /// Returns `Validation` for an empty body (before any store call) and
    /// `NoCounterpart` when no message in the thread records who the other
    /// side is; both must reach the user rather than be dropped.
    #[tracing::instrument(err(level = "warn"), skip(self, body), fields(conversation_key = %self.conversation_key))]
    pub async fn reply(&mut self, body: &str) -> Result<Message> {
        if body.trim().is_empty() {
            return Err(AppError::Validation("message body must not be empty".to_string()));
        }

        let to_user = self.counterpart().ok_or(AppError::NoCounterpart)?;
        let sent = self.controller.send(self.conversation_key, to_user, body).await?;

        // Reload so the view reflects the store-assigned row, and refresh
        // the summaries. The send already updated the cache, so a refresh
        // failure here is not an error worth failing the reply over.
        self.messages = self.controller.load_thread(self.conversation_key).await?;
        if let Err(e) = self.controller.refresh().await {
            tracing::warn!(error = %e, "Inbox refresh after reply failed");
        }

        Ok(sent)
    }
}
