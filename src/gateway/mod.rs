//! Outbound messaging.
//!
//! [`MessagingGateway`] is the seam the delivery engine posts through and
//! [`OperatorConsole`] the one the bot talks to operators through. The
//! Telegram Bot API implementation of both lives in [`telegram`].

pub mod telegram;
pub mod types;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::gateway::types::InlineKeyboard;

pub use telegram::TelegramGateway;

/// A quiz poll ready to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub question: String,
    /// Option texts in label order.
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct_option_id: usize,
    pub is_anonymous: bool,
    /// Shown by the client after answering. Only set when it fits
    /// [`MessagingGateway::inline_explanation_limit`].
    pub explanation: Option<String>,
}

/// Identifiers of a posted poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollAck {
    pub poll_id: String,
    pub message_id: i64,
}

/// Posts content to chats.
///
/// Implementations classify every failure into a [`GatewayError`] variant;
/// retry decisions are made by the caller.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Post a plain text message.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), GatewayError>;

    /// Post a quiz poll.
    async fn create_poll(&self, chat_id: i64, poll: &PollRequest) -> Result<PollAck, GatewayError>;

    /// Post text in reply to a previously posted poll.
    async fn send_reply(
        &self,
        chat_id: i64,
        text: &str,
        _poll: &PollAck,
    ) -> Result<(), GatewayError> {
        self.send_text(chat_id, text).await
    }

    /// Longest explanation the poll itself can carry, `None` if unbounded.
    fn inline_explanation_limit(&self) -> Option<usize> {
        None
    }
}

/// Operator-facing chat calls: keyboards, edits, callback answers.
#[async_trait]
pub trait OperatorConsole: Send + Sync {
    async fn reply(&self, chat_id: i64, text: &str) -> Result<(), GatewayError>;

    /// Returns the id of the sent message.
    async fn reply_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> Result<i64, GatewayError>;

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), GatewayError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), GatewayError>;
}
