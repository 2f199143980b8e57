//! Telegram Bot API gateway.
//!
//! Posts announcements and quiz polls for the delivery engine and carries the
//! operator-side calls (`getUpdates`, inline keyboards, callback answers).
//! Every response is classified into a [`GatewayError`] so callers can decide
//! between waiting, retrying and giving up.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::GatewayError;
use crate::gateway::types::{InlineKeyboard, Message, TelegramApiResponse, Update};
use crate::gateway::{MessagingGateway, OperatorConsole, PollAck, PollRequest};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Longest explanation `sendPoll` accepts.
const TELEGRAM_MAX_EXPLANATION_LENGTH: usize = 200;

/// Wait used when a 429 arrives without `retry_after`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Telegram gateway over the Bot API.
///
/// Cloning shares the underlying HTTP client, so every job posting through a
/// clone uses the same connection pool.
#[derive(Clone)]
pub struct TelegramGateway {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramGateway {
    /// `call_timeout` bounds every request except the `getUpdates` long poll.
    pub fn new(bot_token: SecretString, call_timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| GatewayError::Permanent(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { bot_token, client })
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// POST `body` to `method` and unwrap the response envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, GatewayError> {
        let mut request = self.client.post(self.api_url(method)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| classify_transport(method, e))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| classify_transport(method, e))?;

        let value = classify_response(status, &text).inspect_err(|e| {
            tracing::debug!(method, status, error = %e, "Telegram call failed");
        })?;
        serde_json::from_value(value)
            .map_err(|e| GatewayError::Transient(format!("{method}: unexpected result shape: {e}")))
    }

    /// Send one chunk (≤4096 chars), optionally as a reply or with buttons.
    async fn send_message_chunk(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<Message, GatewayError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(message_id) = reply_to {
            body["reply_parameters"] = json!({
                "message_id": message_id,
                "allow_sending_without_reply": true,
            });
        }
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = json!(keyboard);
        }
        self.call("sendMessage", &body, None).await
    }

    /// Send a message with inline buttons, returning its message id.
    pub async fn send_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> Result<i64, GatewayError> {
        let text = clip_chars(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let message = self
            .send_message_chunk(chat_id, &text, None, Some(keyboard))
            .await?;
        Ok(message.message_id)
    }

    /// Replace the text (and buttons) of an earlier bot message.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), GatewayError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": clip_chars(text, TELEGRAM_MAX_MESSAGE_LENGTH),
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = json!(keyboard);
        }
        let _: serde_json::Value = self.call("editMessageText", &body, None).await?;
        Ok(())
    }

    /// Acknowledge a button press so the client stops its spinner.
    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: bool = self.call("answerCallbackQuery", &body, None).await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, GatewayError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call(
            "getUpdates",
            &body,
            Some(Duration::from_secs(timeout_secs + 10)),
        )
        .await
    }

    /// Verify the token.
    pub async fn get_me(&self) -> Result<crate::gateway::types::User, GatewayError> {
        self.call("getMe", &json!({}), None).await
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk, None, None).await?;
        }
        Ok(())
    }

    async fn create_poll(&self, chat_id: i64, poll: &PollRequest) -> Result<PollAck, GatewayError> {
        let message: Message = self.call("sendPoll", &poll_body(chat_id, poll), None).await?;
        let poll_id = message.poll.map(|p| p.id).unwrap_or_default();
        Ok(PollAck {
            poll_id,
            message_id: message.message_id,
        })
    }

    async fn send_reply(
        &self,
        chat_id: i64,
        text: &str,
        poll: &PollAck,
    ) -> Result<(), GatewayError> {
        let mut reply_to = Some(poll.message_id);
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk, reply_to.take(), None)
                .await?;
        }
        Ok(())
    }

    fn inline_explanation_limit(&self) -> Option<usize> {
        Some(TELEGRAM_MAX_EXPLANATION_LENGTH)
    }
}

#[async_trait]
impl OperatorConsole for TelegramGateway {
    async fn reply(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        self.send_text(chat_id, text).await
    }

    async fn reply_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> Result<i64, GatewayError> {
        self.send_keyboard(chat_id, text, keyboard).await
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), GatewayError> {
        self.edit_message_text(chat_id, message_id, text, keyboard)
            .await
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.answer_callback_query(callback_id, text).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn poll_body(chat_id: i64, poll: &PollRequest) -> serde_json::Value {
    let options: Vec<_> = poll.options.iter().map(|o| json!({ "text": o })).collect();
    let mut body = json!({
        "chat_id": chat_id,
        "question": poll.question,
        "options": options,
        "type": "quiz",
        "correct_option_id": poll.correct_option_id,
        "is_anonymous": poll.is_anonymous,
    });
    if let Some(explanation) = &poll.explanation {
        body["explanation"] = json!(explanation);
    }
    body
}

/// Map an HTTP status and body onto the result value or a classified error.
fn classify_response(status: u16, body: &str) -> Result<serde_json::Value, GatewayError> {
    let parsed: Option<TelegramApiResponse<serde_json::Value>> = serde_json::from_str(body).ok();

    let Some(envelope) = parsed else {
        let snippet: String = body.chars().take(120).collect();
        return Err(if status == 429 {
            GatewayError::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER,
            }
        } else if (200..300).contains(&status) || status >= 500 {
            GatewayError::Transient(format!("HTTP {status}: {snippet}"))
        } else {
            GatewayError::Permanent(format!("HTTP {status}: {snippet}"))
        });
    };

    if envelope.ok {
        return Ok(envelope.result.unwrap_or(serde_json::Value::Null));
    }

    let code = envelope
        .error_code
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(status);
    let retry_after = envelope.parameters.as_ref().and_then(|p| p.retry_after);
    let description = envelope
        .description
        .unwrap_or_else(|| format!("HTTP {code}"));

    if code == 429 || retry_after.is_some() {
        return Err(GatewayError::RateLimited {
            retry_after: retry_after.map_or(DEFAULT_RETRY_AFTER, Duration::from_secs),
        });
    }
    if code >= 500 {
        return Err(GatewayError::Transient(description));
    }
    Err(GatewayError::Permanent(description))
}

/// Anything that went wrong before a response arrived is worth retrying,
/// except a request we could not even build.
fn classify_transport(method: &str, e: reqwest::Error) -> GatewayError {
    let reason = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    // The URL carries the token; drop it from the message.
    let e = e.without_url();
    if e.is_builder() {
        GatewayError::Permanent(format!("{method}: {e}"))
    } else {
        GatewayError::Transient(format!("{method} {reason}: {e}"))
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn clip_chars(text: &str, max_len: usize) -> String {
    text[..floor_char_boundary(text, max_len)].to_string()
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let hard = floor_char_boundary(remaining, max_len);
        let chunk = &remaining[..hard];
        // Don't split at position 0 (infinite loop guard)
        let split_at = match chunk.rfind('\n').or_else(|| chunk.rfind(' ')) {
            Some(i) if i > 0 => i,
            _ => hard,
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
