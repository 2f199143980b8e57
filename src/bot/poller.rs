//! Long-polls the Bot API and turns updates into operator events.
//!
//! Updates from users outside the operator allowlist are dropped here, so
//! nothing downstream ever sees them.

use std::time::Duration;

use futures::Stream;

use crate::config::BotConfig;
use crate::gateway::TelegramGateway;
use crate::gateway::types::Update;

/// Something an operator did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorEvent {
    Text {
        user_id: i64,
        chat_id: i64,
        text: String,
    },
    Callback {
        callback_id: String,
        user_id: i64,
        chat_id: i64,
        message_id: i64,
        data: String,
    },
}

impl OperatorEvent {
    pub fn user_id(&self) -> i64 {
        match self {
            Self::Text { user_id, .. } | Self::Callback { user_id, .. } => *user_id,
        }
    }
}

/// Convert one update, or `None` if it carries nothing we handle.
pub fn to_event(update: &Update) -> Option<OperatorEvent> {
    if let Some(message) = &update.message {
        let from = message.from.as_ref()?;
        if from.is_bot {
            return None;
        }
        return Some(OperatorEvent::Text {
            user_id: from.id,
            chat_id: message.chat.id,
            text: message.text.clone()?,
        });
    }

    let callback = update.callback_query.as_ref()?;
    let message = callback.message.as_ref()?;
    Some(OperatorEvent::Callback {
        callback_id: callback.id.clone(),
        user_id: callback.from.id,
        chat_id: message.chat.id,
        message_id: message.message_id,
        data: callback.data.clone()?,
    })
}

/// Start polling on a background task and return the event stream.
pub fn start(
    gateway: TelegramGateway,
    config: BotConfig,
) -> impl Stream<Item = OperatorEvent> + Send + Unpin {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let timeout_secs = config.poll_timeout_secs;

    tokio::spawn(async move {
        let mut offset: i64 = 0;
        tracing::info!("Listening for operator updates...");

        loop {
            let updates = match gateway.get_updates(offset, timeout_secs).await {
                Ok(updates) => updates,
                Err(crate::error::GatewayError::RateLimited { retry_after }) => {
                    tokio::time::sleep(retry_after).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Telegram poll error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                // Advance offset past this update
                offset = offset.max(update.update_id + 1);

                let Some(event) = to_event(&update) else {
                    continue;
                };
                if !config.is_operator(event.user_id()) {
                    tracing::warn!(
                        user_id = event.user_id(),
                        "Ignoring update from unauthorized user"
                    );
                    continue;
                }
                if tx.send(event).is_err() {
                    tracing::info!("Operator event channel closed");
                    return;
                }
            }
        }
    });

    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(raw: &str) -> Update {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn text_message_becomes_text_event() {
        let u = update(
            r#"{"update_id":1,"message":{"message_id":4,"from":{"id":9,"is_bot":false,"first_name":"Op"},"chat":{"id":9,"type":"private"},"text":"DES: hi"}}"#,
        );
        assert_eq!(
            to_event(&u),
            Some(OperatorEvent::Text {
                user_id: 9,
                chat_id: 9,
                text: "DES: hi".into()
            })
        );
    }

    #[test]
    fn callback_becomes_callback_event() {
        let u = update(
            r#"{"update_id":2,"callback_query":{"id":"c1","from":{"id":9,"first_name":"Op"},"message":{"message_id":5,"chat":{"id":9,"type":"private"}},"data":"cancel|x"}}"#,
        );
        let event = to_event(&u).unwrap();
        assert_eq!(event.user_id(), 9);
        assert!(matches!(
            event,
            OperatorEvent::Callback { message_id: 5, ref data, .. } if data == "cancel|x"
        ));
    }

    #[test]
    fn non_text_and_bot_messages_are_skipped() {
        let sticker = update(
            r#"{"update_id":3,"message":{"message_id":6,"from":{"id":9,"first_name":"Op"},"chat":{"id":9,"type":"private"}}}"#,
        );
        assert_eq!(to_event(&sticker), None);
        let bot = update(
            r#"{"update_id":4,"message":{"message_id":7,"from":{"id":8,"is_bot":true,"first_name":"B"},"chat":{"id":9,"type":"group"},"text":"hi"}}"#,
        );
        assert_eq!(to_event(&bot), None);
    }
}
