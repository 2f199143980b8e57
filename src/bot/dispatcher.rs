//! Routes operator events to job actions.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bot::callback::{self, CallbackAction};
use crate::bot::messages;
use crate::bot::poller::OperatorEvent;
use crate::delivery::DeliveryEngine;
use crate::error::{Error, JobError};
use crate::gateway::OperatorConsole;
use crate::jobs::{JobManager, JobStatus, Submission};
use crate::parser::{LineKind, classify};

pub struct Dispatcher {
    manager: JobManager,
    engine: Arc<DeliveryEngine>,
    console: Arc<dyn OperatorConsole>,
}

impl Dispatcher {
    pub fn new(
        manager: JobManager,
        engine: Arc<DeliveryEngine>,
        console: Arc<dyn OperatorConsole>,
    ) -> Self {
        Self {
            manager,
            engine,
            console,
        }
    }

    /// Handle one event. Failures are logged and answered with a short
    /// operator message; they never stop the event loop.
    pub async fn handle(&self, event: OperatorEvent) {
        match event {
            OperatorEvent::Text {
                user_id,
                chat_id,
                text,
            } => {
                if let Err(e) = self.on_text(user_id, chat_id, &text).await {
                    self.log_error(user_id, &e);
                    if let Err(send_err) = self.console.reply(chat_id, &messages::for_error(&e)).await
                    {
                        warn!(chat_id, error = %send_err, "Failed to send error reply");
                    }
                }
            }
            OperatorEvent::Callback {
                callback_id,
                user_id,
                chat_id,
                message_id,
                data,
            } => {
                let answer = match self.on_callback(user_id, chat_id, message_id, &data).await {
                    Ok(()) => None,
                    Err(e) => {
                        self.log_error(user_id, &e);
                        Some(messages::for_error(&e))
                    }
                };
                if let Err(e) = self
                    .console
                    .answer_callback(&callback_id, answer.as_deref())
                    .await
                {
                    warn!(error = %e, "Failed to answer callback query");
                }
            }
        }
    }

    fn log_error(&self, user_id: i64, e: &Error) {
        match e {
            Error::Job(_) => info!(user_id, error = %e, "Operator action refused"),
            _ => error!(user_id, error = %e, "Operator action failed"),
        }
    }

    async fn on_text(&self, user_id: i64, chat_id: i64, text: &str) -> Result<(), Error> {
        if let Some(command) = text.trim().strip_prefix('/') {
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .split('@')
                .next()
                .unwrap_or_default();
            debug!(user_id, command = name, "Command received");
            let reply = match name {
                "chats" => messages::chats(self.manager.targets()),
                _ => messages::HELP.to_string(),
            };
            self.console.reply(chat_id, &reply).await?;
            return Ok(());
        }

        if !looks_like_quiz(text) {
            self.console.reply(chat_id, messages::NOT_A_QUIZ).await?;
            return Ok(());
        }

        match self.manager.submit(user_id, text).await? {
            Submission::Rejected { parse } => {
                self.console.reply(chat_id, &parse.report()).await?;
            }
            Submission::Accepted { job, parse } => {
                let keyboard = callback::privacy_keyboard(job.id);
                self.console
                    .reply_with_keyboard(chat_id, &messages::preview(&job, &parse), &keyboard)
                    .await?;
            }
        }
        Ok(())
    }

    async fn on_callback(
        &self,
        user_id: i64,
        chat_id: i64,
        message_id: i64,
        data: &str,
    ) -> Result<(), Error> {
        let Some(action) = CallbackAction::decode(data) else {
            warn!(user_id, data, "Unrecognized callback data");
            self.console
                .edit(chat_id, message_id, "This button is no longer valid.", None)
                .await?;
            return Ok(());
        };
        debug!(user_id, job_id = %action.job(), ?action, "Callback received");

        let (text, keyboard) = match action {
            CallbackAction::Privacy { job, mode } => {
                let job = self.manager.choose_privacy(user_id, job, mode).await?;
                if job.status == JobStatus::AwaitingTarget {
                    let targets = self.manager.targets();
                    (
                        messages::choose_target(&job, targets),
                        Some(callback::target_keyboard(job.id, targets)),
                    )
                } else {
                    (messages::status(&job), None)
                }
            }
            CallbackAction::Target { job, index } => {
                let name = self
                    .manager
                    .targets()
                    .get(index)
                    .map(|t| t.name.clone())
                    .ok_or_else(|| JobError::UnknownTarget(format!("#{}", index + 1)))?;
                let job = self.manager.choose_target(user_id, job, &name).await?;
                if job.status == JobStatus::Queued {
                    self.engine.spawn(job.id);
                    (messages::queued(&job), None)
                } else {
                    (messages::status(&job), None)
                }
            }
            CallbackAction::Cancel { job } => {
                let job = self.manager.cancel(user_id, job).await?;
                (messages::status(&job), None)
            }
        };

        self.console
            .edit(chat_id, message_id, &text, keyboard.as_ref())
            .await?;
        Ok(())
    }
}

/// Quiz text carries at least one `Q:` or `DES:` line.
fn looks_like_quiz(text: &str) -> bool {
    text.lines().any(|line| {
        matches!(
            classify(line),
            LineKind::QuestionStart(_) | LineKind::Announcement(_)
        )
    })
}
