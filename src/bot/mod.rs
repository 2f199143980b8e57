//! Telegram operator surface.
//!
//! The poller feeds allowlisted operator events to the [`Dispatcher`], which
//! drives the job state machine and hands queued jobs to the delivery engine.

pub mod callback;
pub mod dispatcher;
pub mod messages;
pub mod poller;

use std::sync::Arc;

use futures::StreamExt;

pub use dispatcher::Dispatcher;
pub use poller::OperatorEvent;

use crate::config::BotConfig;
use crate::delivery::DeliveryEngine;
use crate::error::Error;
use crate::gateway::{OperatorConsole, TelegramGateway};
use crate::jobs::JobManager;

pub struct Bot {
    config: BotConfig,
    gateway: TelegramGateway,
    engine: Arc<DeliveryEngine>,
    dispatcher: Dispatcher,
}

impl Bot {
    pub fn new(
        config: BotConfig,
        gateway: TelegramGateway,
        manager: JobManager,
        engine: Arc<DeliveryEngine>,
    ) -> Self {
        let console: Arc<dyn OperatorConsole> = Arc::new(gateway.clone());
        let dispatcher = Dispatcher::new(manager, Arc::clone(&engine), console);
        Self {
            config,
            gateway,
            engine,
            dispatcher,
        }
    }

    /// Recover interrupted work, then serve operator events until the
    /// update stream ends.
    pub async fn run(self) -> Result<(), Error> {
        for job_id in self.engine.recover().await? {
            self.engine.spawn(job_id);
        }

        let mut events = poller::start(self.gateway.clone(), self.config.clone());
        while let Some(event) = events.next().await {
            self.dispatcher.handle(event).await;
        }

        tracing::info!("Operator update stream ended");
        Ok(())
    }
}
