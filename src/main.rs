use std::sync::Arc;

use anyhow::Context;

use quizcast::bot::Bot;
use quizcast::config::{BotConfig, DeliveryConfig, ParserConfig};
use quizcast::delivery::DeliveryEngine;
use quizcast::gateway::{MessagingGateway, TelegramGateway};
use quizcast::jobs::JobManager;
use quizcast::parser::Parser;
use quizcast::store::{JobStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let bot_config = BotConfig::from_env().context("invalid bot configuration")?;
    let parser_config = ParserConfig::from_env();
    let delivery_config = DeliveryConfig::from_env();

    eprintln!("📮 quizcast v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn JobStore> = Arc::new(
        LibSqlBackend::new_local(&bot_config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", bot_config.db_path.display()))?,
    );
    eprintln!("   Database: {}", bot_config.db_path.display());

    // ── Telegram ─────────────────────────────────────────────────────────
    let gateway = TelegramGateway::new(bot_config.bot_token.clone(), delivery_config.call_timeout)?;
    let me = gateway
        .get_me()
        .await
        .context("failed to verify TELEGRAM_BOT_TOKEN")?;
    eprintln!(
        "   Bot: @{}",
        me.username.as_deref().unwrap_or(me.first_name.as_str())
    );
    eprintln!("   Operators: {}", bot_config.operators.len());
    if bot_config.targets.is_empty() {
        eprintln!("   Targets: none (set QUIZCAST_TARGET_CHATS)");
    } else {
        let names: Vec<&str> = bot_config.targets.iter().map(|t| t.name.as_str()).collect();
        eprintln!("   Targets: {}", names.join(", "));
    }
    eprintln!(
        "   Pacing: {:?} / {:?} above {} questions\n",
        delivery_config.pacing_short, delivery_config.pacing_long, delivery_config.pacing_threshold
    );

    // ── Jobs & delivery ──────────────────────────────────────────────────
    let engine = Arc::new(DeliveryEngine::new(
        Arc::clone(&store),
        Arc::new(gateway.clone()) as Arc<dyn MessagingGateway>,
        delivery_config,
    ));
    let manager = JobManager::new(
        Arc::clone(&store),
        Parser::new(parser_config),
        bot_config.targets.clone(),
    );

    let bot = Bot::new(bot_config, gateway, manager, engine);
    tokio::select! {
        result = bot.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
