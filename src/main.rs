//! Event reservation bot
//!
//! Telegram bot that registers students, takes reservations for the active
//! event, and lets organizers broadcast announcements. An optional HTTP API
//! gives organizers access to the stored data.

mod api;
mod config;
mod db;
mod qr;
mod runtime;
mod state_machine;
mod telegram;

use api::{create_router, AppState};
use config::BotConfig;
use db::Database;
use qr::QrCodeGenerator;
use runtime::{BroadcasterAllowList, ConversationTracker, DatabaseStorage, ImageDirectory};
use std::net::SocketAddr;
use std::sync::Arc;
use telegram::TelegramMessenger;
use teloxide::Bot;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "event_reservation_bot=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }

    let config = BotConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    if config.authorized_broadcast_ids.is_empty() {
        tracing::warn!("AUTHORIZED_BROADCAST_IDS is empty; nobody can broadcast");
    }
    if !config.images_dir.is_dir() {
        tracing::warn!(
            path = %config.images_dir.display(),
            "Broadcast images directory does not exist"
        );
    }

    let bot = Bot::new(&config.telegram_token);
    let tracker = Arc::new(ConversationTracker::new(
        DatabaseStorage::new(db.clone()),
        TelegramMessenger::new(bot.clone()),
        Arc::new(QrCodeGenerator::default()),
        Arc::new(ImageDirectory::new(&config.images_dir)),
        Arc::new(BroadcasterAllowList::new(
            config.authorized_broadcast_ids.iter().copied(),
        )),
        config.tracker_settings(),
    ));
    let sweeper = tracker.spawn_sweeper();

    let api = match &config.admin_api_token {
        Some(token) => {
            let state = AppState::new(db, tracker.clone(), token.as_str());
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            let app = create_router(state).layer(cors);

            let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "Organizer API listening");

            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "Organizer API stopped");
                }
            }))
        }
        None => {
            tracing::info!("ADMIN_API_TOKEN not set; organizer API disabled");
            None
        }
    };

    let result = telegram::run(bot, tracker).await;

    if let Some(handle) = api {
        handle.abort();
    }
    if let Some(handle) = sweeper {
        handle.abort();
    }

    result?;
    Ok(())
}
