//! Organizer HTTP API
//!
//! Read access to registrations and reservations, event management, and
//! door check-in. Every route except `/api/health` requires the admin token.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::db::Database;
use crate::runtime::ConversationStats;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub conversations: Arc<dyn ConversationStats>,
    admin_token: Arc<str>,
}

impl AppState {
    pub fn new(
        db: Database,
        conversations: Arc<dyn ConversationStats>,
        admin_token: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            db,
            conversations,
            admin_token: admin_token.into(),
        }
    }
}
