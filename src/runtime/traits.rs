//! Trait abstractions for the tracker's collaborators
//!
//! These traits enable testing the tracker with mock implementations.

use crate::db::{Database, DbError, Event, Reservation};
use crate::state_machine::{ChatId, EventId, Identity, Keyboard, RegistrationFields, StudentId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Failure of a collaborator call. Contained to the chat that triggered it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Duplicate: {0}")]
    Duplicate(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
    #[error("Code generation failed: {0}")]
    Encoding(String),
}

impl From<DbError> for CollaboratorError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::DuplicateReservation { .. } => CollaboratorError::Duplicate(err.to_string()),
            other => CollaboratorError::Storage(other.to_string()),
        }
    }
}

/// Image attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Rendered in memory, e.g. a QR code
    Png(Vec<u8>),
    File(PathBuf),
}

/// Student registrations
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Upsert by Telegram id; returns the student id
    async fn persist_registration(
        &self,
        fields: &RegistrationFields,
    ) -> Result<StudentId, CollaboratorError>;

    async fn find_existing_registration(
        &self,
        identity: &Identity,
    ) -> Result<Option<StudentId>, CollaboratorError>;

    /// Chats that receive broadcasts, in delivery order
    async fn list_broadcast_recipients(&self) -> Result<Vec<ChatId>, CollaboratorError>;
}

/// Events and reservations
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get_active_event(&self) -> Result<Option<Event>, CollaboratorError>;

    async fn has_existing_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
    ) -> Result<bool, CollaboratorError>;

    /// Fails with `CollaboratorError::Duplicate` when the pair already exists
    async fn persist_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
        attendance: &str,
        feedback: &str,
    ) -> Result<Reservation, CollaboratorError>;
}

/// Combined storage trait for convenience
pub trait Storage: RegistrationStore + ReservationStore {}
impl<T: RegistrationStore + ReservationStore> Storage for T {}

/// Outgoing messages. Each call may fail independently.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), CollaboratorError>;

    async fn send_image(
        &self,
        chat_id: ChatId,
        image: &ImageSource,
        caption: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Renders a scannable code for a payload
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, payload: &str) -> Result<Vec<u8>, CollaboratorError>;
}

/// Broadcast images available to organizers
#[async_trait]
pub trait ResourceLocator: Send + Sync {
    /// Path of the named resource, or `None` when it does not exist
    async fn resolve(&self, name: &str) -> Option<PathBuf>;
}

pub trait BroadcastAuthorizer: Send + Sync {
    fn is_authorized_broadcaster(&self, identity: &Identity) -> bool;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: RegistrationStore + ?Sized> RegistrationStore for Arc<T> {
    async fn persist_registration(
        &self,
        fields: &RegistrationFields,
    ) -> Result<StudentId, CollaboratorError> {
        (**self).persist_registration(fields).await
    }

    async fn find_existing_registration(
        &self,
        identity: &Identity,
    ) -> Result<Option<StudentId>, CollaboratorError> {
        (**self).find_existing_registration(identity).await
    }

    async fn list_broadcast_recipients(&self) -> Result<Vec<ChatId>, CollaboratorError> {
        (**self).list_broadcast_recipients().await
    }
}

#[async_trait]
impl<T: ReservationStore + ?Sized> ReservationStore for Arc<T> {
    async fn get_active_event(&self) -> Result<Option<Event>, CollaboratorError> {
        (**self).get_active_event().await
    }

    async fn has_existing_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
    ) -> Result<bool, CollaboratorError> {
        (**self).has_existing_reservation(student_id, event_id).await
    }

    async fn persist_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
        attendance: &str,
        feedback: &str,
    ) -> Result<Reservation, CollaboratorError> {
        (**self)
            .persist_reservation(student_id, event_id, attendance, feedback)
            .await
    }
}

#[async_trait]
impl<T: Messenger + ?Sized> Messenger for Arc<T> {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> Result<(), CollaboratorError> {
        (**self).send_message(chat_id, text, keyboard).await
    }

    async fn send_image(
        &self,
        chat_id: ChatId,
        image: &ImageSource,
        caption: &str,
    ) -> Result<(), CollaboratorError> {
        (**self).send_image(chat_id, image, caption).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RegistrationStore for DatabaseStorage {
    async fn persist_registration(
        &self,
        fields: &RegistrationFields,
    ) -> Result<StudentId, CollaboratorError> {
        Ok(self.db.save_student(fields)?)
    }

    async fn find_existing_registration(
        &self,
        identity: &Identity,
    ) -> Result<Option<StudentId>, CollaboratorError> {
        Ok(self.db.find_student_by_telegram_id(identity.user_id)?)
    }

    async fn list_broadcast_recipients(&self) -> Result<Vec<ChatId>, CollaboratorError> {
        // Registration happens in private chats, where chat id == user id
        let ids = self.db.student_telegram_ids()?;
        Ok(ids.into_iter().map(ChatId).collect())
    }
}

#[async_trait]
impl ReservationStore for DatabaseStorage {
    async fn get_active_event(&self) -> Result<Option<Event>, CollaboratorError> {
        Ok(self.db.get_active_event()?)
    }

    async fn has_existing_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
    ) -> Result<bool, CollaboratorError> {
        Ok(self.db.has_reservation(student_id, event_id)?)
    }

    async fn persist_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
        attendance: &str,
        feedback: &str,
    ) -> Result<Reservation, CollaboratorError> {
        Ok(self
            .db
            .create_reservation(student_id, event_id, attendance, feedback)?)
    }
}

/// Broadcast images stored as files in one directory
pub struct ImageDirectory {
    root: PathBuf,
}

impl ImageDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ResourceLocator for ImageDirectory {
    async fn resolve(&self, name: &str) -> Option<PathBuf> {
        // Bare file names only; nothing may escape the directory
        let mut components = Path::new(name).components();
        let is_bare = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_bare {
            tracing::warn!(name = %name, "Rejected image name with path components");
            return None;
        }

        let path = self.root.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }
}

/// Telegram user ids allowed to broadcast
#[derive(Debug, Clone, Default)]
pub struct BroadcasterAllowList {
    user_ids: HashSet<i64>,
}

impl BroadcasterAllowList {
    pub fn new(user_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            user_ids: user_ids.into_iter().collect(),
        }
    }
}

impl BroadcastAuthorizer for BroadcasterAllowList {
    fn is_authorized_broadcaster(&self, identity: &Identity) -> bool {
        self.user_ids.contains(&identity.user_id)
    }
}
