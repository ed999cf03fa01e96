//! Command entry points
//!
//! Commands check their preconditions against the collaborators before any
//! conversation state is created.

use super::executor::GENERIC_FAILURE;
use super::traits::{CollaboratorError, Messenger, Storage};
use super::ConversationTracker;
use crate::db::Event;
use crate::state_machine::state::ATTENDANCE_OPTIONS;
use crate::state_machine::{ChatId, Command, Flow, Identity, Keyboard, StudentId};

const UNKNOWN_COMMAND: &str =
    "Sorry, I don't recognize that command. Please use /start, /event, or /broadcast.";

/// Result of the `/event` precondition checks
enum Eligibility {
    Eligible { student_id: StudentId, event: Event },
    Rejected(&'static str),
}

impl<S, M> ConversationTracker<S, M>
where
    S: Storage + 'static,
    M: Messenger + 'static,
{
    pub(super) async fn handle_command(&self, chat_id: ChatId, identity: &Identity, command: Command) {
        tracing::debug!(chat_id = %chat_id, command = ?command, "Command received");

        match command {
            Command::Start => self.start_registration(chat_id, identity).await,
            Command::Event => self.start_reservation(chat_id, identity).await,
            Command::Broadcast => self.start_broadcast(chat_id, identity).await,
            Command::Cancel => self.cancel(chat_id).await,
            Command::Unknown(_) => {
                self.send_text(chat_id, UNKNOWN_COMMAND, &Keyboard::None)
                    .await;
            }
        }
    }

    /// `/start`: a registered student gets their code again, anyone else
    /// starts the registration form.
    async fn start_registration(&self, chat_id: ChatId, identity: &Identity) {
        match self.storage.find_existing_registration(identity).await {
            Ok(Some(student_id)) => {
                self.deliver_code(
                    chat_id,
                    student_id,
                    "You are already registered! ✅\n\nHere is your QR code again.",
                    &format!("You are already registered! ✅\n\nYour Unique ID is: {student_id}"),
                )
                .await;
            }
            Ok(None) => {
                self.begin(chat_id, Flow::registration(identity.clone()));
                self.send_text(
                    chat_id,
                    "Welcome! Let's get you registered.\n\nPlease enter your Full Name:",
                    &Keyboard::Remove,
                )
                .await;
            }
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "Registration lookup failed");
                self.send_text(chat_id, GENERIC_FAILURE, &Keyboard::None).await;
            }
        }
    }

    /// `/event`: needs a registration, an active event, and no reservation yet
    async fn start_reservation(&self, chat_id: ChatId, identity: &Identity) {
        match self.reservation_eligibility(identity).await {
            Ok(Eligibility::Eligible { student_id, event }) => {
                self.begin(chat_id, Flow::reservation(student_id, event.event_id()));
                self.send_text(
                    chat_id,
                    &format!("Event: {} on {}.\n\nWill you attend?", event.name, event.date),
                    &Keyboard::options(&[&ATTENDANCE_OPTIONS]),
                )
                .await;
            }
            Ok(Eligibility::Rejected(reason)) => {
                self.send_text(chat_id, reason, &Keyboard::None).await;
            }
            Err(e) => {
                tracing::error!(chat_id = %chat_id, error = %e, "Reservation checks failed");
                self.send_text(chat_id, GENERIC_FAILURE, &Keyboard::None).await;
            }
        }
    }

    async fn reservation_eligibility(
        &self,
        identity: &Identity,
    ) -> Result<Eligibility, CollaboratorError> {
        let Some(student_id) = self.storage.find_existing_registration(identity).await? else {
            return Ok(Eligibility::Rejected(
                "Please register with /start before using this command.",
            ));
        };
        let Some(event) = self.storage.get_active_event().await? else {
            return Ok(Eligibility::Rejected(
                "No events are available for reservation right now.",
            ));
        };
        if self
            .storage
            .has_existing_reservation(student_id, event.event_id())
            .await?
        {
            return Ok(Eligibility::Rejected(
                "You have already reserved for the current event.",
            ));
        }
        Ok(Eligibility::Eligible { student_id, event })
    }

    /// `/broadcast`: organizers only
    async fn start_broadcast(&self, chat_id: ChatId, identity: &Identity) {
        if !self.authorizer.is_authorized_broadcaster(identity) {
            tracing::warn!(
                chat_id = %chat_id,
                user_id = identity.user_id,
                "Unauthorized broadcast attempt"
            );
            self.send_text(
                chat_id,
                "⛔️ You are not authorized to use this command.",
                &Keyboard::None,
            )
            .await;
            return;
        }

        self.begin(chat_id, Flow::broadcast());
        self.send_text(
            chat_id,
            "📢 Broadcast Mode\n\nPlease enter the exact name of the image file from the `images` directory (e.g., `announcement.jpg`).",
            &Keyboard::Remove,
        )
        .await;
    }

    async fn cancel(&self, chat_id: ChatId) {
        if self.clear(chat_id) {
            tracing::info!(chat_id = %chat_id, "Conversation cancelled");
            self.send_text(
                chat_id,
                "Cancelled. Use /start, /event, or /broadcast to begin again.",
                &Keyboard::Remove,
            )
            .await;
        } else {
            self.send_text(chat_id, "There is nothing to cancel.", &Keyboard::None)
                .await;
        }
    }
}
