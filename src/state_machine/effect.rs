//! Effects produced by state transitions

use super::state::{EventId, RegistrationFields, StudentId};
use std::path::PathBuf;

/// Reply keyboard attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Keyboard {
    /// Leave whatever keyboard the client shows
    #[default]
    None,
    /// One-time keyboard, rows of option labels
    Options(Vec<Vec<String>>),
    /// Single button that shares the user's phone number
    RequestContact(String),
    Remove,
}

impl Keyboard {
    pub fn options(rows: &[&[&str]]) -> Self {
        Keyboard::Options(
            rows.iter()
                .map(|row| row.iter().map(|label| (*label).to_string()).collect())
                .collect(),
        )
    }
}

/// Effects to be executed after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a text message to the chat
    SendText { text: String, keyboard: Keyboard },

    /// Show the organizer the composed broadcast
    SendPreview { image: PathBuf, caption: String },

    /// Look up an image by name; the result comes back as `Input::ResourceChecked`
    CheckResource { name: String },

    /// Persist the student, then send their code
    CompleteRegistration(RegistrationFields),

    /// Persist the reservation, then send the confirmation code
    CompleteReservation {
        student_id: StudentId,
        event_id: EventId,
        attendance: String,
        feedback: String,
    },

    /// Deliver the broadcast to every registered student
    FanOut { image: PathBuf, caption: String },
}

impl Effect {
    pub fn say(text: impl Into<String>) -> Self {
        Effect::SendText {
            text: text.into(),
            keyboard: Keyboard::None,
        }
    }

    pub fn ask(text: impl Into<String>, rows: &[&[&str]]) -> Self {
        Effect::SendText {
            text: text.into(),
            keyboard: Keyboard::options(rows),
        }
    }

    pub fn say_and_clear_keyboard(text: impl Into<String>) -> Self {
        Effect::SendText {
            text: text.into(),
            keyboard: Keyboard::Remove,
        }
    }

    /// Whether executing this effect calls a persistence collaborator
    #[allow(dead_code)] // Used in tests
    pub fn touches_storage(&self) -> bool {
        matches!(
            self,
            Effect::CompleteRegistration(_)
                | Effect::CompleteReservation { .. }
                | Effect::FanOut { .. }
        )
    }
}
