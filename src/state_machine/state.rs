//! Conversation state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Identifiers
// ============================================================================

/// Telegram chat identifier, the key of the conversation map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row id of a registered student. Also the payload of their QR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentId(pub i64);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row id of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The Telegram user behind an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: Option<String>,
}

impl Identity {
    pub fn new(user_id: i64, username: Option<String>) -> Self {
        Self { user_id, username }
    }
}

// ============================================================================
// Fixed option sets
// ============================================================================

pub const YEAR_OPTIONS: [&str; 4] = ["1st Year", "2nd Year", "3rd Year", "4th Year"];
pub const DEPARTMENT_OPTIONS: [&str; 2] = ["CS", "BA"];
pub const ATTENDANCE_OPTIONS: [&str; 3] = ["Yes", "No", "Maybe"];
pub const FEEDBACK_OPTIONS: [&str; 3] = ["Good", "Bad", "Nice"];

/// The only input that confirms a composed broadcast
pub const CONFIRM_TOKEN: &str = "YES, SEND IT";
pub const CANCEL_TOKEN: &str = "NO, CANCEL";

// ============================================================================
// Flows
// ============================================================================

/// Everything a finished registration hands to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationFields {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub full_name: String,
    pub phone_number: String,
    pub year_of_study: String,
    pub department: String,
}

/// Registration steps. Each step carries the answers collected before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStep {
    CollectName,
    CollectPhone {
        full_name: String,
    },
    CollectYearOfStudy {
        full_name: String,
        phone_number: String,
    },
    CollectDepartment {
        full_name: String,
        phone_number: String,
        year_of_study: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationStep {
    CollectAttendanceIntent,
    CollectFeedback { attendance: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastStep {
    CollectImageReference,
    CollectCaption { image: PathBuf },
    AwaitConfirmation { image: PathBuf, caption: String },
}

/// Discriminant of [`Flow`], used for logging and stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Registration,
    EventReservation,
    Broadcast,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowKind::Registration => "registration",
            FlowKind::EventReservation => "event_reservation",
            FlowKind::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// One in-progress guided conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Registration {
        identity: Identity,
        step: RegistrationStep,
    },
    EventReservation {
        student_id: StudentId,
        event_id: EventId,
        step: ReservationStep,
    },
    Broadcast {
        step: BroadcastStep,
    },
}

impl Flow {
    pub fn registration(identity: Identity) -> Self {
        Flow::Registration {
            identity,
            step: RegistrationStep::CollectName,
        }
    }

    pub fn reservation(student_id: StudentId, event_id: EventId) -> Self {
        Flow::EventReservation {
            student_id,
            event_id,
            step: ReservationStep::CollectAttendanceIntent,
        }
    }

    pub fn broadcast() -> Self {
        Flow::Broadcast {
            step: BroadcastStep::CollectImageReference,
        }
    }

    pub fn kind(&self) -> FlowKind {
        match self {
            Flow::Registration { .. } => FlowKind::Registration,
            Flow::EventReservation { .. } => FlowKind::EventReservation,
            Flow::Broadcast { .. } => FlowKind::Broadcast,
        }
    }

    pub fn step_name(&self) -> &'static str {
        match self {
            Flow::Registration { step, .. } => match step {
                RegistrationStep::CollectName => "collect_name",
                RegistrationStep::CollectPhone { .. } => "collect_phone",
                RegistrationStep::CollectYearOfStudy { .. } => "collect_year_of_study",
                RegistrationStep::CollectDepartment { .. } => "collect_department",
            },
            Flow::EventReservation { step, .. } => match step {
                ReservationStep::CollectAttendanceIntent => "collect_attendance_intent",
                ReservationStep::CollectFeedback { .. } => "collect_feedback",
            },
            Flow::Broadcast { step } => match step {
                BroadcastStep::CollectImageReference => "collect_image_reference",
                BroadcastStep::CollectCaption { .. } => "collect_caption",
                BroadcastStep::AwaitConfirmation { .. } => "await_confirmation",
            },
        }
    }

    /// Position of the current step within its flow, starting at 0.
    /// Never decreases across transitions of the same flow.
    #[allow(dead_code)] // Used in tests
    pub fn step_index(&self) -> usize {
        match self {
            Flow::Registration { step, .. } => match step {
                RegistrationStep::CollectName => 0,
                RegistrationStep::CollectPhone { .. } => 1,
                RegistrationStep::CollectYearOfStudy { .. } => 2,
                RegistrationStep::CollectDepartment { .. } => 3,
            },
            Flow::EventReservation { step, .. } => match step {
                ReservationStep::CollectAttendanceIntent => 0,
                ReservationStep::CollectFeedback { .. } => 1,
            },
            Flow::Broadcast { step } => match step {
                BroadcastStep::CollectImageReference => 0,
                BroadcastStep::CollectCaption { .. } => 1,
                BroadcastStep::AwaitConfirmation { .. } => 2,
            },
        }
    }
}

/// Transient state for one chat. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub chat_id: ChatId,
    pub flow: Flow,
    pub last_activity: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(chat_id: ChatId, flow: Flow, now: DateTime<Utc>) -> Self {
        Self {
            chat_id,
            flow,
            last_activity: now,
        }
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_activity < cutoff
    }
}
