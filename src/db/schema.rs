//! Database schema and record types

use crate::state_machine::EventId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id INTEGER UNIQUE NOT NULL,
    username TEXT,
    full_name TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    year_of_study TEXT NOT NULL,
    department TEXT NOT NULL,
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_name TEXT NOT NULL,
    event_date TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_active ON events(is_active);

CREATE TABLE IF NOT EXISTS reservations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL,
    event_id INTEGER NOT NULL,
    attendance_status TEXT NOT NULL,
    feedback TEXT,
    attended BOOLEAN NOT NULL DEFAULT 0,
    attended_at TEXT,

    UNIQUE (student_id, event_id),
    FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE,
    FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reservations_event ON reservations(event_id);
";

/// Registered student
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Student {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub full_name: String,
    pub phone_number: String,
    pub year_of_study: String,
    pub department: String,
    pub registered_at: DateTime<Utc>,
}

/// Event students can reserve for. At most one is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn event_id(&self) -> EventId {
        EventId(self.id)
    }
}

/// Reservation of one student for one event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: i64,
    pub student_id: i64,
    pub event_id: i64,
    pub attendance_status: String,
    pub feedback: Option<String>,
    pub attended: bool,
    pub attended_at: Option<DateTime<Utc>>,
}

/// Reservation joined with its student and event, for the organizer listing
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReservationDetail {
    pub full_name: String,
    pub phone_number: String,
    pub year_of_study: String,
    pub department: String,
    pub attendance_status: String,
    pub feedback: Option<String>,
    pub attended: bool,
    pub attended_at: Option<DateTime<Utc>>,
    pub event_name: String,
    pub event_date: NaiveDate,
}

/// Student who was checked in at an event
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Attendee {
    pub id: i64,
    pub full_name: String,
    pub phone_number: String,
    pub department: String,
}
