//! API request and response types

use crate::db::{Attendee, Event, ReservationDetail, Student};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Request to create (and activate) an event
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    /// `YYYY-MM-DD`
    pub date: NaiveDate,
}

/// Request to check a student in at the active event
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub student_id: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub registrations_today: i64,
    pub active_event_reservations: i64,
    pub active_conversations: usize,
}

#[derive(Debug, Serialize)]
pub struct StudentListResponse {
    pub students: Vec<Student>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event: Event,
}

#[derive(Debug, Serialize)]
pub struct ReservationListResponse {
    pub reservations: Vec<ReservationDetail>,
}

#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    pub student_id: i64,
    pub full_name: String,
    pub event_id: i64,
}

#[derive(Debug, Serialize)]
pub struct AttendeeListResponse {
    pub event_id: i64,
    pub attendees: Vec<Attendee>,
}

/// Attendees drawn at random from the active event
#[derive(Debug, Serialize)]
pub struct WinnersResponse {
    pub winners: Vec<Attendee>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
