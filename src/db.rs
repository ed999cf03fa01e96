//! Database module
//!
//! Persistence for students, events, and reservations. Conversation state is
//! never stored here.

mod schema;

pub use schema::*;

use crate::state_machine::{EventId, RegistrationFields, StudentId};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Student {student_id} already reserved for event {event_id}")]
    DuplicateReservation { student_id: i64, event_id: i64 },
    #[error("Student not found: {0}")]
    StudentNotFound(i64),
}

pub type DbResult<T> = Result<T, DbError>;

/// Outcome of scanning a student's code at the door
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckIn {
    Recorded,
    AlreadyCheckedIn,
    NoReservation,
}

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Student Operations ====================

    /// Insert a student, or refresh their details if the Telegram account is
    /// already registered. Returns the student id either way.
    pub fn save_student(&self, fields: &RegistrationFields) -> DbResult<StudentId> {
        let conn = self.conn();
        let id = conn.query_row(
            "INSERT INTO students (telegram_id, username, full_name, phone_number, year_of_study, department, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (telegram_id) DO UPDATE SET
                full_name = excluded.full_name,
                phone_number = excluded.phone_number,
                year_of_study = excluded.year_of_study,
                department = excluded.department
             RETURNING id",
            params![
                fields.telegram_id,
                fields.username,
                fields.full_name,
                fields.phone_number,
                fields.year_of_study,
                fields.department,
                Utc::now().to_rfc3339(),
            ],
            |row| row.get(0),
        )?;
        Ok(StudentId(id))
    }

    pub fn find_student_by_telegram_id(&self, telegram_id: i64) -> DbResult<Option<StudentId>> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM students WHERE telegram_id = ?1",
                params![telegram_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(StudentId))
    }

    pub fn get_student(&self, id: StudentId) -> DbResult<Student> {
        self.conn()
            .query_row(
                "SELECT id, telegram_id, username, full_name, phone_number, year_of_study, department, registered_at
                 FROM students WHERE id = ?1",
                params![id.0],
                student_from_row,
            )
            .optional()?
            .ok_or(DbError::StudentNotFound(id.0))
    }

    pub fn list_students(&self) -> DbResult<Vec<Student>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, telegram_id, username, full_name, phone_number, year_of_study, department, registered_at
             FROM students ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], student_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Telegram ids of every registered student, in registration order
    pub fn student_telegram_ids(&self) -> DbResult<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT telegram_id FROM students ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn count_registrations_since(&self, since: DateTime<Utc>) -> DbResult<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM students WHERE registered_at >= ?1",
            params![since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==================== Event Operations ====================

    /// Create an event and make it the only active one
    pub fn create_event(&self, name: &str, date: NaiveDate) -> DbResult<Event> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = Utc::now();

        tx.execute("UPDATE events SET is_active = 0 WHERE is_active = 1", [])?;
        let id: i64 = tx.query_row(
            "INSERT INTO events (event_name, event_date, is_active, created_at)
             VALUES (?1, ?2, 1, ?3) RETURNING id",
            params![name, date.format("%Y-%m-%d").to_string(), now.to_rfc3339()],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(Event {
            id,
            name: name.to_string(),
            date,
            is_active: true,
            created_at: now,
        })
    }

    pub fn get_active_event(&self) -> DbResult<Option<Event>> {
        let event = self
            .conn()
            .query_row(
                "SELECT id, event_name, event_date, is_active, created_at
                 FROM events WHERE is_active = 1 ORDER BY id DESC LIMIT 1",
                [],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    // ==================== Reservation Operations ====================

    pub fn create_reservation(
        &self,
        student_id: StudentId,
        event_id: EventId,
        attendance: &str,
        feedback: &str,
    ) -> DbResult<Reservation> {
        let conn = self.conn();
        let id = conn
            .query_row(
                "INSERT INTO reservations (student_id, event_id, attendance_status, feedback)
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                params![student_id.0, event_id.0, attendance, feedback],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    DbError::DuplicateReservation {
                        student_id: student_id.0,
                        event_id: event_id.0,
                    }
                }
                other => DbError::Sqlite(other),
            })?;

        Ok(Reservation {
            id,
            student_id: student_id.0,
            event_id: event_id.0,
            attendance_status: attendance.to_string(),
            feedback: Some(feedback.to_string()),
            attended: false,
            attended_at: None,
        })
    }

    pub fn has_reservation(&self, student_id: StudentId, event_id: EventId) -> DbResult<bool> {
        let exists = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM reservations WHERE student_id = ?1 AND event_id = ?2)",
            params![student_id.0, event_id.0],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Reservations for the active event with student and event details
    pub fn list_active_reservations(&self) -> DbResult<Vec<ReservationDetail>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.full_name, s.phone_number, s.year_of_study, s.department,
                    r.attendance_status, r.feedback, r.attended, r.attended_at,
                    e.event_name, e.event_date
             FROM reservations r
             JOIN students s ON r.student_id = s.id
             JOIN events e ON r.event_id = e.id
             WHERE e.is_active = 1
             ORDER BY r.id ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ReservationDetail {
                full_name: row.get(0)?,
                phone_number: row.get(1)?,
                year_of_study: row.get(2)?,
                department: row.get(3)?,
                attendance_status: row.get(4)?,
                feedback: row.get(5)?,
                attended: row.get(6)?,
                attended_at: row
                    .get::<_, Option<String>>(7)?
                    .as_deref()
                    .map(|s| parse_datetime(7, s))
                    .transpose()?,
                event_name: row.get(8)?,
                event_date: parse_date(9, &row.get::<_, String>(9)?)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn count_active_event_reservations(&self) -> DbResult<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM reservations r
             JOIN events e ON r.event_id = e.id
             WHERE e.is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Record attendance. A student is checked in at most once per event.
    pub fn check_in(&self, student_id: StudentId, event_id: EventId) -> DbResult<CheckIn> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE reservations SET attended = 1, attended_at = ?1
             WHERE student_id = ?2 AND event_id = ?3 AND attended = 0",
            params![Utc::now().to_rfc3339(), student_id.0, event_id.0],
        )?;
        if updated > 0 {
            return Ok(CheckIn::Recorded);
        }

        let reserved: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM reservations WHERE student_id = ?1 AND event_id = ?2)",
            params![student_id.0, event_id.0],
            |row| row.get(0),
        )?;
        Ok(if reserved {
            CheckIn::AlreadyCheckedIn
        } else {
            CheckIn::NoReservation
        })
    }

    pub fn list_attendees(&self, event_id: EventId) -> DbResult<Vec<Attendee>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.full_name, s.phone_number, s.department
             FROM reservations r
             JOIN students s ON r.student_id = s.id
             WHERE r.event_id = ?1 AND r.attended = 1
             ORDER BY s.full_name",
        )?;
        let rows = stmt.query_map(params![event_id.0], attendee_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Checked-in students of the active event; empty when no event is active
    pub fn list_active_attendees(&self) -> DbResult<Vec<Attendee>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.full_name, s.phone_number, s.department
             FROM reservations r
             JOIN students s ON r.student_id = s.id
             JOIN events e ON r.event_id = e.id
             WHERE e.is_active = 1 AND r.attended = 1
             ORDER BY s.full_name",
        )?;
        let rows = stmt.query_map([], attendee_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn attendee_from_row(row: &Row<'_>) -> rusqlite::Result<Attendee> {
    Ok(Attendee {
        id: row.get(0)?,
        full_name: row.get(1)?,
        phone_number: row.get(2)?,
        department: row.get(3)?,
    })
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        full_name: row.get(3)?,
        phone_number: row.get(4)?,
        year_of_study: row.get(5)?,
        department: row.get(6)?,
        registered_at: parse_datetime(7, &row.get::<_, String>(7)?)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        name: row.get(1)?,
        date: parse_date(2, &row.get::<_, String>(2)?)?,
        is_active: row.get(3)?,
        created_at: parse_datetime(4, &row.get::<_, String>(4)?)?,
    })
}

fn parse_datetime(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_date(column: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}
