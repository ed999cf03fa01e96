//! HTTP request handlers

use super::types::{
    AttendeeListResponse, CheckInRequest, CheckInResponse, CreateEventRequest, ErrorResponse,
    EventResponse, HealthResponse, ReservationListResponse, StatsResponse, StudentListResponse,
    WinnersResponse,
};
use super::AppState;
use crate::db::{CheckIn, DbError};
use crate::state_machine::{EventId, StudentId};
use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveTime, Utc};
use rand::seq::SliceRandom;
use tower_http::trace::TraceLayer;

/// Number of winners drawn from the active event's attendees
const WINNER_COUNT: usize = 5;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let organizer = Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/students", get(list_students))
        .route("/api/events", post(create_event))
        .route("/api/events/active", get(get_active_event))
        .route("/api/events/active/winners", get(draw_winners))
        .route("/api/events/:id/attendees", get(list_attendees))
        .route("/api/reservations", get(list_reservations))
        .route("/api/attendance", post(check_in))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        .route("/api/health", get(health))
        .merge(organizer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================
// Authentication
// ============================================================

async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == &*state.admin_token);

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Rejected API request without valid token");
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}

// ============================================================
// Handlers
// ============================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let start_of_day = Utc::now()
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc();

    Ok(Json(StatsResponse {
        registrations_today: state.db.count_registrations_since(start_of_day)?,
        active_event_reservations: state.db.count_active_event_reservations()?,
        active_conversations: state.conversations.active_conversations(),
    }))
}

async fn list_students(
    State(state): State<AppState>,
) -> Result<Json<StudentListResponse>, AppError> {
    Ok(Json(StudentListResponse {
        students: state.db.list_students()?,
    }))
}

async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<EventResponse>), AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Event name is required".to_string()));
    }

    let event = state.db.create_event(name, req.date)?;
    tracing::info!(event_id = event.id, name = %event.name, date = %event.date, "Event activated");
    Ok((StatusCode::CREATED, Json(EventResponse { event })))
}

async fn get_active_event(
    State(state): State<AppState>,
) -> Result<Json<EventResponse>, AppError> {
    let event = state
        .db
        .get_active_event()?
        .ok_or_else(|| AppError::NotFound("No active event".to_string()))?;
    Ok(Json(EventResponse { event }))
}

async fn list_reservations(
    State(state): State<AppState>,
) -> Result<Json<ReservationListResponse>, AppError> {
    Ok(Json(ReservationListResponse {
        reservations: state.db.list_active_reservations()?,
    }))
}

async fn check_in(
    State(state): State<AppState>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<CheckInResponse>, AppError> {
    let event = state
        .db
        .get_active_event()?
        .ok_or_else(|| AppError::NotFound("No active event".to_string()))?;
    let student_id = StudentId(req.student_id);

    match state.db.check_in(student_id, event.event_id())? {
        CheckIn::Recorded => {}
        CheckIn::AlreadyCheckedIn => {
            return Err(AppError::Conflict(format!(
                "Student {student_id} is already checked in"
            )));
        }
        CheckIn::NoReservation => {
            return Err(AppError::Conflict(format!(
                "Student {student_id} has no reservation for {}",
                event.name
            )));
        }
    }

    let student = state.db.get_student(student_id)?;
    tracing::info!(student_id = %student_id, event_id = event.id, "Student checked in");
    Ok(Json(CheckInResponse {
        student_id: student.id,
        full_name: student.full_name,
        event_id: event.id,
    }))
}

async fn list_attendees(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> Result<Json<AttendeeListResponse>, AppError> {
    Ok(Json(AttendeeListResponse {
        event_id,
        attendees: state.db.list_attendees(EventId(event_id))?,
    }))
}

/// Picks up to five distinct attendees of the active event at random
async fn draw_winners(State(state): State<AppState>) -> Result<Json<WinnersResponse>, AppError> {
    let attendees = state.db.list_active_attendees()?;
    if attendees.is_empty() {
        return Err(AppError::NotFound("No attended people for now.".to_string()));
    }

    let mut rng = rand::thread_rng();
    let winners: Vec<_> = attendees
        .choose_multiple(&mut rng, WINNER_COUNT)
        .cloned()
        .collect();
    tracing::info!(attendees = attendees.len(), winners = winners.len(), "Winners drawn");
    Ok(Json(WinnersResponse { winners }))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::StudentNotFound(_) => AppError::NotFound(err.to_string()),
            DbError::DuplicateReservation { .. } => AppError::Conflict(err.to_string()),
            DbError::Sqlite(_) => {
                tracing::error!(error = %err, "Database error");
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Missing or invalid bearer token".to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
