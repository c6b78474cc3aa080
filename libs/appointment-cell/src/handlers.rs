// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, BookAppointmentRequest, CancelAppointmentRequest, CleanupTrigger,
    ConsultNotesRequest, RatingRequest,
};
use crate::services::booking::AppointmentBookingService;
use crate::services::cleanup::StaleSessionCleanupService;
use crate::services::post_consult::PostConsultService;
use crate::services::video_session::VideoSessionService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub date: Option<String>,
}

// ==============================================================================
// SHARED HELPERS
// ==============================================================================

fn caller_id(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id).map_err(|_| AppError::Auth("Invalid subject in token".to_string()))
}

fn require_role(user: &User, role: &str) -> Result<(), AppError> {
    if user.has_role(role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "This action requires the '{}' role",
            role
        )))
    }
}

fn into_app_error(err: AppointmentError) -> AppError {
    match err {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::Forbidden => {
            AppError::Forbidden("Not authorized to act on this appointment".to_string())
        }
        AppointmentError::NotEligible => AppError::BadRequest("Doctor not available".to_string()),
        AppointmentError::SlotConflict => {
            AppError::Conflict("This time slot is already booked".to_string())
        }
        AppointmentError::ValidationError(msg) => AppError::BadRequest(msg),
        AppointmentError::InvalidState(msg) => AppError::BadRequest(msg),
        AppointmentError::OutsideWindow
        | AppointmentError::TooEarly
        | AppointmentError::WindowExpired => AppError::BadRequest(err.to_string()),
        AppointmentError::DatabaseError(msg) => AppError::Internal(msg),
    }
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let patient_id = caller_id(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .book_appointment(patient_id, request, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn withdraw_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = caller_id(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service
        .withdraw_appointment(patient_id, appointment_id, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment deleted successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_my_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = caller_id(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointments = booking_service
        .my_appointments(patient_id, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

#[axum::debug_handler]
pub async fn get_doctor_schedule(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<ScheduleQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "doctor")?;
    let doctor_id = caller_id(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointments = booking_service
        .doctor_schedule(doctor_id, query.date.as_deref(), auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

#[axum::debug_handler]
pub async fn get_waiting_patients(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "doctor")?;
    let doctor_id = caller_id(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let appointments = booking_service
        .waiting_patients(doctor_id, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({ "appointments": appointments })))
}

#[axum::debug_handler]
pub async fn get_patient_history(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "doctor")?;
    let doctor_id = caller_id(&user)?;
    let booking_service = AppointmentBookingService::new(&state);

    let history = booking_service
        .patient_history(doctor_id, patient_id, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "history": history,
        "message": "Patient history retrieved successfully"
    })))
}

// ==============================================================================
// LIFECYCLE HANDLERS (doctor confirm / cancel)
// ==============================================================================

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "doctor")?;
    let doctor_id = caller_id(&user)?;
    let session_service = VideoSessionService::new(&state);

    let appointment = session_service
        .confirm(doctor_id, appointment_id, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment confirmed successfully"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "doctor")?;
    let doctor_id = caller_id(&user)?;
    let session_service = VideoSessionService::new(&state);

    let request = request
        .map(|Json(r)| r)
        .unwrap_or(CancelAppointmentRequest { reason: None });

    let appointment = session_service
        .cancel(doctor_id, appointment_id, request, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled successfully"
    })))
}

// ==============================================================================
// VIDEO SESSION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn start_session(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "doctor")?;
    let doctor_id = caller_id(&user)?;
    let session_service = VideoSessionService::new(&state);

    let (_, credentials) = session_service
        .start_session(doctor_id, appointment_id, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "session": credentials,
        "message": "Video session started"
    })))
}

#[axum::debug_handler]
pub async fn join_session(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = caller_id(&user)?;
    let session_service = VideoSessionService::new(&state);

    let credentials = session_service
        .join_session(patient_id, appointment_id, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "session": credentials,
        "message": "Joined video session"
    })))
}

#[axum::debug_handler]
pub async fn end_session(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "doctor")?;
    let doctor_id = caller_id(&user)?;
    let session_service = VideoSessionService::new(&state);

    session_service
        .end_session(doctor_id, appointment_id, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Video session ended"
    })))
}

// ==============================================================================
// POST-CONSULTATION HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn submit_consult_notes(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ConsultNotesRequest>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "doctor")?;
    let doctor_id = caller_id(&user)?;
    let post_consult_service = PostConsultService::new(&state);

    let appointment = post_consult_service
        .submit_consult_notes(doctor_id, appointment_id, request, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Consultation submitted successfully"
    })))
}

#[axum::debug_handler]
pub async fn submit_rating(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RatingRequest>,
) -> Result<Json<Value>, AppError> {
    let patient_id = caller_id(&user)?;
    let post_consult_service = PostConsultService::new(&state);

    let appointment = post_consult_service
        .submit_rating(patient_id, appointment_id, request, auth.token())
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "rating": appointment.patient_rating,
        "feedback": appointment.patient_feedback,
        "message": "Rating submitted"
    })))
}

// ==============================================================================
// CLEANUP HANDLER
// ==============================================================================

#[axum::debug_handler]
pub async fn run_cleanup(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_role(&user, "admin")?;
    let cleanup_service = StaleSessionCleanupService::new(&state);

    let summary = cleanup_service
        .cleanup_stale_sessions(CleanupTrigger::Manual, Some(auth.token()))
        .await
        .map_err(into_app_error)?;

    Ok(Json(json!({
        "success": true,
        "results": summary,
        "message": "Appointment cleanup completed"
    })))
}
