// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    // All appointment operations require authentication
    let protected_routes = Router::new()
        // Booking and calendar
        .route("/book", post(handlers::book_appointment))
        .route("/my-appointments", get(handlers::get_my_appointments))
        .route("/schedule", get(handlers::get_doctor_schedule))
        .route("/waiting-patients", get(handlers::get_waiting_patients))
        .route("/patient/{patient_id}/history", get(handlers::get_patient_history))
        // Doctor lifecycle actions
        .route("/confirm/{appointment_id}", put(handlers::confirm_appointment))
        .route("/cancel/{appointment_id}", put(handlers::cancel_appointment))
        // Live video session protocol
        .route("/session/{appointment_id}/start", post(handlers::start_session))
        .route("/session/{appointment_id}/join", get(handlers::join_session))
        .route("/session/{appointment_id}/end", post(handlers::end_session))
        // Post-consultation records
        .route("/{appointment_id}/consult", post(handlers::submit_consult_notes))
        .route("/{appointment_id}/rating", post(handlers::submit_rating))
        // Patient withdrawal and admin cleanup
        .route("/{appointment_id}", delete(handlers::withdraw_appointment))
        .route("/cleanup", post(handlers::run_cleanup))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
