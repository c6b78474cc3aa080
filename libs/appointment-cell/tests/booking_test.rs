// Booking engine integration tests against a mocked Supabase REST backend.

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{AppointmentError, AppointmentStatus, BookAppointmentRequest};
use appointment_cell::services::booking::AppointmentBookingService;
use shared_utils::test_utils::TestConfig;
use shared_utils::timezone;

const TOKEN: &str = "test-auth-token";

fn booking_service(server: &MockServer) -> AppointmentBookingService {
    AppointmentBookingService::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config())
}

fn book_request(doctor_id: Uuid, date: &str, start: &str, end: &str) -> BookAppointmentRequest {
    serde_json::from_value(json!({
        "doctor_id": doctor_id,
        "date": date,
        "start_time": start,
        "end_time": end,
        "type": "video",
    }))
    .unwrap()
}

fn doctor_row(doctor_id: Uuid, is_active: bool, is_verified: bool) -> Value {
    json!({
        "id": doctor_id,
        "is_active": is_active,
        "is_verified": is_verified,
        "specialty": "General Practice",
    })
}

fn appointment_row(
    id: Uuid,
    patient_id: Uuid,
    doctor_id: Uuid,
    status: &str,
    date: &str,
    start: &str,
    end: &str,
) -> Value {
    json!({
        "id": id,
        "patient_id": patient_id,
        "doctor_id": doctor_id,
        "status": status,
        "type": "video",
        "slot_date": timezone::civil_midnight(date).unwrap(),
        "start_time": start,
        "end_time": end,
        "duration_minutes": 30,
        "fees": 0,
        "created_at": Utc::now(),
        "updated_at": Utc::now(),
    })
}

async fn mock_eligible_doctor(server: &MockServer, doctor_id: Uuid) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([doctor_row(doctor_id, true, true)])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn booking_a_free_slot_creates_a_scheduled_appointment() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();
    let created_id = Uuid::new_v4();

    mock_eligible_doctor(&server, doctor_id).await;

    // No existing booking at this (day, start time)
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("start_time", "eq.10:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([appointment_row(
            created_id, patient_id, doctor_id, "scheduled", "2025-06-01", "10:00", "10:30",
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let appointment = booking_service(&server)
        .book_appointment(patient_id, book_request(doctor_id, "2025-06-01", "10:00", "10:30"), TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.id, created_id);
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.start_time, "10:00");
}

#[tokio::test]
async fn booking_an_occupied_slot_is_a_conflict() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    mock_eligible_doctor(&server, doctor_id).await;

    // Another non-cancelled appointment already holds 10:00 on that day.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("start_time", "eq.10:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment_row(
            Uuid::new_v4(),
            Uuid::new_v4(),
            doctor_id,
            "scheduled",
            "2025-06-01",
            "10:00",
            "10:30",
        )])))
        .mount(&server)
        .await;

    let result = booking_service(&server)
        .book_appointment(patient_id, book_request(doctor_id, "2025-06-01", "10:00", "10:30"), TOKEN)
        .await;

    assert_matches!(result, Err(AppointmentError::SlotConflict));
}

#[tokio::test]
async fn unverified_or_unknown_doctors_are_not_bookable() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let unverified = Uuid::new_v4();
    let unknown = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", unverified)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([doctor_row(unverified, true, false)])),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{}", unknown)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let service = booking_service(&server);

    let result = service
        .book_appointment(patient_id, book_request(unverified, "2025-06-01", "10:00", "10:30"), TOKEN)
        .await;
    assert_matches!(result, Err(AppointmentError::NotEligible));

    let result = service
        .book_appointment(patient_id, book_request(unknown, "2025-06-01", "10:00", "10:30"), TOKEN)
        .await;
    assert_matches!(result, Err(AppointmentError::NotEligible));
}

#[tokio::test]
async fn malformed_dates_and_times_are_rejected_before_any_lookup() {
    let server = MockServer::start().await;
    let service = booking_service(&server);
    let patient_id = Uuid::new_v4();
    let doctor_id = Uuid::new_v4();

    for (date, start, end) in [
        ("06/01/2025", "10:00", "10:30"),
        ("2025-13-45", "10:00", "10:30"),
        ("2025-06-01", "10am", "10:30"),
        ("2025-06-01", "10:00", "1030"),
    ] {
        let result = service
            .book_appointment(patient_id, book_request(doctor_id, date, start, end), TOKEN)
            .await;
        assert_matches!(result, Err(AppointmentError::ValidationError(_)));
    }

    // End not after start
    let result = service
        .book_appointment(patient_id, book_request(doctor_id, "2025-06-01", "10:30", "10:00"), TOKEN)
        .await;
    assert_matches!(result, Err(AppointmentError::ValidationError(_)));
}

#[tokio::test]
async fn withdrawing_an_owned_scheduled_appointment_removes_it() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id)))
        .and(query_param("patient_id", format!("eq.{}", patient_id)))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([appointment_row(
            appointment_id,
            patient_id,
            Uuid::new_v4(),
            "scheduled",
            "2025-06-01",
            "10:00",
            "10:30",
        )])))
        .mount(&server)
        .await;

    let removed = booking_service(&server)
        .withdraw_appointment(patient_id, appointment_id, TOKEN)
        .await
        .unwrap();
    assert_eq!(removed.id, appointment_id);
}

#[tokio::test]
async fn withdrawal_of_foreign_or_progressed_appointments_reports_not_found() {
    let server = MockServer::start().await;
    let patient_id = Uuid::new_v4();
    let appointment_id = Uuid::new_v4();

    // The filtered DELETE matches nothing - whether the record is missing,
    // owned by someone else, or already confirmed is indistinguishable.
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let result = booking_service(&server)
        .withdraw_appointment(patient_id, appointment_id, TOKEN)
        .await;
    assert_matches!(result, Err(AppointmentError::NotFound));
}

#[tokio::test]
async fn doctor_schedule_queries_the_requested_local_day() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let (day_start, _) = timezone::civil_day_bounds("2025-06-01").unwrap();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param(
            "slot_date",
            format!("gte.{}", day_start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        ))
        .and(query_param("status", "in.(scheduled,confirmed,ongoing)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            appointment_row(Uuid::new_v4(), Uuid::new_v4(), doctor_id, "confirmed", "2025-06-01", "09:00", "09:30"),
            appointment_row(Uuid::new_v4(), Uuid::new_v4(), doctor_id, "scheduled", "2025-06-01", "10:00", "10:30"),
        ])))
        .mount(&server)
        .await;

    let schedule = booking_service(&server)
        .doctor_schedule(doctor_id, Some("2025-06-01"), TOKEN)
        .await
        .unwrap();

    assert_eq!(schedule.len(), 2);
    assert!(schedule.iter().all(|a| a.doctor_id == doctor_id));
}
