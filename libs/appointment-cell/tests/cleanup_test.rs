// Reconciliation sweep integration tests: stale-session detection, audit
// logging, idempotence and race behavior.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::CleanupTrigger;
use appointment_cell::services::cleanup::StaleSessionCleanupService;
use shared_utils::test_utils::TestConfig;

fn cleanup_service(server: &MockServer) -> StaleSessionCleanupService {
    StaleSessionCleanupService::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config())
}

/// An ongoing video appointment whose session started `started_minutes_ago`
/// minutes in the past.
fn stale_appointment(id: Uuid, started_minutes_ago: i64) -> Value {
    let started_at: DateTime<Utc> = Utc::now() - Duration::minutes(started_minutes_ago);
    json!({
        "id": id,
        "patient_id": Uuid::new_v4(),
        "doctor_id": Uuid::new_v4(),
        "status": "ongoing",
        "type": "video",
        "slot_date": Utc::now() - Duration::hours(6),
        "start_time": "10:00",
        "end_time": "10:30",
        "duration_minutes": 30,
        "fees": 0,
        "video_session": {
            "room_token": format!("room-{}-abc123", id),
            "pass_code": "p4ssc0de42",
            "start_window": started_at - Duration::minutes(10),
            "end_window": started_at + Duration::minutes(40),
            "started_at": started_at,
        },
        "created_at": Utc::now() - Duration::hours(7),
        "updated_at": started_at,
    })
}

fn swept_row(mut appointment: Value, no_show_type: &str) -> Value {
    appointment["status"] = json!("no-show");
    appointment["no_show_type"] = json!(no_show_type);
    appointment
}

async fn mock_stale_query(server: &MockServer, rows: Value) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.ongoing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

async fn mock_claim(server: &MockServer, id: Uuid, response_rows: Value) {
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(query_param("status", "eq.ongoing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(response_rows))
        .mount(server)
        .await;
}

#[tokio::test]
async fn sweep_reclassifies_abandoned_sessions_and_logs_each_one() {
    let server = MockServer::start().await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    mock_stale_query(
        &server,
        json!([stale_appointment(first, 60), stale_appointment(second, 90)]),
    )
    .await;
    mock_claim(&server, first, json!([swept_row(stale_appointment(first, 60), "timeout")])).await;
    mock_claim(&server, second, json!([swept_row(stale_appointment(second, 90), "timeout")])).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_cleanup_logs"))
        .and(body_partial_json(json!({
            "previous_status": "ongoing",
            "new_status": "no-show",
            "no_show_type": "timeout",
            "auto_fixed": true,
            "triggered_by": "manual",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
        .expect(2)
        .mount(&server)
        .await;

    let summary = cleanup_service(&server)
        .cleanup_stale_sessions(CleanupTrigger::Manual, None)
        .await
        .unwrap();

    assert_eq!(summary.total_stale, 2);
    assert_eq!(summary.updated, 2);
}

#[tokio::test]
async fn sweep_with_nothing_stale_is_a_no_op() {
    let server = MockServer::start().await;
    mock_stale_query(&server, json!([])).await;

    let summary = cleanup_service(&server)
        .cleanup_stale_sessions(CleanupTrigger::Cron, None)
        .await
        .unwrap();

    assert_eq!(summary.total_stale, 0);
    assert_eq!(summary.updated, 0);
}

#[tokio::test]
async fn a_record_claimed_by_a_concurrent_end_is_skipped_without_a_log_entry() {
    let server = MockServer::start().await;
    let won = Uuid::new_v4();
    let lost = Uuid::new_v4();

    mock_stale_query(
        &server,
        json!([stale_appointment(won, 60), stale_appointment(lost, 60)]),
    )
    .await;
    mock_claim(&server, won, json!([swept_row(stale_appointment(won, 60), "timeout")])).await;
    // The doctor's `end` call landed between the query and our write: the
    // guarded update matches nothing.
    mock_claim(&server, lost, json!([])).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_cleanup_logs"))
        .and(body_partial_json(json!({ "appointment_id": won })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
        .expect(1)
        .mount(&server)
        .await;

    let summary = cleanup_service(&server)
        .cleanup_stale_sessions(CleanupTrigger::Cron, None)
        .await
        .unwrap();

    assert_eq!(summary.total_stale, 2);
    assert_eq!(summary.updated, 1);
}

#[tokio::test]
async fn an_existing_no_show_classification_is_preserved() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    let mut stale = stale_appointment(id, 60);
    stale["no_show_type"] = json!("patient-absent");
    mock_stale_query(&server, json!([stale.clone()])).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", id)))
        .and(query_param("status", "eq.ongoing"))
        .and(body_partial_json(json!({
            "status": "no-show",
            "no_show_type": "patient-absent",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([swept_row(stale, "patient-absent")])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointment_cleanup_logs"))
        .and(body_partial_json(json!({ "no_show_type": "patient-absent" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
        .expect(1)
        .mount(&server)
        .await;

    let summary = cleanup_service(&server)
        .cleanup_stale_sessions(CleanupTrigger::Cron, None)
        .await
        .unwrap();

    assert_eq!(summary.updated, 1);
}
