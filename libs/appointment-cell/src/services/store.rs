// libs/appointment-cell/src/services/store.rs
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use std::sync::Arc;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CleanupLogEntry, NewAppointment,
};

/// Typed access to the appointments table. The store is the only
/// synchronization point between request handlers and the sweep: every state
/// change goes through a filtered write so the status precondition is checked
/// by the database, not by the caller.
pub struct AppointmentStore {
    supabase: Arc<SupabaseClient>,
}

fn representation_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}

fn encode_instant(instant: DateTime<Utc>) -> String {
    urlencoding::encode(&instant.to_rfc3339_opts(SecondsFormat::Secs, true)).into_owned()
}

fn parse_rows(rows: Vec<Value>) -> Result<Vec<Appointment>, AppointmentError> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<Appointment>, _>>()
        .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))
}

impl AppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub async fn fetch(
        &self,
        appointment_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn insert(
        &self,
        new: NewAppointment,
        auth_token: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        let now = Utc::now();
        let body = json!({
            "patient_id": new.patient_id,
            "doctor_id": new.doctor_id,
            "status": AppointmentStatus::Scheduled,
            "type": new.appointment_type,
            "slot_date": new.slot_date.to_rfc3339(),
            "start_time": new.start_time,
            "end_time": new.end_time,
            "duration_minutes": new.duration_minutes,
            "fees": new.fees,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                auth_token,
                Some(body),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(rows)?
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::DatabaseError("Failed to create appointment".to_string()))
    }

    /// Conditional update: "transition only if the current status is one of
    /// `expected`". The precondition rides in the PATCH filter, so two racing
    /// transitions resolve at the database and exactly one wins; the loser
    /// gets `None` back.
    pub async fn update_guarded(
        &self,
        appointment_id: Uuid,
        expected: &[AppointmentStatus],
        extra_filter: Option<&str>,
        patch: Value,
        auth_token: Option<&str>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let guard = match expected {
            [single] => format!("status=eq.{}", single),
            many => {
                let statuses: Vec<String> = many.iter().map(|s| s.to_string()).collect();
                format!("status=in.({})", statuses.join(","))
            }
        };

        let mut path = format!("/rest/v1/appointments?id=eq.{}&{}", appointment_id, guard);
        if let Some(filter) = extra_filter {
            path.push('&');
            path.push_str(filter);
        }

        let mut patch = patch;
        if let Value::Object(ref mut fields) = patch {
            fields.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                auth_token,
                Some(patch),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if rows.is_empty() {
            debug!(
                "Guarded update matched no rows for appointment {} (stale precondition)",
                appointment_id
            );
            return Ok(None);
        }

        Ok(parse_rows(rows)?.into_iter().next())
    }

    /// Hard delete, allowed only while the record is still `scheduled` and
    /// owned by the withdrawing patient. Ownership and state ride in the
    /// DELETE filter so non-owners cannot distinguish "missing" from "not
    /// yours".
    pub async fn delete_scheduled(
        &self,
        appointment_id: Uuid,
        patient_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&patient_id=eq.{}&status=eq.{}",
            appointment_id,
            patient_id,
            AppointmentStatus::Scheduled
        );

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                auth_token,
                None,
                Some(representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(parse_rows(rows)?.into_iter().next())
    }

    /// Non-cancelled bookings a doctor already holds at the exact local start
    /// time on the given local day.
    pub async fn doctor_bookings_at(
        &self,
        doctor_id: Uuid,
        day_bounds: (DateTime<Utc>, DateTime<Utc>),
        start_time: &str,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let (day_start, day_end) = day_bounds;
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&slot_date=gte.{}&slot_date=lt.{}&start_time=eq.{}&status=neq.{}",
            doctor_id,
            encode_instant(day_start),
            encode_instant(day_end),
            urlencoding::encode(start_time),
            AppointmentStatus::Cancelled
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(rows)
    }

    pub async fn appointments_for_patient(
        &self,
        patient_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=slot_date.asc&limit=20",
            patient_id
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(rows)
    }

    /// Active appointments for a doctor within a local day.
    pub async fn doctor_day_schedule(
        &self,
        doctor_id: Uuid,
        day_bounds: (DateTime<Utc>, DateTime<Utc>),
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let (day_start, day_end) = day_bounds;
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&slot_date=gte.{}&slot_date=lt.{}&status=in.(scheduled,confirmed,ongoing)&order=start_time.asc",
            doctor_id,
            encode_instant(day_start),
            encode_instant(day_end),
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(rows)
    }

    pub async fn waiting_for_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&status=eq.{}&order=slot_date.asc&limit=50",
            doctor_id,
            AppointmentStatus::Confirmed
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(rows)
    }

    /// Whether any appointment, in any state, links this doctor and patient.
    pub async fn doctor_has_seen_patient(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<bool, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&patient_id=eq.{}&limit=1",
            doctor_id, patient_id
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(!rows.is_empty())
    }

    pub async fn completed_history(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&patient_id=eq.{}&status=eq.{}&order=created_at.desc&limit=100",
            doctor_id,
            patient_id,
            AppointmentStatus::Completed
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(rows)
    }

    /// Ongoing sessions whose `started_at` is older than `cutoff`.
    pub async fn stale_ongoing(
        &self,
        cutoff: DateTime<Utc>,
        auth_token: Option<&str>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?status=eq.{}&video_session->>started_at=lt.{}",
            AppointmentStatus::Ongoing,
            encode_instant(cutoff),
        );

        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        parse_rows(rows)
    }

    /// Append one immutable audit record. Entries are never updated.
    pub async fn append_cleanup_log(
        &self,
        entry: &CleanupLogEntry,
        auth_token: Option<&str>,
    ) -> Result<(), AppointmentError> {
        let body = serde_json::to_value(entry)
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let _rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointment_cleanup_logs",
                auth_token,
                Some(body),
                Some(representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Raw doctor row, for eligibility checks at booking time.
    pub async fn fetch_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: Option<&str>,
    ) -> Result<Option<Value>, AppointmentError> {
        let path = format!("/rest/v1/doctors?id=eq.{}", doctor_id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, auth_token, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().next())
    }
}
