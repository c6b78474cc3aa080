// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub status: AppointmentStatus,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
    /// Clinic-local midnight of the slot day, stored as a UTC instant.
    pub slot_date: DateTime<Utc>,
    /// Clinic-local clock times, "HH:mm".
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_session: Option<VideoSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_show_type: Option<NoShowType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_consult: Option<PostConsult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_rating: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub fees: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Absolute instant the consultation is scheduled to begin.
    pub fn scheduled_instant(&self) -> Result<DateTime<Utc>, shared_utils::timezone::TimeError> {
        shared_utils::timezone::local_date_time(self.slot_date, &self.start_time)
    }

    pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
        self.video_session.as_ref().and_then(|s| s.started_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Ongoing,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Ongoing => write!(f, "ongoing"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no-show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentType {
    #[default]
    Video,
    Audio,
    Chat,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::Video => write!(f, "video"),
            AppointmentType::Audio => write!(f, "audio"),
            AppointmentType::Chat => write!(f, "chat"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoShowType {
    DoctorLate,
    PatientAbsent,
    Timeout,
}

impl fmt::Display for NoShowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoShowType::DoctorLate => write!(f, "doctor-late"),
            NoShowType::PatientAbsent => write!(f, "patient-absent"),
            NoShowType::Timeout => write!(f, "timeout"),
        }
    }
}

// ==============================================================================
// VIDEO SESSION SUB-RECORD
// ==============================================================================

/// Live-session record embedded in a video appointment. Owned exclusively by
/// its appointment; created once when the doctor starts the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSession {
    pub room_token: String,
    pub pass_code: String,
    /// Earliest instant the patient may join.
    pub start_window: DateTime<Utc>,
    /// Latest instant the patient may join.
    pub end_window: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl VideoSession {
    /// Allocate room credentials and compute the join window. The window opens
    /// `window_minutes` before the scheduled instant and closes
    /// `window_minutes` after the scheduled consult would have ended, so a
    /// patient arriving mid-consult can still join.
    pub fn open(
        appointment_id: Uuid,
        scheduled_at: DateTime<Utc>,
        duration_minutes: i32,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let window = Duration::minutes(window_minutes);
        let mut rng = rand::thread_rng();
        let suffix: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        let pass_code: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();

        Self {
            room_token: format!("room-{}-{}", appointment_id, suffix),
            pass_code,
            start_window: scheduled_at - window,
            end_window: scheduled_at + Duration::minutes(duration_minutes as i64) + window,
            started_at: Some(now),
            ended_at: None,
        }
    }
}

/// Credentials handed to a participant who is allowed into the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub room_token: String,
    pub pass_code: String,
}

impl From<&VideoSession> for SessionCredentials {
    fn from(session: &VideoSession) -> Self {
        Self {
            room_token: session.room_token.clone(),
            pass_code: session.pass_code.clone(),
        }
    }
}

// ==============================================================================
// POST-CONSULTATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostConsult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_instructions: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

// ==============================================================================
// CLEANUP AUDIT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupTrigger {
    Cron,
    Manual,
}

impl fmt::Display for CleanupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupTrigger::Cron => write!(f, "cron"),
            CleanupTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Append-only audit record written by the reconciliation sweep, one per
/// force-transitioned appointment. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupLogEntry {
    pub appointment_id: Uuid,
    pub previous_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_show_type: Option<NoShowType>,
    pub auto_fixed: bool,
    pub triggered_by: CleanupTrigger,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub total_stale: u64,
    pub updated: u64,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    /// Local calendar day, "YYYY-MM-DD".
    pub date: String,
    /// Local clock times, "HH:mm".
    pub start_time: String,
    pub end_time: String,
    #[serde(rename = "type", default)]
    pub appointment_type: AppointmentType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultNotesRequest {
    pub notes: Option<String>,
    pub prescription: Option<String>,
    pub diagnosis: Option<String>,
    pub follow_up_instructions: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingRequest {
    pub rating: i32,
    pub feedback: Option<String>,
}

/// Fields the booking engine hands to the store when creating a record.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_type: AppointmentType,
    pub slot_date: DateTime<Utc>,
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: i32,
    pub fees: i32,
}

// ==============================================================================
// TIMING CONFIGURATION
// ==============================================================================

/// Every timing constant of the session protocol and the reconciliation
/// sweep, passed into services at construction.
#[derive(Debug, Clone)]
pub struct SessionTimingConfig {
    /// How far either side of the scheduled instant a doctor may start.
    pub start_window_minutes: i64,
    /// How long an `ongoing` session may sit without an `end` call before the
    /// sweep presumes it abandoned.
    pub stale_timeout_minutes: i64,
    /// Period of the background sweep.
    pub sweep_interval_minutes: u64,
    pub default_fee: i32,
}

impl Default for SessionTimingConfig {
    fn default() -> Self {
        Self {
            start_window_minutes: 10,
            stale_timeout_minutes: 45,
            sweep_interval_minutes: 30,
            default_fee: 0,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Not authorized to act on this appointment")]
    Forbidden,

    #[error("Doctor not available")]
    NotEligible,

    #[error("This time slot is already booked")]
    SlotConflict,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Current time is outside the allowed start window")]
    OutsideWindow,

    #[error("Joining window is not open yet")]
    TooEarly,

    #[error("Joining window has expired")]
    WindowExpired,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_utils::timezone;

    #[test]
    fn status_wire_spelling_is_kebab_case() {
        let json = serde_json::to_string(&AppointmentStatus::NoShow).unwrap();
        assert_eq!(json, "\"no-show\"");
        let back: AppointmentStatus = serde_json::from_str("\"no-show\"").unwrap();
        assert_eq!(back, AppointmentStatus::NoShow);
        assert_eq!(AppointmentStatus::NoShow.to_string(), "no-show");
    }

    #[test]
    fn no_show_type_round_trips() {
        for (value, wire) in [
            (NoShowType::DoctorLate, "\"doctor-late\""),
            (NoShowType::PatientAbsent, "\"patient-absent\""),
            (NoShowType::Timeout, "\"timeout\""),
        ] {
            assert_eq!(serde_json::to_string(&value).unwrap(), wire);
        }
    }

    #[test]
    fn video_session_window_covers_the_whole_consult() {
        let scheduled = timezone::civil_midnight("2025-06-01")
            .and_then(|day| timezone::local_date_time(day, "10:00"))
            .unwrap();
        let now = scheduled + Duration::minutes(2);
        let session = VideoSession::open(Uuid::new_v4(), scheduled, 30, 10, now);

        assert_eq!(session.start_window, scheduled - Duration::minutes(10));
        assert_eq!(session.end_window, scheduled + Duration::minutes(40));
        assert_eq!(session.started_at, Some(now));
        assert!(session.ended_at.is_none());
    }

    #[test]
    fn video_session_credentials_are_scoped_to_the_appointment() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let session = VideoSession::open(id, now, 30, 10, now);

        assert!(session.room_token.starts_with(&format!("room-{}-", id)));
        assert_eq!(session.pass_code.len(), 10);

        let other = VideoSession::open(id, now, 30, 10, now);
        assert_ne!(session.pass_code, other.pass_code);
    }

    #[test]
    fn terminal_statuses() {
        assert!(AppointmentStatus::Completed.is_terminal());
        assert!(AppointmentStatus::Cancelled.is_terminal());
        assert!(AppointmentStatus::NoShow.is_terminal());
        assert!(!AppointmentStatus::Ongoing.is_terminal());
    }
}
