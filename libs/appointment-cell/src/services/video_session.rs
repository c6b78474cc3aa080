// libs/appointment-cell/src/services/video_session.rs
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, AppointmentType, CancelAppointmentRequest,
    NoShowType, SessionCredentials, SessionTimingConfig, VideoSession,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::store::AppointmentStore;

/// The live-encounter protocol: doctor confirm/cancel/start/end, patient
/// join. Ownership is structural - the caller id must match the appointment's
/// doctor or patient - and every transition goes through a guarded write so
/// concurrent actors race safely.
pub struct VideoSessionService {
    store: Arc<AppointmentStore>,
    lifecycle: AppointmentLifecycleService,
    timing: SessionTimingConfig,
}

impl VideoSessionService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_timing(config, SessionTimingConfig::default())
    }

    pub fn with_timing(config: &AppConfig, timing: SessionTimingConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            store: Arc::new(AppointmentStore::new(supabase)),
            lifecycle: AppointmentLifecycleService::new(),
            timing,
        }
    }

    /// Doctor accepts a scheduled booking.
    pub async fn confirm(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.store.fetch(appointment_id, Some(auth_token)).await?;

        if appointment.doctor_id != doctor_id {
            return Err(AppointmentError::Forbidden);
        }
        self.lifecycle
            .validate_status_transition(&appointment.status, &AppointmentStatus::Confirmed)?;

        let updated = self
            .store
            .update_guarded(
                appointment_id,
                &[AppointmentStatus::Scheduled],
                None,
                json!({ "status": AppointmentStatus::Confirmed }),
                Some(auth_token),
            )
            .await?;

        match updated {
            Some(appointment) => {
                info!("Appointment {} confirmed", appointment_id);
                Ok(appointment)
            }
            None => Err(self.stale_precondition(appointment_id, "confirm", auth_token).await),
        }
    }

    /// Doctor cancels before the consult starts; an optional reason lands in
    /// the appointment notes.
    pub async fn cancel(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.store.fetch(appointment_id, Some(auth_token)).await?;

        if appointment.doctor_id != doctor_id {
            return Err(AppointmentError::Forbidden);
        }
        self.lifecycle
            .validate_status_transition(&appointment.status, &AppointmentStatus::Cancelled)?;

        let mut patch = json!({ "status": AppointmentStatus::Cancelled });
        if let Some(reason) = request.reason {
            patch["notes"] = json!(reason);
        }

        let updated = self
            .store
            .update_guarded(
                appointment_id,
                &[AppointmentStatus::Scheduled, AppointmentStatus::Confirmed],
                None,
                patch,
                Some(auth_token),
            )
            .await?;

        match updated {
            Some(appointment) => {
                info!("Appointment {} cancelled", appointment_id);
                Ok(appointment)
            }
            None => Err(self.stale_precondition(appointment_id, "cancel", auth_token).await),
        }
    }

    /// Doctor opens the video room. Allowed only for confirmed video
    /// appointments, within the configured window either side of the
    /// scheduled instant, and only once per appointment.
    pub async fn start_session(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<(Appointment, SessionCredentials), AppointmentError> {
        let appointment = self.store.fetch(appointment_id, Some(auth_token)).await?;

        if appointment.doctor_id != doctor_id {
            return Err(AppointmentError::Forbidden);
        }
        if appointment.appointment_type != AppointmentType::Video {
            return Err(AppointmentError::InvalidState(
                "Only video appointments can start a session".to_string(),
            ));
        }
        if appointment.status != AppointmentStatus::Confirmed {
            return Err(AppointmentError::InvalidState(format!(
                "Cannot start appointment in '{}' state",
                appointment.status
            )));
        }
        if appointment.session_started_at().is_some() {
            return Err(AppointmentError::InvalidState(
                "Video session already started".to_string(),
            ));
        }

        let scheduled_at = appointment
            .scheduled_instant()
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;
        let window = Duration::minutes(self.timing.start_window_minutes);
        let now = Utc::now();

        if now < scheduled_at - window || now > scheduled_at + window {
            debug!(
                "Start rejected for appointment {}: now {} vs scheduled {}",
                appointment_id, now, scheduled_at
            );
            return Err(AppointmentError::OutsideWindow);
        }

        let session = VideoSession::open(
            appointment.id,
            scheduled_at,
            appointment.duration_minutes,
            self.timing.start_window_minutes,
            now,
        );
        let credentials = SessionCredentials::from(&session);

        let updated = self
            .store
            .update_guarded(
                appointment_id,
                &[AppointmentStatus::Confirmed],
                None,
                json!({
                    "status": AppointmentStatus::Ongoing,
                    "video_session": session,
                }),
                Some(auth_token),
            )
            .await?;

        match updated {
            Some(appointment) => {
                info!("Video session started for appointment {}", appointment_id);
                Ok((appointment, credentials))
            }
            None => Err(self.stale_precondition(appointment_id, "start", auth_token).await),
        }
    }

    /// Patient asks for the room credentials. Too early is retryable and
    /// leaves the record untouched; past the window the appointment is
    /// reclassified as a patient no-show rather than left in limbo.
    pub async fn join_session(
        &self,
        patient_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<SessionCredentials, AppointmentError> {
        let appointment = self.store.fetch(appointment_id, Some(auth_token)).await?;

        if appointment.appointment_type != AppointmentType::Video {
            return Err(AppointmentError::NotFound);
        }
        if appointment.patient_id != patient_id {
            return Err(AppointmentError::Forbidden);
        }
        if appointment.status != AppointmentStatus::Ongoing {
            return Err(AppointmentError::InvalidState(format!(
                "Cannot join appointment in '{}' state",
                appointment.status
            )));
        }

        let Some(session) = appointment.video_session.as_ref() else {
            return Err(AppointmentError::InvalidState(
                "Video session not properly initialized".to_string(),
            ));
        };

        let now = Utc::now();
        if now < session.start_window {
            return Err(AppointmentError::TooEarly);
        }
        if now > session.end_window {
            // The sweep or a concurrent join may already have reclassified
            // the record; losing that race is fine, the outcome is the same.
            let _ = self
                .store
                .update_guarded(
                    appointment_id,
                    &[AppointmentStatus::Ongoing],
                    None,
                    json!({
                        "status": AppointmentStatus::NoShow,
                        "no_show_type": NoShowType::PatientAbsent,
                    }),
                    Some(auth_token),
                )
                .await?;
            warn!(
                "Join window expired for appointment {}, marked patient-absent",
                appointment_id
            );
            return Err(AppointmentError::WindowExpired);
        }

        Ok(SessionCredentials::from(session))
    }

    /// Doctor closes the consult. If the reconciliation sweep already claimed
    /// the record, the guarded write matches nothing and the caller sees the
    /// state it lost to.
    pub async fn end_session(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.store.fetch(appointment_id, Some(auth_token)).await?;

        if appointment.doctor_id != doctor_id {
            return Err(AppointmentError::Forbidden);
        }
        if appointment.status != AppointmentStatus::Ongoing {
            return Err(AppointmentError::InvalidState(format!(
                "Cannot end appointment in '{}' state",
                appointment.status
            )));
        }

        let mut patch = json!({ "status": AppointmentStatus::Completed });
        if let Some(mut session) = appointment.video_session.clone() {
            session.ended_at = Some(Utc::now());
            patch["video_session"] = json!(session);
        }

        let updated = self
            .store
            .update_guarded(
                appointment_id,
                &[AppointmentStatus::Ongoing],
                None,
                patch,
                Some(auth_token),
            )
            .await?;

        match updated {
            Some(appointment) => {
                info!("Video session ended for appointment {}", appointment_id);
                Ok(appointment)
            }
            None => Err(self.stale_precondition(appointment_id, "end", auth_token).await),
        }
    }

    /// A guarded write matched nothing: another actor moved the record first.
    /// Re-read so the error reports the state that actually won.
    async fn stale_precondition(
        &self,
        appointment_id: Uuid,
        action: &str,
        auth_token: &str,
    ) -> AppointmentError {
        match self.store.fetch(appointment_id, Some(auth_token)).await {
            Ok(current) => AppointmentError::InvalidState(format!(
                "Cannot {} appointment in '{}' state",
                action, current.status
            )),
            Err(e) => e,
        }
    }
}
