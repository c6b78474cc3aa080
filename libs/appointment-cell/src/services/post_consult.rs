// libs/appointment-cell/src/services/post_consult.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, ConsultNotesRequest, PostConsult,
    RatingRequest,
};
use crate::services::store::AppointmentStore;

/// Write-once records attached after a consultation completes: the doctor's
/// consultation notes and the patient's rating.
pub struct PostConsultService {
    store: Arc<AppointmentStore>,
}

impl PostConsultService {
    pub fn new(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            store: Arc::new(AppointmentStore::new(supabase)),
        }
    }

    pub async fn submit_consult_notes(
        &self,
        doctor_id: Uuid,
        appointment_id: Uuid,
        request: ConsultNotesRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.store.fetch(appointment_id, Some(auth_token)).await?;

        if appointment.doctor_id != doctor_id {
            return Err(AppointmentError::Forbidden);
        }
        if appointment.status != AppointmentStatus::Completed {
            return Err(AppointmentError::InvalidState(
                "Cannot submit consultation for incomplete appointment".to_string(),
            ));
        }
        if appointment.post_consult.is_some() {
            return Err(AppointmentError::InvalidState(
                "Consultation already submitted".to_string(),
            ));
        }

        let record = PostConsult {
            notes: request.notes,
            prescription: request.prescription,
            diagnosis: request.diagnosis,
            follow_up_instructions: request.follow_up_instructions,
            submitted_at: Utc::now(),
        };

        // The null filter makes the write-once guarantee hold even against a
        // concurrent duplicate submission.
        let updated = self
            .store
            .update_guarded(
                appointment_id,
                &[AppointmentStatus::Completed],
                Some("post_consult=is.null"),
                json!({ "post_consult": record }),
                Some(auth_token),
            )
            .await?
            .ok_or_else(|| {
                AppointmentError::InvalidState("Consultation already submitted".to_string())
            })?;

        info!("Consultation notes submitted for appointment {}", appointment_id);
        Ok(updated)
    }

    pub async fn submit_rating(
        &self,
        patient_id: Uuid,
        appointment_id: Uuid,
        request: RatingRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        if !(1..=5).contains(&request.rating) {
            return Err(AppointmentError::ValidationError(
                "Rating must be a number between 1 and 5".to_string(),
            ));
        }

        let appointment = self.store.fetch(appointment_id, Some(auth_token)).await?;

        if appointment.patient_id != patient_id {
            return Err(AppointmentError::Forbidden);
        }
        if appointment.status != AppointmentStatus::Completed {
            return Err(AppointmentError::InvalidState(
                "Can only rate completed appointments".to_string(),
            ));
        }
        if appointment.patient_rating.is_some() {
            return Err(AppointmentError::InvalidState(
                "Rating already submitted".to_string(),
            ));
        }

        let updated = self
            .store
            .update_guarded(
                appointment_id,
                &[AppointmentStatus::Completed],
                Some("patient_rating=is.null"),
                json!({
                    "patient_rating": request.rating,
                    "patient_feedback": request.feedback.unwrap_or_default(),
                }),
                Some(auth_token),
            )
            .await?
            .ok_or_else(|| AppointmentError::InvalidState("Rating already submitted".to_string()))?;

        info!("Rating submitted for appointment {}", appointment_id);
        Ok(updated)
    }
}
