// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_utils::timezone;

use crate::models::{
    Appointment, AppointmentError, BookAppointmentRequest, NewAppointment, SessionTimingConfig,
};
use crate::services::store::AppointmentStore;

/// Validates a proposed (doctor, date, start time) tuple against existing
/// bookings and doctor eligibility, then creates the appointment.
pub struct AppointmentBookingService {
    store: Arc<AppointmentStore>,
    timing: SessionTimingConfig,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_timing(config, SessionTimingConfig::default())
    }

    pub fn with_timing(config: &AppConfig, timing: SessionTimingConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        Self {
            store: Arc::new(AppointmentStore::new(supabase)),
            timing,
        }
    }

    pub async fn book_appointment(
        &self,
        patient_id: Uuid,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Booking appointment for patient {} with doctor {} on {} {}",
            patient_id, request.doctor_id, request.date, request.start_time
        );

        let slot_date = timezone::civil_midnight(&request.date)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;
        let start = timezone::local_date_time(slot_date, &request.start_time)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;
        let end = timezone::local_date_time(slot_date, &request.end_time)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;

        if end <= start {
            return Err(AppointmentError::ValidationError(
                "end_time must be after start_time".to_string(),
            ));
        }
        let duration_minutes = (end - start).num_minutes() as i32;

        self.verify_doctor_eligible(request.doctor_id, auth_token).await?;

        // A doctor holds at most one non-cancelled booking per (local day,
        // start time). Identical start times only; interval overlap is not
        // detected here.
        let day_bounds = timezone::civil_day_bounds(&request.date)
            .map_err(|e| AppointmentError::ValidationError(e.to_string()))?;
        let clashes = self
            .store
            .doctor_bookings_at(request.doctor_id, day_bounds, &request.start_time, Some(auth_token))
            .await?;

        if !clashes.is_empty() {
            warn!(
                "Slot conflict for doctor {} on {} at {}",
                request.doctor_id, request.date, request.start_time
            );
            return Err(AppointmentError::SlotConflict);
        }

        let appointment = self
            .store
            .insert(
                NewAppointment {
                    patient_id,
                    doctor_id: request.doctor_id,
                    appointment_type: request.appointment_type,
                    slot_date,
                    start_time: request.start_time,
                    end_time: request.end_time,
                    duration_minutes,
                    fees: self.timing.default_fee,
                },
                Some(auth_token),
            )
            .await?;

        info!("Appointment {} booked successfully", appointment.id);
        Ok(appointment)
    }

    /// Permanently remove a still-scheduled appointment owned by the caller.
    /// Missing, foreign and already-confirmed records all surface as
    /// `NotFound` so existence is never leaked to non-owners.
    pub async fn withdraw_appointment(
        &self,
        patient_id: Uuid,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Withdrawing appointment {} for patient {}", appointment_id, patient_id);

        let removed = self
            .store
            .delete_scheduled(appointment_id, patient_id, Some(auth_token))
            .await?
            .ok_or(AppointmentError::NotFound)?;

        info!("Appointment {} withdrawn", appointment_id);
        Ok(removed)
    }

    pub async fn my_appointments(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.store
            .appointments_for_patient(patient_id, Some(auth_token))
            .await
    }

    /// A doctor's active appointments for one local day; today when no date
    /// is given.
    pub async fn doctor_schedule(
        &self,
        doctor_id: Uuid,
        date: Option<&str>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let bounds = match date {
            Some(d) => timezone::civil_day_bounds(d)
                .map_err(|e| AppointmentError::ValidationError(e.to_string()))?,
            None => timezone::today_bounds(),
        };

        self.store
            .doctor_day_schedule(doctor_id, bounds, Some(auth_token))
            .await
    }

    pub async fn waiting_patients(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.store.waiting_for_doctor(doctor_id, Some(auth_token)).await
    }

    /// Completed consultations between this doctor and patient. Requires a
    /// prior doctor-patient relationship.
    pub async fn patient_history(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let has_access = self
            .store
            .doctor_has_seen_patient(doctor_id, patient_id, Some(auth_token))
            .await?;

        if !has_access {
            return Err(AppointmentError::Forbidden);
        }

        self.store
            .completed_history(doctor_id, patient_id, Some(auth_token))
            .await
    }

    async fn verify_doctor_eligible(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let Some(doctor) = self.store.fetch_doctor(doctor_id, Some(auth_token)).await? else {
            return Err(AppointmentError::NotEligible);
        };

        let is_active = doctor["is_active"].as_bool().unwrap_or(false);
        let is_verified = doctor["is_verified"].as_bool().unwrap_or(false);

        if !is_active || !is_verified {
            debug!(
                "Doctor {} rejected for booking (active: {}, verified: {})",
                doctor_id, is_active, is_verified
            );
            return Err(AppointmentError::NotEligible);
        }

        Ok(())
    }
}
