// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// Pure appointment state machine. Every state-changing operation validates
/// here first; the store's guarded write then re-checks the same precondition
/// atomically.
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed.
    pub fn validate_status_transition(
        &self,
        current_status: &AppointmentStatus,
        new_status: &AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!(
            "Validating status transition from {} to {}",
            current_status, new_status
        );

        if !self.get_valid_transitions(current_status).contains(new_status) {
            warn!(
                "Invalid status transition attempted: {} -> {}",
                current_status, new_status
            );
            return Err(AppointmentError::InvalidState(format!(
                "Cannot move appointment from '{}' to '{}'",
                current_status, new_status
            )));
        }

        Ok(())
    }

    /// All valid next statuses for a given current status.
    pub fn get_valid_transitions(&self, current_status: &AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Ongoing,
                AppointmentStatus::Cancelled,
            ],
            AppointmentStatus::Ongoing => vec![
                AppointmentStatus::Completed,
                AppointmentStatus::NoShow,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed => vec![],
            AppointmentStatus::Cancelled => vec![],
            AppointmentStatus::NoShow => vec![],
        }
    }
}

impl Default for AppointmentLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn all_statuses() -> [AppointmentStatus; 6] {
        [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Ongoing,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ]
    }

    #[test]
    fn happy_path_transitions_are_allowed() {
        let lifecycle = AppointmentLifecycleService::new();
        for (from, to) in [
            (AppointmentStatus::Scheduled, AppointmentStatus::Confirmed),
            (AppointmentStatus::Confirmed, AppointmentStatus::Ongoing),
            (AppointmentStatus::Ongoing, AppointmentStatus::Completed),
        ] {
            assert!(lifecycle.validate_status_transition(&from, &to).is_ok());
        }
    }

    #[test]
    fn side_branches_are_allowed() {
        let lifecycle = AppointmentLifecycleService::new();
        assert!(lifecycle
            .validate_status_transition(&AppointmentStatus::Scheduled, &AppointmentStatus::Cancelled)
            .is_ok());
        assert!(lifecycle
            .validate_status_transition(&AppointmentStatus::Confirmed, &AppointmentStatus::Cancelled)
            .is_ok());
        assert!(lifecycle
            .validate_status_transition(&AppointmentStatus::Ongoing, &AppointmentStatus::NoShow)
            .is_ok());
    }

    #[test]
    fn terminal_states_admit_nothing() {
        let lifecycle = AppointmentLifecycleService::new();
        for terminal in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            for next in all_statuses() {
                assert_matches!(
                    lifecycle.validate_status_transition(&terminal, &next),
                    Err(AppointmentError::InvalidState(_))
                );
            }
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        let lifecycle = AppointmentLifecycleService::new();
        // A scheduled appointment cannot jump straight to ongoing or completed.
        assert_matches!(
            lifecycle.validate_status_transition(
                &AppointmentStatus::Scheduled,
                &AppointmentStatus::Ongoing
            ),
            Err(AppointmentError::InvalidState(_))
        );
        assert_matches!(
            lifecycle.validate_status_transition(
                &AppointmentStatus::Scheduled,
                &AppointmentStatus::Completed
            ),
            Err(AppointmentError::InvalidState(_))
        );
        // Cancellation is only legal before the consult starts.
        assert_matches!(
            lifecycle.validate_status_transition(
                &AppointmentStatus::Ongoing,
                &AppointmentStatus::Cancelled
            ),
            Err(AppointmentError::InvalidState(_))
        );
    }
}
