// libs/appointment-cell/src/services/cleanup.rs
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    AppointmentError, AppointmentStatus, CleanupLogEntry, CleanupSummary, CleanupTrigger,
    NoShowType, SessionTimingConfig,
};
use crate::services::store::AppointmentStore;

/// Reconciles sessions left `ongoing` past the stale timeout - the doctor
/// never ended them (crash, network loss, forgetting). Safe to run
/// concurrently with itself and with in-flight `end` calls: each record is
/// claimed with a guarded write, and a lost race just skips that record.
pub struct StaleSessionCleanupService {
    store: Arc<AppointmentStore>,
    timing: SessionTimingConfig,
}

impl StaleSessionCleanupService {
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

    pub async fn cleanup_stale_sessions(
        &self,
        triggered_by: CleanupTrigger,
        auth_token: Option<&str>,
    ) -> Result<CleanupSummary, AppointmentError> {
        let cutoff = Utc::now() - Duration::minutes(self.timing.stale_timeout_minutes);
        let stale = self.store.stale_ongoing(cutoff, auth_token).await?;

        let mut summary = CleanupSummary {
            total_stale: stale.len() as u64,
            updated: 0,
        };

        for appointment in stale {
            let previous_status = appointment.status;
            // A join-timeout may already have classified the no-show; keep it.
            let no_show_type = appointment.no_show_type.unwrap_or(NoShowType::Timeout);

            let result = self
                .store
                .update_guarded(
                    appointment.id,
                    &[AppointmentStatus::Ongoing],
                    None,
                    json!({
                        "status": AppointmentStatus::NoShow,
                        "no_show_type": no_show_type,
                    }),
                    auth_token,
                )
                .await;

            match result {
                Ok(Some(updated)) => {
                    let entry = CleanupLogEntry {
                        appointment_id: appointment.id,
                        previous_status,
                        new_status: updated.status,
                        no_show_type: Some(no_show_type),
                        auto_fixed: true,
                        triggered_by,
                        created_at: Utc::now(),
                    };
                    if let Err(e) = self.store.append_cleanup_log(&entry, auth_token).await {
                        warn!(
                            "Failed to write cleanup log for appointment {}: {}",
                            appointment.id, e
                        );
                    }
                    summary.updated += 1;
                }
                Ok(None) => {
                    // Someone ended or reclassified the session between the
                    // query and our write. Not this sweep's record any more.
                    debug!(
                        "Appointment {} resolved before the sweep could claim it",
                        appointment.id
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to update stale appointment {}: {}",
                        appointment.id, e
                    );
                }
            }
        }

        info!(
            "Stale session cleanup ({}) finished: {} stale, {} updated",
            triggered_by, summary.total_stale, summary.updated
        );
        Ok(summary)
    }
}

/// Periodic driver for the sweep, owned by the service's composition root.
/// A ticker fires at the configured interval until the handle is shut down.
pub struct CleanupScheduler {
    service: Arc<StaleSessionCleanupService>,
    interval_minutes: u64,
}

impl CleanupScheduler {
    pub fn new(service: Arc<StaleSessionCleanupService>, interval_minutes: u64) -> Self {
        Self {
            service,
            interval_minutes,
        }
    }

    pub fn start(self) -> CleanupSchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let period = StdDuration::from_secs(self.interval_minutes * 60);
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; skip it so startup is not
            // a sweep.
            ticker.tick().await;

            info!(
                "Appointment cleanup scheduled (every {} minutes)",
                self.interval_minutes
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self
                            .service
                            .cleanup_stale_sessions(CleanupTrigger::Cron, None)
                            .await
                        {
                            Ok(summary) => debug!(
                                "Cleanup run completed: {} stale, {} updated",
                                summary.total_stale, summary.updated
                            ),
                            Err(e) => warn!("Cleanup run failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Cleanup scheduler shutting down");
                        break;
                    }
                }
            }
        });

        CleanupSchedulerHandle { shutdown_tx, task }
    }
}

pub struct CleanupSchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanupSchedulerHandle {
    /// Stop the ticker and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
