// libs/appointment-cell/src/services/conflict.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AppointmentError;
use crate::models::Appointment;
use crate::store::AppointmentStore;

/// Overlap checks for manual (slotless) bookings.
pub struct ConflictDetectionService {
    store: Arc<AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<AppointmentStore>) -> Self {
        Self { store }
    }

    /// Fail with `ScheduleConflict` if the professional already has an
    /// active appointment overlapping `[start, end)`.
    pub async fn ensure_no_conflict(
        &self,
        tenant_id: Uuid,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        debug!(
            "Checking conflicts for professional {} from {} to {}",
            professional_id, start_time, end_time
        );

        let conflicting: Vec<Uuid> = self
            .store
            .find_overlapping(tenant_id, professional_id, start_time, end_time, exclude_appointment_id)
            .await
            .into_iter()
            .map(|a| a.id)
            .collect();

        if !conflicting.is_empty() {
            warn!(
                "Conflict detected for professional {} - {} conflicting appointments",
                professional_id,
                conflicting.len()
            );
            return Err(AppointmentError::ScheduleConflict { conflicting });
        }

        Ok(())
    }

    /// Store a manual booking, re-running the overlap check under the
    /// store's write lock.
    pub async fn insert_checked(&self, appointment: Appointment, exclude_appointment_id: Option<Uuid>) -> Result<(), AppointmentError> {
        self.store
            .insert_if_no_overlap(appointment, exclude_appointment_id)
            .await
            .map_err(|conflicting| {
                warn!("Lost a race for professional time: {} conflicting appointments", conflicting.len());
                AppointmentError::ScheduleConflict { conflicting }
            })
    }
}
