// libs/appointment-cell/src/services/waitlist.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::{CapacityReservationService, SlotGuard};
use monitoring_cell::MetricsRecorder;
use shared_config::SchedulingConfig;

use crate::error::AppointmentError;
use crate::models::{
    Appointment, AppointmentOrigin, AppointmentStatus, AuditEventType, EnrollWaitlistRequest,
    Notification, WaitlistEntry, WaitlistStatus,
};
use crate::services::audit::{AuditDetails, AuditTrail};
use crate::services::collaborators::NotificationDispatcher;
use crate::store::AppointmentStore;

pub struct WaitlistService {
    config: SchedulingConfig,
    store: Arc<AppointmentStore>,
    capacity: Arc<CapacityReservationService>,
    audit: Arc<AuditTrail>,
    notifier: Arc<dyn NotificationDispatcher>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl WaitlistService {
    pub fn new(
        config: SchedulingConfig,
        store: Arc<AppointmentStore>,
        capacity: Arc<CapacityReservationService>,
        audit: Arc<AuditTrail>,
        notifier: Arc<dyn NotificationDispatcher>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self { config, store, capacity, audit, notifier, metrics }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.waitlist_enabled
    }

    /// Join the queue for a slot. Enrolling again updates the priority.
    #[instrument(skip(self, request), fields(slot_id = %request.slot_id, client_id = %request.client_id))]
    pub async fn enroll(&self, request: EnrollWaitlistRequest) -> Result<WaitlistEntry, AppointmentError> {
        if !self.config.waitlist_enabled {
            warn!("Waitlist enrollment attempted while disabled");
            return Err(AppointmentError::WaitlistDisabled);
        }
        if request.tenant_id.is_nil() {
            return Err(AppointmentError::InvalidTenant);
        }

        // Slot must exist for the tenant
        if self
            .capacity
            .store()
            .get_slot(request.tenant_id, request.slot_id)
            .await?
            .is_none()
        {
            return Err(AppointmentError::SlotNotFound);
        }

        let priority = request.priority.unwrap_or(self.config.default_waitlist_priority);
        let entry = self
            .store
            .upsert_waitlist_entry(request.tenant_id, request.slot_id, request.client_id, priority)
            .await;

        if entry.status == WaitlistStatus::Promoted {
            debug!("Waitlist entry {} was already promoted; left unchanged", entry.id);
        } else {
            info!("Waitlist entry {} active with priority {}", entry.id, entry.priority);
        }
        Ok(entry)
    }

    /// Withdraw from the queue.
    pub async fn leave(&self, tenant_id: Uuid, entry_id: Uuid) -> Result<WaitlistEntry, AppointmentError> {
        let entry = self
            .store
            .get_waitlist_entry(tenant_id, entry_id)
            .await
            .ok_or(AppointmentError::WaitlistEntryNotFound)?;

        if entry.status != WaitlistStatus::Active {
            debug!("Waitlist entry {} already {:?}", entry_id, entry.status);
            return Ok(entry);
        }

        self.store
            .set_waitlist_status(tenant_id, entry_id, WaitlistStatus::Cancelled, None)
            .await
            .ok_or(AppointmentError::WaitlistEntryNotFound)
    }

    /// All entries for a slot, next candidate first.
    pub async fn entries_for_slot(&self, tenant_id: Uuid, slot_id: Uuid) -> Vec<WaitlistEntry> {
        self.store.waitlist_for_slot(tenant_id, slot_id).await
    }

    /// Hand the unit just freed on `slot` to the best waiting client.
    ///
    /// Runs inside the cancellation's slot lock and reserves on the same
    /// guard, so no one else can take the unit between release and promotion.
    pub async fn promote(
        &self,
        slot: &mut SlotGuard,
        cancelled: &Appointment,
        actor_id: Uuid,
    ) -> Result<Option<Appointment>, AppointmentError> {
        if !self.config.waitlist_enabled || !self.capacity.has_room(slot, 1) {
            return Ok(None);
        }

        let Some(entry) = self.store.next_waitlist_candidate(slot.tenant_id, slot.id).await else {
            debug!("No waitlist candidates for slot {}", slot.id);
            return Ok(None);
        };

        self.capacity.reserve_locked(slot, 1)?;

        let now = Utc::now();
        let mut metadata = Map::new();
        metadata.insert("waitlist_entry_id".to_string(), json!(entry.id));

        let appointment = Appointment {
            id: Uuid::new_v4(),
            tenant_id: slot.tenant_id,
            client_id: entry.client_id,
            professional_id: slot.professional_id,
            slot_id: Some(slot.id),
            service_id: cancelled.service_id,
            start_time: slot.start_time,
            end_time: slot.start_time + cancelled.duration(),
            status: AppointmentStatus::Pending,
            origin: AppointmentOrigin::System,
            metadata,
            rescheduled_from: None,
            external_event_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(appointment.clone()).await;

        self.store
            .set_waitlist_status(slot.tenant_id, entry.id, WaitlistStatus::Promoted, Some(appointment.id))
            .await;

        let mut diff = Map::new();
        diff.insert("triggered_by".to_string(), json!(cancelled.id));
        diff.insert("waitlist_entry_id".to_string(), json!(entry.id));
        diff.insert("priority".to_string(), json!(entry.priority));

        self.audit
            .record(
                &appointment,
                actor_id,
                AuditEventType::WaitlistPromoted,
                AuditDetails {
                    to_status: Some(AppointmentStatus::Pending),
                    diff,
                    ..AuditDetails::default()
                },
            )
            .await;

        self.notifier.notify(Notification {
            tenant_id: appointment.tenant_id,
            recipient_id: appointment.client_id,
            title: "A spot opened up".to_string(),
            message: format!(
                "You have been booked from the waitlist for {}",
                appointment.start_time.format("%Y-%m-%d %H:%M UTC")
            ),
            kind: "waitlist_promoted".to_string(),
        });

        self.metrics.increment_counter("waitlist_promotions_total", &[]);
        info!(
            "Promoted waitlist entry {} into appointment {} on slot {}",
            entry.id, appointment.id, slot.id
        );

        Ok(Some(appointment))
    }
}
