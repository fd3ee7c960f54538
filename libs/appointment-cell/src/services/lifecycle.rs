// libs/appointment-cell/src/services/lifecycle.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::{CapacityReservationService, Slot, SlotGuard};
use monitoring_cell::MetricsRecorder;
use shared_config::SchedulingConfig;

use crate::error::AppointmentError;
use crate::models::{
    Appointment, AppointmentOrigin, AppointmentStatus, AuditEventType, CancelAppointmentRequest,
    CreateAppointmentRequest, Notification, RescheduleAppointmentRequest, ServiceDefinition,
    PENDING_REQUIREMENTS_KEY,
};
use crate::services::audit::{AuditDetails, AuditTrail};
use crate::services::collaborators::Collaborators;
use crate::services::conflict::ConflictDetectionService;
use crate::services::waitlist::WaitlistService;
use crate::store::AppointmentStore;

const ACTIVE_STATUSES: [AppointmentStatus; 3] = [
    AppointmentStatus::Pending,
    AppointmentStatus::Confirmed,
    AppointmentStatus::InProgress,
];

/// Owns every appointment status change.
pub struct AppointmentLifecycleService {
    config: SchedulingConfig,
    store: Arc<AppointmentStore>,
    capacity: Arc<CapacityReservationService>,
    conflicts: ConflictDetectionService,
    waitlist: Arc<WaitlistService>,
    audit: Arc<AuditTrail>,
    collaborators: Collaborators,
    metrics: Arc<dyn MetricsRecorder>,
}

/// Start, end and slot a booking resolved to.
struct Placement {
    professional_id: Uuid,
    slot: Option<Slot>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl AppointmentLifecycleService {
    pub fn new(
        config: SchedulingConfig,
        store: Arc<AppointmentStore>,
        capacity: Arc<CapacityReservationService>,
        waitlist: Arc<WaitlistService>,
        audit: Arc<AuditTrail>,
        collaborators: Collaborators,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            conflicts: ConflictDetectionService::new(Arc::clone(&store)),
            config,
            store,
            capacity,
            waitlist,
            audit,
            collaborators,
            metrics,
        }
    }

    // ==============================================================================
    // CREATE
    // ==============================================================================

    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id, professional_id = %request.professional_id))]
    pub async fn create(&self, request: CreateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let result = self.create_inner(request).await;
        self.record_outcome("create", &result);
        result
    }

    async fn create_inner(&self, request: CreateAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let tenant_id = request.tenant_id;
        if tenant_id.is_nil() {
            return Err(AppointmentError::InvalidTenant);
        }

        debug!("Creating appointment for client {}", request.client_id);

        let service = self.resolve_service(tenant_id, request.service_id).await?;
        if let Some(service) = &service {
            self.check_competency(tenant_id, request.professional_id, service).await?;
        }

        let placement = self
            .place(
                tenant_id,
                request.professional_id,
                request.slot_id,
                request.start_time,
                request.end_time,
                service.as_ref(),
                None,
            )
            .await?;

        if let Some(service) = &service {
            self.check_session_interval(tenant_id, request.client_id, service, placement.start_time)
                .await?;
        }

        let mut metadata = request.metadata;
        if let Some(service) = service.as_ref().filter(|s| !s.pre_visit_requirements.is_empty()) {
            metadata.insert(
                PENDING_REQUIREMENTS_KEY.to_string(),
                json!(service.pre_visit_requirements),
            );
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            tenant_id,
            client_id: request.client_id,
            professional_id: placement.professional_id,
            slot_id: placement.slot.as_ref().map(|s| s.id),
            service_id: service.as_ref().map(|s| s.id),
            start_time: placement.start_time,
            end_time: placement.end_time,
            status: request.origin.initial_status(),
            origin: request.origin,
            metadata,
            rescheduled_from: None,
            external_event_id: None,
            created_at: now,
            updated_at: now,
        };

        match &placement.slot {
            Some(slot) => {
                let mut guard = self.capacity.lock(tenant_id, slot.id).await?;
                self.capacity.reserve_locked(&mut guard, 1)?;
                self.store.insert(appointment.clone()).await;
                self.capacity.after_capacity_change(&guard).await;
            }
            None => self.conflicts.insert_checked(appointment.clone(), None).await?,
        }

        let mut diff = Map::new();
        diff.insert("service_id".to_string(), json!(appointment.service_id));
        diff.insert("start_time".to_string(), json!(appointment.start_time));
        diff.insert("end_time".to_string(), json!(appointment.end_time));
        diff.insert("professional_id".to_string(), json!(appointment.professional_id));

        self.audit
            .record(
                &appointment,
                request.actor_id,
                AuditEventType::Created,
                AuditDetails {
                    to_status: Some(appointment.status),
                    diff,
                    ..AuditDetails::default()
                },
            )
            .await;

        info!(
            "Appointment {} created as {} for {}",
            appointment.id, appointment.status, appointment.start_time
        );

        self.notify_parties(&appointment, "Appointment booked", "appointment_created");
        Ok(self.mirror(appointment).await)
    }

    // ==============================================================================
    // CANCEL
    // ==============================================================================

    /// Cancel an appointment and hand its slot unit to the waitlist.
    /// Cancelling a cancelled or completed appointment returns it unchanged.
    #[instrument(skip(self, request))]
    pub async fn cancel(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let result = self.cancel_inner(tenant_id, appointment_id, request).await;
        self.record_outcome("cancel", &result);
        result
    }

    async fn cancel_inner(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(tenant_id, appointment_id).await?;

        match current.status {
            AppointmentStatus::Cancelled | AppointmentStatus::Completed => {
                debug!("Appointment {} already {}; cancel is a no-op", appointment_id, current.status);
                return Ok(current);
            }
            AppointmentStatus::NoShow | AppointmentStatus::Rescheduled => {
                return Err(AppointmentError::InvalidStatusTransition {
                    from: current.status,
                    to: AppointmentStatus::Cancelled,
                });
            }
            _ => {}
        }

        self.check_cancellation_notice(&current, request.cancelled_by)?;

        let (from, cancelled) = match current.slot_id {
            Some(slot_id) => {
                let mut guard = self.capacity.lock(tenant_id, slot_id).await?;

                let (from, cancelled) = match self
                    .store
                    .transition(tenant_id, appointment_id, &ACTIVE_STATUSES, AppointmentStatus::Cancelled, |_| {})
                    .await
                {
                    Ok(moved) => moved,
                    Err(err) => return self.settled_or(tenant_id, appointment_id, err).await,
                };

                self.capacity.release_locked(&mut guard, 1);
                self.promote_waitlist(&mut guard, &cancelled, request.actor_id).await;
                self.capacity.after_capacity_change(&guard).await;

                (from, cancelled)
            }
            None => match self
                .store
                .transition(tenant_id, appointment_id, &ACTIVE_STATUSES, AppointmentStatus::Cancelled, |_| {})
                .await
            {
                Ok(moved) => moved,
                Err(err) => return self.settled_or(tenant_id, appointment_id, err).await,
            },
        };

        self.audit
            .record(
                &cancelled,
                request.actor_id,
                AuditEventType::Cancelled,
                AuditDetails::transition(from, AppointmentStatus::Cancelled).with_reason(request.reason),
            )
            .await;

        info!("Appointment {} cancelled by {}", appointment_id, request.cancelled_by);

        self.notify_parties(&cancelled, "Appointment cancelled", "appointment_cancelled");
        Ok(self.mirror_status(cancelled).await)
    }

    // ==============================================================================
    // RESCHEDULE
    // ==============================================================================

    /// Cancel `appointment_id` and book its successor in one step. Both
    /// slots are locked before anything changes, so a failure leaves the
    /// original booking untouched.
    #[instrument(skip(self, request))]
    pub async fn reschedule(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let result = self.reschedule_inner(tenant_id, appointment_id, request).await;
        self.record_outcome("reschedule", &result);
        result
    }

    async fn reschedule_inner(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let source = self.get_appointment(tenant_id, appointment_id).await?;

        if !source.status.is_active() {
            warn!("Cannot reschedule appointment {} in status {}", source.id, source.status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: source.status,
                to: AppointmentStatus::Rescheduled,
            });
        }

        let length = self.chain_length(tenant_id, &source).await;
        if length >= self.config.max_reschedule_chain_length {
            warn!("Reschedule chain for {} is {} links long", source.id, length);
            return Err(AppointmentError::RescheduleLimitExceeded {
                length,
                max: self.config.max_reschedule_chain_length,
            });
        }

        self.check_cancellation_notice(&source, request.requested_by)?;

        let service = match source.service_id {
            Some(service_id) => self.fetch_service(tenant_id, service_id).await?,
            None => None,
        };

        let professional_id = request.new_professional_id.unwrap_or(source.professional_id);
        if professional_id != source.professional_id {
            if let Some(service) = &service {
                self.check_competency(tenant_id, professional_id, service).await?;
            }
        }

        let placement = self
            .place(
                tenant_id,
                professional_id,
                request.new_slot_id,
                request.new_start_time,
                request.new_end_time,
                service.as_ref(),
                Some(source.id),
            )
            .await?;

        let target_slot_id = placement.slot.as_ref().map(|s| s.id);
        let same_slot = source.slot_id.is_some() && source.slot_id == target_slot_id;

        let (mut source_guard, mut target_guard) = match (source.slot_id, target_slot_id) {
            (Some(from_slot), Some(to_slot)) if from_slot != to_slot => {
                let (a, b) = self.capacity.lock_pair(tenant_id, from_slot, to_slot).await?;
                (Some(a), Some(b))
            }
            (Some(from_slot), _) => (Some(self.capacity.lock(tenant_id, from_slot).await?), None),
            (None, Some(to_slot)) => (None, Some(self.capacity.lock(tenant_id, to_slot).await?)),
            (None, None) => (None, None),
        };

        // Everything that can refuse happens before the first write
        if let Some(target) = target_guard.as_mut() {
            self.capacity.reserve_locked(target, 1)?;
        }
        if same_slot {
            if let Some(guard) = source_guard.as_ref().filter(|g| !g.is_active) {
                return Err(AppointmentError::CapacityExceeded { slot_id: guard.id });
            }
        }

        let now = Utc::now();
        let successor = Appointment {
            id: Uuid::new_v4(),
            tenant_id,
            client_id: source.client_id,
            professional_id: placement.professional_id,
            slot_id: target_slot_id,
            service_id: source.service_id,
            start_time: placement.start_time,
            end_time: placement.end_time,
            status: AppointmentStatus::Confirmed,
            origin: request.requested_by,
            metadata: source.metadata.clone(),
            rescheduled_from: Some(source.id),
            external_event_id: None,
            created_at: now,
            updated_at: now,
        };

        // A manual successor claims its time before the source lets go
        if target_slot_id.is_none() {
            self.conflicts.insert_checked(successor.clone(), Some(source.id)).await?;
        }

        let (from, cancelled_source) = match self
            .store
            .transition(tenant_id, source.id, &ACTIVE_STATUSES, AppointmentStatus::Cancelled, |_| {})
            .await
        {
            Ok(moved) => moved,
            Err(err) => {
                if let Some(target) = target_guard.as_mut() {
                    self.capacity.release_locked(target, 1);
                }
                if target_slot_id.is_none() {
                    self.store.remove(tenant_id, successor.id).await;
                }
                return Err(err);
            }
        };

        // A same-slot move keeps its unit
        if !same_slot {
            if let Some(guard) = source_guard.as_mut() {
                self.capacity.release_locked(guard, 1);
            }
        }
        if target_slot_id.is_some() {
            self.store.insert(successor.clone()).await;
        }

        if let Some(guard) = source_guard.as_mut() {
            if !same_slot {
                self.promote_waitlist(guard, &cancelled_source, request.actor_id).await;
            }
            self.capacity.after_capacity_change(guard).await;
        }
        if let Some(guard) = target_guard.as_ref() {
            self.capacity.after_capacity_change(guard).await;
        }
        drop(source_guard);
        drop(target_guard);

        let mut cancel_diff = Map::new();
        cancel_diff.insert("rescheduled_to".to_string(), json!(successor.id));
        self.audit
            .record(
                &cancelled_source,
                request.actor_id,
                AuditEventType::Cancelled,
                AuditDetails::transition(from, AppointmentStatus::Cancelled)
                    .with_reason(request.reason.clone())
                    .with_diff(cancel_diff),
            )
            .await;

        self.audit
            .record(
                &successor,
                request.actor_id,
                AuditEventType::Rescheduled,
                AuditDetails::transition(from, AppointmentStatus::Confirmed)
                    .with_reason(request.reason)
                    .with_diff(reschedule_diff(&source, &successor)),
            )
            .await;

        info!(
            "Appointment {} rescheduled to {} at {}",
            source.id, successor.id, successor.start_time
        );

        self.notify_parties(&successor, "Appointment rescheduled", "appointment_rescheduled");
        self.mirror_status(cancelled_source).await;
        Ok(self.mirror(successor).await)
    }

    // ==============================================================================
    // STATUS TRANSITIONS
    // ==============================================================================

    #[instrument(skip(self))]
    pub async fn confirm(&self, tenant_id: Uuid, appointment_id: Uuid, actor_id: Uuid) -> Result<Appointment, AppointmentError> {
        let result = self
            .apply_transition(
                tenant_id,
                appointment_id,
                &[AppointmentStatus::Pending],
                AppointmentStatus::Confirmed,
                actor_id,
                AuditEventType::Confirmed,
            )
            .await;
        self.record_outcome("confirm", &result);
        result
    }

    /// CONFIRMED → IN_PROGRESS, blocked while pre-visit requirements remain.
    #[instrument(skip(self))]
    pub async fn check_in(&self, tenant_id: Uuid, appointment_id: Uuid, actor_id: Uuid) -> Result<Appointment, AppointmentError> {
        let result = self.check_in_inner(tenant_id, appointment_id, actor_id).await;
        self.record_outcome("check_in", &result);
        result
    }

    async fn check_in_inner(&self, tenant_id: Uuid, appointment_id: Uuid, actor_id: Uuid) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(tenant_id, appointment_id).await?;

        if current.status != AppointmentStatus::Confirmed {
            return Err(AppointmentError::InvalidStatusTransition {
                from: current.status,
                to: AppointmentStatus::InProgress,
            });
        }

        let pending = current.pending_requirements();
        if !pending.is_empty() {
            warn!("Check-in blocked for {}: {} requirements outstanding", appointment_id, pending.len());
            return Err(AppointmentError::PendingRequirements(pending));
        }

        self.apply_transition(
            tenant_id,
            appointment_id,
            &[AppointmentStatus::Confirmed],
            AppointmentStatus::InProgress,
            actor_id,
            AuditEventType::CheckedIn,
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn complete(&self, tenant_id: Uuid, appointment_id: Uuid, actor_id: Uuid) -> Result<Appointment, AppointmentError> {
        let result = self
            .apply_transition(
                tenant_id,
                appointment_id,
                &[AppointmentStatus::Confirmed, AppointmentStatus::InProgress],
                AppointmentStatus::Completed,
                actor_id,
                AuditEventType::Completed,
            )
            .await;
        self.record_outcome("complete", &result);
        result
    }

    /// The slot unit stays consumed; the time has passed either way.
    #[instrument(skip(self))]
    pub async fn mark_no_show(&self, tenant_id: Uuid, appointment_id: Uuid, actor_id: Uuid) -> Result<Appointment, AppointmentError> {
        let result = self
            .apply_transition(
                tenant_id,
                appointment_id,
                &[AppointmentStatus::Pending, AppointmentStatus::Confirmed],
                AppointmentStatus::NoShow,
                actor_id,
                AuditEventType::NoShow,
            )
            .await;
        self.record_outcome("no_show", &result);
        result
    }

    /// Clear outstanding pre-visit requirements. Status is unchanged.
    #[instrument(skip(self))]
    pub async fn resolve_requirements(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let result = self.resolve_requirements_inner(tenant_id, appointment_id, actor_id).await;
        self.record_outcome("resolve_requirements", &result);
        result
    }

    async fn resolve_requirements_inner(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment(tenant_id, appointment_id).await?;
        let cleared = current.pending_requirements();

        if cleared.is_empty() && !current.metadata.contains_key(PENDING_REQUIREMENTS_KEY) {
            debug!("Appointment {} has no pending requirements", appointment_id);
            return Ok(current);
        }

        let updated = self
            .store
            .update(tenant_id, appointment_id, |a| {
                a.metadata.remove(PENDING_REQUIREMENTS_KEY);
            })
            .await?;

        let mut diff = Map::new();
        diff.insert("cleared".to_string(), json!(cleared));
        self.audit
            .record(
                &updated,
                actor_id,
                AuditEventType::RequirementsResolved,
                AuditDetails::default().with_diff(diff),
            )
            .await;

        info!("Resolved {} requirements on {}", cleared.len(), appointment_id);

        Ok(updated)
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    pub async fn get_appointment(&self, tenant_id: Uuid, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        if tenant_id.is_nil() {
            return Err(AppointmentError::InvalidTenant);
        }

        self.store
            .get(tenant_id, appointment_id)
            .await
            .ok_or(AppointmentError::NotFound)
    }

    /// Lineage from `appointment_id` back to the original booking, newest
    /// first. Stops at the configured maximum or on a repeated id.
    pub async fn reschedule_chain(&self, tenant_id: Uuid, appointment_id: Uuid) -> Result<Vec<Appointment>, AppointmentError> {
        let head = self.get_appointment(tenant_id, appointment_id).await?;
        let limit = self.config.max_reschedule_chain_length + 1;

        let mut seen = HashSet::from([head.id]);
        let mut next = head.rescheduled_from;
        let mut chain = vec![head];

        while let Some(previous_id) = next {
            if chain.len() >= limit || !seen.insert(previous_id) {
                break;
            }
            let Some(previous) = self.store.get(tenant_id, previous_id).await else {
                break;
            };
            next = previous.rescheduled_from;
            chain.push(previous);
        }

        Ok(chain)
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    /// Number of rescheduled-from links behind `appointment`. A cycle counts
    /// as a full chain.
    async fn chain_length(&self, tenant_id: Uuid, appointment: &Appointment) -> usize {
        let max = self.config.max_reschedule_chain_length;
        let mut seen = HashSet::from([appointment.id]);
        let mut next = appointment.rescheduled_from;
        let mut length = 0;

        while let Some(previous_id) = next {
            if !seen.insert(previous_id) {
                warn!("Reschedule chain cycle detected at {}", previous_id);
                return length.max(max);
            }
            length += 1;
            if length > max {
                break;
            }
            next = match self.store.get(tenant_id, previous_id).await {
                Some(previous) => previous.rescheduled_from,
                None => None,
            };
        }

        length
    }

    async fn fetch_service(&self, tenant_id: Uuid, service_id: Uuid) -> Result<Option<ServiceDefinition>, AppointmentError> {
        self.collaborators
            .catalog
            .get_service(tenant_id, service_id)
            .await
            .map_err(|e| {
                warn!("Service catalog lookup failed: {}", e);
                AppointmentError::ExternalService(e.to_string())
            })
    }

    async fn resolve_service(
        &self,
        tenant_id: Uuid,
        service_id: Option<Uuid>,
    ) -> Result<Option<ServiceDefinition>, AppointmentError> {
        let Some(service_id) = service_id else {
            if self.config.service_required {
                return Err(AppointmentError::ServiceRequired);
            }
            return Ok(None);
        };

        match self.fetch_service(tenant_id, service_id).await? {
            Some(service) if service.active && service.tenant_id == tenant_id => Ok(Some(service)),
            _ => {
                warn!("Service {} is unknown or inactive", service_id);
                Err(AppointmentError::InvalidService)
            }
        }
    }

    async fn check_competency(
        &self,
        tenant_id: Uuid,
        professional_id: Uuid,
        service: &ServiceDefinition,
    ) -> Result<(), AppointmentError> {
        if !self.config.competency_enforcement_enabled {
            return Ok(());
        }

        let competent = self
            .collaborators
            .competency
            .is_competent(tenant_id, professional_id, service.id)
            .await
            .map_err(|e| AppointmentError::ExternalService(e.to_string()))?;

        if !competent {
            warn!("Professional {} lacks competency for service {}", professional_id, service.id);
            return Err(AppointmentError::NotCompetent {
                professional_id,
                service_id: service.id,
            });
        }

        Ok(())
    }

    async fn check_session_interval(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        service: &ServiceDefinition,
        start_time: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        let Some(min_days) = service.min_session_interval_days.filter(|days| *days > 0) else {
            return Ok(());
        };

        if let Some(last) = self
            .store
            .latest_completed_for_service(tenant_id, client_id, service.id)
            .await
        {
            let days_since = (start_time - last.start_time).num_days();
            if days_since < min_days {
                warn!("Client {} last completed {} {} days ago", client_id, service.id, days_since);
                return Err(AppointmentError::IntervalTooShort { days_since, min_days });
            }
        }

        Ok(())
    }

    /// Resolve where a booking lands. Slot-bound bookings start at the slot
    /// start; manual bookings must supply a start and an end (or a service
    /// duration) and pass the overlap check.
    #[allow(clippy::too_many_arguments)]
    async fn place(
        &self,
        tenant_id: Uuid,
        professional_id: Uuid,
        slot_id: Option<Uuid>,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        service: Option<&ServiceDefinition>,
        exclude: Option<Uuid>,
    ) -> Result<Placement, AppointmentError> {
        let service_duration = service
            .and_then(|s| s.duration_minutes)
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::minutes(minutes as i64));

        let Some(slot_id) = slot_id else {
            let start_time = start_time.ok_or(AppointmentError::MissingSchedule)?;
            let end_time = end_time
                .or_else(|| service_duration.map(|d| start_time + d))
                .ok_or(AppointmentError::MissingSchedule)?;
            validate_range(start_time, end_time)?;

            self.conflicts
                .ensure_no_conflict(tenant_id, professional_id, start_time, end_time, exclude)
                .await?;

            return Ok(Placement {
                professional_id,
                slot: None,
                start_time,
                end_time,
            });
        };

        let slot = self
            .capacity
            .store()
            .get_slot(tenant_id, slot_id)
            .await?
            .ok_or(AppointmentError::SlotNotFound)?;

        if slot.professional_id != professional_id {
            warn!("Slot {} belongs to another professional", slot_id);
            return Err(AppointmentError::SlotNotFound);
        }

        if let Some(requested) = start_time.filter(|start| *start != slot.start_time) {
            warn!("Requested start {} does not match slot {} start", requested, slot_id);
            return Err(AppointmentError::InvalidTime(format!(
                "Start time {} does not match the slot start {}",
                requested, slot.start_time
            )));
        }

        let start_time = slot.start_time;
        let end_time = end_time
            .or_else(|| service_duration.map(|d| start_time + d))
            .unwrap_or_else(|| start_time + slot.duration());
        validate_range(start_time, end_time)?;

        let requested_minutes = (end_time - start_time).num_minutes();
        let excess = requested_minutes - slot.duration_minutes as i64;
        if excess > self.config.service_slot_tolerance_minutes {
            warn!(
                "Requested {} minutes against a {} minute slot",
                requested_minutes, slot.duration_minutes
            );
            return Err(AppointmentError::ServiceSlotMismatch {
                requested_minutes,
                slot_minutes: slot.duration_minutes,
            });
        }

        Ok(Placement {
            professional_id,
            slot: Some(slot),
            start_time,
            end_time,
        })
    }

    fn check_cancellation_notice(&self, appointment: &Appointment, cancelled_by: AppointmentOrigin) -> Result<(), AppointmentError> {
        let notice_minutes = self.config.client_cancellation_notice_minutes;
        if cancelled_by != AppointmentOrigin::Client || notice_minutes <= 0 {
            return Ok(());
        }

        if appointment.start_time - Utc::now() < Duration::minutes(notice_minutes) {
            warn!("Client cancellation of {} inside {} minute notice", appointment.id, notice_minutes);
            return Err(AppointmentError::CancellationTooLate { notice_minutes });
        }

        Ok(())
    }

    async fn apply_transition(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        allowed: &[AppointmentStatus],
        to: AppointmentStatus,
        actor_id: Uuid,
        event_type: AuditEventType,
    ) -> Result<Appointment, AppointmentError> {
        if tenant_id.is_nil() {
            return Err(AppointmentError::InvalidTenant);
        }

        let (from, updated) = self
            .store
            .transition(tenant_id, appointment_id, allowed, to, |_| {})
            .await?;

        self.audit
            .record(&updated, actor_id, event_type, AuditDetails::transition(from, to))
            .await;

        info!("Appointment {} moved {} -> {}", appointment_id, from, to);

        let kind = format!("appointment_{}", event_type.to_string().to_lowercase());
        self.notify_parties(&updated, &format!("Appointment {}", to.to_string().to_lowercase()), &kind);
        Ok(self.mirror_status(updated).await)
    }

    /// After a failed status CAS: a concurrent cancel or completion already
    /// settled the appointment, which is a no-op for the caller.
    async fn settled_or(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        err: AppointmentError,
    ) -> Result<Appointment, AppointmentError> {
        match err {
            AppointmentError::InvalidStatusTransition {
                from: AppointmentStatus::Cancelled | AppointmentStatus::Completed,
                ..
            } => self.get_appointment(tenant_id, appointment_id).await,
            other => Err(other),
        }
    }

    async fn promote_waitlist(&self, guard: &mut SlotGuard, cancelled: &Appointment, actor_id: Uuid) {
        if !self.waitlist.is_enabled() {
            return;
        }

        if let Err(e) = self.waitlist.promote(guard, cancelled, actor_id).await {
            warn!("Waitlist promotion after cancelling {} failed: {}", cancelled.id, e);
        }
    }

    fn notify_parties(&self, appointment: &Appointment, title: &str, kind: &str) {
        let message = format!(
            "{} with status {} at {}",
            title,
            appointment.status,
            appointment.start_time.format("%Y-%m-%d %H:%M UTC")
        );

        for recipient_id in [appointment.professional_id, appointment.client_id] {
            self.collaborators.notifier.notify(Notification {
                tenant_id: appointment.tenant_id,
                recipient_id,
                title: title.to_string(),
                message: message.clone(),
                kind: kind.to_string(),
            });
        }
    }

    /// Push the appointment to the external calendar and remember the event id.
    async fn mirror(&self, appointment: Appointment) -> Appointment {
        if !self.config.calendar_mirror_enabled {
            return appointment;
        }

        match self.collaborators.calendar.create_or_update_event(&appointment).await {
            Ok(event_id) if appointment.external_event_id.as_deref() != Some(event_id.as_str()) => {
                match self
                    .store
                    .update(appointment.tenant_id, appointment.id, |a| {
                        a.external_event_id = Some(event_id.clone())
                    })
                    .await
                {
                    Ok(updated) => updated,
                    Err(_) => appointment,
                }
            }
            Ok(_) => appointment,
            Err(e) => {
                warn!("Calendar mirror failed for {}: {}", appointment.id, e);
                appointment
            }
        }
    }

    async fn mirror_status(&self, appointment: Appointment) -> Appointment {
        if !self.config.calendar_mirror_enabled {
            return appointment;
        }

        let Some(event_id) = appointment.external_event_id.clone() else {
            return self.mirror(appointment).await;
        };

        if let Err(e) = self
            .collaborators
            .calendar
            .update_status(&event_id, appointment.status)
            .await
        {
            warn!("Calendar status update failed for {}: {}", appointment.id, e);
        }

        appointment
    }

    fn record_outcome<T>(&self, operation: &str, result: &Result<T, AppointmentError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) if e.is_infrastructure() => "error",
            Err(_) => "rejected",
        };

        if let Err(e) = result {
            debug!("{} finished with {}: {}", operation, e.code(), e);
        }

        self.metrics
            .increment_counter("appointment_operations_total", &[("operation", operation), ("outcome", outcome)]);
    }
}

fn validate_range(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Result<(), AppointmentError> {
    if end_time <= start_time {
        return Err(AppointmentError::InvalidTime(
            "End time must be after start time".to_string(),
        ));
    }
    Ok(())
}

/// `{field: {from, to}}` for every field that moved.
fn reschedule_diff(source: &Appointment, successor: &Appointment) -> Map<String, Value> {
    let mut diff = Map::new();
    let mut changed = |field: &str, from: Value, to: Value| {
        if from != to {
            diff.insert(field.to_string(), json!({ "from": from, "to": to }));
        }
    };

    changed("service_id", json!(source.service_id), json!(successor.service_id));
    changed("professional_id", json!(source.professional_id), json!(successor.professional_id));
    changed("slot_id", json!(source.slot_id), json!(successor.slot_id));
    changed("start_time", json!(source.start_time), json!(successor.start_time));
    changed("end_time", json!(source.end_time), json!(successor.end_time));

    diff
}
