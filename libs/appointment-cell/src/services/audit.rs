// libs/appointment-cell/src/services/audit.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentStatus, AuditEvent, AuditEventType};
use crate::store::AppointmentStore;

/// Append-only record of what happened to each appointment.
pub struct AuditTrail {
    store: Arc<AppointmentStore>,
}

/// Optional parts of an audit record.
#[derive(Debug, Default)]
pub struct AuditDetails {
    pub from_status: Option<AppointmentStatus>,
    pub to_status: Option<AppointmentStatus>,
    pub reason: Option<String>,
    pub diff: Map<String, Value>,
}

impl AuditDetails {
    pub fn transition(from: AppointmentStatus, to: AppointmentStatus) -> Self {
        Self {
            from_status: Some(from),
            to_status: Some(to),
            ..Self::default()
        }
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_diff(mut self, diff: Map<String, Value>) -> Self {
        self.diff = diff;
        self
    }
}

impl AuditTrail {
    pub fn new(store: Arc<AppointmentStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        appointment: &Appointment,
        actor_id: Uuid,
        event_type: AuditEventType,
        details: AuditDetails,
    ) -> AuditEvent {
        let event = AuditEvent {
            id: Uuid::new_v4(),
            tenant_id: appointment.tenant_id,
            appointment_id: appointment.id,
            actor_id,
            event_type,
            from_status: details.from_status,
            to_status: details.to_status,
            reason: details.reason,
            diff: details.diff,
            created_at: Utc::now(),
        };

        info!(
            appointment_id = %event.appointment_id,
            actor_id = %event.actor_id,
            event_type = %event.event_type,
            "Audit event recorded"
        );

        self.store.append_audit(event.clone()).await;
        event
    }

    /// Events for one appointment in the order they were written. The
    /// appointment must belong to the tenant.
    pub async fn history(&self, tenant_id: Uuid, appointment_id: Uuid) -> Result<Vec<AuditEvent>, AppointmentError> {
        if self.store.get(tenant_id, appointment_id).await.is_none() {
            return Err(AppointmentError::NotFound);
        }

        Ok(self.store.audit_for_appointment(tenant_id, appointment_id).await)
    }
}
