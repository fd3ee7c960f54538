// libs/appointment-cell/src/store.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentStatus, AuditEvent, WaitlistEntry, WaitlistStatus};

/// In-process appointment, waitlist and audit tables.
///
/// Status changes go through `transition`, which re-checks the current status
/// under the write lock so two operations racing on one appointment cannot
/// both win.
#[derive(Default)]
pub struct AppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    waitlist: RwLock<HashMap<Uuid, WaitlistEntry>>,
    audit: RwLock<Vec<AuditEvent>>,
}

impl AppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==============================================================================
    // APPOINTMENTS
    // ==============================================================================

    pub async fn insert(&self, appointment: Appointment) {
        debug!("Storing appointment {}", appointment.id);
        self.appointments.write().await.insert(appointment.id, appointment);
    }

    /// Insert unless the professional already has an active appointment
    /// overlapping it. Check and insert share one write lock, so two
    /// concurrent manual bookings cannot both land on the same time.
    pub async fn insert_if_no_overlap(&self, appointment: Appointment, exclude: Option<Uuid>) -> Result<(), Vec<Uuid>> {
        let mut appointments = self.appointments.write().await;

        let conflicting: Vec<Uuid> = appointments
            .values()
            .filter(|a| is_overlapping(a, &appointment, exclude))
            .map(|a| a.id)
            .collect();
        if !conflicting.is_empty() {
            return Err(conflicting);
        }

        debug!("Storing appointment {}", appointment.id);
        appointments.insert(appointment.id, appointment);
        Ok(())
    }

    /// Drop an appointment that was never committed.
    pub async fn remove(&self, tenant_id: Uuid, appointment_id: Uuid) -> Option<Appointment> {
        let mut appointments = self.appointments.write().await;
        if appointments.get(&appointment_id)?.tenant_id != tenant_id {
            return None;
        }
        appointments.remove(&appointment_id)
    }

    pub async fn get(&self, tenant_id: Uuid, appointment_id: Uuid) -> Option<Appointment> {
        self.appointments
            .read()
            .await
            .get(&appointment_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
    }

    /// Move an appointment from one of `allowed` to `to`, applying `f` in
    /// the same write. Fails if the stored status is not in `allowed`.
    pub async fn transition<F>(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        allowed: &[AppointmentStatus],
        to: AppointmentStatus,
        f: F,
    ) -> Result<(AppointmentStatus, Appointment), AppointmentError>
    where
        F: FnOnce(&mut Appointment),
    {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(&appointment_id)
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or(AppointmentError::NotFound)?;

        let from = appointment.status;
        if !allowed.contains(&from) {
            return Err(AppointmentError::InvalidStatusTransition { from, to });
        }

        appointment.status = to;
        f(appointment);
        appointment.updated_at = Utc::now();

        Ok((from, appointment.clone()))
    }

    /// Apply `f` without touching the status.
    pub async fn update<F>(&self, tenant_id: Uuid, appointment_id: Uuid, f: F) -> Result<Appointment, AppointmentError>
    where
        F: FnOnce(&mut Appointment),
    {
        let mut appointments = self.appointments.write().await;
        let appointment = appointments
            .get_mut(&appointment_id)
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or(AppointmentError::NotFound)?;

        f(appointment);
        appointment.updated_at = Utc::now();

        Ok(appointment.clone())
    }

    /// Active appointments of a professional overlapping `[start, end)`.
    pub async fn find_overlapping(
        &self,
        tenant_id: Uuid,
        professional_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Vec<Appointment> {
        self.appointments
            .read()
            .await
            .values()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && a.professional_id == professional_id
                    && a.status.is_active()
                    && Some(a.id) != exclude
                    && a.overlaps(start, end)
            })
            .cloned()
            .collect()
    }

    pub async fn latest_completed_for_service(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        service_id: Uuid,
    ) -> Option<Appointment> {
        self.appointments
            .read()
            .await
            .values()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && a.client_id == client_id
                    && a.service_id == Some(service_id)
                    && a.status == AppointmentStatus::Completed
            })
            .max_by_key(|a| a.start_time)
            .cloned()
    }

    // ==============================================================================
    // WAITLIST
    // ==============================================================================

    /// Insert or refresh the entry for (slot, client). An active entry takes
    /// the new priority; a withdrawn one rejoins at the back of its priority
    /// band. A promoted entry is returned unchanged.
    pub async fn upsert_waitlist_entry(
        &self,
        tenant_id: Uuid,
        slot_id: Uuid,
        client_id: Uuid,
        priority: i32,
    ) -> WaitlistEntry {
        let mut waitlist = self.waitlist.write().await;
        let now = Utc::now();

        if let Some(entry) = waitlist
            .values_mut()
            .find(|e| e.tenant_id == tenant_id && e.slot_id == slot_id && e.client_id == client_id)
        {
            match entry.status {
                // Promotion happens once per entry
                WaitlistStatus::Promoted => return entry.clone(),
                WaitlistStatus::Cancelled => {
                    entry.status = WaitlistStatus::Active;
                    entry.created_at = now;
                }
                WaitlistStatus::Active => {}
            }
            entry.priority = priority;
            entry.updated_at = now;
            return entry.clone();
        }

        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            tenant_id,
            slot_id,
            client_id,
            priority,
            status: WaitlistStatus::Active,
            promoted_appointment_id: None,
            created_at: now,
            updated_at: now,
        };
        waitlist.insert(entry.id, entry.clone());
        entry
    }

    /// Active entry with the lowest priority, earliest enrollment first on ties.
    pub async fn next_waitlist_candidate(&self, tenant_id: Uuid, slot_id: Uuid) -> Option<WaitlistEntry> {
        self.waitlist
            .read()
            .await
            .values()
            .filter(|e| e.tenant_id == tenant_id && e.slot_id == slot_id && e.status == WaitlistStatus::Active)
            .min_by_key(|e| (e.priority, e.created_at))
            .cloned()
    }

    pub async fn set_waitlist_status(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        status: WaitlistStatus,
        promoted_appointment_id: Option<Uuid>,
    ) -> Option<WaitlistEntry> {
        let mut waitlist = self.waitlist.write().await;
        let entry = waitlist.get_mut(&entry_id).filter(|e| e.tenant_id == tenant_id)?;

        entry.status = status;
        entry.promoted_appointment_id = promoted_appointment_id;
        entry.updated_at = Utc::now();

        Some(entry.clone())
    }

    pub async fn get_waitlist_entry(&self, tenant_id: Uuid, entry_id: Uuid) -> Option<WaitlistEntry> {
        self.waitlist
            .read()
            .await
            .get(&entry_id)
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
    }

    pub async fn waitlist_for_slot(&self, tenant_id: Uuid, slot_id: Uuid) -> Vec<WaitlistEntry> {
        let mut entries: Vec<WaitlistEntry> = self
            .waitlist
            .read()
            .await
            .values()
            .filter(|e| e.tenant_id == tenant_id && e.slot_id == slot_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.priority, e.created_at));
        entries
    }

    // ==============================================================================
    // AUDIT
    // ==============================================================================

    pub async fn append_audit(&self, event: AuditEvent) {
        self.audit.write().await.push(event);
    }

    pub async fn audit_for_appointment(&self, tenant_id: Uuid, appointment_id: Uuid) -> Vec<AuditEvent> {
        self.audit
            .read()
            .await
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.appointment_id == appointment_id)
            .cloned()
            .collect()
    }
}

fn is_overlapping(existing: &Appointment, candidate: &Appointment, exclude: Option<Uuid>) -> bool {
    existing.tenant_id == candidate.tenant_id
        && existing.professional_id == candidate.professional_id
        && existing.status.is_active()
        && Some(existing.id) != exclude
        && existing.overlaps(candidate.start_time, candidate.end_time)
}
