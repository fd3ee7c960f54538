// libs/appointment-cell/src/services/collaborators.rs
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Appointment, AppointmentStatus, Notification, ServiceDefinition};

// ==============================================================================
// COLLABORATOR CONTRACTS
// ==============================================================================

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// `Ok(None)` when the service does not exist for the tenant.
    async fn get_service(&self, tenant_id: Uuid, service_id: Uuid) -> Result<Option<ServiceDefinition>>;
}

/// Consulted only when competency enforcement is enabled.
#[async_trait]
pub trait CompetencyRegistry: Send + Sync {
    async fn is_competent(&self, tenant_id: Uuid, professional_id: Uuid, service_id: Uuid) -> Result<bool>;
}

/// Fire-and-forget delivery. Implementations own their failures; the call
/// itself cannot fail and must not block on I/O.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Mirror of appointments into an outside calendar. Called after the owning
/// change has been stored; errors are logged by the caller and dropped.
#[async_trait]
pub trait ExternalCalendarMirror: Send + Sync {
    async fn create_or_update_event(&self, appointment: &Appointment) -> Result<String>;

    async fn update_status(&self, event_id: &str, status: AppointmentStatus) -> Result<()>;
}

/// The outside systems the lifecycle talks to, bundled for wiring.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ServiceCatalog>,
    pub competency: Arc<dyn CompetencyRegistry>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub calendar: Arc<dyn ExternalCalendarMirror>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            catalog: Arc::new(InMemoryServiceCatalog::new()),
            competency: Arc::new(InMemoryCompetencyRegistry::new()),
            notifier: Arc::new(NoopNotificationDispatcher),
            calendar: Arc::new(NoopCalendarMirror),
        }
    }
}

// ==============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ==============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct InMemoryServiceCatalog {
    services: Mutex<HashMap<Uuid, ServiceDefinition>>,
}

impl InMemoryServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, service: ServiceDefinition) {
        lock(&self.services).insert(service.id, service);
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryServiceCatalog {
    async fn get_service(&self, tenant_id: Uuid, service_id: Uuid) -> Result<Option<ServiceDefinition>> {
        Ok(lock(&self.services)
            .get(&service_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCompetencyRegistry {
    grants: Mutex<HashSet<(Uuid, Uuid, Uuid)>>,
}

impl InMemoryCompetencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, tenant_id: Uuid, professional_id: Uuid, service_id: Uuid) {
        lock(&self.grants).insert((tenant_id, professional_id, service_id));
    }
}

#[async_trait]
impl CompetencyRegistry for InMemoryCompetencyRegistry {
    async fn is_competent(&self, tenant_id: Uuid, professional_id: Uuid, service_id: Uuid) -> Result<bool> {
        Ok(lock(&self.grants).contains(&(tenant_id, professional_id, service_id)))
    }
}

/// Keeps every notification it is handed.
#[derive(Default)]
pub struct RecordingNotificationDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    pub fn sent_to(&self, recipient_id: Uuid) -> Vec<Notification> {
        lock(&self.sent)
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }
}

impl NotificationDispatcher for RecordingNotificationDispatcher {
    fn notify(&self, notification: Notification) {
        lock(&self.sent).push(notification);
    }
}

#[derive(Debug, Default)]
pub struct NoopNotificationDispatcher;

impl NotificationDispatcher for NoopNotificationDispatcher {
    fn notify(&self, _notification: Notification) {}
}

#[derive(Debug, Default)]
pub struct NoopCalendarMirror;

#[async_trait]
impl ExternalCalendarMirror for NoopCalendarMirror {
    async fn create_or_update_event(&self, appointment: &Appointment) -> Result<String> {
        Ok(appointment
            .external_event_id
            .clone()
            .unwrap_or_else(|| appointment.id.to_string()))
    }

    async fn update_status(&self, _event_id: &str, _status: AppointmentStatus) -> Result<()> {
        Ok(())
    }
}
