#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Map;
use uuid::Uuid;

use appointment_cell::{
    Appointment, AppointmentOrigin, CancelAppointmentRequest, Collaborators, CreateAppointmentRequest,
    InMemoryCompetencyRegistry, InMemoryServiceCatalog, RecordingNotificationDispatcher,
    RescheduleAppointmentRequest, SchedulingEngine, ServiceDefinition,
};
use availability_cell::CreateAvailabilityWindowRequest;
use monitoring_cell::InMemoryMetricsRecorder;
use shared_config::SchedulingConfig;
use shared_utils::test_utils::{at, future_day, init_test_tracing, time_of_day};

pub struct Harness {
    pub tenant_id: Uuid,
    pub professional_id: Uuid,
    pub client_id: Uuid,
    pub actor_id: Uuid,
    pub day: NaiveDate,
    pub engine: SchedulingEngine,
    pub catalog: Arc<InMemoryServiceCatalog>,
    pub competency: Arc<InMemoryCompetencyRegistry>,
    pub notifier: Arc<RecordingNotificationDispatcher>,
    pub metrics: Arc<InMemoryMetricsRecorder>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SchedulingConfig::default())
    }

    pub fn with_config(config: SchedulingConfig) -> Self {
        init_test_tracing();

        let catalog = Arc::new(InMemoryServiceCatalog::new());
        let competency = Arc::new(InMemoryCompetencyRegistry::new());
        let notifier = Arc::new(RecordingNotificationDispatcher::new());
        let metrics = Arc::new(InMemoryMetricsRecorder::new());

        let collaborators = Collaborators {
            catalog: catalog.clone(),
            competency: competency.clone(),
            notifier: notifier.clone(),
            ..Collaborators::default()
        };

        Self {
            tenant_id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            day: future_day(14),
            engine: SchedulingEngine::new(config, collaborators, metrics.clone()),
            catalog,
            competency,
            notifier,
            metrics,
        }
    }

    pub fn at(&self, hour: u32, minute: u32) -> DateTime<Utc> {
        at(self.day, hour, minute)
    }

    /// Create a window for the harness professional and generate its slots.
    pub async fn slots(&self, start: (u32, u32), end: (u32, u32), duration: i32, capacity: i32) -> Vec<Uuid> {
        let window = self
            .engine
            .availability
            .create_window(CreateAvailabilityWindowRequest {
                tenant_id: self.tenant_id,
                professional_id: self.professional_id,
                date: self.day,
                start_time: time_of_day(start.0, start.1),
                end_time: time_of_day(end.0, end.1),
                slot_duration_minutes: duration,
                capacity_per_slot: capacity,
                is_recurring: None,
                recurrence_rule: None,
            })
            .await
            .unwrap();

        self.engine
            .slot_generator
            .generate(self.tenant_id, window.id)
            .await
            .unwrap()
            .slot_ids
    }

    pub async fn used(&self, slot_id: Uuid) -> i32 {
        self.engine
            .slot_store
            .get_slot(self.tenant_id, slot_id)
            .await
            .unwrap()
            .unwrap()
            .used_capacity
    }

    pub fn request(&self, origin: AppointmentOrigin) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            tenant_id: self.tenant_id,
            client_id: self.client_id,
            professional_id: self.professional_id,
            start_time: None,
            end_time: None,
            origin,
            slot_id: None,
            service_id: None,
            metadata: Map::new(),
            actor_id: self.actor_id,
        }
    }

    pub fn manual(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            start_time: Some(start),
            end_time: Some(end),
            ..self.request(AppointmentOrigin::Operator)
        }
    }

    pub async fn book(&self, slot_id: Uuid, client_id: Uuid) -> Appointment {
        self.engine
            .lifecycle
            .create(CreateAppointmentRequest {
                client_id,
                slot_id: Some(slot_id),
                ..self.request(AppointmentOrigin::Operator)
            })
            .await
            .unwrap()
    }

    pub fn cancel_by(&self, cancelled_by: AppointmentOrigin) -> CancelAppointmentRequest {
        CancelAppointmentRequest {
            reason: Some("test".to_string()),
            actor_id: self.actor_id,
            cancelled_by,
        }
    }

    pub fn move_to_slot(&self, slot_id: Uuid) -> RescheduleAppointmentRequest {
        RescheduleAppointmentRequest {
            new_slot_id: Some(slot_id),
            new_start_time: None,
            new_end_time: None,
            new_professional_id: None,
            reason: Some("client asked".to_string()),
            actor_id: self.actor_id,
            requested_by: AppointmentOrigin::Operator,
        }
    }

    pub fn service(&self, duration_minutes: Option<i32>) -> ServiceDefinition {
        ServiceDefinition {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            name: "Consultation".to_string(),
            active: true,
            is_clinical: true,
            duration_minutes,
            min_session_interval_days: None,
            pre_visit_requirements: Vec::new(),
        }
    }

    pub fn add_service(&self, service: ServiceDefinition) -> Uuid {
        let id = service.id;
        self.catalog.add(service);
        id
    }
}
