// libs/appointment-cell/src/services/calendar.rs
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use shared_database::SupabaseClient;

use crate::models::{Appointment, AppointmentStatus};
use crate::services::collaborators::ExternalCalendarMirror;

/// Mirrors appointments into the `calendar_events` table.
pub struct SupabaseCalendarMirror {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseCalendarMirror {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    fn event_body(appointment: &Appointment) -> Value {
        json!({
            "tenant_id": appointment.tenant_id,
            "appointment_id": appointment.id,
            "professional_id": appointment.professional_id,
            "client_id": appointment.client_id,
            "start_time": appointment.start_time.to_rfc3339(),
            "end_time": appointment.end_time.to_rfc3339(),
            "status": appointment.status.to_string(),
        })
    }

    fn event_id(rows: &[Value]) -> Result<String> {
        let id = rows
            .first()
            .and_then(|row| row.get("id"))
            .ok_or_else(|| anyhow!("Calendar event response carried no id"))?;

        Ok(match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

#[async_trait]
impl ExternalCalendarMirror for SupabaseCalendarMirror {
    async fn create_or_update_event(&self, appointment: &Appointment) -> Result<String> {
        let (method, path) = match &appointment.external_event_id {
            Some(event_id) => (Method::PATCH, format!("/rest/v1/calendar_events?id=eq.{}", event_id)),
            None => (Method::POST, "/rest/v1/calendar_events".to_string()),
        };

        debug!("Mirroring appointment {} to calendar ({})", appointment.id, method);

        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                method,
                &path,
                None,
                Some(Self::event_body(appointment)),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        Self::event_id(&rows)
    }

    async fn update_status(&self, event_id: &str, status: AppointmentStatus) -> Result<()> {
        let path = format!("/rest/v1/calendar_events?id=eq.{}", event_id);

        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                None,
                Some(json!({ "status": status.to_string() })),
                Some(SupabaseClient::representation_headers()),
            )
            .await?;

        Ok(())
    }
}
