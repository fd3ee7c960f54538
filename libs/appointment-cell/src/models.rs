// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Metadata key holding the list of unresolved pre-visit requirements.
pub const PENDING_REQUIREMENTS_KEY: &str = "pending_requirements";

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub professional_id: Uuid,
    /// `None` for manual bookings that hold no slot capacity.
    pub slot_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub origin: AppointmentOrigin,
    pub metadata: Map<String, Value>,
    pub rescheduled_from: Option<Uuid>,
    pub external_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_time < end && self.end_time > start
    }

    pub fn pending_requirements(&self) -> Vec<String> {
        self.metadata
            .get(PENDING_REQUIREMENTS_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Rescheduled,
    NoShow,
}

impl AppointmentStatus {
    /// Statuses that occupy the professional's time.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed | AppointmentStatus::InProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed
                | AppointmentStatus::Cancelled
                | AppointmentStatus::Rescheduled
                | AppointmentStatus::NoShow
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "PENDING"),
            AppointmentStatus::Confirmed => write!(f, "CONFIRMED"),
            AppointmentStatus::InProgress => write!(f, "IN_PROGRESS"),
            AppointmentStatus::Completed => write!(f, "COMPLETED"),
            AppointmentStatus::Cancelled => write!(f, "CANCELLED"),
            AppointmentStatus::Rescheduled => write!(f, "RESCHEDULED"),
            AppointmentStatus::NoShow => write!(f, "NO_SHOW"),
        }
    }
}

/// Who initiated a booking or a change to one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentOrigin {
    Client,
    Professional,
    Operator,
    System,
}

impl AppointmentOrigin {
    pub fn initial_status(&self) -> AppointmentStatus {
        match self {
            AppointmentOrigin::Client => AppointmentStatus::Pending,
            _ => AppointmentStatus::Confirmed,
        }
    }
}

impl fmt::Display for AppointmentOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentOrigin::Client => write!(f, "CLIENT"),
            AppointmentOrigin::Professional => write!(f, "PROFESSIONAL"),
            AppointmentOrigin::Operator => write!(f, "OPERATOR"),
            AppointmentOrigin::System => write!(f, "SYSTEM"),
        }
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub professional_id: Uuid,
    /// Defaults to the slot's start for slot-bound bookings.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub origin: AppointmentOrigin,
    pub slot_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
    pub actor_id: Uuid,
    pub cancelled_by: AppointmentOrigin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_slot_id: Option<Uuid>,
    pub new_start_time: Option<DateTime<Utc>>,
    pub new_end_time: Option<DateTime<Utc>>,
    pub new_professional_id: Option<Uuid>,
    pub reason: Option<String>,
    pub actor_id: Uuid,
    pub requested_by: AppointmentOrigin,
}

// ==============================================================================
// SERVICE CATALOG MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDefinition {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub active: bool,
    pub is_clinical: bool,
    pub duration_minutes: Option<i32>,
    pub min_session_interval_days: Option<i64>,
    #[serde(default)]
    pub pre_visit_requirements: Vec<String>,
}

// ==============================================================================
// WAITLIST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub slot_id: Uuid,
    pub client_id: Uuid,
    /// Lower values are promoted first.
    pub priority: i32,
    pub status: WaitlistStatus,
    pub promoted_appointment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistStatus {
    Active,
    Promoted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollWaitlistRequest {
    pub tenant_id: Uuid,
    pub slot_id: Uuid,
    pub client_id: Uuid,
    pub priority: Option<i32>,
}

// ==============================================================================
// AUDIT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub appointment_id: Uuid,
    pub actor_id: Uuid,
    pub event_type: AuditEventType,
    pub from_status: Option<AppointmentStatus>,
    pub to_status: Option<AppointmentStatus>,
    pub reason: Option<String>,
    /// Free-form; readers must tolerate missing keys.
    pub diff: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Created,
    Confirmed,
    Cancelled,
    Rescheduled,
    CheckedIn,
    Completed,
    NoShow,
    RequirementsResolved,
    WaitlistPromoted,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuditEventType::Created => "CREATED",
            AuditEventType::Confirmed => "CONFIRMED",
            AuditEventType::Cancelled => "CANCELLED",
            AuditEventType::Rescheduled => "RESCHEDULED",
            AuditEventType::CheckedIn => "CHECKED_IN",
            AuditEventType::Completed => "COMPLETED",
            AuditEventType::NoShow => "NO_SHOW",
            AuditEventType::RequirementsResolved => "REQUIREMENTS_RESOLVED",
            AuditEventType::WaitlistPromoted => "WAITLIST_PROMOTED",
        };
        write!(f, "{}", label)
    }
}

// ==============================================================================
// NOTIFICATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub tenant_id: Uuid,
    pub recipient_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serializes_screaming_snake_case() {
        assert_eq!(serde_json::to_value(AppointmentStatus::InProgress).unwrap(), json!("IN_PROGRESS"));
        assert_eq!(serde_json::to_value(AppointmentStatus::NoShow).unwrap(), json!("NO_SHOW"));
        assert_eq!(AppointmentStatus::NoShow.to_string(), "NO_SHOW");
    }

    #[test]
    fn test_origin_decides_initial_status() {
        assert_eq!(AppointmentOrigin::Client.initial_status(), AppointmentStatus::Pending);
        assert_eq!(AppointmentOrigin::Operator.initial_status(), AppointmentStatus::Confirmed);
        assert_eq!(AppointmentOrigin::System.initial_status(), AppointmentStatus::Confirmed);
    }

    #[test]
    fn test_pending_requirements_ignores_malformed_entries() {
        let mut metadata = Map::new();
        metadata.insert(PENDING_REQUIREMENTS_KEY.to_string(), json!(["intake_form", 7, "consent"]));

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            slot_id: None,
            service_id: None,
            start_time: now,
            end_time: now + Duration::minutes(30),
            status: AppointmentStatus::Confirmed,
            origin: AppointmentOrigin::Operator,
            metadata,
            rescheduled_from: None,
            external_event_id: None,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(appointment.pending_requirements(), vec!["intake_form", "consent"]);
    }
}
