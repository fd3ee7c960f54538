// libs/appointment-cell/src/error.rs
use thiserror::Error;
use uuid::Uuid;

use availability_cell::AvailabilityError;
use shared_database::StoreError;
use shared_models::AppError;

use crate::models::AppointmentStatus;

/// Everything the scheduling core can refuse, plus the infrastructure
/// category that callers should retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppointmentError {
    #[error("No tenant context resolved")]
    InvalidTenant,

    #[error("A service is required for this booking")]
    ServiceRequired,

    #[error("Service is unknown, inactive or belongs to another tenant")]
    InvalidService,

    #[error("Professional {professional_id} is not competent for service {service_id}")]
    NotCompetent { professional_id: Uuid, service_id: Uuid },

    #[error("Only {days_since} days since the last completed session; {min_days} required")]
    IntervalTooShort { days_since: i64, min_days: i64 },

    #[error("Neither a slot nor an explicit start and end were supplied")]
    MissingSchedule,

    #[error("Professional already has an appointment in that time range")]
    ScheduleConflict { conflicting: Vec<Uuid> },

    #[error("Requested duration of {requested_minutes} minutes does not fit a {slot_minutes} minute slot")]
    ServiceSlotMismatch { requested_minutes: i64, slot_minutes: i32 },

    #[error("Slot {slot_id} has no remaining capacity")]
    CapacityExceeded { slot_id: Uuid },

    #[error("Cancellation requires {notice_minutes} minutes notice")]
    CancellationTooLate { notice_minutes: i64 },

    #[error("Reschedule chain already has {length} links (maximum {max})")]
    RescheduleLimitExceeded { length: usize, max: usize },

    #[error("Pre-visit requirements outstanding: {}", .0.join(", "))]
    PendingRequirements(Vec<String>),

    #[error("Waitlist is disabled")]
    WaitlistDisabled,

    #[error("Appointment not found")]
    NotFound,

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Waitlist entry not found")]
    WaitlistEntryNotFound,

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Invalid appointment time: {0}")]
    InvalidTime(String),

    #[error("Quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),

    #[error(transparent)]
    Availability(AvailabilityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl AppointmentError {
    pub fn code(&self) -> &'static str {
        match self {
            AppointmentError::InvalidTenant => "INVALID_TENANT",
            AppointmentError::ServiceRequired => "SERVICE_REQUIRED",
            AppointmentError::InvalidService => "INVALID_SERVICE",
            AppointmentError::NotCompetent { .. } => "NOT_COMPETENT",
            AppointmentError::IntervalTooShort { .. } => "INTERVAL_TOO_SHORT",
            AppointmentError::MissingSchedule => "MISSING_SCHEDULE",
            AppointmentError::ScheduleConflict { .. } => "SCHEDULE_CONFLICT",
            AppointmentError::ServiceSlotMismatch { .. } => "SERVICE_SLOT_MISMATCH",
            AppointmentError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            AppointmentError::CancellationTooLate { .. } => "CANCELLATION_TOO_LATE",
            AppointmentError::RescheduleLimitExceeded { .. } => "RESCHEDULE_LIMIT_EXCEEDED",
            AppointmentError::PendingRequirements(_) => "PENDING_REQUIREMENTS",
            AppointmentError::WaitlistDisabled => "WAITLIST_DISABLED",
            AppointmentError::NotFound => "APPOINTMENT_NOT_FOUND",
            AppointmentError::SlotNotFound => "SLOT_NOT_FOUND",
            AppointmentError::WaitlistEntryNotFound => "WAITLIST_ENTRY_NOT_FOUND",
            AppointmentError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            AppointmentError::InvalidTime(_) => "INVALID_TIME",
            AppointmentError::InvalidQuantity(_) => "INVALID_QUANTITY",
            AppointmentError::Availability(inner) => inner.code(),
            AppointmentError::Store(_) | AppointmentError::ExternalService(_) => "TEMPORARILY_UNAVAILABLE",
        }
    }

    /// True for failures the caller should retry rather than show as a rejection.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            AppointmentError::Store(_) | AppointmentError::ExternalService(_) => true,
            AppointmentError::Availability(inner) => inner.is_infrastructure(),
            _ => false,
        }
    }
}

impl From<AvailabilityError> for AppointmentError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::InvalidTenant => AppointmentError::InvalidTenant,
            AvailabilityError::SlotNotFound => AppointmentError::SlotNotFound,
            AvailabilityError::CapacityExceeded { slot_id, .. } => AppointmentError::CapacityExceeded { slot_id },
            AvailabilityError::InvalidQuantity(quantity) => AppointmentError::InvalidQuantity(quantity),
            AvailabilityError::Store(store) => AppointmentError::Store(store),
            other => AppointmentError::Availability(other),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let code = err.code();
        let message = err.to_string();

        if err.is_infrastructure() {
            return AppError::Unavailable(message);
        }

        match err {
            AppointmentError::NotFound
            | AppointmentError::SlotNotFound
            | AppointmentError::WaitlistEntryNotFound => AppError::NotFound(message),
            AppointmentError::CapacityExceeded { .. }
            | AppointmentError::ScheduleConflict { .. }
            | AppointmentError::InvalidStatusTransition { .. } => AppError::Conflict { code, message },
            AppointmentError::InvalidTime(_) | AppointmentError::InvalidQuantity(_) => AppError::BadRequest(message),
            _ => AppError::Rejected { code, message },
        }
    }
}
