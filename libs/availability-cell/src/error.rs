use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AvailabilityError {
    #[error("No tenant context resolved")]
    InvalidTenant,

    #[error("Invalid availability window: {0}")]
    InvalidWindow(String),

    #[error("Availability window not found")]
    WindowNotFound,

    #[error("Availability window {0} already has slots; only the active flag may change")]
    WindowLocked(Uuid),

    #[error("Slot not found")]
    SlotNotFound,

    #[error("Slot {slot_id} is full: {used} used, {requested} requested, ceiling {ceiling}")]
    CapacityExceeded {
        slot_id: Uuid,
        used: i32,
        requested: i32,
        ceiling: i32,
    },

    #[error("Quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AvailabilityError {
    pub fn code(&self) -> &'static str {
        match self {
            AvailabilityError::InvalidTenant => "INVALID_TENANT",
            AvailabilityError::InvalidWindow(_) => "INVALID_WINDOW",
            AvailabilityError::WindowNotFound => "WINDOW_NOT_FOUND",
            AvailabilityError::WindowLocked(_) => "WINDOW_LOCKED",
            AvailabilityError::SlotNotFound => "SLOT_NOT_FOUND",
            AvailabilityError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            AvailabilityError::InvalidQuantity(_) => "INVALID_QUANTITY",
            AvailabilityError::Store(_) => "TEMPORARILY_UNAVAILABLE",
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AvailabilityError::Store(_))
    }
}
