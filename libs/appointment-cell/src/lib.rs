pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

// Re-export all models and services for external use
pub use engine::SchedulingEngine;
pub use error::AppointmentError;
pub use models::*;
pub use services::*;
pub use store::AppointmentStore;
