pub mod audit;
pub mod calendar;
pub mod collaborators;
pub mod conflict;
pub mod lifecycle;
pub mod notifications;
pub mod waitlist;

pub use audit::{AuditDetails, AuditTrail};
pub use calendar::SupabaseCalendarMirror;
pub use collaborators::{
    Collaborators, CompetencyRegistry, ExternalCalendarMirror, InMemoryCompetencyRegistry,
    InMemoryServiceCatalog, NoopCalendarMirror, NoopNotificationDispatcher, NotificationDispatcher,
    RecordingNotificationDispatcher, ServiceCatalog,
};
pub use conflict::ConflictDetectionService;
pub use lifecycle::AppointmentLifecycleService;
pub use notifications::SupabaseNotificationDispatcher;
pub use waitlist::WaitlistService;
