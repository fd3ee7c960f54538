// libs/appointment-cell/src/engine.rs
use std::sync::Arc;

use tracing::{info, warn};

use availability_cell::{
    AvailabilityService, CapacityReservationService, ListingCache, SlotGenerator, SlotStore,
};
use monitoring_cell::{MetricsRecorder, NoopMetricsRecorder};
use shared_config::{AppConfig, SchedulingConfig};
use shared_database::SupabaseClient;

use crate::services::{
    AppointmentLifecycleService, AuditTrail, Collaborators, SupabaseCalendarMirror,
    SupabaseNotificationDispatcher, WaitlistService,
};
use crate::store::AppointmentStore;

/// Every scheduling service, built once over shared stores.
pub struct SchedulingEngine {
    pub config: SchedulingConfig,
    pub slot_store: Arc<SlotStore>,
    pub appointment_store: Arc<AppointmentStore>,
    pub listing_cache: Arc<ListingCache>,
    pub metrics: Arc<dyn MetricsRecorder>,
    pub availability: Arc<AvailabilityService>,
    pub slot_generator: Arc<SlotGenerator>,
    pub capacity: Arc<CapacityReservationService>,
    pub audit: Arc<AuditTrail>,
    pub waitlist: Arc<WaitlistService>,
    pub lifecycle: Arc<AppointmentLifecycleService>,
}

impl SchedulingEngine {
    pub fn new(config: SchedulingConfig, collaborators: Collaborators, metrics: Arc<dyn MetricsRecorder>) -> Self {
        let slot_store = Arc::new(SlotStore::from_timeout_ms(config.slot_lock_timeout_ms));
        let appointment_store = Arc::new(AppointmentStore::new());
        let listing_cache = Arc::new(ListingCache::from_ttl_seconds(config.listing_cache_ttl_seconds));

        let capacity = Arc::new(CapacityReservationService::new(
            config.clone(),
            Arc::clone(&slot_store),
            Arc::clone(&listing_cache),
            Arc::clone(&metrics),
        ));
        let availability = Arc::new(AvailabilityService::new(
            Arc::clone(&slot_store),
            Arc::clone(&listing_cache),
            Arc::clone(&capacity),
        ));
        let slot_generator = Arc::new(SlotGenerator::new(
            Arc::clone(&slot_store),
            Arc::clone(&listing_cache),
            Arc::clone(&metrics),
        ));

        let audit = Arc::new(AuditTrail::new(Arc::clone(&appointment_store)));
        let waitlist = Arc::new(WaitlistService::new(
            config.clone(),
            Arc::clone(&appointment_store),
            Arc::clone(&capacity),
            Arc::clone(&audit),
            Arc::clone(&collaborators.notifier),
            Arc::clone(&metrics),
        ));
        let lifecycle = Arc::new(AppointmentLifecycleService::new(
            config.clone(),
            Arc::clone(&appointment_store),
            Arc::clone(&capacity),
            Arc::clone(&waitlist),
            Arc::clone(&audit),
            collaborators,
            Arc::clone(&metrics),
        ));

        info!(
            "Scheduling engine ready (overbooking={}, waitlist={}, competency={})",
            config.overbooking_enabled, config.waitlist_enabled, config.competency_enforcement_enabled
        );

        Self {
            config,
            slot_store,
            appointment_store,
            listing_cache,
            metrics,
            availability,
            slot_generator,
            capacity,
            audit,
            waitlist,
            lifecycle,
        }
    }

    /// Build from process configuration. Notifications and calendar events
    /// go to Supabase when a service-role key is present; otherwise they are
    /// dropped.
    pub fn from_app_config(app_config: &AppConfig, mut collaborators: Collaborators) -> Self {
        if app_config.is_outbound_configured() {
            let supabase = Arc::new(SupabaseClient::new(app_config));
            collaborators.notifier = Arc::new(SupabaseNotificationDispatcher::new(Arc::clone(&supabase)));
            if app_config.scheduling.calendar_mirror_enabled {
                collaborators.calendar = Arc::new(SupabaseCalendarMirror::new(supabase));
            }
        } else {
            warn!("Supabase outbound access not configured; notifications will not be delivered");
        }

        Self::new(app_config.scheduling.clone(), collaborators, Arc::new(NoopMetricsRecorder))
    }
}
