// libs/availability-cell/src/services/slot_generator.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use monitoring_cell::MetricsRecorder;

use crate::error::AvailabilityError;
use crate::models::{Slot, SlotGenerationReport};
use crate::services::listing_cache::ListingCache;
use crate::store::SlotStore;

pub struct SlotGenerator {
    store: Arc<SlotStore>,
    cache: Arc<ListingCache>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl SlotGenerator {
    pub fn new(store: Arc<SlotStore>, cache: Arc<ListingCache>, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self { store, cache, metrics }
    }

    /// Materialize one slot per whole interval of the window.
    ///
    /// Safe to call repeatedly: slots are keyed by professional and start
    /// instant, and existing ones are counted rather than recreated.
    #[instrument(skip(self))]
    pub async fn generate(&self, tenant_id: Uuid, window_id: Uuid) -> Result<SlotGenerationReport, AvailabilityError> {
        if tenant_id.is_nil() {
            return Err(AvailabilityError::InvalidTenant);
        }

        let window = self
            .store
            .get_window(tenant_id, window_id)
            .await
            .ok_or(AvailabilityError::WindowNotFound)?;

        if !window.is_active {
            warn!("Refusing to generate slots for inactive window {}", window_id);
            return Err(AvailabilityError::InvalidWindow(
                "Window is inactive".to_string(),
            ));
        }
        window.validate()?;

        debug!("Generating slots for window {} on {}", window.id, window.date);

        let mut report = SlotGenerationReport {
            window_id,
            created: 0,
            existing: 0,
            slot_ids: Vec::new(),
        };

        for start in window.slot_starts() {
            let now = Utc::now();
            let candidate = Slot {
                id: Uuid::new_v4(),
                tenant_id,
                window_id,
                professional_id: window.professional_id,
                start_time: start,
                duration_minutes: window.slot_duration_minutes,
                total_capacity: window.capacity_per_slot,
                used_capacity: 0,
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            let (slot_id, created) = self.store.insert_slot_if_absent(candidate).await;
            if created {
                report.created += 1;
            } else {
                report.existing += 1;
            }
            report.slot_ids.push(slot_id);
        }

        if report.created > 0 {
            self.cache.bump();
        }

        self.metrics.increment_counter("slot_generation_runs_total", &[]);
        info!(
            "Generated slots for window {}: {} created, {} existing",
            window_id, report.created, report.existing
        );

        Ok(report)
    }
}
