// libs/availability-cell/src/services/capacity.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use monitoring_cell::MetricsRecorder;
use shared_config::SchedulingConfig;

use crate::error::AvailabilityError;
use crate::models::Slot;
use crate::services::listing_cache::ListingCache;
use crate::store::{SlotGuard, SlotStore};

/// The single serialization point for booking races.
///
/// Every capacity change happens while the caller holds the slot's row lock.
/// `reserve`/`release` take and drop the lock themselves; the `_locked`
/// variants run inside a lock the caller already holds so several changes can
/// commit together.
pub struct CapacityReservationService {
    config: SchedulingConfig,
    store: Arc<SlotStore>,
    cache: Arc<ListingCache>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl CapacityReservationService {
    pub fn new(
        config: SchedulingConfig,
        store: Arc<SlotStore>,
        cache: Arc<ListingCache>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self { config, store, cache, metrics }
    }

    pub fn store(&self) -> &Arc<SlotStore> {
        &self.store
    }

    /// Effective ceiling for a slot under the current overbooking policy.
    pub fn ceiling(&self, slot: &Slot) -> i32 {
        slot.total_capacity + self.config.overbooking_allowance()
    }

    pub fn has_room(&self, slot: &Slot, quantity: i32) -> bool {
        slot.is_active && slot.used_capacity + quantity <= self.ceiling(slot)
    }

    /// Take the row lock on a slot, recording how long the wait took.
    pub async fn lock(&self, tenant_id: Uuid, slot_id: Uuid) -> Result<SlotGuard, AvailabilityError> {
        let guard = self
            .store
            .lock_slot(tenant_id, slot_id)
            .await?
            .ok_or(AvailabilityError::SlotNotFound)?;

        self.metrics.record_histogram(
            "slot_lock_wait_ms",
            guard.waited().as_secs_f64() * 1000.0,
            &[],
        );

        Ok(guard)
    }

    /// Lock two distinct slots in ascending id order so concurrent callers
    /// locking the same pair cannot deadlock. Guards come back in argument order.
    pub async fn lock_pair(
        &self,
        tenant_id: Uuid,
        first: Uuid,
        second: Uuid,
    ) -> Result<(SlotGuard, SlotGuard), AvailabilityError> {
        if first <= second {
            let a = self.lock(tenant_id, first).await?;
            let b = self.lock(tenant_id, second).await?;
            Ok((a, b))
        } else {
            let b = self.lock(tenant_id, second).await?;
            let a = self.lock(tenant_id, first).await?;
            Ok((a, b))
        }
    }

    #[instrument(skip(self))]
    pub async fn reserve(&self, tenant_id: Uuid, slot_id: Uuid, quantity: i32) -> Result<Slot, AvailabilityError> {
        if quantity < 1 {
            return Err(AvailabilityError::InvalidQuantity(quantity));
        }

        let mut guard = self.lock(tenant_id, slot_id).await?;
        self.reserve_locked(&mut guard, quantity)?;
        self.after_capacity_change(&guard).await;

        Ok((*guard).clone())
    }

    #[instrument(skip(self))]
    pub async fn release(&self, tenant_id: Uuid, slot_id: Uuid, quantity: i32) -> Result<Slot, AvailabilityError> {
        if quantity < 1 {
            return Err(AvailabilityError::InvalidQuantity(quantity));
        }

        let mut guard = self.lock(tenant_id, slot_id).await?;
        self.release_locked(&mut guard, quantity);
        self.after_capacity_change(&guard).await;

        Ok((*guard).clone())
    }

    /// Check-and-increment on a slot the caller has locked.
    pub fn reserve_locked(&self, slot: &mut SlotGuard, quantity: i32) -> Result<(), AvailabilityError> {
        if quantity < 1 {
            return Err(AvailabilityError::InvalidQuantity(quantity));
        }

        if !self.has_room(slot, quantity) {
            let ceiling = self.ceiling(slot);
            warn!(
                "Reservation rejected on slot {}: used {}, requested {}, ceiling {}, active {}",
                slot.id, slot.used_capacity, quantity, ceiling, slot.is_active
            );
            self.metrics
                .increment_counter("slot_reservations_total", &[("outcome", "rejected")]);
            return Err(AvailabilityError::CapacityExceeded {
                slot_id: slot.id,
                used: slot.used_capacity,
                requested: quantity,
                ceiling,
            });
        }

        slot.used_capacity += quantity;
        slot.updated_at = Utc::now();

        info!(
            "Reserved {} on slot {} ({}/{})",
            quantity,
            slot.id,
            slot.used_capacity,
            self.ceiling(slot)
        );
        self.metrics
            .increment_counter("slot_reservations_total", &[("outcome", "reserved")]);

        Ok(())
    }

    /// Decrement on a slot the caller has locked. Clamps at zero.
    pub fn release_locked(&self, slot: &mut SlotGuard, quantity: i32) {
        let before = slot.used_capacity;
        slot.used_capacity = (slot.used_capacity - quantity.max(0)).max(0);
        slot.updated_at = Utc::now();

        if before - quantity < 0 {
            debug!("Release on slot {} clamped at zero (was {})", slot.id, before);
        }

        info!("Released {} on slot {} ({} used)", quantity, slot.id, slot.used_capacity);
        self.metrics.increment_counter("slot_releases_total", &[]);
    }

    /// Cache bump and gauge refresh after a committed change. Never fails.
    pub async fn after_capacity_change(&self, slot: &Slot) {
        self.cache.bump();

        let totals = self.store.capacity_totals(slot.tenant_id, Some(slot)).await;
        if totals.skipped > 0 {
            debug!("Capacity gauges skipped {} busy slots", totals.skipped);
        }

        let tenant = slot.tenant_id.to_string();
        let labels = [("tenant_id", tenant.as_str())];
        self.metrics
            .set_gauge("scheduling_capacity_used", totals.used as f64, &labels);
        self.metrics
            .set_gauge("scheduling_capacity_total", totals.total as f64, &labels);
    }
}
