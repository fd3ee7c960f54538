// libs/availability-cell/src/services/availability.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::AvailabilityError;
use crate::models::{
    AvailabilityWindow, CreateAvailabilityWindowRequest, Slot, SlotListingQuery,
    UpdateAvailabilityWindowRequest,
};
use crate::services::capacity::CapacityReservationService;
use crate::services::listing_cache::ListingCache;
use crate::store::SlotStore;

pub struct AvailabilityService {
    store: Arc<SlotStore>,
    cache: Arc<ListingCache>,
    capacity: Arc<CapacityReservationService>,
}

impl AvailabilityService {
    pub fn new(
        store: Arc<SlotStore>,
        cache: Arc<ListingCache>,
        capacity: Arc<CapacityReservationService>,
    ) -> Self {
        Self { store, cache, capacity }
    }

    #[instrument(skip(self, request), fields(professional_id = %request.professional_id))]
    pub async fn create_window(
        &self,
        request: CreateAvailabilityWindowRequest,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        debug!("Creating availability window on {}", request.date);

        let now = Utc::now();
        let window = AvailabilityWindow {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id,
            professional_id: request.professional_id,
            date: request.date,
            start_time: request.start_time,
            end_time: request.end_time,
            slot_duration_minutes: request.slot_duration_minutes,
            capacity_per_slot: request.capacity_per_slot,
            is_recurring: request.is_recurring.unwrap_or(false),
            recurrence_rule: request.recurrence_rule,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = window.validate() {
            warn!("Rejected availability window: {}", e);
            return Err(e);
        }

        self.store.insert_window(window.clone()).await;
        info!("Availability window {} created", window.id);

        Ok(window)
    }

    /// Change a window's shape. Only allowed while no slots have been
    /// generated from it.
    #[instrument(skip(self, request))]
    pub async fn update_window(
        &self,
        tenant_id: Uuid,
        window_id: Uuid,
        request: UpdateAvailabilityWindowRequest,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        let current = self
            .store
            .get_window(tenant_id, window_id)
            .await
            .ok_or(AvailabilityError::WindowNotFound)?;

        if !self.store.slot_ids_for_window(window_id).await.is_empty() {
            warn!("Window {} already has slots; update refused", window_id);
            return Err(AvailabilityError::WindowLocked(window_id));
        }

        let mut candidate = current;
        if let Some(start) = request.start_time {
            candidate.start_time = start;
        }
        if let Some(end) = request.end_time {
            candidate.end_time = end;
        }
        if let Some(duration) = request.slot_duration_minutes {
            candidate.slot_duration_minutes = duration;
        }
        if let Some(capacity) = request.capacity_per_slot {
            candidate.capacity_per_slot = capacity;
        }
        if request.recurrence_rule.is_some() {
            candidate.recurrence_rule = request.recurrence_rule;
        }
        candidate.validate()?;

        let updated = self
            .store
            .update_window(tenant_id, window_id, |window| {
                window.start_time = candidate.start_time;
                window.end_time = candidate.end_time;
                window.slot_duration_minutes = candidate.slot_duration_minutes;
                window.capacity_per_slot = candidate.capacity_per_slot;
                window.recurrence_rule = candidate.recurrence_rule.clone();
            })
            .await
            .ok_or(AvailabilityError::WindowNotFound)?;

        info!("Availability window {} updated", window_id);
        Ok(updated)
    }

    /// Toggle a window and every slot generated from it. Reservations
    /// already held on the slots are left in place.
    #[instrument(skip(self))]
    pub async fn set_window_active(
        &self,
        tenant_id: Uuid,
        window_id: Uuid,
        active: bool,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        let window = self
            .store
            .update_window(tenant_id, window_id, |window| window.is_active = active)
            .await
            .ok_or(AvailabilityError::WindowNotFound)?;

        let slot_ids = self.store.slot_ids_for_window(window_id).await;
        let mut last: Option<Slot> = None;

        for slot_id in &slot_ids {
            let mut guard = self.capacity.lock(tenant_id, *slot_id).await?;
            if guard.is_active != active {
                guard.is_active = active;
                guard.updated_at = Utc::now();
            }
            last = Some((*guard).clone());
        }

        match last {
            Some(slot) => self.capacity.after_capacity_change(&slot).await,
            None => {
                self.cache.bump();
            }
        }

        info!(
            "Window {} set active={} ({} slots cascaded)",
            window_id,
            active,
            slot_ids.len()
        );

        Ok(window)
    }

    pub async fn get_window(
        &self,
        tenant_id: Uuid,
        window_id: Uuid,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        self.store
            .get_window(tenant_id, window_id)
            .await
            .ok_or(AvailabilityError::WindowNotFound)
    }

    /// Bookable slots for a professional in `[from, to)`: active and with
    /// room for one more unit. Served from the listing cache when fresh.
    #[instrument(skip(self, query), fields(professional_id = %query.professional_id))]
    pub async fn list_available_slots(&self, query: SlotListingQuery) -> Result<Vec<Slot>, AvailabilityError> {
        if query.tenant_id.is_nil() {
            return Err(AvailabilityError::InvalidTenant);
        }

        let key = ListingCache::listing_key(query.tenant_id, query.professional_id, query.from, query.to);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Listing cache hit for {}", key);
            return Ok(cached);
        }

        let version = self.cache.version();
        let slots: Vec<Slot> = self
            .store
            .slots_for_professional(query.tenant_id, query.professional_id, query.from, query.to)
            .await?
            .into_iter()
            .filter(|slot| self.capacity.has_room(slot, 1))
            .collect();

        debug!("Found {} available slots", slots.len());
        self.cache.put(key, version, slots.clone());

        Ok(slots)
    }
}
