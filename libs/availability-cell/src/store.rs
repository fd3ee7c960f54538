// libs/availability-cell/src/store.rs
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::StoreError;

use crate::models::{AvailabilityWindow, Slot};

/// Exclusive hold on one slot row. Capacity may only be read-then-written
/// through a guard.
pub struct SlotGuard {
    inner: OwnedMutexGuard<Slot>,
    waited: Duration,
}

impl SlotGuard {
    /// Time spent waiting for the row lock.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Deref for SlotGuard {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.inner
    }
}

impl DerefMut for SlotGuard {
    fn deref_mut(&mut self) -> &mut Slot {
        &mut self.inner
    }
}

struct SlotRow {
    tenant_id: Uuid,
    professional_id: Uuid,
    start_time: DateTime<Utc>,
    cell: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct SlotTable {
    rows: HashMap<Uuid, SlotRow>,
    by_start: HashMap<(Uuid, DateTime<Utc>), Uuid>,
    by_window: HashMap<Uuid, Vec<Uuid>>,
}

/// Per-tenant capacity totals, summed over active slots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CapacityTotals {
    pub used: i64,
    pub total: i64,
    /// Rows skipped because another task held their lock.
    pub skipped: usize,
}

/// In-process window and slot tables.
///
/// Each slot row sits behind its own async mutex; holding the mutex is the
/// row lock. Lock acquisition is bounded by `lock_timeout`.
pub struct SlotStore {
    windows: RwLock<HashMap<Uuid, AvailabilityWindow>>,
    slots: RwLock<SlotTable>,
    lock_timeout: Duration,
}

impl SlotStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            slots: RwLock::new(SlotTable::default()),
            lock_timeout,
        }
    }

    pub fn from_timeout_ms(timeout_ms: u64) -> Self {
        Self::new(Duration::from_millis(timeout_ms))
    }

    // ==============================================================================
    // WINDOWS
    // ==============================================================================

    pub async fn insert_window(&self, window: AvailabilityWindow) {
        self.windows.write().await.insert(window.id, window);
    }

    pub async fn get_window(&self, tenant_id: Uuid, window_id: Uuid) -> Option<AvailabilityWindow> {
        self.windows
            .read()
            .await
            .get(&window_id)
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
    }

    /// Apply `f` to a stored window in place. Returns the updated copy.
    pub async fn update_window<F>(&self, tenant_id: Uuid, window_id: Uuid, f: F) -> Option<AvailabilityWindow>
    where
        F: FnOnce(&mut AvailabilityWindow),
    {
        let mut windows = self.windows.write().await;
        let window = windows.get_mut(&window_id).filter(|w| w.tenant_id == tenant_id)?;
        f(window);
        window.updated_at = Utc::now();
        Some(window.clone())
    }

    // ==============================================================================
    // SLOTS
    // ==============================================================================

    /// Insert a slot unless one already exists for the same professional and
    /// start instant. Returns the id of the stored row and whether it was new.
    pub async fn insert_slot_if_absent(&self, slot: Slot) -> (Uuid, bool) {
        let mut table = self.slots.write().await;
        let natural_key = (slot.professional_id, slot.start_time);

        if let Some(existing) = table.by_start.get(&natural_key) {
            return (*existing, false);
        }

        let id = slot.id;
        table.by_start.insert(natural_key, id);
        table.by_window.entry(slot.window_id).or_default().push(id);
        table.rows.insert(
            id,
            SlotRow {
                tenant_id: slot.tenant_id,
                professional_id: slot.professional_id,
                start_time: slot.start_time,
                cell: Arc::new(Mutex::new(slot)),
            },
        );

        (id, true)
    }

    /// Acquire the row lock on a slot. `Ok(None)` when the slot does not
    /// exist for this tenant.
    pub async fn lock_slot(&self, tenant_id: Uuid, slot_id: Uuid) -> Result<Option<SlotGuard>, StoreError> {
        let cell = {
            let table = self.slots.read().await;
            match table.rows.get(&slot_id) {
                Some(row) if row.tenant_id == tenant_id => Arc::clone(&row.cell),
                _ => return Ok(None),
            }
        };

        let started = Instant::now();
        match tokio::time::timeout(self.lock_timeout, cell.lock_owned()).await {
            Ok(inner) => {
                let waited = started.elapsed();
                debug!("Locked slot {} after {:?}", slot_id, waited);
                Ok(Some(SlotGuard { inner, waited }))
            }
            Err(_) => {
                warn!("Lock timeout on slot {}", slot_id);
                Err(StoreError::LockTimeout {
                    resource: format!("slot:{}", slot_id),
                    timeout_ms: self.lock_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Point-in-time copy of a slot. Waits for the row lock like a writer would.
    pub async fn get_slot(&self, tenant_id: Uuid, slot_id: Uuid) -> Result<Option<Slot>, StoreError> {
        Ok(self
            .lock_slot(tenant_id, slot_id)
            .await?
            .map(|guard| (*guard).clone()))
    }

    pub async fn slot_ids_for_window(&self, window_id: Uuid) -> Vec<Uuid> {
        self.slots
            .read()
            .await
            .by_window
            .get(&window_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Copies of a professional's slots starting in `[from, to)`, ordered by start.
    pub async fn slots_for_professional(
        &self,
        tenant_id: Uuid,
        professional_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Slot>, StoreError> {
        let mut ids: Vec<(DateTime<Utc>, Uuid)> = {
            let table = self.slots.read().await;
            table
                .rows
                .iter()
                .filter(|(_, row)| {
                    row.tenant_id == tenant_id
                        && row.professional_id == professional_id
                        && row.start_time >= from
                        && row.start_time < to
                })
                .map(|(id, row)| (row.start_time, *id))
                .collect()
        };
        ids.sort();

        let mut slots = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            if let Some(slot) = self.get_slot(tenant_id, id).await? {
                slots.push(slot);
            }
        }

        Ok(slots)
    }

    /// Sum used and total capacity over a tenant's active slots without
    /// blocking. `current` stands in for a row the caller already holds.
    pub async fn capacity_totals(&self, tenant_id: Uuid, current: Option<&Slot>) -> CapacityTotals {
        let table = self.slots.read().await;
        let mut totals = CapacityTotals::default();

        for (id, row) in table.rows.iter().filter(|(_, row)| row.tenant_id == tenant_id) {
            if let Some(held) = current.filter(|slot| slot.id == *id) {
                if held.is_active {
                    totals.used += held.used_capacity as i64;
                    totals.total += held.total_capacity as i64;
                }
                continue;
            }

            match row.cell.try_lock() {
                Ok(slot) => {
                    if slot.is_active {
                        totals.used += slot.used_capacity as i64;
                        totals.total += slot.total_capacity as i64;
                    }
                }
                Err(_) => totals.skipped += 1,
            }
        }

        totals
    }
}
