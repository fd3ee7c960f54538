use std::sync::Arc;

use assert_matches::assert_matches;
use futures::future::join_all;
use uuid::Uuid;

use availability_cell::{
    AvailabilityError, AvailabilityService, CapacityReservationService,
    CreateAvailabilityWindowRequest, ListingCache, SlotGenerator, SlotStore,
};
use monitoring_cell::InMemoryMetricsRecorder;
use shared_config::SchedulingConfig;
use shared_utils::test_utils::{future_day, init_test_tracing, time_of_day};

struct Fixture {
    tenant_id: Uuid,
    store: Arc<SlotStore>,
    cache: Arc<ListingCache>,
    metrics: Arc<InMemoryMetricsRecorder>,
    capacity: Arc<CapacityReservationService>,
    generator: SlotGenerator,
    availability: AvailabilityService,
}

impl Fixture {
    fn new(config: SchedulingConfig) -> Self {
        init_test_tracing();

        let store = Arc::new(SlotStore::from_timeout_ms(config.slot_lock_timeout_ms));
        let cache = Arc::new(ListingCache::from_ttl_seconds(config.listing_cache_ttl_seconds));
        let metrics = Arc::new(InMemoryMetricsRecorder::new());
        let capacity = Arc::new(CapacityReservationService::new(
            config,
            Arc::clone(&store),
            Arc::clone(&cache),
            metrics.clone(),
        ));
        let generator = SlotGenerator::new(Arc::clone(&store), Arc::clone(&cache), metrics.clone());
        let availability = AvailabilityService::new(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&capacity));

        Self {
            tenant_id: Uuid::new_v4(),
            store,
            cache,
            metrics,
            capacity,
            generator,
            availability,
        }
    }

    /// One-slot window with the given capacity; returns the slot id.
    async fn single_slot(&self, capacity_per_slot: i32) -> Uuid {
        let window = self
            .availability
            .create_window(CreateAvailabilityWindowRequest {
                tenant_id: self.tenant_id,
                professional_id: Uuid::new_v4(),
                date: future_day(7),
                start_time: time_of_day(9, 0),
                end_time: time_of_day(9, 30),
                slot_duration_minutes: 30,
                capacity_per_slot,
                is_recurring: None,
                recurrence_rule: None,
            })
            .await
            .unwrap();

        let report = self.generator.generate(self.tenant_id, window.id).await.unwrap();
        report.slot_ids[0]
    }
}

#[tokio::test]
async fn test_reserve_until_full_then_reject() {
    let fx = Fixture::new(SchedulingConfig::default());
    let slot_id = fx.single_slot(2).await;

    fx.capacity.reserve(fx.tenant_id, slot_id, 1).await.unwrap();
    let slot = fx.capacity.reserve(fx.tenant_id, slot_id, 1).await.unwrap();
    assert_eq!(slot.used_capacity, 2);

    let err = fx.capacity.reserve(fx.tenant_id, slot_id, 1).await.unwrap_err();
    assert_matches!(err, AvailabilityError::CapacityExceeded { used: 2, requested: 1, ceiling: 2, .. });
    assert_eq!(err.code(), "CAPACITY_EXCEEDED");

    let snapshot = fx.metrics.snapshot();
    assert_eq!(snapshot.counter("slot_reservations_total{outcome=reserved}"), 2);
    assert_eq!(snapshot.counter("slot_reservations_total{outcome=rejected}"), 1);
}

#[tokio::test]
async fn test_overbooking_extends_ceiling() {
    let fx = Fixture::new(SchedulingConfig {
        overbooking_enabled: true,
        overbooking_extra_capacity: 1,
        ..SchedulingConfig::default()
    });
    let slot_id = fx.single_slot(1).await;

    fx.capacity.reserve(fx.tenant_id, slot_id, 1).await.unwrap();
    let slot = fx.capacity.reserve(fx.tenant_id, slot_id, 1).await.unwrap();
    assert_eq!(slot.used_capacity, 2);

    assert_matches!(
        fx.capacity.reserve(fx.tenant_id, slot_id, 1).await,
        Err(AvailabilityError::CapacityExceeded { ceiling: 2, .. })
    );
}

#[tokio::test]
async fn test_release_clamps_at_zero() {
    let fx = Fixture::new(SchedulingConfig::default());
    let slot_id = fx.single_slot(1).await;

    fx.capacity.reserve(fx.tenant_id, slot_id, 1).await.unwrap();
    fx.capacity.release(fx.tenant_id, slot_id, 1).await.unwrap();
    let slot = fx.capacity.release(fx.tenant_id, slot_id, 1).await.unwrap();

    assert_eq!(slot.used_capacity, 0);
}

#[tokio::test]
async fn test_invalid_quantity_and_unknown_slot() {
    let fx = Fixture::new(SchedulingConfig::default());
    let slot_id = fx.single_slot(1).await;

    assert_matches!(
        fx.capacity.reserve(fx.tenant_id, slot_id, 0).await,
        Err(AvailabilityError::InvalidQuantity(0))
    );
    assert_matches!(
        fx.capacity.reserve(fx.tenant_id, Uuid::new_v4(), 1).await,
        Err(AvailabilityError::SlotNotFound)
    );
    // Another tenant cannot see the slot at all
    assert_matches!(
        fx.capacity.reserve(Uuid::new_v4(), slot_id, 1).await,
        Err(AvailabilityError::SlotNotFound)
    );
}

#[tokio::test]
async fn test_inactive_slot_rejects_reservation() {
    let fx = Fixture::new(SchedulingConfig::default());
    let slot_id = fx.single_slot(3).await;
    let window_id = fx.store.get_slot(fx.tenant_id, slot_id).await.unwrap().unwrap().window_id;

    fx.availability
        .set_window_active(fx.tenant_id, window_id, false)
        .await
        .unwrap();

    assert_matches!(
        fx.capacity.reserve(fx.tenant_id, slot_id, 1).await,
        Err(AvailabilityError::CapacityExceeded { used: 0, .. })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_exceed_capacity() {
    let fx = Fixture::new(SchedulingConfig::default());
    let slot_id = fx.single_slot(3).await;

    let attempts = (0..20).map(|_| {
        let capacity = Arc::clone(&fx.capacity);
        let tenant_id = fx.tenant_id;
        tokio::spawn(async move { capacity.reserve(tenant_id, slot_id, 1).await })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 3);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, AvailabilityError::CapacityExceeded { .. });
    }

    let slot = fx.store.get_slot(fx.tenant_id, slot_id).await.unwrap().unwrap();
    assert_eq!(slot.used_capacity, 3);
}

#[tokio::test]
async fn test_capacity_change_bumps_cache_and_sets_gauges() {
    let fx = Fixture::new(SchedulingConfig::default());
    let slot_id = fx.single_slot(4).await;
    let before = fx.cache.version();

    fx.capacity.reserve(fx.tenant_id, slot_id, 2).await.unwrap();

    assert!(fx.cache.version() > before);
    let snapshot = fx.metrics.snapshot();
    let tenant = fx.tenant_id.to_string();
    assert_eq!(
        snapshot.gauge(&format!("scheduling_capacity_used{{tenant_id={}}}", tenant)),
        Some(2.0)
    );
    assert_eq!(
        snapshot.gauge(&format!("scheduling_capacity_total{{tenant_id={}}}", tenant)),
        Some(4.0)
    );
    assert_eq!(snapshot.histograms["slot_lock_wait_ms"].count, 1);
}

#[tokio::test]
async fn test_lock_pair_is_order_independent() {
    let fx = Fixture::new(SchedulingConfig::default());
    let a = fx.single_slot(1).await;
    let b = fx.single_slot(1).await;

    {
        let (first, second) = fx.capacity.lock_pair(fx.tenant_id, a, b).await.unwrap();
        assert_eq!((first.id, second.id), (a, b));
    }

    let (first, second) = fx.capacity.lock_pair(fx.tenant_id, b, a).await.unwrap();
    assert_eq!((first.id, second.id), (b, a));
}
