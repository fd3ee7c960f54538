use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Timelike};
use uuid::Uuid;

use availability_cell::{
    AvailabilityError, AvailabilityService, CapacityReservationService,
    CreateAvailabilityWindowRequest, ListingCache, SlotGenerator, SlotListingQuery, SlotStore,
    UpdateAvailabilityWindowRequest,
};
use monitoring_cell::NoopMetricsRecorder;
use shared_config::SchedulingConfig;
use shared_utils::test_utils::{at, future_day, init_test_tracing, time_of_day};

struct Fixture {
    tenant_id: Uuid,
    professional_id: Uuid,
    cache: Arc<ListingCache>,
    capacity: Arc<CapacityReservationService>,
    generator: SlotGenerator,
    availability: AvailabilityService,
}

fn fixture() -> Fixture {
    init_test_tracing();

    let config = SchedulingConfig::default();
    let store = Arc::new(SlotStore::from_timeout_ms(config.slot_lock_timeout_ms));
    let cache = Arc::new(ListingCache::from_ttl_seconds(60));
    let metrics = Arc::new(NoopMetricsRecorder);
    let capacity = Arc::new(CapacityReservationService::new(
        config,
        Arc::clone(&store),
        Arc::clone(&cache),
        metrics.clone(),
    ));

    Fixture {
        tenant_id: Uuid::new_v4(),
        professional_id: Uuid::new_v4(),
        cache: Arc::clone(&cache),
        generator: SlotGenerator::new(Arc::clone(&store), Arc::clone(&cache), metrics),
        availability: AvailabilityService::new(store, cache, Arc::clone(&capacity)),
        capacity,
    }
}

fn window_request(fx: &Fixture, start: (u32, u32), end: (u32, u32), duration: i32) -> CreateAvailabilityWindowRequest {
    CreateAvailabilityWindowRequest {
        tenant_id: fx.tenant_id,
        professional_id: fx.professional_id,
        date: future_day(10),
        start_time: time_of_day(start.0, start.1),
        end_time: time_of_day(end.0, end.1),
        slot_duration_minutes: duration,
        capacity_per_slot: 1,
        is_recurring: Some(true),
        recurrence_rule: Some("FREQ=WEEKLY;BYDAY=MO".to_string()),
    }
}

fn whole_day(fx: &Fixture) -> SlotListingQuery {
    let day = future_day(10);
    SlotListingQuery {
        tenant_id: fx.tenant_id,
        professional_id: fx.professional_id,
        from: at(day, 0, 0),
        to: at(day, 0, 0) + Duration::days(1),
    }
}

#[tokio::test]
async fn test_generation_is_idempotent() {
    let fx = fixture();
    let window = fx
        .availability
        .create_window(window_request(&fx, (9, 0), (12, 0), 30))
        .await
        .unwrap();

    let first = fx.generator.generate(fx.tenant_id, window.id).await.unwrap();
    assert_eq!((first.created, first.existing), (6, 0));

    let second = fx.generator.generate(fx.tenant_id, window.id).await.unwrap();
    assert_eq!((second.created, second.existing), (0, 6));
    assert_eq!(first.slot_ids, second.slot_ids);
}

#[tokio::test]
async fn test_partial_trailing_interval_is_dropped() {
    let fx = fixture();
    let window = fx
        .availability
        .create_window(window_request(&fx, (9, 0), (10, 45), 30))
        .await
        .unwrap();

    let report = fx.generator.generate(fx.tenant_id, window.id).await.unwrap();
    assert_eq!(report.created, 3);

    let slots = fx.availability.list_available_slots(whole_day(&fx)).await.unwrap();
    let hours: Vec<(u32, u32)> = slots.iter().map(|s| (s.start_time.hour(), s.start_time.minute())).collect();
    assert_eq!(hours, vec![(9, 0), (9, 30), (10, 0)]);
    assert!(slots.iter().all(|s| s.duration_minutes == 30 && s.total_capacity == 1));
}

#[tokio::test]
async fn test_invalid_windows_are_rejected() {
    let fx = fixture();

    assert_matches!(
        fx.availability.create_window(window_request(&fx, (10, 0), (9, 0), 30)).await,
        Err(AvailabilityError::InvalidWindow(_))
    );
    assert_matches!(
        fx.availability.create_window(window_request(&fx, (9, 0), (10, 0), 0)).await,
        Err(AvailabilityError::InvalidWindow(_))
    );

    let mut no_tenant = window_request(&fx, (9, 0), (10, 0), 30);
    no_tenant.tenant_id = Uuid::nil();
    assert_matches!(
        fx.availability.create_window(no_tenant).await,
        Err(AvailabilityError::InvalidTenant)
    );
}

#[tokio::test]
async fn test_window_locked_once_slots_exist() {
    let fx = fixture();
    let window = fx
        .availability
        .create_window(window_request(&fx, (9, 0), (10, 0), 30))
        .await
        .unwrap();

    let updated = fx
        .availability
        .update_window(
            fx.tenant_id,
            window.id,
            UpdateAvailabilityWindowRequest {
                end_time: Some(time_of_day(11, 0)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.end_time, time_of_day(11, 0));

    fx.generator.generate(fx.tenant_id, window.id).await.unwrap();

    assert_matches!(
        fx.availability
            .update_window(fx.tenant_id, window.id, UpdateAvailabilityWindowRequest::default())
            .await,
        Err(AvailabilityError::WindowLocked(id)) if id == window.id
    );
}

#[tokio::test]
async fn test_deactivation_cascades_and_blocks_generation() {
    let fx = fixture();
    let window = fx
        .availability
        .create_window(window_request(&fx, (9, 0), (10, 0), 30))
        .await
        .unwrap();
    fx.generator.generate(fx.tenant_id, window.id).await.unwrap();
    assert_eq!(fx.availability.list_available_slots(whole_day(&fx)).await.unwrap().len(), 2);

    fx.availability
        .set_window_active(fx.tenant_id, window.id, false)
        .await
        .unwrap();

    assert!(fx.availability.list_available_slots(whole_day(&fx)).await.unwrap().is_empty());
    assert_matches!(
        fx.generator.generate(fx.tenant_id, window.id).await,
        Err(AvailabilityError::InvalidWindow(_))
    );
}

#[tokio::test]
async fn test_listing_never_serves_stale_capacity() {
    let fx = fixture();
    let window = fx
        .availability
        .create_window(window_request(&fx, (9, 0), (10, 0), 30))
        .await
        .unwrap();
    let report = fx.generator.generate(fx.tenant_id, window.id).await.unwrap();

    // Warm the cache
    assert_eq!(fx.availability.list_available_slots(whole_day(&fx)).await.unwrap().len(), 2);
    let warmed = fx.cache.version();

    fx.capacity.reserve(fx.tenant_id, report.slot_ids[0], 1).await.unwrap();
    assert!(fx.cache.version() > warmed);

    let listed = fx.availability.list_available_slots(whole_day(&fx)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, report.slot_ids[1]);
}

#[tokio::test]
async fn test_windows_are_tenant_scoped() {
    let fx = fixture();
    let window = fx
        .availability
        .create_window(window_request(&fx, (9, 0), (10, 0), 30))
        .await
        .unwrap();

    assert_matches!(
        fx.generator.generate(Uuid::new_v4(), window.id).await,
        Err(AvailabilityError::WindowNotFound)
    );
    assert_matches!(
        fx.availability.get_window(Uuid::new_v4(), window.id).await,
        Err(AvailabilityError::WindowNotFound)
    );
}
