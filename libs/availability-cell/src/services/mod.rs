pub mod availability;
pub mod capacity;
pub mod listing_cache;
pub mod slot_generator;

pub use availability::AvailabilityService;
pub use capacity::CapacityReservationService;
pub use listing_cache::ListingCache;
pub use slot_generator::SlotGenerator;
