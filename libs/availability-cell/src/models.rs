// libs/availability-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::error::AvailabilityError;

// ==============================================================================
// AVAILABILITY WINDOWS
// ==============================================================================

/// A professional's declared working interval on one calendar day.
///
/// Times are interpreted as UTC wall-clock times on `date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub professional_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub capacity_per_slot: i32,
    pub is_recurring: bool,
    /// Opaque recurrence rule, stored as given.
    pub recurrence_rule: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityWindow {
    pub fn validate(&self) -> Result<(), AvailabilityError> {
        if self.tenant_id.is_nil() {
            return Err(AvailabilityError::InvalidTenant);
        }
        if self.end_time <= self.start_time {
            return Err(AvailabilityError::InvalidWindow(
                "End time must be after start time".to_string(),
            ));
        }
        if self.slot_duration_minutes <= 0 {
            return Err(AvailabilityError::InvalidWindow(
                "Slot duration must be positive".to_string(),
            ));
        }
        if self.capacity_per_slot <= 0 {
            return Err(AvailabilityError::InvalidWindow(
                "Capacity per slot must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.end_time).and_utc()
    }

    /// Start instants of every whole slot that fits in the window.
    /// A trailing remainder shorter than one slot is dropped.
    pub fn slot_starts(&self) -> Vec<DateTime<Utc>> {
        if self.slot_duration_minutes <= 0 {
            return Vec::new();
        }

        let step = Duration::minutes(self.slot_duration_minutes as i64);
        let end = self.ends_at();
        let mut cursor = self.starts_at();
        let mut starts = Vec::new();

        while cursor + step <= end {
            starts.push(cursor);
            cursor += step;
        }

        starts
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAvailabilityWindowRequest {
    pub tenant_id: Uuid,
    pub professional_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub capacity_per_slot: i32,
    pub is_recurring: Option<bool>,
    pub recurrence_rule: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAvailabilityWindowRequest {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub slot_duration_minutes: Option<i32>,
    pub capacity_per_slot: Option<i32>,
    pub recurrence_rule: Option<String>,
}

// ==============================================================================
// SLOTS
// ==============================================================================

/// A discrete bookable unit generated from a window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub window_id: Uuid,
    pub professional_id: Uuid,
    pub start_time: DateTime<Utc>,
    /// Copied from the window so the slot's granularity is known without a join.
    pub duration_minutes: i32,
    pub total_capacity: i32,
    pub used_capacity: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(self.duration_minutes as i64)
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.duration_minutes as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotGenerationReport {
    pub window_id: Uuid,
    pub created: usize,
    pub existing: usize,
    pub slot_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotListingQuery {
    pub tenant_id: Uuid,
    pub professional_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: (u32, u32), end: (u32, u32), duration: i32) -> AvailabilityWindow {
        AvailabilityWindow {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2030, 3, 4).unwrap(),
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            slot_duration_minutes: duration,
            capacity_per_slot: 1,
            is_recurring: false,
            recurrence_rule: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_slot_starts_cover_whole_intervals_only() {
        let w = window((9, 0), (10, 15), 30);
        let starts: Vec<String> = w.slot_starts().iter().map(|t| t.format("%H:%M").to_string()).collect();
        assert_eq!(starts, vec!["09:00", "09:30"]);
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let w = window((10, 0), (9, 0), 30);
        assert!(matches!(w.validate(), Err(AvailabilityError::InvalidWindow(_))));
    }

    #[test]
    fn test_validate_rejects_nil_tenant() {
        let mut w = window((9, 0), (10, 0), 30);
        w.tenant_id = Uuid::nil();
        assert_eq!(w.validate(), Err(AvailabilityError::InvalidTenant));
    }
}
