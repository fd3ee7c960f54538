use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub scheduling: SchedulingConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_SERVICE_ROLE_KEY not set, using empty value");
                    String::new()
                }),
            scheduling: SchedulingConfig::from_env(),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
    }

    /// Outbound notification and calendar adapters need a service-role key
    /// because they write on behalf of the system, not a signed-in user.
    pub fn is_outbound_configured(&self) -> bool {
        self.is_configured() && !self.supabase_service_role_key.is_empty()
    }
}

/// Feature flags and policy knobs for the scheduling core.
///
/// Passed explicitly into each service at construction time; nothing in the
/// booking path reads process-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingConfig {
    pub overbooking_enabled: bool,
    /// Flat number of units added to every slot's ceiling when overbooking is on.
    pub overbooking_extra_capacity: i32,
    pub waitlist_enabled: bool,
    pub competency_enforcement_enabled: bool,
    pub service_required: bool,
    pub client_cancellation_notice_minutes: i64,
    pub max_reschedule_chain_length: usize,
    pub listing_cache_ttl_seconds: u64,
    pub calendar_mirror_enabled: bool,
    pub slot_lock_timeout_ms: u64,
    pub service_slot_tolerance_minutes: i64,
    pub default_waitlist_priority: i32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            overbooking_enabled: false,
            overbooking_extra_capacity: 0,
            waitlist_enabled: true,
            competency_enforcement_enabled: false,
            service_required: false,
            client_cancellation_notice_minutes: 24 * 60,
            max_reschedule_chain_length: 5,
            listing_cache_ttl_seconds: 30,
            calendar_mirror_enabled: false,
            slot_lock_timeout_ms: 5_000,
            service_slot_tolerance_minutes: 60,
            default_waitlist_priority: 100,
        }
    }
}

impl SchedulingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Missing keys keep their
    /// default; unparsable values are logged and also keep their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            overbooking_enabled: parse_or(&lookup, "SCHEDULING_OVERBOOKING_ENABLED", defaults.overbooking_enabled),
            overbooking_extra_capacity: parse_or(&lookup, "SCHEDULING_OVERBOOKING_EXTRA_CAPACITY", defaults.overbooking_extra_capacity),
            waitlist_enabled: parse_or(&lookup, "SCHEDULING_WAITLIST_ENABLED", defaults.waitlist_enabled),
            competency_enforcement_enabled: parse_or(
                &lookup,
                "SCHEDULING_COMPETENCY_ENFORCEMENT_ENABLED",
                defaults.competency_enforcement_enabled,
            ),
            service_required: parse_or(&lookup, "SCHEDULING_SERVICE_REQUIRED", defaults.service_required),
            client_cancellation_notice_minutes: parse_or(
                &lookup,
                "SCHEDULING_CLIENT_CANCELLATION_NOTICE_MINUTES",
                defaults.client_cancellation_notice_minutes,
            ),
            max_reschedule_chain_length: parse_or(
                &lookup,
                "SCHEDULING_MAX_RESCHEDULE_CHAIN_LENGTH",
                defaults.max_reschedule_chain_length,
            ),
            listing_cache_ttl_seconds: parse_or(&lookup, "SCHEDULING_LISTING_CACHE_TTL_SECONDS", defaults.listing_cache_ttl_seconds),
            calendar_mirror_enabled: parse_or(&lookup, "SCHEDULING_CALENDAR_MIRROR_ENABLED", defaults.calendar_mirror_enabled),
            slot_lock_timeout_ms: parse_or(&lookup, "SCHEDULING_SLOT_LOCK_TIMEOUT_MS", defaults.slot_lock_timeout_ms),
            service_slot_tolerance_minutes: parse_or(
                &lookup,
                "SCHEDULING_SERVICE_SLOT_TOLERANCE_MINUTES",
                defaults.service_slot_tolerance_minutes,
            ),
            default_waitlist_priority: parse_or(&lookup, "SCHEDULING_DEFAULT_WAITLIST_PRIORITY", defaults.default_waitlist_priority),
        }
    }

    /// Ceiling bonus applied on top of a slot's total capacity.
    pub fn overbooking_allowance(&self) -> i32 {
        if self.overbooking_enabled {
            self.overbooking_extra_capacity.max(0)
        } else {
            0
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("{} has invalid value '{}', using default", key, raw);
                default
            }
        },
        None => default,
    }
}
