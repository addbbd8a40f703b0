use crate::model::Ms;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_VEHICLES_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_VEHICLE: usize = 50_000;
pub const MAX_MAINTENANCE_PER_VEHICLE: usize = 10_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single rental may not exceed one year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Availability queries are capped at two years.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * 24 * 3_600_000;

/// One week of preparation is the most an agency can configure.
pub const MAX_PREPARATION_MINUTES: i64 = 7 * 24 * 60;

pub const MAX_ACTOR_LEN: usize = 256;
