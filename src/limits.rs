use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_FACILITIES_PER_TENANT: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_CONTACT_LEN: usize = 320;

pub const MAX_PRICING_OPTIONS_PER_FACILITY: usize = 256;
pub const MAX_ADDONS_PER_RESERVATION: usize = 32;
/// Counts reservations still holding a window; terminal history is uncapped.
pub const MAX_RESERVATIONS_PER_FACILITY: usize = 100_000;
pub const MAX_WAITLIST_PER_FACILITY: usize = 10_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Reservations listed for one facility query are bounded to one year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
