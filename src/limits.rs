//! Hard limits enforced by the engine and the SQL front-end.

use crate::model::Ms;

pub const MAX_ACCOMMODATIONS: usize = 100_000;
pub const MAX_WINDOWS_PER_ACCOMMODATION: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ACCOMMODATION: usize = 100_000;

pub const MAX_GUEST_COUNT: u32 = 1_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// Ten years.
pub const MAX_RANGE_DURATION_MS: Ms = 10 * 366 * 24 * 3_600_000;

/// Max accommodation ids in one `quotes` lookup.
pub const MAX_QUOTE_IDS: usize = 1_000;

/// Largest WAL record payload. An accept cascade over every reservation of
/// one accommodation stays well below this.
pub const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

/// Guests may cancel up to this long before the stay starts.
pub const CANCELLATION_CUTOFF_MS: Ms = 24 * 3_600_000;
