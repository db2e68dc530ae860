use crate::model::Ms;

/// Reactors per engine.
pub const MAX_REACTORS: usize = 10_000;

/// Commitments plus maintenance windows held by one reactor.
pub const MAX_RECORDS_PER_REACTOR: usize = 100_000;

pub const MAX_SERIAL_LEN: usize = 64;

/// Free-text fields: team, product, reason, notes, emails, ...
pub const MAX_TEXT_LEN: usize = 1024;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single commitment or maintenance window may not exceed one year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Widest reporting period an occupancy query may ask for (ten years).
pub const MAX_REPORT_WINDOW_MS: Ms = 10 * 366 * 24 * 3_600_000;
