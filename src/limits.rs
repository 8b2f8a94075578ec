pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 32;

/// Waiting requests accepted per date (any status).
pub const MAX_REQUESTS_PER_DATE: usize = 1_000;

/// How far ahead bookings and waitlist entries may be made.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 366;

/// Gap recomputations after a hold insert loses an overlap check.
pub const MAX_MATCH_RETRIES: usize = 3;

pub const DEFAULT_OFFER_TTL_MINUTES: i64 = 20;

/// Delivery attempts per client notification before giving up.
pub const MAX_NOTIFY_ATTEMPTS: u32 = 3;
