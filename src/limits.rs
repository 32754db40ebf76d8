//! Hard caps enforced at the tracker and pool boundaries.

/// Max length of an equipment name, user name or id, in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Max length of an email address, in bytes.
pub const MAX_EMAIL_LEN: usize = 320;

/// Max length of a damage description, in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 4096;

/// Max equipment items per pool.
pub const MAX_EQUIPMENT_PER_POOL: usize = 10_000;

/// Max bookings per pool, checked or not.
pub const MAX_BOOKINGS_PER_POOL: usize = 100_000;

/// Longest loan, in inclusive days.
pub const MAX_LOAN_DAYS: i64 = 366;

/// Max pools (one per database name) per server.
pub const MAX_POOLS: usize = 1024;

/// Max pool name length, in bytes.
pub const MAX_POOL_NAME_LEN: usize = 128;
