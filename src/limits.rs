//! Hard limits enforced by the engine. Anything past these is rejected with
//! `EngineError::LimitExceeded` before it reaches the WAL.

/// Users the directory will hold.
pub const MAX_USERS: usize = 100_000;

/// Byte length of a user's display name.
pub const MAX_NAME_LEN: usize = 256;

/// Entries the service catalog will hold.
pub const MAX_SERVICES: usize = 1_000;

/// Longest service, in minutes.
pub const MAX_SERVICE_MINUTES: u32 = 24 * 60;

/// Byte length of a service image URL.
pub const MAX_URL_LEN: usize = 2048;

/// Earliest bookable calendar day, as (year, month, day).
pub const MIN_VALID_DATE: (i32, u32, u32) = (2000, 1, 1);

/// Latest bookable calendar day, as (year, month, day).
pub const MAX_VALID_DATE: (i32, u32, u32) = (2199, 12, 31);

/// Bytes accepted in a single SQL statement.
pub const MAX_SQL_LEN: usize = 16 * 1024;
