pub mod backoff;
pub mod workdir;

use time::OffsetDateTime;

/// Unix seconds; every persisted timestamp in the schema uses this form.
pub fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
