use chrono::{Local, NaiveDateTime, Timelike};

pub mod config;
pub mod record;
pub mod snapshot;

pub use config::{ConfigError, FileConfig, SyncConfig};
pub use record::{ChatId, RecordError, ReviewStatus, StateValue, UserRecord};
pub use snapshot::{Snapshot, SnapshotError};

/// Literal the registration bot writes for applications nobody has reviewed yet.
pub const PENDING_REVIEW_STATUS: &str = "در انتظار بررسی";

/// Second-precision local timestamps, as stored in `created_at` / `updated_at`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()
}

pub fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
