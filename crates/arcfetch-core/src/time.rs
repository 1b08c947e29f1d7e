use chrono::{DateTime, Utc};

/// Timestamp form used for record creation dates and refers-to dates,
/// e.g. `2013-09-24T05:20:00Z`. Second precision, always UTC.
pub fn warc_date(t: DateTime<Utc>) -> String { t.format("%Y-%m-%dT%H:%M:%SZ").to_string() }

pub fn from_epoch_millis(ms: i64) -> Option<DateTime<Utc>> { DateTime::from_timestamp_millis(ms) }
