//! Timestamp truncation.
//!
//! Many backends (notably SQLite's TEXT-affinity datetime storage) round
//! `TIMESTAMP` columns to whole seconds. Every backend truncates
//! `created_at`/`last_seen` to whole seconds on write so the same value
//! compares equal whether it round-tripped through Postgres, SQLite, or the
//! in-memory backend.

use chrono::{DateTime, SubsecRound, Utc};

pub fn truncate_to_secs(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(0)
}

pub fn now() -> DateTime<Utc> {
    truncate_to_secs(Utc::now())
}
