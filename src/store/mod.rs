pub mod sqlite;
#[cfg(test)]
pub mod memory;

pub use sqlite::SqliteSnapshotStore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Event, LineSnapshot};

/// Append-only storage of line snapshots.
///
/// Readers must only ever observe whole generations: `append` writes its batch
/// atomically, so a generation is either fully visible or not at all.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Markets with at least one snapshot for the event at or after `since`.
    async fn distinct_market_ids(&self, event_id: &str, since: DateTime<Utc>) -> Result<BTreeSet<u32>>;

    /// Snapshots at or after `since`, newest first.
    async fn snapshots(
        &self,
        event_id: &str,
        market_id: u32,
        since: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>>;

    async fn latest_timestamp(&self, event_id: &str, market_id: u32) -> Result<Option<DateTime<Utc>>>;

    async fn snapshots_at(
        &self,
        event_id: &str,
        market_id: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>>;

    /// Appends one batch in a single transaction.
    async fn append(&self, lines: &[LineSnapshot]) -> Result<()>;

    async fn upsert_event(&self, event: &Event) -> Result<()>;

    async fn events(&self) -> Result<Vec<Event>>;

    /// Snapshots at or after `since`, oldest first, optionally for one selection.
    async fn line_history(
        &self,
        event_id: &str,
        market_id: u32,
        selection: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>>;
}
