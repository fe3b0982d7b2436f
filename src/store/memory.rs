use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{AppError, Result};
use crate::store::SnapshotStore;
use crate::types::{Event, LineSnapshot};

/// In-process store keyed by (event_id, market_id). Rows are kept in append order.
#[derive(Default)]
pub struct MemorySnapshotStore {
    lines: DashMap<(String, u32), Vec<LineSnapshot>>,
    events: DashMap<String, Event>,
    /// Markets whose reads fail, for exercising partial-failure paths.
    failing_markets: DashMap<u32, ()>,
    fail_appends: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads_for(&self, market_id: u32) {
        self.failing_markets.insert(market_id, ());
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.lines.iter().map(|e| e.value().len()).sum()
    }

    fn check_market(&self, market_id: u32) -> Result<()> {
        if self.failing_markets.contains_key(&market_id) {
            return Err(AppError::Io(std::io::Error::other(format!("market {market_id} unavailable"))));
        }
        Ok(())
    }

    fn rows(&self, event_id: &str, market_id: u32) -> Vec<LineSnapshot> {
        self.lines
            .get(&(event_id.to_string(), market_id))
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn distinct_market_ids(&self, event_id: &str, since: DateTime<Utc>) -> Result<BTreeSet<u32>> {
        Ok(self
            .lines
            .iter()
            .filter(|e| e.key().0 == event_id && e.value().iter().any(|s| s.timestamp >= since))
            .map(|e| e.key().1)
            .collect())
    }

    async fn snapshots(
        &self,
        event_id: &str,
        market_id: u32,
        since: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>> {
        self.check_market(market_id)?;
        let mut rows: Vec<LineSnapshot> = self
            .rows(event_id, market_id)
            .into_iter()
            .filter(|s| s.timestamp >= since)
            .collect();
        // Stable: equal timestamps keep append order.
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(rows)
    }

    async fn latest_timestamp(&self, event_id: &str, market_id: u32) -> Result<Option<DateTime<Utc>>> {
        self.check_market(market_id)?;
        Ok(self.rows(event_id, market_id).iter().map(|s| s.timestamp).max())
    }

    async fn snapshots_at(
        &self,
        event_id: &str,
        market_id: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>> {
        self.check_market(market_id)?;
        Ok(self
            .rows(event_id, market_id)
            .into_iter()
            .filter(|s| s.timestamp == timestamp)
            .collect())
    }

    async fn append(&self, lines: &[LineSnapshot]) -> Result<()> {
        if self.fail_appends.load(Ordering::Relaxed) {
            return Err(AppError::Io(std::io::Error::other("append rejected")));
        }
        for line in lines {
            let mut rows = self
                .lines
                .entry((line.event_id.clone(), line.market_id))
                .or_default();
            let duplicate = rows.iter().any(|s| {
                s.bookie_id == line.bookie_id && s.selection == line.selection && s.timestamp == line.timestamp
            });
            if !duplicate {
                rows.push(line.clone());
            }
        }
        Ok(())
    }

    async fn upsert_event(&self, event: &Event) -> Result<()> {
        self.events.insert(event.event_id.clone(), event.clone());
        Ok(())
    }

    async fn events(&self) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by(|a, b| a.scheduled.cmp(&b.scheduled).then_with(|| a.event_id.cmp(&b.event_id)));
        Ok(events)
    }

    async fn line_history(
        &self,
        event_id: &str,
        market_id: u32,
        selection: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>> {
        self.check_market(market_id)?;
        let mut rows: Vec<LineSnapshot> = self
            .rows(event_id, market_id)
            .into_iter()
            .filter(|s| s.timestamp >= since)
            .filter(|s| selection.map_or(true, |sel| s.selection == sel))
            .collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(rows)
    }
}
