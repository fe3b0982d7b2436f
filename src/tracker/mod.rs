pub mod best_odds;
pub mod movement;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::{LOOKBACK_MINUTES, SIGNIFICANT_MOVE};
use crate::error::Result;
use crate::store::SnapshotStore;
use crate::types::{BestOddsEntry, LineSnapshot, Movement};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum absolute odds change, in American odds points.
    pub significant_move: i32,
    pub lookback: Duration,
    /// Treat a 0.0 line as missing when computing line deltas. Off by default:
    /// a pick'em spread is a real line.
    pub zero_line_is_absent: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            significant_move: SIGNIFICANT_MOVE,
            lookback: Duration::minutes(LOOKBACK_MINUTES),
            zero_line_is_absent: false,
        }
    }
}

/// Movement detection and best-odds lookup over a snapshot store.
/// Read-only: never writes to the store.
pub struct LineTracker<S> {
    store: Arc<S>,
    cfg: TrackerConfig,
}

impl<S: SnapshotStore> LineTracker<S> {
    pub fn new(store: Arc<S>, cfg: TrackerConfig) -> Self {
        Self { store, cfg }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.cfg
    }

    /// Significant moves for the event over the last `lookback`.
    pub async fn detect(&self, event_id: &str, lookback: Duration) -> Result<Vec<Movement>> {
        self.detect_at(event_id, lookback, Utc::now()).await
    }

    /// Significant moves between the two newest generations of every market
    /// seen for the event in `[now - lookback, ..]`.
    ///
    /// Failing to list markets is an error. A failure reading one market is
    /// logged and that market is skipped so the others still report.
    pub async fn detect_at(
        &self,
        event_id: &str,
        lookback: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Movement>> {
        let since = now - lookback;
        let market_ids = self.store.distinct_market_ids(event_id, since).await?;

        let mut movements = Vec::new();
        for market_id in market_ids {
            let snapshots = match self.store.snapshots(event_id, market_id, since).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(event_id, market_id, "snapshot read failed, skipping market: {e}");
                    continue;
                }
            };

            let Some(gens) = movement::partition(&snapshots) else {
                continue;
            };
            let moves = movement::significant_moves(&gens, &self.cfg);
            debug!(
                event_id,
                market_id,
                latest = gens.latest.len(),
                previous = gens.previous.len(),
                moves = moves.len(),
                "market compared"
            );
            movements.extend(moves);
        }

        Ok(movements)
    }

    /// Best price per selection in the market's newest generation.
    /// Empty when the market has never been observed.
    pub async fn best_odds(&self, event_id: &str, market_id: u32) -> Result<BTreeMap<String, BestOddsEntry>> {
        let generation = self.current_lines(event_id, market_id).await?;
        Ok(best_odds::select_best(&generation))
    }

    /// The market's newest generation as stored, one row per bookie line.
    /// Empty when the market has never been observed.
    pub async fn current_lines(&self, event_id: &str, market_id: u32) -> Result<Vec<LineSnapshot>> {
        let Some(latest) = self.store.latest_timestamp(event_id, market_id).await? else {
            return Ok(Vec::new());
        };
        self.store.snapshots_at(event_id, market_id, latest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemorySnapshotStore;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 5, 18, minute, 0).unwrap()
    }

    fn snap(market_id: u32, bookie_id: u32, selection: &str, odds: i32, at: DateTime<Utc>) -> LineSnapshot {
        LineSnapshot {
            event_id: "e1".to_string(),
            market_id,
            bookie_id,
            selection: selection.to_string(),
            player_name: None,
            line_value: None,
            odds,
            timestamp: at,
        }
    }

    async fn tracker_with(lines: Vec<LineSnapshot>) -> (Arc<MemorySnapshotStore>, LineTracker<MemorySnapshotStore>) {
        let store = Arc::new(MemorySnapshotStore::new());
        store.append(&lines).await.unwrap();
        let tracker = LineTracker::new(Arc::clone(&store), TrackerConfig::default());
        (store, tracker)
    }

    #[tokio::test]
    async fn detects_moves_across_markets_in_window() {
        let (_, tracker) = tracker_with(vec![
            snap(2, 10, "Over", -110, ts(0)),
            snap(2, 10, "Under", -110, ts(0)),
            snap(2, 10, "Over", -125, ts(5)),
            snap(2, 10, "Under", 105, ts(5)),
            snap(1, 12, "KC", -200, ts(0)),
            snap(1, 12, "KC", -180, ts(5)),
        ])
        .await;

        let moves = tracker.detect_at("e1", Duration::hours(1), ts(30)).await.unwrap();
        let summary: Vec<(u32, &str, i32)> =
            moves.iter().map(|m| (m.market_id, m.selection.as_str(), m.odds_delta)).collect();
        assert_eq!(summary, vec![(1, "KC", 20), (2, "Over", -15), (2, "Under", 215)]);
    }

    #[tokio::test]
    async fn snapshots_outside_window_are_ignored() {
        let (_, tracker) = tracker_with(vec![snap(2, 10, "Over", -110, ts(0)), snap(2, 10, "Over", -150, ts(50))]).await;

        // Window starts at minute 45: only the newer generation is visible.
        let moves = tracker.detect_at("e1", Duration::minutes(10), ts(55)).await.unwrap();
        assert!(moves.is_empty());

        let moves = tracker.detect_at("e1", Duration::minutes(60), ts(55)).await.unwrap();
        assert_eq!(moves.len(), 1);
    }

    #[tokio::test]
    async fn unknown_event_yields_nothing() {
        let (_, tracker) = tracker_with(vec![]).await;
        assert!(tracker.detect_at("missing", Duration::hours(1), ts(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_market_does_not_hide_others() {
        let (store, tracker) = tracker_with(vec![
            snap(1, 10, "KC", -110, ts(0)),
            snap(1, 10, "KC", -150, ts(5)),
            snap(2, 10, "Over", -110, ts(0)),
            snap(2, 10, "Over", -150, ts(5)),
        ])
        .await;
        store.fail_reads_for(1);

        let moves = tracker.detect_at("e1", Duration::hours(1), ts(10)).await.unwrap();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].market_id, 2);
    }

    #[tokio::test]
    async fn detect_is_idempotent() {
        let (_, tracker) = tracker_with(vec![
            snap(2, 10, "Over", -110, ts(0)),
            snap(2, 12, "Over", -110, ts(0)),
            snap(2, 10, "Over", -130, ts(5)),
            snap(2, 12, "Over", -90, ts(5)),
        ])
        .await;

        let first = tracker.detect_at("e1", Duration::hours(1), ts(10)).await.unwrap();
        let second = tracker.detect_at("e1", Duration::hours(1), ts(10)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn best_odds_uses_newest_generation_only() {
        let (_, tracker) = tracker_with(vec![
            snap(2, 10, "Over", 120, ts(0)),
            snap(2, 10, "Over", -110, ts(5)),
            snap(2, 12, "Over", -105, ts(5)),
        ])
        .await;

        let best = tracker.best_odds("e1", 2).await.unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best["Over"].bookie_id, 12);
        assert_eq!(best["Over"].odds, -105);
    }

    #[tokio::test]
    async fn best_odds_on_empty_market_is_empty() {
        let (_, tracker) = tracker_with(vec![snap(2, 10, "Over", -110, ts(0))]).await;
        assert!(tracker.best_odds("e1", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn current_lines_are_the_newest_generation() {
        let (_, tracker) = tracker_with(vec![
            snap(2, 10, "Over", -110, ts(0)),
            snap(2, 10, "Over", -120, ts(5)),
            snap(2, 12, "Under", -102, ts(5)),
        ])
        .await;

        let lines = tracker.current_lines("e1", 2).await.unwrap();
        assert_eq!(lines.iter().map(|s| s.odds).collect::<Vec<_>>(), vec![-120, -102]);
        assert!(lines.iter().all(|s| s.timestamp == ts(5)));
        assert!(tracker.current_lines("e1", 3).await.unwrap().is_empty());
    }
}
