use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::FETCH_CONCURRENCY;
use crate::error::Result;
use crate::fetcher::OddsSource;
use crate::state::EventBoard;
use crate::store::SnapshotStore;
use crate::tracker::LineTracker;
use crate::types::{LineSnapshot, MarketSpec, Movement, OfferLine};

/// Counts for one completed ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub events: usize,
    pub snapshots: usize,
    pub movements: usize,
    pub market_errors: usize,
    /// Events whose batch could not be appended; detection is skipped for them.
    pub store_errors: usize,
}

/// Periodic ingestion: fetch events and tracked markets, append one
/// generation per event, then run movement detection and hand flagged moves
/// to the writer.
pub struct IngestScheduler<S> {
    source: Arc<dyn OddsSource>,
    store: Arc<S>,
    tracker: Arc<LineTracker<S>>,
    markets: Vec<MarketSpec>,
    board: Arc<EventBoard>,
    movement_tx: mpsc::Sender<Movement>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    interval: Duration,
}

impl<S: SnapshotStore + 'static> IngestScheduler<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn OddsSource>,
        store: Arc<S>,
        tracker: Arc<LineTracker<S>>,
        markets: Vec<MarketSpec>,
        board: Arc<EventBoard>,
        movement_tx: mpsc::Sender<Movement>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
        interval: Duration,
    ) -> Self {
        Self { source, store, tracker, markets, board, movement_tx, health, latency, interval }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // First tick fires immediately, so the first cycle runs at startup.
        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(report) => info!(
                    events = report.events,
                    snapshots = report.snapshots,
                    movements = report.movements,
                    market_errors = report.market_errors,
                    store_errors = report.store_errors,
                    "Cycle complete: {} events, {} snapshots, {} movements flagged",
                    report.events,
                    report.snapshots,
                    report.movements,
                ),
                Err(e) => error!("Ingestion cycle failed: {e}"),
            }
        }
    }

    /// One fetch/store/detect pass. Only a failed event listing fails the
    /// cycle; market and per-event store errors are counted and logged.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let events = match self.timed(self.source.fetch_events()).await {
            Ok(events) => events,
            Err(e) => {
                self.health.record_failed_cycle();
                return Err(e);
            }
        };

        let mut report = CycleReport { events: events.len(), ..CycleReport::default() };
        let cycle_at = cycle_timestamp();

        let mut event_ids = Vec::with_capacity(events.len());
        for event in events.clone() {
            if let Err(e) = self.store.upsert_event(&event).await {
                warn!(event_id = %event.event_id, "event upsert failed: {e}");
            }
            event_ids.push(event.event_id);
        }
        let (added, removed) = self.board.replace_all(events, cycle_at.timestamp_millis());
        if added > 0 || removed > 0 {
            info!(added, removed, total = self.board.len(), "Event board updated");
        }

        if event_ids.is_empty() {
            self.finish(cycle_at, &report);
            return Ok(report);
        }

        let (lines, market_errors) = self.fetch_markets(event_ids).await;
        report.market_errors = market_errors;

        for (event_id, batch) in group_by_event(lines, cycle_at) {
            if let Err(e) = self.store.append(&batch).await {
                warn!(event_id = %event_id, "snapshot append failed, skipping detection: {e}");
                report.store_errors += 1;
                continue;
            }
            report.snapshots += batch.len();

            let movements = match self.tracker.detect(&event_id, self.tracker.config().lookback).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(event_id = %event_id, "movement detection failed: {e}");
                    continue;
                }
            };
            report.movements += movements.len();
            for movement in movements {
                match self.movement_tx.try_send(movement) {
                    Ok(()) => self.health.inc_write_queue_pending(),
                    Err(e) => warn!("Movement writer channel full: {e}"),
                }
            }
        }

        self.finish(cycle_at, &report);
        Ok(report)
    }

    /// Fetches every tracked market for each event with one request per
    /// (event, market) pair, at most FETCH_CONCURRENCY in flight. Returns the
    /// lines and the number of requests that failed.
    async fn fetch_markets(&self, event_ids: Vec<String>) -> (Vec<OfferLine>, usize) {
        let jobs: Vec<(String, MarketSpec)> = event_ids
            .into_iter()
            .flat_map(|event_id| self.markets.iter().map(move |m| (event_id.clone(), m.clone())))
            .collect();

        let source = Arc::clone(&self.source);
        let latency = Arc::clone(&self.latency);
        let results: Vec<(String, u32, Result<Vec<OfferLine>>)> = stream::iter(jobs)
            .map(move |(event_id, market)| {
                let source = Arc::clone(&source);
                let latency = Arc::clone(&latency);
                async move {
                    let started = Instant::now();
                    let res = source.fetch_market_odds(&market, std::slice::from_ref(&event_id)).await;
                    latency.record(started.elapsed());
                    (event_id, market.market_id, res)
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut lines = Vec::new();
        let mut failed = 0;
        for (event_id, market_id, res) in results {
            match res {
                Ok(mut batch) => lines.append(&mut batch),
                Err(e) => {
                    warn!(event_id = %event_id, market_id, "market fetch failed: {e}");
                    failed += 1;
                }
            }
        }
        (lines, failed)
    }

    async fn timed<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let started = Instant::now();
        let res = fut.await;
        self.latency.record(started.elapsed());
        res
    }

    fn finish(&self, cycle_at: DateTime<Utc>, report: &CycleReport) {
        self.health.record_cycle(
            cycle_at.timestamp_millis(),
            report.snapshots as u64,
            report.movements as u64,
            report.market_errors as u64,
        );
    }
}

/// Millisecond precision, matching what the store keeps.
fn cycle_timestamp() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Stamps every line with the cycle timestamp and groups them per event.
fn group_by_event(lines: Vec<OfferLine>, at: DateTime<Utc>) -> BTreeMap<String, Vec<LineSnapshot>> {
    let mut grouped: BTreeMap<String, Vec<LineSnapshot>> = BTreeMap::new();
    for line in lines {
        grouped.entry(line.event_id.clone()).or_default().push(line.at(at));
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Catalog;
    use crate::error::AppError;
    use crate::store::memory::MemorySnapshotStore;
    use crate::tracker::TrackerConfig;
    use crate::types::{Event, MarketKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves a fixed event list and whatever odds are queued per market.
    #[derive(Default)]
    struct StubSource {
        events: Vec<Event>,
        fail_events: bool,
        failing_markets: Vec<u32>,
        odds: Mutex<BTreeMap<u32, Vec<OfferLine>>>,
        /// (market_id, event_ids) of every offers request.
        requests: Mutex<Vec<(u32, Vec<String>)>>,
    }

    impl StubSource {
        fn set_odds(&self, market_id: u32, lines: Vec<OfferLine>) {
            self.odds.lock().unwrap().insert(market_id, lines);
        }
    }

    #[async_trait]
    impl OddsSource for StubSource {
        async fn fetch_events(&self) -> Result<Vec<Event>> {
            if self.fail_events {
                return Err(AppError::Upstream("events endpoint returned 503".into()));
            }
            Ok(self.events.clone())
        }

        async fn fetch_market_odds(&self, market: &MarketSpec, event_ids: &[String]) -> Result<Vec<OfferLine>> {
            self.requests.lock().unwrap().push((market.market_id, event_ids.to_vec()));
            if self.failing_markets.contains(&market.market_id) {
                return Err(AppError::Upstream(format!("market {} returned 500", market.market_id)));
            }
            Ok(self
                .odds
                .lock()
                .unwrap()
                .get(&market.market_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|l| event_ids.contains(&l.event_id))
                .collect())
        }
    }

    fn event(id: &str) -> Event {
        Event {
            event_id: id.to_string(),
            home_team: "Chiefs".to_string(),
            away_team: "Broncos".to_string(),
            scheduled: None,
            status: "scheduled".to_string(),
        }
    }

    fn offer(event_id: &str, market_id: u32, bookie_id: u32, selection: &str, odds: i32) -> OfferLine {
        OfferLine {
            event_id: event_id.to_string(),
            market_id,
            bookie_id,
            selection: selection.to_string(),
            player_name: None,
            line_value: Some(47.5),
            odds,
        }
    }

    struct Harness {
        scheduler: IngestScheduler<MemorySnapshotStore>,
        source: Arc<StubSource>,
        store: Arc<MemorySnapshotStore>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
        rx: mpsc::Receiver<Movement>,
    }

    fn harness(source: StubSource) -> Harness {
        let source = Arc::new(source);
        let store = Arc::new(MemorySnapshotStore::new());
        let tracker = Arc::new(LineTracker::new(Arc::clone(&store), TrackerConfig::default()));
        let markets: Vec<MarketSpec> = Catalog::default()
            .tracked_markets()
            .into_iter()
            .filter(|m| m.kind == MarketKind::GameLine)
            .collect();
        let health = Arc::new(HealthState::new());
        let latency = Arc::new(LatencyStats::new());
        let (tx, rx) = mpsc::channel(16);
        let scheduler = IngestScheduler::new(
            Arc::clone(&source) as Arc<dyn OddsSource>,
            Arc::clone(&store),
            tracker,
            markets,
            EventBoard::new(),
            tx,
            Arc::clone(&health),
            Arc::clone(&latency),
            Duration::from_secs(300),
        );
        Harness { scheduler, source, store, health, latency, rx }
    }

    #[tokio::test]
    async fn cycle_stamps_one_timestamp_and_flags_moves_on_second_pass() {
        let mut h = harness(StubSource { events: vec![event("e1")], ..StubSource::default() });
        h.source.set_odds(2, vec![offer("e1", 2, 10, "Over", -110), offer("e1", 2, 10, "Under", -110)]);

        let first = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(first.snapshots, 2);
        assert_eq!(first.movements, 0);

        let stamps: Vec<_> = h
            .store
            .snapshots(
                "e1",
                2,
                DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            )
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(stamps.len(), 2);
        assert_eq!(stamps[0], stamps[1]);

        // Cycles within the same millisecond would collide on identity.
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.source.set_odds(2, vec![offer("e1", 2, 10, "Over", -125), offer("e1", 2, 10, "Under", -110)]);
        let second = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(second.movements, 1);

        let moved = h.rx.recv().await.unwrap();
        assert_eq!(moved.selection, "Over");
        assert_eq!(moved.odds_delta, -15);
        assert_eq!(h.health.write_queue_pending(), 1);
        assert_eq!(h.health.cycles_completed(), 2);
        assert_eq!(h.store.len(), 4);
    }

    #[tokio::test]
    async fn failing_market_does_not_stop_other_markets() {
        let h = harness(StubSource {
            events: vec![event("e1")],
            failing_markets: vec![1],
            ..StubSource::default()
        });
        h.source.set_odds(2, vec![offer("e1", 2, 10, "Over", -110)]);
        h.source.set_odds(3, vec![offer("e1", 3, 10, "Chiefs", -110)]);

        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.market_errors, 1);
        assert_eq!(report.snapshots, 2);
        assert_eq!(h.health.market_fetch_errors(), 1);
        // One events call plus three market calls.
        assert_eq!(h.latency.len(), 4);
    }

    #[tokio::test]
    async fn offers_are_requested_per_event() {
        let h = harness(StubSource { events: vec![event("e1"), event("e2")], ..StubSource::default() });
        h.source.set_odds(2, vec![offer("e1", 2, 10, "Over", -110), offer("e2", 2, 10, "Over", -105)]);

        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.snapshots, 2);

        let requests = h.source.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 6);
        assert!(requests.iter().all(|(_, ids)| ids.len() == 1));
        let e2_markets: Vec<u32> = requests
            .iter()
            .filter(|(_, ids)| ids[0] == "e2")
            .map(|(m, _)| *m)
            .collect();
        assert_eq!(e2_markets.len(), 3);
    }

    #[tokio::test]
    async fn run_loop_can_be_spawned() {
        let h = harness(StubSource { events: vec![event("e1")], ..StubSource::default() });
        h.source.set_odds(2, vec![offer("e1", 2, 10, "Over", -110)]);
        let health = Arc::clone(&h.health);

        let handle = tokio::spawn(h.scheduler.run());
        let first_cycle = async {
            while health.cycles_completed() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), first_cycle).await.unwrap();
        handle.abort();

        assert_eq!(health.snapshots_written(), 1);
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn failed_event_listing_fails_cycle() {
        let h = harness(StubSource { fail_events: true, ..StubSource::default() });
        assert!(h.scheduler.run_cycle().await.is_err());
        assert_eq!(h.health.cycles_failed(), 1);
        assert_eq!(h.health.cycles_completed(), 0);
    }

    #[tokio::test]
    async fn append_failure_skips_detection_for_event() {
        let h = harness(StubSource { events: vec![event("e1")], ..StubSource::default() });
        h.source.set_odds(2, vec![offer("e1", 2, 10, "Over", -110)]);
        h.store.fail_appends(true);

        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.store_errors, 1);
        assert_eq!(report.snapshots, 0);
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn no_events_is_an_empty_successful_cycle() {
        let h = harness(StubSource::default());
        let report = h.scheduler.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert_eq!(h.health.cycles_completed(), 1);
    }

    #[test]
    fn grouping_stamps_every_line() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let grouped = group_by_event(
            vec![offer("e2", 1, 10, "Chiefs", -150), offer("e1", 1, 10, "Chiefs", -140), offer("e2", 1, 12, "Chiefs", -145)],
            at,
        );
        assert_eq!(grouped.keys().cloned().collect::<Vec<_>>(), vec!["e1", "e2"]);
        assert_eq!(grouped["e2"].len(), 2);
        assert!(grouped.values().flatten().all(|s| s.timestamp == at));
    }
}
