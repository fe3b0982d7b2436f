use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::tracker::TrackerConfig;
use crate::types::{LineSnapshot, Movement};

/// (bookie_id, selection)
pub type LineKey<'a> = (u32, &'a str);

/// A market's recent snapshots split at the newest timestamp.
#[derive(Debug)]
pub struct Generations<'a> {
    pub latest_at: DateTime<Utc>,
    /// Every snapshot stamped exactly `latest_at`.
    pub latest: BTreeMap<LineKey<'a>, &'a LineSnapshot>,
    /// Most recent earlier snapshot of each key.
    pub previous: BTreeMap<LineKey<'a>, &'a LineSnapshot>,
}

/// Splits one market's snapshots into the latest generation and the most recent
/// prior observation per key. Input order does not matter; when a key appears
/// more than once at the same timestamp the first occurrence wins.
/// Returns None for an empty slice.
pub fn partition(snapshots: &[LineSnapshot]) -> Option<Generations<'_>> {
    let latest_at = snapshots.iter().map(|s| s.timestamp).max()?;

    let mut latest = BTreeMap::new();
    let mut previous: BTreeMap<LineKey<'_>, &LineSnapshot> = BTreeMap::new();

    for snap in snapshots {
        let key = (snap.bookie_id, snap.selection.as_str());
        if snap.timestamp == latest_at {
            match latest.entry(key) {
                Entry::Vacant(v) => {
                    v.insert(snap);
                }
                Entry::Occupied(_) => {
                    debug!(
                        event_id = %snap.event_id,
                        market_id = snap.market_id,
                        bookie_id = snap.bookie_id,
                        selection = %snap.selection,
                        "duplicate line in latest generation, keeping first"
                    );
                }
            }
            continue;
        }

        match previous.entry(key) {
            Entry::Vacant(v) => {
                v.insert(snap);
            }
            Entry::Occupied(mut o) => {
                if snap.timestamp > o.get().timestamp {
                    o.insert(snap);
                }
            }
        }
    }

    Some(Generations { latest_at, latest, previous })
}

/// Compares every key present in both partitions and keeps the moves whose
/// absolute odds change reaches the threshold. Output is in key order.
pub fn significant_moves(gens: &Generations<'_>, cfg: &TrackerConfig) -> Vec<Movement> {
    let threshold = cfg.significant_move.unsigned_abs();

    gens.latest
        .iter()
        .filter_map(|(key, &current)| {
            let &previous = gens.previous.get(key)?;
            let odds_delta = current.odds.saturating_sub(previous.odds);
            if odds_delta.unsigned_abs() < threshold {
                return None;
            }
            Some(Movement {
                event_id: current.event_id.clone(),
                market_id: current.market_id,
                bookie_id: current.bookie_id,
                selection: current.selection.clone(),
                player_name: current.player_name.clone(),
                previous_odds: previous.odds,
                current_odds: current.odds,
                odds_delta,
                previous_line: previous.line_value,
                current_line: current.line_value,
                line_delta: line_delta(previous.line_value, current.line_value, cfg.zero_line_is_absent),
                timestamp: gens.latest_at,
            })
        })
        .collect()
}

/// Difference between two lines when both are present, 0.0 otherwise.
/// With `zero_is_absent`, a 0.0 line counts as missing.
pub fn line_delta(previous: Option<f64>, current: Option<f64>, zero_is_absent: bool) -> f64 {
    let present = |v: Option<f64>| v.filter(|x| !(zero_is_absent && *x == 0.0));
    match (present(previous), present(current)) {
        (Some(prev), Some(cur)) => cur - prev,
        _ => 0.0,
    }
}
