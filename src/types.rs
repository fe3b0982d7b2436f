use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Catalog entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
    /// Moneyline, spread, total.
    GameLine,
    /// Player props. Offers carry a participant whose name is folded into the selection.
    Prop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSpec {
    pub market_id: u32,
    pub kind: MarketKind,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub home_team: String,
    pub away_team: String,
    pub scheduled: Option<DateTime<Utc>>,
    pub status: String,
}

impl Event {
    pub fn matchup(&self) -> String {
        format!("{} @ {}", self.away_team, self.home_team)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// One bookie's price for one selection, as parsed from an offer. Has no
/// timestamp yet; the ingestion cycle stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferLine {
    pub event_id: String,
    pub market_id: u32,
    pub bookie_id: u32,
    pub selection: String,
    pub player_name: Option<String>,
    pub line_value: Option<f64>,
    pub odds: i32,
}

impl OfferLine {
    pub fn at(self, timestamp: DateTime<Utc>) -> LineSnapshot {
        LineSnapshot {
            event_id: self.event_id,
            market_id: self.market_id,
            bookie_id: self.bookie_id,
            selection: self.selection,
            player_name: self.player_name,
            line_value: self.line_value,
            odds: self.odds,
            timestamp,
        }
    }
}

/// Immutable record of a line observed during one ingestion cycle.
/// Identity: (event_id, market_id, bookie_id, selection, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub event_id: String,
    pub market_id: u32,
    pub bookie_id: u32,
    pub selection: String,
    pub player_name: Option<String>,
    pub line_value: Option<f64>,
    /// American odds.
    pub odds: i32,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Detector output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub event_id: String,
    pub market_id: u32,
    pub bookie_id: u32,
    pub selection: String,
    pub player_name: Option<String>,
    pub previous_odds: i32,
    pub current_odds: i32,
    pub odds_delta: i32,
    pub previous_line: Option<f64>,
    pub current_line: Option<f64>,
    /// 0.0 unless both lines are present.
    pub line_delta: f64,
    /// Timestamp of the latest generation.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestOddsEntry {
    pub bookie_id: u32,
    pub odds: i32,
    pub line_value: Option<f64>,
}

/// American odds with an explicit sign on positive prices: `+105`, `-110`, `0`.
pub fn format_odds(odds: i32) -> String {
    if odds > 0 {
        format!("+{odds}")
    } else {
        odds.to_string()
    }
}
