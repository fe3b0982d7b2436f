//! Database row types matching migrations/0001_init.sql.
//! Timestamps are integer milliseconds since the Unix epoch.
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::types::{Event, LineSnapshot, Movement};

#[derive(Debug, sqlx::FromRow)]
pub struct SnapshotRow {
    pub event_id: String,
    pub market_id: i64,
    pub bookie_id: i64,
    pub selection: String,
    pub player_name: Option<String>,
    pub line_value: Option<f64>,
    pub odds: i64,
    pub observed_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
    pub event_id: String,
    pub home_team: String,
    pub away_team: String,
    pub scheduled_at: Option<i64>,
    pub status: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MovementRow {
    pub event_id: String,
    pub market_id: i64,
    pub bookie_id: i64,
    pub selection: String,
    pub player_name: Option<String>,
    pub previous_odds: i64,
    pub current_odds: i64,
    pub odds_delta: i64,
    pub previous_line: Option<f64>,
    pub current_line: Option<f64>,
    pub line_delta: f64,
    pub observed_at: i64,
}

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| decode_error(format!("timestamp out of range: {ms}")))
}

fn narrow_id(column: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| decode_error(format!("{column} out of range: {value}")))
}

fn narrow_odds(value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| decode_error(format!("odds out of range: {value}")))
}

fn decode_error(msg: String) -> AppError {
    AppError::Database(sqlx::Error::Decode(msg.into()))
}

impl TryFrom<SnapshotRow> for LineSnapshot {
    type Error = AppError;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        Ok(LineSnapshot {
            event_id: row.event_id,
            market_id: narrow_id("market_id", row.market_id)?,
            bookie_id: narrow_id("bookie_id", row.bookie_id)?,
            selection: row.selection,
            player_name: row.player_name,
            line_value: row.line_value,
            odds: narrow_odds(row.odds)?,
            timestamp: from_millis(row.observed_at)?,
        })
    }
}

impl TryFrom<EventRow> for Event {
    type Error = AppError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Event {
            event_id: row.event_id,
            home_team: row.home_team,
            away_team: row.away_team,
            scheduled: row.scheduled_at.map(from_millis).transpose()?,
            status: row.status,
        })
    }
}

impl TryFrom<MovementRow> for Movement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self> {
        Ok(Movement {
            event_id: row.event_id,
            market_id: narrow_id("market_id", row.market_id)?,
            bookie_id: narrow_id("bookie_id", row.bookie_id)?,
            selection: row.selection,
            player_name: row.player_name,
            previous_odds: narrow_odds(row.previous_odds)?,
            current_odds: narrow_odds(row.current_odds)?,
            odds_delta: narrow_odds(row.odds_delta)?,
            previous_line: row.previous_line,
            current_line: row.current_line,
            line_delta: row.line_delta,
            timestamp: from_millis(row.observed_at)?,
        })
    }
}
