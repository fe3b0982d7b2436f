use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::api::health::HealthState;
use crate::config::Catalog;
use crate::db::models::{to_millis, MovementRow};
use crate::error::Result;
use crate::types::{format_odds, Movement};

/// Receives flagged movements from the scheduler, logs them and persists them
/// to SQLite. Runs as a dedicated background task so a slow write never
/// delays the next ingestion cycle.
pub struct MovementWriter {
    pool: sqlx::SqlitePool,
    movement_rx: mpsc::Receiver<Movement>,
    catalog: Catalog,
    health: Arc<HealthState>,
}

impl MovementWriter {
    pub fn new(
        pool: sqlx::SqlitePool,
        movement_rx: mpsc::Receiver<Movement>,
        catalog: Catalog,
        health: Arc<HealthState>,
    ) -> Self {
        Self { pool, movement_rx, catalog, health }
    }

    pub async fn run(mut self) {
        while let Some(movement) = self.movement_rx.recv().await {
            self.health.dec_write_queue_pending();
            log_movement(&movement, &self.catalog);
            if let Err(e) = write_movement(&self.pool, &movement).await {
                error!("DB write error: {e}");
            }
        }
    }
}

/// Inserts one movement. A movement already stored for the same key and
/// generation is ignored, so re-detecting an unchanged store adds nothing.
pub async fn write_movement(pool: &sqlx::SqlitePool, m: &Movement) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO movements (
            event_id, market_id, bookie_id, selection, player_name,
            previous_odds, current_odds, odds_delta,
            previous_line, current_line, line_delta,
            observed_at, detected_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&m.event_id)
    .bind(i64::from(m.market_id))
    .bind(i64::from(m.bookie_id))
    .bind(&m.selection)
    .bind(&m.player_name)
    .bind(i64::from(m.previous_odds))
    .bind(i64::from(m.current_odds))
    .bind(i64::from(m.odds_delta))
    .bind(m.previous_line)
    .bind(m.current_line)
    .bind(m.line_delta)
    .bind(to_millis(m.timestamp))
    .bind(to_millis(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recently detected movements first, optionally for one event.
pub async fn recent_movements(
    pool: &sqlx::SqlitePool,
    event_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Movement>> {
    let rows: Vec<MovementRow> = sqlx::query_as(
        r#"
        SELECT event_id, market_id, bookie_id, selection, player_name,
               previous_odds, current_odds, odds_delta,
               previous_line, current_line, line_delta, observed_at
        FROM movements
        WHERE (? IS NULL OR event_id = ?)
        ORDER BY detected_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(event_id)
    .bind(event_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Movement::try_from).collect()
}

fn log_movement(m: &Movement, catalog: &Catalog) {
    let market = catalog
        .market(m.market_id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| m.market_id.to_string());
    let bookie = catalog.bookie_label(m.bookie_id);

    info!(
        event = "LINE_MOVE",
        event_id = %m.event_id,
        market_id = m.market_id,
        bookie_id = m.bookie_id,
        odds_delta = m.odds_delta,
        line_delta = m.line_delta,
        "LINE MOVE | {market} | {bookie} | {} | {} -> {} ({:+})",
        m.selection,
        format_odds(m.previous_odds),
        format_odds(m.current_odds),
        m.odds_delta,
    );
}
