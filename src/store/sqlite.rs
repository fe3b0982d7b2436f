use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::db::models::{from_millis, to_millis, EventRow, SnapshotRow};
use crate::error::Result;
use crate::store::SnapshotStore;
use crate::types::{Event, LineSnapshot};

const SNAPSHOT_COLUMNS: &str =
    "event_id, market_id, bookie_id, selection, player_name, line_value, odds, observed_at";

/// Opens (creating if needed) the SQLite database and runs migrations.
/// `:memory:` gets a single-connection pool so every query sees the same database.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let pool = if db_path == ":memory:" {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?
    } else {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?.create_if_missing(true);
        SqlitePool::connect_with(opts).await?
    };
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

#[derive(Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn into_snapshots(rows: Vec<SnapshotRow>) -> Result<Vec<LineSnapshot>> {
    rows.into_iter().map(LineSnapshot::try_from).collect()
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn distinct_market_ids(&self, event_id: &str, since: DateTime<Utc>) -> Result<BTreeSet<u32>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT market_id FROM line_snapshots
            WHERE event_id = ? AND observed_at >= ?
            "#,
        )
        .bind(event_id)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().filter_map(|id| u32::try_from(id).ok()).collect())
    }

    async fn snapshots(
        &self,
        event_id: &str,
        market_id: u32,
        since: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS} FROM line_snapshots
            WHERE event_id = ? AND market_id = ? AND observed_at >= ?
            ORDER BY observed_at DESC, id ASC
            "#
        ))
        .bind(event_id)
        .bind(i64::from(market_id))
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;

        into_snapshots(rows)
    }

    async fn latest_timestamp(&self, event_id: &str, market_id: u32) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(observed_at) FROM line_snapshots WHERE event_id = ? AND market_id = ?",
        )
        .bind(event_id)
        .bind(i64::from(market_id))
        .fetch_one(&self.pool)
        .await?;

        latest.map(from_millis).transpose()
    }

    async fn snapshots_at(
        &self,
        event_id: &str,
        market_id: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS} FROM line_snapshots
            WHERE event_id = ? AND market_id = ? AND observed_at = ?
            ORDER BY id ASC
            "#
        ))
        .bind(event_id)
        .bind(i64::from(market_id))
        .bind(to_millis(timestamp))
        .fetch_all(&self.pool)
        .await?;

        into_snapshots(rows)
    }

    async fn append(&self, lines: &[LineSnapshot]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for line in lines {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO line_snapshots (
                    event_id, market_id, bookie_id, selection, player_name,
                    line_value, odds, observed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&line.event_id)
            .bind(i64::from(line.market_id))
            .bind(i64::from(line.bookie_id))
            .bind(&line.selection)
            .bind(&line.player_name)
            .bind(line.line_value)
            .bind(i64::from(line.odds))
            .bind(to_millis(line.timestamp))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn upsert_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (event_id, home_team, away_team, scheduled_at, status, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(event_id) DO UPDATE SET
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                scheduled_at = excluded.scheduled_at,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.home_team)
        .bind(&event.away_team)
        .bind(event.scheduled.map(to_millis))
        .bind(&event.status)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn events(&self) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, home_team, away_team, scheduled_at, status
            FROM events
            ORDER BY scheduled_at ASC, event_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn line_history(
        &self,
        event_id: &str,
        market_id: u32,
        selection: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<LineSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS} FROM line_snapshots
            WHERE event_id = ? AND market_id = ? AND observed_at >= ?
              AND (? IS NULL OR selection = ?)
            ORDER BY observed_at ASC, id ASC
            "#
        ))
        .bind(event_id)
        .bind(i64::from(market_id))
        .bind(to_millis(since))
        .bind(selection)
        .bind(selection)
        .fetch_all(&self.pool)
        .await?;

        into_snapshots(rows)
    }
}
