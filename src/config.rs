use std::collections::BTreeMap;

use crate::error::{AppError, Result};
use crate::types::{MarketKind, MarketSpec};

pub const ODDS_API_URL: &str = "https://api.bettingpros.com/v3";

/// Default threshold, in American odds points, for a move to be flagged.
pub const SIGNIFICANT_MOVE: i32 = 15;

/// Default detector lookback (minutes).
pub const LOOKBACK_MINUTES: i64 = 60;

/// Longest accepted detector lookback (minutes): one week.
pub const MAX_LOOKBACK_MINUTES: i64 = 7 * 24 * 60;

/// Longest accepted line history window (hours): one season.
pub const MAX_HISTORY_HOURS: i64 = 24 * 200;

/// Ingestion cycle interval (seconds).
pub const UPDATE_INTERVAL_SECS: u64 = 300;

/// Channel capacity for flagged movements on their way to the writer.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Max concurrent offer requests per event during a cycle.
pub const FETCH_CONCURRENCY: usize = 4;

/// Upper bound of offers requested per market call.
pub const OFFERS_PAGE_LIMIT: u32 = 100;

/// HTTP timeout for odds provider requests (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Markets polled when TRACKED_MARKETS is not set.
pub const DEFAULT_TRACKED_MARKETS: &[u32] = &[1, 2, 3, 102, 103];

const DEFAULT_BOOKIES: &[(u32, &str)] = &[
    (0, "BettingPros"),
    (10, "Fanduel"),
    (12, "DraftKings"),
    (13, "Caesars"),
    (19, "BetMGM"),
    (24, "Bet365"),
    (33, "ESPNBet"),
];

const DEFAULT_MARKETS: &[(u32, MarketKind, &str)] = &[
    (1, MarketKind::GameLine, "Moneyline"),
    (2, MarketKind::GameLine, "Total"),
    (3, MarketKind::GameLine, "Spread"),
    (100, MarketKind::Prop, "Completions"),
    (101, MarketKind::Prop, "Interceptions"),
    (102, MarketKind::Prop, "Passing Touchdowns"),
    (103, MarketKind::Prop, "Passing Yards"),
    (104, MarketKind::Prop, "Receptions"),
    (105, MarketKind::Prop, "Receiving Yards"),
    (106, MarketKind::Prop, "Rush Attempts"),
    (107, MarketKind::Prop, "Rush Yards"),
    (253, MarketKind::Prop, "Fantasy Points"),
    (333, MarketKind::Prop, "Pass Attempts"),
];

/// Bookie and market lookup tables. Built once at startup and handed to
/// every component that needs names or market kinds.
#[derive(Debug, Clone)]
pub struct Catalog {
    bookies: BTreeMap<u32, String>,
    markets: BTreeMap<u32, MarketSpec>,
    tracked_markets: Vec<u32>,
}

impl Catalog {
    pub fn new(bookies: BTreeMap<u32, String>, markets: Vec<MarketSpec>, tracked_markets: Vec<u32>) -> Self {
        Self {
            bookies,
            markets: markets.into_iter().map(|m| (m.market_id, m)).collect(),
            tracked_markets,
        }
    }

    pub fn bookie_name(&self, bookie_id: u32) -> Option<&str> {
        self.bookies.get(&bookie_id).map(String::as_str)
    }

    /// Display name for a bookie, falling back to the numeric id.
    pub fn bookie_label(&self, bookie_id: u32) -> String {
        self.bookie_name(bookie_id)
            .map(str::to_string)
            .unwrap_or_else(|| bookie_id.to_string())
    }

    pub fn is_known_bookie(&self, bookie_id: u32) -> bool {
        self.bookies.contains_key(&bookie_id)
    }

    pub fn bookie_count(&self) -> usize {
        self.bookies.len()
    }

    pub fn market(&self, market_id: u32) -> Option<&MarketSpec> {
        self.markets.get(&market_id)
    }

    /// Markets polled every cycle, in configured order. Unknown ids are dropped.
    pub fn tracked_markets(&self) -> Vec<MarketSpec> {
        self.tracked_markets
            .iter()
            .filter_map(|id| self.markets.get(id).cloned())
            .collect()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(
            DEFAULT_BOOKIES.iter().map(|&(id, name)| (id, name.to_string())).collect(),
            DEFAULT_MARKETS
                .iter()
                .map(|&(market_id, kind, name)| MarketSpec { market_id, kind, name: name.to_string() })
                .collect(),
            DEFAULT_TRACKED_MARKETS.to_vec(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub odds_api_url: String,
    /// Sent as `x-api-key` (ODDS_API_KEY). Requests go out unauthenticated when unset.
    pub odds_api_key: Option<String>,
    pub sport: String,
    pub season: u32,
    pub week: u32,
    /// Sportsbook region passed to the offers endpoint (LOCATION)
    pub location: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub update_interval_secs: u64,
    pub significant_move: i32,
    pub lookback_minutes: i64,
    pub catalog: Catalog,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let catalog = build_catalog(
            std::env::var("TRACKED_BOOKIES").ok().as_deref(),
            std::env::var("TRACKED_MARKETS").ok().as_deref(),
        )?;

        Ok(Self {
            odds_api_url: std::env::var("ODDS_API_URL").unwrap_or_else(|_| ODDS_API_URL.to_string()),
            odds_api_key: std::env::var("ODDS_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            sport: std::env::var("SPORT").unwrap_or_else(|_| "NFL".to_string()),
            season: parse_env("SEASON", 2024)?,
            week: parse_env("WEEK", 18)?,
            location: std::env::var("LOCATION").unwrap_or_else(|_| "OH".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "line_tracker.db".to_string()),
            api_port: parse_env("API_PORT", 3000)?,
            update_interval_secs: parse_env("UPDATE_INTERVAL_SECS", UPDATE_INTERVAL_SECS)?,
            significant_move: parse_env("SIGNIFICANT_MOVE", SIGNIFICANT_MOVE)?,
            lookback_minutes: check_lookback(parse_env("LOOKBACK_MINUTES", LOOKBACK_MINUTES)?)?,
            catalog,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn check_lookback(minutes: i64) -> Result<i64> {
    if (1..=MAX_LOOKBACK_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(AppError::Config(format!(
            "LOOKBACK_MINUTES must be between 1 and {MAX_LOOKBACK_MINUTES}, got {minutes}"
        )))
    }
}

fn parse_id_list(key: &str, raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| AppError::Config(format!("{key} contains a non-numeric id: {s:?}")))
        })
        .collect()
}

/// Narrows the default catalog to the bookies and markets named in the
/// TRACKED_BOOKIES / TRACKED_MARKETS lists.
pub fn build_catalog(bookies: Option<&str>, markets: Option<&str>) -> Result<Catalog> {
    let defaults = Catalog::default();

    let bookie_map: BTreeMap<u32, String> = match bookies {
        Some(raw) => {
            let ids = parse_id_list("TRACKED_BOOKIES", raw)?;
            let mut map = BTreeMap::new();
            for id in ids {
                let name = defaults
                    .bookie_name(id)
                    .ok_or_else(|| AppError::Config(format!("TRACKED_BOOKIES: unknown bookie id {id}")))?;
                map.insert(id, name.to_string());
            }
            map
        }
        None => defaults.bookies.clone(),
    };

    let tracked = match markets {
        Some(raw) => {
            let ids = parse_id_list("TRACKED_MARKETS", raw)?;
            if let Some(unknown) = ids.iter().find(|id| defaults.market(**id).is_none()) {
                return Err(AppError::Config(format!("TRACKED_MARKETS: unknown market id {unknown}")));
            }
            ids
        }
        None => DEFAULT_TRACKED_MARKETS.to_vec(),
    };

    Ok(Catalog::new(
        bookie_map,
        defaults.markets.into_values().collect(),
        tracked,
    ))
}
