use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{Catalog, Config, HTTP_TIMEOUT_SECS, OFFERS_PAGE_LIMIT};
use crate::error::{AppError, Result};
use crate::types::{Event, MarketKind, MarketSpec, OfferLine};

/// Source of events and per-market offers. The scheduler only talks to this trait.
#[async_trait]
pub trait OddsSource: Send + Sync {
    async fn fetch_events(&self) -> Result<Vec<Event>>;

    async fn fetch_market_odds(&self, market: &MarketSpec, event_ids: &[String]) -> Result<Vec<OfferLine>>;
}

// ---------------------------------------------------------------------------
// Provider payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: serde_json::Value,
    #[serde(default)]
    participants: Vec<ApiParticipant>,
    scheduled: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiParticipant {
    name: Option<String>,
    player: Option<ApiPlayer>,
}

#[derive(Debug, Deserialize)]
struct ApiPlayer {
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    offers: Vec<ApiOffer>,
}

#[derive(Debug, Deserialize)]
struct ApiOffer {
    event_id: serde_json::Value,
    #[serde(default)]
    participants: Vec<ApiParticipant>,
    #[serde(default)]
    selections: Vec<ApiSelection>,
}

#[derive(Debug, Deserialize)]
struct ApiSelection {
    #[serde(default)]
    label: String,
    #[serde(default)]
    books: Vec<ApiBook>,
}

#[derive(Debug, Deserialize)]
struct ApiBook {
    id: u32,
    #[serde(default)]
    lines: Vec<ApiLine>,
}

#[derive(Debug, Deserialize)]
struct ApiLine {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    replaced: bool,
    line: Option<f64>,
    cost: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OddsApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    sport: String,
    season: u32,
    week: u32,
    location: String,
    catalog: Catalog,
}

impl OddsApiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent("Mozilla/5.0")
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.odds_api_url.trim_end_matches('/').to_string(),
            api_key: cfg.odds_api_key.clone(),
            sport: cfg.sport.clone(),
            season: cfg.season,
            week: cfg.week,
            location: cfg.location.clone(),
            catalog: cfg.catalog.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut req = self
            .client
            .get(format!("{}/{path}", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(params);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!("GET /{path} returned {status}")));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl OddsSource for OddsApiClient {
    async fn fetch_events(&self) -> Result<Vec<Event>> {
        let resp: EventsResponse = self
            .get_json(
                "events",
                &[
                    ("sport", self.sport.clone()),
                    ("week", self.week.to_string()),
                    ("season", self.season.to_string()),
                ],
            )
            .await?;
        let events = parse_events(resp);
        debug!(count = events.len(), "fetched events");
        Ok(events)
    }

    async fn fetch_market_odds(&self, market: &MarketSpec, event_ids: &[String]) -> Result<Vec<OfferLine>> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }
        let resp: OffersResponse = self
            .get_json(
                "offers",
                &[
                    ("sport", self.sport.clone()),
                    ("market_id", market.market_id.to_string()),
                    ("event_id", event_ids.join(",")),
                    ("location", self.location.clone()),
                    ("limit", OFFERS_PAGE_LIMIT.to_string()),
                ],
            )
            .await?;
        page_is_full(market.market_id, event_ids, resp.offers.len());
        let lines = parse_offers(resp, market, &self.catalog);
        debug!(market_id = market.market_id, count = lines.len(), "processed offer lines");
        Ok(lines)
    }
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

fn id_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339 (`2025-01-05T18:00:00Z`) or a bare `2025-01-05 18:00:00` read as UTC.
pub fn parse_scheduled(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Participants are ordered away, home.
fn parse_events(resp: EventsResponse) -> Vec<Event> {
    resp.events
        .into_iter()
        .filter_map(|e| {
            let Some(event_id) = id_string(&e.id) else {
                warn!("event without usable id skipped");
                return None;
            };
            let name = |idx: usize| e.participants.get(idx).and_then(|p| p.name.clone());
            let (Some(away_team), Some(home_team)) = (name(0), name(1)) else {
                warn!(event_id = %event_id, "event without two named participants skipped");
                return None;
            };
            Some(Event {
                event_id,
                home_team,
                away_team,
                scheduled: e.scheduled.as_deref().and_then(parse_scheduled),
                status: e.status.unwrap_or_default().to_lowercase(),
            })
        })
        .collect()
}

fn player_name(offer: &ApiOffer) -> String {
    let Some(player) = offer.participants.first().and_then(|p| p.player.as_ref()) else {
        return "Unknown".to_string();
    };
    let full = format!(
        "{} {}",
        player.first_name.as_deref().unwrap_or(""),
        player.last_name.as_deref().unwrap_or("")
    );
    let full = full.trim();
    if full.is_empty() {
        "Unknown".to_string()
    } else {
        full.to_string()
    }
}

/// A page holding exactly OFFERS_PAGE_LIMIT offers may have been cut short;
/// the rest of the market is not fetched this cycle.
fn page_is_full(market_id: u32, event_ids: &[String], offers: usize) -> bool {
    let full = offers >= OFFERS_PAGE_LIMIT as usize;
    if full {
        warn!(
            market_id,
            event_ids = %event_ids.join(","),
            limit = OFFERS_PAGE_LIMIT,
            "offers page full, later offers may be missing"
        );
    }
    full
}

/// Flattens offers into one line per (event, bookie, selection).
///
/// Skips books missing from the catalog, inactive or replaced lines, and lines
/// without a price. Prop selections are prefixed with the player's name so two
/// players' "Over" never share a key. The first qualifying line wins when a
/// book lists several (alternate lines).
fn parse_offers(resp: OffersResponse, market: &MarketSpec, catalog: &Catalog) -> Vec<OfferLine> {
    let mut seen: HashSet<(String, u32, String)> = HashSet::new();
    let mut out = Vec::new();

    for offer in &resp.offers {
        let Some(event_id) = id_string(&offer.event_id) else {
            continue;
        };
        let player = match market.kind {
            MarketKind::Prop => Some(player_name(offer)),
            MarketKind::GameLine => None,
        };

        for selection in &offer.selections {
            let label = match &player {
                Some(p) => format!("{p} {}", selection.label),
                None => selection.label.clone(),
            };

            for book in &selection.books {
                if !catalog.is_known_bookie(book.id) {
                    continue;
                }
                let Some(line) = book.lines.iter().find(|l| l.active && !l.replaced && l.cost.is_some()) else {
                    continue;
                };
                let Some(cost) = line.cost else { continue };

                if !seen.insert((event_id.clone(), book.id, label.clone())) {
                    continue;
                }
                out.push(OfferLine {
                    event_id: event_id.clone(),
                    market_id: market.market_id,
                    bookie_id: book.id,
                    selection: label.clone(),
                    player_name: player.clone(),
                    line_value: line.line,
                    odds: cost.round() as i32,
                });
            }
        }
    }

    out
}
