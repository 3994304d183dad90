//! Client for the public quote collaborator.
//!
//! Ticker search and live chart metadata are fetched from the Yahoo Finance
//! HTTP API, optionally routed through a CORS-style relay that takes the
//! percent-encoded target URL as a query parameter.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header;
use serde::Deserialize;
use urlencoding::encode;

use crate::Config;
use crate::error::QuoteError;

/// One autocomplete candidate returned by ticker search.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub symbol: String,
    pub name: String,
}

/// Trading session reported alongside a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarketState {
    Pre,
    Regular,
    Post,
    Closed,
    #[default]
    Unknown,
}

impl MarketState {
    pub fn from_api(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PRE" | "PREPRE" => MarketState::Pre,
            "REGULAR" => MarketState::Regular,
            "POST" | "POSTPOST" => MarketState::Post,
            "CLOSED" => MarketState::Closed,
            _ => MarketState::Unknown,
        }
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketState::Pre => "PRE",
            MarketState::Regular => "REGULAR",
            MarketState::Post => "POST",
            MarketState::Closed => "CLOSED",
            MarketState::Unknown => "-",
        };
        write!(f, "{s}")
    }
}

/// Latest price data for one symbol.
///
/// `price` is the live price chosen from the raw fields: the previous close
/// when the market reports `CLOSED`, the regular market price otherwise, each
/// falling back to the other when missing.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveQuote {
    pub symbol: String,
    pub price: f64,
    pub regular_market_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub market_state: MarketState,
}

impl LiveQuote {
    /// Returns `None` when neither field yields a usable price.
    pub fn resolve(
        symbol: &str,
        regular_market_price: Option<f64>,
        previous_close: Option<f64>,
        market_state: MarketState,
    ) -> Option<LiveQuote> {
        let usable = |v: Option<f64>| v.filter(|p| p.is_finite() && *p > 0.0);
        let price = if market_state == MarketState::Closed {
            usable(previous_close).or(usable(regular_market_price))
        } else {
            usable(regular_market_price).or(usable(previous_close))
        }?;

        Some(LiveQuote {
            symbol: symbol.to_string(),
            price,
            regular_market_price,
            previous_close,
            market_state,
        })
    }

    /// Percent change of the regular market price against the previous close.
    pub fn change_percent(&self) -> f64 {
        match (self.regular_market_price, self.previous_close) {
            (Some(current), Some(prev)) if prev != 0.0 => (current - prev) / prev * 100.0,
            _ => 0.0,
        }
    }
}

/// The two operations the dashboard needs from the outside world.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Free-text ticker search.
    async fn search(&self, query: &str) -> Result<Vec<Suggestion>, QuoteError>;

    /// Latest chart metadata for a symbol.
    async fn quote(&self, symbol: &str) -> Result<LiveQuote, QuoteError>;
}

/// True when one of the candidates is exactly `symbol`, ignoring case and
/// surrounding whitespace.
pub fn matches_symbol(candidates: &[Suggestion], symbol: &str) -> bool {
    let wanted = symbol.trim().to_uppercase();
    candidates
        .iter()
        .any(|s| s.symbol.trim().to_uppercase() == wanted)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    quotes: Vec<SearchQuote>,
}

#[derive(Debug, Deserialize)]
struct SearchQuote {
    symbol: Option<String>,
    shortname: Option<String>,
    longname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: Option<ChartMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    previous_close: Option<f64>,
    chart_previous_close: Option<f64>,
    market_state: Option<String>,
}

pub(crate) fn parse_search(body: &[u8]) -> Result<Vec<Suggestion>, QuoteError> {
    let response: SearchResponse = serde_json::from_slice(body)?;
    let suggestions = response
        .quotes
        .into_iter()
        .filter_map(|q| {
            let symbol = q.symbol.filter(|s| !s.trim().is_empty())?;
            let name = q
                .shortname
                .or(q.longname)
                .unwrap_or_else(|| symbol.clone());
            Some(Suggestion { symbol, name })
        })
        .collect();
    Ok(suggestions)
}

pub(crate) fn parse_chart(symbol: &str, body: &[u8]) -> Result<LiveQuote, QuoteError> {
    let response: ChartResponse = serde_json::from_slice(body)?;
    let meta = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .and_then(|r| r.meta)
        .ok_or_else(|| QuoteError::NoData(symbol.to_string()))?;

    let market_state = meta
        .market_state
        .as_deref()
        .map(MarketState::from_api)
        .unwrap_or_default();

    LiveQuote::resolve(
        symbol,
        meta.regular_market_price,
        meta.previous_close.or(meta.chart_previous_close),
        market_state,
    )
    .ok_or_else(|| QuoteError::NoData(symbol.to_string()))
}

/// HTTP implementation of [`QuoteSource`].
#[derive(Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    relay_url: String,
    api_base: String,
}

impl RelayClient {
    pub fn new(cfg: &Config) -> Result<Self, QuoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            relay_url: cfg.relay_url.trim().to_string(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Wrap a target URL for the relay, or pass it through when no relay is set.
    pub fn route(&self, target: &str) -> String {
        if self.relay_url.is_empty() {
            target.to_string()
        } else {
            format!("{}{}", self.relay_url, encode(target))
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        self.route(&format!(
            "{}/v1/finance/search?q={}",
            self.api_base,
            encode(query.trim())
        ))
    }

    pub fn chart_url(&self, symbol: &str) -> String {
        self.route(&format!(
            "{}/v8/finance/chart/{}",
            self.api_base,
            encode(symbol.trim())
        ))
    }

    async fn get_body(&self, url: &str) -> Result<Vec<u8>, QuoteError> {
        debug!("GET {url}");
        let response = self
            .http
            .get(url)
            .header(
                header::USER_AGENT,
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuoteError::Status(status));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl QuoteSource for RelayClient {
    async fn search(&self, query: &str) -> Result<Vec<Suggestion>, QuoteError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let body = self.get_body(&self.search_url(query)).await?;
        parse_search(&body)
    }

    async fn quote(&self, symbol: &str) -> Result<LiveQuote, QuoteError> {
        let body = self.get_body(&self.chart_url(symbol)).await?;
        parse_chart(symbol, &body)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn client(relay: &str) -> RelayClient {
        let cfg = Config {
            relay_url: relay.to_string(),
            ..Config::default()
        };
        RelayClient::new(&cfg).unwrap()
    }

    #[test]
    fn test_parse_search_prefers_short_name() {
        let body = br#"{
            "quotes": [
                {"symbol": "AAPL", "shortname": "Apple Inc.", "longname": "Apple Inc. Common"},
                {"symbol": "AAPL.MX", "longname": "Apple Inc. (Mexico)"},
                {"shortname": "news item without a symbol"},
                {"symbol": "APLE"}
            ],
            "news": []
        }"#;
        let suggestions = parse_search(body).unwrap();
        assert_eq!(suggestions.len(), 3);
        assert_eq!(suggestions[0].name, "Apple Inc.");
        assert_eq!(suggestions[1].name, "Apple Inc. (Mexico)");
        assert_eq!(suggestions[2].name, "APLE");
    }

    #[test]
    fn test_parse_search_without_quotes_field() {
        let suggestions = parse_search(br#"{"count": 0}"#).unwrap();
        assert!(suggestions.is_empty());
    }

    #[test]
    fn test_parse_chart_open_market_uses_regular_price() {
        let body = br#"{"chart": {"result": [{"meta": {
            "symbol": "AAPL",
            "regularMarketPrice": 155.0,
            "previousClose": 150.0,
            "marketState": "REGULAR"
        }}], "error": null}}"#;
        let quote = parse_chart("AAPL", body).unwrap();
        assert_eq!(quote.price, 155.0);
        assert_eq!(quote.market_state, MarketState::Regular);
        assert!((quote.change_percent() - 3.3333).abs() < 1e-3);
    }

    #[test]
    fn test_parse_chart_closed_market_uses_previous_close() {
        let body = br#"{"chart": {"result": [{"meta": {
            "regularMarketPrice": 155.0,
            "chartPreviousClose": 149.5,
            "marketState": "CLOSED"
        }}]}}"#;
        let quote = parse_chart("AAPL", body).unwrap();
        assert_eq!(quote.price, 149.5);
        assert_eq!(quote.previous_close, Some(149.5));
    }

    #[test]
    fn test_parse_chart_missing_meta_is_no_data() {
        let body = br#"{"chart": {"result": null, "error": {"code": "Not Found"}}}"#;
        assert!(matches!(
            parse_chart("ZZZZ", body),
            Err(QuoteError::NoData(s)) if s == "ZZZZ"
        ));
    }

    #[test]
    fn test_parse_chart_garbage_is_decode_error() {
        assert!(matches!(
            parse_chart("AAPL", b"<html>rate limited</html>"),
            Err(QuoteError::Decode(_))
        ));
    }

    #[test]
    fn test_resolve_falls_back_between_fields() {
        let q = LiveQuote::resolve("X", None, Some(10.0), MarketState::Regular).unwrap();
        assert_eq!(q.price, 10.0);
        let q = LiveQuote::resolve("X", Some(12.0), None, MarketState::Closed).unwrap();
        assert_eq!(q.price, 12.0);
        assert!(LiveQuote::resolve("X", Some(0.0), None, MarketState::Regular).is_none());
        assert!(LiveQuote::resolve("X", None, None, MarketState::Closed).is_none());
    }

    #[test]
    fn test_matches_symbol_is_case_insensitive_and_trimmed() {
        let candidates = vec![Suggestion {
            symbol: "aapl ".to_string(),
            name: "Apple".to_string(),
        }];
        assert!(matches_symbol(&candidates, " AAPL"));
        assert!(!matches_symbol(&candidates, "AAP"));
    }

    #[test]
    fn test_urls_are_routed_through_relay() {
        let c = client("https://corsproxy.io/?url=");
        assert_eq!(
            c.chart_url("AAPL"),
            "https://corsproxy.io/?url=https%3A%2F%2Fquery1.finance.yahoo.com%2Fv8%2Ffinance%2Fchart%2FAAPL"
        );

        let direct = client("");
        assert_eq!(
            direct.search_url("BRK B"),
            "https://query1.finance.yahoo.com/v1/finance/search?q=BRK%20B"
        );
        assert_eq!(
            direct.chart_url("^GSPC"),
            "https://query1.finance.yahoo.com/v8/finance/chart/%5EGSPC"
        );
    }
}
