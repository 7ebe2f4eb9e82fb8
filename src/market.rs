//! Alpha Vantage client for crypto prices and daily OHLCV series.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::BotError;

const ALPHA_VANTAGE_API_URL: &str = "https://www.alphavantage.co/query";
const SERIES_KEY: &str = "Time Series (Digital Currency Daily)";

/// Symbols the bot will quote or chart.
pub const SUPPORTED_SYMBOLS: [&str; 10] = [
    "BTC", "ETH", "BNB", "XRP", "ADA", "SOL", "DOGE", "DOT", "MATIC", "LTC",
];

pub fn is_supported_symbol(symbol: &str) -> bool {
    SUPPORTED_SYMBOLS.contains(&symbol)
}

/// Chart window over the daily series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::Day, Timeframe::Week, Timeframe::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Day => "1day",
            Timeframe::Week => "1week",
            Timeframe::Month => "1month",
        }
    }

    /// Number of trailing daily points kept.
    ///
    /// `1day` keeps 24 points even though the series has one point per day.
    /// Kept as-is: existing users rely on the 24-candle view.
    pub fn window(&self) -> usize {
        match self {
            Timeframe::Day => 24,
            Timeframe::Week => 7,
            Timeframe::Month => 30,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| BotError::InvalidArgument(format!("unknown timeframe '{s}'")))
    }
}

/// One daily OHLCV bucket. Fields that failed numeric coercion are `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest close in USD.
    async fn get_price(&self, symbol: &str) -> Result<f64, BotError>;

    /// Daily series, ascending, truncated to the timeframe window.
    async fn get_series(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>, BotError>;
}

pub struct AlphaVantageClient {
    api_key: String,
    client: reqwest::Client,
}

impl AlphaVantageClient {
    pub fn new(api_key: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { api_key, client })
    }

    async fn fetch_daily(&self, symbol: &str) -> Result<Value, BotError> {
        let response = self
            .client
            .get(ALPHA_VANTAGE_API_URL)
            .query(&[
                ("function", "DIGITAL_CURRENCY_DAILY"),
                ("symbol", symbol),
                ("market", "USD"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BotError::DataUnavailable(format!("HTTP error: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::DataUnavailable(format!("API error {status}: {body}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BotError::DataUnavailable(format!("Failed to parse response: {}", e.without_url())))
    }
}

#[async_trait]
impl MarketData for AlphaVantageClient {
    async fn get_price(&self, symbol: &str) -> Result<f64, BotError> {
        info!("💰 Fetching price for {symbol}");
        let body = self.fetch_daily(symbol).await?;
        parse_latest_close(&body).inspect_err(|e| error!("Price lookup for {symbol} failed: {e}"))
    }

    async fn get_series(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>, BotError> {
        info!("📈 Fetching {timeframe} series for {symbol}");
        let body = self.fetch_daily(symbol).await?;
        let series = parse_series(&body)
            .inspect_err(|e| error!("Series lookup for {symbol} failed: {e}"))?;
        Ok(truncate_to_window(series, timeframe))
    }
}

/// Pull the daily time-series object out of a response, surfacing provider
/// errors and rate-limit notices.
fn time_series(body: &Value) -> Result<&Map<String, Value>, BotError> {
    if let Some(msg) = body.get("Error Message") {
        return Err(BotError::DataUnavailable(format!("API error: {}", text_of(msg))));
    }
    for notice in ["Note", "Information"] {
        if let Some(msg) = body.get(notice) {
            warn!("Alpha Vantage limit reached: {}", text_of(msg));
            return Err(BotError::DataUnavailable(format!("rate limited: {}", text_of(msg))));
        }
    }

    body.get(SERIES_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| BotError::DataUnavailable("unexpected API response format".into()))
}

fn text_of(value: &Value) -> String {
    value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
}

fn parse_date(key: &str) -> Result<NaiveDate, BotError> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .map_err(|e| BotError::DataUnavailable(format!("bad date '{key}': {e}")))
}

/// Coerce a field to a number. Unparseable values become `NaN`.
fn coerce(entry: &Value, field: &str) -> Result<f64, BotError> {
    let value = entry
        .get(field)
        .ok_or_else(|| BotError::DataUnavailable(format!("missing field '{field}'")))?;
    Ok(match value {
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        _ => f64::NAN,
    })
}

/// Close of the most recent date in the response.
pub fn parse_latest_close(body: &Value) -> Result<f64, BotError> {
    let series = time_series(body)?;

    let mut latest: Option<(NaiveDate, &Value)> = None;
    for (key, entry) in series {
        let date = parse_date(key)?;
        if latest.is_none_or(|(d, _)| date > d) {
            latest = Some((date, entry));
        }
    }

    let (date, entry) = latest.ok_or_else(|| BotError::DataUnavailable("empty time series".into()))?;
    let close = coerce(entry, "4. close")?;
    if !close.is_finite() || close <= 0.0 {
        return Err(BotError::DataUnavailable(format!("invalid close on {date}: {close}")));
    }
    Ok(close)
}

/// Every dated entry of the response, ascending by date.
pub fn parse_series(body: &Value) -> Result<Vec<Candle>, BotError> {
    let series = time_series(body)?;

    let mut candles = series
        .iter()
        .map(|(key, entry)| {
            Ok(Candle {
                date: parse_date(key)?,
                open: coerce(entry, "1. open")?,
                high: coerce(entry, "2. high")?,
                low: coerce(entry, "3. low")?,
                close: coerce(entry, "4. close")?,
                volume: coerce(entry, "5. volume")?,
            })
        })
        .collect::<Result<Vec<_>, BotError>>()?;

    if candles.is_empty() {
        return Err(BotError::DataUnavailable("empty time series".into()));
    }

    candles.sort_by_key(|c| c.date);
    Ok(candles)
}

/// Keep the trailing window for the timeframe.
pub fn truncate_to_window(mut series: Vec<Candle>, timeframe: Timeframe) -> Vec<Candle> {
    let keep = timeframe.window();
    if series.len() > keep {
        series.drain(..series.len() - keep);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(close: &str) -> Value {
        json!({
            "1. open": "100.0",
            "2. high": "110.5",
            "3. low": "95.25",
            "4. close": close,
            "5. volume": "1234.5"
        })
    }

    fn daily(days: u32) -> Value {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut series = Map::new();
        for i in 0..days {
            let date = start + chrono::Duration::days(i as i64);
            series.insert(date.format("%Y-%m-%d").to_string(), entry(&format!("{}", 100 + i)));
        }
        json!({ "Meta Data": {}, SERIES_KEY: series })
    }

    #[test]
    fn test_timeframe_parse_and_window() {
        assert_eq!("1day".parse::<Timeframe>().unwrap(), Timeframe::Day);
        assert_eq!("1week".parse::<Timeframe>().unwrap().window(), 7);
        assert_eq!("1month".parse::<Timeframe>().unwrap().window(), 30);
        assert_eq!(Timeframe::Day.window(), 24);
        assert!("1year".parse::<Timeframe>().is_err());
        assert!("1DAY".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_supported_symbols() {
        assert!(is_supported_symbol("BTC"));
        assert!(is_supported_symbol("MATIC"));
        assert!(!is_supported_symbol("btc"));
        assert!(!is_supported_symbol("SHIB"));
    }

    #[test]
    fn test_latest_close_uses_most_recent_date() {
        let body = daily(5);
        assert_eq!(parse_latest_close(&body).unwrap(), 104.0);
    }

    #[test]
    fn test_error_message_is_unavailable() {
        let body = json!({ "Error Message": "Invalid API call." });
        let err = parse_latest_close(&body).unwrap_err();
        assert!(matches!(err, BotError::DataUnavailable(ref m) if m.contains("Invalid API call")));
    }

    #[test]
    fn test_rate_limit_notices_are_unavailable() {
        for key in ["Note", "Information"] {
            let body = json!({ key: "Thank you for using Alpha Vantage! Our standard API rate limit is 25 requests per day." });
            assert!(matches!(parse_latest_close(&body), Err(BotError::DataUnavailable(_))));
            assert!(matches!(parse_series(&body), Err(BotError::DataUnavailable(_))));
        }
    }

    #[test]
    fn test_missing_series_is_unavailable() {
        let body = json!({ "Meta Data": {} });
        assert!(matches!(parse_latest_close(&body), Err(BotError::DataUnavailable(_))));
    }

    #[test]
    fn test_missing_close_field_is_unavailable() {
        let body = json!({ SERIES_KEY: { "2024-01-01": { "1. open": "1" } } });
        assert!(matches!(parse_latest_close(&body), Err(BotError::DataUnavailable(_))));
    }

    #[test]
    fn test_non_positive_or_garbage_price_is_unavailable() {
        for close in ["0", "-3.5", "n/a"] {
            let body = json!({ SERIES_KEY: { "2024-01-01": entry(close) } });
            assert!(
                matches!(parse_latest_close(&body), Err(BotError::DataUnavailable(_))),
                "close {close}"
            );
        }
    }

    #[test]
    fn test_series_sorted_ascending() {
        let body = json!({ SERIES_KEY: {
            "2024-03-02": entry("3"),
            "2023-12-31": entry("1"),
            "2024-01-15": entry("2"),
        }});
        let series = parse_series(&body).unwrap();
        let closes: Vec<f64> = series.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
        assert!(series.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_series_coerces_garbage_to_nan() {
        let body = json!({ SERIES_KEY: { "2024-01-01": entry("oops") } });
        let series = parse_series(&body).unwrap();
        assert!(series[0].close.is_nan());
        assert_eq!(series[0].high, 110.5);
    }

    #[test]
    fn test_empty_series_is_unavailable() {
        let body = json!({ SERIES_KEY: {} });
        assert!(matches!(parse_series(&body), Err(BotError::DataUnavailable(_))));
    }

    #[test]
    fn test_bad_date_is_unavailable() {
        let body = json!({ SERIES_KEY: { "yesterday": entry("1") } });
        assert!(matches!(parse_series(&body), Err(BotError::DataUnavailable(_))));
    }

    #[test]
    fn test_truncate_keeps_tail() {
        let series = parse_series(&daily(40)).unwrap();
        let day = truncate_to_window(series.clone(), Timeframe::Day);
        assert_eq!(day.len(), 24);
        assert_eq!(day.last(), series.last());
        assert_eq!(day[0].close, 116.0);

        assert_eq!(truncate_to_window(series.clone(), Timeframe::Week).len(), 7);
        assert_eq!(truncate_to_window(series, Timeframe::Month).len(), 30);
    }

    #[test]
    fn test_truncate_short_series_untouched() {
        let series = parse_series(&daily(5)).unwrap();
        assert_eq!(truncate_to_window(series, Timeframe::Month).len(), 5);
    }
}
