use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::external::market_data::{MarketDataError, MarketDataProvider};
use crate::models::{Candle, SymbolTicker};

/// Bybit caps kline requests at 1000 rows
const MAX_KLINE_LIMIT: usize = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Public (unauthenticated) Bybit v5 market endpoints, spot category
pub struct BybitProvider {
    client: reqwest::Client,
    base_url: String,
}

impl BybitProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, MarketDataError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MarketDataError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MarketDataError> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| MarketDataError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(MarketDataError::BadResponse(format!(
                "{} returned HTTP {}",
                path,
                resp.status()
            )));
        }

        let body: BybitResponse<T> = resp
            .json()
            .await
            .map_err(|e| MarketDataError::Parse(e.to_string()))?;

        body.into_result()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitResponse<T> {
    ret_code: i64,
    ret_msg: String,
    result: Option<T>,
}

impl<T> BybitResponse<T> {
    fn into_result(self) -> Result<T, MarketDataError> {
        if self.ret_code != 0 {
            return Err(MarketDataError::BadResponse(format!(
                "retCode {}: {}",
                self.ret_code, self.ret_msg
            )));
        }
        self.result
            .ok_or_else(|| MarketDataError::BadResponse("missing result".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TickerList {
    list: Vec<BybitTicker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitTicker {
    symbol: String,
    last_price: String,
    /// Fraction, e.g. "0.0123" for +1.23%
    price24h_pcnt: String,
    turnover24h: String,
}

#[derive(Debug, Deserialize)]
struct KlineList {
    /// `[startTime, open, high, low, close, volume, turnover]`, all strings
    list: Vec<Vec<String>>,
}

fn parse_number(field: &str, value: &str) -> Result<f64, MarketDataError> {
    value
        .parse::<f64>()
        .map_err(|_| MarketDataError::Parse(format!("{} is not a number: '{}'", field, value)))
}

fn top_usdt_tickers(list: Vec<BybitTicker>, n: usize) -> Result<Vec<SymbolTicker>, MarketDataError> {
    let mut tickers = Vec::new();
    for t in list.into_iter().filter(|t| t.symbol.ends_with("USDT")) {
        tickers.push(SymbolTicker {
            last_price: parse_number("lastPrice", &t.last_price)?,
            change_24h_pct: parse_number("price24hPcnt", &t.price24h_pcnt)? * 100.0,
            turnover_24h: parse_number("turnover24h", &t.turnover24h)?,
            symbol: t.symbol,
        });
    }

    tickers.sort_by(|a, b| b.turnover_24h.total_cmp(&a.turnover_24h));
    tickers.truncate(n);
    Ok(tickers)
}

fn parse_klines(rows: Vec<Vec<String>>) -> Result<Vec<Candle>, MarketDataError> {
    let mut candles = rows
        .into_iter()
        .map(|row| {
            if row.len() < 7 {
                return Err(MarketDataError::Parse(format!(
                    "kline row has {} fields, expected 7",
                    row.len()
                )));
            }
            let millis: i64 = row[0]
                .parse()
                .map_err(|_| MarketDataError::Parse(format!("bad kline start time '{}'", row[0])))?;
            let start_time: DateTime<Utc> = DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| MarketDataError::Parse(format!("kline start time out of range: {}", millis)))?;

            Ok(Candle {
                start_time,
                open: parse_number("open", &row[1])?,
                high: parse_number("high", &row[2])?,
                low: parse_number("low", &row[3])?,
                close: parse_number("close", &row[4])?,
                volume: parse_number("volume", &row[5])?,
                turnover: parse_number("turnover", &row[6])?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    candles.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    Ok(candles)
}

#[async_trait]
impl MarketDataProvider for BybitProvider {
    async fn top_symbols_by_turnover(&self, n: usize) -> Result<Vec<SymbolTicker>, MarketDataError> {
        let tickers: TickerList = self
            .get("/v5/market/tickers", &[("category", "spot".to_string())])
            .await?;

        debug!("Bybit returned {} spot tickers", tickers.list.len());
        top_usdt_tickers(tickers.list, n)
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>, MarketDataError> {
        let limit = limit.clamp(1, MAX_KLINE_LIMIT);
        let klines: KlineList = self
            .get(
                "/v5/market/kline",
                &[
                    ("category", "spot".to_string()),
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        parse_klines(klines.list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tickers_are_filtered_and_ranked() {
        let body: BybitResponse<TickerList> = serde_json::from_value(json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": "spot",
                "list": [
                    { "symbol": "ETHUSDT", "lastPrice": "3000", "price24hPcnt": "0.02", "turnover24h": "500" },
                    { "symbol": "BTCUSDT", "lastPrice": "60000", "price24hPcnt": "-0.01", "turnover24h": "900" },
                    { "symbol": "ETHBTC", "lastPrice": "0.05", "price24hPcnt": "0", "turnover24h": "10000" },
                    { "symbol": "SOLUSDT", "lastPrice": "150", "price24hPcnt": "0.1", "turnover24h": "100" }
                ]
            }
        }))
        .unwrap();

        let top = top_usdt_tickers(body.into_result().unwrap().list, 2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].symbol, "BTCUSDT");
        assert_eq!(top[1].symbol, "ETHUSDT");
        assert!((top[0].change_24h_pct - -1.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_ret_code() {
        let body: BybitResponse<TickerList> = serde_json::from_value(json!({
            "retCode": 10001,
            "retMsg": "params error",
            "result": null
        }))
        .unwrap();

        assert!(matches!(body.into_result(), Err(MarketDataError::BadResponse(_))));
    }

    #[test]
    fn test_klines_sorted_newest_first() {
        let rows = vec![
            vec!["1700000000000", "1", "2", "0.5", "1.5", "10", "15"],
            vec!["1700000180000", "1.5", "2", "1", "1.2", "10", "12"],
        ]
        .into_iter()
        .map(|row| row.into_iter().map(String::from).collect())
        .collect();

        let candles = parse_klines(rows).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].start_time > candles[1].start_time);
        assert!(candles[0].is_red());
        assert!(candles[1].is_green());
    }

    #[test]
    fn test_short_kline_row_is_rejected() {
        let rows = vec![vec!["1700000000000".to_string(), "1".to_string()]];
        assert!(matches!(parse_klines(rows), Err(MarketDataError::Parse(_))));
    }
}
