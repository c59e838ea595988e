use serde::Deserialize;

use crate::{Bar, FeedError, Interval, Market, fetcher::FetchRange};

/// The range endpoint answers with either a bar array or an error object
/// shaped `{"detail": ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RangeResponse {
    Bars(Vec<Bar>),
    Detail { detail: serde_json::Value },
}

pub fn range_url(
    http_base: &str,
    market: &Market,
    interval: Interval,
    range: FetchRange,
) -> String {
    let (start, end) = range.bounds();

    let mut url = format!(
        "{http_base}/api/ohlcvs?exchange={}&base_id={}&quote_id={}",
        market.exchange, market.base_id, market.quote_id,
    );
    if let Some(start) = start {
        url.push_str(&format!("&start={start}"));
    }
    url.push_str(&format!(
        "&end={end}&interval={interval}&results_mls=false&empty_ts=true"
    ));

    url
}

pub fn parse_bars(payload: &str) -> Result<Vec<Bar>, FeedError> {
    let response: RangeResponse =
        serde_json::from_str(payload).map_err(|e| FeedError::ParseError(e.to_string()))?;

    match response {
        RangeResponse::Bars(bars) => Ok(bars),
        RangeResponse::Detail { detail } => Err(FeedError::InvalidRequest(detail.to_string())),
    }
}

/// Fetches one range of bars. Timestamps in the result are unix seconds
/// (`results_mls=false`), range bounds go out in milliseconds.
pub async fn fetch_bars(
    client: &reqwest::Client,
    http_base: &str,
    market: &Market,
    interval: Interval,
    range: FetchRange,
) -> Result<Vec<Bar>, FeedError> {
    let url = range_url(http_base, market, interval, range);

    let response = client.get(&url).send().await?;
    let text = response.text().await?;

    parse_bars(&text)
}

/// Lists the (exchange, base, quote) triples the server has data for.
pub async fn fetch_symbols(
    client: &reqwest::Client,
    http_base: &str,
) -> Result<Vec<Market>, FeedError> {
    let url = format!("{http_base}/api/symbol-exchange");

    let response = client.get(&url).send().await?;
    let text = response.text().await?;

    serde_json::from_str(&text).map_err(|e| FeedError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bar_array_with_missing_volume() {
        let payload = r#"[
            {"time": 1625612400, "open": 33500.0, "high": 33800.0, "low": 33400.0, "close": 33700.0, "volume": 104.2},
            {"time": 1625616000, "open": 33700.0, "high": 33900.0, "low": 33600.0, "close": 33850.0}
        ]"#;

        let bars = parse_bars(payload).expect("bar array");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, Some(104.2));
        assert_eq!(bars[1].volume, None);
    }

    #[test]
    fn parses_empty_array() {
        let bars = parse_bars("[]").expect("empty array");
        assert!(bars.is_empty());
    }

    #[test]
    fn detail_object_is_invalid_request() {
        let payload = r#"{"detail": "ohlc data not found"}"#;

        match parse_bars(payload) {
            Err(FeedError::InvalidRequest(detail)) => {
                assert!(detail.contains("ohlc data not found"));
            }
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn malformed_row_is_parse_error() {
        let payload = r#"[{"time": "not a number", "open": 1.0}]"#;

        assert!(matches!(parse_bars(payload), Err(FeedError::ParseError(_))));
    }

    #[test]
    fn fill_url_omits_start() {
        let market = Market::new("bitfinex", "btc", "usd");
        let url = range_url(
            "http://127.0.0.1:8000",
            &market,
            Interval::M1,
            FetchRange::Fill { end: 1_625_616_000_000 },
        );

        assert_eq!(
            url,
            "http://127.0.0.1:8000/api/ohlcvs?exchange=bitfinex&base_id=btc&quote_id=usd\
             &end=1625616000000&interval=1m&results_mls=false&empty_ts=true"
        );
    }

    #[test]
    fn backfill_url_carries_both_bounds() {
        let market = Market::new("bitfinex", "btc", "usd");
        let url = range_url(
            "http://127.0.0.1:8000",
            &market,
            Interval::H1,
            FetchRange::Backfill {
                start: 1_625_400_000_000,
                end: 1_625_612_400_000,
            },
        );

        assert!(url.contains("&start=1625400000000&end=1625612400000&interval=1h"));
    }
}
