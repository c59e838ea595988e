pub mod connect;
pub mod fetcher;
pub mod resilience;
pub mod rest;
pub mod stream;

pub use stream::Event;

use serde::{Deserialize, Serialize};

use std::{fmt, str::FromStr};

/// Candle sampling interval understood by the bar server.
///
/// Display/parse strings are the server's wire names (`"1m"` .. `"7D"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    M1,
    M5,
    M15,
    M30,
    H1,
    H6,
    H12,
    D1,
    D7,
}

impl Interval {
    pub const ALL: [Interval; 9] = [
        Interval::M1,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H6,
        Interval::H12,
        Interval::D1,
        Interval::D7,
    ];

    pub fn to_minutes(self) -> u16 {
        match self {
            Interval::M1 => 1,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H6 => 360,
            Interval::H12 => 720,
            Interval::D1 => 1440,
            Interval::D7 => 10080,
        }
    }

    pub fn to_milliseconds(self) -> u64 {
        u64::from(self.to_minutes()) * 60_000
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Interval::M1 => "1m",
                Interval::M5 => "5m",
                Interval::M15 => "15m",
                Interval::M30 => "30m",
                Interval::H1 => "1h",
                Interval::H6 => "6h",
                Interval::H12 => "12h",
                Interval::D1 => "1D",
                Interval::D7 => "7D",
            }
        )
    }
}

impl FromStr for Interval {
    type Err = InvalidInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "30m" => Ok(Interval::M30),
            "1h" => Ok(Interval::H1),
            "6h" => Ok(Interval::H6),
            "12h" => Ok(Interval::H12),
            "1D" => Ok(Interval::D1),
            "7D" => Ok(Interval::D7),
            _ => Err(InvalidInterval(s.to_string())),
        }
    }
}

impl Serialize for Interval {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInterval(pub String);

impl fmt::Display for InvalidInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid interval string: {}", self.0)
    }
}

impl std::error::Error for InvalidInterval {}

/// One traded symbol as the server identifies it.
///
/// Field names match the wire parameters, so the struct deserializes
/// straight out of `/api/symbol-exchange` rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Market {
    pub exchange: String,
    pub base_id: String,
    pub quote_id: String,
}

impl Market {
    pub fn new(exchange: &str, base_id: &str, quote_id: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            base_id: base_id.to_string(),
            quote_id: quote_id.to_string(),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.exchange, self.base_id, self.quote_id)
    }
}

/// The (market, interval) pair the live stream serves.
///
/// At most one is active at a time; a period change replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub market: Market,
    pub interval: Interval,
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.market, self.interval)
    }
}

/// One OHLCV candle. `time` is unix seconds, unique within a series.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub time: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Bar-shaped stream payload. Any price field may still be null while the
/// server's aggregation window warms up.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LiveBar {
    pub time: u64,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl LiveBar {
    /// Returns a full bar only when all four price fields are present.
    pub fn complete(&self) -> Option<Bar> {
        Some(Bar {
            time: self.time,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
            volume: self.volume,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    #[error("{0}")]
    FetchError(#[from] reqwest::Error),
    #[error("Parsing: {0}")]
    ParseError(String),
    #[error("Stream: {0}")]
    WebsocketError(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
