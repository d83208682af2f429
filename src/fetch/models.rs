use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical quote regardless of which provider answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuote {
    pub symbol: String,
    pub price: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub volume: Option<f64>,
    pub previous_close: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub as_of: Option<DateTime<Utc>>,
}

impl NormalizedQuote {
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: None,
            change: None,
            change_percent: None,
            volume: None,
            previous_close: None,
            open: None,
            high: None,
            low: None,
            as_of: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfile {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<f64>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMovers {
    pub gainers: Vec<NormalizedQuote>,
    pub losers: Vec<NormalizedQuote>,
    pub most_active: Vec<NormalizedQuote>,
}

/// Every shape a provider response can be normalized into. This is what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum NormalizedData {
    Quote(NormalizedQuote),
    Series(Vec<NormalizedSeriesPoint>),
    Profile(NormalizedProfile),
    Movers(NormalizedMovers),
}

impl NormalizedData {
    pub fn as_quote(&self) -> Option<&NormalizedQuote> {
        match self {
            NormalizedData::Quote(quote) => Some(quote),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&[NormalizedSeriesPoint]> {
        match self {
            NormalizedData::Series(points) => Some(points),
            _ => None,
        }
    }

    pub fn as_profile(&self) -> Option<&NormalizedProfile> {
        match self {
            NormalizedData::Profile(profile) => Some(profile),
            _ => None,
        }
    }

    pub fn as_movers(&self) -> Option<&NormalizedMovers> {
        match self {
            NormalizedData::Movers(movers) => Some(movers),
            _ => None,
        }
    }
}
