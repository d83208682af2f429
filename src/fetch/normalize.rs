//! Map raw provider payloads onto the canonical shapes.
//!
//! Field lookups go through alias lists so Alpha Vantage's numbered keys,
//! Finnhub's single letters and the Indian API's snake_case all land in the
//! same place. A payload that matches nothing gives `None`.

use serde_json::{Map, Value};

use crate::config::ResponseShape;

use super::decode::{
    find_array, find_object, find_prefixed, find_value, json_number, json_timestamp,
    number_field, parse_timestamp, text_field, timestamp_field, ARRAY_KEYS,
};
use super::models::{
    NormalizedData, NormalizedMovers, NormalizedProfile, NormalizedQuote, NormalizedSeriesPoint,
};

const QUOTE_CONTAINERS: &[&str] = &["Global Quote", "quote", "data", "result"];
const PROFILE_CONTAINERS: &[&str] = &["data", "profile", "company", "result"];

const SYMBOL: &[&str] = &["symbol", "01. symbol", "ticker", "s", "code"];
const PRICE: &[&str] = &[
    "price",
    "05. price",
    "c",
    "last_price",
    "ltp",
    "current_price",
    "close",
];
const CHANGE: &[&str] = &["change", "09. change", "d", "change_amount", "net_change"];
const CHANGE_PERCENT: &[&str] = &[
    "change_percent",
    "10. change percent",
    "dp",
    "change_percentage",
    "percent_change",
    "pchange",
];
const VOLUME: &[&str] = &["volume", "06. volume", "5. volume", "v", "total_volume"];
const PREVIOUS_CLOSE: &[&str] = &["previous_close", "08. previous close", "pc", "prev_close"];
const OPEN: &[&str] = &["open", "02. open", "1. open", "o", "open_price"];
const HIGH: &[&str] = &["high", "03. high", "2. high", "h", "day_high"];
const LOW: &[&str] = &["low", "04. low", "3. low", "l", "day_low"];
const CLOSE: &[&str] = &["close", "4. close", "c", "last_price", "adj_close", "price"];
const AS_OF: &[&str] = &[
    "07. latest trading day",
    "latest_trading_day",
    "t",
    "timestamp",
    "date",
    "last_update",
];
const ROW_TIME: &[&str] = &["date", "timestamp", "datetime", "time", "t"];

/// Normalize `raw` into the shape an endpoint declares.
///
/// `symbol_hint` fills the symbol for providers whose quotes omit it.
pub fn normalize(shape: ResponseShape, raw: &Value, symbol_hint: Option<&str>) -> Option<NormalizedData> {
    match shape {
        ResponseShape::Quote => normalize_quote(raw, symbol_hint).map(NormalizedData::Quote),
        ResponseShape::Series => normalize_series(raw).map(NormalizedData::Series),
        ResponseShape::Profile => normalize_profile(raw).map(NormalizedData::Profile),
        ResponseShape::Movers => normalize_movers(raw).map(NormalizedData::Movers),
    }
}

pub fn normalize_quote(raw: &Value, symbol_hint: Option<&str>) -> Option<NormalizedQuote> {
    let object = match raw {
        Value::Object(root) => find_object(root, QUOTE_CONTAINERS).unwrap_or(root),
        Value::Array(items) => items.iter().find_map(Value::as_object)?,
        _ => return None,
    };

    let quote = quote_from_object(object, symbol_hint)?;
    quote.price.is_some().then_some(quote)
}

fn quote_from_object(object: &Map<String, Value>, symbol_hint: Option<&str>) -> Option<NormalizedQuote> {
    let symbol = text_field(object, SYMBOL).or_else(|| symbol_hint.map(str::to_string))?;
    Some(NormalizedQuote {
        symbol,
        price: number_field(object, PRICE),
        change: number_field(object, CHANGE),
        change_percent: number_field(object, CHANGE_PERCENT),
        volume: number_field(object, VOLUME),
        previous_close: number_field(object, PREVIOUS_CLOSE),
        open: number_field(object, OPEN),
        high: number_field(object, HIGH),
        low: number_field(object, LOW),
        as_of: timestamp_field(object, AS_OF),
    })
}

pub fn normalize_series(raw: &Value) -> Option<Vec<NormalizedSeriesPoint>> {
    let mut points = if let Some(points) = columnar_series(raw) {
        points
    } else if let Some(points) = keyed_series(raw) {
        points
    } else {
        row_series(raw)?
    };

    points.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Some(points)
}

/// Parallel arrays keyed by `t`, `o`, `h`, `l`, `c`, `v`, as in candle endpoints.
fn columnar_series(raw: &Value) -> Option<Vec<NormalizedSeriesPoint>> {
    let object = raw.as_object()?;
    if object.get("s").and_then(Value::as_str) == Some("no_data") {
        return Some(Vec::new());
    }

    let times = object.get("t")?.as_array()?;
    let closes = object.get("c")?.as_array()?;
    let column = |key: &str, index: usize| {
        object
            .get(key)
            .and_then(Value::as_array)
            .and_then(|values| values.get(index))
            .and_then(json_number)
    };

    Some(
        times
            .iter()
            .zip(closes)
            .enumerate()
            .filter_map(|(index, (time, close))| {
                Some(NormalizedSeriesPoint {
                    timestamp: json_timestamp(time)?,
                    close: json_number(close)?,
                    open: column("o", index),
                    high: column("h", index),
                    low: column("l", index),
                    volume: column("v", index),
                })
            })
            .collect(),
    )
}

/// Object of timestamp to bar, as in `Time Series (Daily)`.
fn keyed_series(raw: &Value) -> Option<Vec<NormalizedSeriesPoint>> {
    let series = find_prefixed(raw.as_object()?, "Time Series")?.as_object()?;
    Some(
        series
            .iter()
            .filter_map(|(stamp, bar)| {
                let bar = bar.as_object()?;
                Some(NormalizedSeriesPoint {
                    timestamp: parse_timestamp(stamp)?,
                    close: number_field(bar, CLOSE)?,
                    open: number_field(bar, OPEN),
                    high: number_field(bar, HIGH),
                    low: number_field(bar, LOW),
                    volume: number_field(bar, VOLUME),
                })
            })
            .collect(),
    )
}

/// List of bar objects, bare or under a common container key.
fn row_series(raw: &Value) -> Option<Vec<NormalizedSeriesPoint>> {
    let rows = find_array(raw, ARRAY_KEYS)?;
    Some(
        rows.iter()
            .filter_map(Value::as_object)
            .filter_map(|row| {
                Some(NormalizedSeriesPoint {
                    timestamp: timestamp_field(row, ROW_TIME)?,
                    close: number_field(row, CLOSE)?,
                    open: number_field(row, OPEN),
                    high: number_field(row, HIGH),
                    low: number_field(row, LOW),
                    volume: number_field(row, VOLUME),
                })
            })
            .collect(),
    )
}

pub fn normalize_profile(raw: &Value) -> Option<NormalizedProfile> {
    let root = raw.as_object()?;
    let object = find_object(root, PROFILE_CONTAINERS).unwrap_or(root);

    let profile = NormalizedProfile {
        symbol: text_field(object, &["symbol", "ticker"]),
        name: text_field(object, &["name", "company_name", "companyName"]),
        industry: text_field(object, &["industry", "finnhubIndustry", "sector"]),
        market_cap: number_field(object, &["market_cap", "marketCapitalization", "marketCap"]),
        description: text_field(object, &["description", "about"]),
        website: text_field(object, &["website", "weburl"]),
        logo: text_field(object, &["logo"]),
    };

    (profile.name.is_some() || profile.symbol.is_some()).then_some(profile)
}

pub fn normalize_movers(raw: &Value) -> Option<NormalizedMovers> {
    let object = raw.as_object()?;
    let gainers = find_value(object, &["top_gainers", "gainers"]);
    let losers = find_value(object, &["top_losers", "losers"]);
    let active = find_value(object, &["most_actively_traded", "most_active"]);
    if gainers.is_none() && losers.is_none() && active.is_none() {
        return None;
    }

    let list = |value: Option<&Value>| -> Vec<NormalizedQuote> {
        value
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|item| quote_from_object(item, None))
                    .collect()
            })
            .unwrap_or_default()
    };

    Some(NormalizedMovers {
        gainers: list(gainers),
        losers: list(losers),
        most_active: list(active),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn alpha_vantage_global_quote() {
        let raw = json!({
            "Global Quote": {
                "01. symbol": "IBM",
                "02. open": "181.0000",
                "03. high": "183.2000",
                "04. low": "180.5000",
                "05. price": "182.1500",
                "06. volume": "3200000",
                "07. latest trading day": "2024-01-05",
                "08. previous close": "180.9000",
                "09. change": "1.2500",
                "10. change percent": "0.6910%"
            }
        });

        let quote = normalize_quote(&raw, None).expect("quote");
        assert_eq!(quote.symbol, "IBM");
        assert_eq!(quote.price, Some(182.15));
        assert_eq!(quote.change_percent, Some(0.691));
        assert_eq!(quote.previous_close, Some(180.9));
        assert!(quote.as_of.is_some());
    }

    #[test]
    fn empty_global_quote_is_unmatched() {
        assert!(normalize_quote(&json!({"Global Quote": {}}), Some("IBM")).is_none());
        assert!(normalize_quote(&json!("oops"), None).is_none());
    }

    #[test]
    fn finnhub_quote_uses_symbol_hint() {
        let raw = json!({"c": 189.5, "d": -1.2, "dp": -0.63, "h": 191.0, "l": 188.1, "o": 190.2, "pc": 190.7, "t": 1704412800});
        let quote = normalize_quote(&raw, Some("AAPL")).expect("quote");
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, Some(189.5));
        assert_eq!(quote.change, Some(-1.2));
        assert_eq!(quote.previous_close, Some(190.7));
        assert!(quote.volume.is_none());
    }

    #[test]
    fn indian_quote_inside_data() {
        let raw = json!({"data": {"ticker": "TCS", "last_price": "3,512.40", "change_percentage": "1.1", "total_volume": 120000, "day_high": 3530}});
        let quote = normalize_quote(&raw, None).expect("quote");
        assert_eq!(quote.symbol, "TCS");
        assert_eq!(quote.price, Some(3512.4));
        assert_eq!(quote.change_percent, Some(1.1));
        assert_eq!(quote.volume, Some(120000.0));
        assert_eq!(quote.high, Some(3530.0));
    }

    #[test]
    fn alpha_vantage_series_ascends() {
        let raw = json!({
            "Meta Data": {"1. Information": "Daily Prices"},
            "Time Series (Daily)": {
                "2024-01-05": {"1. open": "10", "2. high": "12", "3. low": "9", "4. close": "11", "5. volume": "100"},
                "2024-01-04": {"1. open": "9", "2. high": "10", "3. low": "8", "4. close": "10", "5. volume": "90"},
                "bad": {"4. close": "1"}
            }
        });

        let points = normalize_series(&raw).expect("series");
        assert_eq!(points.len(), 2);
        assert!(points[0].timestamp < points[1].timestamp);
        assert_eq!(points[1].close, 11.0);
        assert_eq!(points[0].volume, Some(90.0));
    }

    #[test]
    fn finnhub_candles_are_zipped() {
        let raw = json!({"s": "ok", "t": [1704412800, 1704326400], "c": [11.0, 10.0], "o": [10.5, 9.5], "v": [100, 90]});
        let points = normalize_series(&raw).expect("series");
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].close, 10.0);
        assert_eq!(points[0].open, Some(9.5));
        assert!(points[0].high.is_none());

        assert_eq!(normalize_series(&json!({"s": "no_data"})), Some(Vec::new()));
    }

    #[test]
    fn indian_history_rows() {
        let raw = json!({"data": [
            {"date": "2024-01-05", "open_price": 100, "close": "101.5"},
            {"date": "2024-01-04", "last_price": 99}
        ]});
        let points = normalize_series(&raw).expect("series");
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].close, 99.0);
        assert_eq!(points[1].open, Some(100.0));

        assert_eq!(normalize_series(&json!({"data": []})), Some(Vec::new()));
        assert!(normalize_series(&json!({"message": "nothing"})).is_none());
    }

    #[test]
    fn profiles_from_both_families() {
        let finnhub = json!({"ticker": "AAPL", "name": "Apple Inc", "finnhubIndustry": "Technology", "marketCapitalization": 2900000.5, "weburl": "https://apple.com"});
        let profile = normalize_profile(&finnhub).expect("profile");
        assert_eq!(profile.industry.as_deref(), Some("Technology"));
        assert_eq!(profile.website.as_deref(), Some("https://apple.com"));

        let indian = json!({"data": {"company_name": "Tata Consultancy", "sector": "IT", "about": "Services"}});
        let profile = normalize_profile(&indian).expect("profile");
        assert_eq!(profile.name.as_deref(), Some("Tata Consultancy"));
        assert_eq!(profile.description.as_deref(), Some("Services"));

        assert!(normalize_profile(&json!({})).is_none());
    }

    #[test]
    fn movers_lists() {
        let raw = json!({
            "top_gainers": [{"ticker": "ABC", "price": "2.5", "change_amount": "1.0", "change_percentage": "66.7%", "volume": "1000"}],
            "top_losers": []
        });
        let movers = normalize_movers(&raw).expect("movers");
        assert_eq!(movers.gainers.len(), 1);
        assert_eq!(movers.gainers[0].symbol, "ABC");
        assert_eq!(movers.gainers[0].change_percent, Some(66.7));
        assert!(movers.most_active.is_empty());

        assert!(normalize_movers(&json!({"Information": "rate limited"})).is_none());
    }
}
