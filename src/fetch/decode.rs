use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Containers providers commonly wrap row lists in.
pub const ARRAY_KEYS: &[&str] = &[
    "data",
    "values",
    "prices",
    "candles",
    "historical",
    "history",
    "items",
    "results",
    "quotes",
];

/// Epoch values above this are taken as milliseconds rather than seconds.
const MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// First value whose key matches one of `aliases`, ignoring case and punctuation.
pub fn find_value<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    for alias in aliases {
        let alias_norm = normalize_key(alias);
        if let Some((_, value)) = object
            .iter()
            .find(|(key, _)| normalize_key(key) == alias_norm)
        {
            if !value.is_null() {
                return Some(value);
            }
        }
    }

    None
}

/// First value whose normalized key starts with `prefix`, e.g. `Time Series (5min)`.
pub fn find_prefixed<'a>(object: &'a Map<String, Value>, prefix: &str) -> Option<&'a Value> {
    let prefix_norm = normalize_key(prefix);
    object
        .iter()
        .find(|(key, _)| normalize_key(key).starts_with(&prefix_norm))
        .map(|(_, value)| value)
}

pub fn find_object<'a>(
    object: &'a Map<String, Value>,
    aliases: &[&str],
) -> Option<&'a Map<String, Value>> {
    find_value(object, aliases).and_then(Value::as_object)
}

pub fn find_array<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    if let Some(array) = root.as_array() {
        return Some(array);
    }
    let object = root.as_object()?;
    find_value(object, keys).and_then(Value::as_array)
}

/// Finite number from a JSON number or a numeric string such as `"1,234.5"` or `"-0.42%"`.
pub fn json_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(num) => num.as_f64()?,
        Value::String(raw) => {
            let cleaned: String = raw
                .trim()
                .chars()
                .filter(|c| *c != ',' && *c != '%')
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok()?
        }
        _ => return None,
    };

    number.is_finite().then_some(number)
}

pub fn number_field(object: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    find_value(object, aliases).and_then(json_number)
}

pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(num) => Some(num.to_string()),
        _ => None,
    }
}

pub fn text_field(object: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    find_value(object, aliases).and_then(value_to_string)
}

/// Timestamp from epoch seconds or milliseconds, RFC 3339, or a handful of date layouts.
pub fn json_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(num) => epoch_to_utc(num.as_f64()?),
        Value::String(raw) => parse_timestamp(raw),
        _ => None,
    }
}

pub fn timestamp_field(object: &Map<String, Value>, aliases: &[&str]) -> Option<DateTime<Utc>> {
    find_value(object, aliases).and_then(json_timestamp)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if trimmed.contains('-') {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return date_to_utc(date);
        }
    } else if trimmed.len() == 8 {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
            return date_to_utc(date);
        }
    }

    trimmed.parse::<f64>().ok().and_then(epoch_to_utc)
}

fn date_to_utc(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn epoch_to_utc(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw <= 0.0 {
        return None;
    }
    let millis = if raw >= MILLIS_THRESHOLD {
        raw
    } else {
        raw * 1_000.0
    };
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
}
