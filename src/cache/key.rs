use std::fmt;

use serde_json::{Map, Value};

/// Cache identity of one request: provider, endpoint and canonical arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub provider: String,
    pub endpoint: String,
    pub args: Value,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(provider: &str, endpoint: &str, args: &Value) -> Self {
        let args = canonicalize(args);
        let fingerprint = args.to_string();
        Self {
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            args,
            fingerprint,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.provider, self.endpoint, self.fingerprint)
    }
}

/// Rebuild `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(inner));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_identity() {
        let a = CacheKey::new("finnhub", "candles", &json!({"symbol": "AAPL", "resolution": "D"}));
        let b = CacheKey::new("finnhub", "candles", &json!({"resolution": "D", "symbol": "AAPL"}));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn nested_objects_are_sorted() {
        let value = canonicalize(&json!({"b": {"z": 1, "a": [ {"y": 2, "x": 1} ]}, "a": null}));
        assert_eq!(value.to_string(), r#"{"a":null,"b":{"a":[{"x":1,"y":2}],"z":1}}"#);
    }

    #[test]
    fn distinct_arguments_give_distinct_keys() {
        let a = CacheKey::new("alphaVantage", "quote", &json!(["IBM"]));
        let b = CacheKey::new("alphaVantage", "quote", &json!(["MSFT"]));
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), r#"alphaVantage_quote_["IBM"]"#);
    }
}
