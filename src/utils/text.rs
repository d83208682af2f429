use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Split a command-line `key=value` argument. Keys are trimmed; values are kept verbatim.
pub fn parse_key_value(arg: &str) -> Option<(String, String)> {
    let (key, value) = arg.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some((key.to_string(), value.to_string()))
    }
}

pub fn parse_args(args: &[String]) -> Result<Map<String, Value>> {
    args.iter()
        .map(|arg| {
            parse_key_value(arg)
                .map(|(key, value)| (key, Value::String(value)))
                .ok_or_else(|| AppError::message(format!("Expected key=value, got '{arg}'")))
        })
        .collect()
}

/// Pad or truncate to a fixed column width for table output.
pub fn fit_column(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(' ').take(width - len));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_equals() {
        assert_eq!(
            parse_key_value(" from = 2024-01-01=x"),
            Some(("from".to_string(), " 2024-01-01=x".to_string()))
        );
        assert_eq!(parse_key_value("=IBM"), None);
        assert_eq!(parse_key_value("IBM"), None);
    }

    #[test]
    fn rejects_bare_words() {
        let err = parse_args(&["symbol=IBM".to_string(), "oops".to_string()]).expect_err("bare");
        assert_eq!(err.to_string(), "Expected key=value, got 'oops'");
    }

    #[test]
    fn fits_columns() {
        assert_eq!(fit_column("IBM", 5), "IBM  ");
        assert_eq!(fit_column("alphaVantage", 5), "alpha");
    }
}
