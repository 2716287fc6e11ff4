//! Usage value parsing.
//!
//! Upstream reports usage as strings like `"53.27%"` or `"53,27"`, and
//! occasionally as plain JSON numbers.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Extract the leading numeric magnitude of a usage string.
///
/// A trailing percent sign is ignored. A comma is read as the decimal
/// separator when the string has no `.`, and as a thousands separator
/// otherwise. Anything without a leading number yields `0.0`.
pub fn parse_percent(raw: &str) -> f64 {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let re = NUMBER.get_or_init(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?").unwrap());

    let stripped = raw.trim().replace('%', "");
    let normalized = if stripped.contains('.') {
        stripped.replace(',', "")
    } else {
        stripped.replace(',', ".")
    };

    let value = re
        .find(normalized.trim_start())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite());

    match value {
        Some(v) => v,
        None => {
            tracing::debug!("Unparsable usage value {:?}, recording 0", raw);
            0.0
        }
    }
}

/// Read a usage field that may be a string or a number.
pub fn usage_value(value: &Value) -> f64 {
    match value {
        Value::String(s) => parse_percent(s),
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        other => {
            tracing::debug!("Unexpected usage value {}, recording 0", other);
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("53.27%"), 53.27);
        assert_eq!(parse_percent(" 12 % "), 12.0);
        assert_eq!(parse_percent("42,5%"), 42.5);
        assert_eq!(parse_percent("150%"), 150.0);
        assert_eq!(parse_percent("-3.5"), -3.5);
        assert_eq!(parse_percent(".5"), 0.5);
    }

    #[test]
    fn test_parse_percent_grouped_thousands() {
        assert_eq!(parse_percent("1,234.5%"), 1234.5);
        assert_eq!(parse_percent("12,000.0"), 12000.0);
        assert_eq!(parse_percent("0,75%"), 0.75);
    }

    #[test]
    fn test_parse_percent_leading_number_only() {
        assert_eq!(parse_percent("87.1% of 16GB"), 87.1);
        assert_eq!(parse_percent("7abc"), 7.0);
    }

    #[test]
    fn test_unparsable_defaults_to_zero() {
        assert_eq!(parse_percent("abc"), 0.0);
        assert_eq!(parse_percent(""), 0.0);
        assert_eq!(parse_percent("%"), 0.0);
        assert_eq!(parse_percent("N/A"), 0.0);
        assert_eq!(parse_percent("-"), 0.0);
    }

    #[test]
    fn test_usage_value() {
        assert_eq!(usage_value(&json!("53.27%")), 53.27);
        assert_eq!(usage_value(&json!(61.5)), 61.5);
        assert_eq!(usage_value(&json!(null)), 0.0);
        assert_eq!(usage_value(&json!(true)), 0.0);
    }
}
