//! Oracle data access: fetching a payload, extracting a value at a
//! dotted path, and evaluating it against resolution criteria.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Operator, Scalar};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch failed: {0}")]
    Failed(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of raw resolution payloads. The resolver depends only on this
/// trait; tests substitute stubs.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Value, FetchError>;
}

/// Fetches JSON documents over HTTP with a hard deadline.
pub struct HttpFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(
                    error = %err,
                    "failed to build HTTP client, using defaults"
                );
                reqwest::Client::new()
            });
        Self { http, timeout }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT)
    }
}

#[async_trait]
impl DataFetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> Result<Value, FetchError> {
        let response =
            self.http.get(source).send().await.map_err(|err| {
                if err.is_timeout() {
                    FetchError::Timeout(self.timeout)
                } else {
                    FetchError::Failed(err.to_string())
                }
            })?;
        let response = response
            .error_for_status()
            .map_err(|err| FetchError::Failed(err.to_string()))?;
        response
            .json()
            .await
            .map_err(|err| FetchError::Failed(err.to_string()))
    }
}

/// Walk a dotted path with `field[n]` array indexing, e.g.
/// `data.results[0].price`. Returns `None` on any missing or null link.
pub fn extract<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    if !path.is_empty() {
        for segment in path.split('.') {
            let (field, indexes) = parse_segment(segment)?;
            if !field.is_empty() {
                current = current.get(field)?;
            }
            for index in indexes {
                current = current.get(index)?;
            }
        }
    }
    if current.is_null() { None } else { Some(current) }
}

/// Split `field[1][2]` into the field name and its array indexes.
fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    match segment.find('[') {
        None => Some((segment, Vec::new())),
        Some(open) => {
            let field = &segment[..open];
            let mut indexes = Vec::new();
            for part in segment[open..].split('[').skip(1) {
                let index = part.strip_suffix(']')?;
                indexes.push(index.parse().ok()?);
            }
            Some((field, indexes))
        }
    }
}

/// Evaluate `actual <operator> expected`. Numeric operators coerce both
/// sides via decimal parsing and are false when either side has no
/// numeric reading; `equals`/`not_equals` compare values (numerically
/// when possible, else as strings); `contains` is a case-insensitive
/// substring test on string coercions.
pub fn evaluate(actual: &Value, operator: Operator, expected: &Scalar) -> bool {
    match operator {
        Operator::Equals => values_equal(actual, expected),
        Operator::NotEquals => !values_equal(actual, expected),
        Operator::Contains => coerce_string(actual)
            .to_lowercase()
            .contains(&expected.coerce_string().to_lowercase()),
        Operator::GreaterThan
        | Operator::GreaterOrEqual
        | Operator::LessThan
        | Operator::LessOrEqual => {
            let (Some(lhs), Some(rhs)) =
                (coerce_number(actual), expected.coerce_number())
            else {
                return false;
            };
            match operator {
                Operator::GreaterThan => lhs > rhs,
                Operator::GreaterOrEqual => lhs >= rhs,
                Operator::LessThan => lhs < rhs,
                Operator::LessOrEqual => lhs <= rhs,
                _ => unreachable!(),
            }
        }
    }
}

fn values_equal(actual: &Value, expected: &Scalar) -> bool {
    if let (Some(lhs), Some(rhs)) =
        (coerce_number(actual), expected.coerce_number())
    {
        lhs == rhs
    } else {
        coerce_string(actual) == expected.coerce_string()
    }
}

/// Decimal coercion of a JSON value.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// String coercion of a JSON value. Strings come back verbatim; other
/// values render as JSON text.
pub fn coerce_string(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_owned(),
        None => value.to_string(),
    }
}

/// The typed form of an extracted value, for the proof record.
pub fn to_scalar(value: &Value) -> Scalar {
    match value {
        Value::String(s) => Scalar::String(s.clone()),
        Value::Number(n) => {
            Scalar::Number(n.as_f64().unwrap_or(f64::NAN))
        }
        Value::Bool(b) => Scalar::Bool(*b),
        other => Scalar::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "data": {
                "results": [
                    {"price": 104250.5, "symbol": "BTC"},
                    {"price": 3890.0, "symbol": "ETH"},
                ],
                "ok": true,
                "note": null,
            },
            "count": 2,
        })
    }

    #[test]
    fn test_extract_dotted_path() {
        let payload = payload();
        assert_eq!(
            extract(&payload, "data.results[0].price"),
            Some(&json!(104250.5))
        );
        assert_eq!(
            extract(&payload, "data.results[1].symbol"),
            Some(&json!("ETH"))
        );
        assert_eq!(extract(&payload, "count"), Some(&json!(2)));
    }

    #[test]
    fn test_extract_empty_path_returns_payload() {
        let payload = payload();
        assert_eq!(extract(&payload, ""), Some(&payload));
    }

    #[test]
    fn test_extract_missing_or_null_is_none() {
        let payload = payload();
        assert_eq!(extract(&payload, "data.missing"), None);
        assert_eq!(extract(&payload, "data.results[7].price"), None);
        assert_eq!(extract(&payload, "data.note"), None);
        assert_eq!(extract(&payload, "data.results[x]"), None);
    }

    #[test]
    fn test_numeric_comparisons_coerce_strings() {
        let actual = json!("104250.50");
        assert!(evaluate(
            &actual,
            Operator::GreaterOrEqual,
            &Scalar::Number(100_000.0)
        ));
        assert!(!evaluate(
            &actual,
            Operator::LessThan,
            &Scalar::String("100000".into())
        ));
        assert!(!evaluate(
            &json!("not a number"),
            Operator::GreaterThan,
            &Scalar::Number(1.0)
        ));
    }

    #[test]
    fn test_equals_is_value_equality() {
        assert!(evaluate(&json!(1.0), Operator::Equals, &Scalar::Number(1.0)));
        assert!(evaluate(
            &json!("1.0"),
            Operator::Equals,
            &Scalar::Number(1.0)
        ));
        assert!(evaluate(
            &json!("BTC"),
            Operator::NotEquals,
            &Scalar::String("ETH".into())
        ));
        assert!(evaluate(&json!(true), Operator::Equals, &Scalar::Bool(true)));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        assert!(evaluate(
            &json!("Bitcoin hits new high"),
            Operator::Contains,
            &Scalar::String("BITCOIN".into())
        ));
        assert!(!evaluate(
            &json!("Ethereum"),
            Operator::Contains,
            &Scalar::String("bitcoin".into())
        ));
    }
}
