//! Trend-series normalization.
//!
//! Providers deliver trend data in many container shapes (`dailyStats`,
//! `trend`, `history`, `metrics.monthly`, …) and many point shapes
//! (`{date, searchVolume}`, `{month, value}`, bare numbers, …). Everything
//! collapses to a flat list of [`TrendPoint`]s at ingestion so render code
//! never re-derives from raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized point in a trend series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Position on the x axis: milliseconds since epoch when the point had a
    /// numeric timestamp, otherwise its index in the series.
    pub position: f64,
    /// Human label, taken from the provider's date string when present.
    pub label: String,
    pub value: f64,
}

/// Container keys probed, in preference order, for a trend series.
const SERIES_KEYS: [&str; 6] = ["trend", "metrics.monthly", "history", "time_series", "timeseries", "data.trend"];

/// Locate the raw series array inside a keyword/insight object.
///
/// `dailyStats` is checked first since it's the richest shape: either an
/// array directly or `{stats: [...]}`.
pub fn find_series(value: &Value) -> Option<&Vec<Value>> {
    if let Some(ds) = value.get("dailyStats") {
        if let Some(arr) = ds.get("stats").and_then(Value::as_array) {
            return Some(arr);
        }
        if let Some(arr) = ds.as_array() {
            return Some(arr);
        }
    }
    for key in SERIES_KEYS {
        let mut cursor = value;
        let mut found = true;
        for part in key.split('.') {
            match cursor.get(part) {
                Some(next) => cursor = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            if let Some(arr) = cursor.as_array() {
                return Some(arr);
            }
        }
    }
    None
}

/// Normalize a raw series into [`TrendPoint`]s. Empty when no series exists.
pub fn normalize_series(value: &Value) -> Vec<TrendPoint> {
    let Some(series) = find_series(value) else {
        return Vec::new();
    };
    series
        .iter()
        .enumerate()
        .map(|(i, item)| normalize_point(i, item))
        .collect()
}

fn normalize_point(index: usize, item: &Value) -> TrendPoint {
    let mut label = String::new();
    let mut value = 0.0;

    if let Some(n) = item.as_f64() {
        value = n;
    } else if let Some(obj) = item.as_object() {
        let pairs: [(&str, &str); 4] = [
            ("date", "searchVolume"),
            ("date", "value"),
            ("month", "value"),
            ("date", "count"),
        ];
        let mut matched = false;
        for (label_key, value_key) in pairs {
            if obj.contains_key(label_key) && obj.contains_key(value_key) {
                label = stringify(&obj[label_key]);
                value = obj[value_key].as_f64().unwrap_or(0.0);
                matched = true;
                break;
            }
        }
        if !matched {
            // Any-shape fallback: first numeric field wins, best-effort label.
            value = obj.values().find_map(Value::as_f64).unwrap_or(0.0);
            for key in ["date", "month", "ts", "timestamp"] {
                if let Some(v) = obj.get(key) {
                    label = stringify(v);
                    break;
                }
            }
        }
    }

    // Only a numeric ts/timestamp positions the point on a time axis.
    // Date strings like "Oct 8" are labels, never parsed.
    let position = item
        .get("ts")
        .or_else(|| item.get("timestamp"))
        .and_then(Value::as_f64)
        .map(|ts| if ts > 1e12 { ts } else { ts * 1000.0 });

    #[allow(clippy::cast_precision_loss)]
    let position = position.unwrap_or(index as f64);

    if label.is_empty() {
        label = format!("#{}", index + 1);
    }

    TrendPoint {
        position,
        label,
        value: if value.is_finite() { value } else { 0.0 },
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn daily_stats_array_shape() {
        let v = json!({"dailyStats": [
            {"date": "Oct 8", "searchVolume": 120},
            {"date": "Oct 9", "searchVolume": 90}
        ]});
        let points = normalize_series(&v);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].label, "Oct 8");
        assert_eq!(points[0].value, 120.0);
        assert_eq!(points[0].position, 0.0);
        assert_eq!(points[1].position, 1.0);
    }

    #[test]
    fn daily_stats_nested_stats_shape() {
        let v = json!({"dailyStats": {"stats": [{"date": "Nov 1", "searchVolume": 5}]}});
        let points = normalize_series(&v);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 5.0);
    }

    #[test]
    fn month_value_shape() {
        let v = json!({"trend": [{"month": "Jan", "value": 10}, {"month": "Feb", "value": 20}]});
        let points = normalize_series(&v);
        assert_eq!(points[1].label, "Feb");
        assert_eq!(points[1].value, 20.0);
    }

    #[test]
    fn bare_number_series() {
        let v = json!({"history": [1, 2, 3]});
        let points = normalize_series(&v);
        assert_eq!(points.iter().map(|p| p.value).collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
        assert_eq!(points[2].label, "#3");
    }

    #[test]
    fn unknown_object_uses_first_numeric_field() {
        let v = json!({"timeseries": [{"weird": "x", "score": 44}]});
        let points = normalize_series(&v);
        assert_eq!(points[0].value, 44.0);
    }

    #[test]
    fn numeric_timestamp_positions_on_time_axis() {
        // Seconds are scaled to millis; millis pass through.
        let v = json!({"trend": [
            {"date": "a", "value": 1, "ts": 1_700_000_000},
            {"date": "b", "value": 2, "ts": 1_700_000_100_000i64}
        ]});
        let points = normalize_series(&v);
        assert_eq!(points[0].position, 1_700_000_000_000.0);
        assert_eq!(points[1].position, 1_700_000_100_000.0);
    }

    #[test]
    fn no_series_yields_empty() {
        assert!(normalize_series(&json!({"volume": 3})).is_empty());
        assert!(normalize_series(&json!("just a string")).is_empty());
    }

    #[test]
    fn nested_data_trend_shape() {
        let v = json!({"data": {"trend": [{"date": "D1", "count": 7}]}});
        let points = normalize_series(&v);
        assert_eq!(points[0].value, 7.0);
        assert_eq!(points[0].label, "D1");
    }
}
