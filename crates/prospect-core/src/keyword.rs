//! Keyword normalization for product detail views.
//!
//! An entry's `keywords` list mixes bare strings with rich objects carrying
//! volume/competition/trend metrics; a parallel `keyword_insights` list may
//! hold the metrics for the bare strings. Both collapse to one canonical
//! [`KeywordInsight`] per keyword at ingestion.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trend::{TrendPoint, normalize_series};

/// One normalized keyword with whatever metrics the provider exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordInsight {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trend: Vec<TrendPoint>,
}

/// Probe a dotted path for a finite number.
pub(crate) fn number_at(value: &Value, path: &str) -> Option<f64> {
    let mut cursor = value;
    for part in path.split('.') {
        cursor = cursor.get(part)?;
    }
    coerce_number(cursor)
}

/// Accept numbers and numeric strings, rejecting non-finite values.
pub(crate) fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// First finite number found along any of the given paths.
pub(crate) fn first_number(value: &Value, paths: &[&str]) -> Option<f64> {
    paths.iter().find_map(|p| number_at(value, p))
}

/// Search-volume extraction fallback order.
pub fn extract_volume(value: &Value) -> Option<f64> {
    first_number(
        value,
        &[
            "searchVolume",
            "volume",
            "search_volume",
            "data.volume",
            "metrics.vol",
            "metrics.volume",
            "metrics.searchVolume",
            "summary.avg_monthly_searches",
            "summary.monthly_searches",
        ],
    )
}

/// Competition extraction fallback order.
pub fn extract_competition(value: &Value) -> Option<f64> {
    first_number(value, &["competition", "metrics.competition", "data.competition"])
}

/// Keyword text from whichever field the provider used.
fn keyword_text(value: &Value) -> String {
    if let Some(s) = value.as_str() {
        return s.to_string();
    }
    for key in ["keyword", "term", "text", "name"] {
        if let Some(s) = value.get(key).and_then(Value::as_str) {
            return s.to_string();
        }
    }
    String::new()
}

/// Normalize one raw keyword item. `None` when no usable text exists.
pub fn normalize_keyword(item: &Value) -> Option<KeywordInsight> {
    let text = keyword_text(item);
    if text.trim().is_empty() {
        return None;
    }
    Some(KeywordInsight {
        text,
        volume: extract_volume(item),
        competition: extract_competition(item),
        trend: normalize_series(item),
    })
}

/// Metrics for an insight record matched to a bare keyword: `vol` /
/// `stats.searchVolume` first, then the generic fallbacks.
fn insight_volume(insight: &Value) -> Option<f64> {
    first_number(insight, &["vol", "stats.searchVolume"]).or_else(|| extract_volume(insight))
}

fn insight_competition(insight: &Value) -> Option<f64> {
    first_number(insight, &["competition", "stats.avgTotalListings"])
        .or_else(|| extract_competition(insight))
}

fn normalized_text(value: &Value) -> String {
    keyword_text(value).trim().to_lowercase()
}

/// Find the insight record for a keyword: exact normalized match first, then
/// substring containment either way (verbose query text vs simplified
/// keyword).
fn match_insight<'a>(needle: &str, insights: &'a [Value]) -> Option<&'a Value> {
    if needle.is_empty() {
        return None;
    }
    if let Some(exact) = insights.iter().find(|i| normalized_text(i) == needle) {
        return Some(exact);
    }
    insights.iter().find(|i| {
        let t = normalized_text(i);
        !t.is_empty() && (t.contains(needle) || needle.contains(&t))
    })
}

/// Merge an entry's raw keywords with its insight records into canonical
/// [`KeywordInsight`]s. Rich keyword objects keep their own metrics; bare
/// strings borrow metrics from a matching insight when one exists.
pub fn merge_keywords(raw_keywords: &[Value], insights: &[Value]) -> Vec<KeywordInsight> {
    raw_keywords
        .iter()
        .filter_map(|kw| {
            if kw.is_object() {
                return normalize_keyword(kw);
            }
            let text = keyword_text(kw);
            if text.trim().is_empty() {
                return None;
            }
            let needle = text.trim().to_lowercase();
            match match_insight(&needle, insights) {
                Some(found) => Some(KeywordInsight {
                    text,
                    volume: insight_volume(found),
                    competition: insight_competition(found),
                    trend: normalize_series(found),
                }),
                None => Some(KeywordInsight {
                    text,
                    volume: None,
                    competition: None,
                    trend: Vec::new(),
                }),
            }
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn volume_fallback_order() {
        assert_eq!(extract_volume(&json!({"searchVolume": 10, "volume": 20})), Some(10.0));
        assert_eq!(extract_volume(&json!({"volume": 20})), Some(20.0));
        assert_eq!(extract_volume(&json!({"metrics": {"vol": 5}})), Some(5.0));
        assert_eq!(
            extract_volume(&json!({"summary": {"avg_monthly_searches": 900}})),
            Some(900.0)
        );
        assert_eq!(extract_volume(&json!({"unrelated": 1})), None);
    }

    #[test]
    fn competition_fallback_order() {
        assert_eq!(extract_competition(&json!({"competition": 0.4})), Some(0.4));
        assert_eq!(
            extract_competition(&json!({"metrics": {"competition": 70}})),
            Some(70.0)
        );
        assert_eq!(extract_competition(&json!({})), None);
    }

    #[test]
    fn numeric_strings_coerce() {
        assert_eq!(extract_volume(&json!({"volume": "1200"})), Some(1200.0));
        assert_eq!(extract_volume(&json!({"volume": "n/a"})), None);
    }

    #[test]
    fn normalize_bare_string() {
        let k = normalize_keyword(&json!("ceramic mug")).unwrap();
        assert_eq!(k.text, "ceramic mug");
        assert_eq!(k.volume, None);
        assert!(k.trend.is_empty());
    }

    #[test]
    fn normalize_rich_object() {
        let k = normalize_keyword(&json!({
            "keyword": "mug",
            "volume": 300,
            "competition": 12,
            "dailyStats": [{"date": "Oct 1", "searchVolume": 4}]
        }))
        .unwrap();
        assert_eq!(k.volume, Some(300.0));
        assert_eq!(k.competition, Some(12.0));
        assert_eq!(k.trend.len(), 1);
    }

    #[test]
    fn normalize_rejects_empty_text() {
        assert!(normalize_keyword(&json!({"volume": 4})).is_none());
        assert!(normalize_keyword(&json!("   ")).is_none());
    }

    // --- Insight merging ---

    #[test]
    fn merge_exact_match() {
        let keywords = vec![json!("Coffee Mug")];
        let insights = vec![json!({
            "keyword": "coffee mug",
            "vol": 450,
            "stats": {"avgTotalListings": 9000}
        })];
        let merged = merge_keywords(&keywords, &insights);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "Coffee Mug");
        assert_eq!(merged[0].volume, Some(450.0));
        assert_eq!(merged[0].competition, Some(9000.0));
    }

    #[test]
    fn merge_substring_match() {
        let keywords = vec![json!("mug")];
        let insights = vec![json!({"keyword": "handmade mug gift", "vol": 77})];
        let merged = merge_keywords(&keywords, &insights);
        assert_eq!(merged[0].volume, Some(77.0));
    }

    #[test]
    fn merge_prefers_exact_over_substring() {
        let keywords = vec![json!("mug")];
        let insights = vec![
            json!({"keyword": "mug rack", "vol": 1}),
            json!({"keyword": "mug", "vol": 2}),
        ];
        let merged = merge_keywords(&keywords, &insights);
        assert_eq!(merged[0].volume, Some(2.0));
    }

    #[test]
    fn merge_unmatched_keeps_text_only() {
        let merged = merge_keywords(&[json!("unicorn lamp")], &[json!({"keyword": "mug", "vol": 9})]);
        assert_eq!(merged[0].text, "unicorn lamp");
        assert_eq!(merged[0].volume, None);
    }

    #[test]
    fn merge_rich_objects_pass_through() {
        let keywords = vec![json!({"keyword": "poster", "volume": 11})];
        let merged = merge_keywords(&keywords, &[json!({"keyword": "poster", "vol": 99})]);
        // Already rich — its own metrics win, the insight list is not consulted.
        assert_eq!(merged[0].volume, Some(11.0));
    }

    #[test]
    fn merge_skips_blank_keywords() {
        let merged = merge_keywords(&[json!(""), json!("ok")], &[]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "ok");
    }
}
