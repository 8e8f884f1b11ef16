//! Single-keyword insight normalization for the companion lookup page.
//!
//! The insight endpoint's payload may arrive bare or nested under `data` /
//! `result`, and its metrics use yet another set of field spellings. This
//! module flattens all of that into one [`InsightSummary`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::keyword::first_number;
use crate::trend::{TrendPoint, normalize_series};

/// Listings range mapped linearly onto the 0..100 competition score.
const LISTINGS_SCORE_MIN: f64 = 10_000.0;
const LISTINGS_SCORE_MAX: f64 = 3_000_000.0;

/// Coarse competition classification for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionLevel {
    Low,
    Medium,
    High,
}

/// Normalized single-keyword lookup result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSummary {
    pub keyword: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Competition as a 0..100 score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition_level: Option<CompetitionLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_total_listings: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trend: Vec<TrendPoint>,
}

/// Unwrap the payload from its envelope: `data`, then `result`, then bare.
pub fn normalize_payload(body: &Value) -> &Value {
    body.get("data").or_else(|| body.get("result")).unwrap_or(body)
}

fn avg_total_listings(res: &Value) -> Option<f64> {
    first_number(res, &["avgTotalListings", "data.avgTotalListings"])
}

/// Competition as whatever scale the provider used: a 0..1 fraction or a
/// 0..100 score. Derived from listings density when no direct field exists.
fn raw_competition(res: &Value) -> Option<f64> {
    if let Some(listings) = avg_total_listings(res) {
        let score = ((listings - LISTINGS_SCORE_MIN) / (LISTINGS_SCORE_MAX - LISTINGS_SCORE_MIN))
            * 100.0;
        return Some(score.clamp(0.0, 100.0).round());
    }
    first_number(
        res,
        &[
            "competition",
            "data.competition",
            "metrics.competition",
            "summary.competition_score",
            "metrics.competitionScore",
            "result.metrics.competition",
            "result.metrics.competitionScore",
            "summary.competitionScore",
        ],
    )
}

/// Fold a raw competition value onto the 0..100 score: fractions scale up,
/// scores clamp.
pub fn competition_score(raw: f64) -> u32 {
    let score = if raw > 1.0 { raw.clamp(0.0, 100.0) } else { (raw * 100.0).round() };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        score.round().clamp(0.0, 100.0) as u32
    }
}

/// Score bands: `<35` low, `<65` medium, else high.
pub fn classify_competition(score: u32) -> CompetitionLevel {
    if score < 35 {
        CompetitionLevel::Low
    } else if score < 65 {
        CompetitionLevel::Medium
    } else {
        CompetitionLevel::High
    }
}

fn insight_volume(res: &Value) -> Option<f64> {
    first_number(
        res,
        &[
            "searchVolume",
            "volume",
            "search_volume",
            "data.volume",
            "metrics.volume",
            "summary.avg_monthly_searches",
            "metrics.searchVolume",
            "summary.monthly_searches",
        ],
    )
}

/// Normalize a raw insight response body for a keyword.
pub fn normalize_insight(keyword: &str, body: &Value) -> InsightSummary {
    let res = normalize_payload(body);
    let score = raw_competition(res).map(competition_score);
    InsightSummary {
        keyword: keyword.to_string(),
        volume: insight_volume(res),
        competition_score: score,
        competition_level: score.map(classify_competition),
        avg_total_listings: avg_total_listings(res),
        trend: normalize_series(res),
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
    fn payload_unwraps_data_then_result() {
        let body = json!({"data": {"volume": 5}});
        assert_eq!(normalize_payload(&body)["volume"], 5);
        let body = json!({"result": {"volume": 6}});
        assert_eq!(normalize_payload(&body)["volume"], 6);
        let body = json!({"volume": 7});
        assert_eq!(normalize_payload(&body)["volume"], 7);
    }

    #[test]
    fn competition_derived_from_listings() {
        // Midpoint of the 10k..3M range lands near 50.
        let body = json!({"avgTotalListings": 1_505_000});
        let s = normalize_insight("mug", &body);
        assert_eq!(s.competition_score, Some(50));
        assert_eq!(s.competition_level, Some(CompetitionLevel::Medium));
        assert_eq!(s.avg_total_listings, Some(1_505_000.0));
    }

    #[test]
    fn competition_listings_clamped() {
        let low = normalize_insight("a", &json!({"avgTotalListings": 100}));
        assert_eq!(low.competition_score, Some(0));
        let high = normalize_insight("b", &json!({"avgTotalListings": 9_000_000}));
        assert_eq!(high.competition_score, Some(100));
    }

    #[test]
    fn fractional_competition_scales_to_percent() {
        let s = normalize_insight("mug", &json!({"competition": 0.42}));
        assert_eq!(s.competition_score, Some(42));
    }

    #[test]
    fn whole_competition_clamps() {
        let s = normalize_insight("mug", &json!({"competition": 250}));
        assert_eq!(s.competition_score, Some(100));
    }

    #[test]
    fn classify_bands() {
        assert_eq!(classify_competition(10), CompetitionLevel::Low);
        assert_eq!(classify_competition(34), CompetitionLevel::Low);
        assert_eq!(classify_competition(35), CompetitionLevel::Medium);
        assert_eq!(classify_competition(64), CompetitionLevel::Medium);
        assert_eq!(classify_competition(65), CompetitionLevel::High);
    }

    #[test]
    fn volume_and_trend_extracted() {
        let body = json!({"data": {
            "searchVolume": 880,
            "dailyStats": [{"date": "Oct 8", "searchVolume": 12}]
        }});
        let s = normalize_insight("mug", &body);
        assert_eq!(s.volume, Some(880.0));
        assert_eq!(s.trend.len(), 1);
        assert_eq!(s.trend[0].label, "Oct 8");
    }

    #[test]
    fn empty_body_yields_empty_summary() {
        let s = normalize_insight("mug", &json!({}));
        assert_eq!(s.volume, None);
        assert_eq!(s.competition_score, None);
        assert!(s.trend.is_empty());
    }
}
