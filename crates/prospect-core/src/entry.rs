//! Result entries — one product found by a research session.
//!
//! Provider payloads are heterogeneous: the same concept (a price, a keyword,
//! a trend series) arrives in several shapes. The typed fields below cover
//! everything the engine itself reasons about; every unrecognized field is
//! preserved verbatim in `extra` so nothing is lost across a cache round-trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionId;

/// How many leading entries the structural-completeness probe samples.
const COMPLETENESS_PROBE_LEN: usize = 10;

/// An id that providers send either as a number or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Num(i64),
    Str(String),
}

impl std::fmt::Display for IdValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdValue::Num(n) => write!(f, "{n}"),
            IdValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Nested price object: `{amount, divisor, currency_code}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceParts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divisor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
}

/// Session metadata stamped onto cached entries so aggregated views can
/// attribute a product back to its originating session without a lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionAnnotation {
    pub session_id: SessionId,
    pub keyword: String,
    pub created_at: String,
    pub products_count: u64,
}

/// One product record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<IdValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<f64>,

    // Price representations, most preferred first when deriving a sort value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_subtotal_after_discount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_price_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_price_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceParts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_divisor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_display: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_applied_promotion_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_promotion_description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<String>,
    /// Keywords may be bare strings or rich objects; normalized lazily via
    /// [`crate::keyword`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyword_insights: Vec<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_variations: Option<bool>,

    // Cache annotation (present only on entries that went through the cache).
    #[serde(rename = "__session_id", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(rename = "__session_keyword", default, skip_serializing_if = "Option::is_none")]
    pub session_keyword: Option<String>,
    #[serde(rename = "__session_created_at", default, skip_serializing_if = "Option::is_none")]
    pub session_created_at: Option<String>,
    #[serde(rename = "__session_products_count", default, skip_serializing_if = "Option::is_none")]
    pub session_products_count: Option<u64>,

    /// Everything else the provider sent, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ResultEntry {
    /// Listing id as a string, for reopen-marker matching.
    pub fn listing_id_str(&self) -> Option<String> {
        self.listing_id.as_ref().map(ToString::to_string)
    }

    /// Stamp session metadata onto this entry. Idempotent: base fields are
    /// never touched, and re-annotating simply refreshes the stamp.
    pub fn annotate(&mut self, annotation: &SessionAnnotation) {
        self.session_id = Some(annotation.session_id.clone());
        self.session_keyword = Some(annotation.keyword.clone());
        self.session_created_at = Some(annotation.created_at.clone());
        self.session_products_count = Some(annotation.products_count);
    }

    pub fn is_annotated(&self) -> bool {
        self.session_id.is_some()
    }

    /// True when the entry has variations, either listed or flagged.
    pub fn has_any_variations(&self) -> bool {
        !self.variations.is_empty() || self.has_variations.unwrap_or(false)
    }

    /// `{amount, divisor}` pair from the nested price object or the flat
    /// fields, guarding a zero divisor.
    pub fn amount_divisor(&self) -> Option<(f64, f64)> {
        let (amount, divisor) = match &self.price {
            Some(p) if p.amount.is_some() && p.divisor.is_some() => (p.amount, p.divisor),
            _ => (self.price_amount, self.price_divisor),
        };
        match (amount, divisor) {
            (Some(a), Some(d)) if d != 0.0 => Some((a, d)),
            _ => None,
        }
    }

    /// Base (pre-sale) numeric price: `{amount, divisor}` first, then the
    /// flat numeric value.
    pub fn base_price_value(&self) -> Option<f64> {
        if let Some((amount, divisor)) = self.amount_divisor() {
            return Some(amount / divisor);
        }
        self.price_value.filter(|v| v.is_finite())
    }

    /// Preferred promotion description, whichever variant the provider sent.
    pub fn promotion_description(&self) -> Option<&str> {
        self.buyer_applied_promotion_description
            .as_deref()
            .or(self.buyer_promotion_description.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// True when the entry carries at least one recognized price
    /// representation in its flat fields.
    pub fn has_price_shape(&self) -> bool {
        let has_display = self
            .price_display
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        let has_amount_div = matches!(
            (self.price_amount, self.price_divisor),
            (Some(_), Some(d)) if d != 0.0
        );
        let has_value = self.price_value.is_some_and(f64::is_finite);
        has_display || has_amount_div || has_value
    }
}

/// Numeric price for ranking, preferring sale representations:
/// sale-subtotal string, then numeric sale price, then numeric base price,
/// then the `{amount, divisor}` pair.
pub fn price_of(entry: &ResultEntry) -> Option<f64> {
    if let Some(sub) = entry.sale_subtotal_after_discount.as_deref() {
        if let Some(v) = parse_money(sub) {
            return Some(v);
        }
    }
    if let Some(v) = entry.sale_price_value.filter(|v| v.is_finite()) {
        return Some(v);
    }
    if let Some(v) = entry.price_value.filter(|v| v.is_finite()) {
        return Some(v);
    }
    entry.amount_divisor().map(|(a, d)| a / d)
}

/// Parse a money string by stripping everything but digits and dots.
/// `"$10.17"` → `10.17`. Returns `None` for empty or non-finite results.
pub fn parse_money(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a display money string that may use a comma decimal separator:
/// `"10,17 €"` → `10.17`, `"1,234.50"` → `1234.5`.
pub fn parse_display_money(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = if cleaned.contains(',') && !cleaned.contains('.') {
        cleaned.replacen(',', ".", 1)
    } else {
        cleaned.replace(',', "")
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Extract a discount percentage from a promotion description like
/// `"20% off storewide"`.
pub fn promotion_percent(description: &str) -> Option<f64> {
    let bytes = description.as_bytes();
    let percent_at = description.find('%')?;
    // The number may be separated from the sign by whitespace ("12.5 %").
    let mut end = percent_at;
    while end > 0 && (bytes[end - 1] as char).is_ascii_whitespace() {
        end -= 1;
    }
    let mut start = end;
    while start > 0 {
        let c = bytes[start - 1] as char;
        if c.is_ascii_digit() || c == '.' {
            start -= 1;
        } else {
            break;
        }
    }
    if start == end {
        return None;
    }
    description[start..end]
        .trim_end_matches('.')
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Derived sale price: an explicit sale value when present, otherwise the
/// base price reduced by the promotion percentage.
pub fn sale_price_of(entry: &ResultEntry) -> Option<f64> {
    if let Some(display) = entry.sale_price_display.as_deref() {
        if let Some(v) = parse_display_money(display) {
            return Some(v);
        }
    }
    if let Some(v) = entry.sale_price_value.filter(|v| v.is_finite()) {
        return Some(v);
    }
    if let Some(sub) = entry.sale_subtotal_after_discount.as_deref() {
        if let Some(v) = parse_money(sub) {
            return Some(v);
        }
    }
    let base = entry.base_price_value()?;
    let pct = entry.promotion_description().and_then(promotion_percent)?;
    Some(base * (1.0 - pct / 100.0))
}

/// Format a numeric price as a display string, trimming a trailing `.00`
/// and appending the currency code when known. `10.0, "USD"` → `"10 USD"`.
pub fn format_money(value: f64, currency: Option<&str>) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let mut num = format!("{rounded:.2}");
    if let Some(stripped) = num.strip_suffix(".00") {
        num = stripped.to_string();
    }
    match currency.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => format!("{num} {code}"),
        None => num,
    }
}

/// Sample the first few entries for recognized price shapes. True when any
/// sampled entry carries none — a signal that the cache predates the fields
/// the current renderer needs and should be silently revalidated.
pub fn looks_structurally_incomplete(entries: &[ResultEntry]) -> bool {
    entries
        .iter()
        .take(COMPLETENESS_PROBE_LEN)
        .any(|e| !e.has_price_shape())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_from(value: Value) -> ResultEntry {
        serde_json::from_value(value).unwrap()
    }

    // --- Price normalization ---

    #[test]
    fn price_prefers_sale_subtotal_string() {
        let e = entry_from(json!({
            "sale_subtotal_after_discount": "$10.17",
            "sale_price_value": 12.0,
            "price_value": 15.0
        }));
        assert_eq!(price_of(&e), Some(10.17));
    }

    #[test]
    fn price_falls_back_through_representations() {
        let e = entry_from(json!({"sale_price_value": 12.5, "price_value": 15.0}));
        assert_eq!(price_of(&e), Some(12.5));

        let e = entry_from(json!({"price_value": 15.0}));
        assert_eq!(price_of(&e), Some(15.0));

        let e = entry_from(json!({"price": {"amount": 1050, "divisor": 100}}));
        assert_eq!(price_of(&e), Some(10.5));

        let e = entry_from(json!({"title": "no price"}));
        assert_eq!(price_of(&e), None);
    }

    #[test]
    fn price_guards_zero_divisor() {
        let e = entry_from(json!({"price": {"amount": 1050, "divisor": 0}}));
        assert_eq!(price_of(&e), None);
    }

    #[test]
    fn price_uses_flat_amount_divisor_when_object_absent() {
        let e = entry_from(json!({"price_amount": 900, "price_divisor": 100}));
        assert_eq!(price_of(&e), Some(9.0));
    }

    #[test]
    fn parse_money_strips_symbols() {
        assert_eq!(parse_money("$10.17"), Some(10.17));
        assert_eq!(parse_money("USD 5"), Some(5.0));
        assert_eq!(parse_money("—"), None);
        assert_eq!(parse_money(""), None);
    }

    #[test]
    fn parse_display_money_handles_comma_decimal() {
        assert_eq!(parse_display_money("10,17 €"), Some(10.17));
        assert_eq!(parse_display_money("1,234.50"), Some(1234.5));
        assert_eq!(parse_display_money("$8.99"), Some(8.99));
        assert_eq!(parse_display_money("n/a"), None);
    }

    // --- Sale derivation ---

    #[test]
    fn sale_from_promotion_percent() {
        let e = entry_from(json!({
            "price_value": 20.0,
            "buyer_applied_promotion_description": "Save 25% on everything"
        }));
        let v = sale_price_of(&e).unwrap();
        assert!((v - 15.0).abs() < 1e-9);
    }

    #[test]
    fn sale_prefers_explicit_display() {
        let e = entry_from(json!({
            "sale_price_display": "7,50",
            "price_value": 20.0,
            "buyer_promotion_description": "50% off"
        }));
        assert_eq!(sale_price_of(&e), Some(7.5));
    }

    #[test]
    fn sale_absent_without_signal() {
        let e = entry_from(json!({"price_value": 20.0}));
        assert_eq!(sale_price_of(&e), None);
    }

    #[test]
    fn promotion_percent_parsing() {
        assert_eq!(promotion_percent("20% off"), Some(20.0));
        assert_eq!(promotion_percent("save 12.5 % today"), Some(12.5));
        assert_eq!(promotion_percent("no discount"), None);
        assert_eq!(promotion_percent("% alone"), None);
    }

    #[test]
    fn format_money_trims_trailing_zeroes() {
        assert_eq!(format_money(10.0, Some("USD")), "10 USD");
        assert_eq!(format_money(10.171, None), "10.17");
        assert_eq!(format_money(9.5, Some("")), "9.50");
    }

    // --- Annotation ---

    #[test]
    fn annotate_is_idempotent() {
        let mut e = entry_from(json!({"listing_id": 42, "title": "Mug", "price_value": 3.0}));
        let ann = SessionAnnotation {
            session_id: "s1".into(),
            keyword: "mug".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            products_count: 10,
        };
        e.annotate(&ann);
        let first = e.clone();
        e.annotate(&ann);
        assert_eq!(e, first);
        assert_eq!(e.title.as_deref(), Some("Mug"));
        assert_eq!(e.session_id.as_deref(), Some("s1"));
        assert_eq!(e.session_products_count, Some(10));
    }

    #[test]
    fn annotation_survives_serde_round_trip() {
        let mut e = entry_from(json!({"listing_id": "L9", "views": 120, "shop": {"shop_id": 5}}));
        e.annotate(&SessionAnnotation {
            session_id: "s2".into(),
            keyword: "poster".into(),
            created_at: "2026-02-02T00:00:00Z".into(),
            products_count: 3,
        });
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["__session_id"], "s2");
        // Unrecognized provider fields ride along untouched.
        assert_eq!(json["views"], 120);
        assert_eq!(json["shop"]["shop_id"], 5);

        let back: ResultEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
        assert!(back.is_annotated());
    }

    #[test]
    fn listing_id_str_handles_both_shapes() {
        let e = entry_from(json!({"listing_id": 42}));
        assert_eq!(e.listing_id_str().as_deref(), Some("42"));
        let e = entry_from(json!({"listing_id": "abc"}));
        assert_eq!(e.listing_id_str().as_deref(), Some("abc"));
        let e = entry_from(json!({}));
        assert_eq!(e.listing_id_str(), None);
    }

    // --- Structural completeness probe ---

    #[test]
    fn probe_flags_entries_without_any_price_shape() {
        let good = entry_from(json!({"price_display": "10 USD"}));
        let bad = entry_from(json!({"title": "no price fields"}));
        assert!(!looks_structurally_incomplete(&[good.clone()]));
        assert!(looks_structurally_incomplete(&[good.clone(), bad.clone()]));
        assert!(looks_structurally_incomplete(&[bad]));
        assert!(!looks_structurally_incomplete(&[]));
    }

    #[test]
    fn probe_samples_only_leading_entries() {
        let good = entry_from(json!({"price_value": 1.0}));
        let bad = entry_from(json!({}));
        let mut list = vec![good; 10];
        list.push(bad);
        // The 11th entry is beyond the probe window.
        assert!(!looks_structurally_incomplete(&list));
    }

    #[test]
    fn has_variations_flag_or_list() {
        let e = entry_from(json!({"variations": [{"id": 1, "title": "Size"}]}));
        assert!(e.has_any_variations());
        let e = entry_from(json!({"has_variations": true}));
        assert!(e.has_any_variations());
        let e = entry_from(json!({}));
        assert!(!e.has_any_variations());
    }
}
