//! Metric derivation and stable sorting of result lists.
//!
//! Sorting affects rendering order only — stored data order is never
//! touched. Entries whose metric is missing or non-finite sort after every
//! valued entry, keeping their original relative order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::entry::{ResultEntry, price_of};

/// Which numeric ranking key to derive from an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMetric {
    Price,
    Demand,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Process-wide sort state. Defaults to demand, high → low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub metric: SortMetric,
    pub order: SortOrder,
}

impl Default for SortState {
    fn default() -> Self {
        Self {
            metric: SortMetric::Demand,
            order: SortOrder::Desc,
        }
    }
}

/// Derive the ranking value for an entry under a metric. `None` when the
/// entry carries no finite value for it.
pub fn metric_value(entry: &ResultEntry, metric: SortMetric) -> Option<f64> {
    match metric {
        SortMetric::Price => price_of(entry),
        SortMetric::Demand => entry.demand.filter(|v| v.is_finite()),
    }
}

/// Stable sort by metric. Does not mutate the input.
pub fn sort_entries(entries: &[ResultEntry], metric: SortMetric, order: SortOrder) -> Vec<ResultEntry> {
    let mut out = entries.to_vec();
    out.sort_by(|a, b| compare(metric_value(a, metric), metric_value(b, metric), order));
    out
}

/// Convenience wrapper taking a [`SortState`].
pub fn sort_with(entries: &[ResultEntry], state: SortState) -> Vec<ResultEntry> {
    sort_entries(entries, state.metric, state.order)
}

fn compare(a: Option<f64>, b: Option<f64>, order: SortOrder) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(va), Some(vb)) => {
            let ord = va.partial_cmp(&vb).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
