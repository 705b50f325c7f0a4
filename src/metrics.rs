use std::collections::BTreeMap;

use crate::aggregate::ReasonStats;
use crate::detector::ReasonCode;

/// Per-reason share of all violations, for report tables.
#[derive(Clone, Debug, PartialEq)]
pub struct ReasonShare {
    pub reason: ReasonCode,
    pub count: u64,
    pub distinct_entities: usize,
    pub share: f64,
}

/// Compute per-reason shares of total violations.
/// Sorted by count descending, ties broken by reason code.
pub fn reason_breakdown(reasons: &BTreeMap<ReasonCode, ReasonStats>) -> Vec<ReasonShare> {
    let total: u64 = reasons.values().map(|stats| stats.count).sum();
    let mut shares: Vec<ReasonShare> = reasons
        .iter()
        .map(|(reason, stats)| ReasonShare {
            reason: *reason,
            count: stats.count,
            distinct_entities: stats.entity_ids.len(),
            share: if total == 0 {
                0.0
            } else {
                stats.count as f64 / total as f64
            },
        })
        .collect();
    shares.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.reason.code().cmp(b.reason.code()))
    });
    shares
}
