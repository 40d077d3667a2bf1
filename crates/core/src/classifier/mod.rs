//! Hit aggregation: one verdict per algorithm family.

use std::collections::BTreeMap;

use crate::model::{Hit, KeySizeHint, QuantumSafety, Verdict};
use crate::signatures::SignatureDatabase;

/// Summed hit confidence that counts as full corroboration.
pub const CORROBORATION_SCALE: f64 = 2.0;

/// Group hits by family and classify each group. Infallible and deterministic.
pub fn classify(hits: &[Hit], db: &SignatureDatabase) -> Vec<Verdict> {
    let mut groups: BTreeMap<&'static str, Vec<&Hit>> = BTreeMap::new();
    for hit in hits {
        groups.entry(hit.family.as_str()).or_default().push(hit);
    }

    groups
        .into_values()
        .filter_map(|group| {
            let family = group.first()?.family;
            let status = group_status(&group, db);
            let total: f64 = group.iter().map(|h| h.confidence.max(0.0)).sum();
            let mut evidence: Vec<Hit> = group.iter().map(|h| (*h).clone()).collect();
            evidence.sort_by(|a, b| a.cmp_for_report(b));
            Some(Verdict {
                family,
                status,
                confidence: (total / CORROBORATION_SCALE).min(1.0),
                key_bits: narrowest_key_bits(&group),
                evidence,
                recommendation: family.recommendation().to_string(),
            })
        })
        .collect()
}

fn group_status(group: &[&Hit], db: &SignatureDatabase) -> QuantumSafety {
    let tag = |h: &&Hit| db.get(&h.signature_id).map(|s| s.safety).unwrap_or(QuantumSafety::Unknown);
    if group.iter().any(|h| tag(h) == QuantumSafety::ClassicalVulnerable) {
        QuantumSafety::ClassicalVulnerable
    } else if group.iter().any(|h| tag(h) == QuantumSafety::QuantumSafe) {
        QuantumSafety::QuantumSafe
    } else {
        QuantumSafety::Unknown
    }
}

fn narrowest_key_bits(group: &[&Hit]) -> Option<KeySizeHint> {
    group
        .iter()
        .filter_map(|h| h.key_bits.map(|k| (k, *h)))
        .min_by(|(ka, ha), (kb, hb)| {
            ka.width()
                .cmp(&kb.width())
                .then_with(|| hb.confidence.total_cmp(&ha.confidence))
                .then_with(|| ha.signature_id.cmp(&hb.signature_id))
        })
        .map(|(k, _)| k)
}
