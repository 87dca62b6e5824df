//! Pairing of forecast rows with their best-matching observation.

use std::collections::HashMap;

use serde::Deserialize;

use crate::{
    schema::{ObservedRecord, PredictedRecord, ReconciledRecord, RECONCILIATION_VIA},
    store::TableStore,
};

/// Selection applied to the predicted table.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileFilter {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub via: String,
    pub hour: Option<u8>,
}

impl ReconcileFilter {
    pub fn matches(&self, p: &PredictedRecord) -> bool {
        let k = &p.key;
        k.year == self.year
            && k.month == self.month
            && k.day == self.day
            && k.via == self.via
            && self.hour.map_or(true, |h| k.hour == h)
    }
}

/// Discrepancy between a forecast and one observation: the sum of absolute
/// differences of mean speed, heavy-vehicle intensity and total intensity.
///
/// Absent observed metrics are scored as zero. This is an approximation: an
/// observation with gaps looks closer than it is when the predicted values
/// are small. Callers see the raw observed `Option`s on the reconciled row.
pub fn discrepancy_score(p: &PredictedRecord, o: &ObservedRecord) -> f64 {
    (p.predicted_speed_mean - o.speed_mean.unwrap_or(0.0)).abs()
        + (p.predicted_intensity_heavy - o.intensity_heavy.unwrap_or(0.0)).abs()
        + (p.predicted_intensity_total - o.intensity_total.unwrap_or(0.0)).abs()
}

/// For every predicted row selected by `filter`, pick the observation with
/// the lowest discrepancy score among those sharing its
/// (year, month, day, hour, pk) and tagged with [`RECONCILIATION_VIA`].
///
/// Exactly one output row per selected predicted row. Ties go to the
/// observation that comes first in the observed table. Output is sorted by
/// pk, then hour.
pub fn reconcile(store: &TableStore, filter: &ReconcileFilter) -> Vec<ReconciledRecord> {
    let selected: Vec<&PredictedRecord> =
        store.predicted.iter().filter(|p| filter.matches(p)).collect();
    if selected.is_empty() {
        tracing::debug!("reconcile: no predicted rows for {:?}", filter);
        return Vec::new();
    }

    let candidates = index_candidates(&store.observed, &selected);

    let mut out: Vec<ReconciledRecord> = selected
        .into_iter()
        .map(|p| {
            let best = candidates
                .get(&p.key.join_bits())
                .and_then(|group| best_candidate(p, group));
            match best {
                Some((o, score)) => ReconciledRecord::matched(p.clone(), o, score),
                None => ReconciledRecord::unmatched(p.clone()),
            }
        })
        .collect();

    out.sort_by(|a, b| {
        a.key()
            .pk
            .total_cmp(&b.key().pk)
            .then_with(|| a.key().hour.cmp(&b.key().hour))
    });

    tracing::debug!(
        "reconcile: {} rows, {} matched",
        out.len(),
        out.iter().filter(|r| r.is_matched()).count()
    );
    out
}

type JoinKey = (i32, u8, u8, u8, u64);

/// Canonical-via observations grouped by join key, input order kept inside
/// each group. Only keys some selected prediction asks for are indexed.
fn index_candidates<'a>(
    observed: &'a [ObservedRecord],
    selected: &[&PredictedRecord],
) -> HashMap<JoinKey, Vec<&'a ObservedRecord>> {
    let mut groups: HashMap<JoinKey, Vec<&ObservedRecord>> = selected
        .iter()
        .map(|p| (p.key.join_bits(), Vec::new()))
        .collect();

    for o in observed.iter().filter(|o| o.key.via == RECONCILIATION_VIA) {
        if let Some(group) = groups.get_mut(&o.key.join_bits()) {
            group.push(o);
        }
    }
    groups
}

/// Minimum-score candidate; the first one wins on equal scores.
fn best_candidate<'a>(
    p: &PredictedRecord,
    group: &[&'a ObservedRecord],
) -> Option<(&'a ObservedRecord, f64)> {
    let mut best: Option<(&ObservedRecord, f64)> = None;
    for &o in group {
        let score = discrepancy_score(p, o);
        match best {
            Some((_, s)) if s <= score => {}
            _ => best = Some((o, score)),
        }
    }
    best
}
