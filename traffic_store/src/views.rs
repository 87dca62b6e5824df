//! Chart-ready projections over the reconciliation output and the
//! predicted table.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    reconcile::{reconcile, ReconcileFilter},
    schema::{pk_bits, PredictedRecord, ReconciledRecord, LOW_SPEED_THRESHOLD},
    store::TableStore,
};

// ---------- By location marker ----------

#[derive(Debug, Clone, Deserialize)]
pub struct LocationFilter {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub via: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRow {
    pub pk: f64,
    /// Reconciled rows averaged into this location marker.
    pub rows: usize,
    pub predicted_speed_mean: f64,
    pub predicted_speed_p10: f64,
    pub predicted_intensity_total: f64,
    pub predicted_intensity_heavy: f64,
    pub observed_speed_mean: Option<f64>,
    pub observed_intensity_total: Option<f64>,
    pub observed_intensity_heavy: Option<f64>,
    /// Mean score over the matched rows.
    pub score: Option<f64>,
}

/// One row per location marker for a fixed day, hour and road, in pk order.
/// Rows sharing a pk are averaged like [`by_hour`] does for hours.
pub fn by_location(store: &TableStore, filter: &LocationFilter) -> Vec<LocationRow> {
    let rf = ReconcileFilter {
        year: filter.year,
        month: filter.month,
        day: filter.day,
        via: filter.via.clone(),
        hour: Some(filter.hour),
    };

    // reconcile() sorts by pk, so equal markers are adjacent
    let mut out: Vec<LocationRow> = Vec::new();
    let mut current: Option<(f64, MetricAcc)> = None;
    for r in reconcile(store, &rf) {
        let pk = r.key().pk;
        if let Some((seen, acc)) = current.as_mut() {
            if pk_bits(*seen) == pk_bits(pk) {
                acc.push(&r);
                continue;
            }
        }
        if let Some((seen, acc)) = current.take() {
            out.push(acc.location_row(seen));
        }
        let mut acc = MetricAcc::default();
        acc.push(&r);
        current = Some((pk, acc));
    }
    if let Some((seen, acc)) = current {
        out.push(acc.location_row(seen));
    }
    out
}

// ---------- By hour ----------

#[derive(Debug, Clone, Deserialize)]
pub struct HourFilter {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub pk: f64,
    pub via: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourRow {
    pub hour: u8,
    /// Reconciled rows averaged into this hour.
    pub rows: usize,
    pub predicted_speed_mean: f64,
    pub predicted_speed_p10: f64,
    pub predicted_intensity_total: f64,
    pub predicted_intensity_heavy: f64,
    pub observed_speed_mean: Option<f64>,
    pub observed_intensity_total: Option<f64>,
    pub observed_intensity_heavy: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, v: Option<f64>) {
        if let Some(v) = v {
            self.sum += v;
            self.n += 1;
        }
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

/// Running means of one group of reconciled rows.
#[derive(Debug, Default)]
struct MetricAcc {
    rows: usize,
    pred: [Mean; 4],
    obs: [Mean; 3],
    score: Mean,
}

impl MetricAcc {
    fn push(&mut self, r: &ReconciledRecord) {
        let p = &r.predicted;
        self.rows += 1;
        self.pred[0].push(Some(p.predicted_speed_mean));
        self.pred[1].push(Some(p.predicted_speed_p10));
        self.pred[2].push(Some(p.predicted_intensity_total));
        self.pred[3].push(Some(p.predicted_intensity_heavy));
        self.obs[0].push(r.observed_speed_mean);
        self.obs[1].push(r.observed_intensity_total);
        self.obs[2].push(r.observed_intensity_heavy);
        self.score.push(r.score);
    }

    fn location_row(&self, pk: f64) -> LocationRow {
        LocationRow {
            pk,
            rows: self.rows,
            predicted_speed_mean: self.pred[0].get().unwrap_or_default(),
            predicted_speed_p10: self.pred[1].get().unwrap_or_default(),
            predicted_intensity_total: self.pred[2].get().unwrap_or_default(),
            predicted_intensity_heavy: self.pred[3].get().unwrap_or_default(),
            observed_speed_mean: self.obs[0].get(),
            observed_intensity_total: self.obs[1].get(),
            observed_intensity_heavy: self.obs[2].get(),
            score: self.score.get(),
        }
    }

    fn hour_row(&self, hour: u8) -> HourRow {
        HourRow {
            hour,
            rows: self.rows,
            predicted_speed_mean: self.pred[0].get().unwrap_or_default(),
            predicted_speed_p10: self.pred[1].get().unwrap_or_default(),
            predicted_intensity_total: self.pred[2].get().unwrap_or_default(),
            predicted_intensity_heavy: self.pred[3].get().unwrap_or_default(),
            observed_speed_mean: self.obs[0].get(),
            observed_intensity_total: self.obs[1].get(),
            observed_intensity_heavy: self.obs[2].get(),
        }
    }
}

/// One row per hour for a fixed day, location marker and road, ascending by
/// hour. Rows sharing an hour are averaged; observed averages only count
/// present values.
pub fn by_hour(store: &TableStore, filter: &HourFilter) -> Vec<HourRow> {
    let rf = ReconcileFilter {
        year: filter.year,
        month: filter.month,
        day: filter.day,
        via: filter.via.clone(),
        hour: None,
    };
    let target = pk_bits(filter.pk);

    let mut hours: BTreeMap<u8, MetricAcc> = BTreeMap::new();
    for r in reconcile(store, &rf).iter().filter(|r| pk_bits(r.key().pk) == target) {
        hours.entry(r.key().hour).or_default().push(r);
    }

    hours
        .into_iter()
        .map(|(hour, acc)| acc.hour_row(hour))
        .collect()
}

// ---------- Low-speed table ----------

/// Predicted rows at or below [`LOW_SPEED_THRESHOLD`], sorted by full key.
pub fn low_speed(store: &TableStore) -> Vec<PredictedRecord> {
    low_speed_at(store, LOW_SPEED_THRESHOLD)
}

pub fn low_speed_at(store: &TableStore, threshold: f64) -> Vec<PredictedRecord> {
    let mut rows: Vec<PredictedRecord> = store
        .predicted
        .iter()
        .filter(|p| p.predicted_speed_mean <= threshold)
        .cloned()
        .collect();
    rows.sort_by(|a, b| a.key.cmp_full(&b.key));
    rows
}

// ---------- Filter options ----------

/// Distinct values the dashboard offers in its filter widgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub years: Vec<i32>,
    pub vias: Vec<String>,
    pub hours: Vec<u8>,
}

pub fn filter_options(store: &TableStore) -> FilterOptions {
    let mut years = BTreeSet::new();
    let mut vias = BTreeSet::new();
    let mut hours = BTreeSet::new();
    for p in &store.predicted {
        years.insert(p.key.year);
        vias.insert(p.key.via.as_str());
        hours.insert(p.key.hour);
    }
    FilterOptions {
        years: years.into_iter().collect(),
        vias: vias.into_iter().map(str::to_string).collect(),
        hours: hours.into_iter().collect(),
    }
}

// ---------- Summary ----------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationSummary {
    pub rows: usize,
    pub matched: usize,
    /// Mean discrepancy score over matched rows.
    pub mean_score: Option<f64>,
    /// Mean |predicted - observed| speed over rows with an observed speed.
    pub mean_abs_speed_error: Option<f64>,
}

pub fn summarize(rows: &[ReconciledRecord]) -> ReconciliationSummary {
    let mut score = Mean::default();
    let mut speed_err = Mean::default();
    for r in rows {
        score.push(r.score);
        speed_err.push(
            r.observed_speed_mean
                .map(|o| (r.predicted.predicted_speed_mean - o).abs()),
        );
    }
    ReconciliationSummary {
        rows: rows.len(),
        matched: score.n,
        mean_score: score.get(),
        mean_abs_speed_error: speed_err.get(),
    }
}
