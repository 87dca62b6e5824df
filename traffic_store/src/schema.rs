use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Road tag the observed side must carry to take part in reconciliation.
///
/// Only the observed table is restricted to it; predicted rows are matched
/// whatever their own `via` is. The observed dataset carries several tag
/// variants for the same carriageway and only this one is authoritative.
pub const RECONCILIATION_VIA: &str = "AP-7";

/// Predicted mean speed (km/h) at or below which a row lands in the
/// low-speed table.
pub const LOW_SPEED_THRESHOLD: f64 = 85.0;

pub const OBSERVED_TABLE: &str = "observed";
pub const PREDICTED_TABLE: &str = "predicted";

/// Header names of the observed file, kept as-is in the store.
pub mod observed_columns {
    pub const YEAR: &str = "Anyo";
    pub const MONTH: &str = "Mes";
    pub const DAY: &str = "Dia";
    pub const HOUR: &str = "hor";
    pub const VIA: &str = "via";
    pub const PK: &str = "pk";
    pub const DIRECTION: &str = "sentido";
    pub const SPEED_MEAN: &str = "velocidad_media";
    pub const INTENSITY_TOTAL: &str = "intensidad_total";
    pub const INTENSITY_HEAVY: &str = "intensidad_pesados";

    pub const ALL: [&str; 10] = [
        YEAR,
        MONTH,
        DAY,
        HOUR,
        VIA,
        PK,
        DIRECTION,
        SPEED_MEAN,
        INTENSITY_TOTAL,
        INTENSITY_HEAVY,
    ];
}

/// Allowlist of forecast-file columns as (source header, table column).
/// Anything not listed here is dropped on load.
pub const PREDICTED_COLUMN_MAP: [(&str, &str); 10] = [
    ("Anyo", "year"),
    ("Mes", "month"),
    ("Dia", "day"),
    ("hor", "hour"),
    ("via", "via"),
    ("pk", "pk"),
    ("vel_media_pred", "predicted_speed_mean"),
    ("vel_p10_pred", "predicted_speed_p10"),
    ("int_total_pred", "predicted_intensity_total"),
    ("int_pesados_pred", "predicted_intensity_heavy"),
];

/// Join key shared by both tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentKey {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub via: String,
    /// Location marker, kilometre post along the road.
    pub pk: f64,
}

impl SegmentKey {
    /// Key fields the reconciliation join compares, `via` excluded.
    pub(crate) fn join_bits(&self) -> (i32, u8, u8, u8, u64) {
        (self.year, self.month, self.day, self.hour, pk_bits(self.pk))
    }

    /// Full ordering: year, month, day, hour, via, pk.
    pub fn cmp_full(&self, other: &Self) -> Ordering {
        (self.year, self.month, self.day, self.hour)
            .cmp(&(other.year, other.month, other.day, other.hour))
            .then_with(|| self.via.cmp(&other.via))
            .then_with(|| self.pk.total_cmp(&other.pk))
    }
}

impl PartialEq for SegmentKey {
    fn eq(&self, other: &Self) -> bool {
        self.join_bits() == other.join_bits() && self.via == other.via
    }
}

/// Hashable form of a pk; `-0.0` and `0.0` collapse.
pub(crate) fn pk_bits(pk: f64) -> u64 {
    if pk == 0.0 {
        0
    } else {
        pk.to_bits()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedRecord {
    #[serde(flatten)]
    pub key: SegmentKey,
    pub direction: String, // lane / carriageway indicator
    pub speed_mean: Option<f64>,      // km/h
    pub intensity_total: Option<f64>, // vehicles/h
    pub intensity_heavy: Option<f64>, // heavy vehicles/h
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedRecord {
    #[serde(flatten)]
    pub key: SegmentKey,
    pub predicted_speed_mean: f64,
    pub predicted_speed_p10: f64,
    pub predicted_intensity_total: f64,
    pub predicted_intensity_heavy: f64,
}

/// A predicted row paired with at most one observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledRecord {
    #[serde(flatten)]
    pub predicted: PredictedRecord,
    pub observed_direction: Option<String>,
    pub observed_speed_mean: Option<f64>,
    pub observed_intensity_total: Option<f64>,
    pub observed_intensity_heavy: Option<f64>,
    /// Discrepancy score of the selected observation; `None` when unmatched.
    pub score: Option<f64>,
}

impl ReconciledRecord {
    pub fn unmatched(predicted: PredictedRecord) -> Self {
        Self {
            predicted,
            observed_direction: None,
            observed_speed_mean: None,
            observed_intensity_total: None,
            observed_intensity_heavy: None,
            score: None,
        }
    }

    pub fn matched(predicted: PredictedRecord, observed: &ObservedRecord, score: f64) -> Self {
        Self {
            predicted,
            observed_direction: Some(observed.direction.clone()),
            observed_speed_mean: observed.speed_mean,
            observed_intensity_total: observed.intensity_total,
            observed_intensity_heavy: observed.intensity_heavy,
            score: Some(score),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.score.is_some()
    }

    pub fn key(&self) -> &SegmentKey {
        &self.predicted.key
    }
}
