use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{path::PathBuf, sync::Arc};

use traffic_store::{
    by_hour, by_location, filter_options, low_speed, reconcile, summarize, FilterOptions,
    HourFilter, HourRow, LocationFilter, LocationRow, PredictedRecord, ReconcileFilter,
    ReconciledRecord, ReconciliationSummary, StoreError, TableRows, TableStore, TableSummary,
};

/// Rows shown by `GET /tables/:name` when no `limit` is given.
const DEFAULT_SAMPLE_ROWS: usize = 5;

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub store_path: Arc<PathBuf>,
    // swapped whole on reload; readers keep the snapshot they cloned
    store: Arc<RwLock<Option<Arc<TableStore>>>>,
}

impl AppState {
    pub fn new(store_path: PathBuf, store: Option<TableStore>) -> Self {
        Self {
            store_path: Arc::new(store_path),
            store: Arc::new(RwLock::new(store.map(Arc::new))),
        }
    }

    fn snapshot(&self) -> Result<Arc<TableStore>, ApiError> {
        self.store
            .read()
            .clone()
            .ok_or_else(|| error_response(StoreError::StoreUnavailable(self.store_path.to_path_buf())))
    }

    fn is_loaded(&self) -> bool {
        self.store.read().is_some()
    }
}

// ---------- Errors ----------

pub type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(e: StoreError) -> ApiError {
    let status = match &e {
        StoreError::StoreUnavailable(_) | StoreError::StoreBusy { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::UnknownTable(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!("request failed: {}", e);
    (status, Json(json!({ "error": e.to_string() })))
}

// ---------- Handlers ----------

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "store_loaded": state.is_loaded() }))
}

pub async fn tables(State(state): State<AppState>) -> Result<Json<Vec<TableSummary>>, ApiError> {
    Ok(Json(state.snapshot()?.summaries()))
}

#[derive(Debug, Default, Deserialize)]
pub struct SampleParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct TableDetail {
    #[serde(flatten)]
    pub summary: TableSummary,
    pub sample: TableRows,
}

pub async fn table(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<SampleParams>,
) -> Result<Json<TableDetail>, ApiError> {
    let store = state.snapshot()?;
    let summary = store.describe(&name).map_err(error_response)?;
    let limit = params.limit.unwrap_or(DEFAULT_SAMPLE_ROWS);
    let sample = store.sample(&name, limit).map_err(error_response)?;
    Ok(Json(TableDetail { summary, sample }))
}

pub async fn filters(State(state): State<AppState>) -> Result<Json<FilterOptions>, ApiError> {
    Ok(Json(filter_options(&*state.snapshot()?)))
}

#[derive(Serialize)]
pub struct ReconciliationOut {
    pub summary: ReconciliationSummary,
    pub rows: Vec<ReconciledRecord>,
}

pub async fn reconciliation(
    State(state): State<AppState>,
    Query(filter): Query<ReconcileFilter>,
) -> Result<Json<ReconciliationOut>, ApiError> {
    let store = state.snapshot()?;
    let rows = reconcile(&store, &filter);
    let summary = summarize(&rows);
    tracing::info!(
        "reconciliation {}-{:02}-{:02} via={} hour={:?}: {} rows, {} matched",
        filter.year, filter.month, filter.day, filter.via, filter.hour, summary.rows, summary.matched
    );
    Ok(Json(ReconciliationOut { summary, rows }))
}

pub async fn segments(
    State(state): State<AppState>,
    Query(filter): Query<LocationFilter>,
) -> Result<Json<Vec<LocationRow>>, ApiError> {
    let rows = by_location(&*state.snapshot()?, &filter);
    tracing::info!("segments hour={} via={}: {} rows", filter.hour, filter.via, rows.len());
    Ok(Json(rows))
}

pub async fn hourly(
    State(state): State<AppState>,
    Query(filter): Query<HourFilter>,
) -> Result<Json<Vec<HourRow>>, ApiError> {
    let rows = by_hour(&*state.snapshot()?, &filter);
    tracing::info!("hourly pk={} via={}: {} rows", filter.pk, filter.via, rows.len());
    Ok(Json(rows))
}

pub async fn low_speed_table(
    State(state): State<AppState>,
) -> Result<Json<Vec<PredictedRecord>>, ApiError> {
    let rows = low_speed(&*state.snapshot()?);
    tracing::info!("low-speed table: {} rows", rows.len());
    Ok(Json(rows))
}

/// Re-open the published store and swap it in. Parsing runs on the blocking
/// pool.
pub async fn reload(State(state): State<AppState>) -> Result<Json<Vec<TableSummary>>, ApiError> {
    let path = Arc::clone(&state.store_path);
    let store = tokio::task::spawn_blocking(move || TableStore::open(&path))
        .await
        .map_err(|e| {
            tracing::warn!("reload task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("reload task failed: {e}") })),
            )
        })?
        .map_err(error_response)?;
    let summaries = store.summaries();
    *state.store.write() = Some(Arc::new(store));
    tracing::info!("store reloaded from {}", state.store_path.display());
    Ok(Json(summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use traffic_store::{ObservedRecord, SegmentKey};

    fn key(hour: u8, pk: f64) -> SegmentKey {
        SegmentKey {
            year: 2023,
            month: 10,
            day: 6,
            hour,
            via: "AP-7".to_string(),
            pk,
        }
    }

    fn sample_store() -> TableStore {
        TableStore::new(
            vec![ObservedRecord {
                key: key(8, 12.5),
                direction: "+".to_string(),
                speed_mean: Some(88.0),
                intensity_total: Some(1000.0),
                intensity_heavy: Some(100.0),
            }],
            vec![
                PredictedRecord {
                    key: key(8, 12.5),
                    predicted_speed_mean: 90.0,
                    predicted_speed_p10: 70.0,
                    predicted_intensity_total: 1000.0,
                    predicted_intensity_heavy: 100.0,
                },
                PredictedRecord {
                    key: key(8, 13.0),
                    predicted_speed_mean: 80.0,
                    predicted_speed_p10: 60.0,
                    predicted_intensity_total: 900.0,
                    predicted_intensity_heavy: 90.0,
                },
            ],
        )
    }

    fn filter() -> ReconcileFilter {
        ReconcileFilter {
            year: 2023,
            month: 10,
            day: 6,
            via: "AP-7".to_string(),
            hour: Some(8),
        }
    }

    #[tokio::test]
    async fn test_unloaded_store_is_503() {
        let state = AppState::new(PathBuf::from("missing.json"), None);
        let err = reconciliation(State(state.clone()), Query(filter())).await.err().unwrap();
        assert_eq!(err.0, StatusCode::SERVICE_UNAVAILABLE);
        let Json(body) = health(State(state)).await;
        assert_eq!(body["store_loaded"], false);
    }

    #[tokio::test]
    async fn test_reconciliation_payload() {
        let state = AppState::new(PathBuf::from("unused.json"), Some(sample_store()));
        let Json(out) = reconciliation(State(state), Query(filter())).await.unwrap();
        assert_eq!(out.summary.rows, 2);
        assert_eq!(out.summary.matched, 1);
        assert_eq!(out.rows[0].score, Some(2.0));
        assert_eq!(out.rows[1].observed_speed_mean, None);
    }

    #[tokio::test]
    async fn test_unknown_table_is_404() {
        let state = AppState::new(PathBuf::from("unused.json"), Some(sample_store()));
        let err = table(State(state.clone()), Path("geo".to_string()), Query(SampleParams::default()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        let Json(detail) = table(State(state), Path("predicted".to_string()), Query(SampleParams::default()))
            .await
            .unwrap();
        assert_eq!(detail.summary.rows, 2);
    }

    #[tokio::test]
    async fn test_table_sample_honours_limit() {
        let state = AppState::new(PathBuf::from("unused.json"), Some(sample_store()));

        let Json(detail) = table(State(state.clone()), Path("predicted".to_string()), Query(SampleParams::default()))
            .await
            .unwrap();
        assert_eq!(detail.sample.len(), 2, "default sample caps at the table size");

        let Json(detail) = table(
            State(state),
            Path("predicted".to_string()),
            Query(SampleParams { limit: Some(1) }),
        )
        .await
        .unwrap();
        let body = serde_json::to_value(&detail).unwrap();
        assert_eq!(body["name"], "predicted");
        assert_eq!(body["rows"], 2);
        assert_eq!(body["sample"].as_array().unwrap().len(), 1);
        assert_eq!(body["sample"][0]["predicted_speed_mean"], 90.0);
    }

    #[tokio::test]
    async fn test_reload_swaps_in_published_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let state = AppState::new(path.clone(), None);

        let err = reload(State(state.clone())).await.err().unwrap();
        assert_eq!(err.0, StatusCode::SERVICE_UNAVAILABLE);

        traffic_store::publish(&sample_store(), &path).unwrap();
        let Json(summaries) = reload(State(state.clone())).await.unwrap();
        assert_eq!(summaries.len(), 2);

        let Json(rows) = low_speed_table(State(state)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].predicted_speed_mean, 80.0);
    }
}
