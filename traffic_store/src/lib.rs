//! Table store and queries behind the AP-7 traffic forecast dashboard.
//!
//! Two CSV inputs (observed measurements and model forecasts) are loaded into
//! a [`TableStore`], published to disk, and queried through [`reconcile`] and
//! the projections in [`views`].

pub mod config;
pub mod error;
pub mod loader;
pub mod reconcile;
pub mod schema;
pub mod store;
pub mod views;

pub use config::AppConfig;
pub use error::{Result, StoreError};
pub use loader::{load_observed, load_predicted, LoadOptions};
pub use reconcile::{discrepancy_score, reconcile, ReconcileFilter};
pub use schema::{
    ObservedRecord, PredictedRecord, ReconciledRecord, SegmentKey, LOW_SPEED_THRESHOLD,
    RECONCILIATION_VIA,
};
pub use store::{build_store, publish, TableRows, TableStore, TableSummary};
pub use views::{
    by_hour, by_location, filter_options, low_speed, low_speed_at, summarize, FilterOptions,
    HourFilter, HourRow, LocationFilter, LocationRow, ReconciliationSummary,
};
