/// Integration tests for the store build and the dashboard queries
///
/// Run with: cargo test --test integration_tests -- --nocapture

use std::{fs, path::Path, path::PathBuf};

use traffic_store::{
    build_store, by_hour, by_location, low_speed, reconcile, HourFilter, LoadOptions,
    LocationFilter, ReconcileFilter, StoreError, TableStore,
};

const OBSERVED_HEADER: &str =
    "Anyo,Mes,Dia,hor,via,pk,sentido,velocidad_media,intensidad_total,intensidad_pesados";
const PREDICTED_HEADER: &str =
    "Anyo,Mes,Dia,hor,via,pk,vel_media_pred,vel_p10_pred,int_total_pred,int_pesados_pred,modelo";

fn write_inputs(dir: &Path, observed: &[&str], predicted: &[&str]) -> (PathBuf, PathBuf) {
    let obs = dir.join("geo_cal_vel.csv");
    let pred = dir.join("predictions.csv");
    fs::write(&obs, format!("{}\n{}\n", OBSERVED_HEADER, observed.join("\n"))).unwrap();
    fs::write(&pred, format!("{}\n{}\n", PREDICTED_HEADER, predicted.join("\n"))).unwrap();
    (obs, pred)
}

fn day_filter(hour: Option<u8>) -> ReconcileFilter {
    ReconcileFilter {
        year: 2023,
        month: 10,
        day: 6,
        via: "AP-7".to_string(),
        hour,
    }
}

fn sample_inputs(dir: &Path) -> (PathBuf, PathBuf) {
    write_inputs(
        dir,
        &[
            "2023,10,6,8,AP-7,12.5,-,70,0,0",
            "2023,10,6,8,AP-7,12.5,+,88,0,0",
            "2023,10,6,8,AP7,12.5,+,90,0,0",
            "2023,10,6,9,AP-7,12.5,+,75,0,0",
            "2023,10,6,8,AP-7,14.0,+,,,",
        ],
        &[
            "2023,10,6,9,AP-7,12.5,80,60,0,0,LSTM",
            "2023,10,6,8,AP-7,12.5,90,72,0,0,LSTM",
            "2023,10,6,8,AP-7,13.0,84,60,0,0,LSTM",
            "2023,10,6,8,AP-7,14.0,86,70,0,0,LSTM",
            "2023,10,7,8,AP-7,12.5,95,80,0,0,LSTM",
        ],
    )
}

#[test]
fn test_build_and_reconcile() {
    println!("\n=== Test: Build Store and Reconcile ===");
    let dir = tempfile::tempdir().unwrap();
    let (obs, pred) = sample_inputs(dir.path());
    let store_path = dir.path().join("maria_ap7.store.json");

    build_store(&obs, &pred, &store_path, &LoadOptions::default()).unwrap();
    let store = TableStore::open(&store_path).unwrap();
    assert_eq!(store.observed.len(), 5);
    assert_eq!(store.predicted.len(), 5);

    let rows = reconcile(&store, &day_filter(None));
    println!("✓ Reconciled {} rows", rows.len());

    // Left-preserving: one row per predicted row of 2023-10-06
    assert_eq!(rows.len(), 4);

    // Sorted by (pk, hour)
    let order: Vec<(f64, u8)> = rows.iter().map(|r| (r.key().pk, r.key().hour)).collect();
    assert_eq!(order, vec![(12.5, 8), (12.5, 9), (13.0, 8), (14.0, 8)]);

    // Best of 70 / 88 for a forecast of 90; the AP7-tagged 90 is not a candidate
    assert_eq!(rows[0].observed_speed_mean, Some(88.0));
    assert_eq!(rows[0].score, Some(2.0));

    // No observation at pk 13.0
    assert!(!rows[2].is_matched());
    assert_eq!(rows[2].observed_direction, None);

    // Observation with empty metrics still matches, scored against zeros
    assert_eq!(rows[3].observed_speed_mean, None);
    assert_eq!(rows[3].score, Some(86.0));
    println!("✓ Selection, ordering and unmatched rows correct");
}

#[test]
fn test_rebuild_is_byte_identical() {
    println!("\n=== Test: Idempotent Rebuild ===");
    let dir = tempfile::tempdir().unwrap();
    let (obs, pred) = sample_inputs(dir.path());
    let store_path = dir.path().join("store.json");

    build_store(&obs, &pred, &store_path, &LoadOptions::default()).unwrap();
    let first = fs::read(&store_path).unwrap();
    build_store(&obs, &pred, &store_path, &LoadOptions::default()).unwrap();
    let second = fs::read(&store_path).unwrap();

    assert_eq!(first, second, "rebuild should replace, not append");
    println!("✓ Two builds produced {} identical bytes", first.len());
}

#[test]
fn test_schema_mismatch_leaves_previous_store() {
    println!("\n=== Test: Schema Mismatch Aborts Load ===");
    let dir = tempfile::tempdir().unwrap();
    let (obs, pred) = sample_inputs(dir.path());
    let store_path = dir.path().join("store.json");
    build_store(&obs, &pred, &store_path, &LoadOptions::default()).unwrap();
    let before = fs::read(&store_path).unwrap();

    let broken = dir.path().join("broken.csv");
    fs::write(&broken, "Anyo,Mes,Dia,hor,via,pk\n2023,10,6,8,AP-7,12.5\n").unwrap();
    let err = build_store(&obs, &broken, &store_path, &LoadOptions::default()).unwrap_err();
    assert!(matches!(err, StoreError::SchemaMismatch { table: "predicted", .. }));

    assert_eq!(fs::read(&store_path).unwrap(), before, "failed load must not touch the store");
    assert!(!dir.path().join("store.json.lock").exists(), "lock should be released");
    println!("✓ {}", err);
}

#[test]
fn test_query_before_load_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let err = TableStore::open(&dir.path().join("never_built.json")).unwrap_err();
    assert!(matches!(err, StoreError::StoreUnavailable(_)));
}

#[test]
fn test_views_over_published_store() {
    println!("\n=== Test: Chart Views ===");
    let dir = tempfile::tempdir().unwrap();
    let (obs, pred) = sample_inputs(dir.path());
    let store_path = dir.path().join("store.json");
    let store = build_store(&obs, &pred, &store_path, &LoadOptions::default()).unwrap();

    let segments = by_location(
        &store,
        &LocationFilter { year: 2023, month: 10, day: 6, hour: 8, via: "AP-7".to_string() },
    );
    let pks: Vec<f64> = segments.iter().map(|r| r.pk).collect();
    assert_eq!(pks, vec![12.5, 13.0, 14.0]);
    println!("✓ {} segments at 08:00", segments.len());

    let hourly = by_hour(
        &store,
        &HourFilter { year: 2023, month: 10, day: 6, pk: 12.5, via: "AP-7".to_string() },
    );
    let hours: Vec<u8> = hourly.iter().map(|r| r.hour).collect();
    assert_eq!(hours, vec![8, 9]);
    assert_eq!(hourly[1].observed_speed_mean, Some(75.0));
    println!("✓ {} hours at pk 12.5", hourly.len());

    let slow = low_speed(&store);
    let speeds: Vec<f64> = slow.iter().map(|p| p.predicted_speed_mean).collect();
    assert_eq!(speeds, vec![84.0, 80.0]);
    println!("✓ Low-speed table has {} rows", slow.len());
}

#[test]
fn test_reconcile_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let (obs, pred) = write_inputs(
        dir.path(),
        &[
            "2023,10,6,8,AP-7,1.0,a,85,0,0",
            "2023,10,6,8,AP-7,1.0,b,95,0,0",
            "2023,10,6,8,AP-7,1.0,c,95,0,0",
        ],
        &["2023,10,6,8,AP-7,1.0,90,70,0,0,LSTM"],
    );
    let store_path = dir.path().join("store.json");
    let store = build_store(&obs, &pred, &store_path, &LoadOptions::default()).unwrap();

    let first = reconcile(&store, &day_filter(Some(8)));
    for _ in 0..5 {
        assert_eq!(reconcile(&store, &day_filter(Some(8))), first);
    }
    assert_eq!(first[0].observed_direction.as_deref(), Some("a"));
}

#[test]
fn test_full_precision_values_survive_publish() {
    println!("\n=== Test: Full-Precision Round Trip ===");
    let dir = tempfile::tempdir().unwrap();
    let (obs, pred) = write_inputs(
        dir.path(),
        &["2023,10,6,8,AP-7,12.345678901234567,+,87.12345678901234,1234.5678901234567,0.30000000000000004"],
        &["2023,10,6,8,AP-7,12.345678901234567,87.12345678901234,0.30000000000000004,1234.5678901234567,0.1,LSTM"],
    );
    let store_path = dir.path().join("store.json");
    let built = build_store(&obs, &pred, &store_path, &LoadOptions::default()).unwrap();
    let reopened = TableStore::open(&store_path).unwrap();
    assert_eq!(built, reopened, "published floats must read back exactly");

    // pk as a query string would carry it
    let pk: f64 = "12.345678901234567".parse().unwrap();
    let hourly = by_hour(
        &reopened,
        &HourFilter { year: 2023, month: 10, day: 6, pk, via: "AP-7".to_string() },
    );
    assert_eq!(hourly.len(), 1);
    assert_eq!(hourly[0].predicted_intensity_total, 1234.5678901234567);
    assert_eq!(hourly[0].observed_speed_mean, Some(87.12345678901234));
    println!("✓ 17-digit values and pk survived publish/open");
}
