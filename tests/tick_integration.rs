use epiwatch::data::{load_snapshot, SNAPSHOT_COLUMNS};
use epiwatch::engine::Simulation;
use epiwatch::error::SimError;
use epiwatch::feed::telemetry::{LiveStatus, PodFileSource};
use epiwatch::models::{
    ModelBundle, ANOMALY_FILE, FEATURE_COLUMNS, FEATURE_SCALER_FILE, FORECASTER_FILE, FORECAST_COLUMNS,
    ANOMALY_COLUMNS, RISK_SCALER_FILE,
};
use epiwatch::records::ZoneSummary;
use epiwatch::risk::ScoringConfig;
use epiwatch::store::SeriesStore;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CITIES: [(&str, f64, f64); 3] = [("Pune", 18.52, 73.85), ("Delhi", 28.61, 77.21), ("Kochi", 9.93, 76.27)];

fn write_snapshot(path: &Path) {
    let mut out = SNAPSHOT_COLUMNS.join(",");
    out.push('\n');
    for day in 1..=3 {
        for (i, (city, lat, lng)) in CITIES.iter().enumerate() {
            let adm = 10 + 5 * i + day;
            out.push_str(&format!(
                "{city},2024-03-0{day},{lat},{lng},{adm},0.6,4.0,10.0,7.5,{temp},{adm},{adm},0,0,5.7,0.8,0.4,0.6,10,30,False,0.1,40,Low-Mod\n",
                temp = 26.0 + i as f64,
            ));
        }
    }
    fs::write(path, out).unwrap();
}

fn stump(threshold: f64, left: f64, right: f64) -> serde_json::Value {
    json!({
        "children_left": [1, -1, -1],
        "children_right": [2, -1, -1],
        "feature": [0, -2, -2],
        "threshold": [threshold, -2.0, -2.0],
        "value": [0.0, left, right],
        "n_node_samples": [256, 250, 6]
    })
}

fn write_models(dir: &Path) {
    let artifacts = [
        (
            FEATURE_SCALER_FILE,
            json!({
                "feature_names": FEATURE_COLUMNS,
                "data_min": [0.0, 0.0, -50.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                "data_max": [200.0, 200.0, 50.0, 2.0, 50.0, 1.0, 1.0, 1.0, 1.0]
            }),
        ),
        (
            RISK_SCALER_FILE,
            json!({
                "feature_names": ["raw_risk_score"],
                "data_min": [0.0],
                "data_max": [100.0],
                "feature_range": [0.0, 100.0]
            }),
        ),
        (FORECASTER_FILE, json!({ "feature_names": FORECAST_COLUMNS, "trees": [stump(0.5, 8.0, 60.0)] })),
        (
            ANOMALY_FILE,
            json!({
                "feature_names": ANOMALY_COLUMNS,
                "max_samples": 256,
                "offset": -0.5,
                "trees": [stump(500.0, 0.0, 0.0)]
            }),
        ),
    ];
    for (name, body) in artifacts {
        fs::write(dir.join(name), body.to_string()).unwrap();
    }
}

struct Fixture {
    _dir: TempDir,
    store: SeriesStore,
    bundle: ModelBundle,
}

fn fixture(zones: Vec<ZoneSummary>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("merged_features.csv");
    write_snapshot(&snapshot);
    let models = dir.path().join("models");
    fs::create_dir_all(&models).unwrap();
    write_models(&models);

    let store = SeriesStore::from_records(load_snapshot(&snapshot).unwrap(), zones).unwrap();
    let bundle = ModelBundle::load(&models).unwrap();
    Fixture { _dir: dir, store, bundle }
}

#[test]
fn two_ticks_add_two_distinct_days() {
    let fx = fixture(Vec::new());
    let start = fx.store.latest_date().unwrap();
    let sim = Simulation::new(fx.store, Some(fx.bundle), ScoringConfig::default());
    let rows_before = sim.snapshot().row_count();

    let first = sim.advance_all_cities().unwrap();
    let second = sim.advance_all_cities().unwrap();

    assert_eq!(first.status, "simulation updated");
    assert_eq!(first.rows_added, CITIES.len());
    assert_eq!(second.rows_added, CITIES.len());
    assert_eq!(first.current_date, start.succ_opt().unwrap());
    assert_eq!(second.current_date, first.current_date.succ_opt().unwrap());
    assert_eq!(sim.snapshot().row_count(), rows_before + 2 * CITIES.len());
    assert_eq!(sim.latest_risk().len(), CITIES.len());
    assert!(sim.last_updated().is_some());
    assert_eq!(sim.sim_state().len(), CITIES.len());
}

#[test]
fn failed_tick_leaves_row_count() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.csv");
    fs::write(&path, format!("{}\n", SNAPSHOT_COLUMNS.join(","))).unwrap();
    let store = SeriesStore::from_records(load_snapshot(&path).unwrap(), Vec::new()).unwrap();
    let sim = Simulation::new(store, None, ScoringConfig::default());

    assert!(matches!(sim.advance_all_cities(), Err(SimError::Data(_))));
    assert_eq!(sim.snapshot().row_count(), 0);
    assert!(sim.latest_risk().is_empty());
}

#[test]
fn fresh_simulations_replay_identically() {
    let a = fixture(Vec::new());
    let b = fixture(Vec::new());
    let sim_a = Simulation::new(a.store, Some(a.bundle), ScoringConfig::default());
    let sim_b = Simulation::new(b.store, Some(b.bundle), ScoringConfig::default());

    for _ in 0..6 {
        sim_a.advance_all_cities().unwrap();
        sim_b.advance_all_cities().unwrap();
        assert_eq!(sim_a.snapshot().fingerprint(), sim_b.snapshot().fingerprint());
    }
    assert_eq!(sim_a.sim_state(), sim_b.sim_state());
    assert_eq!(sim_a.merged_series(), sim_b.merged_series());
}

#[test]
fn boosted_scores_stay_in_range() {
    let fx = fixture(Vec::new());
    let sim = Simulation::new(fx.store, Some(fx.bundle), ScoringConfig::default());
    for _ in 0..10 {
        sim.advance_all_cities().unwrap();
        for row in sim.latest_risk() {
            assert!((0.0..=100.0).contains(&row.risk_score), "{} {}", row.city, row.risk_score);
        }
    }
    // three cities, three spotlight slots
    assert!(sim.latest_risk().iter().all(|r| r.risk_score >= 88.0));
}

#[test]
fn zones_follow_matching_cities() {
    let zones = vec![
        ZoneSummary { zone_id: "Pune".into(), centroid_lat: 18.5, centroid_lng: 73.8, avg_risk: 0.0, size: 3 },
        ZoneSummary { zone_id: "Z-west".into(), centroid_lat: 19.0, centroid_lng: 72.8, avg_risk: 5.0, size: 2 },
    ];
    let fx = fixture(zones);
    let sim = Simulation::new(fx.store, Some(fx.bundle), ScoringConfig::default());
    sim.advance_all_cities().unwrap();

    let pune = sim.latest_risk().into_iter().find(|r| r.city == "Pune").unwrap();
    let zones = sim.zones();
    assert_eq!(zones[0].avg_risk, pune.risk_score);
    assert_eq!(zones[1].avg_risk, 5.0);
}

#[test]
fn missing_models_degrade_to_carry_over() {
    let fx = fixture(Vec::new());
    let empty = TempDir::new().unwrap();
    assert!(matches!(ModelBundle::load(empty.path()), Err(SimError::Configuration(_))));

    let before: Vec<f64> = fx.store.latest_rows().iter().map(|r| r.risk_score).collect();
    let sim = Simulation::new(fx.store, None, ScoringConfig::default());
    assert!(!sim.scoring_enabled());
    sim.advance_all_cities().unwrap();
    let after: Vec<f64> = sim.snapshot().latest_rows().iter().map(|r| r.risk_score).collect();
    assert_eq!(before, after);
}

#[test]
fn pod_file_overrides_environment() {
    let fx = fixture(Vec::new());
    let pod = fx._dir.path().join("live_pod.csv");
    fs::write(&pod, "date,temperature,humidity,moisture,rainfall\n2024-03-04T08:00:00,29.0,75.0,41.0,2.0\n").unwrap();

    let sim = Simulation::new(fx.store, None, ScoringConfig::default())
        .with_telemetry(Box::new(PodFileSource::new(&pod)));
    sim.advance_all_cities().unwrap();
    for row in sim.snapshot().latest_rows() {
        assert!((row.humidity_index - 0.75).abs() < 1e-12);
        assert!((row.rainfall_index - 0.2).abs() < 1e-12);
        assert!((row.environmental_risk_index - 0.475).abs() < 1e-12);
    }
}

#[test]
fn nan_pod_reading_never_reaches_scores() {
    let fx = fixture(Vec::new());
    let pod = fx._dir.path().join("live_pod.csv");
    fs::write(&pod, "date,temperature,humidity,moisture,rainfall\n2024-03-04T08:00:00,29.0,nan,41.0,0.0\n").unwrap();
    let max_temp = fx.store.max_water_temp();

    let sim = Simulation::new(fx.store, Some(fx.bundle), ScoringConfig::default())
        .with_telemetry(Box::new(PodFileSource::new(&pod)));
    for _ in 0..3 {
        sim.advance_all_cities().unwrap();
        for row in sim.snapshot().latest_rows() {
            assert!(row.humidity_index.is_finite(), "{} humidity {}", row.city, row.humidity_index);
            assert!((0.0..=100.0).contains(&row.risk_score), "{} {}", row.city, row.risk_score);
        }
    }
    // the simulated humidity stands in for the rejected reading
    for row in sim.snapshot().latest_rows() {
        assert!((row.humidity_index - row.water_temp_c / max_temp).abs() < 1e-12);
    }
    assert!(sim.zones().iter().all(|z| z.avg_risk.is_finite()));
    assert_eq!(sim.live_reading().status, LiveStatus::Error);
}

#[test]
fn live_reading_tracks_pod_file() {
    let fx = fixture(Vec::new());
    let pod = fx._dir.path().join("live_pod.csv");
    let sim = Simulation::new(fx.store, None, ScoringConfig::default())
        .with_telemetry(Box::new(PodFileSource::new(&pod)));
    assert_eq!(sim.live_reading().status, LiveStatus::NoData);

    fs::write(&pod, "date,temperature,humidity,moisture,rainfall\n2024-03-04T08:00:00,29.04,75.0,41.0,2.0\n").unwrap();
    let view = sim.live_reading();
    assert_eq!(view.status, LiveStatus::Live);
    assert_eq!(view.temperature, 29.0);
    assert_eq!(view.soil_moisture, 41.0);
}

#[test]
fn reload_replaces_series_between_ticks() {
    let fx = fixture(Vec::new());
    let snapshot = fx._dir.path().join("merged_features.csv");
    let sim = Simulation::new(fx.store, Some(fx.bundle), ScoringConfig::default());
    sim.advance_all_cities().unwrap();
    sim.advance_all_cities().unwrap();
    let phases = sim.sim_state();

    let reloaded = SeriesStore::from_records(load_snapshot(&snapshot).unwrap(), Vec::new()).unwrap();
    let rows = reloaded.row_count();
    sim.reload(reloaded);
    assert_eq!(sim.snapshot().row_count(), rows);
    assert_eq!(sim.sim_state(), phases);

    let report = sim.advance_all_cities().unwrap();
    assert_eq!(report.current_date.to_string(), "2024-03-04");
}

const HOSPITAL: &str = "date,hospital_id,city,admissions,bed_occupancy_rate,water_temp_C\n\
2024-03-01,H1,Pune,12,0.6,26.0\n\
2024-03-02,H1,Pune,18,0.62,27.5\n\
2024-03-03,H1,Pune,25,0.7,28.0\n\
2024-03-01,H2,Delhi,30,0.8,30.0\n\
2024-03-02,H2,Delhi,28,0.79,30.5\n";

const WATER: &str = "date,hospital_id,water_pH,turbidity_NTU,fecal_coliform_cfu_100ml\n\
2024-03-01,H1,7.2,0.3,0.2\n\
2024-03-02,H1,7.1,0.4,0.3\n\
2024-03-03,H1,6.9,0.6,0.5\n\
2024-03-01,H2,7.4,0.2,0.1\n\
2024-03-02,H2,7.0,0.2,0.1\n";

#[test]
fn scenario_upload_uses_loaded_bundle() {
    let fx = fixture(Vec::new());
    let sim = Simulation::new(fx.store, Some(fx.bundle), ScoringConfig::default());
    let rows_before = sim.snapshot().row_count();

    let report = sim.analyze_scenario(HOSPITAL.as_bytes(), WATER.as_bytes()).unwrap();
    assert_eq!(report.city, "Pune");
    assert_eq!(report.rows, 5);
    assert!((0..=100).contains(&report.risk_score));
    assert_eq!(report.chart_data.len(), 5);
    assert_eq!(report.chart_data.last().unwrap().name, "03-03");
    assert_eq!(sim.snapshot().row_count(), rows_before);

    let unscored = Simulation::new(SeriesStore::default(), None, ScoringConfig::default());
    let err = unscored.analyze_scenario(HOSPITAL.as_bytes(), WATER.as_bytes()).unwrap_err();
    assert!(matches!(err, SimError::Configuration(_)));
}
