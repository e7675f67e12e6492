use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::time::{interval, Duration};

use epiwatch::data::{file_sha256, load_snapshot, load_zones};
use epiwatch::dashboard;
use epiwatch::engine::Simulation;
use epiwatch::feed::telemetry::{HttpTelemetry, NoTelemetry, PodFileSource, TelemetrySource, TelemetrySpec};
use epiwatch::logging::{log, obj, v_num, v_str, Domain, Level};
use epiwatch::models::ModelBundle;
use epiwatch::scenario;
use epiwatch::state::Config;
use epiwatch::store::SeriesStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let snapshot_path = Path::new(&cfg.snapshot_path);
    let records = load_snapshot(snapshot_path).with_context(|| format!("loading snapshot {}", cfg.snapshot_path))?;
    let zones = load_zones(Path::new(&cfg.zones_path)).with_context(|| format!("loading zones {}", cfg.zones_path))?;
    let store = SeriesStore::from_records(records, zones).context("building series store")?;

    log(
        Level::Info,
        Domain::System,
        "snapshot_loaded",
        obj(&[
            ("path", v_str(&cfg.snapshot_path)),
            ("sha256", v_str(&file_sha256(snapshot_path).unwrap_or_default())),
            ("rows", v_num(store.row_count() as f64)),
            ("days", v_num(store.day_count() as f64)),
            ("zones", v_num(store.zones().len() as f64)),
        ]),
    );

    let bundle = match ModelBundle::load(Path::new(&cfg.models_dir)) {
        Ok(b) => Some(b),
        Err(e) => {
            log(
                Level::Error,
                Domain::Models,
                "bundle_unavailable",
                obj(&[("dir", v_str(&cfg.models_dir)), ("msg", v_str(&e.to_string()))]),
            );
            None
        }
    };

    let telemetry: Box<dyn TelemetrySource> = match &cfg.telemetry {
        TelemetrySpec::None => Box::new(NoTelemetry),
        TelemetrySpec::File(path) => Box::new(PodFileSource::new(path)),
        TelemetrySpec::Http(url) => {
            let source = Arc::new(HttpTelemetry::new(url, cfg.telemetry_ttl_secs));
            let _poller = Arc::clone(&source).spawn_poller(Duration::from_secs(cfg.telemetry_poll_secs.max(1)));
            Box::new(source)
        }
    };
    log(
        Level::Info,
        Domain::Telemetry,
        "source_selected",
        obj(&[("source", v_str(telemetry.name()))]),
    );

    if let (Some((hospital, water)), Some(b)) = (&cfg.scenario, &bundle) {
        match scenario::analyze_files(Path::new(hospital), Path::new(water), b) {
            Ok(report) => log(Level::Info, Domain::Scenario, "scenario_report", obj(&[("report", json!(report))])),
            Err(e) => log(
                Level::Error,
                Domain::Scenario,
                "scenario_failed",
                obj(&[("kind", v_str(e.kind())), ("msg", v_str(&e.to_string()))]),
            ),
        }
    }

    let sim = Simulation::new(store, bundle, cfg.scoring()).with_telemetry(telemetry);
    if !sim.scoring_enabled() {
        log(Level::Warn, Domain::System, "scoring_disabled", obj(&[]));
    }
    log(Level::Info, Domain::Telemetry, "live_reading", obj(&[("pod", json!(sim.live_reading()))]));

    // MAX_TICKS=0 runs until stopped, but only on a timer
    let max_ticks = if cfg.tick_secs == 0 { cfg.max_ticks.max(1) } else { cfg.max_ticks };
    let mut ticker = interval(Duration::from_secs(cfg.tick_secs.max(1)));
    let mut completed = 0u64;
    while max_ticks == 0 || completed < max_ticks {
        if cfg.tick_secs > 0 {
            ticker.tick().await;
        }
        completed += 1;
        if let Err(e) = sim.advance_all_cities() {
            // already logged by the engine; keep serving the last good day
            log(
                Level::Warn,
                Domain::System,
                "tick_skipped",
                obj(&[("tick", v_num(completed as f64)), ("kind", v_str(e.kind()))]),
            );
        }
    }

    let snapshot = sim.snapshot();
    let summary = dashboard::summary(&snapshot);
    log(
        Level::Info,
        Domain::System,
        "run_complete",
        obj(&[
            ("ticks", v_num(completed as f64)),
            ("sim_date", v_str(&snapshot.latest_date().map(|d| d.to_string()).unwrap_or_default())),
            ("fingerprint", v_str(&snapshot.fingerprint())),
            ("summary", json!(summary)),
            ("alerts", json!(dashboard::alerts(&snapshot).len())),
        ]),
    );
    Ok(())
}
