//! Tick orchestration with a single writer and snapshot readers.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Lifecycle   │────►│   Features   │────►│   Scoring    │
//! │ (per city)   │     │ (new day)    │     │ (new rows)   │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//!                      ┌──────────────┐     ┌──────────────┐
//!                      │   Readers    │◄────│ Arc<Store>   │
//!                      │ (snapshots)  │     │  (swapped)   │
//!                      └──────────────┘     └──────────────┘
//! ```
//!
//! A tick runs on a copy of the registry and a new store value; both are
//! published only when [`tick::run_tick`] succeeds. Readers never take the
//! writer lock: the store and the per-city phase view are published together
//! under one read-write lock that is held only for pointer clones.

pub mod tick;

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::error::{SimError, SimResult};
use crate::feed::telemetry::{live_view, read_best_effort, LiveView, NoTelemetry, TelemetrySource};
use crate::lifecycle::{CityRegistry, PhaseSnapshot};
use crate::logging::{log, log_tick, log_tick_failed, obj, v_num, Domain, Level, ProfileScope};
use crate::models::ModelBundle;
use crate::records::{AnomalyRow, DailyRecord, ForecastRow, RiskRow, ZoneSummary};
use crate::risk::ScoringConfig;
use crate::scenario::{self, ScenarioReport};
use crate::store::SeriesStore;

pub use tick::{TickInputs, TickReport};

pub type PhaseView = BTreeMap<String, PhaseSnapshot>;

/// What readers see: the last committed day and the lifecycle positions that
/// produced it.
#[derive(Clone, Default)]
struct Published {
    store: Arc<SeriesStore>,
    phases: Arc<PhaseView>,
}

pub struct Simulation {
    published: RwLock<Published>,
    /// Writer lock; also guards the lifecycle states.
    registry: Mutex<CityRegistry>,
    bundle: Option<ModelBundle>,
    telemetry: Box<dyn TelemetrySource>,
    scoring: ScoringConfig,
}

impl Simulation {
    pub fn new(store: SeriesStore, bundle: Option<ModelBundle>, scoring: ScoringConfig) -> Self {
        Self {
            published: RwLock::new(Published { store: Arc::new(store), phases: Arc::default() }),
            registry: Mutex::new(CityRegistry::new()),
            bundle,
            telemetry: Box::new(NoTelemetry),
            scoring,
        }
    }

    pub fn with_telemetry(mut self, source: Box<dyn TelemetrySource>) -> Self {
        self.telemetry = source;
        self
    }

    pub fn with_registry(mut self, registry: CityRegistry) -> Self {
        let phases = Arc::new(registry.debug_view());
        self.published.get_mut().unwrap_or_else(PoisonError::into_inner).phases = phases;
        self.registry = Mutex::new(registry);
        self
    }

    pub fn scoring_enabled(&self) -> bool {
        self.bundle.is_some()
    }

    /// Advance every city by one simulated day.
    pub fn advance_all_cities(&self) -> SimResult<TickReport> {
        // Commits are all-or-nothing; a poisoned registry is still consistent.
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let scope = ProfileScope::new("tick");

        let current = self.snapshot();
        let reading = read_best_effort(self.telemetry.as_ref());
        let mut working = registry.clone();
        let inputs = TickInputs {
            bundle: self.bundle.as_ref(),
            telemetry: reading,
            scoring: &self.scoring,
            now: Utc::now(),
        };

        match tick::run_tick(&current, &mut working, inputs) {
            Ok((next, report)) => {
                self.publish(Published { store: Arc::new(next), phases: Arc::new(working.debug_view()) });
                *registry = working;
                log_tick(
                    &report.current_date.to_string(),
                    report.rows_added,
                    self.bundle.is_some(),
                    reading.is_some(),
                    scope.elapsed_ms(),
                );
                Ok(report)
            }
            Err(e) => {
                log_tick_failed(e.kind(), &e.to_string());
                Err(e)
            }
        }
    }

    /// Swap in a freshly loaded store. Lifecycle positions are kept, so
    /// reloaded cities continue their curves; new cities start on first tick.
    pub fn reload(&self, store: SeriesStore) {
        let _writer = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let rows = store.row_count();
        let days = store.day_count();
        let phases = self.published().phases;
        self.publish(Published { store: Arc::new(store), phases });
        log(
            Level::Info,
            Domain::System,
            "store_reloaded",
            obj(&[("rows", v_num(rows as f64)), ("days", v_num(days as f64))]),
        );
    }

    fn publish(&self, next: Published) {
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn published(&self) -> Published {
        self.published.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Current store; the lock is held only for the pointer clone.
    pub fn snapshot(&self) -> Arc<SeriesStore> {
        self.published().store
    }

    /// Score uploaded hospital and water tables with the loaded bundle. Does
    /// not touch the simulated series.
    pub fn analyze_scenario<H: Read, W: Read>(&self, hospital: H, water: W) -> SimResult<ScenarioReport> {
        let bundle = self
            .bundle
            .as_ref()
            .ok_or_else(|| SimError::Configuration("model bundle not loaded".to_string()))?;
        scenario::analyze(hospital, water, bundle)
    }

    /// Latest sensor reading for display, independent of any tick.
    pub fn live_reading(&self) -> LiveView {
        live_view(self.telemetry.as_ref())
    }

    pub fn latest_risk(&self) -> Vec<RiskRow> {
        self.snapshot().latest_risk()
    }

    pub fn latest_forecasts(&self) -> Vec<ForecastRow> {
        self.snapshot().latest_forecasts()
    }

    pub fn latest_anomalies(&self) -> Vec<AnomalyRow> {
        self.snapshot().latest_anomalies()
    }

    pub fn merged_series(&self) -> Vec<DailyRecord> {
        self.snapshot().merged_series()
    }

    pub fn zones(&self) -> Vec<ZoneSummary> {
        self.snapshot().zones().to_vec()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.snapshot().last_updated()
    }

    /// Phase, step and duration per city as of the last committed tick.
    pub fn sim_state(&self) -> Arc<PhaseView> {
        self.published().phases
    }
}
