//! Pure tick: (store, registry, inputs) -> (next store, report).
//!
//! Nothing here touches shared state. The caller commits the returned store
//! and the mutated registry together, or drops both.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{SimError, SimResult};
use crate::feed::telemetry::TelemetryReading;
use crate::features::{apply_rolling, apply_telemetry, FeatureEngine};
use crate::lifecycle::CityRegistry;
use crate::models::ModelBundle;
use crate::risk::{RiskEngine, ScoringConfig};
use crate::store::SeriesStore;

pub const STATUS_UPDATED: &str = "simulation updated";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub status: String,
    pub rows_added: usize,
    pub current_date: NaiveDate,
}

/// Per-tick inputs that come from outside the store.
#[derive(Clone, Copy)]
pub struct TickInputs<'a> {
    pub bundle: Option<&'a ModelBundle>,
    pub telemetry: Option<TelemetryReading>,
    pub scoring: &'a ScoringConfig,
    pub now: DateTime<Utc>,
}

pub fn run_tick(
    store: &SeriesStore,
    registry: &mut CityRegistry,
    inputs: TickInputs<'_>,
) -> SimResult<(SeriesStore, TickReport)> {
    let latest = store
        .latest_date()
        .ok_or_else(|| SimError::Data("store is empty, nothing to advance".to_string()))?;
    let date = latest
        .succ_opt()
        .ok_or_else(|| SimError::Data(format!("no day after {}", latest)))?;
    let prior_rows = store.latest_rows();

    let mut next = store.clone();
    let engine = FeatureEngine::new(store.max_water_temp());
    let mut rows = Vec::with_capacity(prior_rows.len());

    for prior in prior_rows {
        let (mut row, _) = engine.next_row(prior, date, registry.entry(&prior.city));
        let update = next.push_tail(&row.city, row.admissions);
        apply_rolling(&mut row, update);
        if let Some(reading) = inputs.telemetry.as_ref() {
            apply_telemetry(&mut row, reading);
        }
        rows.push(row);
    }

    if let Some(bundle) = inputs.bundle {
        RiskEngine::new(bundle, inputs.scoring).score_batch(&mut rows, date, registry);
    }

    next.refresh_zones(&rows);
    let rows_added = rows.len();
    next.append_day(date, rows)?;
    next.mark_updated(inputs.now);

    Ok((next, TickReport { status: STATUS_UPDATED.to_string(), rows_added, current_date: date }))
}
