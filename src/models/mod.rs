//! Externally trained artifacts behind capability traits.
//!
//! The engine depends only on the traits and the fixed feature orders below;
//! the JSON loaders in [`scaler`] and [`forest`] are one way to satisfy them.

pub mod forest;
pub mod scaler;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{SimError, SimResult};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

/// Order of the normalized feature vector.
pub const FEATURE_COLUMNS: [&str; 9] = [
    "rolling_cases_24h",
    "rolling_cases_72h",
    "delta_cases",
    "case_growth_rate",
    "water_contamination_index",
    "humidity_index",
    "rainfall_index",
    "environmental_risk_index",
    "bed_occupancy_rate",
];

/// Forecaster inputs, all normalized.
pub const FORECAST_COLUMNS: [&str; 5] = [
    "rolling_cases_72h",
    "water_contamination_index",
    "humidity_index",
    "rainfall_index",
    "bed_occupancy_rate",
];

/// Anomaly inputs: raw admissions, normalized contamination and growth.
pub const ANOMALY_COLUMNS: [&str; 3] = ["admissions", "water_contamination_index", "case_growth_rate"];

pub const RISK_COLUMNS: [&str; 1] = ["raw_risk_score"];

pub const FEATURE_SCALER_FILE: &str = "feature_scaler.json";
pub const RISK_SCALER_FILE: &str = "risk_scaler.json";
pub const FORECASTER_FILE: &str = "forecaster.json";
pub const ANOMALY_FILE: &str = "anomaly.json";

pub trait Normalizer: Send + Sync {
    fn width(&self) -> usize;
    fn transform(&self, x: &[f64]) -> Vec<f64>;
}

pub trait Regressor: Send + Sync {
    fn predict(&self, x: &[f64]) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyVerdict {
    pub is_outlier: bool,
    pub score: f64,
}

pub trait OutlierScorer: Send + Sync {
    fn score(&self, x: &[f64]) -> AnomalyVerdict;
}

pub(crate) fn check_feature_names(what: &str, got: &[String], expected: &[&str]) -> SimResult<()> {
    if got.len() != expected.len() || got.iter().zip(expected).any(|(g, e)| g != e) {
        return Err(SimError::Configuration(format!(
            "{}: feature order {:?} does not match {:?}",
            what, got, expected
        )));
    }
    Ok(())
}

/// Immutable set of the four artifacts used for scoring.
pub struct ModelBundle {
    pub feature_scaler: Box<dyn Normalizer>,
    pub risk_scaler: Box<dyn Normalizer>,
    pub forecaster: Box<dyn Regressor>,
    pub anomaly: Box<dyn OutlierScorer>,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("features", &self.feature_scaler.width())
            .finish_non_exhaustive()
    }
}

fn read_artifact<T: DeserializeOwned>(dir: &Path, file: &str) -> SimResult<T> {
    let path = dir.join(file);
    let text = fs::read_to_string(&path)
        .map_err(|e| SimError::Configuration(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text).map_err(|e| SimError::Configuration(format!("{}: {}", path.display(), e)))
}

impl ModelBundle {
    pub fn from_parts(
        feature_scaler: Box<dyn Normalizer>,
        risk_scaler: Box<dyn Normalizer>,
        forecaster: Box<dyn Regressor>,
        anomaly: Box<dyn OutlierScorer>,
    ) -> SimResult<Self> {
        if feature_scaler.width() != FEATURE_COLUMNS.len() || risk_scaler.width() != RISK_COLUMNS.len() {
            return Err(SimError::Configuration("scaler width mismatch".to_string()));
        }
        Ok(Self { feature_scaler, risk_scaler, forecaster, anomaly })
    }

    /// Load all four artifacts from `dir`. Any failure is a configuration
    /// error; callers decide whether to run without scoring.
    pub fn load(dir: &Path) -> SimResult<Self> {
        let feature_scaler: scaler::MinMaxScaler = read_artifact(dir, FEATURE_SCALER_FILE)?;
        feature_scaler.validate(&FEATURE_COLUMNS)?;
        let risk_scaler: scaler::MinMaxScaler = read_artifact(dir, RISK_SCALER_FILE)?;
        risk_scaler.validate(&RISK_COLUMNS)?;
        let forecaster: forest::TreeEnsembleRegressor = read_artifact(dir, FORECASTER_FILE)?;
        forecaster.validate(&FORECAST_COLUMNS)?;
        let anomaly: forest::IsolationForest = read_artifact(dir, ANOMALY_FILE)?;
        anomaly.validate(&ANOMALY_COLUMNS)?;

        log(
            Level::Info,
            Domain::Models,
            "bundle_loaded",
            obj(&[
                ("dir", v_str(&dir.display().to_string())),
                ("forecast_trees", v_num(forecaster.trees.len() as f64)),
                ("anomaly_trees", v_num(anomaly.trees.len() as f64)),
            ]),
        );

        Self::from_parts(Box::new(feature_scaler), Box::new(risk_scaler), Box::new(forecaster), Box::new(anomaly))
    }
}
