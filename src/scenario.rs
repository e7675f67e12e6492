//! Ad hoc what-if scoring of uploaded hospital and water-quality tables.
//!
//! The two tables are joined on `(hospital_id, date)`, features are built in
//! batch per city, and every merged row goes through the same [`RiskEngine`]
//! as the simulation, without demo boosting. The report describes the last
//! row in `(city, date)` order.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::{de_count, de_date};
use crate::error::{SimError, SimResult};
use crate::features::{contamination_index, environmental_index};
use crate::lifecycle::CityRegistry;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::models::ModelBundle;
use crate::records::{DailyRecord, RiskLevel};
use crate::risk::{feature_vector, RiskEngine, ScoringConfig};

pub const HOSPITAL_COLUMNS: [&str; 4] = ["date", "hospital_id", "admissions", "bed_occupancy_rate"];
pub const WATER_COLUMNS: [&str; 5] = ["date", "hospital_id", "water_pH", "turbidity_NTU", "fecal_coliform_cfu_100ml"];

/// Points kept for the chart and rows compared for the trend.
const CHART_LEN: usize = 10;
const TREND_LEN: usize = 5;
const TREND_BAND: f64 = 5.0;

const FALLBACK_HUMIDITY: f64 = 0.5;
const FALLBACK_RAINFALL: f64 = 0.1;

// Positions in the normalized feature vector.
const IDX_CONTAMINATION: usize = 4;
const IDX_ENVIRONMENT: usize = 7;

#[derive(Debug, Deserialize)]
struct HospitalRow {
    #[serde(deserialize_with = "de_date")]
    date: NaiveDate,
    hospital_id: String,
    #[serde(deserialize_with = "de_count")]
    admissions: u32,
    bed_occupancy_rate: f64,
    #[serde(default)]
    city: Option<String>,
    #[serde(default, rename = "water_temp_C", alias = "water_temperature_C")]
    water_temp_c: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WaterRow {
    #[serde(deserialize_with = "de_date")]
    date: NaiveDate,
    hospital_id: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(rename = "water_pH")]
    water_ph: f64,
    #[serde(rename = "turbidity_NTU")]
    turbidity_ntu: f64,
    fecal_coliform_cfu_100ml: f64,
    #[serde(default, rename = "water_temp_C", alias = "water_temperature_C")]
    water_temp_c: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterRisk {
    #[serde(rename = "High Contamination")]
    High,
    #[serde(rename = "Moderate Contamination")]
    Moderate,
    #[serde(rename = "Normal Range")]
    Normal,
}

impl WaterRisk {
    pub fn from_index(normalized: f64) -> Self {
        if normalized > 0.7 {
            WaterRisk::High
        } else if normalized > 0.4 {
            WaterRisk::Moderate
        } else {
            WaterRisk::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentRisk {
    #[serde(rename = "Elevated Humidity/Rainfall")]
    Elevated,
    Moderate,
    Stable,
}

impl EnvironmentRisk {
    pub fn from_index(normalized: f64) -> Self {
        if normalized > 0.7 {
            EnvironmentRisk::Elevated
        } else if normalized > 0.4 {
            EnvironmentRisk::Moderate
        } else {
            EnvironmentRisk::Stable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl Trend {
    /// Last minus first score over the window, with a dead band of ±5.
    pub fn over(scores: &[f64]) -> Self {
        match (scores.first(), scores.last()) {
            (Some(first), Some(last)) if scores.len() > 1 => {
                let slope = last - first;
                if slope > TREND_BAND {
                    Trend::Rising
                } else if slope < -TREND_BAND {
                    Trend::Falling
                } else {
                    Trend::Stable
                }
            }
            _ => Trend::Stable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioAnalysis {
    pub water_risk: WaterRisk,
    pub environment_risk: EnvironmentRisk,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// `MM-DD`
    pub name: String,
    pub risk: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub city: String,
    pub predicted_cases: i64,
    pub risk_score: i64,
    pub risk_level: RiskLevel,
    pub anomaly: bool,
    pub analysis: ScenarioAnalysis,
    pub chart_data: Vec<ChartPoint>,
    pub rows: usize,
}

/// A CSV reader whose header has already been read.
struct Table<R: Read> {
    rdr: csv::Reader<R>,
    columns: BTreeSet<String>,
}

impl<R: Read> Table<R> {
    fn open(reader: R) -> SimResult<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let columns = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        Ok(Self { rdr, columns })
    }

    fn missing(&self, required: &[&str]) -> Vec<String> {
        required.iter().filter(|c| !self.columns.contains(**c)).map(|c| c.to_string()).collect()
    }

    fn rows<T: DeserializeOwned>(&mut self, what: &str) -> SimResult<Vec<T>> {
        self.rdr
            .deserialize::<T>()
            .enumerate()
            .map(|(i, r)| r.map_err(|e| SimError::Data(format!("{} line {}: {}", what, i + 2, e))))
            .collect()
    }
}

/// One joined row before feature engineering.
#[derive(Debug, Clone)]
struct Joined {
    city: String,
    date: NaiveDate,
    admissions: u32,
    bed_occupancy_rate: f64,
    water_ph: f64,
    turbidity_ntu: f64,
    fecal_coliform_cfu_100ml: f64,
    water_temp_c: Option<f64>,
}

fn canonical_city(raw: &str) -> String {
    match raw.trim() {
        "New Delhi" => "Delhi".to_string(),
        other => other.to_string(),
    }
}

/// Inner join on `(hospital_id, date)`, hospital rows first. The hospital
/// table's city and water temperature win over the water table's.
fn join(hospital: Vec<HospitalRow>, water: Vec<WaterRow>) -> SimResult<Vec<Joined>> {
    let mut by_key: BTreeMap<(String, NaiveDate), Vec<WaterRow>> = BTreeMap::new();
    for w in water {
        by_key.entry((w.hospital_id.clone(), w.date)).or_default().push(w);
    }

    let mut out = Vec::new();
    for h in hospital {
        let Some(matches) = by_key.get(&(h.hospital_id.clone(), h.date)) else {
            continue;
        };
        for w in matches {
            let named = |c: &Option<String>| c.as_deref().filter(|c| !c.trim().is_empty()).map(canonical_city);
            let city = named(&h.city)
                .or_else(|| named(&w.city))
                .ok_or_else(|| SimError::Data(format!("no city for hospital {} on {}", h.hospital_id, h.date)))?;
            let inputs = [h.bed_occupancy_rate, w.water_ph, w.turbidity_ntu, w.fecal_coliform_cfu_100ml];
            if inputs.iter().any(|v| !v.is_finite()) {
                return Err(SimError::Data(format!("non-finite input for hospital {} on {}", h.hospital_id, h.date)));
            }
            out.push(Joined {
                city,
                date: h.date,
                admissions: h.admissions,
                bed_occupancy_rate: h.bed_occupancy_rate,
                water_ph: w.water_ph,
                turbidity_ntu: w.turbidity_ntu,
                fecal_coliform_cfu_100ml: w.fecal_coliform_cfu_100ml,
                water_temp_c: h.water_temp_c.or(w.water_temp_c).filter(|t| t.is_finite()),
            });
        }
    }
    if out.is_empty() {
        return Err(SimError::Data("merge produced 0 rows; check hospital_id and date alignment".to_string()));
    }
    Ok(out)
}

fn ratio_or(x: f64, max: Option<f64>, fallback: f64) -> f64 {
    match max {
        Some(m) if (x / m).is_finite() => x / m,
        _ => fallback,
    }
}

/// Batch features per city in date order. The 72h mean needs three rows;
/// earlier rows get 0.
fn engineer(mut joined: Vec<Joined>) -> Vec<DailyRecord> {
    joined.sort_by(|a, b| (a.city.as_str(), a.date).cmp(&(b.city.as_str(), b.date)));

    let max_temp = joined.iter().filter_map(|j| j.water_temp_c).reduce(f64::max);
    let max_turbidity = joined.iter().map(|j| j.turbidity_ntu).reduce(f64::max);

    let mut out = Vec::with_capacity(joined.len());
    let mut window: Vec<f64> = Vec::new();
    let mut current: Option<String> = None;
    for j in joined {
        if current.as_deref() != Some(j.city.as_str()) {
            window.clear();
            current = Some(j.city.clone());
        }
        let admissions = j.admissions as f64;
        let prev = window.last().copied();
        window.push(admissions);

        let rolling_72h = if window.len() >= 3 { window[window.len() - 3..].iter().sum::<f64>() / 3.0 } else { 0.0 };
        let delta = prev.map_or(0.0, |p| admissions - p);
        let growth = prev.map_or(0.0, |p| delta / if p == 0.0 { 1.0 } else { p });

        let humidity = match j.water_temp_c {
            Some(t) => ratio_or(t, max_temp, FALLBACK_HUMIDITY),
            None => FALLBACK_HUMIDITY,
        };
        let rainfall = ratio_or(j.turbidity_ntu, max_turbidity, FALLBACK_RAINFALL);

        out.push(DailyRecord {
            city: j.city,
            date: j.date,
            // coordinates play no part in scoring
            lat: 0.0,
            lng: 0.0,
            admissions: j.admissions,
            bed_occupancy_rate: j.bed_occupancy_rate,
            turbidity_ntu: j.turbidity_ntu,
            fecal_coliform_cfu_100ml: j.fecal_coliform_cfu_100ml,
            water_ph: j.water_ph,
            water_temp_c: j.water_temp_c.unwrap_or(0.0),
            rolling_cases_24h: admissions,
            rolling_cases_72h: rolling_72h,
            delta_cases: delta,
            case_growth_rate: growth,
            water_contamination_index: contamination_index(j.turbidity_ntu, j.fecal_coliform_cfu_100ml, j.water_ph),
            humidity_index: humidity,
            rainfall_index: rainfall,
            environmental_risk_index: environmental_index(humidity, rainfall),
            predicted_cases_48h: 0.0,
            raw_risk_score: 0.0,
            is_anomaly: false,
            anomaly_score: 0.0,
            risk_score: 0.0,
            risk_level: RiskLevel::VeryLow,
        });
    }
    out
}

fn summarize(rows: &[DailyRecord], bundle: &ModelBundle) -> SimResult<ScenarioReport> {
    let latest = rows.last().ok_or_else(|| SimError::Data("no rows to summarize".to_string()))?;
    let norm = bundle.feature_scaler.transform(&feature_vector(latest));

    let trend_from = rows.len().saturating_sub(TREND_LEN);
    let scores: Vec<f64> = rows[trend_from..].iter().map(|r| r.risk_score).collect();
    let chart_from = rows.len().saturating_sub(CHART_LEN);
    let chart_data = rows[chart_from..]
        .iter()
        .map(|r| ChartPoint { name: r.date.format("%m-%d").to_string(), risk: r.risk_score as i64 })
        .collect();

    Ok(ScenarioReport {
        city: latest.city.clone(),
        predicted_cases: latest.predicted_cases_48h as i64,
        risk_score: latest.risk_score as i64,
        risk_level: latest.risk_level,
        anomaly: latest.is_anomaly,
        analysis: ScenarioAnalysis {
            water_risk: WaterRisk::from_index(norm.get(IDX_CONTAMINATION).copied().unwrap_or(0.0)),
            environment_risk: EnvironmentRisk::from_index(norm.get(IDX_ENVIRONMENT).copied().unwrap_or(0.0)),
            trend: Trend::over(&scores),
        },
        chart_data,
        rows: rows.len(),
    })
}

/// Score an uploaded pair of tables with the loaded bundle.
pub fn analyze<H: Read, W: Read>(hospital: H, water: W, bundle: &ModelBundle) -> SimResult<ScenarioReport> {
    let mut h = Table::open(hospital)?;
    let mut w = Table::open(water)?;
    let (missing_h, missing_w) = (h.missing(&HOSPITAL_COLUMNS), w.missing(&WATER_COLUMNS));
    if !missing_h.is_empty() || !missing_w.is_empty() {
        return Err(SimError::Data(format!("missing columns: hospital {:?}, water {:?}", missing_h, missing_w)));
    }
    if !h.columns.contains("city") && !w.columns.contains("city") {
        return Err(SimError::Data("neither table has a city column".to_string()));
    }

    let mut rows = engineer(join(h.rows("hospital")?, w.rows("water")?)?);
    let cfg = ScoringConfig { demo_boost: false, ..ScoringConfig::default() };
    let date = rows.iter().map(|r| r.date).max().unwrap_or_default();
    RiskEngine::new(bundle, &cfg).score_batch(&mut rows, date, &CityRegistry::new());

    let report = summarize(&rows, bundle)?;
    log(
        Level::Info,
        Domain::Scenario,
        "scenario_scored",
        obj(&[
            ("city", v_str(&report.city)),
            ("rows", v_num(report.rows as f64)),
            ("score", v_num(report.risk_score as f64)),
            ("level", v_str(report.risk_level.as_str())),
        ]),
    );
    Ok(report)
}

pub fn analyze_files(hospital: &Path, water: &Path, bundle: &ModelBundle) -> SimResult<ScenarioReport> {
    let h = File::open(hospital).map_err(|e| SimError::io(hospital, e))?;
    let w = File::open(water).map_err(|e| SimError::io(water, e))?;
    analyze(h, w, bundle)
}
