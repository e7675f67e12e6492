//! Typed rows of the per-city daily time series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ordinal risk classes, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Very Low")]
    VeryLow,
    Low,
    #[serde(rename = "Low-Mod")]
    LowMod,
    Moderate,
    #[serde(rename = "High-Mod")]
    HighMod,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "Very Low",
            RiskLevel::Low => "Low",
            RiskLevel::LowMod => "Low-Mod",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::HighMod => "High-Mod",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

/// One city on one day: raw inputs, derived features, model outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub city: String,
    #[serde(deserialize_with = "crate::data::de_date")]
    pub date: NaiveDate,
    pub lat: f64,
    pub lng: f64,

    // raw inputs
    #[serde(deserialize_with = "crate::data::de_count")]
    pub admissions: u32,
    pub bed_occupancy_rate: f64,
    #[serde(rename = "turbidity_NTU")]
    pub turbidity_ntu: f64,
    pub fecal_coliform_cfu_100ml: f64,
    #[serde(rename = "water_pH")]
    pub water_ph: f64,
    #[serde(rename = "water_temp_C", alias = "water_temperature_C")]
    pub water_temp_c: f64,

    // derived features
    pub rolling_cases_24h: f64,
    pub rolling_cases_72h: f64,
    pub delta_cases: f64,
    pub case_growth_rate: f64,
    pub water_contamination_index: f64,
    pub humidity_index: f64,
    pub rainfall_index: f64,
    pub environmental_risk_index: f64,

    // outputs
    pub predicted_cases_48h: f64,
    pub raw_risk_score: f64,
    #[serde(deserialize_with = "crate::data::de_flag")]
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    #[serde(rename = "riskScore")]
    pub risk_score: f64,
    #[serde(rename = "riskLevel")]
    pub risk_level: RiskLevel,
}

/// Geographic cluster produced by the external clustering job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSummary {
    pub zone_id: String,
    #[serde(rename = "cluster_center_lat")]
    pub centroid_lat: f64,
    #[serde(rename = "cluster_center_lng")]
    pub centroid_lng: f64,
    pub avg_risk: f64,
    #[serde(rename = "cluster_size")]
    pub size: u32,
}

/// Latest per-city risk row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskRow {
    pub city: String,
    pub date: NaiveDate,
    #[serde(rename = "riskScore")]
    pub risk_score: f64,
    #[serde(rename = "riskLevel")]
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRow {
    pub city: String,
    pub date: NaiveDate,
    pub predicted_cases_48h: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRow {
    pub city: String,
    pub date: NaiveDate,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
}

impl From<&DailyRecord> for RiskRow {
    fn from(r: &DailyRecord) -> Self {
        Self { city: r.city.clone(), date: r.date, risk_score: r.risk_score, risk_level: r.risk_level }
    }
}

impl From<&DailyRecord> for ForecastRow {
    fn from(r: &DailyRecord) -> Self {
        Self { city: r.city.clone(), date: r.date, predicted_cases_48h: r.predicted_cases_48h }
    }
}

impl From<&DailyRecord> for AnomalyRow {
    fn from(r: &DailyRecord) -> Self {
        Self {
            city: r.city.clone(),
            date: r.date,
            is_anomaly: r.is_anomaly,
            anomaly_score: r.anomaly_score,
        }
    }
}
