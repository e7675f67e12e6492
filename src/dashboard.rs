//! Read-only views over a store snapshot for the presentation layer.

use serde::Serialize;

use crate::records::RiskLevel;
use crate::store::SeriesStore;

/// Scores strictly above this raise an alert.
pub const ALERT_SCORE: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_zones: usize,
    pub critical_zones: usize,
    pub high_zones: usize,
    pub avg_risk: f64,
    pub total_anomalies: usize,
    pub total_predicted_cases: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapZone {
    pub location: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "riskScore")]
    pub risk_score: f64,
    #[serde(rename = "riskLevel")]
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub location: String,
    pub predicted_cases_48h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Moderate,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub location: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: String,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn summary(store: &SeriesStore) -> DashboardSummary {
    let rows = store.latest_rows();
    if rows.is_empty() {
        return DashboardSummary {
            total_zones: 0,
            critical_zones: 0,
            high_zones: 0,
            avg_risk: 0.0,
            total_anomalies: 0,
            total_predicted_cases: 0.0,
        };
    }
    let total: f64 = rows.iter().map(|r| r.risk_score).sum();
    DashboardSummary {
        total_zones: rows.len(),
        critical_zones: rows.iter().filter(|r| r.risk_level == RiskLevel::Critical).count(),
        high_zones: rows.iter().filter(|r| r.risk_level == RiskLevel::High).count(),
        avg_risk: round2(total / rows.len() as f64),
        total_anomalies: rows.iter().filter(|r| r.is_anomaly).count(),
        total_predicted_cases: round2(rows.iter().map(|r| r.predicted_cases_48h).sum()),
    }
}

pub fn map_zones(store: &SeriesStore) -> Vec<MapZone> {
    store
        .latest_rows()
        .iter()
        .map(|r| MapZone {
            location: r.city.clone(),
            lat: r.lat,
            lng: r.lng,
            risk_score: r.risk_score,
            risk_level: r.risk_level,
        })
        .collect()
}

/// `[lat, lng, riskScore]` per city.
pub fn heatmap(store: &SeriesStore) -> Vec<[f64; 3]> {
    store.latest_rows().iter().map(|r| [r.lat, r.lng, r.risk_score]).collect()
}

pub fn predictions(store: &SeriesStore) -> Vec<Prediction> {
    store
        .latest_rows()
        .iter()
        .map(|r| Prediction { location: r.city.clone(), predicted_cases_48h: r.predicted_cases_48h })
        .collect()
}

pub fn alerts(store: &SeriesStore) -> Vec<Alert> {
    let mut out = Vec::new();
    for r in store.latest_rows() {
        if !(r.risk_score > ALERT_SCORE || r.is_anomaly) {
            continue;
        }
        let (severity, message) = if r.risk_score >= 85.0 {
            (Severity::Critical, format!("Critical risk detected in {}. Immediate action required.", r.city))
        } else if r.risk_score >= ALERT_SCORE {
            (Severity::High, format!("High risk alert for {}. Monitor status closely.", r.city))
        } else {
            (Severity::Moderate, format!("Statistical anomaly detected in {} admissions data.", r.city))
        };
        out.push(Alert {
            location: r.city.clone(),
            severity,
            message,
            timestamp: r.date.format("%Y-%m-%d").to_string(),
        });
    }
    out
}
