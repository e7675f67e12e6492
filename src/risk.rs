//! Inference and risk scoring over a batch of freshly built rows.
//!
//! Pipeline per row: normalize → forecast → anomaly → composite → risk scaler
//! → demo boost → clamp → classify.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use sha2::{Digest, Sha256};

use crate::lifecycle::{CityRegistry, Phase};
use crate::logging::{log_city_score, log_score_skipped};
use crate::models::ModelBundle;
use crate::records::{DailyRecord, RiskLevel};

// Positions in the normalized feature vector.
const IDX_ROLLING_72H: usize = 1;
const IDX_GROWTH: usize = 3;
const IDX_CONTAMINATION: usize = 4;
const IDX_HUMIDITY: usize = 5;
const IDX_RAINFALL: usize = 6;
const IDX_BEDS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub demo_boost: bool,
    pub spotlight_count: usize,
    pub peak_boost: f64,
    pub growth_boost: f64,
    pub spotlight_boost: f64,
    /// Minimum score of a spotlight city before clamping.
    pub spotlight_floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            demo_boost: true,
            spotlight_count: 3,
            peak_boost: 30.0,
            growth_boost: 15.0,
            spotlight_boost: 25.0,
            spotlight_floor: 88.0,
        }
    }
}

pub fn classify(score: f64) -> RiskLevel {
    if score >= 85.0 {
        RiskLevel::Critical
    } else if score >= 70.0 {
        RiskLevel::High
    } else if score >= 60.0 {
        RiskLevel::HighMod
    } else if score >= 45.0 {
        RiskLevel::Moderate
    } else if score >= 30.0 {
        RiskLevel::LowMod
    } else if score >= 15.0 {
        RiskLevel::Low
    } else {
        RiskLevel::VeryLow
    }
}

/// Weighted blend of the forecast and normalized environment signals.
pub fn composite_score(predicted: f64, contamination_norm: f64, humidity_norm: f64, rainfall_norm: f64) -> f64 {
    0.4 * predicted + 0.3 * (contamination_norm * 100.0) + 0.2 * (humidity_norm * 100.0) + 0.1 * (rainfall_norm * 100.0)
}

/// Cities highlighted on `date`.
///
/// Cities are ordered by the SHA-256 digest of their name, descending, and a
/// window of `count` is taken starting at `ordinal(date) mod n`, wrapping.
pub fn spotlight_cities<'a, I>(cities: I, date: NaiveDate, count: usize) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let unique: BTreeSet<&str> = cities.into_iter().collect();
    let mut ranked: Vec<(Vec<u8>, &str)> =
        unique.into_iter().map(|c| (Sha256::digest(c.as_bytes()).to_vec(), c)).collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    let n = ranked.len();
    if n == 0 || count == 0 {
        return BTreeSet::new();
    }
    let start = date.num_days_from_ce().rem_euclid(n as i32) as usize;
    (0..count.min(n)).map(|i| ranked[(start + i) % n].1.to_string()).collect()
}

/// Phase and spotlight adjustments, then clamp to [0, 100]. NaN counts as 0.
pub fn boost_score(score: f64, phase: Option<Phase>, spotlight: bool, cfg: &ScoringConfig) -> f64 {
    let mut s = if score.is_nan() { 0.0 } else { score };
    if cfg.demo_boost {
        match phase {
            Some(Phase::Peak) => s += cfg.peak_boost,
            Some(Phase::Growth) => s += cfg.growth_boost,
            _ => {}
        }
        if spotlight {
            s += cfg.spotlight_boost;
            s = s.max(cfg.spotlight_floor);
        }
    }
    s.clamp(0.0, 100.0)
}

pub struct RiskEngine<'a> {
    bundle: &'a ModelBundle,
    cfg: &'a ScoringConfig,
}

impl<'a> RiskEngine<'a> {
    pub fn new(bundle: &'a ModelBundle, cfg: &'a ScoringConfig) -> Self {
        Self { bundle, cfg }
    }

    /// Score every row of one simulated day in place. `phases` supplies the
    /// lifecycle phase each city is in after this tick's advance.
    pub fn score_batch(&self, rows: &mut [DailyRecord], date: NaiveDate, phases: &CityRegistry) {
        let spotlight = if self.cfg.demo_boost {
            spotlight_cities(rows.iter().map(|r| r.city.as_str()), date, self.cfg.spotlight_count)
        } else {
            BTreeSet::new()
        };

        for row in rows.iter_mut() {
            let phase = phases.phase_of(&row.city);
            let lit = spotlight.contains(&row.city);
            self.score_row(row, phase, lit);
        }
    }

    fn score_row(&self, row: &mut DailyRecord, phase: Option<Phase>, spotlight: bool) {
        let norm = self.bundle.feature_scaler.transform(&feature_vector(row));

        let forecast_in = [
            norm[IDX_ROLLING_72H],
            norm[IDX_CONTAMINATION],
            norm[IDX_HUMIDITY],
            norm[IDX_RAINFALL],
            norm[IDX_BEDS],
        ];
        let predicted = self.bundle.forecaster.predict(&forecast_in);

        let verdict = self
            .bundle
            .anomaly
            .score(&[row.admissions as f64, norm[IDX_CONTAMINATION], norm[IDX_GROWTH]]);

        let raw = composite_score(predicted, norm[IDX_CONTAMINATION], norm[IDX_HUMIDITY], norm[IDX_RAINFALL]);
        let scaled = self.bundle.risk_scaler.transform(&[raw]).first().copied().unwrap_or(raw);
        if !predicted.is_finite() || !scaled.is_finite() {
            // carried-over outputs stay in place
            log_score_skipped(&row.city, predicted, scaled);
            return;
        }
        let score = boost_score(scaled, phase, spotlight, self.cfg);
        let level = classify(score);

        row.predicted_cases_48h = predicted;
        row.is_anomaly = verdict.is_outlier;
        row.anomaly_score = verdict.score;
        row.raw_risk_score = raw;
        row.risk_score = score;
        row.risk_level = level;

        log_city_score(
            &row.city,
            phase.map(|p| p.as_str()).unwrap_or("unknown"),
            raw,
            scaled,
            score,
            level.as_str(),
            spotlight,
        );
    }
}

pub(crate) fn feature_vector(row: &DailyRecord) -> [f64; 9] {
    [
        row.rolling_cases_24h,
        row.rolling_cases_72h,
        row.delta_cases,
        row.case_growth_rate,
        row.water_contamination_index,
        row.humidity_index,
        row.rainfall_index,
        row.environmental_risk_index,
        row.bed_occupancy_rate,
    ]
}
