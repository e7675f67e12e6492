//! New-day feature construction.
//!
//! A new row starts as a copy of the city's prior row, so model outputs carry
//! over untouched until scoring overwrites them.

use std::collections::VecDeque;

use chrono::NaiveDate;

use crate::feed::telemetry::TelemetryReading;
use crate::lifecycle::{Advance, CityLifecycle};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::records::DailyRecord;

/// Used when no positive water temperature has been observed.
pub const FALLBACK_MAX_TEMP_C: f64 = 35.0;

/// Trailing records per city used for rolling statistics (72h at daily rows).
pub const TAIL_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct RollingStats {
    window: usize,
    buf: VecDeque<f64>,
    sum: f64,
}

impl RollingStats {
    pub fn new(window: usize) -> Self {
        Self { window, buf: VecDeque::with_capacity(window + 1), sum: 0.0 }
    }

    pub fn push(&mut self, x: f64) {
        self.buf.push_back(x);
        self.sum += x;
        if self.buf.len() > self.window {
            if let Some(old) = self.buf.pop_front() {
                self.sum -= old;
            }
        }
    }

    pub fn mean(&self) -> f64 {
        if self.buf.is_empty() { 0.0 } else { self.sum / self.buf.len() as f64 }
    }

    pub fn last(&self) -> Option<f64> {
        self.buf.back().copied()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Rolling admission features for one appended row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingUpdate {
    pub rolling_24h: f64,
    pub rolling_72h: f64,
    pub delta_cases: f64,
    pub growth_rate: f64,
}

/// Last `TAIL_LEN` admissions of a city.
#[derive(Debug, Clone)]
pub struct CityTail {
    admissions: RollingStats,
}

impl Default for CityTail {
    fn default() -> Self {
        Self { admissions: RollingStats::new(TAIL_LEN) }
    }
}

impl CityTail {
    pub fn push(&mut self, admissions: u32) -> RollingUpdate {
        let current = admissions as f64;
        let previous = self.admissions.last();
        self.admissions.push(current);
        let (delta_cases, growth_rate) = match previous {
            Some(prev) => {
                let delta = current - prev;
                (delta, delta / prev.max(1.0))
            }
            None => (0.0, 0.0),
        };
        RollingUpdate {
            rolling_24h: current,
            rolling_72h: self.admissions.mean(),
            delta_cases,
            growth_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.admissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admissions.is_empty()
    }
}

pub fn contamination_index(turbidity: f64, fecal_coliform: f64, ph: f64) -> f64 {
    0.4 * turbidity + 0.4 * fecal_coliform + 0.2 * (7.0 - ph).abs()
}

pub fn humidity_index(water_temp: f64, max_temp: f64) -> f64 {
    let denom = if max_temp > 0.0 { max_temp } else { FALLBACK_MAX_TEMP_C };
    water_temp / denom
}

pub fn environmental_index(humidity: f64, rainfall: f64) -> f64 {
    0.5 * humidity + 0.5 * rainfall
}

/// Builds new-day rows from prior rows and lifecycle drift.
#[derive(Debug, Clone, Copy)]
pub struct FeatureEngine {
    max_water_temp: f64,
}

impl FeatureEngine {
    pub fn new(max_water_temp: f64) -> Self {
        Self { max_water_temp }
    }

    /// Advance the city's lifecycle once and derive the next row. Rolling
    /// fields are left as copied; see [`apply_rolling`].
    pub fn next_row(&self, prior: &DailyRecord, date: NaiveDate, lifecycle: &mut CityLifecycle) -> (DailyRecord, Advance) {
        let adv = lifecycle.advance();
        let mut row = prior.clone();
        row.date = date;
        row.admissions = (prior.admissions as i64 + adv.delta).max(0) as u32;

        let stream = lifecycle.stream_mut();
        if adv.phase.is_outbreak() {
            row.turbidity_ntu += stream.uniform(3.0, 10.0);
            row.rainfall_index = (row.rainfall_index + stream.uniform(0.1, 0.3)).min(1.0);
        } else {
            row.turbidity_ntu = (row.turbidity_ntu - stream.uniform(0.1, 0.5)).max(0.1);
            row.rainfall_index = (row.rainfall_index - stream.uniform(0.01, 0.05)).max(0.0);
        }

        row.water_contamination_index = contamination_index(row.turbidity_ntu, row.fecal_coliform_cfu_100ml, row.water_ph);
        row.humidity_index = humidity_index(row.water_temp_c, self.max_water_temp);
        row.environmental_risk_index = environmental_index(row.humidity_index, row.rainfall_index);
        log(
            Level::Trace,
            Domain::Features,
            "row_built",
            obj(&[
                ("city", v_str(&row.city)),
                ("phase", v_str(adv.phase.as_str())),
                ("admissions", v_num(row.admissions as f64)),
                ("turbidity", v_num(row.turbidity_ntu)),
                ("rainfall_index", v_num(row.rainfall_index)),
            ]),
        );
        (row, adv)
    }
}

pub fn apply_rolling(row: &mut DailyRecord, update: RollingUpdate) {
    row.rolling_cases_24h = update.rolling_24h;
    row.rolling_cases_72h = update.rolling_72h;
    row.delta_cases = update.delta_cases;
    row.case_growth_rate = update.growth_rate;
}

/// Live sensor values replace the simulated humidity and rainfall.
pub fn apply_telemetry(row: &mut DailyRecord, reading: &TelemetryReading) {
    row.humidity_index = reading.humidity / 100.0;
    row.rainfall_index = reading.rainfall / 10.0;
    row.environmental_risk_index = environmental_index(row.humidity_index, row.rainfall_index);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lifecycle::Phase;
    use crate::records::RiskLevel;

    pub(crate) fn sample_record(city: &str, date: NaiveDate, admissions: u32) -> DailyRecord {
        DailyRecord {
            city: city.to_string(),
            date,
            lat: 18.52,
            lng: 73.85,
            admissions,
            bed_occupancy_rate: 0.6,
            turbidity_ntu: 4.0,
            fecal_coliform_cfu_100ml: 10.0,
            water_ph: 7.5,
            water_temp_c: 28.0,
            rolling_cases_24h: admissions as f64,
            rolling_cases_72h: admissions as f64,
            delta_cases: 0.0,
            case_growth_rate: 0.0,
            water_contamination_index: 5.7,
            humidity_index: 0.8,
            rainfall_index: 0.5,
            environmental_risk_index: 0.65,
            predicted_cases_48h: 12.0,
            raw_risk_score: 30.0,
            is_anomaly: false,
            anomaly_score: 0.05,
            risk_score: 40.0,
            risk_level: RiskLevel::LowMod,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_tail_mean_uses_at_most_three() {
        let mut tail = CityTail::default();
        let mut last = None;
        for a in [10, 20, 30, 40] {
            last = Some(tail.push(a));
        }
        let up = last.unwrap();
        assert_eq!(tail.len(), 3);
        assert!((up.rolling_72h - 30.0).abs() < 1e-12);
        assert_eq!(up.rolling_24h, 40.0);
        assert_eq!(up.delta_cases, 10.0);
        assert!((up.growth_rate - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_tail_short_history() {
        let mut tail = CityTail::default();
        let first = tail.push(7);
        assert_eq!(first.delta_cases, 0.0);
        assert_eq!(first.rolling_72h, 7.0);
        let second = tail.push(9);
        assert_eq!(second.rolling_72h, 8.0);
    }

    #[test]
    fn test_growth_rate_floor_on_zero_history() {
        let mut tail = CityTail::default();
        tail.push(0);
        let up = tail.push(5);
        assert_eq!(up.growth_rate, 5.0);
        let mut zeros = CityTail::default();
        zeros.push(0);
        let up = zeros.push(0);
        assert_eq!(up.growth_rate, 0.0);
        assert!(up.growth_rate.is_finite());
    }

    #[test]
    fn test_index_formulas() {
        let c = contamination_index(10.0, 5.0, 6.0);
        assert!((c - (4.0 + 2.0 + 0.2)).abs() < 1e-12);
        assert!((humidity_index(28.0, 35.0) - 0.8).abs() < 1e-12);
        assert_eq!(humidity_index(17.5, 0.0), 0.5);
        assert!((environmental_index(0.8, 0.4) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_next_row_drift_direction() {
        let engine = FeatureEngine::new(35.0);
        let prior = sample_record("Pune", day(1), 20);

        let mut lc = CityLifecycle::new("Pune");
        lc.force_position(Phase::Peak, 0, 10);
        let (row, adv) = engine.next_row(&prior, day(2), &mut lc);
        assert_eq!(adv.phase, Phase::Peak);
        assert_eq!(row.date, day(2));
        assert_eq!(row.admissions as i64, 20 + adv.delta);
        assert!(row.turbidity_ntu >= prior.turbidity_ntu + 3.0);
        assert!(row.rainfall_index <= 1.0 && row.rainfall_index >= prior.rainfall_index);

        lc.force_position(Phase::Decay, 0, 10);
        let (row, adv) = engine.next_row(&prior, day(2), &mut lc);
        assert!(adv.delta < 0);
        assert_eq!(row.admissions, (20 + adv.delta).max(0) as u32);
        assert!(row.turbidity_ntu < prior.turbidity_ntu && row.turbidity_ntu >= 0.1);
        assert!(row.rainfall_index >= 0.0);
        assert_eq!(row.predicted_cases_48h, prior.predicted_cases_48h);
    }

    #[test]
    fn test_admissions_floor_at_zero() {
        let engine = FeatureEngine::new(35.0);
        let prior = sample_record("Kochi", day(1), 3);
        let mut lc = CityLifecycle::new("Kochi");
        lc.force_position(Phase::Decay, 0, 10);
        let (row, _) = engine.next_row(&prior, day(2), &mut lc);
        assert_eq!(row.admissions, 0);
    }

    #[test]
    fn test_telemetry_override() {
        let mut row = sample_record("Delhi", day(1), 5);
        let reading = TelemetryReading { temperature: 25.0, humidity: 62.0, rainfall: 3.0, soil_moisture: 40.0 };
        apply_telemetry(&mut row, &reading);
        assert!((row.humidity_index - 0.62).abs() < 1e-12);
        assert!((row.rainfall_index - 0.3).abs() < 1e-12);
        assert!((row.environmental_risk_index - 0.46).abs() < 1e-12);
    }
}
