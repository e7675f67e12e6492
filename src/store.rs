//! Append-only per-city daily time series.
//!
//! Days are stored as shared `Arc<Vec<_>>` so cloning a store for a tick copies
//! only the day index and the per-city tails, never the rows themselves.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};

use crate::error::{SimError, SimResult};
use crate::features::{CityTail, RollingUpdate};
use crate::records::{AnomalyRow, DailyRecord, ForecastRow, RiskRow, ZoneSummary};

#[derive(Debug, Clone, Default)]
pub struct SeriesStore {
    days: BTreeMap<NaiveDate, Arc<Vec<DailyRecord>>>,
    tails: BTreeMap<String, CityTail>,
    zones: Vec<ZoneSummary>,
    max_water_temp: f64,
    last_updated: Option<DateTime<Utc>>,
}

impl SeriesStore {
    /// Build from a loaded snapshot. Rows may arrive in any order; a repeated
    /// (city, date) key is rejected.
    pub fn from_records(records: Vec<DailyRecord>, zones: Vec<ZoneSummary>) -> SimResult<Self> {
        let mut grouped: BTreeMap<NaiveDate, BTreeMap<String, DailyRecord>> = BTreeMap::new();
        for r in records {
            let day = grouped.entry(r.date).or_default();
            if day.contains_key(&r.city) {
                return Err(SimError::Data(format!("duplicate row for {} on {}", r.city, r.date)));
            }
            day.insert(r.city.clone(), r);
        }

        let mut store = SeriesStore { zones, ..Default::default() };
        for (date, rows) in grouped {
            let rows: Vec<DailyRecord> = rows.into_values().collect();
            for r in &rows {
                store.tails.entry(r.city.clone()).or_default().push(r.admissions);
                store.max_water_temp = store.max_water_temp.max(r.water_temp_c);
            }
            store.days.insert(date, Arc::new(rows));
        }
        Ok(store)
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.days.keys().next_back().copied()
    }

    /// Rows of the most recent day, ordered by city.
    pub fn latest_rows(&self) -> &[DailyRecord] {
        self.days.values().next_back().map(|d| d.as_slice()).unwrap_or(&[])
    }

    pub fn rows_on(&self, date: NaiveDate) -> &[DailyRecord] {
        self.days.get(&date).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// Highest water temperature seen so far; 0 when the store is empty.
    pub fn max_water_temp(&self) -> f64 {
        self.max_water_temp
    }

    /// Feed one new admissions count into the city's tail.
    pub fn push_tail(&mut self, city: &str, admissions: u32) -> RollingUpdate {
        self.tails.entry(city.to_string()).or_default().push(admissions)
    }

    pub fn tail(&self, city: &str) -> Option<&CityTail> {
        self.tails.get(city)
    }

    /// Append one whole day. The date must be later than every stored day and
    /// each city may appear once.
    pub fn append_day(&mut self, date: NaiveDate, mut rows: Vec<DailyRecord>) -> SimResult<()> {
        if let Some(latest) = self.latest_date() {
            if date <= latest {
                return Err(SimError::Data(format!("day {} is not after {}", date, latest)));
            }
        }
        let mut seen = BTreeSet::new();
        for r in &rows {
            if r.date != date {
                return Err(SimError::Data(format!("row for {} dated {} in day {}", r.city, r.date, date)));
            }
            if !seen.insert(r.city.as_str()) {
                return Err(SimError::Data(format!("duplicate row for {} on {}", r.city, date)));
            }
        }
        rows.sort_by(|a, b| a.city.cmp(&b.city));
        for r in &rows {
            self.max_water_temp = self.max_water_temp.max(r.water_temp_c);
        }
        self.days.insert(date, Arc::new(rows));
        Ok(())
    }

    /// Copy each updated city's score into the zone sharing its id.
    pub fn refresh_zones(&mut self, rows: &[DailyRecord]) -> usize {
        let mut refreshed = 0;
        for zone in self.zones.iter_mut() {
            if let Some(r) = rows.iter().find(|r| r.city == zone.zone_id) {
                zone.avg_risk = r.risk_score;
                refreshed += 1;
            }
        }
        refreshed
    }

    pub fn mark_updated(&mut self, at: DateTime<Utc>) {
        self.last_updated = Some(at);
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn zones(&self) -> &[ZoneSummary] {
        &self.zones
    }

    pub fn row_count(&self) -> usize {
        self.days.values().map(|d| d.len()).sum()
    }

    pub fn day_count(&self) -> usize {
        self.days.len()
    }

    pub fn cities(&self) -> Vec<&str> {
        self.tails.keys().map(|c| c.as_str()).collect()
    }

    pub fn latest_risk(&self) -> Vec<RiskRow> {
        self.latest_rows().iter().map(RiskRow::from).collect()
    }

    pub fn latest_forecasts(&self) -> Vec<ForecastRow> {
        self.latest_rows().iter().map(ForecastRow::from).collect()
    }

    pub fn latest_anomalies(&self) -> Vec<AnomalyRow> {
        self.latest_rows().iter().map(AnomalyRow::from).collect()
    }

    /// Full history ordered by (date, city).
    pub fn merged_series(&self) -> Vec<DailyRecord> {
        self.days.values().flat_map(|d| d.iter().cloned()).collect()
    }

    /// History of one city, oldest first.
    pub fn city_series(&self, city: &str) -> Vec<DailyRecord> {
        self.days
            .values()
            .filter_map(|d| d.iter().find(|r| r.city == city).cloned())
            .collect()
    }

    /// SHA-256 over the latest day's rows; equal for equal simulated state.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for r in self.latest_rows() {
            if let Ok(bytes) = serde_json::to_vec(r) {
                hasher.update(&bytes);
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::tests::sample_record;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn zone(id: &str) -> ZoneSummary {
        ZoneSummary { zone_id: id.to_string(), centroid_lat: 0.0, centroid_lng: 0.0, avg_risk: 0.0, size: 1 }
    }

    fn seeded() -> SeriesStore {
        SeriesStore::from_records(
            vec![
                sample_record("Pune", day(2), 12),
                sample_record("Delhi", day(1), 30),
                sample_record("Pune", day(1), 10),
                sample_record("Delhi", day(2), 33),
            ],
            vec![zone("Pune"), zone("Z-9")],
        )
        .unwrap()
    }

    #[test]
    fn test_from_records_orders_days_and_cities() {
        let store = seeded();
        assert_eq!(store.latest_date(), Some(day(2)));
        assert_eq!(store.row_count(), 4);
        let cities: Vec<&str> = store.latest_rows().iter().map(|r| r.city.as_str()).collect();
        assert_eq!(cities, vec!["Delhi", "Pune"]);
        assert_eq!(store.tail("Pune").unwrap().len(), 2);
        assert_eq!(store.max_water_temp(), 28.0);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = SeriesStore::from_records(
            vec![sample_record("Pune", day(1), 1), sample_record("Pune", day(1), 2)],
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SimError::Data(_)));
    }

    #[test]
    fn test_append_day_rules() {
        let mut store = seeded();
        assert!(store.append_day(day(2), vec![sample_record("Pune", day(2), 1)]).is_err());
        assert!(store
            .append_day(day(3), vec![sample_record("Pune", day(3), 1), sample_record("Pune", day(3), 2)])
            .is_err());
        assert!(store.append_day(day(3), vec![sample_record("Pune", day(4), 1)]).is_err());
        store.append_day(day(3), vec![sample_record("Pune", day(3), 1)]).unwrap();
        assert_eq!(store.latest_date(), Some(day(3)));
        assert_eq!(store.row_count(), 5);
        assert_eq!(store.city_series("Pune").len(), 3);
    }

    #[test]
    fn test_clone_shares_history() {
        let store = seeded();
        let mut next = store.clone();
        next.append_day(day(3), vec![sample_record("Pune", day(3), 1)]).unwrap();
        assert_eq!(store.row_count(), 4);
        assert_eq!(next.row_count(), 5);
        assert_ne!(store.fingerprint(), next.fingerprint());
    }

    #[test]
    fn test_refresh_zones_matches_city_ids() {
        let mut store = seeded();
        let mut row = sample_record("Pune", day(3), 1);
        row.risk_score = 77.0;
        assert_eq!(store.refresh_zones(&[row]), 1);
        assert_eq!(store.zones()[0].avg_risk, 77.0);
        assert_eq!(store.zones()[1].avg_risk, 0.0);
    }

    #[test]
    fn test_empty_store_views() {
        let store = SeriesStore::default();
        assert!(store.latest_date().is_none());
        assert!(store.latest_risk().is_empty());
        assert!(store.merged_series().is_empty());
    }
}
