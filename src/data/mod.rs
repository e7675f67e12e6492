//! Strict ingestion of the history snapshot and the zone list.
//!
//! Both files are CSV. Headers are checked against a fixed column set before
//! any row is deserialized, so an unknown or missing column fails the load
//! instead of silently defaulting a field.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{SimError, SimResult};
use crate::records::{DailyRecord, ZoneSummary};

pub const SNAPSHOT_COLUMNS: [&str; 24] = [
    "city",
    "date",
    "lat",
    "lng",
    "admissions",
    "bed_occupancy_rate",
    "turbidity_NTU",
    "fecal_coliform_cfu_100ml",
    "water_pH",
    "water_temp_C",
    "rolling_cases_24h",
    "rolling_cases_72h",
    "delta_cases",
    "case_growth_rate",
    "water_contamination_index",
    "humidity_index",
    "rainfall_index",
    "environmental_risk_index",
    "predicted_cases_48h",
    "raw_risk_score",
    "is_anomaly",
    "anomaly_score",
    "riskScore",
    "riskLevel",
];

pub const ZONE_COLUMNS: [&str; 5] = [
    "zone_id",
    "cluster_center_lat",
    "cluster_center_lng",
    "avg_risk",
    "cluster_size",
];

const COLUMN_ALIASES: [(&str, &str); 1] = [("water_temperature_C", "water_temp_C")];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaReport {
    pub columns: Vec<String>,
    pub missing: Vec<String>,
    pub unknown: Vec<String>,
    pub ok: bool,
    pub message: String,
}

/// Compare a header row against the expected column set (order-insensitive).
pub fn check_header(header: &[String], expected: &[&str]) -> SchemaReport {
    let canonical: Vec<String> = header
        .iter()
        .map(|h| {
            COLUMN_ALIASES
                .iter()
                .find(|(alias, _)| *alias == h.as_str())
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| h.clone())
        })
        .collect();
    let got: BTreeSet<&str> = canonical.iter().map(String::as_str).collect();
    let want: BTreeSet<&str> = expected.iter().copied().collect();

    let missing: Vec<String> = want.difference(&got).map(|s| s.to_string()).collect();
    let mut unknown: Vec<String> = got.difference(&want).map(|s| s.to_string()).collect();
    if got.len() != canonical.len() {
        unknown.push("<duplicate column>".to_string());
    }
    let ok = missing.is_empty() && unknown.is_empty();
    let message = if ok {
        "schema ok".to_string()
    } else {
        format!("schema mismatch: missing {:?} unknown {:?}", missing, unknown)
    };
    SchemaReport { columns: header.to_vec(), missing, unknown, ok, message }
}

fn read_rows<T, R>(reader: R, expected: &[&str], what: &str) -> SimResult<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let header: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    let report = check_header(&header, expected);
    if !report.ok {
        return Err(SimError::Data(format!("{}: {}", what, report.message)));
    }
    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize::<T>().enumerate() {
        // +2: header line plus 1-based numbering
        let row = result.map_err(|e| SimError::Data(format!("{} line {}: {}", what, i + 2, e)))?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn parse_snapshot<R: Read>(reader: R) -> SimResult<Vec<DailyRecord>> {
    let rows: Vec<DailyRecord> = read_rows(reader, &SNAPSHOT_COLUMNS, "snapshot")?;
    for r in &rows {
        let raw = [
            r.lat,
            r.lng,
            r.bed_occupancy_rate,
            r.turbidity_ntu,
            r.fecal_coliform_cfu_100ml,
            r.water_ph,
            r.water_temp_c,
        ];
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(SimError::Data(format!("snapshot: non-finite input for {} on {}", r.city, r.date)));
        }
    }
    Ok(rows)
}

pub fn load_snapshot(path: &Path) -> SimResult<Vec<DailyRecord>> {
    let file = File::open(path).map_err(|e| SimError::io(path, e))?;
    parse_snapshot(file)
}

pub fn parse_zones<R: Read>(reader: R) -> SimResult<Vec<ZoneSummary>> {
    read_rows(reader, &ZONE_COLUMNS, "zones")
}

/// Zones are optional: a missing file yields an empty list.
pub fn load_zones(path: &Path) -> SimResult<Vec<ZoneSummary>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| SimError::io(path, e))?;
    parse_zones(file)
}

pub fn file_sha256(path: &Path) -> SimResult<String> {
    let mut file = File::open(path).map_err(|e| SimError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| SimError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// =============================================================================
// Cell deserializers
// =============================================================================

/// `YYYY-MM-DD`, or a datetime whose first 10 characters are one.
pub fn de_date<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveDate, D::Error> {
    let s = String::deserialize(de)?;
    let head = s.get(..10).unwrap_or(&s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(serde::de::Error::custom)
}

pub fn de_flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    let s = String::deserialize(de)?;
    match s.as_str() {
        "true" | "True" | "TRUE" | "1" => Ok(true),
        "false" | "False" | "FALSE" | "0" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid flag {:?}", other))),
    }
}

/// Non-negative integral count, tolerating a `.0` suffix from float exports.
pub fn de_count<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    let s = String::deserialize(de)?;
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => Ok(v as u32),
        _ => Err(serde::de::Error::custom(format!("invalid count {:?}", s))),
    }
}
