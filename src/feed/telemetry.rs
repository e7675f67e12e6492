use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{SimError, SimResult};
use crate::logging::{log, log_telemetry_fallback, obj, v_num, v_str, Domain, Level};

/// One reading from the field sensor pod.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub temperature: f64,
    pub humidity: f64,
    pub rainfall: f64,
    pub soil_moisture: f64,
}

impl TelemetryReading {
    /// The pod writes `nan` when a sensor read fails.
    pub fn is_finite(&self) -> bool {
        [self.temperature, self.humidity, self.rainfall, self.soil_moisture]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Source of the latest live reading. `Ok(None)` means no reading yet.
pub trait TelemetrySource: Send + Sync {
    fn name(&self) -> &str;
    fn latest(&self) -> SimResult<Option<TelemetryReading>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetrySpec {
    None,
    File(String),
    Http(String),
}

impl TelemetrySpec {
    /// `none`, `file:<path>`, `http:<url>`, or a bare `http(s)://` URL.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix("file:") {
            TelemetrySpec::File(path.to_string())
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            TelemetrySpec::Http(raw.to_string())
        } else if let Some(url) = raw.strip_prefix("http:") {
            TelemetrySpec::Http(url.to_string())
        } else {
            TelemetrySpec::None
        }
    }
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn latest(&self) -> SimResult<Option<TelemetryReading>> {
        (**self).latest()
    }
}

pub struct NoTelemetry;

impl TelemetrySource for NoTelemetry {
    fn name(&self) -> &str {
        "none"
    }

    fn latest(&self) -> SimResult<Option<TelemetryReading>> {
        Ok(None)
    }
}

// =============================================================================
// Pod CSV file
// =============================================================================

#[derive(Deserialize, Debug)]
struct PodRow {
    temperature: f64,
    humidity: f64,
    rainfall: f64,
    #[serde(alias = "soil_moisture")]
    moisture: f64,
}

/// Last row of the CSV the serial listener appends to.
pub struct PodFileSource {
    path: PathBuf,
}

impl PodFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TelemetrySource for PodFileSource {
    fn name(&self) -> &str {
        "file"
    }

    fn latest(&self) -> SimResult<Option<TelemetryReading>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path).map_err(|e| SimError::TransientIo(e.to_string()))?;
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(file);
        let headers = rdr
            .headers()
            .map_err(|e| SimError::TransientIo(format!("pod file header: {}", e)))?
            .clone();
        // only the newest line matters; older glitches are history
        let last = rdr.records().filter_map(|r| r.ok()).last();
        let Some(record) = last else {
            return Ok(None);
        };
        let row: PodRow = record
            .deserialize(Some(&headers))
            .map_err(|e| SimError::TransientIo(format!("pod file: {}", e)))?;
        let reading = TelemetryReading {
            temperature: row.temperature,
            humidity: row.humidity,
            rainfall: row.rainfall,
            soil_moisture: row.moisture,
        };
        if !reading.is_finite() {
            return Err(SimError::TransientIo("pod file: non-finite sensor value".to_string()));
        }
        Ok(Some(reading))
    }
}

// =============================================================================
// HTTP pod gateway (background poll, in-memory read)
// =============================================================================

#[derive(Debug, Clone, Default)]
struct CachedReading {
    data: Option<TelemetryReading>,
    fetched_at: Option<Instant>,
    fetch_failures: u32,
    last_failure: Option<Instant>,
}

impl CachedReading {
    fn fresh(&self, ttl: Duration) -> Option<TelemetryReading> {
        match self.fetched_at {
            Some(at) if at.elapsed() < ttl => self.data,
            _ => None,
        }
    }

    fn backoff_secs(&self) -> u64 {
        // 2^failures seconds, capped at 300s
        let base = 2u64.saturating_pow(self.fetch_failures.min(8));
        base.min(300)
    }

    fn can_retry(&self) -> bool {
        match self.last_failure {
            None => true,
            Some(last) => last.elapsed() >= Duration::from_secs(self.backoff_secs()),
        }
    }

    fn record_failure(&mut self) {
        self.fetch_failures = self.fetch_failures.saturating_add(1);
        self.last_failure = Some(Instant::now());
    }

    fn record_success(&mut self, data: TelemetryReading) {
        self.data = Some(data);
        self.fetched_at = Some(Instant::now());
        self.fetch_failures = 0;
        self.last_failure = None;
    }
}

/// Polls a sensor gateway in the background; ticks only read the cache, so a
/// slow gateway never stalls the simulation.
pub struct HttpTelemetry {
    url: String,
    client: Client,
    cache: Arc<Mutex<CachedReading>>,
    ttl: Duration,
}

impl HttpTelemetry {
    pub fn new(url: &str, ttl_secs: u64) -> Self {
        Self {
            url: url.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| Client::new()),
            cache: Arc::new(Mutex::new(CachedReading::default())),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    async fn fetch_fresh(&self) -> Result<TelemetryReading> {
        let resp = self.client.get(&self.url).send().await?.error_for_status()?;
        let reading: TelemetryReading = resp.json().await?;
        if !reading.is_finite() {
            anyhow::bail!("gateway sent a non-finite sensor value");
        }
        Ok(reading)
    }

    /// One poll respecting backoff. Returns whether a fetch was attempted.
    pub async fn poll_once(&self) -> bool {
        let allowed = self.cache.lock().map(|c| c.can_retry()).unwrap_or(false);
        if !allowed {
            return false;
        }
        match self.fetch_fresh().await {
            Ok(reading) => {
                if let Ok(mut c) = self.cache.lock() {
                    c.record_success(reading);
                }
                log(
                    Level::Trace,
                    Domain::Telemetry,
                    "reading",
                    obj(&[
                        ("humidity", v_num(reading.humidity)),
                        ("rainfall", v_num(reading.rainfall)),
                    ]),
                );
            }
            Err(e) => {
                let failures = self
                    .cache
                    .lock()
                    .map(|mut c| {
                        c.record_failure();
                        c.fetch_failures
                    })
                    .unwrap_or(0);
                log(
                    Level::Warn,
                    Domain::Telemetry,
                    "poll_failed",
                    obj(&[
                        ("url", v_str(&self.url)),
                        ("failures", v_num(failures as f64)),
                        ("msg", v_str(&e.to_string())),
                    ]),
                );
            }
        }
        true
    }

    pub fn spawn_poller(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }
}

impl TelemetrySource for HttpTelemetry {
    fn name(&self) -> &str {
        "http"
    }

    fn latest(&self) -> SimResult<Option<TelemetryReading>> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| SimError::TransientIo("telemetry cache lock poisoned".to_string()))?;
        match cache.fresh(self.ttl) {
            Some(r) => Ok(Some(r)),
            None if cache.fetch_failures > 0 => Err(SimError::TransientIo(format!(
                "gateway unreachable after {} attempts",
                cache.fetch_failures
            ))),
            None => Ok(None),
        }
    }
}

/// Read a source, downgrading every failure to "no reading".
pub fn read_best_effort(source: &dyn TelemetrySource) -> Option<TelemetryReading> {
    match source.latest() {
        Ok(Some(r)) if !r.is_finite() => {
            log_telemetry_fallback(source.name(), "non-finite sensor value");
            None
        }
        Ok(r) => r,
        Err(e) => {
            log_telemetry_fallback(source.name(), &e.to_string());
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Live,
    NoData,
    Error,
}

/// Latest reading rounded for display. Fields are zero unless `status` is live.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveView {
    pub temperature: f64,
    pub humidity: f64,
    pub rainfall: f64,
    pub soil_moisture: f64,
    pub status: LiveStatus,
}

fn round_to(v: f64, places: i32) -> f64 {
    let m = 10f64.powi(places);
    (v * m).round() / m
}

impl LiveView {
    fn empty(status: LiveStatus) -> Self {
        Self { temperature: 0.0, humidity: 0.0, rainfall: 0.0, soil_moisture: 0.0, status }
    }
}

/// Read a source for display. Failures surface as `status: error`.
pub fn live_view(source: &dyn TelemetrySource) -> LiveView {
    match source.latest() {
        Ok(Some(r)) if r.is_finite() => LiveView {
            temperature: round_to(r.temperature, 1),
            humidity: round_to(r.humidity, 1),
            rainfall: round_to(r.rainfall, 2),
            soil_moisture: round_to(r.soil_moisture, 1),
            status: LiveStatus::Live,
        },
        Ok(Some(_)) => LiveView::empty(LiveStatus::Error),
        Ok(None) => LiveView::empty(LiveStatus::NoData),
        Err(e) => {
            log(
                Level::Debug,
                Domain::Telemetry,
                "live_view_failed",
                obj(&[("source", v_str(source.name())), ("msg", v_str(&e.to_string()))]),
            );
            LiveView::empty(LiveStatus::Error)
        }
    }
}
