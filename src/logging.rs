//! Structured JSON-lines logging for the simulation service.
//!
//! One line per record: timestamp, run id, sequence number, level, domain,
//! event name, and a `data` object. City and simulated date are lifted to the
//! top level so a single city's history can be grepped out of a run.
//!
//! Sinks are opened once per process:
//! - `LOG_DIR/<run_id>/events.jsonl` for info and above
//! - `LOG_DIR/<run_id>/trace.jsonl` for trace and debug
//! - stdout, unless `LOG_STDOUT=0`
//!
//! `LOG_DIR=off` skips the files. `LOG_LEVEL` and `LOG_DOMAINS` filter.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Lifecycle,
    Features,
    Scoring,
    Tick,
    Telemetry,
    Models,
    Scenario,
    System,
    Profile,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Lifecycle => "lifecycle",
            Domain::Features => "features",
            Domain::Scoring => "scoring",
            Domain::Tick => "tick",
            Domain::Telemetry => "telemetry",
            Domain::Models => "models",
            Domain::Scenario => "scenario",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }
}

/// Level and domain filters, read from the environment once.
struct Filter {
    min: Level,
    domains: Option<Vec<String>>,
}

impl Filter {
    fn from_env() -> Self {
        let min = std::env::var("LOG_LEVEL").ok().and_then(|v| Level::parse(&v)).unwrap_or(Level::Info);
        let domains = match std::env::var("LOG_DOMAINS") {
            Ok(list) if list.trim() != "all" => Some(list.split(',').map(|d| d.trim().to_string()).collect()),
            _ => None,
        };
        Self { min, domains }
    }

    fn allows(&self, level: Level, domain: Domain) -> bool {
        level >= self.min
            && self.domains.as_ref().map_or(true, |list| list.iter().any(|d| d == domain.as_str()))
    }
}

type FileSink = Mutex<BufWriter<File>>;

struct Sinks {
    run_id: String,
    filter: Filter,
    events: Option<FileSink>,
    trace: Option<FileSink>,
    stdout: bool,
}

static SINKS: OnceLock<Sinks> = OnceLock::new();
static SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_TICKET: AtomicU64 = AtomicU64::new(0);

fn open_sink(path: &Path) -> Option<FileSink> {
    File::create(path)
        .map(|f| Mutex::new(BufWriter::new(f)))
        .map_err(|e| eprintln!("[log] cannot open {}: {}", path.display(), e))
        .ok()
}

fn sinks() -> &'static Sinks {
    SINKS.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("sim-{}-{}", Utc::now().timestamp_millis(), std::process::id()));
        let stdout = !matches!(std::env::var("LOG_STDOUT").as_deref(), Ok("0") | Ok("false"));
        let filter = Filter::from_env();
        let dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        if dir == "off" {
            return Sinks { run_id, filter, events: None, trace: None, stdout };
        }
        let run_dir = Path::new(&dir).join(&run_id);
        if let Err(e) = create_dir_all(&run_dir) {
            eprintln!("[log] cannot create {}: {}", run_dir.display(), e);
        }
        Sinks {
            events: open_sink(&run_dir.join("events.jsonl")),
            trace: open_sink(&run_dir.join("trace.jsonl")),
            run_id,
            filter,
            stdout,
        }
    })
}

fn append(sink: Option<&FileSink>, line: &str) {
    if let Some(Ok(mut w)) = sink.map(|s| s.lock()) {
        let _ = writeln!(w, "{}", line).and_then(|_| w.flush());
    }
}

/// Build the record. Keys in `LIFTED` leave `data` for the top level.
fn render(run_id: &str, seq: u64, level: Level, domain: Domain, event: &str, mut data: Map<String, Value>) -> Value {
    const LIFTED: [&str; 4] = ["city", "zone_id", "sim_date", "msg"];
    let mut record = json!({
        "ts": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "run_id": run_id,
        "seq": seq,
        "lvl": level.as_str(),
        "component": domain.as_str(),
        "event": event,
    });
    if let Value::Object(top) = &mut record {
        for key in LIFTED {
            if let Some(v) = data.remove(key) {
                top.insert(key.to_string(), v);
            }
        }
        top.insert("data".to_string(), Value::Object(data));
    }
    record
}

pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let s = sinks();
    if !s.filter.allows(level, domain) {
        return;
    }
    let line = render(&s.run_id, SEQ.fetch_add(1, Ordering::Relaxed), level, domain, event, fields).to_string();
    let file = if level <= Level::Debug { s.trace.as_ref() } else { s.events.as_ref() };
    append(file, &line);
    if s.stdout {
        println!("{}", line);
    }
}

pub fn log_tick(sim_date: &str, rows_added: usize, scored: bool, telemetry: bool, elapsed_ms: f64) {
    log(
        Level::Info,
        Domain::Tick,
        "tick_complete",
        obj(&[
            ("sim_date", v_str(sim_date)),
            ("rows_added", json!(rows_added)),
            ("scored", json!(scored)),
            ("telemetry_override", json!(telemetry)),
            ("elapsed_ms", v_num(elapsed_ms)),
        ]),
    );
}

pub fn log_tick_failed(kind: &str, reason: &str) {
    log(
        Level::Error,
        Domain::Tick,
        "tick_failed",
        obj(&[("kind", v_str(kind)), ("msg", v_str(reason))]),
    );
}

pub fn log_city_score(city: &str, phase: &str, raw: f64, scaled: f64, boosted: f64, level: &str, spotlight: bool) {
    log(
        Level::Debug,
        Domain::Scoring,
        "city_scored",
        obj(&[
            ("city", v_str(city)),
            ("phase", v_str(phase)),
            ("raw", v_num(raw)),
            ("scaled", v_num(scaled)),
            ("boosted", v_num(boosted)),
            ("level", v_str(level)),
            ("spotlight", json!(spotlight)),
        ]),
    );
}

/// A row kept its previous outputs because inference produced a non-number.
pub fn log_score_skipped(city: &str, predicted: f64, scaled: f64) {
    log(
        Level::Warn,
        Domain::Scoring,
        "score_skipped",
        obj(&[
            ("city", v_str(city)),
            ("predicted", v_str(&predicted.to_string())),
            ("scaled", v_str(&scaled.to_string())),
        ]),
    );
}

pub fn log_telemetry_fallback(source: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Telemetry,
        "telemetry_unavailable",
        obj(&[("source", v_str(source)), ("msg", v_str(reason))]),
    );
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Non-finite numbers serialize as `null`.
pub fn v_num(n: f64) -> Value {
    json!(n)
}

/// Emits a trace record with the elapsed time when dropped.
///
/// `PROFILE_SAMPLE` in (0, 1) keeps roughly that fraction of scopes.
pub struct ProfileScope {
    label: &'static str,
    started: Instant,
    sampled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        let rate = std::env::var("PROFILE_SAMPLE").ok().and_then(|v| v.parse::<f64>().ok()).unwrap_or(1.0);
        Self { label, started: Instant::now(), sampled: sampled(rate, PROFILE_TICKET.fetch_add(1, Ordering::Relaxed)) }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

fn sampled(rate: f64, ticket: u64) -> bool {
    if rate >= 1.0 {
        true
    } else if rate <= 0.0 {
        false
    } else {
        ((ticket % 10_000) as f64 / 10_000.0) < rate
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if self.sampled {
            log(
                Level::Trace,
                Domain::Profile,
                "profile",
                obj(&[("label", v_str(self.label)), ("elapsed_ms", v_num(self.elapsed_ms()))]),
            );
        }
    }
}
