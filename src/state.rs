use crate::feed::telemetry::TelemetrySpec;

#[derive(Clone, Debug)]
pub struct Config {
    pub snapshot_path: String,
    pub zones_path: String,
    pub models_dir: String,
    pub telemetry: TelemetrySpec,
    /// Seconds a polled reading stays valid.
    pub telemetry_ttl_secs: u64,
    pub telemetry_poll_secs: u64,
    /// 0 runs ticks back to back.
    pub tick_secs: u64,
    pub max_ticks: u64,
    pub demo_boost: bool,
    pub spotlight_count: usize,
    /// Hospital and water tables scored once at startup when both are set.
    pub scenario: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            snapshot_path: std::env::var("SNAPSHOT_PATH").unwrap_or_else(|_| "./ml_outputs/merged_features.csv".to_string()),
            zones_path: std::env::var("ZONES_PATH").unwrap_or_else(|_| "./ml_outputs/zones.csv".to_string()),
            models_dir: std::env::var("MODELS_DIR").unwrap_or_else(|_| "./models".to_string()),
            telemetry: std::env::var("TELEMETRY").map(|v| TelemetrySpec::parse(&v)).unwrap_or(TelemetrySpec::None),
            telemetry_ttl_secs: std::env::var("TELEMETRY_TTL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            telemetry_poll_secs: std::env::var("TELEMETRY_POLL_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            tick_secs: std::env::var("TICK_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(0),
            max_ticks: std::env::var("MAX_TICKS").ok().and_then(|v| v.parse().ok()).unwrap_or(1),
            demo_boost: std::env::var("DEMO_BOOST").map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no")).unwrap_or(true),
            spotlight_count: std::env::var("SPOTLIGHT_COUNT").ok().and_then(|v| v.parse().ok()).unwrap_or(3),
            scenario: match (std::env::var("SCENARIO_HOSPITAL"), std::env::var("SCENARIO_WATER")) {
                (Ok(h), Ok(w)) => Some((h, w)),
                _ => None,
            },
        }
    }

    /// Scoring knobs derived from the service config.
    pub fn scoring(&self) -> crate::risk::ScoringConfig {
        crate::risk::ScoringConfig {
            demo_boost: self.demo_boost,
            spotlight_count: self.spotlight_count,
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_path: "./ml_outputs/merged_features.csv".to_string(),
            zones_path: "./ml_outputs/zones.csv".to_string(),
            models_dir: "./models".to_string(),
            telemetry: TelemetrySpec::None,
            telemetry_ttl_secs: 30,
            telemetry_poll_secs: 5,
            tick_secs: 0,
            max_ticks: 1,
            demo_boost: true,
            spotlight_count: 3,
            scenario: None,
        }
    }
}
