use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::error::{AppError, Result};
use crate::services::signals::WindowSpec;

/// How ticks are pulled from Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMode {
    /// Use a stream if the instrument key is a Redis stream, else scan keys.
    #[default]
    Auto,
    /// Consume a Redis stream with XREAD.
    Stream,
    /// Scan per-message keys and delete them once consumed.
    Scan,
    /// Read every stored key once, sorted by timestamp, then stop.
    Replay,
}

impl SourceMode {
    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "stream" | "streams" => Some(Self::Stream),
            "scan" | "keys" => Some(Self::Scan),
            "replay" | "batch" => Some(Self::Replay),
            _ => None,
        }
    }
}

/// Time horizons and follower offset for the signal aggregator.
#[derive(Debug, Clone)]
pub struct AlgoConfig {
    /// Fast crossover horizon.
    pub base_interval: WindowSpec,
    /// Computed alongside the others but not published.
    pub slow_interval: WindowSpec,
    /// Swing (asperity) horizon.
    pub aspr_interval: WindowSpec,
    /// Peak horizon; also drives the trailing followers.
    pub peak_interval: WindowSpec,
    /// Span measured by the peak range tracker.
    pub peak_range_span: WindowSpec,
    /// Distance kept between the price and a trailing follower, in price units.
    pub follower_distance: f64,
}

impl Default for AlgoConfig {
    fn default() -> Self {
        Self {
            base_interval: WindowSpec::from("5min"),
            slow_interval: WindowSpec::from("15min"),
            aspr_interval: WindowSpec::from("10min"),
            peak_interval: WindowSpec::from("2min"),
            peak_range_span: WindowSpec::from("1min"),
            follower_distance: 0.0002,
        }
    }
}

/// Amplitude thresholds applied by the decision gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    pub base_mamplitude_threshold: f64,
    pub base_pamplitude_threshold: f64,
    pub peak_pamplitude_threshold: f64,
    pub peak_tamplitude_threshold: f64,
    /// Offset past the latched extreme for an unconfirmed base signal.
    pub provisional_offset: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            base_mamplitude_threshold: 0.02,
            base_pamplitude_threshold: 0.03,
            peak_pamplitude_threshold: 0.04,
            peak_tamplitude_threshold: 0.02,
            provisional_offset: 0.0001,
        }
    }
}

impl GateThresholds {
    /// Reject negative or non-finite values.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("base_mamplitude_threshold", self.base_mamplitude_threshold),
            ("base_pamplitude_threshold", self.base_pamplitude_threshold),
            ("peak_pamplitude_threshold", self.peak_pamplitude_threshold),
            ("peak_tamplitude_threshold", self.peak_tamplitude_threshold),
            ("provisional_offset", self.provisional_offset),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::Config(format!(
                    "{} must be a non-negative number (got {})",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis URL for tick ingestion and signal publishing.
    pub redis_url: String,
    /// Instruments to run, one pipeline each.
    pub instruments: Vec<String>,
    /// Rounding digits for instruments missing from `instrument_precisions`.
    pub default_precision: u32,
    /// Per-instrument rounding digits.
    pub instrument_precisions: Vec<(String, u32)>,
    /// Prefix of incoming tick keys / streams.
    pub tick_prefix: String,
    /// Prefix of published decision records.
    pub signal_prefix: String,
    /// TTL of published decision records (seconds).
    pub signal_ttl_secs: u64,
    pub source_mode: SourceMode,
    /// Whether records ask for notifications to be emitted.
    pub emit_side_effects: bool,
    pub algo: AlgoConfig,
    pub thresholds: GateThresholds,
    /// `KEY="value"` entries that were set but did not parse.
    pub invalid_vars: Vec<String>,
}

/// Reads variables through a lookup and records values that fail to parse.
struct EnvReader<F> {
    lookup: F,
    invalid: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: FromStr>(&mut self, key: &str, default: T) -> T {
        self.parse_with(key, default, |v| v.parse().ok())
    }

    fn parse_with<T>(&mut self, key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
        let Some(raw) = self.raw(key) else {
            return default;
        };
        match parse(raw.trim()) {
            Some(value) => value,
            None => {
                self.invalid.push(format!("{}={:?}", key, raw));
                default
            }
        }
    }

    fn window(&self, key: &str, default: WindowSpec) -> WindowSpec {
        self.raw(key).map(WindowSpec::from).unwrap_or(default)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" | "" => Some(false),
        _ => None,
    }
}

/// Parse `SYM:digits,SYM2:digits` pairs, skipping malformed entries.
pub fn parse_precisions(raw: &str) -> Vec<(String, u32)> {
    raw.split(',')
        .filter_map(|entry| {
            let (symbol, digits) = entry.split_once(':')?;
            let symbol = symbol.trim();
            if symbol.is_empty() {
                return None;
            }
            Some((symbol.to_string(), digits.trim().parse().ok()?))
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    ///
    /// Unset variables take their defaults. Set but unparseable values are
    /// kept in `invalid_vars` and rejected by [`Config::validate`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut env = EnvReader {
            lookup,
            invalid: Vec::new(),
        };

        let instruments: Vec<String> = env
            .string_or("INSTRUMENTS", "USD_CAD")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let defaults = AlgoConfig::default();
        let algo = AlgoConfig {
            base_interval: env.window("BASE_INTERVAL", defaults.base_interval),
            slow_interval: env.window("SLOW_INTERVAL", defaults.slow_interval),
            aspr_interval: env.window("ASPR_INTERVAL", defaults.aspr_interval),
            peak_interval: env.window("PEAK_INTERVAL", defaults.peak_interval),
            peak_range_span: env.window("PEAK_RANGE_SPAN", defaults.peak_range_span),
            follower_distance: env.parse_or("PEAK_FOLLOWER_DISTANCE", defaults.follower_distance),
        };

        let t = GateThresholds::default();
        let thresholds = GateThresholds {
            base_mamplitude_threshold: env.parse_or("BASE_MAMPLITUDE_THRESHOLD", t.base_mamplitude_threshold),
            base_pamplitude_threshold: env.parse_or("BASE_PAMPLITUDE_THRESHOLD", t.base_pamplitude_threshold),
            peak_pamplitude_threshold: env.parse_or("PEAK_PAMPLITUDE_THRESHOLD", t.peak_pamplitude_threshold),
            peak_tamplitude_threshold: env.parse_or("PEAK_TAMPLITUDE_THRESHOLD", t.peak_tamplitude_threshold),
            provisional_offset: env.parse_or("PROVISIONAL_OFFSET", t.provisional_offset),
        };

        let default_precision = env.parse_or("DEFAULT_PRECISION", 5);
        let signal_ttl_secs = env.parse_or("SIGNAL_TTL_SECS", 120);
        let source_mode = env.parse_with("SOURCE_MODE", SourceMode::default(), SourceMode::from_str);
        let emit_side_effects = env.parse_with("EMIT_SIDE_EFFECTS", false, parse_flag);

        Self {
            redis_url: env.string_or("REDIS_URL", "redis://127.0.0.1:6379"),
            instruments,
            default_precision,
            instrument_precisions: env
                .raw("INSTRUMENT_PRECISIONS")
                .map(|s| parse_precisions(&s))
                .unwrap_or_default(),
            tick_prefix: env.string_or("TICK_PREFIX", "price_data"),
            signal_prefix: env.string_or("SIGNAL_PREFIX", "signal_data"),
            signal_ttl_secs,
            source_mode,
            emit_side_effects,
            algo,
            thresholds,
            invalid_vars: env.invalid,
        }
    }

    /// Fail fast on configuration the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.invalid_vars.is_empty() {
            return Err(AppError::Config(format!(
                "unparseable environment values: {}",
                self.invalid_vars.join(", ")
            )));
        }
        if self.instruments.is_empty() {
            return Err(AppError::Config("no instruments configured".to_string()));
        }
        if self.signal_ttl_secs == 0 {
            return Err(AppError::Config("SIGNAL_TTL_SECS must be positive".to_string()));
        }
        for window in [
            &self.algo.base_interval,
            &self.algo.slow_interval,
            &self.algo.aspr_interval,
            &self.algo.peak_interval,
            &self.algo.peak_range_span,
        ] {
            window.to_duration()?;
        }
        if !self.algo.follower_distance.is_finite() || self.algo.follower_distance < 0.0 {
            return Err(AppError::Config(
                "PEAK_FOLLOWER_DISTANCE must be a non-negative number".to_string(),
            ));
        }
        self.thresholds.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
