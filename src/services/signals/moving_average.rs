//! Time-windowed moving averages (SMA, EMA, DEMA, TEMA).
//!
//! Windows are measured in wall-clock time rather than in number of
//! observations, so irregular tick spacing is handled natively:
//! - SMA keeps every point inside the window and averages them.
//! - The EMA family applies a weight that grows with the time elapsed since
//!   the previous point, relative to a one-minute base interval.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use crate::error::{AppError, Result};
use crate::types::{MaType, TimeWindowInfo};

/// Elapsed time (seconds) at which the time-adjusted weight equals `alpha`.
const BASE_INTERVAL_SECS: f64 = 60.0;

/// A window length given either as text ("5min", "1h30min") or as a duration.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowSpec {
    Text(String),
    Span(Duration),
}

impl From<&str> for WindowSpec {
    fn from(s: &str) -> Self {
        WindowSpec::Text(s.to_string())
    }
}

impl From<String> for WindowSpec {
    fn from(s: String) -> Self {
        WindowSpec::Text(s)
    }
}

impl From<Duration> for WindowSpec {
    fn from(d: Duration) -> Self {
        WindowSpec::Span(d)
    }
}

impl WindowSpec {
    /// Resolve to a strictly positive duration.
    pub fn to_duration(&self) -> Result<Duration> {
        let duration = match self {
            WindowSpec::Text(s) => parse_window(s)?,
            WindowSpec::Span(d) => *d,
        };
        if duration <= Duration::zero() {
            return Err(AppError::Config(format!(
                "time window must be positive (got {})",
                self.label()
            )));
        }
        Ok(duration)
    }

    /// Human-readable form, as configured.
    pub fn label(&self) -> String {
        match self {
            WindowSpec::Text(s) => s.clone(),
            WindowSpec::Span(d) => format!("{}s", duration_secs(*d)),
        }
    }
}

fn unit_seconds(unit: &str) -> Option<f64> {
    if unit == "T" {
        return Some(60.0);
    }
    match unit.to_lowercase().as_str() {
        "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => Some(0.001),
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(60.0),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3_600.0),
        "d" | "day" | "days" => Some(86_400.0),
        _ => None,
    }
}

/// Parse pandas-style window strings: one or more `<number><unit>` groups.
pub fn parse_window(raw: &str) -> Result<Duration> {
    let invalid = || AppError::Config(format!("invalid time window '{}'", raw));
    let text = raw.trim();
    if text.is_empty() {
        return Err(invalid());
    }

    let mut total_secs = 0.0;
    let mut chars = text.chars().peekable();
    while chars.peek().is_some() {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut number = String::new();
        while let Some(c) = chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
            number.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut unit = String::new();
        while let Some(c) = chars.next_if(|c| c.is_ascii_alphabetic()) {
            unit.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let value: f64 = number.parse().map_err(|_| invalid())?;
        let scale = unit_seconds(&unit).ok_or_else(invalid)?;
        total_secs += value * scale;
    }

    let micros = (total_secs * 1_000_000.0).round();
    if !micros.is_finite() || micros <= 0.0 || micros > i64::MAX as f64 {
        return Err(AppError::Config(format!(
            "time window must be positive (got '{}')",
            raw
        )));
    }
    Ok(Duration::microseconds(micros as i64))
}

fn duration_secs(delta: Duration) -> f64 {
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Signed seconds between two instants.
fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    duration_secs(later - earlier)
}

/// Time-adjusted smoothing weight: `1 - (1 - alpha)^(elapsed / 60s)`.
///
/// Non-positive elapsed time, a degenerate `alpha` or a non-finite result
/// all fall back to `alpha` unchanged.
pub fn time_weight(alpha: f64, elapsed_secs: f64) -> f64 {
    if !(elapsed_secs > 0.0) || alpha <= 0.0 || alpha >= 1.0 {
        return alpha;
    }
    let factor = elapsed_secs / BASE_INTERVAL_SECS;
    let adjusted = 1.0 - (1.0 - alpha).powf(factor);
    if adjusted.is_finite() {
        adjusted.clamp(0.0, 1.0)
    } else {
        alpha
    }
}

/// Streaming moving average over a time window.
#[derive(Debug, Clone)]
pub struct TimeWindowAverage {
    ma_type: MaType,
    window: Duration,
    window_label: String,
    alpha: f64,
    /// Points inside the window, oldest first.
    points: VecDeque<(DateTime<Utc>, f64)>,
    ema1: Option<f64>,
    ema2: Option<f64>,
    ema3: Option<f64>,
    last_timestamp: Option<DateTime<Utc>>,
    count: u64,
}

impl TimeWindowAverage {
    /// Configure a calculator.
    ///
    /// Without an explicit `alpha`, the window length in minutes (at least 1)
    /// is treated as a period count `n` and `alpha = 2 / (n + 1)`.
    pub fn new(window: impl Into<WindowSpec>, ma_type: MaType, alpha: Option<f64>) -> Result<Self> {
        let spec = window.into();
        let window = spec.to_duration()?;

        let alpha = match alpha {
            Some(a) if a > 0.0 && a < 1.0 => a,
            Some(a) => {
                return Err(AppError::Config(format!(
                    "alpha must be between 0 and 1 (got {})",
                    a
                )))
            }
            None => Self::default_alpha(window),
        };

        Ok(Self {
            ma_type,
            window,
            window_label: spec.label(),
            alpha,
            points: VecDeque::new(),
            ema1: None,
            ema2: None,
            ema3: None,
            last_timestamp: None,
            count: 0,
        })
    }

    /// Configure from a type name such as "tema".
    pub fn from_names(window: &str, ma_type: &str, alpha: Option<f64>) -> Result<Self> {
        Self::new(window, ma_type.parse::<MaType>()?, alpha)
    }

    /// Classic EMA constant for a window expressed as a count of minutes.
    pub fn default_alpha(window: Duration) -> f64 {
        let periods = (duration_secs(window) / 60.0).max(1.0);
        2.0 / (periods + 1.0)
    }

    pub fn ma_type(&self) -> MaType {
        self.ma_type
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Points processed since construction or the last reset.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_initialized(&self) -> bool {
        self.ema1.is_some()
    }

    /// Points currently retained inside the window.
    pub fn retained(&self) -> usize {
        self.points.len()
    }

    /// Weight the next point at `timestamp` would receive.
    pub fn effective_alpha(&self, timestamp: DateTime<Utc>) -> f64 {
        match self.last_timestamp {
            Some(last) => time_weight(self.alpha, seconds_between(timestamp, last)),
            None => self.alpha,
        }
    }

    /// Add a point and return the updated average.
    ///
    /// Timestamps are expected in non-decreasing order; older points are
    /// still accepted but skew the window and the time weight.
    pub fn add_data_point(&mut self, timestamp: DateTime<Utc>, price: f64) -> f64 {
        self.count += 1;
        self.evict_before(timestamp);
        self.points.push_back((timestamp, price));

        match self.ma_type {
            MaType::Sma => self.window_mean().unwrap_or(price),
            _ => {
                self.update_ema_chain(timestamp, price);
                self.current_ema_family().unwrap_or(price)
            }
        }
    }

    fn evict_before(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some(&(ts, _)) = self.points.front() {
            if ts > cutoff {
                break;
            }
            self.points.pop_front();
        }
    }

    /// Mean of the retained prices, recomputed after every eviction.
    fn window_mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let sum: f64 = self.points.iter().map(|&(_, price)| price).sum();
        Some(sum / self.points.len() as f64)
    }

    fn update_ema_chain(&mut self, timestamp: DateTime<Utc>, price: f64) {
        let depth = self.ma_type.ema_depth();
        let Some(prev1) = self.ema1 else {
            self.ema1 = Some(price);
            self.ema2 = (depth >= 2).then_some(price);
            self.ema3 = (depth >= 3).then_some(price);
            self.last_timestamp = Some(timestamp);
            return;
        };

        let w = self.effective_alpha(timestamp);
        let ema1 = w * price + (1.0 - w) * prev1;
        self.ema1 = Some(ema1);
        if let Some(prev2) = self.ema2 {
            let ema2 = w * ema1 + (1.0 - w) * prev2;
            self.ema2 = Some(ema2);
            if let Some(prev3) = self.ema3 {
                self.ema3 = Some(w * ema2 + (1.0 - w) * prev3);
            }
        }
        self.last_timestamp = Some(timestamp);
    }

    fn current_ema_family(&self) -> Option<f64> {
        let ema1 = self.ema1?;
        match self.ma_type {
            MaType::Sma => None,
            MaType::Ema => Some(ema1),
            MaType::Dema => Some(2.0 * ema1 - self.ema2?),
            MaType::Tema => Some(3.0 * ema1 - 3.0 * self.ema2? + self.ema3?),
        }
    }

    /// Current average without adding data; `None` before the first point.
    pub fn current_average(&self) -> Option<f64> {
        match self.ma_type {
            MaType::Sma => self.window_mean(),
            _ => self.current_ema_family(),
        }
    }

    /// Window occupancy and smoothing state.
    pub fn time_window_info(&self) -> TimeWindowInfo {
        let oldest = self.points.front().map(|(ts, _)| *ts);
        let newest = self.points.back().map(|(ts, _)| *ts);
        let window_secs = duration_secs(self.window);
        let span = match (oldest, newest) {
            (Some(o), Some(n)) => seconds_between(n, o),
            _ => 0.0,
        };
        let ema_family = self.ma_type != MaType::Sma;

        TimeWindowInfo {
            ma_type: self.ma_type,
            time_window_spec: self.window_label.clone(),
            time_window_seconds: window_secs,
            data_points_count: self.points.len(),
            total_data_processed: self.count,
            current_ma: self.current_average(),
            oldest_timestamp: oldest,
            newest_timestamp: newest,
            actual_time_span: span,
            window_utilization: span / window_secs * 100.0,
            base_alpha: ema_family.then_some(self.alpha),
            initialized: ema_family.then_some(self.is_initialized()),
            last_calculation_time: self.last_timestamp,
            ema1: self.ema1,
            ema2: self.ema2,
            ema3: self.ema3,
        }
    }

    /// Drop all series state, keeping the configuration.
    pub fn reset(&mut self) {
        self.points.clear();
        self.ema1 = None;
        self.ema2 = None;
        self.ema3 = None;
        self.last_timestamp = None;
        self.count = 0;
    }
}
