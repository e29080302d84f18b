use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Moving average flavour computed by a `TimeWindowAverage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaType {
    Sma,
    Ema,
    Dema,
    Tema,
}

impl MaType {
    pub fn name(&self) -> &'static str {
        match self {
            MaType::Sma => "SMA",
            MaType::Ema => "EMA",
            MaType::Dema => "DEMA",
            MaType::Tema => "TEMA",
        }
    }

    /// Number of chained exponential series this type needs.
    pub fn ema_depth(&self) -> usize {
        match self {
            MaType::Sma => 0,
            MaType::Ema => 1,
            MaType::Dema => 2,
            MaType::Tema => 3,
        }
    }
}

impl fmt::Display for MaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MaType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SMA" => Ok(MaType::Sma),
            "EMA" => Ok(MaType::Ema),
            "DEMA" => Ok(MaType::Dema),
            "TEMA" => Ok(MaType::Tema),
            other => Err(AppError::Config(format!(
                "ma_type must be one of SMA, EMA, DEMA, TEMA (got '{}')",
                other
            ))),
        }
    }
}

/// Snapshot of a moving average's window occupancy and smoothing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindowInfo {
    pub ma_type: MaType,
    pub time_window_spec: String,
    pub time_window_seconds: f64,
    /// Points currently retained inside the window.
    pub data_points_count: usize,
    /// Points processed since construction or the last reset.
    pub total_data_processed: u64,
    pub current_ma: Option<f64>,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
    pub actual_time_span: f64,
    /// Retained span as a percentage of the configured window.
    pub window_utilization: f64,
    pub base_alpha: Option<f64>,
    pub initialized: Option<bool>,
    pub last_calculation_time: Option<DateTime<Utc>>,
    pub ema1: Option<f64>,
    pub ema2: Option<f64>,
    pub ema3: Option<f64>,
}
