use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::GateThresholds;

/// Side of a crossover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// +1 for up, -1 for down.
    pub fn sign(&self) -> i8 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Which rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAlgo {
    Base,
    Peak,
}

impl fmt::Display for DecisionAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionAlgo::Base => write!(f, "base"),
            DecisionAlgo::Peak => write!(f, "peak"),
        }
    }
}

/// Everything the aggregator knows after one tick.
///
/// Averages and amplitudes are rounded to the instrument precision except
/// `peak_pamplitude`, `peak_tamplitude` and `base_mpamplitude`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub precision: u32,

    pub base_ema: f64,
    pub base_tema: f64,
    pub base_direction: Option<Direction>,
    pub base_signal: Option<Direction>,
    /// Price at the crossing; only set on the tick that flipped direction.
    pub base_cross_price: Option<f64>,
    pub base_mamplitude: f64,
    pub base_pamplitude: f64,
    pub base_mpamplitude: Option<f64>,
    pub base_min_price: Option<f64>,
    pub base_max_price: Option<f64>,

    pub aspr_ema: f64,
    pub aspr_tema: f64,
    pub aspr_direction: Option<Direction>,
    /// Set on flip ticks only.
    pub aspr_cross_price: Option<f64>,
    pub aspr_min_price: Option<f64>,
    pub aspr_max_price: Option<f64>,
    pub aspr_min_price_previous: Option<f64>,
    pub aspr_max_price_previous: Option<f64>,
    pub aspr_min_amplitude: Option<f64>,
    pub aspr_max_amplitude: Option<f64>,
    pub aspr_mai_amplitude: Option<f64>,

    pub peak_ema: f64,
    pub peak_dema: f64,
    pub peak_tema: f64,
    pub peak_direction: Option<Direction>,
    pub peak_signal: Option<Direction>,
    /// Set on flip ticks only.
    pub peak_cross_price: Option<f64>,
    pub peak_pamplitude: f64,
    pub peak_tamplitude: f64,
    pub peak_follower_up: Option<f64>,
    pub peak_follower_dn: Option<f64>,

    /// Caller asked for notifications on this tick. Not published.
    #[serde(skip)]
    pub emit_side_effects: bool,
}

/// A signal record plus the gate's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    #[serde(flatten)]
    pub signal: SignalRecord,
    #[serde(flatten)]
    pub thresholds: GateThresholds,

    pub base_signal_up: Option<f64>,
    pub base_signal_dn: Option<f64>,
    /// Whether the base signal had enough amplitude; absent without a base signal.
    pub base_confirmed: Option<bool>,
    pub peak_signal_up: Option<f64>,
    pub peak_signal_dn: Option<f64>,
    pub extreme_signal_up: Option<f64>,
    pub extreme_signal_dn: Option<f64>,

    pub decision: Option<Direction>,
    pub decision_algo: Option<DecisionAlgo>,
    pub decision_up: Option<f64>,
    pub decision_dn: Option<f64>,
    pub message: Option<String>,
}

impl DecisionRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.signal.timestamp
    }

    pub fn price(&self) -> f64 {
        self.signal.price
    }

    /// True when any rule produced an effective price.
    pub fn is_actionable(&self) -> bool {
        self.decision_up.is_some() || self.decision_dn.is_some()
    }

    pub fn is_extreme(&self) -> bool {
        self.extreme_signal_up.is_some() || self.extreme_signal_dn.is_some()
    }
}
