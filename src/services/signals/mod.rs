//! Signal engine.
//!
//! Time-windowed averages feed three crossover timescales whose output is
//! gated into trading decisions. Everything here is synchronous and
//! in-memory; one [`SignalPipeline`] per instrument.

pub mod algo;
pub mod crossover;
pub mod decider;
pub mod moving_average;
pub mod pipeline;
pub mod range;

pub use algo::SignalAggregator;
pub use crossover::{CrossoverPolicy, CrossoverState, CrossoverTracker, Crossing, Observation};
pub use decider::DecisionGate;
pub use moving_average::{parse_window, time_weight, TimeWindowAverage, WindowSpec};
pub use pipeline::SignalPipeline;
pub use range::{RangeTracker, WindowedMovement};

/// Round half away from zero to `precision` decimal digits.
///
/// Returns `value` unchanged when scaling would overflow.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
    let scaled = value * factor;
    if !factor.is_finite() || !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_to(2.5, 0), 3.0);
        assert_eq!(round_to(-2.5, 0), -3.0);
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(1.5, 0), 2.0);
    }

    #[test]
    fn test_round_extreme_precision_is_identity() {
        assert_eq!(round_to(1.234, 400), 1.234);
        assert!(round_to(f64::NAN, 2).is_nan());
    }
}
