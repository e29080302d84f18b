//! Per-instrument pipeline: one aggregator feeding one decision gate.

use crate::config::{AlgoConfig, GateThresholds};
use crate::error::Result;
use crate::types::{DecisionRecord, Tick};

use super::algo::SignalAggregator;
use super::decider::DecisionGate;

/// Aggregator and gate for a single instrument.
pub struct SignalPipeline {
    instrument: String,
    aggregator: SignalAggregator,
    gate: DecisionGate,
}

impl SignalPipeline {
    pub fn new(
        instrument: impl Into<String>,
        algo: &AlgoConfig,
        thresholds: GateThresholds,
    ) -> Result<Self> {
        Ok(Self {
            instrument: instrument.into(),
            aggregator: SignalAggregator::new(algo)?,
            gate: DecisionGate::new(thresholds)?,
        })
    }

    /// Assemble from pre-built parts.
    pub fn from_parts(instrument: impl Into<String>, aggregator: SignalAggregator, gate: DecisionGate) -> Self {
        Self {
            instrument: instrument.into(),
            aggregator,
            gate,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn aggregator(&self) -> &SignalAggregator {
        &self.aggregator
    }

    pub fn gate(&self) -> &DecisionGate {
        &self.gate
    }

    /// Run one tick through the aggregator and the gate.
    pub fn process(&mut self, tick: &Tick, precision: u32, emit_side_effects: bool) -> DecisionRecord {
        let record = self
            .aggregator
            .process_row(tick.timestamp, tick.price, precision, emit_side_effects);
        self.gate.decide(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_pipeline_runs_ticks_in_order() {
        let mut pipeline =
            SignalPipeline::new("USD_CAD", &AlgoConfig::default(), GateThresholds::default()).unwrap();
        let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        for i in 0..5 {
            let tick = Tick::new(start + Duration::seconds(i * 10), 1.35 + i as f64 * 0.0001).unwrap();
            let out = pipeline.process(&tick, 5, false);
            assert_eq!(out.timestamp(), tick.timestamp);
            assert_eq!(out.signal.precision, 5);
        }
        assert_eq!(pipeline.instrument(), "USD_CAD");
        assert_eq!(pipeline.aggregator().processed(), 5);
    }
}
