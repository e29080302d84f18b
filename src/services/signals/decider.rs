//! Amplitude gate turning signal records into decisions.

use tracing::debug;

use crate::config::GateThresholds;
use crate::error::Result;
use crate::types::{DecisionAlgo, DecisionRecord, Direction, SignalRecord};

/// Applies the base, peak and extreme-follower rules to each record.
///
/// Holds a single latch so that one extreme signal fires per
/// amplitude-qualifying episode.
#[derive(Debug, Clone)]
pub struct DecisionGate {
    thresholds: GateThresholds,
    extreme_captured: bool,
}

impl DecisionGate {
    pub fn new(thresholds: GateThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            extreme_captured: false,
        })
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    pub fn extreme_captured(&self) -> bool {
        self.extreme_captured
    }

    fn peak_amplitude_ok(&self, record: &SignalRecord) -> bool {
        record.peak_pamplitude >= self.thresholds.peak_pamplitude_threshold
            && record.peak_tamplitude >= self.thresholds.peak_tamplitude_threshold
    }

    /// Evaluate one record. Base runs first, then peak, so a qualifying peak
    /// signal overrides the base decision on the same tick.
    pub fn decide(&mut self, record: SignalRecord) -> DecisionRecord {
        let t = self.thresholds;
        let price = record.price;
        let mut out = DecisionRecord {
            signal: record,
            thresholds: t,
            base_signal_up: None,
            base_signal_dn: None,
            base_confirmed: None,
            peak_signal_up: None,
            peak_signal_dn: None,
            extreme_signal_up: None,
            extreme_signal_dn: None,
            decision: None,
            decision_algo: None,
            decision_up: None,
            decision_dn: None,
            message: None,
        };
        let signal = &out.signal;

        if let Some(dir) = signal.base_signal {
            let confirmed = signal.base_mamplitude >= t.base_mamplitude_threshold
                && signal.base_pamplitude >= t.base_pamplitude_threshold;
            let level = if confirmed {
                Some(price)
            } else {
                match dir {
                    Direction::Up => signal.base_max_price.map(|max| max + t.provisional_offset),
                    Direction::Down => signal.base_min_price.map(|min| min - t.provisional_offset),
                }
            };
            match dir {
                Direction::Up => {
                    out.base_signal_up = level;
                    out.decision_up = level;
                }
                Direction::Down => {
                    out.base_signal_dn = level;
                    out.decision_dn = level;
                }
            }
            out.decision = Some(dir);
            out.decision_algo = Some(DecisionAlgo::Base);
            out.base_confirmed = Some(confirmed);
            out.message = Some(format!(
                "signal {} from algo {} {} enough amplitude",
                dir,
                DecisionAlgo::Base,
                if confirmed { "with" } else { "without" }
            ));
        }

        let signal = &out.signal;
        let peak_ok = self.peak_amplitude_ok(signal);

        if let (Some(dir), true) = (signal.peak_signal, peak_ok) {
            match dir {
                Direction::Up => {
                    out.peak_signal_up = Some(price);
                    out.decision_up = Some(price);
                }
                Direction::Down => {
                    out.peak_signal_dn = Some(price);
                    out.decision_dn = Some(price);
                }
            }
            out.decision = Some(dir);
            out.decision_algo = Some(DecisionAlgo::Peak);
            out.message = Some(format!(
                "signal {} from algo {} with enough amplitude",
                dir,
                DecisionAlgo::Peak
            ));
        }

        let signal = &out.signal;
        if !peak_ok {
            self.extreme_captured = false;
        } else if !self.extreme_captured {
            let above_dn = signal.peak_follower_dn.map_or(false, |dn| price > dn);
            let below_up = signal.peak_follower_up.map_or(false, |up| price < up);
            if above_dn {
                debug!(price, follower = ?signal.peak_follower_dn, "extreme up captured");
                out.extreme_signal_up = Some(price);
                out.decision_up = Some(price);
                self.extreme_captured = true;
            } else if below_up {
                debug!(price, follower = ?signal.peak_follower_up, "extreme down captured");
                out.extreme_signal_dn = Some(price);
                out.decision_dn = Some(price);
                self.extreme_captured = true;
            }
        }

        out
    }
}
