//! Fast/slow crossover state machine shared by every timescale.
//!
//! The tracker owns direction, cross price and the running price extremes.
//! What gets measured between crossings is delegated to a
//! [`CrossoverPolicy`], so base, swing and peak share one implementation.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::range::RangeTracker;
use super::round_to;
use crate::types::Direction;

/// One tick as seen by a timescale: the price and its fast/slow averages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    /// Fast average (TEMA).
    pub fast: f64,
    /// Slow average (EMA).
    pub slow: f64,
    /// Decimal digits amplitudes are rounded to.
    pub precision: u32,
}

/// Outcome of direction detection for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Crossing {
    /// Direction after this tick; `None` until the averages first separate.
    pub direction: Option<Direction>,
    /// Set only on the tick where the direction reversed.
    pub change: Option<Direction>,
    /// Price latched on a reversal tick.
    pub cross_price: Option<f64>,
}

/// Direction, cross price and extreme-price latches of one timescale.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossoverState {
    direction: Option<Direction>,
    cross_price: Option<f64>,
    min_price_temp: f64,
    max_price_temp: f64,
    min_price: Option<f64>,
    max_price: Option<f64>,
    min_price_previous: Option<f64>,
    max_price_previous: Option<f64>,
}

impl Default for CrossoverState {
    fn default() -> Self {
        Self {
            direction: None,
            cross_price: None,
            min_price_temp: f64::INFINITY,
            max_price_temp: f64::NEG_INFINITY,
            min_price: None,
            max_price: None,
            min_price_previous: None,
            max_price_previous: None,
        }
    }
}

impl CrossoverState {
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Price at the last confirmed reversal.
    pub fn cross_price(&self) -> Option<f64> {
        self.cross_price
    }

    /// Lowest price of the last completed down leg.
    pub fn min_price(&self) -> Option<f64> {
        self.min_price
    }

    /// Highest price of the last completed up leg.
    pub fn max_price(&self) -> Option<f64> {
        self.max_price
    }

    pub fn min_price_previous(&self) -> Option<f64> {
        self.min_price_previous
    }

    pub fn max_price_previous(&self) -> Option<f64> {
        self.max_price_previous
    }

    fn observe(&mut self, obs: &Observation) -> Crossing {
        let side = if obs.fast < obs.slow {
            Some(Direction::Down)
        } else if obs.fast > obs.slow {
            Some(Direction::Up)
        } else {
            None
        };

        let mut change = None;
        if let Some(side) = side {
            if self.direction == Some(side.opposite()) {
                change = Some(side);
                self.cross_price = Some(obs.price);
            }
            self.direction = Some(side);
        }

        Crossing {
            direction: self.direction,
            change,
            cross_price: change.map(|_| obs.price),
        }
    }

    fn track_extremes(&mut self, price: f64, change: Option<Direction>) {
        if self.direction == Some(Direction::Down) && price < self.min_price_temp {
            self.min_price_temp = price;
        }
        if change == Some(Direction::Up) {
            self.min_price_previous = self.min_price;
            self.min_price = Some(self.min_price_temp).filter(|p| p.is_finite());
            self.min_price_temp = f64::INFINITY;
        }
        if self.direction == Some(Direction::Up) && price > self.max_price_temp {
            self.max_price_temp = price;
        }
        if change == Some(Direction::Down) {
            self.max_price_previous = self.max_price;
            self.max_price = Some(self.max_price_temp).filter(|p| p.is_finite());
            self.max_price_temp = f64::NEG_INFINITY;
        }
    }
}

/// What a timescale measures between crossings.
pub trait CrossoverPolicy {
    type Reading;

    /// Runs before direction detection, so it still sees the previous cross price.
    fn accumulate(&mut self, state: &CrossoverState, obs: &Observation);

    /// Runs after detection and extreme tracking. Returns this tick's values
    /// and clears per-leg accumulators when `crossing.change` is set.
    fn settle(&mut self, state: &CrossoverState, crossing: &Crossing, obs: &Observation) -> Self::Reading;
}

/// A crossover state machine paired with its measurement policy.
pub struct CrossoverTracker<P> {
    name: &'static str,
    state: CrossoverState,
    policy: P,
}

impl<P: CrossoverPolicy> CrossoverTracker<P> {
    pub fn new(name: &'static str, policy: P) -> Self {
        Self {
            name,
            state: CrossoverState::default(),
            policy,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> &CrossoverState {
        &self.state
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Advance by one tick.
    pub fn update(&mut self, obs: &Observation) -> (Crossing, P::Reading) {
        self.policy.accumulate(&self.state, obs);
        let crossing = self.state.observe(obs);
        self.state.track_extremes(obs.price, crossing.change);
        if let Some(change) = crossing.change {
            debug!(
                timescale = self.name,
                direction = change.label(),
                price = obs.price,
                "direction flip"
            );
        }
        let reading = self.policy.settle(&self.state, &crossing, obs);
        (crossing, reading)
    }
}

/// `diff / base` as a percentage, 0 when `base` is zero.
pub fn percent_of(diff: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        diff / base * 100.0
    }
}

// ============================================================================
// Base timescale
// ============================================================================

/// Base timescale values for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaseReading {
    /// Reversal confirmed by price already beyond one of the averages.
    pub signal: Option<Direction>,
    /// Largest |EMA - TEMA| seen this leg, as % of price.
    pub mamplitude: f64,
    /// Largest |price - cross price| seen this leg, as % of price.
    pub pamplitude: f64,
    /// |EMA - price| on a confirmed signal.
    pub mpamplitude: Option<f64>,
}

/// Amplitude latches for the base timescale.
#[derive(Debug, Clone, Default)]
pub struct BaseAmplitude {
    mamplitude: f64,
    pamplitude: f64,
}

impl BaseAmplitude {
    pub fn mamplitude(&self) -> f64 {
        self.mamplitude
    }

    pub fn pamplitude(&self) -> f64 {
        self.pamplitude
    }
}

impl CrossoverPolicy for BaseAmplitude {
    type Reading = BaseReading;

    fn accumulate(&mut self, state: &CrossoverState, obs: &Observation) {
        let p = obs.precision;
        let spread = round_to((obs.slow - obs.fast).abs(), p);
        let m = round_to(percent_of(spread, obs.price), p);
        if m > self.mamplitude {
            self.mamplitude = m;
        }

        if let Some(cross) = state.cross_price() {
            let moved = round_to((obs.price - cross).abs(), p);
            let pa = round_to(percent_of(moved, obs.price), p);
            if pa > self.pamplitude {
                self.pamplitude = pa;
            }
        }
    }

    fn settle(&mut self, _state: &CrossoverState, crossing: &Crossing, obs: &Observation) -> BaseReading {
        let signal = crossing.change.filter(|dir| match dir {
            Direction::Up => obs.price > obs.slow || obs.price > obs.fast,
            Direction::Down => obs.price < obs.slow || obs.price < obs.fast,
        });

        let reading = BaseReading {
            signal,
            mamplitude: self.mamplitude,
            pamplitude: self.pamplitude,
            mpamplitude: signal.map(|_| (obs.slow - obs.price).abs()),
        };

        if crossing.change.is_some() {
            self.mamplitude = 0.0;
            self.pamplitude = 0.0;
        }
        reading
    }
}

// ============================================================================
// Swing (asperity) timescale
// ============================================================================

/// Distances between successive swing extremes, as % of price.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SwingReading {
    /// |min - previous min|.
    pub min_amplitude: Option<f64>,
    /// |max - previous max|.
    pub max_amplitude: Option<f64>,
    /// Mean distance from price to the latched max and min.
    pub mai_amplitude: Option<f64>,
}

/// Swing amplitudes derived from the latched extremes.
#[derive(Debug, Clone, Default)]
pub struct SwingExtremes;

impl CrossoverPolicy for SwingExtremes {
    type Reading = SwingReading;

    fn accumulate(&mut self, _state: &CrossoverState, _obs: &Observation) {}

    fn settle(&mut self, state: &CrossoverState, _crossing: &Crossing, obs: &Observation) -> SwingReading {
        let (Some(min), Some(min_prev), Some(max), Some(max_prev)) = (
            state.min_price(),
            state.min_price_previous(),
            state.max_price(),
            state.max_price_previous(),
        ) else {
            return SwingReading::default();
        };

        let p = obs.precision;
        let pct = |diff: f64| round_to(percent_of(diff, obs.price), p);
        SwingReading {
            min_amplitude: Some(pct((min - min_prev).abs())),
            max_amplitude: Some(pct((max - max_prev).abs())),
            mai_amplitude: Some(round_to(
                (pct((max - obs.price).abs()) + pct((min - obs.price).abs())) / 2.0,
                p,
            )),
        }
    }
}

// ============================================================================
// Peak timescale
// ============================================================================

/// Peak timescale values for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PeakReading {
    /// Every reversal is a peak signal.
    pub signal: Option<Direction>,
    /// Largest |price - cross price| / cross price this leg, in %.
    pub pamplitude: f64,
    /// Largest absolute range-tracker movement this leg.
    pub tamplitude: f64,
    /// Trailing level under price while rising.
    pub follower_up: Option<f64>,
    /// Trailing level over price while falling.
    pub follower_dn: Option<f64>,
}

/// Amplitude latches, range tracker and trailing followers for the peak timescale.
pub struct PeakFollower {
    pamplitude: f64,
    tamplitude: f64,
    range: Box<dyn RangeTracker>,
    follower_up: Option<f64>,
    follower_dn: Option<f64>,
    follower_distance: f64,
}

impl PeakFollower {
    pub fn new(range: Box<dyn RangeTracker>, follower_distance: f64) -> Self {
        Self {
            pamplitude: 0.0,
            tamplitude: 0.0,
            range,
            follower_up: None,
            follower_dn: None,
            follower_distance,
        }
    }

    pub fn pamplitude(&self) -> f64 {
        self.pamplitude
    }

    pub fn tamplitude(&self) -> f64 {
        self.tamplitude
    }

    pub fn follower_distance(&self) -> f64 {
        self.follower_distance
    }

    fn ratchet(&mut self, direction: Option<Direction>, price: f64) {
        match direction {
            Some(Direction::Up) => {
                let level = price - self.follower_distance;
                if self.follower_up.map_or(true, |current| level > current) {
                    self.follower_up = Some(level);
                }
            }
            Some(Direction::Down) => {
                let level = price + self.follower_distance;
                if self.follower_dn.map_or(true, |current| level < current) {
                    self.follower_dn = Some(level);
                }
            }
            None => {}
        }
    }
}

impl CrossoverPolicy for PeakFollower {
    type Reading = PeakReading;

    fn accumulate(&mut self, state: &CrossoverState, obs: &Observation) {
        if let Some(cross) = state.cross_price() {
            let pa = percent_of(obs.price - cross, cross).abs();
            if pa > self.pamplitude {
                self.pamplitude = pa;
            }
        }

        self.range.add(obs.timestamp, obs.price);
        let ta = self.range.calc().abs();
        if ta > self.tamplitude {
            self.tamplitude = ta;
        }
    }

    fn settle(&mut self, state: &CrossoverState, crossing: &Crossing, obs: &Observation) -> PeakReading {
        let (pamplitude, tamplitude) = (self.pamplitude, self.tamplitude);

        if crossing.change.is_some() {
            self.pamplitude = 0.0;
            self.tamplitude = 0.0;
            self.range.clear();
        }

        self.ratchet(state.direction(), obs.price);
        if crossing.change.is_some() {
            self.follower_up = None;
            self.follower_dn = None;
        }

        PeakReading {
            signal: crossing.change,
            pamplitude,
            tamplitude,
            follower_up: self.follower_up,
            follower_dn: self.follower_dn,
        }
    }
}
