//! Multi-timescale signal aggregator.
//!
//! Nine time-windowed averages feed three crossover trackers (base, aspr,
//! peak). Each tick produces one flat [`SignalRecord`].

use chrono::{DateTime, Utc};

use super::crossover::{
    BaseAmplitude, CrossoverTracker, Observation, PeakFollower, SwingExtremes,
};
use super::moving_average::{TimeWindowAverage, WindowSpec};
use super::range::{RangeTracker, WindowedMovement};
use super::round_to;
use crate::config::AlgoConfig;
use crate::error::Result;
use crate::types::{MaType, SignalRecord, TimeWindowInfo};

/// Stateful per-instrument signal engine.
pub struct SignalAggregator {
    base_ema: TimeWindowAverage,
    base_tema: TimeWindowAverage,
    slow_ema: TimeWindowAverage,
    slow_tema: TimeWindowAverage,
    aspr_ema: TimeWindowAverage,
    aspr_tema: TimeWindowAverage,
    peak_ema: TimeWindowAverage,
    peak_dema: TimeWindowAverage,
    peak_tema: TimeWindowAverage,
    base: CrossoverTracker<BaseAmplitude>,
    aspr: CrossoverTracker<SwingExtremes>,
    peak: CrossoverTracker<PeakFollower>,
    processed: u64,
}

impl SignalAggregator {
    /// Build with the default [`WindowedMovement`] range tracker.
    ///
    /// Fails with `AppError::Config` on any unparseable window.
    pub fn new(config: &AlgoConfig) -> Result<Self> {
        let span = config.peak_range_span.to_duration()?;
        Self::with_range_tracker(config, Box::new(WindowedMovement::new(span)))
    }

    /// Build with a caller-supplied range tracker for the peak timescale.
    pub fn with_range_tracker(config: &AlgoConfig, range: Box<dyn RangeTracker>) -> Result<Self> {
        let avg = |window: &WindowSpec, ma_type: MaType| {
            TimeWindowAverage::new(window.clone(), ma_type, None)
        };

        Ok(Self {
            base_ema: avg(&config.base_interval, MaType::Ema)?,
            base_tema: avg(&config.base_interval, MaType::Tema)?,
            slow_ema: avg(&config.slow_interval, MaType::Ema)?,
            slow_tema: avg(&config.slow_interval, MaType::Tema)?,
            aspr_ema: avg(&config.aspr_interval, MaType::Ema)?,
            aspr_tema: avg(&config.aspr_interval, MaType::Tema)?,
            peak_ema: avg(&config.peak_interval, MaType::Ema)?,
            peak_dema: avg(&config.peak_interval, MaType::Dema)?,
            peak_tema: avg(&config.peak_interval, MaType::Tema)?,
            base: CrossoverTracker::new("base", BaseAmplitude::default()),
            aspr: CrossoverTracker::new("aspr", SwingExtremes),
            peak: CrossoverTracker::new(
                "peak",
                PeakFollower::new(range, config.follower_distance),
            ),
            processed: 0,
        })
    }

    /// Advance every timescale by one tick.
    ///
    /// `timestamp` must not go backwards for a given instrument; out-of-order
    /// ticks degrade window accuracy but never panic.
    pub fn process_row(
        &mut self,
        timestamp: DateTime<Utc>,
        price: f64,
        precision: u32,
        emit_side_effects: bool,
    ) -> SignalRecord {
        let feed = |avg: &mut TimeWindowAverage| round_to(avg.add_data_point(timestamp, price), precision);

        let base_ema = feed(&mut self.base_ema);
        let base_tema = feed(&mut self.base_tema);
        // Slow pair is kept warm but not published.
        feed(&mut self.slow_ema);
        feed(&mut self.slow_tema);
        let aspr_ema = feed(&mut self.aspr_ema);
        let aspr_tema = feed(&mut self.aspr_tema);
        let peak_ema = feed(&mut self.peak_ema);
        let peak_dema = feed(&mut self.peak_dema);
        let peak_tema = feed(&mut self.peak_tema);

        let obs = |fast: f64, slow: f64| Observation {
            timestamp,
            price,
            fast,
            slow,
            precision,
        };

        let (base_crossing, base) = self.base.update(&obs(base_tema, base_ema));
        let (aspr_crossing, aspr) = self.aspr.update(&obs(aspr_tema, aspr_ema));
        let (peak_crossing, peak) = self.peak.update(&obs(peak_tema, peak_ema));
        self.processed += 1;

        let base_state = self.base.state();
        let aspr_state = self.aspr.state();

        SignalRecord {
            timestamp,
            price,
            precision,

            base_ema,
            base_tema,
            base_direction: base_crossing.direction,
            base_signal: base.signal,
            base_cross_price: base_crossing.cross_price,
            base_mamplitude: base.mamplitude,
            base_pamplitude: base.pamplitude,
            base_mpamplitude: base.mpamplitude,
            base_min_price: base_state.min_price(),
            base_max_price: base_state.max_price(),

            aspr_ema,
            aspr_tema,
            aspr_direction: aspr_crossing.direction,
            aspr_cross_price: aspr_crossing.cross_price,
            aspr_min_price: aspr_state.min_price(),
            aspr_max_price: aspr_state.max_price(),
            aspr_min_price_previous: aspr_state.min_price_previous(),
            aspr_max_price_previous: aspr_state.max_price_previous(),
            aspr_min_amplitude: aspr.min_amplitude,
            aspr_max_amplitude: aspr.max_amplitude,
            aspr_mai_amplitude: aspr.mai_amplitude,

            peak_ema,
            peak_dema,
            peak_tema,
            peak_direction: peak_crossing.direction,
            peak_signal: peak.signal,
            peak_cross_price: peak_crossing.cross_price,
            peak_pamplitude: peak.pamplitude,
            peak_tamplitude: peak.tamplitude,
            peak_follower_up: peak.follower_up,
            peak_follower_dn: peak.follower_dn,

            emit_side_effects,
        }
    }

    /// Ticks processed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn base_tracker(&self) -> &CrossoverTracker<BaseAmplitude> {
        &self.base
    }

    pub fn aspr_tracker(&self) -> &CrossoverTracker<SwingExtremes> {
        &self.aspr
    }

    pub fn peak_tracker(&self) -> &CrossoverTracker<PeakFollower> {
        &self.peak
    }

    /// Window occupancy of every average, keyed by its record prefix.
    pub fn window_info(&self) -> Vec<(&'static str, TimeWindowInfo)> {
        vec![
            ("base_ema", self.base_ema.time_window_info()),
            ("base_tema", self.base_tema.time_window_info()),
            ("slow_ema", self.slow_ema.time_window_info()),
            ("slow_tema", self.slow_tema.time_window_info()),
            ("aspr_ema", self.aspr_ema.time_window_info()),
            ("aspr_tema", self.aspr_tema.time_window_info()),
            ("peak_ema", self.peak_ema.time_window_info()),
            ("peak_dema", self.peak_dema.time_window_info()),
            ("peak_tema", self.peak_tema.time_window_info()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::types::Direction;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn aggregator() -> SignalAggregator {
        SignalAggregator::new(&AlgoConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_bad_window() {
        let config = AlgoConfig {
            peak_interval: WindowSpec::from("soon"),
            ..AlgoConfig::default()
        };
        assert!(matches!(
            SignalAggregator::new(&config),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_first_tick_is_flat() {
        let mut algo = aggregator();
        let record = algo.process_row(t(0), 1.3512, 5, false);
        assert_eq!(record.base_ema, 1.3512);
        assert_eq!(record.peak_tema, 1.3512);
        assert_eq!(record.base_direction, None);
        assert_eq!(record.peak_direction, None);
        assert_eq!(record.base_signal, None);
        assert_eq!(record.base_mamplitude, 0.0);
        assert_eq!(record.peak_follower_up, None);
        assert_eq!(algo.processed(), 1);
    }

    #[test]
    fn test_averages_rounded_to_precision() {
        let mut algo = aggregator();
        algo.process_row(t(0), 1.0, 3, false);
        let record = algo.process_row(t(60), 1.23456, 3, false);
        for value in [record.base_ema, record.base_tema, record.aspr_ema, record.peak_dema] {
            assert!(((value * 1000.0).round() - value * 1000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rising_prices_turn_peak_up_and_start_follower() {
        let mut algo = aggregator();
        let mut record = algo.process_row(t(0), 1.0000, 5, false);
        for i in 1..10 {
            record = algo.process_row(t(i * 15), 1.0000 + i as f64 * 0.0005, 5, false);
        }
        assert_eq!(record.peak_direction, Some(Direction::Up));
        let follower = record.peak_follower_up.unwrap();
        assert!((follower - (record.price - 0.0002)).abs() < 1e-12);
        assert!(record.peak_follower_dn.is_none());
    }

    #[test]
    fn test_reversal_flips_and_resets_amplitudes() {
        let mut algo = aggregator();
        let mut ts = 0;
        let mut tick = |algo: &mut SignalAggregator, price: f64| {
            ts += 15;
            algo.process_row(t(ts), price, 5, false)
        };

        for i in 0..20 {
            tick(&mut algo, 1.0 + i as f64 * 0.001);
        }
        let mut flipped = None;
        for i in 0..40 {
            let record = tick(&mut algo, 1.02 - i as f64 * 0.002);
            if record.peak_signal.is_some() {
                flipped = Some(record);
                break;
            }
        }
        let record = flipped.expect("falling prices flip the peak timescale");
        assert_eq!(record.peak_signal, Some(Direction::Down));
        assert_eq!(record.peak_cross_price, Some(record.price));
        assert!(record.peak_follower_up.is_none());
        assert!(record.peak_follower_dn.is_none());
        assert_eq!(algo.peak_tracker().policy().pamplitude(), 0.0);
        assert_eq!(algo.peak_tracker().policy().tamplitude(), 0.0);

        // Only the flip tick carries the cross price; the tracker keeps it.
        let next = tick(&mut algo, record.price - 0.002);
        assert!(next.peak_signal.is_none());
        assert_eq!(next.peak_cross_price, None);
        assert_eq!(algo.peak_tracker().state().cross_price(), Some(record.price));
    }

    #[test]
    fn test_emit_flag_passes_through_without_changing_values() {
        let mut quiet = aggregator();
        let mut loud = aggregator();
        for i in 0..30 {
            let price = 1.0 + ((i as f64) * 0.7).sin() * 0.01;
            let a = quiet.process_row(t(i * 20), price, 5, false);
            let mut b = loud.process_row(t(i * 20), price, 5, true);
            assert!(b.emit_side_effects);
            b.emit_side_effects = false;
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_window_info_covers_nine_averages() {
        let mut algo = aggregator();
        algo.process_row(t(0), 1.0, 5, false);
        let info = algo.window_info();
        assert_eq!(info.len(), 9);
        assert!(info.iter().all(|(_, i)| i.total_data_processed == 1));
    }
}
