//! Short-horizon price movement trackers.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Measures how far price has moved within a trailing span.
pub trait RangeTracker: Send {
    /// Record a point; points falling out of the span are dropped first.
    fn add(&mut self, timestamp: DateTime<Utc>, price: f64);

    /// Movement attributable to the tracked span.
    fn calc(&self) -> f64;

    /// Forget everything.
    fn clear(&mut self);
}

/// Signed percentage move from the oldest to the newest price in the span.
///
/// Eviction follows `TimeWindowAverage`: a point is dropped once its
/// timestamp is at or before `now - span`.
#[derive(Debug, Clone)]
pub struct WindowedMovement {
    span: Duration,
    points: VecDeque<(DateTime<Utc>, f64)>,
}

impl WindowedMovement {
    pub fn new(span: Duration) -> Self {
        Self {
            span,
            points: VecDeque::new(),
        }
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl RangeTracker for WindowedMovement {
    fn add(&mut self, timestamp: DateTime<Utc>, price: f64) {
        let cutoff = timestamp - self.span;
        while let Some(&(ts, _)) = self.points.front() {
            if ts > cutoff {
                break;
            }
            self.points.pop_front();
        }
        self.points.push_back((timestamp, price));
    }

    fn calc(&self) -> f64 {
        let (Some(&(_, first)), Some(&(_, last))) = (self.points.front(), self.points.back()) else {
            return 0.0;
        };
        if first == 0.0 {
            return 0.0;
        }
        (last - first) / first * 100.0
    }

    fn clear(&mut self) {
        self.points.clear();
    }
}
