use std::collections::VecDeque;
use std::time::Instant;

/// Rate of events per second over the most recent `capacity` events.
///
/// Nothing is reported until the window has filled up once; after that every
/// recorded event yields `capacity / (newest - oldest)`.
#[derive(Debug, Clone)]
pub struct Throughput {
    samples: VecDeque<Instant>,
    capacity: usize,
}
impl Throughput {
    pub const DEFAULT_CAPACITY: usize = 100;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    /// Record one event. Returns the current rate once the window is full and
    /// spans a measurable amount of time.
    pub fn record(&mut self, at: Instant) -> Option<f64> {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(at);
        if self.samples.len() < self.capacity {
            return None;
        }
        let span = at.saturating_duration_since(*self.samples.front()?);
        if span.is_zero() {
            return None;
        }
        Some(self.capacity as f64 / span.as_secs_f64())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
impl Default for Throughput {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_silent_until_full() {
        let start = Instant::now();
        let mut meter = Throughput::new(4);
        for i in 0..3 {
            assert_eq!(meter.record(start + Duration::from_secs(i)), None);
        }
        assert_eq!(meter.record(start + Duration::from_secs(2)), Some(2.0));
    }

    #[test]
    fn test_window_slides() {
        let start = Instant::now();
        let mut meter = Throughput::new(4);
        for i in 0..4 {
            meter.record(start + Duration::from_millis(500 * i));
        }
        // Window is now [0.5s, 1.0s, 1.5s, 5.5s]: 4 events over 5 seconds.
        let rate = meter.record(start + Duration::from_millis(5500)).unwrap();
        assert!((rate - 0.8).abs() < 1e-9, "rate {rate}");
        assert_eq!(meter.len(), 4);
    }

    #[test]
    fn test_zero_span_reports_nothing() {
        let now = Instant::now();
        let mut meter = Throughput::new(2);
        assert_eq!(meter.record(now), None);
        assert_eq!(meter.record(now), None);
    }
}
