use std::sync::{Mutex, PoisonError};

/// Something that accepts gauge readings.
///
/// Emitting a gauge must never block for long and never fail; telemetry is
/// strictly best-effort.
pub trait Gauge: Send + Sync {
    fn gauge(&self, name: &str, value: f64);
}

/// Discards every reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullGauge;
impl Gauge for NullGauge {
    fn gauge(&self, _name: &str, _value: f64) {}
}

/// Keeps every reading in memory, in order. Handy for tests and for
/// printing a summary at the end of a run.
#[derive(Debug, Default)]
pub struct MemoryGauge {
    readings: Mutex<Vec<(String, f64)>>,
}
impl MemoryGauge {
    pub fn readings(&self) -> Vec<(String, f64)> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// All readings of one gauge, oldest first.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.values(name).last().copied()
    }
}
impl Gauge for MemoryGauge {
    fn gauge(&self, name: &str, value: f64) {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner).push((name.to_string(), value));
    }
}

impl<G: Gauge + ?Sized> Gauge for std::sync::Arc<G> {
    fn gauge(&self, name: &str, value: f64) {
        (**self).gauge(name, value)
    }
}
