//! Sensor abstraction.

use crate::error::Result;
use crate::types::Sample;
use std::time::Duration;

/// Minimum spacing between two reads of a DHT22 sensor.
pub const DHT22_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Source of temperature/humidity samples.
///
/// Callers must not sample more often than [`min_interval`](Self::min_interval);
/// the [`Publisher`](crate::Publisher) refuses intervals below it.
pub trait SensorSource {
    /// Takes one measurement. A failed read is an [`Error::TransientFault`](crate::Error::TransientFault).
    fn sample(&mut self) -> Result<Sample>;

    /// Minimum time between two samples.
    fn min_interval(&self) -> Duration {
        DHT22_MIN_INTERVAL
    }
}

impl<F> SensorSource for F
where
    F: FnMut() -> Result<Sample>,
{
    fn sample(&mut self) -> Result<Sample> {
        self()
    }
}
