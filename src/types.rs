//! Common types for the telemetry API.

use crate::error::{Error, Result};
use crate::payload;

pub use rumqttc::QoS;

/// Lifecycle state of a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session, either never connected or cleanly disconnected
    Disconnected,
    /// A connect attempt is in progress
    Connecting,
    /// Session established and usable
    Connected,
    /// The last connect or operation failed; a reconnect is required
    Faulted,
}

impl ConnectionState {
    /// Returns the lowercase name used in log lines and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw output of one sensor measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Temperature in degrees Celsius
    pub temperature_c: f64,
    /// Relative humidity in percent
    pub humidity: f64,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(temperature_c: f64, humidity: f64) -> Self {
        Self {
            temperature_c,
            humidity,
        }
    }
}

/// One sampled observation ready for transmission.
///
/// The publish time is implicit and not stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Stable device identifier
    pub device_id: String,
    /// Human readable location label
    pub location: String,
    /// Temperature in degrees Fahrenheit
    pub temperature_f: f64,
    /// Relative humidity in percent
    pub humidity: f64,
}

impl Reading {
    /// Creates a reading from already converted values.
    pub fn new(
        device_id: impl Into<String>,
        location: impl Into<String>,
        temperature_f: f64,
        humidity: f64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            location: location.into(),
            temperature_f,
            humidity,
        }
    }

    /// Builds a reading from a sensor sample.
    ///
    /// The temperature is converted to Fahrenheit and rounded to two decimal
    /// places. A garbled sample (non-finite values, humidity outside 0-100)
    /// is rejected with [`Error::TransientFault`].
    pub fn from_sample(
        device_id: impl Into<String>,
        location: impl Into<String>,
        sample: Sample,
    ) -> Result<Self> {
        if !sample.temperature_c.is_finite() || !sample.humidity.is_finite() {
            return Err(Error::TransientFault(format!(
                "non-numeric sample: temperature={}, humidity={}",
                sample.temperature_c, sample.humidity
            )));
        }
        if !(0.0..=100.0).contains(&sample.humidity) {
            return Err(Error::TransientFault(format!(
                "humidity out of range: {}",
                sample.humidity
            )));
        }

        Ok(Self::new(
            device_id,
            location,
            celsius_to_fahrenheit(sample.temperature_c),
            sample.humidity,
        ))
    }

    /// Serializes the reading into its JSON wire form.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        payload::encode(self)
    }
}

/// Converts Celsius to Fahrenheit, rounded to two decimal places.
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    ((celsius * 1.8 + 32.0) * 100.0).round() / 100.0
}

/// Message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic exactly as delivered by the broker.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a new message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Parses the payload as a telemetry reading.
    pub fn parse_reading(&self) -> Result<Reading> {
        payload::decode(&self.payload)
    }

    /// Returns the payload as text, replacing invalid UTF-8 sequences.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
