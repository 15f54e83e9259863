//! Telemetry payload encoding and decoding.
//!
//! Readings travel as a flat JSON object:
//!
//! ```text
//! {"device":"sensor1","location":"living room","temperature_F":98.6,"humidity":45.0}
//! ```

use crate::error::Result;
use crate::types::Reading;
use serde::{Deserialize, Serialize};

/// Wire representation of a [`Reading`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    /// Device identifier.
    pub device: String,
    /// Location label.
    pub location: String,
    /// Temperature in degrees Fahrenheit.
    #[serde(rename = "temperature_F")]
    pub temperature_f: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

impl From<&Reading> for ReadingPayload {
    fn from(reading: &Reading) -> Self {
        Self {
            device: reading.device_id.clone(),
            location: reading.location.clone(),
            temperature_f: reading.temperature_f,
            humidity: reading.humidity,
        }
    }
}

impl From<ReadingPayload> for Reading {
    fn from(payload: ReadingPayload) -> Self {
        Reading {
            device_id: payload.device,
            location: payload.location,
            temperature_f: payload.temperature_f,
            humidity: payload.humidity,
        }
    }
}

/// Serializes a reading to JSON bytes.
pub fn encode(reading: &Reading) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ReadingPayload::from(reading))?)
}

/// Parses JSON bytes into a reading.
pub fn decode(bytes: &[u8]) -> Result<Reading> {
    let payload: ReadingPayload = serde_json::from_slice(bytes)?;
    Ok(payload.into())
}
