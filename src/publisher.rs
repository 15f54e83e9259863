//! Telemetry publisher loop: sample, publish, recover, sleep.

use crate::connection::BrokerConnection;
use crate::error::{Error, Result};
use crate::network::{self, LinkConfig, NetworkLink};
use crate::sensor::SensorSource;
use crate::topic::TopicName;
use crate::transport::{Credentials, Endpoint, Transport};
use crate::types::{QoS, Reading};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Default time between two samples.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default publish topic.
pub const DEFAULT_TOPIC: &str = "sensors/environmental";

/// Configuration for a telemetry [`Publisher`].
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Broker address.
    pub endpoint: Endpoint,
    /// Broker login, presented again on every reconnect.
    pub credentials: Credentials,
    /// Network join parameters.
    pub link: LinkConfig,
    /// Device identifier written into every reading.
    pub device_id: String,
    /// Location label written into every reading.
    pub location: String,
    /// Topic readings are published to.
    pub topic: TopicName,
    /// Time between two iterations.
    pub interval: Duration,
    /// Publish QoS.
    pub qos: QoS,
}

impl PublisherConfig {
    /// Creates a new publisher configuration with anonymous credentials,
    /// the host network link and a five second interval.
    pub fn new(
        endpoint: Endpoint,
        device_id: impl Into<String>,
        location: impl Into<String>,
        topic: TopicName,
    ) -> Self {
        Self {
            endpoint,
            credentials: Credentials::anonymous(),
            link: LinkConfig::default(),
            device_id: device_id.into(),
            location: location.into(),
            topic,
            interval: DEFAULT_INTERVAL,
            qos: QoS::AtMostOnce,
        }
    }

    /// Sets the broker credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the network join parameters.
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Sets the sampling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the publish QoS.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }
}

/// Result of one publisher iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The reading reached the transport.
    Published {
        /// Publish calls made, 1 or 2
        attempts: u8,
    },
    /// The sensor produced no usable sample; nothing was sent.
    SkippedSample,
    /// The reading was given up after the reconnect or retry failed.
    Dropped {
        /// Publish calls made, 1 or 2
        attempts: u8,
    },
}

/// Long-running telemetry publisher.
///
/// Each iteration takes one sample and publishes it. A connection fault on
/// publish triggers one reconnect and one retry of the same reading; if that
/// fails too the reading is dropped and the next iteration starts fresh.
/// Sensor faults never cause a reconnect.
///
/// # Example
///
/// ```no_run
/// use resilient_telemetry::{
///     Endpoint, HostLink, MqttTransport, Publisher, PublisherConfig, Sample, TopicName,
/// };
/// use std::sync::atomic::AtomicBool;
///
/// let config = PublisherConfig::new(
///     Endpoint::parse("tcp://localhost:1883")?,
///     "sensor1",
///     "living room",
///     TopicName::parse("sensors/environmental")?,
/// );
/// let sensor = || -> resilient_telemetry::Result<Sample> { Ok(Sample::new(21.5, 40.0)) };
///
/// let mut publisher = Publisher::new(config, MqttTransport::new("sensor1"), sensor, HostLink)?;
/// let shutdown = AtomicBool::new(false);
/// publisher.run(&shutdown)?;
/// # Ok::<(), resilient_telemetry::Error>(())
/// ```
pub struct Publisher<T: Transport, S: SensorSource, N: NetworkLink> {
    config: PublisherConfig,
    connection: BrokerConnection<T>,
    sensor: S,
    link: N,
    joined_link: bool,
}

impl<T: Transport, S: SensorSource, N: NetworkLink> Publisher<T, S, N> {
    /// Creates a new publisher.
    ///
    /// Fails with [`Error::InvalidConfig`] if the interval is shorter than
    /// the sensor's minimum sampling interval.
    pub fn new(config: PublisherConfig, transport: T, sensor: S, link: N) -> Result<Self> {
        let min = sensor.min_interval();
        if config.interval < min {
            return Err(Error::InvalidConfig(format!(
                "publish interval {:?} is shorter than the sensor minimum {:?}",
                config.interval, min
            )));
        }

        Ok(Self {
            config,
            connection: BrokerConnection::new(transport),
            sensor,
            link,
            joined_link: false,
        })
    }

    /// Brings the network link up and connects to the broker.
    pub fn start(&mut self) -> Result<()> {
        self.reconnect()
    }

    /// Runs one sample/publish iteration without sleeping.
    pub fn run_once(&mut self) -> CycleOutcome {
        let sample = match self.sensor.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!("skipping cycle: {}", e);
                return CycleOutcome::SkippedSample;
            }
        };

        let reading =
            match Reading::from_sample(&self.config.device_id, &self.config.location, sample) {
                Ok(reading) => reading,
                Err(e) => {
                    warn!("skipping cycle: {}", e);
                    return CycleOutcome::SkippedSample;
                }
            };

        let payload = match reading.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("cannot encode reading: {}", e);
                return CycleOutcome::SkippedSample;
            }
        };

        let outcome = match self.publish(&payload) {
            Ok(()) => CycleOutcome::Published { attempts: 1 },
            Err(e) if e.is_connection_fault() => {
                warn!("publish failed: {}; reconnecting", e);
                if let Err(e) = self.reconnect() {
                    warn!("reconnect failed, dropping reading: {}", e);
                    return CycleOutcome::Dropped { attempts: 1 };
                }
                match self.publish(&payload) {
                    Ok(()) => CycleOutcome::Published { attempts: 2 },
                    Err(e) => {
                        warn!("retry failed, dropping reading: {}", e);
                        CycleOutcome::Dropped { attempts: 2 }
                    }
                }
            }
            Err(e) => {
                error!("publish rejected: {}", e);
                CycleOutcome::Dropped { attempts: 1 }
            }
        };

        if let CycleOutcome::Published { .. } = outcome {
            info!(
                "published {:.2}F {:.1}% to {}",
                reading.temperature_f, reading.humidity, self.config.topic
            );
        }
        outcome
    }

    /// Runs until `shutdown` is set, then disconnects.
    ///
    /// The flag is checked after each iteration, before the sleep. A failed
    /// initial connect is not fatal.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        if let Err(e) = self.start() {
            warn!("initial connect failed, will retry on publish: {}", e);
        }

        while !shutdown.load(Ordering::SeqCst) {
            let outcome = self.run_once();
            debug!("cycle finished: {:?}", outcome);
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(self.config.interval);
        }

        info!("shutting down publisher");
        self.shutdown()
    }

    /// Disconnects from the broker, then leaves the network if this
    /// publisher joined it.
    pub fn shutdown(&mut self) -> Result<()> {
        let result = self.connection.disconnect();
        if self.joined_link {
            self.link.disconnect();
            self.joined_link = false;
            debug!("left network '{}'", self.config.link.ssid);
        }
        result
    }

    /// The publisher configuration.
    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// The broker connection.
    pub fn connection(&self) -> &BrokerConnection<T> {
        &self.connection
    }

    /// The sensor.
    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// The network link.
    pub fn link(&self) -> &N {
        &self.link
    }

    fn publish(&mut self, payload: &[u8]) -> Result<()> {
        self.connection
            .publish(self.config.topic.as_str(), payload, self.config.qos)
    }

    fn reconnect(&mut self) -> Result<()> {
        if network::ensure_link(&mut self.link, &self.config.link)? {
            self.joined_link = true;
        }
        self.connection
            .connect(&self.config.endpoint, &self.config.credentials)
    }
}
