//! Resilient MQTT telemetry for small sensing devices.
//!
//! This library keeps a sensor publishing to a message broker, and a monitor
//! consuming from it, across WiFi drops, broker restarts and bad sensor
//! reads, without operator intervention.
//!
//! # Features
//!
//! - **Explicit state machine**: a [`BrokerConnection`] is `disconnected`,
//!   `connecting`, `connected` or `faulted`, and every failure says which
//! - **Subscription replay**: the subscription set lives on the client and
//!   is re-issued on every reconnect
//! - **Bounded publish retry**: one reconnect and one retry per reading, then
//!   the reading is dropped
//! - **Handler isolation**: a failing or panicking handler never stops the
//!   subscriber loop
//! - **Pluggable edges**: sensors, network links and transports are traits
//!
//! # Architecture
//!
//! - [`Publisher`]: sample → publish → recover → sleep
//! - [`Subscriber`]: poll → dispatch → recover → sleep
//! - [`BrokerConnection`]: session lifecycle, subscription replay, dispatch
//! - [`DispatchRegistry`]: topic filter to handler routing
//! - [`MqttTransport`]: MQTT 3.1.1 [`Transport`] on `rumqttc`
//! - [`Settings`]: file and environment configuration
//!
//! # Example: Publisher
//!
//! ```no_run
//! use resilient_telemetry::{HostLink, Publisher, Sample, Settings};
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), resilient_telemetry::Error> {
//! let settings = Settings::load()?;
//! let config = settings.publisher_config()?;
//! let transport = settings.transport(settings.device_id());
//!
//! let sensor = || -> resilient_telemetry::Result<Sample> { Ok(Sample::new(21.5, 40.0)) };
//! let mut publisher = Publisher::new(config, transport, sensor, HostLink)?;
//!
//! let shutdown = AtomicBool::new(false);
//! publisher.run(&shutdown)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Subscriber
//!
//! ```no_run
//! use resilient_telemetry::{HostLink, Message, Settings, Subscriber};
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), resilient_telemetry::Error> {
//! let settings = Settings::load()?;
//! let transport = settings.transport(settings.subscriber_client_id());
//! let mut subscriber = Subscriber::new(settings.subscriber_config()?, transport, HostLink);
//!
//! subscriber.subscribe_configured(|msg: &Message| {
//!     match msg.parse_reading() {
//!         Ok(reading) => println!("{}: {:.1}F", reading.device_id, reading.temperature_f),
//!         Err(_) => println!("{} :: {}", msg.topic, msg.payload_str()),
//!     }
//!     Ok(())
//! })?;
//!
//! let shutdown = AtomicBool::new(false);
//! subscriber.run(&shutdown)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod error;
pub mod mqtt;
pub mod network;
pub mod payload;
pub mod publisher;
pub mod registry;
pub mod sensor;
pub mod settings;
pub mod subscriber;
pub mod topic;
pub mod transport;
pub mod types;

pub use backoff::Backoff;
pub use connection::{BrokerConnection, ConnectionStats, PollOutcome};
pub use error::{Error, Result};
pub use mqtt::MqttTransport;
pub use network::{ensure_link, wait_for_link, HostLink, LinkConfig, NetworkLink};
pub use publisher::{CycleOutcome, Publisher, PublisherConfig};
pub use registry::{Dispatch, DispatchRegistry, HandlerResult};
pub use sensor::SensorSource;
pub use settings::Settings;
pub use subscriber::{Subscriber, SubscriberConfig};
pub use topic::{TopicFilter, TopicName};
pub use transport::{Credentials, Endpoint, Transport};
pub use types::{ConnectionState, Message, QoS, Reading, Sample};
