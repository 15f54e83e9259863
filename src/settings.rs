//! Startup configuration.
//!
//! Settings are read once, from an optional file followed by environment
//! variables. Every field has a default, so an empty environment yields a
//! client for a broker on `localhost:1883`.
//!
//! Environment variables use the `TELEMETRY` prefix and `__` between
//! section and key, e.g. `TELEMETRY_BROKER__URL=tcp://10.0.0.2:1883` or
//! `TELEMETRY_SUBSCRIBER__TOPICS=sensors/#,alerts/#`.

use crate::backoff::Backoff;
use crate::error::{Error, Result};
use crate::mqtt::MqttTransport;
use crate::network::LinkConfig;
use crate::publisher::{PublisherConfig, DEFAULT_INTERVAL, DEFAULT_TOPIC};
use crate::subscriber::{SubscriberConfig, DEFAULT_FILTER, DEFAULT_POLL_INTERVAL};
use crate::topic::{TopicFilter, TopicName};
use crate::transport::{Credentials, Endpoint};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Default configuration file, without extension.
pub const DEFAULT_CONFIG_FILE: &str = "config/telemetry";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "TELEMETRY";

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Broker URL, e.g. `tcp://localhost:1883`
    pub url: String,
    /// User name; anonymous login when unset
    pub username: Option<String>,
    /// Password
    pub password: Option<String>,
    /// MQTT keep-alive in seconds
    pub keep_alive_secs: u64,
    /// Time allowed for the broker to accept a connection
    pub connect_timeout_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "tcp://localhost:1883".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 15,
            connect_timeout_secs: 10,
        }
    }
}

/// Network join settings. An empty SSID means the host manages the network.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Network name
    pub ssid: String,
    /// Network passphrase
    pub password: String,
    /// Time allowed for the link to come up
    pub join_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            join_timeout_secs: 20,
        }
    }
}

/// Identity of the sensing device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Device id; derived from the process id when unset.
    pub id: Option<String>,
    /// Location label written into readings
    pub location: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: None,
            location: "living room".to_string(),
        }
    }
}

/// Publisher loop settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    /// Topic readings are published to
    pub topic: String,
    /// Seconds between two samples
    pub interval_secs: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            interval_secs: DEFAULT_INTERVAL.as_secs(),
        }
    }
}

/// Subscriber loop settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SubscriberSettings {
    /// MQTT client id; `<device id>-sub` when unset.
    pub client_id: Option<String>,
    /// Filters to subscribe
    pub topics: Vec<String>,
    /// Milliseconds between two polls
    pub poll_interval_ms: u64,
    /// First reconnect delay in milliseconds
    pub backoff_initial_ms: u64,
    /// Longest reconnect delay in milliseconds
    pub backoff_max_ms: u64,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            topics: vec![DEFAULT_FILTER.to_string()],
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[broker]` section
    pub broker: BrokerSettings,
    /// `[network]` section
    pub network: NetworkSettings,
    /// `[device]` section
    pub device: DeviceSettings,
    /// `[publisher]` section
    pub publisher: PublisherSettings,
    /// `[subscriber]` section
    pub subscriber: SubscriberSettings,
}

impl Settings {
    /// Loads `config/telemetry.*` (if present) and `TELEMETRY_*` variables.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Loads the given file (if present, extension optional) and `TELEMETRY_*` variables.
    pub fn load_from(path: &str) -> Result<Self> {
        Self::build(Some(path), None)
    }

    /// Loads the given file and environment entries taken from `vars`
    /// instead of the process environment.
    pub fn load_with_env<I, K, V>(path: Option<&str>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::build(path, Some(vars))
    }

    fn build(path: Option<&str>, vars: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("subscriber.topics")
                .source(vars),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.broker.keep_alive_secs == 0 {
            return Err(Error::InvalidConfig(
                "broker.keep_alive_secs must be positive".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "broker.connect_timeout_secs must be positive".to_string(),
            ));
        }
        if self.publisher.interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "publisher.interval_secs must be positive".to_string(),
            ));
        }
        if self.subscriber.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "subscriber.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.subscriber.topics.is_empty() {
            return Err(Error::InvalidConfig(
                "subscriber.topics must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The device id, or the hex process id when none is configured.
    pub fn device_id(&self) -> String {
        match &self.device.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("{:x}", std::process::id()),
        }
    }

    /// The subscriber's MQTT client id.
    pub fn subscriber_client_id(&self) -> String {
        match &self.subscriber.client_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => format!("{}-sub", self.device_id()),
        }
    }

    /// Broker credentials; anonymous when no username is set.
    pub fn credentials(&self) -> Credentials {
        match &self.broker.username {
            Some(username) => Credentials {
                username: Some(username.clone()),
                password: self.broker.password.clone(),
            },
            None => Credentials::anonymous(),
        }
    }

    /// Network join parameters.
    pub fn link_config(&self) -> LinkConfig {
        let mut link = LinkConfig::new(&self.network.ssid, &self.network.password);
        link.join_timeout = Duration::from_secs(self.network.join_timeout_secs);
        link
    }

    /// An MQTT transport identifying itself as `client_id`.
    pub fn transport(&self, client_id: impl Into<String>) -> MqttTransport {
        MqttTransport::new(client_id)
            .with_keep_alive(Duration::from_secs(self.broker.keep_alive_secs))
            .with_connect_timeout(Duration::from_secs(self.broker.connect_timeout_secs))
    }

    /// Publisher configuration derived from these settings.
    pub fn publisher_config(&self) -> Result<PublisherConfig> {
        Ok(PublisherConfig::new(
            Endpoint::parse(&self.broker.url)?,
            self.device_id(),
            &self.device.location,
            TopicName::parse(&self.publisher.topic)?,
        )
        .with_credentials(self.credentials())
        .with_link(self.link_config())
        .with_interval(Duration::from_secs(self.publisher.interval_secs)))
    }

    /// Subscriber configuration derived from these settings.
    pub fn subscriber_config(&self) -> Result<SubscriberConfig> {
        let topics = self
            .subscriber
            .topics
            .iter()
            .map(|t| TopicFilter::parse(t))
            .collect::<Result<Vec<_>>>()?;

        Ok(SubscriberConfig::new(Endpoint::parse(&self.broker.url)?)
            .with_credentials(self.credentials())
            .with_link(self.link_config())
            .with_topics(topics)
            .with_poll_interval(Duration::from_millis(self.subscriber.poll_interval_ms))
            .with_backoff(Backoff::new(
                Duration::from_millis(self.subscriber.backoff_initial_ms),
                Duration::from_millis(self.subscriber.backoff_max_ms),
                2.0,
            )))
    }
}
