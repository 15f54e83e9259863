//! Broker transport abstraction.
//!
//! A [`Transport`] owns at most one broker session at a time. The
//! [`BrokerConnection`](crate::BrokerConnection) drives it and decides when a
//! session is opened, torn down or replaced; the transport itself never
//! reconnects on its own.

use crate::error::{Error, Result};
use crate::types::{Message, QoS};

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a broker URL.
    ///
    /// Accepts `tcp://host:port`, `mqtt://host:port` or a bare `host[:port]`.
    /// The port defaults to 1883.
    ///
    /// # Examples
    ///
    /// ```
    /// use resilient_telemetry::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("tcp://broker.local:1884")?;
    /// assert_eq!(endpoint.host, "broker.local");
    /// assert_eq!(endpoint.port, 1884);
    ///
    /// let endpoint = Endpoint::parse("192.168.1.20")?;
    /// assert_eq!(endpoint.port, 1883);
    /// # Ok::<(), resilient_telemetry::Error>(())
    /// ```
    pub fn parse(url: &str) -> Result<Self> {
        let rest = match url.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => {
                return Err(Error::InvalidConfig(format!(
                    "unsupported broker scheme '{}' in '{}'",
                    scheme, url
                )))
            }
            None => url,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::InvalidConfig(format!("invalid broker port '{}' in '{}'", port, url))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "broker url '{}' has no host",
                url
            )));
        }

        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Broker login. Both fields are optional for anonymous brokers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl Credentials {
    /// Credentials for an anonymous session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// User name and password credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A session-oriented link to a message broker.
///
/// `open` failures are reported as [`Error::ConnectFault`]; failures of the
/// other operations as [`Error::TransportFault`]. After any failure the
/// caller is expected to `close` and `open` again.
pub trait Transport {
    /// Opens a new session, replacing any previous one.
    fn open(&mut self, endpoint: &Endpoint, credentials: &Credentials) -> Result<()>;

    /// Sends one message. No buffering, no retry.
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<()>;

    /// Issues a subscribe request for `filter`.
    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<()>;

    /// Issues an unsubscribe request for `filter`.
    fn unsubscribe(&mut self, filter: &str) -> Result<()>;

    /// Returns all inbound messages that are pending right now, possibly none.
    fn poll(&mut self) -> Result<Vec<Message>>;

    /// Ends the session. Closing an already closed transport is a no-op.
    fn close(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, endpoint: &Endpoint, credentials: &Credentials) -> Result<()> {
        (**self).open(endpoint, credentials)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<()> {
        (**self).publish(topic, payload, qos)
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<()> {
        (**self).subscribe(filter, qos)
    }

    fn unsubscribe(&mut self, filter: &str) -> Result<()> {
        (**self).unsubscribe(filter)
    }

    fn poll(&mut self) -> Result<Vec<Message>> {
        (**self).poll()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
