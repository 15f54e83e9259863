//! Telemetry subscriber loop: keep the subscription set live and dispatch.

use crate::backoff::Backoff;
use crate::connection::{BrokerConnection, PollOutcome};
use crate::error::Result;
use crate::network::{self, LinkConfig, NetworkLink};
use crate::registry::HandlerResult;
use crate::topic::TopicFilter;
use crate::transport::{Credentials, Endpoint, Transport};
use crate::types::Message;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Default pause between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default subscription filter.
pub const DEFAULT_FILTER: &str = "sensors/#";

/// Configuration for a telemetry [`Subscriber`].
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Broker address.
    pub endpoint: Endpoint,
    /// Broker login, presented again on every reconnect.
    pub credentials: Credentials,
    /// Network join parameters.
    pub link: LinkConfig,
    /// Filters bound by [`Subscriber::subscribe_configured`].
    pub topics: Vec<TopicFilter>,
    /// Pause between two polls.
    pub poll_interval: Duration,
    /// Delay policy between failed reconnects.
    pub backoff: Backoff,
}

impl SubscriberConfig {
    /// Creates a new subscriber configuration with anonymous credentials,
    /// the host network link and no configured topics.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            credentials: Credentials::anonymous(),
            link: LinkConfig::default(),
            topics: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            backoff: Backoff::default(),
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

    /// Sets the filters bound by [`Subscriber::subscribe_configured`].
    pub fn with_topics(mut self, topics: Vec<TopicFilter>) -> Self {
        self.topics = topics;
        self
    }

    /// Sets the pause between polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the reconnect backoff policy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Long-running telemetry subscriber.
///
/// Handlers are bound with [`add_subscription`](Self::add_subscription) or
/// [`subscribe_configured`](Self::subscribe_configured), before or after
/// [`start`](Self::start). Bindings outlive every disconnect and are
/// re-issued to the broker by each successful reconnect.
///
/// # Example
///
/// ```no_run
/// use resilient_telemetry::{Endpoint, HostLink, MqttTransport, Subscriber, SubscriberConfig};
/// use std::sync::atomic::AtomicBool;
///
/// let config = SubscriberConfig::new(Endpoint::parse("tcp://localhost:1883")?);
/// let mut subscriber = Subscriber::new(config, MqttTransport::new("monitor"), HostLink);
///
/// subscriber.add_subscription("sensors/#", |msg| {
///     println!("{} :: {}", msg.topic, msg.payload_str());
///     Ok(())
/// })?;
///
/// let shutdown = AtomicBool::new(false);
/// subscriber.run(&shutdown)?;
/// # Ok::<(), resilient_telemetry::Error>(())
/// ```
pub struct Subscriber<T: Transport, N: NetworkLink> {
    config: SubscriberConfig,
    connection: BrokerConnection<T>,
    link: N,
    backoff: Backoff,
    retry_at: Option<Instant>,
    joined_link: bool,
}

impl<T: Transport, N: NetworkLink> Subscriber<T, N> {
    /// Creates a new subscriber. Nothing is connected until [`start`](Self::start).
    pub fn new(config: SubscriberConfig, transport: T, link: N) -> Self {
        let backoff = config.backoff.clone();
        Self {
            config,
            connection: BrokerConnection::new(transport),
            link,
            backoff,
            retry_at: None,
            joined_link: false,
        }
    }

    /// Binds `handler` to `filter`.
    ///
    /// Only an invalid or broker-rejected filter is an error. If the connection is down the
    /// binding is kept and subscribed on the next reconnect.
    pub fn add_subscription<F>(&mut self, filter: &str, handler: F) -> Result<()>
    where
        F: FnMut(&Message) -> HandlerResult + Send + 'static,
    {
        match self.connection.subscribe(filter, handler) {
            Ok(()) => Ok(()),
            Err(e) if e.is_connection_fault() => {
                debug!("'{}' will be subscribed on reconnect: {}", filter, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Binds a copy of `handler` to every configured filter.
    pub fn subscribe_configured<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(&Message) -> HandlerResult + Clone + Send + 'static,
    {
        let filters: Vec<String> = self
            .config
            .topics
            .iter()
            .map(|f| f.as_str().to_string())
            .collect();
        for filter in filters {
            self.add_subscription(&filter, handler.clone())?;
        }
        Ok(())
    }

    /// Removes the binding for `filter`.
    pub fn remove_subscription(&mut self, filter: &str) -> Result<bool> {
        self.connection.unsubscribe(filter)
    }

    /// Brings the network link up and connects; bound filters are
    /// subscribed as part of the connect.
    ///
    /// A failure schedules the next attempt according to the backoff policy.
    pub fn start(&mut self) -> Result<()> {
        let result = self.reconnect();
        self.record_attempt(&result);
        result
    }

    /// Polls once and dispatches whatever arrived.
    ///
    /// Handler faults are logged. A connection fault, or a connection that
    /// is still down, leads to a reconnect once the backoff delay has passed.
    pub fn poll_once(&mut self) -> PollOutcome {
        if !self.connection.is_connected() && !self.try_reconnect() {
            return PollOutcome::default();
        }

        match self.connection.poll() {
            Ok(outcome) => {
                for fault in &outcome.handler_faults {
                    warn!("{}", fault);
                }
                outcome
            }
            Err(e) => {
                warn!("poll failed: {}; reconnecting", e);
                self.try_reconnect();
                PollOutcome::default()
            }
        }
    }

    /// Runs until `shutdown` is set, then disconnects.
    ///
    /// The flag is checked after each poll, before the sleep.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        if let Err(e) = self.start() {
            warn!("initial connect failed, will retry: {}", e);
        }

        while !shutdown.load(Ordering::SeqCst) {
            self.poll_once();
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(self.config.poll_interval);
        }

        info!("shutting down subscriber");
        self.shutdown()
    }

    /// Disconnects from the broker and leaves the network if this
    /// subscriber joined it. Bindings are kept.
    pub fn shutdown(&mut self) -> Result<()> {
        let result = self.connection.disconnect();
        if self.joined_link {
            self.link.disconnect();
            self.joined_link = false;
            debug!("left network '{}'", self.config.link.ssid);
        }
        result
    }

    /// The subscriber configuration.
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// The broker connection.
    pub fn connection(&self) -> &BrokerConnection<T> {
        &self.connection
    }

    /// The network link.
    pub fn link(&self) -> &N {
        &self.link
    }

    fn try_reconnect(&mut self) -> bool {
        if let Some(at) = self.retry_at {
            if Instant::now() < at {
                return false;
            }
        }
        let result = self.reconnect();
        self.record_attempt(&result);
        result.is_ok()
    }

    fn record_attempt(&mut self, result: &Result<()>) {
        match result {
            Ok(()) => {
                self.backoff.reset();
                self.retry_at = None;
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                warn!("reconnect failed: {}; next attempt in {:?}", e, delay);
                self.retry_at = Some(Instant::now() + delay);
            }
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        if network::ensure_link(&mut self.link, &self.config.link)? {
            self.joined_link = true;
        }
        self.connection
            .connect(&self.config.endpoint, &self.config.credentials)
    }
}
