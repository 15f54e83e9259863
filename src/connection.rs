//! Broker connection state machine.
//!
//! A [`BrokerConnection`] owns a [`Transport`] and the [`DispatchRegistry`]
//! of the process. The registry is the authoritative subscription set: it
//! survives every disconnect and is replayed on each successful `connect`.

use crate::error::{Error, Result};
use crate::registry::{Dispatch, DispatchRegistry, HandlerResult};
use crate::topic::{TopicFilter, TopicName};
use crate::transport::{Credentials, Endpoint, Transport};
use crate::types::{ConnectionState, Message, QoS};
use log::{debug, info, warn};

/// Counters describing the lifetime of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Calls to `connect`
    pub connect_attempts: u64,
    /// Connects that failed, including failed subscription replays
    pub connect_failures: u64,
    /// Successful connects after the first one
    pub reconnects: u64,
    /// Messages handed to the transport successfully
    pub published: u64,
    /// Publishes rejected by the transport
    pub publish_failures: u64,
    /// Inbound messages delivered to a handler
    pub delivered: u64,
    /// Handler errors and panics
    pub handler_faults: u64,
}

/// Summary of one [`BrokerConnection::poll`].
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Messages delivered to a handler without error
    pub delivered: usize,
    /// Messages that matched no registered filter
    pub unmatched: usize,
    /// One entry per failing handler invocation
    pub handler_faults: Vec<Error>,
}

impl PollOutcome {
    /// Total number of messages received by this poll.
    pub fn received(&self) -> usize {
        self.delivered + self.unmatched + self.handler_faults.len()
    }
}

/// Session with a message broker, rebuilt in place on every reconnect.
///
/// # Example
///
/// ```no_run
/// use resilient_telemetry::{BrokerConnection, Credentials, Endpoint, MqttTransport, QoS};
///
/// let mut connection = BrokerConnection::new(MqttTransport::new("sensor1"));
/// connection.subscribe("sensors/#", |msg| {
///     println!("{} :: {}", msg.topic, msg.payload_str());
///     Ok(())
/// }).ok();
///
/// connection.connect(&Endpoint::parse("tcp://localhost:1883")?, &Credentials::anonymous())?;
/// connection.publish("sensors/hello", b"Hello MQTT!", QoS::AtMostOnce)?;
/// connection.poll()?;
/// connection.disconnect()?;
/// # Ok::<(), resilient_telemetry::Error>(())
/// ```
pub struct BrokerConnection<T: Transport> {
    transport: T,
    state: ConnectionState,
    registry: DispatchRegistry,
    subscribe_qos: QoS,
    stats: ConnectionStats,
}

impl<T: Transport> BrokerConnection<T> {
    /// Wraps `transport` in a disconnected connection.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            registry: DispatchRegistry::new(),
            subscribe_qos: QoS::AtMostOnce,
            stats: ConnectionStats::default(),
        }
    }

    /// Sets the QoS requested for subscriptions.
    pub fn with_subscribe_qos(mut self, qos: QoS) -> Self {
        self.subscribe_qos = qos;
        self
    }

    /// Opens a new session and replays every registered subscription.
    ///
    /// Any previous session is closed first. A filter the broker refuses is
    /// logged and skipped; it stays bound and is offered again next time. On failure the connection is
    /// left [`Faulted`](ConnectionState::Faulted) and the error is a
    /// [`Error::ConnectFault`].
    pub fn connect(&mut self, endpoint: &Endpoint, credentials: &Credentials) -> Result<()> {
        if let Err(e) = self.transport.close() {
            debug!("closing previous session failed: {}", e);
        }

        self.state = ConnectionState::Connecting;
        self.stats.connect_attempts += 1;
        debug!("connecting to {}", endpoint);

        if let Err(e) = self.transport.open(endpoint, credentials) {
            return Err(self.connect_failed(match e {
                Error::ConnectFault(details) => details,
                other => other.to_string(),
            }));
        }

        let mut replay_error = None;
        for filter in self.registry.filters() {
            match self.transport.subscribe(filter.as_str(), self.subscribe_qos) {
                Ok(()) => {}
                Err(Error::SubscriptionRejected(_)) => {
                    warn!("broker rejected '{}'; keeping the binding", filter);
                }
                Err(e) => {
                    replay_error = Some(format!("replaying subscription '{}': {}", filter, e));
                    break;
                }
            }
        }
        if let Some(details) = replay_error {
            if let Err(e) = self.transport.close() {
                debug!("closing half-open session failed: {}", e);
            }
            return Err(self.connect_failed(details));
        }

        if self.stats.connect_attempts > self.stats.connect_failures + 1 {
            self.stats.reconnects += 1;
        }
        self.state = ConnectionState::Connected;
        info!(
            "connected to {} ({} subscription(s) active)",
            endpoint,
            self.registry.len()
        );
        Ok(())
    }

    fn connect_failed(&mut self, details: String) -> Error {
        self.state = ConnectionState::Faulted;
        self.stats.connect_failures += 1;
        warn!("connect failed: {}", details);
        Error::ConnectFault(details)
    }

    /// Sends one message. No buffering and no retry.
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<()> {
        let topic = TopicName::parse(topic)?;
        self.ensure_connected("publish")?;

        match self.transport.publish(topic.as_str(), payload, qos) {
            Ok(()) => {
                self.stats.published += 1;
                debug!("published {} bytes to {}", payload.len(), topic);
                Ok(())
            }
            Err(e) => {
                self.stats.publish_failures += 1;
                Err(self.fault(e))
            }
        }
    }

    /// Binds `handler` to `filter` and subscribes if connected.
    ///
    /// The binding is recorded whatever the state, replacing an existing
    /// handler for the same filter. When not connected this returns
    /// [`Error::NotConnected`] and the filter is subscribed on the next
    /// successful [`connect`](Self::connect). A filter the broker refuses is
    /// reported as [`Error::SubscriptionRejected`] without faulting the session.
    pub fn subscribe<F>(&mut self, filter: &str, handler: F) -> Result<()>
    where
        F: FnMut(&Message) -> HandlerResult + Send + 'static,
    {
        let filter = TopicFilter::parse(filter)?;
        let raw = filter.as_str().to_string();
        if self.registry.register(filter, handler) {
            debug!("registered handler for '{}'", raw);
        } else {
            debug!("replaced handler for '{}'", raw);
        }

        self.ensure_connected("subscribe")?;
        match self.transport.subscribe(&raw, self.subscribe_qos) {
            Ok(()) => Ok(()),
            Err(e @ Error::SubscriptionRejected(_)) => {
                warn!("{}", e);
                Err(e)
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Removes the binding for `filter`. Returns true if one existed.
    ///
    /// While disconnected only the binding is dropped; the broker has no
    /// session to update.
    pub fn unsubscribe(&mut self, filter: &str) -> Result<bool> {
        if !self.registry.remove(filter) {
            return Ok(false);
        }
        if self.state == ConnectionState::Connected {
            self.transport
                .unsubscribe(filter)
                .map_err(|e| self.fault(e))?;
        }
        Ok(true)
    }

    /// Drains pending inbound messages and dispatches each one.
    ///
    /// A failing handler does not prevent the remaining messages from being
    /// dispatched; its fault is returned in the [`PollOutcome`].
    pub fn poll(&mut self) -> Result<PollOutcome> {
        self.ensure_connected("poll")?;

        let messages = self.transport.poll().map_err(|e| self.fault(e))?;
        let mut outcome = PollOutcome::default();

        for message in &messages {
            match self.registry.dispatch(message) {
                Dispatch::Delivered => {
                    self.stats.delivered += 1;
                    outcome.delivered += 1;
                }
                Dispatch::Unmatched => {
                    debug!("no handler for '{}'", message.topic);
                    outcome.unmatched += 1;
                }
                Dispatch::Failed(e) => {
                    self.stats.handler_faults += 1;
                    outcome.handler_faults.push(e);
                }
            }
        }

        Ok(outcome)
    }

    /// Closes the session. The subscription set is kept.
    pub fn disconnect(&mut self) -> Result<()> {
        let was = self.state;
        let result = self.transport.close();
        self.state = ConnectionState::Disconnected;

        if was == ConnectionState::Connected {
            info!("disconnected");
            result
        } else {
            Ok(())
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true while a session is established.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Registered filters in registration order.
    pub fn subscriptions(&self) -> Vec<&TopicFilter> {
        self.registry.filters().collect()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn ensure_connected(&self, operation: &'static str) -> Result<()> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected {
                operation,
                state: self.state,
            })
        }
    }

    fn fault(&mut self, e: Error) -> Error {
        warn!("connection faulted: {}", e);
        self.state = ConnectionState::Faulted;
        e
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for BrokerConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Default)]
    struct FakeTransport {
        open: bool,
        fail_opens: u32,
        fail_next_publish: bool,
        subscribed: Vec<String>,
        inbox: VecDeque<Message>,
    }

    impl Transport for FakeTransport {
        fn open(&mut self, _endpoint: &Endpoint, _credentials: &Credentials) -> Result<()> {
            if self.fail_opens > 0 {
                self.fail_opens -= 1;
                return Err(Error::ConnectFault("refused".into()));
            }
            self.open = true;
            self.subscribed.clear();
            Ok(())
        }

        fn publish(&mut self, _topic: &str, _payload: &[u8], _qos: QoS) -> Result<()> {
            if std::mem::take(&mut self.fail_next_publish) {
                self.open = false;
                return Err(Error::transport("publish", "broken pipe"));
            }
            Ok(())
        }

        fn subscribe(&mut self, filter: &str, _qos: QoS) -> Result<()> {
            self.subscribed.push(filter.to_string());
            Ok(())
        }

        fn unsubscribe(&mut self, filter: &str) -> Result<()> {
            self.subscribed.retain(|f| f != filter);
            Ok(())
        }

        fn poll(&mut self) -> Result<Vec<Message>> {
            Ok(self.inbox.drain(..).collect())
        }

        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("localhost", 1883)
    }

    #[test]
    fn test_operations_require_connection() {
        let mut conn = BrokerConnection::new(FakeTransport::default());
        assert!(matches!(
            conn.publish("sensors/environmental", b"{}", QoS::AtMostOnce),
            Err(Error::NotConnected { operation: "publish", state: ConnectionState::Disconnected })
        ));
        assert!(matches!(conn.poll(), Err(Error::NotConnected { .. })));
    }

    #[test]
    fn test_subscribe_while_disconnected_records_binding() {
        let mut conn = BrokerConnection::new(FakeTransport::default());
        assert!(conn.subscribe("sensors/#", |_| Ok(())).is_err());
        assert_eq!(conn.subscriptions().len(), 1);

        conn.connect(&endpoint(), &Credentials::anonymous()).unwrap();
        assert_eq!(conn.transport().subscribed, vec!["sensors/#".to_string()]);
    }

    #[test]
    fn test_failed_connect_faults() {
        let transport = FakeTransport {
            fail_opens: 1,
            ..Default::default()
        };
        let mut conn = BrokerConnection::new(transport);

        assert!(matches!(
            conn.connect(&endpoint(), &Credentials::anonymous()),
            Err(Error::ConnectFault(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Faulted);

        conn.connect(&endpoint(), &Credentials::anonymous()).unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.stats().connect_failures, 1);
        assert_eq!(conn.stats().reconnects, 0);
    }

    #[test]
    fn test_publish_fault_then_reconnect() {
        let mut conn = BrokerConnection::new(FakeTransport::default());
        conn.connect(&endpoint(), &Credentials::anonymous()).unwrap();
        conn.transport_mut().fail_next_publish = true;

        assert!(matches!(
            conn.publish("a/b", b"1", QoS::AtMostOnce),
            Err(Error::TransportFault { .. })
        ));
        assert_eq!(conn.state(), ConnectionState::Faulted);

        conn.connect(&endpoint(), &Credentials::anonymous()).unwrap();
        conn.publish("a/b", b"1", QoS::AtMostOnce).unwrap();
        assert_eq!(conn.stats().reconnects, 1);
        assert_eq!(conn.stats().published, 1);
        assert_eq!(conn.stats().publish_failures, 1);
    }

    #[test]
    fn test_publish_rejects_wildcard_topic() {
        let mut conn = BrokerConnection::new(FakeTransport::default());
        conn.connect(&endpoint(), &Credentials::anonymous()).unwrap();
        assert!(matches!(
            conn.publish("sensors/#", b"", QoS::AtMostOnce),
            Err(Error::InvalidTopic(_))
        ));
        assert!(conn.is_connected());
    }

    #[test]
    fn test_poll_isolates_handler_faults() {
        let mut conn = BrokerConnection::new(FakeTransport::default());
        conn.connect(&endpoint(), &Credentials::anonymous()).unwrap();
        conn.subscribe("sensors/bad", |_| Err("bad payload".into())).unwrap();
        conn.subscribe("sensors/#", |_| Ok(())).unwrap();

        let inbox = &mut conn.transport_mut().inbox;
        inbox.push_back(Message::new("sensors/bad", "x"));
        inbox.push_back(Message::new("sensors/good", "y"));
        inbox.push_back(Message::new("other/thing", "z"));

        let outcome = conn.poll().unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.unmatched, 1);
        assert_eq!(outcome.handler_faults.len(), 1);
        assert_eq!(outcome.received(), 3);
        assert!(conn.is_connected());
    }

    #[test]
    fn test_unsubscribe_and_disconnect() {
        let mut conn = BrokerConnection::new(FakeTransport::default());
        conn.connect(&endpoint(), &Credentials::anonymous()).unwrap();
        conn.subscribe("a/#", |_| Ok(())).unwrap();

        assert!(conn.unsubscribe("a/#").unwrap());
        assert!(!conn.unsubscribe("a/#").unwrap());
        assert!(conn.transport().subscribed.is_empty());

        conn.disconnect().unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.transport().open);
    }
}
