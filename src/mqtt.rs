//! MQTT transport built on the `rumqttc` blocking client.
//!
//! `rumqttc` performs network I/O only while its event loop is polled, so
//! every operation here enqueues a request on the [`Client`] and then drives
//! the [`Connection`] until the request has left the client (or the broker
//! acknowledged it, for QoS 1 and 2). Publishes that arrive while driving are
//! kept in a backlog and handed out by the next [`Transport::poll`].

use crate::error::{Error, Result};
use crate::transport::{Credentials, Endpoint, Transport};
use crate::types::{Message, QoS};
use log::{debug, trace};
use rumqttc::{
    Client, Connection, Event, MqttOptions, Outgoing, Packet, RecvTimeoutError,
    SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_WINDOW: Duration = Duration::from_millis(10);
const REQUEST_CAPACITY: usize = 16;
const MAX_EVENTS_PER_POLL: usize = 256;

struct Session {
    client: Client,
    connection: Connection,
}

/// [`Transport`] speaking MQTT 3.1.1 over TCP.
pub struct MqttTransport {
    client_id: String,
    keep_alive: Duration,
    connect_timeout: Duration,
    io_timeout: Duration,
    poll_window: Duration,
    session: Option<Session>,
    backlog: VecDeque<Message>,
}

impl MqttTransport {
    /// Creates a transport that identifies itself with `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            poll_window: DEFAULT_POLL_WINDOW,
            session: None,
            backlog: VecDeque::new(),
        }
    }

    /// Sets the MQTT keep-alive interval (at least one second).
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive.max(Duration::from_secs(1));
        self
    }

    /// Sets how long `open` waits for the broker's CONNACK.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long publish/subscribe wait for the request to go out.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Sets the receive window used by `poll` to drain pending messages.
    pub fn with_poll_window(mut self, window: Duration) -> Self {
        self.poll_window = window;
        self
    }

    /// Client identifier presented to the broker.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn session(&mut self, operation: &'static str) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::transport(operation, "no open session"))
    }

    /// Drives the event loop until `wanted` accepts an event.
    fn drive<F>(
        &mut self,
        operation: &'static str,
        timeout: Duration,
        mut wanted: F,
    ) -> std::result::Result<Event, String>
    where
        F: FnMut(&Event) -> bool,
    {
        let Some(session) = self.session.as_mut() else {
            return Err("no open session".to_string());
        };
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(format!("{} timed out after {:?}", operation, timeout));
            }

            match session.connection.recv_timeout(remaining) {
                Ok(Ok(event)) => {
                    trace!("mqtt {}: {:?}", operation, event);
                    if let Event::Incoming(Packet::Publish(publish)) = &event {
                        self.backlog.push_back(Message::new(
                            publish.topic.clone(),
                            publish.payload.to_vec(),
                        ));
                    }
                    if wanted(&event) {
                        return Ok(event);
                    }
                }
                Ok(Err(e)) => return Err(e.to_string()),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(format!("{} timed out after {:?}", operation, timeout))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err("event loop disconnected".to_string())
                }
            }
        }
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("client_id", &self.client_id)
            .field("keep_alive", &self.keep_alive)
            .field("connected", &self.session.is_some())
            .field("backlog", &self.backlog.len())
            .finish()
    }
}

impl Transport for MqttTransport {
    fn open(&mut self, endpoint: &Endpoint, credentials: &Credentials) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::ConnectFault("client id must not be empty".to_string()));
        }
        self.session = None;
        self.backlog.clear();

        let mut options = MqttOptions::new(self.client_id.clone(), endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &credentials.username {
            options.set_credentials(
                username.clone(),
                credentials.password.clone().unwrap_or_default(),
            );
        }

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        self.session = Some(Session { client, connection });

        let timeout = self.connect_timeout;
        match self.drive("connect", timeout, |event| {
            matches!(event, Event::Incoming(Packet::ConnAck(_)))
        }) {
            Ok(_) => {
                debug!("mqtt session open to {} as {}", endpoint, self.client_id);
                Ok(())
            }
            Err(details) => {
                self.session = None;
                Err(Error::ConnectFault(format!("{}: {}", endpoint, details)))
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<()> {
        self.session("publish")?
            .client
            .publish(topic, qos, false, payload.to_vec())
            .map_err(|e| Error::transport("publish", e))?;

        let timeout = self.io_timeout;
        let result = self.drive("publish", timeout, |event| match qos {
            QoS::AtMostOnce => matches!(event, Event::Outgoing(Outgoing::Publish(_))),
            QoS::AtLeastOnce => matches!(event, Event::Incoming(Packet::PubAck(_))),
            QoS::ExactlyOnce => matches!(event, Event::Incoming(Packet::PubComp(_))),
        });

        result
            .map(|_| ())
            .map_err(|details| Error::transport("publish", details))
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<()> {
        self.session("subscribe")?
            .client
            .subscribe(filter, qos)
            .map_err(|e| Error::transport("subscribe", e))?;

        let timeout = self.io_timeout;
        let event = self
            .drive("subscribe", timeout, |event| {
                matches!(event, Event::Incoming(Packet::SubAck(_)))
            })
            .map_err(|details| Error::transport("subscribe", details))?;

        if let Event::Incoming(Packet::SubAck(ack)) = event {
            if ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                return Err(Error::SubscriptionRejected(filter.to_string()));
            }
        }
        Ok(())
    }

    fn unsubscribe(&mut self, filter: &str) -> Result<()> {
        self.session("unsubscribe")?
            .client
            .unsubscribe(filter)
            .map_err(|e| Error::transport("unsubscribe", e))?;

        let timeout = self.io_timeout;
        self.drive("unsubscribe", timeout, |event| {
            matches!(event, Event::Incoming(Packet::UnsubAck(_)))
        })
        .map(|_| ())
        .map_err(|details| Error::transport("unsubscribe", details))
    }

    fn poll(&mut self) -> Result<Vec<Message>> {
        let window = self.poll_window;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::transport("poll", "no open session"))?;

        for _ in 0..MAX_EVENTS_PER_POLL {
            match session.connection.recv_timeout(window) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    self.backlog
                        .push_back(Message::new(publish.topic, publish.payload.to_vec()));
                }
                Ok(Ok(event)) => trace!("mqtt poll: {:?}", event),
                Ok(Err(e)) => return Err(Error::transport("poll", e)),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::transport("poll", "event loop disconnected"))
                }
            }
        }

        Ok(self.backlog.drain(..).collect())
    }

    fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };

        if let Err(e) = session.client.disconnect() {
            debug!("mqtt disconnect request failed: {}", e);
        } else {
            let timeout = self.io_timeout;
            if let Err(details) = self.drive("disconnect", timeout, |event| {
                matches!(event, Event::Outgoing(Outgoing::Disconnect))
            }) {
                debug!("mqtt disconnect not confirmed: {}", details);
            }
        }

        self.session = None;
        self.backlog.clear();
        Ok(())
    }
}
