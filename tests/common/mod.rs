//! Scripted in-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use resilient_telemetry::{
    Credentials, Endpoint, Error, Message, NetworkLink, QoS, Result, Sample, SensorSource,
    Transport,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
struct BrokerState {
    open: bool,
    open_script: VecDeque<bool>,
    publish_script: VecDeque<bool>,
    subscribe_script: VecDeque<bool>,
    poll_script: VecDeque<bool>,
    open_calls: usize,
    publish_calls: usize,
    subscribe_calls: usize,
    close_calls: usize,
    active: Vec<String>,
    rejected: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    inbox: VecDeque<Message>,
}

/// Transport backed by an in-memory broker. Clones share the same broker,
/// so a test can keep one clone to script and inspect it.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: Rc<RefCell<BrokerState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues results for the next `open` calls; unscripted calls succeed.
    pub fn script_open(&self, results: &[bool]) {
        self.state.borrow_mut().open_script.extend(results);
    }

    pub fn script_publish(&self, results: &[bool]) {
        self.state.borrow_mut().publish_script.extend(results);
    }

    pub fn script_subscribe(&self, results: &[bool]) {
        self.state.borrow_mut().subscribe_script.extend(results);
    }

    pub fn script_poll(&self, results: &[bool]) {
        self.state.borrow_mut().poll_script.extend(results);
    }

    /// Makes the broker refuse `filter` without dropping the session.
    pub fn reject_filter(&self, filter: &str) {
        self.state.borrow_mut().rejected.push(filter.to_string());
    }

    /// Delivers a message on the next poll.
    pub fn push_inbound(&self, topic: &str, payload: &str) {
        self.state
            .borrow_mut()
            .inbox
            .push_back(Message::new(topic, payload));
    }

    /// Drops the session as a broker restart would.
    pub fn kill_session(&self) {
        let mut state = self.state.borrow_mut();
        state.open = false;
        state.active.clear();
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    pub fn open_calls(&self) -> usize {
        self.state.borrow().open_calls
    }

    pub fn publish_calls(&self) -> usize {
        self.state.borrow().publish_calls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.borrow().subscribe_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.borrow().close_calls
    }

    /// Filters the broker currently holds for this client.
    pub fn active_subscriptions(&self) -> Vec<String> {
        self.state.borrow().active.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.borrow().published.clone()
    }
}

fn next(script: &mut VecDeque<bool>) -> bool {
    script.pop_front().unwrap_or(true)
}

impl Transport for FakeTransport {
    fn open(&mut self, _endpoint: &Endpoint, _credentials: &Credentials) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.open_calls += 1;
        state.active.clear();
        if !next(&mut state.open_script) {
            state.open = false;
            return Err(Error::ConnectFault("connection refused".to_string()));
        }
        state.open = true;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], _qos: QoS) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.publish_calls += 1;
        if !state.open || !next(&mut state.publish_script) {
            state.open = false;
            return Err(Error::TransportFault {
                operation: "publish",
                details: "broken pipe".to_string(),
            });
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&mut self, filter: &str, _qos: QoS) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.subscribe_calls += 1;
        if !state.open || !next(&mut state.subscribe_script) {
            state.open = false;
            return Err(Error::TransportFault {
                operation: "subscribe",
                details: "broken pipe".to_string(),
            });
        }
        if state.rejected.iter().any(|f| f == filter) {
            return Err(Error::SubscriptionRejected(filter.to_string()));
        }
        if !state.active.iter().any(|f| f == filter) {
            state.active.push(filter.to_string());
        }
        Ok(())
    }

    fn unsubscribe(&mut self, filter: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.open {
            return Err(Error::TransportFault {
                operation: "unsubscribe",
                details: "no session".to_string(),
            });
        }
        state.active.retain(|f| f != filter);
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Message>> {
        let mut state = self.state.borrow_mut();
        if !state.open || !next(&mut state.poll_script) {
            state.open = false;
            return Err(Error::TransportFault {
                operation: "poll",
                details: "connection reset".to_string(),
            });
        }
        Ok(state.inbox.drain(..).collect())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.close_calls += 1;
        state.open = false;
        state.active.clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LinkState {
    up: bool,
    joins: usize,
    join_script: VecDeque<bool>,
}

/// Network link that comes up on a successful join.
#[derive(Debug, Clone, Default)]
pub struct FakeLink {
    state: Rc<RefCell<LinkState>>,
}

impl FakeLink {
    pub fn up() -> Self {
        let link = Self::default();
        link.state.borrow_mut().up = true;
        link
    }

    pub fn down() -> Self {
        Self::default()
    }

    pub fn script_join(&self, results: &[bool]) {
        self.state.borrow_mut().join_script.extend(results);
    }

    pub fn drop_link(&self) {
        self.state.borrow_mut().up = false;
    }

    pub fn joins(&self) -> usize {
        self.state.borrow().joins
    }

    pub fn is_up(&self) -> bool {
        self.state.borrow().up
    }
}

impl NetworkLink for FakeLink {
    fn connect(&mut self, _ssid: &str, _password: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.joins += 1;
        if !next(&mut state.join_script) {
            return Err(Error::ConnectFault("association rejected".to_string()));
        }
        state.up = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().up
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().up = false;
    }
}

/// Sensor replaying a script; `None` entries are failed reads. Once the
/// script is exhausted it keeps returning the default sample.
#[derive(Debug)]
pub struct FakeSensor {
    script: VecDeque<Option<Sample>>,
    default: Sample,
    pub calls: usize,
    pub min_interval: Duration,
}

impl FakeSensor {
    pub fn steady(sample: Sample) -> Self {
        Self {
            script: VecDeque::new(),
            default: sample,
            calls: 0,
            min_interval: Duration::from_secs(2),
        }
    }

    pub fn scripted(script: Vec<Option<Sample>>, default: Sample) -> Self {
        Self {
            script: script.into(),
            ..Self::steady(default)
        }
    }
}

impl SensorSource for FakeSensor {
    fn sample(&mut self) -> Result<Sample> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Some(sample)) => Ok(sample),
            Some(None) => Err(Error::TransientFault("checksum mismatch".to_string())),
            None => Ok(self.default),
        }
    }

    fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint::new("broker.test", 1883)
}
