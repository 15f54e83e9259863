//! Network link abstraction.
//!
//! On a microcontroller the link is a WiFi station that has to be joined
//! before any broker traffic is possible. On a regular host the operating
//! system owns the network and [`HostLink`] simply reports it as up.

use crate::error::{Error, Result};
use log::{debug, info};
use std::thread;
use std::time::{Duration, Instant};

/// Default time allowed for joining the network.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Default spacing between link status checks while joining.
pub const DEFAULT_LINK_POLL: Duration = Duration::from_millis(500);

/// Connectivity below the broker session.
pub trait NetworkLink {
    /// Starts joining the network. Failure to start is a [`Error::ConnectFault`].
    fn connect(&mut self, ssid: &str, password: &str) -> Result<()>;

    /// Returns true once the link is usable.
    fn is_connected(&self) -> bool;

    /// Leaves the network.
    fn disconnect(&mut self);
}

/// Link for hosts whose operating system manages networking.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostLink;

impl NetworkLink for HostLink {
    fn connect(&mut self, _ssid: &str, _password: &str) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn disconnect(&mut self) {}
}

/// Parameters for joining the network.
#[derive(Clone)]
pub struct LinkConfig {
    /// Network name.
    pub ssid: String,
    /// Network passphrase.
    pub password: String,
    /// How long to wait for the link to come up.
    pub join_timeout: Duration,
    /// How often to check the link while waiting.
    pub poll_interval: Duration,
}

impl LinkConfig {
    /// Creates a link configuration with default timings.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            poll_interval: DEFAULT_LINK_POLL,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl std::fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkConfig")
            .field("ssid", &self.ssid)
            .field("join_timeout", &self.join_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Polls `link` until it reports connected or `timeout` elapses.
pub fn wait_for_link<N>(link: &N, timeout: Duration, poll: Duration) -> Result<()>
where
    N: NetworkLink + ?Sized,
{
    let deadline = Instant::now() + timeout;
    while !link.is_connected() {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::ConnectFault(format!(
                "network link not up after {:?}",
                timeout
            )));
        }
        thread::sleep(poll.min(deadline - now));
    }
    Ok(())
}

/// Makes sure the link is up, joining the network if necessary.
///
/// Returns true when this call had to join the network.
pub fn ensure_link<N>(link: &mut N, config: &LinkConfig) -> Result<bool>
where
    N: NetworkLink + ?Sized,
{
    if link.is_connected() {
        return Ok(false);
    }

    debug!("joining network '{}'", config.ssid);
    link.connect(&config.ssid, &config.password)?;
    wait_for_link(link, config.join_timeout, config.poll_interval)?;
    info!("network link '{}' is up", config.ssid);
    Ok(true)
}
