//! Link (e.g., Wi-Fi station) management.
//!
//! The link manager itself lives in the network stack; this module defines what the node
//! expects from it, and how its events feed the [`ConnectivityState`] and the link
//! [`ReadinessGate`].

use core::{fmt, future::Future};

use heapless::String;
use sensor_node_log::{info, warn};

use crate::{
    config::{WIFI_NETWORK, WIFI_PASSWORD},
    connectivity::{ConnectivityState, LinkFlag},
    readiness::ReadinessGate,
};

/// Maximum length of an SSID, in bytes.
pub const MAX_SSID_LEN: usize = 32;
/// Maximum length of a password, in bytes.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Events reported by the link manager.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// The link accepted its configuration.
    Configured,
    /// The link is up.
    Connected,
    /// The link went down.
    Disconnected,
}

/// Station credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: String<MAX_SSID_LEN>,
    password: String<MAX_PASSWORD_LEN>,
}

impl Credentials {
    /// Creates credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the SSID or the password is too long.
    pub fn new(ssid: &str, password: &str) -> Result<Self, CredentialsError> {
        let mut credentials = Self {
            ssid: String::new(),
            password: String::new(),
        };
        credentials
            .ssid
            .push_str(ssid)
            .map_err(|_| CredentialsError::SsidTooLong)?;
        credentials
            .password
            .push_str(password)
            .map_err(|_| CredentialsError::PasswordTooLong)?;
        Ok(credentials)
    }

    /// Returns the build-time credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured SSID or password is too long.
    pub fn from_env() -> Result<Self, CredentialsError> {
        Self::new(WIFI_NETWORK, WIFI_PASSWORD)
    }

    /// Returns the SSID.
    #[must_use]
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Returns the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

// Keeps the password out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .finish_non_exhaustive()
    }
}

/// Invalid [`Credentials`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CredentialsError {
    /// The SSID is longer than [`MAX_SSID_LEN`].
    SsidTooLong,
    /// The password is longer than [`MAX_PASSWORD_LEN`].
    PasswordTooLong,
}

impl fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidTooLong => write!(f, "SSID longer than {MAX_SSID_LEN} bytes"),
            Self::PasswordTooLong => write!(f, "password longer than {MAX_PASSWORD_LEN} bytes"),
        }
    }
}

impl core::error::Error for CredentialsError {}

/// The link collaborator.
pub trait LinkManager {
    /// Applies `credentials`; returns whether they were accepted.
    fn configure(&mut self, credentials: &Credentials) -> impl Future<Output = bool>;

    /// Starts connecting; returns whether the attempt was started.
    fn connect(&mut self) -> impl Future<Output = bool>;

    /// Returns whether the link is currently up.
    fn is_connected(&self) -> bool;
}

/// Mirrors [`LinkEvent`]s into the shared connectivity state.
pub struct LinkMonitor<'a> {
    state: &'a ConnectivityState,
    link_up: &'a ReadinessGate,
}

impl<'a> LinkMonitor<'a> {
    /// Creates a monitor updating `state`, and opening `link_up` while connected.
    #[must_use]
    pub const fn new(state: &'a ConnectivityState, link_up: &'a ReadinessGate) -> Self {
        Self { state, link_up }
    }

    /// Applies `event`.
    pub async fn handle(&self, event: LinkEvent) {
        match event {
            LinkEvent::Configured => {
                self.state.set(LinkFlag::Configured, true).await;
            }
            LinkEvent::Connected => {
                info!("link up");
                self.state.set(LinkFlag::Connected, true).await;
                self.link_up.set_ready(true);
            }
            LinkEvent::Disconnected => {
                warn!("link down");
                self.link_up.set_ready(false);
                self.state.set(LinkFlag::Connected, false).await;
            }
        }
    }
}

/// Configures `manager` and starts connecting it.
///
/// Returns whether the connection attempt was started; the outcome is reported later
/// through [`LinkEvent`]s.
pub async fn bring_up<M: LinkManager>(
    manager: &mut M,
    credentials: &Credentials,
    monitor: &LinkMonitor<'_>,
) -> bool {
    if !manager.configure(credentials).await {
        warn!("link rejected configuration for {}", credentials.ssid());
        return false;
    }
    monitor.handle(LinkEvent::Configured).await;

    if !manager.connect().await {
        warn!("cannot start connecting to {}", credentials.ssid());
        return false;
    }
    info!("connecting to {}", credentials.ssid());
    true
}
