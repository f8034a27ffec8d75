//! Link-layer status flags shared between the link manager and the sampling tasks.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::{with_timeout, Duration};
use sensor_node_log::{debug, warn};

use crate::config::LOCK_TIMEOUT;

/// Names one of the [`LinkStatus`] flags.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkFlag {
    /// Credentials and target of the link are known.
    Configured,
    /// The link currently carries traffic.
    Connected,
}

/// Snapshot of the link-layer flags.
///
/// The flags are independent: consumers must not assume they change together.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStatus {
    /// See [`LinkFlag::Configured`].
    pub configured: bool,
    /// See [`LinkFlag::Connected`].
    pub connected: bool,
}

impl LinkStatus {
    /// Returns the value of `flag`.
    #[must_use]
    pub fn get(&self, flag: LinkFlag) -> bool {
        match flag {
            LinkFlag::Configured => self.configured,
            LinkFlag::Connected => self.connected,
        }
    }

    /// Sets the value of `flag`.
    pub fn set(&mut self, flag: LinkFlag, value: bool) {
        match flag {
            LinkFlag::Configured => self.configured = value,
            LinkFlag::Connected => self.connected = value,
        }
    }
}

/// Process-wide [`LinkStatus`], guarded by a mutex acquired with a short timeout.
///
/// A lock timeout is logged and otherwise ignored: [`set()`](Self::set) drops the update and
/// [`get()`](Self::get) reports `false`, i.e., "unknown, so not ready".
pub struct ConnectivityState {
    status: Mutex<CriticalSectionRawMutex, LinkStatus>,
    lock_timeout: Duration,
}

impl ConnectivityState {
    /// Creates a state with both flags cleared.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_lock_timeout(LOCK_TIMEOUT)
    }

    /// Creates a state with both flags cleared and a custom lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            status: Mutex::new(LinkStatus {
                configured: false,
                connected: false,
            }),
            lock_timeout,
        }
    }

    /// Sets `flag` to `value`.
    pub async fn set(&self, flag: LinkFlag, value: bool) {
        if let Ok(mut status) = with_timeout(self.lock_timeout, self.status.lock()).await {
            status.set(flag, value);
            debug!("link flag {:?} set to {}", flag, value);
        } else {
            warn!(
                "cannot take status lock in {} ms, {:?} update dropped",
                self.lock_timeout.as_millis(),
                flag
            );
        }
    }

    /// Returns the value of `flag`, or `false` if the lock could not be taken.
    pub async fn get(&self, flag: LinkFlag) -> bool {
        self.snapshot().await.is_some_and(|status| status.get(flag))
    }

    /// Returns both flags, read under a single lock acquisition.
    pub async fn snapshot(&self) -> Option<LinkStatus> {
        if let Ok(status) = with_timeout(self.lock_timeout, self.status.lock()).await {
            Some(*status)
        } else {
            warn!(
                "cannot take status lock in {} ms",
                self.lock_timeout.as_millis()
            );
            None
        }
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new()
    }
}
