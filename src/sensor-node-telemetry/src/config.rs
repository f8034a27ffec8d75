//! Node configuration.
//!
//! Defaults are read from environment variables at build time; every runtime configuration
//! struct can also be built explicitly, e.g., to shorten periods in tests.

use embassy_time::Duration;
use sensor_node_utils::{str_from_env_or, u32_from_env_or, u8_from_env_or};

use crate::onewire::Resolution;

/// Identifier of this node, used as the second topic level.
pub const NODE_ID: &str = str_from_env_or!("CONFIG_NODE_ID", "node", "node identifier in topics");

/// First topic level of every published reading.
pub const TOPIC_NAMESPACE: &str =
    str_from_env_or!("CONFIG_TOPIC_NAMESPACE", "sensors", "topic namespace");

/// Sampling period of the bus driver, and retry period of its discovery.
pub const SAMPLE_PERIOD_MS: u32 = u32_from_env_or!("CONFIG_SAMPLE_PERIOD_MS", 1000);

/// Resolution requested from every DS18B20 device, in bits (9 to 12).
pub const ONEWIRE_RESOLUTION_BITS: u8 = u8_from_env_or!("CONFIG_ONEWIRE_RESOLUTION_BITS", 12);

/// Probe voltage in a saturated medium, in millivolts.
pub const MOISTURE_V_WET_MV: u32 = u32_from_env_or!("CONFIG_MOISTURE_V_WET_MV", 1700);

/// Probe voltage in a dry medium, in millivolts.
pub const MOISTURE_V_DRY_MV: u32 = u32_from_env_or!("CONFIG_MOISTURE_V_DRY_MV", 2800);

/// Wi-Fi SSID (network name).
pub const WIFI_NETWORK: &str = str_from_env_or!(
    "CONFIG_WIFI_NETWORK",
    "test_network",
    "Wi-Fi SSID (network name)"
);

/// Wi-Fi password.
pub const WIFI_PASSWORD: &str =
    str_from_env_or!("CONFIG_WIFI_PASSWORD", "test_password", "Wi-Fi password");

/// Acquisition timeout of the registry and connectivity locks.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// Granularity of the readiness poll of the bus driver.
pub const READINESS_POLL: Duration = Duration::from_secs(1);

/// How long the publisher waits for a message before checking the link again.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Granularity of the publisher's wait for the first link connection.
pub const CONNECT_POLL: Duration = Duration::from_secs(3);

/// Publishing period of the analog driver.
pub const ANALOG_SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Retry period of the analog driver's one-time registration.
pub const ANALOG_REGISTER_RETRY: Duration = Duration::from_millis(100);

const ONEWIRE_RESOLUTION: Resolution = match Resolution::from_bits(ONEWIRE_RESOLUTION_BITS) {
    Some(resolution) => resolution,
    None => panic!("CONFIG_ONEWIRE_RESOLUTION_BITS must be between 9 and 12"),
};

/// Topic levels shared by every reading of this node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TopicConfig {
    /// First topic level.
    pub namespace: &'static str,
    /// Second topic level.
    pub node_id: &'static str,
}

impl TopicConfig {
    /// Returns the build-time configuration.
    #[must_use]
    pub const fn from_env() -> Self {
        Self {
            namespace: TOPIC_NAMESPACE,
            node_id: NODE_ID,
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Timing of the 1-Wire bus driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OneWireConfig {
    /// Period of the sampling cycle, and delay before retrying a failed step.
    pub sample_period: Duration,
    /// Resolution requested from the devices; bounds the conversion delay.
    pub resolution: Resolution,
    /// Slice of each readiness wait.
    pub readiness_poll: Duration,
    /// Registry lock acquisition timeout.
    pub lock_timeout: Duration,
}

impl OneWireConfig {
    /// Returns the build-time configuration.
    #[must_use]
    pub const fn from_env() -> Self {
        Self {
            sample_period: Duration::from_millis(SAMPLE_PERIOD_MS as u64),
            resolution: ONEWIRE_RESOLUTION,
            readiness_poll: READINESS_POLL,
            lock_timeout: LOCK_TIMEOUT,
        }
    }
}

impl Default for OneWireConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Timing and reference voltages of the analog driver.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AnalogConfig {
    /// Publishing period.
    pub sample_period: Duration,
    /// Delay between registration attempts.
    pub register_retry: Duration,
    /// Registry lock acquisition timeout.
    pub lock_timeout: Duration,
    /// Probe voltage in a saturated medium, in millivolts.
    pub v_wet_mv: f32,
    /// Probe voltage in a dry medium, in millivolts.
    pub v_dry_mv: f32,
}

impl AnalogConfig {
    /// Returns the build-time configuration.
    #[must_use]
    pub const fn from_env() -> Self {
        Self {
            sample_period: ANALOG_SAMPLE_PERIOD,
            register_retry: ANALOG_REGISTER_RETRY,
            lock_timeout: LOCK_TIMEOUT,
            v_wet_mv: MOISTURE_V_WET_MV as f32,
            v_dry_mv: MOISTURE_V_DRY_MV as f32,
        }
    }
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Timing of the transport publisher.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PublisherConfig {
    /// Maximum wait for a queued message.
    pub dequeue_timeout: Duration,
    /// Slice of the wait for the first link connection.
    pub connect_poll: Duration,
}

impl PublisherConfig {
    /// Returns the build-time configuration.
    #[must_use]
    pub const fn from_env() -> Self {
        Self {
            dequeue_timeout: DEQUEUE_TIMEOUT,
            connect_poll: CONNECT_POLL,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
