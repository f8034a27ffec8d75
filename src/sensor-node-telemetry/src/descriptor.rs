//! Metadata identifying a sensor.

use heapless::String;

/// Maximum length of a sensor name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Name of a sensor, unique among the currently registered sensors of a driver.
pub type SensorName = String<MAX_NAME_LEN>;

/// Well-known measured quantities.
pub mod quantity {
    /// Temperature.
    pub const TEMPERATURE: &str = "temperature";
    /// Soil moisture.
    pub const MOISTURE: &str = "moisture";
}

/// Well-known units of measurement.
pub mod unit {
    /// Degrees Celsius (°C).
    pub const CELSIUS: &str = "°C";
    /// Percent (%).
    pub const PERCENT: &str = "%";
}

/// Describes one sensor: its name, what it measures and in which unit.
///
/// Descriptors are created by the driver owning the sensor. Registering one in the
/// [`Registry`](crate::Registry) stores a copy and returns the
/// [`SensorHandle`](crate::SensorHandle) the driver uses to unregister it later.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorDescriptor {
    name: SensorName,
    quantity: &'static str,
    unit: &'static str,
    payload: u64,
}

impl SensorDescriptor {
    /// Creates a new descriptor.
    ///
    /// Names longer than [`MAX_NAME_LEN`] bytes are truncated on a character boundary.
    #[must_use]
    pub fn new(name: &str, quantity: &'static str, unit: &'static str) -> Self {
        let mut end = name.len().min(MAX_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }

        let mut truncated = SensorName::new();
        // Cannot fail: the slice fits by construction.
        let _ = truncated.push_str(name.get(..end).unwrap_or_default());

        Self {
            name: truncated,
            quantity,
            unit,
            payload: 0,
        }
    }

    /// Attaches a driver-private value, e.g., a bus address.
    #[must_use]
    pub fn with_payload(mut self, payload: u64) -> Self {
        self.payload = payload;
        self
    }

    /// Returns the sensor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the measured quantity.
    #[must_use]
    pub fn quantity(&self) -> &'static str {
        self.quantity
    }

    /// Returns the unit of measurement.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    /// Returns the driver-private value.
    #[must_use]
    pub fn payload(&self) -> u64 {
        self.payload
    }
}
