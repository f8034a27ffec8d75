use core::{fmt, future::Future};

use embassy_time::Duration;
use heapless::Vec;

use super::{RomCode, MAX_DEVICES};

/// Temperature conversion resolution of a DS18B20.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    /// 0.5 °C steps.
    Bits9,
    /// 0.25 °C steps.
    Bits10,
    /// 0.125 °C steps.
    Bits11,
    /// 0.0625 °C steps.
    Bits12,
}

impl Resolution {
    /// Returns the resolution with `bits` bits, if supported.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            9 => Some(Self::Bits9),
            10 => Some(Self::Bits10),
            11 => Some(Self::Bits11),
            12 => Some(Self::Bits12),
            _ => None,
        }
    }

    /// Returns the number of bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Bits9 => 9,
            Self::Bits10 => 10,
            Self::Bits11 => 11,
            Self::Bits12 => 12,
        }
    }

    /// Returns the maximum conversion time at this resolution.
    #[must_use]
    pub const fn conversion_time(self) -> Duration {
        Duration::from_micros(match self {
            Self::Bits9 => 93_750,
            Self::Bits10 => 187_500,
            Self::Bits11 => 375_000,
            Self::Bits12 => 750_000,
        })
    }
}

/// A 1-Wire bus with DS18B20-compatible temperature devices.
pub trait OneWireBus {
    /// Initializes the bus hardware.
    fn init(&mut self) -> impl Future<Output = Result<(), BusError>>;

    /// Enumerates the devices present on the bus into `found`.
    ///
    /// Devices beyond the capacity of `found` are ignored.
    fn search(
        &mut self,
        found: &mut Vec<RomCode, MAX_DEVICES>,
    ) -> impl Future<Output = Result<(), BusError>>;

    /// Configures the conversion resolution of one device.
    fn set_resolution(
        &mut self,
        rom: &RomCode,
        resolution: Resolution,
    ) -> impl Future<Output = Result<(), BusError>>;

    /// Starts a temperature conversion on every device at once.
    ///
    /// Returns immediately; results are available after the conversion time.
    fn convert_all(&mut self) -> impl Future<Output = Result<(), BusError>>;

    /// Reads the last converted temperature of one device, in degrees Celsius.
    fn read_temperature(&mut self, rom: &RomCode) -> impl Future<Output = Result<f32, ReadError>>;
}

/// Bus-level failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// No device answered the reset pulse.
    NoDevicePresent,
    /// The bus is shorted or otherwise stuck.
    Fault,
    /// A bus transaction did not complete in time.
    Timeout,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevicePresent => write!(f, "no device present"),
            Self::Fault => write!(f, "bus fault"),
            Self::Timeout => write!(f, "bus timeout"),
        }
    }
}

impl core::error::Error for BusError {}

/// Failures to read one device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadError {
    /// The scratchpad CRC did not match.
    Crc,
    /// The device returned an out-of-range or power-on value.
    Device,
    /// The bus failed during the read.
    Bus(BusError),
}

impl From<BusError> for ReadError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crc => write!(f, "scratchpad CRC mismatch"),
            Self::Device => write!(f, "invalid device reading"),
            Self::Bus(err) => write!(f, "{err}"),
        }
    }
}

impl core::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Bus(err) => Some(err),
            _ => None,
        }
    }
}
