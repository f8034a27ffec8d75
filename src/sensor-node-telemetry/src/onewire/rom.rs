use core::fmt::{self, Write as _};

use heapless::String;

/// Length of a [`RomCode::name()`].
pub const ROM_NAME_LEN: usize = 16;

/// The 64-bit identifier of a 1-Wire device.
///
/// Byte 0 is the family code, bytes 1 to 6 the serial number (least significant byte first),
/// and byte 7 the CRC-8 of the first seven bytes, i.e., the order in which the bytes appear on
/// the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RomCode([u8; 8]);

impl RomCode {
    /// Wraps the bytes as read from the bus.
    #[must_use]
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Builds a ROM code with a valid CRC.
    #[must_use]
    pub fn from_parts(family: u8, serial: [u8; 6]) -> Self {
        let [s0, s1, s2, s3, s4, s5] = serial;
        let data = [family, s0, s1, s2, s3, s4, s5];
        let [d0, d1, d2, d3, d4, d5, d6] = data;
        Self([d0, d1, d2, d3, d4, d5, d6, crc8(&data)])
    }

    /// Interprets `value` as the little-endian representation of a ROM code.
    #[must_use]
    pub const fn from_u64(value: u64) -> Self {
        Self(value.to_le_bytes())
    }

    /// Returns the little-endian integer representation.
    #[must_use]
    pub const fn to_u64(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }

    /// Returns the raw bytes, in bus order.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 8] {
        self.0
    }

    /// Returns the family code.
    #[must_use]
    pub const fn family(&self) -> u8 {
        self.0[0]
    }

    /// Returns whether the trailing CRC byte matches the first seven bytes.
    #[must_use]
    pub fn is_crc_valid(&self) -> bool {
        // The CRC of a full, valid ROM code is zero.
        crc8(&self.0) == 0
    }

    /// Returns the hexadecimal name of the device, CRC byte first.
    #[must_use]
    pub fn name(&self) -> String<ROM_NAME_LEN> {
        let mut name = String::new();
        // 16 hex digits always fit.
        let _ = write!(name, "{self}");
        name
    }
}

impl fmt::Display for RomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.to_u64())
    }
}

/// Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1, reflected, zero initial value).
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, byte| {
        (0..8).fold(crc ^ byte, |crc, _| {
            if crc & 1 == 1 {
                (crc >> 1) ^ 0x8c
            } else {
                crc >> 1
            }
        })
    })
}
