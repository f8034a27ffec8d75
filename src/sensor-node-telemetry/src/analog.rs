//! Driver for a single-channel analog soil moisture probe.
//!
//! The probe voltage decreases as moisture increases; it is mapped linearly onto 0–100 %
//! between the configured dry and wet reference voltages.

use core::{convert::Infallible, fmt};

use embassy_time::{Instant, Timer};
use sensor_node_log::{debug, error, info, warn};

use crate::{
    config::{AnalogConfig, TopicConfig},
    descriptor::{quantity, unit, SensorDescriptor},
    queue::OutboundQueue,
    registry::{Registry, SensorHandle},
};

/// Name under which the probe is registered.
pub const SENSOR_NAME: &str = "ADC_1_0";

/// A single ADC channel.
pub trait AdcChannel {
    /// Takes one raw conversion.
    ///
    /// # Errors
    ///
    /// Returns an error if the conversion failed.
    fn read_raw(&mut self) -> Result<u16, AdcError>;
}

/// Provides the characteristics of the ADC, e.g., from factory-programmed eFuse values.
pub trait CalibrationSource {
    /// Returns the calibration curve of the ADC.
    ///
    /// # Errors
    ///
    /// Returns an error if no calibration reference is available.
    fn characterize(&mut self) -> Result<CalibrationCurve, CalibrationError>;
}

/// Linear conversion from raw ADC readings to millivolts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationCurve {
    /// Microvolts per LSB.
    pub gain_uv_per_lsb: u32,
    /// Millivolts at raw value 0.
    pub offset_mv: i32,
}

impl CalibrationCurve {
    /// Converts a raw reading to millivolts.
    #[must_use]
    pub fn millivolts(&self, raw: u16) -> f32 {
        let uv = f64::from(raw) * f64::from(self.gain_uv_per_lsb);
        (uv / 1000.0 + f64::from(self.offset_mv)) as f32
    }
}

/// Two-point linear normalization of a probe voltage to a percentage.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TwoPointNormalization {
    /// Voltage in a saturated medium (100 %), in millivolts.
    pub v_wet_mv: f32,
    /// Voltage in a dry medium (0 %), in millivolts.
    pub v_dry_mv: f32,
}

impl TwoPointNormalization {
    /// Returns the moisture percentage for `mv`, clamped to 0–100.
    ///
    /// Degenerate references (equal voltages) yield 100 at or below the wet voltage and 0
    /// above it.
    #[must_use]
    pub fn percent(&self, mv: f32) -> f32 {
        let span = self.v_dry_mv - self.v_wet_mv;
        let ratio = if span == 0.0 {
            if mv <= self.v_wet_mv {
                0.0
            } else {
                1.0
            }
        } else {
            (mv - self.v_wet_mv) / span
        };
        100.0 * (1.0 - ratio.clamp(0.0, 1.0))
    }
}

/// Samples the moisture probe and publishes its readings.
pub struct AnalogDriver<'a, A, C> {
    adc: A,
    calibration: C,
    registry: &'a Registry,
    queue: &'a OutboundQueue,
    topic: TopicConfig,
    config: AnalogConfig,
    descriptor: SensorDescriptor,
}

impl<'a, A: AdcChannel, C: CalibrationSource> AnalogDriver<'a, A, C> {
    /// Creates a driver for the probe connected to `adc`.
    pub fn new(
        adc: A,
        calibration: C,
        registry: &'a Registry,
        queue: &'a OutboundQueue,
        topic: TopicConfig,
        config: AnalogConfig,
    ) -> Self {
        Self {
            adc,
            calibration,
            registry,
            queue,
            topic,
            config,
            descriptor: SensorDescriptor::new(SENSOR_NAME, quantity::MOISTURE, unit::PERCENT),
        }
    }

    /// Returns the descriptor of the probe.
    #[must_use]
    pub fn descriptor(&self) -> &SensorDescriptor {
        &self.descriptor
    }

    /// Calibrates, registers the probe, then publishes a reading every sample period.
    ///
    /// # Errors
    ///
    /// Returns an error if the ADC cannot be calibrated or if the registry is full.
    pub async fn run(mut self) -> Result<Infallible, AnalogError> {
        let curve = self.calibrate()?;
        self.register().await?;

        loop {
            let sample_start = Instant::now();
            let _ = self.sample_once(&curve);
            Timer::at(sample_start + self.config.sample_period).await;
        }
    }

    /// Obtains the calibration curve of the ADC.
    ///
    /// # Errors
    ///
    /// Returns an error if no calibration reference is available; uncalibrated readings are
    /// never published.
    pub fn calibrate(&mut self) -> Result<CalibrationCurve, AnalogError> {
        match self.calibration.characterize() {
            Ok(curve) => {
                debug!(
                    "{}: calibrated, {} uV/LSB, offset {} mV",
                    SENSOR_NAME,
                    curve.gain_uv_per_lsb,
                    curve.offset_mv
                );
                Ok(curve)
            }
            Err(err) => {
                error!("{}: cannot calibrate ADC: {:?}", SENSOR_NAME, err);
                Err(AnalogError::Calibration(err))
            }
        }
    }

    /// Registers the probe, retrying until the registry lock is obtained.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is full.
    pub async fn register(&mut self) -> Result<SensorHandle, AnalogError> {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            if let Some(mut registry) = self.registry.lock(self.config.lock_timeout).await {
                return match registry.add(self.descriptor.clone()) {
                    Ok(handle) => {
                        info!("{}: registered", SENSOR_NAME);
                        Ok(handle)
                    }
                    Err(err) => {
                        error!("{}: {}", SENSOR_NAME, err);
                        Err(AnalogError::RegistryFull)
                    }
                };
            }

            if attempts == 1 {
                debug!("{}: registry busy, retrying", SENSOR_NAME);
            } else {
                warn!("{}: registry still busy after {} attempts", SENSOR_NAME, attempts);
            }
            Timer::after(self.config.register_retry).await;
        }
    }

    /// Takes one reading and enqueues it.
    ///
    /// Returns the moisture percentage, or `None` if the ADC could not be read.
    pub fn sample_once(&mut self, curve: &CalibrationCurve) -> Option<f32> {
        let raw = match self.adc.read_raw() {
            Ok(raw) => raw,
            Err(err) => {
                warn!("{}: cannot read ADC: {:?}", SENSOR_NAME, err);
                return None;
            }
        };

        let normalization = TwoPointNormalization {
            v_wet_mv: self.config.v_wet_mv,
            v_dry_mv: self.config.v_dry_mv,
        };
        let percent = normalization.percent(curve.millivolts(raw));
        // Drops are logged by the queue.
        let _ = self.queue.push_reading(&self.topic, &self.descriptor, percent);
        Some(percent)
    }
}

/// ADC conversion failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcError {
    /// The conversion did not complete in time.
    Timeout,
    /// The ADC reported a hardware error.
    Hardware,
}

impl fmt::Display for AdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "ADC conversion timed out"),
            Self::Hardware => write!(f, "ADC hardware error"),
        }
    }
}

impl core::error::Error for AdcError {}

/// ADC calibration failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// No calibration reference is burnt into the chip.
    ReferenceAbsent,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReferenceAbsent => write!(f, "no ADC calibration reference"),
        }
    }
}

impl core::error::Error for CalibrationError {}

/// Fatal driver errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnalogError {
    /// The ADC could not be calibrated.
    Calibration(CalibrationError),
    /// The registry had no free slot.
    RegistryFull,
}

impl fmt::Display for AnalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calibration(err) => write!(f, "{err}"),
            Self::RegistryFull => write!(f, "sensor registry is full"),
        }
    }
}

impl core::error::Error for AnalogError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Calibration(err) => Some(err),
            Self::RegistryFull => None,
        }
    }
}
