//! Driver for DS18B20 temperature sensors sharing a 1-Wire bus.
//!
//! The driver discovers the devices on the bus, registers one [`SensorDescriptor`] per
//! device, then periodically starts a conversion on every device at once and publishes each
//! result. It goes back to discovery when the bus stops answering.

mod bus;
mod rom;

use core::{convert::Infallible, fmt};

use embassy_time::{Instant, Timer};
use heapless::Vec;
use sensor_node_log::{error, info, warn};

pub use bus::{BusError, OneWireBus, ReadError, Resolution};
pub use rom::{crc8, RomCode, ROM_NAME_LEN};

use crate::{
    config::{OneWireConfig, TopicConfig},
    descriptor::{quantity, unit, SensorDescriptor},
    queue::OutboundQueue,
    readiness::Readiness,
    registry::{Registry, SensorHandle},
};

/// Family code of the DS18B20.
pub const DS18B20_FAMILY_CODE: u8 = 0x28;

/// Maximum number of devices handled on one bus.
pub const MAX_DEVICES: usize = 16;

/// States of the [`OneWireDriver`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// The bus has not been initialized yet.
    BusInit,
    /// Devices are to be (re-)enumerated.
    Discover,
    /// Discovered devices are to be registered.
    RegisterAll,
    /// Devices are sampled periodically.
    ConvertAndRead,
}

/// When the driver should take its next step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Next {
    /// Right away.
    Immediately,
    /// One sample period after the start of the current step.
    AfterPeriod,
}

/// Outcome of one conversion cycle.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleReport {
    /// Devices read successfully.
    pub read: usize,
    /// Devices that could not be read.
    pub failed: usize,
    /// Readings enqueued for publishing.
    pub published: usize,
    /// Readings dropped, e.g., because the queue was full.
    pub dropped: usize,
}

/// Fatal driver errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OneWireError {
    /// The bus could not be initialized.
    BusInit(BusError),
}

impl fmt::Display for OneWireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusInit(err) => write!(f, "cannot initialize bus: {err}"),
        }
    }
}

impl core::error::Error for OneWireError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::BusInit(err) => Some(err),
        }
    }
}

struct Device {
    rom: RomCode,
    descriptor: SensorDescriptor,
    handle: Option<SensorHandle>,
}

/// Samples every DS18B20 of a bus and publishes their readings.
pub struct OneWireDriver<'a, B, R> {
    bus: B,
    registry: &'a Registry,
    queue: &'a OutboundQueue,
    ready: R,
    topic: TopicConfig,
    config: OneWireConfig,
    devices: Vec<Device, MAX_DEVICES>,
    state: State,
    last_report: Option<CycleReport>,
}

impl<'a, B: OneWireBus, R: Readiness> OneWireDriver<'a, B, R> {
    /// Creates a driver for `bus`.
    ///
    /// Sampling only happens while `ready` reports the transport as ready.
    pub fn new(
        bus: B,
        registry: &'a Registry,
        queue: &'a OutboundQueue,
        ready: R,
        topic: TopicConfig,
        config: OneWireConfig,
    ) -> Self {
        Self {
            bus,
            registry,
            queue,
            ready,
            topic,
            config,
            devices: Vec::new(),
            state: State::BusInit,
            last_report: None,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the number of recognized devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Returns the outcome of the last conversion cycle.
    #[must_use]
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report
    }

    /// Runs the driver until the bus fails to initialize.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus could not be initialized.
    pub async fn run(mut self) -> Result<Infallible, OneWireError> {
        loop {
            if self.state != State::BusInit {
                self.wait_ready().await;
            }

            let step_start = Instant::now();
            match self.step().await? {
                Next::Immediately => {}
                Next::AfterPeriod => Timer::at(step_start + self.config.sample_period).await,
            }
        }
    }

    /// Executes the current state once, without waiting for readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus could not be initialized.
    pub async fn step(&mut self) -> Result<Next, OneWireError> {
        let next = match self.state {
            State::BusInit => self.init_bus().await?,
            State::Discover => self.discover().await,
            State::RegisterAll => self.register_all().await,
            State::ConvertAndRead => self.convert_and_read().await,
        };
        Ok(next)
    }

    async fn wait_ready(&self) {
        while !self.ready.wait_ready(self.config.readiness_poll).await {
            warn!("1-Wire: transport not ready, sampling deferred");
        }
    }

    async fn init_bus(&mut self) -> Result<Next, OneWireError> {
        if let Err(err) = self.bus.init().await {
            error!("1-Wire: cannot initialize bus: {:?}", err);
            return Err(OneWireError::BusInit(err));
        }
        self.state = State::Discover;
        Ok(Next::Immediately)
    }

    async fn discover(&mut self) -> Next {
        if !self.unregister_all().await {
            return Next::AfterPeriod;
        }

        let mut found = Vec::new();
        if let Err(err) = self.bus.search(&mut found).await {
            warn!("1-Wire: search failed: {:?}", err);
            return Next::AfterPeriod;
        }

        for rom in found {
            if !rom.is_crc_valid() {
                warn!("1-Wire: {}: ROM CRC mismatch, skipped", rom);
                continue;
            }
            if rom.family() != DS18B20_FAMILY_CODE {
                info!("1-Wire: {}: unsupported family {}, skipped", rom, rom.family());
                continue;
            }

            if let Err(err) = self.bus.set_resolution(&rom, self.config.resolution).await {
                warn!("1-Wire: {}: cannot set resolution: {:?}", rom, err);
            }

            let descriptor =
                SensorDescriptor::new(&rom.name(), quantity::TEMPERATURE, unit::CELSIUS)
                    .with_payload(rom.to_u64());
            let device = Device {
                rom,
                descriptor,
                handle: None,
            };
            if self.devices.push(device).is_err() {
                warn!("1-Wire: more than {} devices, ignoring the rest", MAX_DEVICES);
                break;
            }
        }

        if self.devices.is_empty() {
            info!("1-Wire: no sensor found");
            return Next::AfterPeriod;
        }

        info!("1-Wire: found {} sensors", self.devices.len());
        self.state = State::RegisterAll;
        Next::Immediately
    }

    /// Removes the previously registered devices; returns `false` if the registry was busy.
    async fn unregister_all(&mut self) -> bool {
        let Some(mut registry) = self.registry.lock(self.config.lock_timeout).await else {
            warn!("1-Wire: registry busy, discovery postponed");
            return false;
        };

        for handle in self.devices.iter_mut().filter_map(|device| device.handle.take()) {
            registry.remove(handle);
        }
        self.devices.clear();
        true
    }

    async fn register_all(&mut self) -> Next {
        let Some(mut registry) = self.registry.lock(self.config.lock_timeout).await else {
            warn!("1-Wire: registry busy, registration postponed");
            return Next::AfterPeriod;
        };

        for device in &mut self.devices {
            match registry.add(device.descriptor.clone()) {
                Ok(handle) => device.handle = Some(handle),
                Err(err) => error!("1-Wire: {}: {}, not sampled", device.descriptor.name(), err),
            }
        }
        drop(registry);

        // Only registered devices are sampled.
        self.devices.retain(|device| device.handle.is_some());
        if self.devices.is_empty() {
            self.state = State::Discover;
            return Next::AfterPeriod;
        }

        self.state = State::ConvertAndRead;
        Next::Immediately
    }

    async fn convert_and_read(&mut self) -> Next {
        if let Err(err) = self.bus.convert_all().await {
            warn!("1-Wire: conversion failed ({:?}), rediscovering", err);
            self.state = State::Discover;
            return Next::AfterPeriod;
        }
        Timer::after(self.config.resolution.conversion_time()).await;

        // Read everything first so that publishing does not stretch the bus timing.
        let mut readings: Vec<Result<f32, ReadError>, MAX_DEVICES> = Vec::new();
        for device in &self.devices {
            let reading = self.bus.read_temperature(&device.rom).await;
            // At most `MAX_DEVICES` devices.
            let _ = readings.push(reading);
        }

        let mut report = CycleReport::default();
        for (device, reading) in self.devices.iter().zip(readings) {
            match reading {
                Ok(value) => {
                    report.read += 1;
                    match self.queue.push_reading(&self.topic, &device.descriptor, value) {
                        Ok(()) => report.published += 1,
                        Err(_) => report.dropped += 1,
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!("1-Wire: {}: read failed: {:?}", device.descriptor.name(), err);
                }
            }
        }

        if report.failed > 0 {
            warn!(
                "1-Wire: {} of {} sensors could not be read",
                report.failed,
                self.devices.len()
            );
        }
        self.last_report = Some(report);
        Next::AfterPeriod
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        vec::Vec as StdVec,
    };

    use embassy_futures::block_on;
    use embassy_time::{with_timeout, Duration};

    use super::*;
    use crate::readiness::ReadinessGate;

    #[derive(Default)]
    struct MockBus {
        roms: StdVec<RomCode>,
        failing: StdVec<RomCode>,
        init_error: Option<BusError>,
        convert_error: Option<BusError>,
        resolutions: StdVec<(RomCode, Resolution)>,
        searches: Arc<AtomicUsize>,
        conversions: Arc<AtomicUsize>,
    }

    impl OneWireBus for MockBus {
        async fn init(&mut self) -> Result<(), BusError> {
            self.init_error.map_or(Ok(()), Err)
        }

        async fn search(&mut self, found: &mut Vec<RomCode, MAX_DEVICES>) -> Result<(), BusError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            for rom in &self.roms {
                let _ = found.push(*rom);
            }
            Ok(())
        }

        async fn set_resolution(
            &mut self,
            rom: &RomCode,
            resolution: Resolution,
        ) -> Result<(), BusError> {
            self.resolutions.push((*rom, resolution));
            Ok(())
        }

        async fn convert_all(&mut self) -> Result<(), BusError> {
            self.conversions.fetch_add(1, Ordering::SeqCst);
            self.convert_error.map_or(Ok(()), Err)
        }

        async fn read_temperature(&mut self, rom: &RomCode) -> Result<f32, ReadError> {
            if self.failing.contains(rom) {
                return Err(ReadError::Crc);
            }
            Ok(20.0 + f32::from((rom.to_u64() >> 8) as u8))
        }
    }

    fn ds18b20(serial: u8) -> RomCode {
        RomCode::from_parts(DS18B20_FAMILY_CODE, [serial, 0, 0, 0, 0, 0])
    }

    fn config() -> OneWireConfig {
        OneWireConfig {
            sample_period: Duration::from_millis(20),
            resolution: Resolution::Bits9,
            readiness_poll: Duration::from_millis(10),
            lock_timeout: Duration::from_millis(5),
        }
    }

    fn topic() -> TopicConfig {
        TopicConfig {
            namespace: "sensors",
            node_id: "node",
        }
    }

    fn driver<'a>(
        bus: MockBus,
        registry: &'a Registry,
        queue: &'a OutboundQueue,
        ready: &'a ReadinessGate,
    ) -> OneWireDriver<'a, MockBus, &'a ReadinessGate> {
        OneWireDriver::new(bus, registry, queue, ready, topic(), config())
    }

    #[test]
    fn cycle_publishes_successful_reads() {
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        let bus = MockBus {
            roms: std::vec![ds18b20(1), ds18b20(2), ds18b20(3)],
            failing: std::vec![ds18b20(2)],
            ..MockBus::default()
        };
        let mut driver = driver(bus, &registry, &queue, &ready);

        block_on(async {
            assert_eq!(driver.step().await, Ok(Next::Immediately));
            assert_eq!(driver.state(), State::Discover);
            assert_eq!(driver.step().await, Ok(Next::Immediately));
            assert_eq!(driver.state(), State::RegisterAll);
            assert_eq!(driver.step().await, Ok(Next::Immediately));
            assert_eq!(driver.state(), State::ConvertAndRead);
            assert_eq!(driver.step().await, Ok(Next::AfterPeriod));
            assert_eq!(driver.state(), State::ConvertAndRead);
        });

        assert_eq!(
            driver.last_report(),
            Some(CycleReport {
                read: 2,
                failed: 1,
                published: 2,
                dropped: 0,
            })
        );
        assert_eq!(driver.bus.resolutions.len(), 3);

        let first = queue.try_dequeue().unwrap();
        assert_eq!(
            first.topic(),
            std::format!("sensors/node/temperature/{}", ds18b20(1).name())
        );
        assert_eq!(first.payload(), r#"{"value": 21.0, "unit": "\u00b0C"}"#);
        let second = queue.try_dequeue().unwrap();
        assert!(second.topic().ends_with(ds18b20(3).name().as_str()));
        assert!(queue.is_empty());

        assert_eq!(registry.try_lock().unwrap().len(), 3);
    }

    #[test]
    fn empty_bus_keeps_discovering() {
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        let mut driver = driver(MockBus::default(), &registry, &queue, &ready);

        block_on(async {
            driver.step().await.unwrap();
            assert_eq!(driver.step().await, Ok(Next::AfterPeriod));
            assert_eq!(driver.state(), State::Discover);
            assert_eq!(driver.step().await, Ok(Next::AfterPeriod));
            assert_eq!(driver.state(), State::Discover);
        });

        assert!(registry.try_lock().unwrap().is_empty());
        assert!(queue.is_empty());
        assert_eq!(driver.last_report(), None);
    }

    #[test]
    fn only_known_families_are_registered() {
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        let bad_crc = RomCode::new([DS18B20_FAMILY_CODE, 9, 0, 0, 0, 0, 0, 0]);
        let bus = MockBus {
            roms: std::vec![
                ds18b20(1),
                RomCode::from_parts(0x10, [7, 0, 0, 0, 0, 0]),
                bad_crc,
                ds18b20(2),
            ],
            ..MockBus::default()
        };
        let mut driver = driver(bus, &registry, &queue, &ready);

        block_on(async {
            for _ in 0..3 {
                driver.step().await.unwrap();
            }
        });
        assert_eq!(driver.state(), State::ConvertAndRead);
        assert_eq!(driver.device_count(), 2);

        let registry = registry.try_lock().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry
            .iter()
            .all(|(_, descriptor)| descriptor.quantity() == quantity::TEMPERATURE
                && descriptor.unit() == unit::CELSIUS));
        let names: StdVec<_> = registry.iter().map(|(_, d)| d.name()).collect();
        assert_eq!(names, [ds18b20(1).name().as_str(), ds18b20(2).name().as_str()]);
    }

    #[test]
    fn busy_registry_abandons_discovery() {
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        let bus = MockBus {
            roms: std::vec![ds18b20(1), ds18b20(2)],
            ..MockBus::default()
        };
        let mut driver = driver(bus, &registry, &queue, &ready);

        block_on(async {
            for _ in 0..3 {
                driver.step().await.unwrap();
            }
        });

        driver.bus.convert_error = Some(BusError::Fault);
        assert_eq!(block_on(driver.step()), Ok(Next::AfterPeriod));
        assert_eq!(driver.state(), State::Discover);

        let held = registry.try_lock().unwrap();
        assert_eq!(block_on(driver.step()), Ok(Next::AfterPeriod));
        assert_eq!(driver.state(), State::Discover);
        // Stale descriptors stay until the next successful discovery.
        assert_eq!(held.len(), 2);
        drop(held);

        driver.bus.convert_error = None;
        driver.bus.roms.truncate(1);
        block_on(async {
            assert_eq!(driver.step().await, Ok(Next::Immediately));
            assert_eq!(driver.step().await, Ok(Next::Immediately));
        });
        assert_eq!(registry.try_lock().unwrap().len(), 1);
    }

    #[test]
    fn busy_registry_retries_registration_only() {
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        let bus = MockBus {
            roms: std::vec![ds18b20(1)],
            ..MockBus::default()
        };
        let mut driver = driver(bus, &registry, &queue, &ready);

        block_on(async {
            driver.step().await.unwrap();
            driver.step().await.unwrap();
        });
        assert_eq!(driver.state(), State::RegisterAll);

        let held = registry.try_lock().unwrap();
        assert_eq!(block_on(driver.step()), Ok(Next::AfterPeriod));
        assert_eq!(driver.state(), State::RegisterAll);
        drop(held);

        assert_eq!(block_on(driver.step()), Ok(Next::Immediately));
        assert_eq!(driver.state(), State::ConvertAndRead);
        assert_eq!(driver.bus.resolutions.len(), 1);
        assert_eq!(registry.try_lock().unwrap().len(), 1);
    }

    #[test]
    fn closed_gate_defers_sampling() {
        crate::test_log::install();
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        let bus = MockBus {
            roms: std::vec![ds18b20(1), ds18b20(2)],
            ..MockBus::default()
        };
        let (searches, conversions) = (bus.searches.clone(), bus.conversions.clone());
        let driver = driver(bus, &registry, &queue, &ready);

        std::thread::scope(|s| {
            let (registry, queue, ready) = (&registry, &queue, &ready);
            let (searches, conversions) = (&searches, &conversions);
            s.spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(150));
                assert_eq!(searches.load(Ordering::SeqCst), 0);
                assert_eq!(conversions.load(Ordering::SeqCst), 0);
                assert!(queue.is_empty());
                assert!(registry.try_lock().unwrap().is_empty());
                ready.set_ready(true);
            });

            let result = block_on(with_timeout(Duration::from_millis(500), driver.run()));
            assert!(result.is_err());
        });

        assert_eq!(searches.load(Ordering::SeqCst), 1);
        assert!(conversions.load(Ordering::SeqCst) >= 1);
        assert!(!queue.is_empty());
        assert_eq!(registry.try_lock().unwrap().len(), 2);

        let levels = crate::test_log::levels_of("transport not ready");
        assert!(!levels.is_empty());
        assert!(levels
            .iter()
            .all(|level| *level == sensor_node_log::hidden::log::Level::Warn));
    }

    #[test]
    fn devices_without_a_slot_are_not_sampled() {
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        {
            let mut guard = registry.try_lock().unwrap();
            for _ in 1..crate::registry::MAX_SENSORS {
                guard
                    .add(SensorDescriptor::new("other", quantity::MOISTURE, unit::PERCENT))
                    .unwrap();
            }
        }
        let bus = MockBus {
            roms: std::vec![ds18b20(1), ds18b20(2)],
            ..MockBus::default()
        };
        let mut driver = driver(bus, &registry, &queue, &ready);

        block_on(async {
            for _ in 0..3 {
                driver.step().await.unwrap();
            }
            assert_eq!(driver.state(), State::ConvertAndRead);
            assert_eq!(driver.device_count(), 1);
            assert_eq!(driver.step().await, Ok(Next::AfterPeriod));
        });

        assert_eq!(
            driver.last_report(),
            Some(CycleReport {
                read: 1,
                failed: 0,
                published: 1,
                dropped: 0,
            })
        );
        let message = queue.try_dequeue().unwrap();
        assert!(message.topic().ends_with(ds18b20(1).name().as_str()));
        assert!(queue.is_empty());
    }

    #[test]
    fn full_registry_sends_back_to_discovery() {
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        {
            let mut guard = registry.try_lock().unwrap();
            for _ in 0..crate::registry::MAX_SENSORS {
                guard
                    .add(SensorDescriptor::new("other", quantity::MOISTURE, unit::PERCENT))
                    .unwrap();
            }
        }
        let bus = MockBus {
            roms: std::vec![ds18b20(1)],
            ..MockBus::default()
        };
        let mut driver = driver(bus, &registry, &queue, &ready);

        block_on(async {
            driver.step().await.unwrap();
            driver.step().await.unwrap();
            assert_eq!(driver.step().await, Ok(Next::AfterPeriod));
        });
        assert_eq!(driver.state(), State::Discover);
        assert_eq!(driver.device_count(), 0);
        assert_eq!(driver.bus.conversions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bus_init_failure_is_fatal() {
        let registry = Registry::new();
        let queue = OutboundQueue::new();
        let ready = ReadinessGate::new();
        let bus = MockBus {
            init_error: Some(BusError::NoDevicePresent),
            ..MockBus::default()
        };

        let result = block_on(driver(bus, &registry, &queue, &ready).run());
        assert_eq!(result, Err(OneWireError::BusInit(BusError::NoDevicePresent)));
    }
}
