//! Registry of the sensors currently attached to the node.
//!
//! The registry is a service object: drivers receive a `&Registry` at construction and
//! register their [`SensorDescriptor`]s through a [`RegistryGuard`], which holds the registry
//! lock for as long as it lives. Dropping the guard releases the lock, so every successful
//! [`Registry::lock()`] is matched by exactly one unlock, on all paths.
//!
//! Lock acquisition is bounded by a short timeout. A timeout is routine contention: callers
//! treat the operation as not having happened and retry on their next scheduling tick.

use core::fmt;

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    mutex::{Mutex, MutexGuard},
};
use embassy_time::{with_timeout, Duration};
use heapless::Vec;
use sensor_node_utils::usize_from_env_or;

use crate::descriptor::SensorDescriptor;

/// Maximum number of sensors registered at the same time.
pub const MAX_SENSORS: usize = usize_from_env_or!(
    "CONFIG_MAX_SENSORS",
    24,
    "maximum number of registered sensors"
);

/// Stable identity of a registered sensor.
///
/// Returned by [`RegistryGuard::add()`] and kept by the owning driver to unregister the sensor.
/// A handle is never shared by two entries present at the same time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorHandle(u32);

struct Entry {
    handle: SensorHandle,
    descriptor: SensorDescriptor,
}

struct Slots {
    // Insertion order is preserved.
    entries: Vec<Entry, MAX_SENSORS>,
    next_handle: u32,
}

/// Mutex-guarded ordered collection of sensor descriptors.
pub struct Registry {
    slots: Mutex<CriticalSectionRawMutex, Slots>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                next_handle: 0,
            }),
        }
    }

    /// Attempts to lock the registry, waiting up to `timeout`.
    ///
    /// Returns `None` if the lock could not be acquired in time.
    pub async fn lock(&self, timeout: Duration) -> Option<RegistryGuard<'_>> {
        with_timeout(timeout, self.slots.lock())
            .await
            .ok()
            .map(|slots| RegistryGuard { slots })
    }

    /// Attempts to lock the registry without waiting.
    #[must_use]
    pub fn try_lock(&self) -> Option<RegistryGuard<'_>> {
        self.slots.try_lock().ok().map(|slots| RegistryGuard { slots })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to the [`Registry`].
///
/// Views returned by [`RegistryGuard::iter()`] borrow the guard and therefore cannot outlive the
/// lock.
pub struct RegistryGuard<'a> {
    slots: MutexGuard<'a, CriticalSectionRawMutex, Slots>,
}

impl RegistryGuard<'_> {
    /// Appends a descriptor at the tail and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryFull`] when [`MAX_SENSORS`] descriptors are already registered.
    pub fn add(&mut self, descriptor: SensorDescriptor) -> Result<SensorHandle, RegistryFull> {
        if self.slots.entries.is_full() {
            return Err(RegistryFull);
        }

        // Skip handles still in use after a wrap-around.
        let mut candidate = self.slots.next_handle;
        while self.position(SensorHandle(candidate)).is_some() {
            candidate = candidate.wrapping_add(1);
        }
        let handle = SensorHandle(candidate);
        self.slots.next_handle = candidate.wrapping_add(1);

        self.slots
            .entries
            .push(Entry { handle, descriptor })
            .map_err(|_| RegistryFull)?;

        Ok(handle)
    }

    /// Unlinks the sensor identified by `handle`.
    ///
    /// Returns `false`, leaving the registry unchanged, if the sensor is not registered.
    pub fn remove(&mut self, handle: SensorHandle) -> bool {
        match self.position(handle) {
            Some(index) => {
                self.slots.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns the descriptor registered under `handle`.
    #[must_use]
    pub fn get(&self, handle: SensorHandle) -> Option<&SensorDescriptor> {
        self.slots
            .entries
            .iter()
            .find(|entry| entry.handle == handle)
            .map(|entry| &entry.descriptor)
    }

    /// Iterates over the registered sensors in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (SensorHandle, &SensorDescriptor)> + '_ {
        self.slots
            .entries
            .iter()
            .map(|entry| (entry.handle, &entry.descriptor))
    }

    /// Returns the number of registered sensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.entries.len()
    }

    /// Returns whether no sensor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.entries.is_empty()
    }

    /// Writes one `name: quantity(unit)` line per registered sensor.
    ///
    /// # Errors
    ///
    /// Forwards errors of the writer.
    pub fn write_listing<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        for (_, descriptor) in self.iter() {
            write!(
                writer,
                "{}: {}({})\r\n",
                descriptor.name(),
                descriptor.quantity(),
                descriptor.unit()
            )?;
        }
        Ok(())
    }

    fn position(&self, handle: SensorHandle) -> Option<usize> {
        self.slots
            .entries
            .iter()
            .position(|entry| entry.handle == handle)
    }
}

/// The registry has no free slot left.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegistryFull;

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor registry is full ({MAX_SENSORS} entries)")
    }
}

impl core::error::Error for RegistryFull {}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::descriptor::{quantity, unit};

    fn temperature(name: &str) -> SensorDescriptor {
        SensorDescriptor::new(name, quantity::TEMPERATURE, unit::CELSIUS)
    }

    fn names(guard: &RegistryGuard<'_>) -> std::vec::Vec<std::string::String> {
        guard.iter().map(|(_, d)| d.name().into()).collect()
    }

    #[test]
    fn add_preserves_insertion_order() {
        let registry = Registry::new();
        let mut guard = registry.try_lock().unwrap();

        let a = guard.add(temperature("a")).unwrap();
        let b = guard.add(temperature("b")).unwrap();
        let c = guard.add(temperature("c")).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(names(&guard), ["a", "b", "c"]);

        assert!(guard.remove(b));
        assert_eq!(names(&guard), ["a", "c"]);
        assert_eq!(guard.get(c).map(SensorDescriptor::name), Some("c"));
        assert_eq!(guard.get(b), None);
    }

    #[test]
    fn remove_absent_is_a_no_op() {
        let registry = Registry::new();
        let mut guard = registry.try_lock().unwrap();
        let a = guard.add(temperature("a")).unwrap();
        let b = guard.add(temperature("b")).unwrap();

        assert!(guard.remove(a));
        assert!(!guard.remove(a));
        assert_eq!(names(&guard), ["b"]);
        assert_eq!(guard.iter().next().map(|(h, _)| h), Some(b));
    }

    #[test]
    fn full_registry_rejects_add() {
        let registry = Registry::new();
        let mut guard = registry.try_lock().unwrap();
        for _ in 0..MAX_SENSORS {
            guard.add(temperature("t")).unwrap();
        }
        assert_eq!(guard.add(temperature("overflow")), Err(RegistryFull));
        assert_eq!(guard.len(), MAX_SENSORS);
    }

    #[test]
    fn handles_stay_unique_across_wrap_around() {
        let registry = Registry::new();
        let mut guard = registry.try_lock().unwrap();
        guard.slots.next_handle = u32::MAX;

        let last = guard.add(temperature("last")).unwrap();
        let first = guard.add(temperature("first")).unwrap();
        assert_eq!(last, SensorHandle(u32::MAX));
        assert_eq!(first, SensorHandle(0));

        guard.slots.next_handle = u32::MAX;
        let next = guard.add(temperature("next")).unwrap();
        assert_eq!(next, SensorHandle(1));
    }

    #[test]
    fn lock_times_out_while_held() {
        let registry = Registry::new();
        let held = registry.try_lock().unwrap();

        assert!(registry.try_lock().is_none());
        assert!(block_on(registry.lock(Duration::from_millis(10))).is_none());

        drop(held);
        assert!(block_on(registry.lock(Duration::from_millis(10))).is_some());
    }

    #[test]
    fn listing() {
        let registry = Registry::new();
        let mut guard = registry.try_lock().unwrap();
        guard.add(temperature("28ff")).unwrap();
        guard
            .add(SensorDescriptor::new(
                "ADC_1_0",
                quantity::MOISTURE,
                unit::PERCENT,
            ))
            .unwrap();

        let mut listing = std::string::String::new();
        guard.write_listing(&mut listing).unwrap();
        assert_eq!(listing, "28ff: temperature(°C)\r\nADC_1_0: moisture(%)\r\n");
    }

    #[test]
    fn concurrent_mutation_never_duplicates() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 200;

        let registry = Registry::new();

        std::thread::scope(|s| {
            for t in 0..THREADS {
                let registry = &registry;
                s.spawn(move || {
                    let name = std::format!("t{t}");
                    let mut own = None;
                    let mut round = 0;
                    while round < ROUNDS {
                        let Some(mut guard) = block_on(registry.lock(Duration::from_millis(10)))
                        else {
                            continue;
                        };

                        match own.take() {
                            Some(handle) => assert!(guard.remove(handle)),
                            None => own = Some(guard.add(temperature(&name)).unwrap()),
                        }

                        let mut seen = std::vec::Vec::new();
                        for (handle, descriptor) in guard.iter() {
                            assert!(!seen.contains(&handle));
                            assert!(descriptor.name().starts_with('t'));
                            seen.push(handle);
                        }
                        assert!(seen.len() <= THREADS);
                        round += 1;
                    }
                    if let Some(handle) = own {
                        let mut guard = block_on(registry.lock(Duration::from_secs(1))).unwrap();
                        assert!(guard.remove(handle));
                    }
                });
            }
        });

        assert!(registry.try_lock().unwrap().is_empty());
    }
}
