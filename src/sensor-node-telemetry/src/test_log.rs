//! Records emitted through the `log` backend, for assertions on severities.
//!
//! Tests build `sensor-node-log` with its `log` feature, so the facade is reachable through it.

use std::{
    string::{String, ToString},
    sync::{Mutex, Once},
    vec::Vec,
};

use sensor_node_log::hidden::log::{self, Level, LevelFilter, Log, Metadata, Record};

struct Capture(Mutex<Vec<(Level, String)>>);

impl Log for Capture {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        if let Ok(mut records) = self.0.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));
static INSTALL: Once = Once::new();

/// Installs the capturing logger; later calls are no-ops.
pub(crate) fn install() {
    INSTALL.call_once(|| {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(LevelFilter::Trace);
    });
}

/// Returns the levels of every record so far whose message contains `needle`.
pub(crate) fn levels_of(needle: &str) -> Vec<Level> {
    CAPTURE
        .0
        .lock()
        .map(|records| {
            records
                .iter()
                .filter(|(_, message)| message.contains(needle))
                .map(|(level, _)| *level)
                .collect()
        })
        .unwrap_or_default()
}
