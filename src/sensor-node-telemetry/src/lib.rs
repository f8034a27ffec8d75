//! Sensor telemetry coordination for a sensor node.
//!
//! Sensor drivers discover and sample sensors on their own schedule, publish their
//! [`SensorDescriptor`]s into the shared [`Registry`], and push readings into the bounded
//! [`OutboundQueue`], from which a single [`Publisher`] forwards them to the transport at its
//! own pace.
//!
//! All shared state is built on [`embassy_sync`] primitives and can be placed in `static`s,
//! then handed by reference to each task:
//!
//! ```
//! use sensor_node_telemetry::{OutboundQueue, ReadinessGate, Registry};
//!
//! static REGISTRY: Registry = Registry::new();
//! static QUEUE: OutboundQueue = OutboundQueue::new();
//! static TRANSPORT_READY: ReadinessGate = ReadinessGate::new();
//! ```
//!
//! Every wait is bounded: registry and connectivity locks time out after a few milliseconds,
//! readiness is polled, and dequeuing gives up after a timeout. Contention is never escalated;
//! callers retry on their next tick or drop data.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

pub mod analog;
pub mod config;
pub mod connectivity;
pub mod descriptor;
pub mod link;
pub mod message;
pub mod onewire;
pub mod publisher;
pub mod queue;
pub mod readiness;
pub mod registry;

#[cfg(test)]
mod test_log;

pub use config::TopicConfig;
pub use connectivity::{ConnectivityState, LinkFlag, LinkStatus};
pub use descriptor::SensorDescriptor;
pub use message::OutboundMessage;
pub use publisher::{Publisher, Transport};
pub use queue::OutboundQueue;
pub use readiness::{Readiness, ReadinessGate};
pub use registry::{Registry, RegistryGuard, SensorHandle};
