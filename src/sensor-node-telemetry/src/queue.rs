//! Bounded outbound queue between the sensor drivers and the transport publisher.
//!
//! Producers never block: when the queue is full, [`OutboundQueue::enqueue()`] fails fast and
//! the reading is dropped. This is the backpressure policy of the node: sampling throughput
//! must never stall on publish throughput.

use core::fmt;

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, TrySendError},
};
use embassy_time::{with_timeout, Duration};
use sensor_node_log::warn;

use crate::{
    config::TopicConfig,
    descriptor::SensorDescriptor,
    message::{MessageError, OutboundMessage},
};

/// Number of slots of the [`OutboundQueue`].
pub const QUEUE_CAPACITY: usize = 8;

/// Bounded FIFO of [`OutboundMessage`]s, with any number of producers and a single consumer.
pub struct OutboundQueue {
    channel: Channel<CriticalSectionRawMutex, OutboundMessage, QUEUE_CAPACITY>,
}

impl OutboundQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Appends `message` without blocking.
    ///
    /// Returns `false`, dropping the message and leaving the queue unchanged, if the queue is
    /// full.
    #[must_use = "a dropped message should at least be logged"]
    pub fn enqueue(&self, message: OutboundMessage) -> bool {
        match self.channel.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
        }
    }

    /// Waits up to `timeout` for the oldest message.
    pub async fn dequeue(&self, timeout: Duration) -> Option<OutboundMessage> {
        with_timeout(timeout, self.channel.receive()).await.ok()
    }

    /// Returns the oldest message, if any, without waiting.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<OutboundMessage> {
        self.channel.try_receive().ok()
    }

    /// Returns the number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    /// Returns whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Formats a reading of `descriptor` and enqueues it.
    ///
    /// Failures are logged here; callers only need the outcome for bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be built or if the queue is full. In both
    /// cases the reading is dropped.
    pub fn push_reading(
        &self,
        topic: &TopicConfig,
        descriptor: &SensorDescriptor,
        value: f32,
    ) -> Result<(), PushError> {
        let message = match OutboundMessage::reading(topic, descriptor, value) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    "{}: cannot format reading ({:?}), dropped",
                    descriptor.name(),
                    err
                );
                return Err(PushError::Message(err));
            }
        };

        if self.enqueue(message) {
            Ok(())
        } else {
            warn!("outbound queue is full, {} reading dropped", descriptor.name());
            Err(PushError::QueueFull)
        }
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Reasons for which a reading was dropped by [`OutboundQueue::push_reading()`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PushError {
    /// The reading could not be formatted.
    Message(MessageError),
    /// The queue was full.
    QueueFull,
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(err) => write!(f, "cannot format reading: {err}"),
            Self::QueueFull => write!(f, "outbound queue is full"),
        }
    }
}

impl core::error::Error for PushError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Message(err) => Some(err),
            Self::QueueFull => None,
        }
    }
}
