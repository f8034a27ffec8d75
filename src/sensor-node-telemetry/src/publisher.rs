//! Forwarding of queued messages to the transport.

use core::{fmt::Debug, future::Future};

use embassy_time::Duration;
use sensor_node_log::{debug, info, warn};

use crate::{
    config::PublisherConfig, message::OutboundMessage, queue::OutboundQueue, readiness::Readiness,
};

/// The transport client, e.g., an MQTT session.
///
/// Delivery guarantees beyond a single attempt (e.g., QoS 1 retransmissions) are the
/// transport's business.
pub trait Transport {
    /// Error returned when a message could not be handed over.
    type Error: Debug;

    /// Publishes `message` verbatim.
    fn publish(&mut self, message: &OutboundMessage)
        -> impl Future<Output = Result<(), Self::Error>>;
}

/// Outcome of [`Publisher::publish_next()`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishStatus {
    /// No message arrived before the dequeue timeout.
    Idle,
    /// A message was handed over to the transport.
    Published,
    /// The transport rejected a message, which was dropped.
    Failed,
}

/// Single consumer of the [`OutboundQueue`].
pub struct Publisher<'a, T, L> {
    transport: T,
    queue: &'a OutboundQueue,
    link: L,
    config: PublisherConfig,
}

impl<'a, T: Transport, L: Readiness> Publisher<'a, T, L> {
    /// Creates a publisher draining `queue` into `transport`, once `link` has come up.
    pub fn new(transport: T, queue: &'a OutboundQueue, link: L, config: PublisherConfig) -> Self {
        Self {
            transport,
            queue,
            link,
            config,
        }
    }

    /// Waits until the link reports connected.
    ///
    /// The link is polled in slices of [`PublisherConfig::connect_poll`], with a warning for
    /// every slice that elapses.
    pub async fn wait_for_link(&self) {
        while !self.link.wait_ready(self.config.connect_poll).await {
            warn!(
                "link not connected after {} ms, still waiting",
                self.config.connect_poll.as_millis()
            );
        }
        info!("link connected, publishing");
    }

    /// Waits for one message and hands it over to the transport.
    pub async fn publish_next(&mut self) -> PublishStatus {
        let Some(message) = self.queue.dequeue(self.config.dequeue_timeout).await else {
            if !self.link.wait_ready(Duration::from_ticks(0)).await {
                debug!("nothing to publish, link is down");
            }
            return PublishStatus::Idle;
        };

        match self.transport.publish(&message).await {
            Ok(()) => {
                debug!("published to {}", message.topic());
                PublishStatus::Published
            }
            Err(_) => {
                warn!("cannot publish to {}, message dropped", message.topic());
                PublishStatus::Failed
            }
        }
    }

    /// Waits for the link, then publishes forever.
    ///
    /// A link that goes down later is not waited for again: messages keep flowing to the
    /// transport, which is expected to buffer or reject them.
    pub async fn run(mut self) -> ! {
        self.wait_for_link().await;
        loop {
            let _ = self.publish_next().await;
        }
    }

    /// Returns the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }
}
