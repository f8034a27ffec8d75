//! Messages published by the node.
//!
//! A reading is published under the topic `<namespace>/<node-id>/<quantity>/<sensor-name>`
//! with the payload `{"value": <number with one decimal>, "unit": "<unit>"}`.

use core::fmt::{self, Write as _};

use heapless::String;

use crate::{config::TopicConfig, descriptor::SensorDescriptor};

/// Maximum length of a topic, in bytes.
pub const MAX_TOPIC_LEN: usize = 128;
/// Maximum length of a payload, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 128;

/// A fixed-size message, copied into and out of the [`OutboundQueue`](crate::OutboundQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutboundMessage {
    topic: String<MAX_TOPIC_LEN>,
    payload: String<MAX_PAYLOAD_LEN>,
}

impl OutboundMessage {
    /// Creates a message from a raw topic and payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is not ASCII, or if either string is too long.
    pub fn new(topic: &str, payload: &str) -> Result<Self, MessageError> {
        if !topic.is_ascii() {
            return Err(MessageError::NonAsciiTopic);
        }

        let mut message = Self {
            topic: String::new(),
            payload: String::new(),
        };
        message
            .topic
            .push_str(topic)
            .map_err(|_| MessageError::TopicTooLong)?;
        message
            .payload
            .push_str(payload)
            .map_err(|_| MessageError::PayloadTooLong)?;
        Ok(message)
    }

    /// Formats a sensor reading.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not finite, if the topic would not be ASCII, or if the
    /// topic or the payload would not fit.
    pub fn reading(
        topic: &TopicConfig,
        descriptor: &SensorDescriptor,
        value: f32,
    ) -> Result<Self, MessageError> {
        if !value.is_finite() {
            return Err(MessageError::NonFiniteValue);
        }

        let mut message = Self {
            topic: String::new(),
            payload: String::new(),
        };

        write!(
            message.topic,
            "{}/{}/{}/{}",
            topic.namespace,
            topic.node_id,
            descriptor.quantity(),
            descriptor.name()
        )
        .map_err(|_| MessageError::TopicTooLong)?;
        if !message.topic.is_ascii() {
            return Err(MessageError::NonAsciiTopic);
        }

        write_payload(&mut message.payload, value, descriptor.unit())
            .map_err(|_| MessageError::PayloadTooLong)?;

        Ok(message)
    }

    /// Returns the topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

fn write_payload(out: &mut impl fmt::Write, value: f32, unit: &str) -> fmt::Result {
    write!(out, "{{\"value\": {value:.1}, \"unit\": \"")?;
    write_json_escaped(out, unit)?;
    out.write_str("\"}")
}

// Non-ASCII characters are escaped so that payloads stay ASCII.
fn write_json_escaped(out: &mut impl fmt::Write, s: &str) -> fmt::Result {
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            c if c.is_ascii() && !c.is_ascii_control() => out.write_char(c)?,
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(out, "\\u{unit:04x}")?;
                }
            }
        }
    }
    Ok(())
}

/// Errors returned when building an [`OutboundMessage`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageError {
    /// The topic does not fit in [`MAX_TOPIC_LEN`] bytes.
    TopicTooLong,
    /// The payload does not fit in [`MAX_PAYLOAD_LEN`] bytes.
    PayloadTooLong,
    /// The topic contains non-ASCII characters.
    NonAsciiTopic,
    /// The value is NaN or infinite.
    NonFiniteValue,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopicTooLong => write!(f, "topic longer than {MAX_TOPIC_LEN} bytes"),
            Self::PayloadTooLong => write!(f, "payload longer than {MAX_PAYLOAD_LEN} bytes"),
            Self::NonAsciiTopic => write!(f, "topic is not ASCII"),
            Self::NonFiniteValue => write!(f, "value is not finite"),
        }
    }
}

impl core::error::Error for MessageError {}
