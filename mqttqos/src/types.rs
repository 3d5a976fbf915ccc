//! Common types for mqttqos.

use std::fmt;
use std::num::NonZeroU16;

use bytes::Bytes;

use crate::protocol::v4::{PubAck, PubComp, PubRec};

/// Quality of Service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum QoS {
    /// At most once delivery (fire and forget).
    #[default]
    AtMostOnce = 0,
    /// At least once delivery (PUBLISH, PUBACK).
    AtLeastOnce = 1,
    /// Exactly once delivery (PUBLISH, PUBREC, PUBREL, PUBCOMP).
    ExactlyOnce = 2,
}

impl QoS {
    /// Parse the two QoS bits of a fixed header or subscription option.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// Packet identifier, a non-zero 16-bit value.
///
/// Zero is reserved by MQTT and cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(NonZeroU16);

impl PacketId {
    /// Smallest identifier.
    pub const MIN: PacketId = PacketId(NonZeroU16::MIN);
    /// Largest identifier.
    pub const MAX: PacketId = PacketId(NonZeroU16::MAX);

    /// Wrap a raw identifier, `None` for 0.
    pub fn new(value: u16) -> Option<Self> {
        NonZeroU16::new(value).map(PacketId)
    }

    /// Raw identifier value.
    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MQTT message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic name.
    pub topic: String,
    /// Message payload.
    pub payload: Bytes,
    /// QoS the message was delivered with.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
}

impl Message {
    /// Create a new message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    /// Set QoS.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set retain flag.
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Acknowledgments observed for one publish.
///
/// QoS 0 leaves every field empty. QoS 1 fills `puback`, QoS 2 fills
/// `pubrec` and `pubcomp`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishResult {
    /// Identifier used by the publish, if any.
    pub packet_id: Option<PacketId>,
    /// PUBACK (QoS 1).
    pub puback: Option<PubAck>,
    /// PUBREC (QoS 2).
    pub pubrec: Option<PubRec>,
    /// PUBCOMP (QoS 2).
    pub pubcomp: Option<PubComp>,
}
