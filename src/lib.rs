//! # strand-mqtt
//!
//! An MQTT 3.1.1 client. The crate provides the packet codec, an
//! incremental framer, and a [`Client`] that multiplexes the control-packet
//! exchange with a broker over a single TCP, TLS, or WebSocket stream.
//!
//! Inbound publishes are delivered through [`MessageStream`] handles; all
//! request/response operations (connect, publish at the three QoS levels,
//! subscribe, unsubscribe, ping, disconnect) are async methods on the
//! client.
mod packet;
mod qos;
mod serde;

pub mod client;
pub mod filter;
pub mod misc;
pub mod packets;
pub mod topic;

pub use self::{
	client::{Client, ClientError, Message, MessageStream, Options},
	filter::{Filter, FilterBuf, InvalidFilter},
	packet::{Packet, PacketType},
	qos::{InvalidQoS, QoS},
	topic::{InvalidTopic, Topic, TopicBuf},
};

/// A packet identifier correlating a request with its acknowledgement(s).
///
/// The identifier zero is reserved on the wire for packets that carry none.
pub type PacketId = core::num::NonZeroU16;
