use crate::{
	misc, serde, FilterBuf, InvalidFilter, InvalidQoS, InvalidTopic, Packet, PacketId, QoS, Topic,
	TopicBuf,
};
use bytes::{Buf, BufMut, Bytes};
use std::{fmt, io, str::Utf8Error};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 0x04;

/// Marker for a filter the Server refused in a SubAck payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeFailed;

/// The return code carried by a [`ConnAck`] packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
	Accepted = 0,
	UnacceptableProtocolVersion = 1,
	IdentifierRejected = 2,
	ServerUnavailable = 3,
	BadUsernameOrPassword = 4,
	NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
	type Error = ParseError;
	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::Accepted),
			1 => Ok(Self::UnacceptableProtocolVersion),
			2 => Ok(Self::IdentifierRejected),
			3 => Ok(Self::ServerUnavailable),
			4 => Ok(Self::BadUsernameOrPassword),
			5 => Ok(Self::NotAuthorized),
			_ => Err(ParseError::MalformedPacket(
				"invalid return code in ConnAck",
			)),
		}
	}
}

impl fmt::Display for ConnectReturnCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let reason = match self {
			Self::Accepted => "connection accepted",
			Self::UnacceptableProtocolVersion => "unacceptable protocol version",
			Self::IdentifierRejected => "client identifier rejected",
			Self::ServerUnavailable => "server unavailable",
			Self::BadUsernameOrPassword => "bad username or password",
			Self::NotAuthorized => "not authorized",
		};
		f.write_str(reason)
	}
}

//
// Packet Types
//

#[derive(Clone, Debug, PartialEq)]
pub struct Connect {
	pub client_id: String,
	pub keep_alive: u16,
	pub clean_session: bool,
	pub will: Option<misc::Will>,
	pub credentials: Option<misc::Credentials>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnAck {
	pub session_present: bool,
	pub code: ConnectReturnCode,
}

#[derive(Clone, PartialEq)]
pub enum Publish {
	AtMostOnce {
		retain: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
	AtLeastOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
	ExactlyOnce {
		id: PacketId,
		retain: bool,
		duplicate: bool,
		topic: TopicBuf,
		payload: Bytes,
	},
}

id_packet!(PubAck, Packet::PubAck, 0x40);
id_packet!(PubRec, Packet::PubRec, 0x50);
id_packet!(PubRel, Packet::PubRel, 0x62);
id_packet!(PubComp, Packet::PubComp, 0x70);

#[derive(Clone, Debug, PartialEq)]
pub struct Subscribe {
	pub id: PacketId,
	pub filters: Vec<(FilterBuf, QoS)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubAck {
	pub id: PacketId,
	pub result: Vec<Result<QoS, SubscribeFailed>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Unsubscribe {
	pub id: PacketId,
	pub filters: Vec<FilterBuf>,
}

id_packet!(UnsubAck, Packet::UnsubAck, 0xb0);
nul_packet!(PingReq, Packet::PingReq, 0xc0);
nul_packet!(PingResp, Packet::PingResp, 0xd0);
nul_packet!(Disconnect, Packet::Disconnect, 0xe0);

impl Default for Connect {
	fn default() -> Self {
		Self {
			client_id: String::new(),
			keep_alive: 0,
			clean_session: true,
			will: None,
			credentials: None,
		}
	}
}

impl Connect {
	const USERNAME_FLAG: u8 = 0x80;
	const PASSWORD_FLAG: u8 = 0x40;
	const WILL_RETAIN_FLAG: u8 = 0x20;
	const WILL_QOS_MASK: u8 = 0x18;
	const WILL_FLAG: u8 = 0x04;
	const CLEAN_SESSION_FLAG: u8 = 0x02;

	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		if serde::get_str(&mut cursor)? != PROTOCOL_NAME {
			return Err(ParseError::MalformedPacket("invalid protocol name"));
		}

		if serde::get_u8(&mut cursor)? != PROTOCOL_LEVEL {
			return Err(ParseError::UnsupportedProtocolLevel);
		}

		let flags = serde::get_u8(&mut cursor)?;
		if flags & 0x01 != 0 {
			return Err(ParseError::MalformedPacket(
				"reserved Connect flag must be zero",
			));
		}

		let keep_alive = serde::get_u16(&mut cursor)?;
		let client_id = serde::get_str(&mut cursor)?;
		let clean_session = flags & Self::CLEAN_SESSION_FLAG != 0;

		let will = if flags & Self::WILL_FLAG != 0 {
			let topic = serde::get_str(&mut cursor)?;
			let payload = serde::get_bytes(&mut cursor)?.to_vec();
			let qos = ((flags & Self::WILL_QOS_MASK) >> 3).try_into()?;
			let retain = flags & Self::WILL_RETAIN_FLAG != 0;

			Some(misc::Will {
				topic: TopicBuf::new(topic)?,
				payload: Bytes::from(payload),
				qos,
				retain,
			})
		} else {
			if flags & (Self::WILL_QOS_MASK | Self::WILL_RETAIN_FLAG) != 0 {
				return Err(ParseError::MalformedPacket(
					"will QoS and retain require the will flag",
				));
			}
			None
		};

		if flags & Self::PASSWORD_FLAG != 0 && flags & Self::USERNAME_FLAG == 0 {
			return Err(ParseError::MalformedPacket(
				"password flag requires the username flag",
			));
		}

		let credentials = if flags & Self::USERNAME_FLAG != 0 {
			let username = serde::get_str(&mut cursor)?;
			let password = if flags & Self::PASSWORD_FLAG != 0 {
				Some(std::str::from_utf8(serde::get_bytes(&mut cursor)?)?.to_string())
			} else {
				None
			};
			Some(misc::Credentials {
				username: String::from(username),
				password,
			})
		} else {
			None
		};

		Ok(Self {
			client_id: String::from(client_id),
			keep_alive,
			clean_session,
			will,
			credentials,
		})
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		serde::put_u8(dst, 0x10)?;
		serde::put_var(dst, self.payload_len())?;

		serde::put_str(dst, PROTOCOL_NAME)?;
		serde::put_u8(dst, PROTOCOL_LEVEL)?;

		serde::put_u8(dst, self.flags())?;
		serde::put_u16(dst, self.keep_alive)?;

		serde::put_str(dst, &self.client_id)?;

		// The will topic and message, then the credentials, in flag order.
		if let Some(will) = &self.will {
			serde::put_str(dst, will.topic.as_str())?;
			serde::put_bytes(dst, &will.payload)?;
		}

		if let Some(credentials) = &self.credentials {
			serde::put_str(dst, &credentials.username)?;
			if let Some(password) = &credentials.password {
				serde::put_bytes(dst, password.as_bytes())?;
			}
		}

		Ok(())
	}

	#[inline(always)]
	fn payload_len(&self) -> usize {
		let mut len = 2 + PROTOCOL_NAME.len()
      + 4 // protocol level, flags, and keep alive
      + (2 + self.client_id.len());

		if let Some(will) = &self.will {
			len += 2 + will.topic.len() + 2 + will.payload.len();
		}

		if let Some(credentials) = &self.credentials {
			len += 2 + credentials.username.len();
			if let Some(password) = &credentials.password {
				len += 2 + password.len();
			}
		}

		len
	}

	fn flags(&self) -> u8 {
		let mut flags = 0;

		if self.clean_session {
			flags |= Self::CLEAN_SESSION_FLAG;
		}

		if let Some(will) = &self.will {
			flags |= Self::WILL_FLAG;
			flags |= (will.qos as u8) << 3;
			if will.retain {
				flags |= Self::WILL_RETAIN_FLAG;
			}
		}

		if let Some(credentials) = &self.credentials {
			flags |= Self::USERNAME_FLAG;
			if credentials.password.is_some() {
				flags |= Self::PASSWORD_FLAG;
			}
		}

		flags
	}
}

impl ConnAck {
	/// Parses the payload of a ConnAck packet.
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		if payload.len() != 2 {
			return Err(ParseError::MalformedPacket(
				"ConnAck packet must have length 2",
			));
		}

		let mut cursor = io::Cursor::new(payload);
		let flags = serde::get_u8(&mut cursor)?;
		let code = serde::get_u8(&mut cursor)?;

		if flags & 0xfe != 0 {
			return Err(ParseError::MalformedPacket(
				"upper 7 bits in ConnAck flags must be zero",
			));
		}

		let session_present = flags & 0x01 == 0x01;

		Ok(Self {
			session_present,
			code: code.try_into()?,
		})
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let Self {
			session_present,
			code,
		} = self;
		serde::put_u8(dst, 0x20)?;
		serde::put_var(dst, 2)?;
		serde::put_u8(dst, if *session_present { 0x01 } else { 0x00 })?;
		serde::put_u8(dst, *code as u8)?;
		Ok(())
	}
}

const PUBLISH_HEADER_CONTROL: u8 = 0x30;
const PUBLISH_HEADER_RETAIN_FLAG: u8 = 0x01;
const PUBLISH_HEADER_DUPLICATE_FLAG: u8 = 0x08;
const PUBLISH_HEADER_QOS_MASK: u8 = 0x06;

impl Publish {
	pub fn parse(payload: &Bytes, flags: u8) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload.as_ref());
		// Extract properties from the header flags.
		let retain = flags & PUBLISH_HEADER_RETAIN_FLAG == PUBLISH_HEADER_RETAIN_FLAG;
		let duplicate = flags & PUBLISH_HEADER_DUPLICATE_FLAG == PUBLISH_HEADER_DUPLICATE_FLAG;
		let qos: QoS = ((flags & PUBLISH_HEADER_QOS_MASK) >> 1).try_into()?;

		let topic = TopicBuf::new(serde::get_str(&mut cursor)?)?;

		// Only QoS 1 and 2 carry a packet identifier; the message body is
		// whatever remains of the packet.
		match qos {
			QoS::AtMostOnce => {
				if duplicate {
					return Err(ParseError::MalformedPacket(
						"duplicate flag must be 0 for Publish packets with QoS of AtMostOnce",
					));
				}
				let body = payload.slice(cursor.position() as usize..);

				Ok(Self::AtMostOnce {
					retain,
					topic,
					payload: body,
				})
			}
			QoS::AtLeastOnce => {
				let id = serde::get_id(&mut cursor)?;
				let body = payload.slice(cursor.position() as usize..);

				Ok(Self::AtLeastOnce {
					id,
					retain,
					duplicate,
					topic,
					payload: body,
				})
			}
			QoS::ExactlyOnce => {
				let id = serde::get_id(&mut cursor)?;
				let body = payload.slice(cursor.position() as usize..);

				Ok(Self::ExactlyOnce {
					id,
					retain,
					duplicate,
					topic,
					payload: body,
				})
			}
		}
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let mut flags = PUBLISH_HEADER_CONTROL | (self.qos() as u8) << 1;
		if self.retain() {
			flags |= PUBLISH_HEADER_RETAIN_FLAG;
		}
		if self.duplicate() {
			flags |= PUBLISH_HEADER_DUPLICATE_FLAG;
		}

		let id_len = if self.qos().needs_id() { 2 } else { 0 };
		let topic = self.topic();
		let payload = self.payload();

		serde::put_u8(dst, flags)?;
		serde::put_var(dst, 2 + topic.len() + id_len + payload.len())?;
		serde::put_str(dst, topic.as_str())?;
		if let Some(id) = self.id() {
			serde::put_u16(dst, id.get())?;
		}
		serde::put_slice(dst, payload)?;

		Ok(())
	}

	/// Returns the topic of the Publish packet.
	#[inline]
	pub fn topic(&self) -> &Topic {
		match self {
			Self::AtMostOnce { topic, .. } => topic,
			Self::AtLeastOnce { topic, .. } => topic,
			Self::ExactlyOnce { topic, .. } => topic,
		}
	}

	/// Returns the payload of the Publish packet.
	#[inline]
	pub fn payload(&self) -> &Bytes {
		match self {
			Self::AtMostOnce { payload, .. } => payload,
			Self::AtLeastOnce { payload, .. } => payload,
			Self::ExactlyOnce { payload, .. } => payload,
		}
	}

	/// Returns the QoS of the Publish packet.
	#[inline]
	pub fn qos(&self) -> QoS {
		match self {
			Self::AtMostOnce { .. } => QoS::AtMostOnce,
			Self::AtLeastOnce { .. } => QoS::AtLeastOnce,
			Self::ExactlyOnce { .. } => QoS::ExactlyOnce,
		}
	}

	/// Returns the retain flag of the Publish packet.
	#[inline]
	pub fn retain(&self) -> bool {
		match self {
			Self::AtMostOnce { retain, .. } => *retain,
			Self::AtLeastOnce { retain, .. } => *retain,
			Self::ExactlyOnce { retain, .. } => *retain,
		}
	}

	/// Returns the Packet ID of the Publish packet.
	///
	/// This will always return `None` for Publish packets with [`QoS`] of
	/// [`AtMostOnce`].
	///
	/// [`AtMostOnce`]: QoS#variant.AtMostOnce
	#[inline]
	pub fn id(&self) -> Option<PacketId> {
		match self {
			Self::AtMostOnce { .. } => None,
			Self::AtLeastOnce { id, .. } => Some(*id),
			Self::ExactlyOnce { id, .. } => Some(*id),
		}
	}

	/// Returns the duplicate flag of the Publish packet.
	///
	/// This will always return `false` for Publish packets with [`QoS`] of
	/// [`AtMostOnce`].
	///
	/// [`AtMostOnce`]: QoS#variant.AtMostOnce
	#[inline]
	pub fn duplicate(&self) -> bool {
		match self {
			Self::AtMostOnce { .. } => false,
			Self::AtLeastOnce { duplicate, .. } => *duplicate,
			Self::ExactlyOnce { duplicate, .. } => *duplicate,
		}
	}
}

impl fmt::Debug for Publish {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Publish")
			.field("id", &self.id())
			.field("qos", &self.qos())
			.field("retain", &self.retain())
			.field("duplicate", &self.duplicate())
			.field("topic", &self.topic())
			.field("payload length", &self.payload().len())
			.finish()
	}
}

impl Subscribe {
	/// Parses the payload of a [`Subscribe`] packet.
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		let id = serde::get_id(&mut cursor)?;

		let mut filters = Vec::new();
		while cursor.has_remaining() {
			let filter = serde::get_str(&mut cursor)?;
			let qos: QoS = serde::get_u8(&mut cursor)?.try_into()?;
			filters.push((FilterBuf::new(filter)?, qos));
		}

		if filters.is_empty() {
			return Err(ParseError::MalformedPacket(
				"Subscribe packet must contain at least one filter",
			));
		}

		Ok(Self { id, filters })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let Self { id, filters } = self;
		serde::put_u8(dst, 0x82)?;

		let len = 2 + filters
			.iter()
			.fold(0usize, |acc, (filter, _)| acc + 3 + filter.len());

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for (filter, qos) in filters {
			serde::put_str(dst, filter.as_str())?;
			serde::put_u8(dst, *qos as u8)?;
		}

		Ok(())
	}
}

impl SubAck {
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		let id = serde::get_id(&mut cursor)?;

		let mut result = Vec::new();
		while cursor.has_remaining() {
			let return_code = serde::get_u8(&mut cursor)?;
			let qos: Result<QoS, SubscribeFailed> = match return_code.try_into() {
				Ok(qos) => Ok(qos),
				Err(_) => {
					if return_code == 0x80 {
						Err(SubscribeFailed)
					} else {
						return Err(ParseError::MalformedPacket("invalid return code in SubAck"));
					}
				}
			};

			result.push(qos);
		}

		if result.is_empty() {
			return Err(ParseError::MalformedPacket(
				"SubAck packet must contain at least one return code",
			));
		}

		Ok(Self { id, result })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let Self { id, result } = self;
		serde::put_u8(dst, 0x90)?;

		let len = 2 + result.len();

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for qos in result {
			serde::put_u8(dst, qos.as_ref().map(|qos| *qos as u8).unwrap_or(0x80))?;
		}

		Ok(())
	}
}

impl Unsubscribe {
	/// Parses the payload of an [`Unsubscribe`] packet.
	pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
		let mut cursor = io::Cursor::new(payload);
		let id = serde::get_id(&mut cursor)?;

		let mut filters = Vec::new();
		while cursor.has_remaining() {
			let filter = serde::get_str(&mut cursor)?;
			filters.push(FilterBuf::new(filter)?);
		}

		if filters.is_empty() {
			return Err(ParseError::MalformedPacket(
				"Unsubscribe packet must contain at least one filter",
			));
		}

		Ok(Self { id, filters })
	}

	pub fn serialize_to_bytes(&self, dst: &mut impl BufMut) -> Result<(), serde::WriteError> {
		let Self { id, filters } = self;
		serde::put_u8(dst, 0xa2)?;

		let len = 2 + filters
			.iter()
			.fold(0usize, |acc, filter| acc + 2 + filter.len());

		serde::put_var(dst, len)?;
		serde::put_u16(dst, id.get())?;
		for filter in filters {
			serde::put_str(dst, filter.as_str())?;
		}

		Ok(())
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
	#[error("not enough bytes to complete the packet")]
	Incomplete,
	#[error("packet exceeds the maximum allowed size")]
	PacketTooLarge,
	#[error("invalid fixed header")]
	InvalidHeader,
	#[error("malformed remaining length")]
	MalformedLength,
	#[error("packet identifier cannot be zero")]
	ZeroPacketId,
	#[error("unsupported protocol level")]
	UnsupportedProtocolLevel,
	#[error("malformed packet: {0}")]
	MalformedPacket(&'static str),
	#[error(transparent)]
	InvalidQoS(#[from] InvalidQoS),
	#[error("invalid topic: {0}")]
	InvalidTopic(#[from] InvalidTopic),
	#[error("invalid filter: {0}")]
	InvalidFilter(#[from] InvalidFilter),
	#[error("invalid utf-8 in string")]
	Utf8(#[from] Utf8Error),
}

macro_rules! id_packet {
	($name:tt,$variant:expr,$header:literal) => {
		#[derive(Clone, Copy, Debug, PartialEq, Eq)]
		pub struct $name {
			pub id: PacketId,
		}

		impl $name {
			pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
				if payload.len() != 2 {
					return Err(ParseError::MalformedPacket("packet must have length 2"));
				}

				let mut buf = io::Cursor::new(payload);
				let id = crate::serde::get_id(&mut buf)?;
				Ok(Self { id })
			}

			pub fn serialize_to_bytes(
				&self,
				dst: &mut impl BufMut,
			) -> Result<(), crate::serde::WriteError> {
				let Self { id } = self;
				crate::serde::put_u8(dst, $header)?;
				crate::serde::put_var(dst, 2)?;
				crate::serde::put_u16(dst, id.get())?;
				Ok(())
			}
		}

		impl From<$name> for Packet {
			#[inline]
			fn from(value: $name) -> Packet {
				$variant(value)
			}
		}
	};
}
use id_packet;

macro_rules! nul_packet {
	($name:tt,$variant:expr,$header:literal) => {
		#[derive(Clone, Copy, Debug, PartialEq, Eq)]
		pub struct $name;

		impl $name {
			pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
				if !payload.is_empty() {
					return Err(ParseError::MalformedPacket("packet must have length 0"));
				}
				Ok(Self)
			}

			pub fn serialize_to_bytes(
				&self,
				dst: &mut impl BufMut,
			) -> Result<(), crate::serde::WriteError> {
				crate::serde::put_u8(dst, $header)?;
				crate::serde::put_var(dst, 0)?;
				Ok(())
			}
		}

		impl From<$name> for Packet {
			#[inline]
			fn from(_: $name) -> Packet {
				$variant
			}
		}
	};
}
use nul_packet;

#[cfg(test)]
mod tests {
	use super::*;
	use bytes::BytesMut;

	fn encode(packet: &Packet) -> Vec<u8> {
		let mut buffer = BytesMut::new();
		packet.serialize_to_bytes(&mut buffer).unwrap();
		buffer.to_vec()
	}

	#[test]
	fn connect_encodes_observed_bytes() {
		let connect = Connect {
			client_id: "c1".into(),
			keep_alive: 60,
			clean_session: true,
			..Default::default()
		};

		assert_eq!(
			encode(&connect.into()),
			[
				0x10, 0x0e, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x04, 0x02, 0x00, 0x3c, 0x00,
				0x02, 0x63, 0x31
			]
		);
	}

	#[test]
	fn connect_flags_cover_will_and_credentials() {
		let connect = Connect {
			client_id: "c".into(),
			keep_alive: 30,
			clean_session: false,
			will: Some(misc::Will::new(
				TopicBuf::new("status/c").unwrap(),
				&b"gone"[..],
				QoS::AtLeastOnce,
				true,
			)),
			credentials: Some(("user", "pass").into()),
		};

		let bytes = encode(&connect.clone().into());
		// flags: username | password | will retain | will qos 1 | will | no clean session
		assert_eq!(bytes[9], 0x80 | 0x40 | 0x20 | 0x08 | 0x04);

		let parsed = Connect::parse(&bytes[2..]).unwrap();
		assert_eq!(parsed, connect);
	}

	#[test]
	fn connect_rejects_foreign_protocol_level() {
		let mut bytes = encode(
			&Connect {
				client_id: "c1".into(),
				..Default::default()
			}
			.into(),
		);
		bytes[8] = 0x05;
		assert!(matches!(
			Connect::parse(&bytes[2..]),
			Err(ParseError::UnsupportedProtocolLevel)
		));
	}

	#[test]
	fn connack_parses_and_round_trips() {
		let parsed = ConnAck::parse(&[0x01, 0x00]).unwrap();
		assert_eq!(
			parsed,
			ConnAck {
				session_present: true,
				code: ConnectReturnCode::Accepted
			}
		);
		assert_eq!(encode(&parsed.into()), [0x20, 0x02, 0x01, 0x00]);

		assert!(matches!(
			ConnAck::parse(&[0x02, 0x00]),
			Err(ParseError::MalformedPacket(_))
		));
		assert!(matches!(
			ConnAck::parse(&[0x00, 0x06]),
			Err(ParseError::MalformedPacket(_))
		));
	}

	#[test]
	fn qos0_publish_encodes_observed_bytes() {
		let publish = Publish::AtMostOnce {
			retain: false,
			topic: TopicBuf::new("a/b").unwrap(),
			payload: Bytes::from_static(b"hi"),
		};

		assert_eq!(
			encode(&publish.into()),
			[0x30, 0x07, 0x00, 0x03, 0x61, 0x2f, 0x62, 0x68, 0x69]
		);
	}

	#[test]
	fn qos1_publish_encodes_observed_bytes() {
		let publish = Publish::AtLeastOnce {
			id: PacketId::new(1).unwrap(),
			retain: false,
			duplicate: false,
			topic: TopicBuf::new("a").unwrap(),
			payload: Bytes::new(),
		};

		assert_eq!(
			encode(&publish.into()),
			[0x32, 0x05, 0x00, 0x01, 0x61, 0x00, 0x01]
		);
	}

	#[test]
	fn qos0_publish_rejects_duplicate_flag() {
		// 0x38: QoS 0 with the duplicate bit set.
		let payload = Bytes::from_static(&[0x00, 0x01, 0x61]);
		assert!(matches!(
			Publish::parse(&payload, 0x08),
			Err(ParseError::MalformedPacket(_))
		));
	}

	#[test]
	fn pubrel_uses_the_mandated_header() {
		let pubrel = PubRel {
			id: PacketId::new(7).unwrap(),
		};
		assert_eq!(encode(&pubrel.into()), [0x62, 0x02, 0x00, 0x07]);

		let pubcomp = PubComp {
			id: PacketId::new(7).unwrap(),
		};
		assert_eq!(encode(&pubcomp.into()), [0x70, 0x02, 0x00, 0x07]);
	}

	#[test]
	fn suback_separates_grants_from_failures() {
		let suback = SubAck::parse(&[0x00, 0x09, 0x01, 0x80, 0x02]).unwrap();
		assert_eq!(suback.id.get(), 9);
		assert_eq!(
			suback.result,
			vec![Ok(QoS::AtLeastOnce), Err(SubscribeFailed), Ok(QoS::ExactlyOnce)]
		);

		assert!(matches!(
			SubAck::parse(&[0x00, 0x09, 0x03]),
			Err(ParseError::MalformedPacket(_))
		));
	}

	#[test]
	fn subscribe_requires_a_filter() {
		assert!(matches!(
			Subscribe::parse(&[0x00, 0x01]),
			Err(ParseError::MalformedPacket(_))
		));
	}
}
