use super::{transport::Transport, ClientError};
use crate::{
	packet::{Frame, Packet},
	packets::ParseError,
};
use bytes::BytesMut;
use std::io::{self, Cursor};

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reads and writes whole packets over a [`Transport`], buffering partial
/// frames until the rest of their bytes arrive.
pub(crate) struct MqttStream {
	transport: Transport,
	buffer: BytesMut,
	max_packet_size: usize,
}

impl MqttStream {
	pub fn new(transport: Transport, max_packet_size: usize) -> Self {
		Self {
			transport,
			buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
			max_packet_size,
		}
	}

	fn parse_packet(&mut self) -> Result<Option<Packet>, ParseError> {
		use ParseError::Incomplete;

		let mut buf = Cursor::new(&self.buffer[..]);
		match Frame::check(&mut buf, self.max_packet_size) {
			Ok(extent) => {
				let bytes = self.buffer.split_to(extent).freeze();
				Ok(Some(Packet::parse(&Frame::parse(bytes)?)?))
			}
			Err(Incomplete) => Ok(None),
			Err(error) => Err(error),
		}
	}

	/// Reads the next packet from the transport. Returns `None` on a clean
	/// end of stream between packets.
	pub async fn read_packet(&mut self) -> Result<Option<Packet>, ClientError> {
		loop {
			// Attempt to parse a packet from the buffered data.
			if let Some(packet) = self.parse_packet()? {
				return Ok(Some(packet));
			}

			// There is not enough buffered data to read a packet. Attempt
			// to read more.
			if 0 == self.transport.read_buf(&mut self.buffer).await? {
				// If the buffer is empty the connection was shut down
				// cleanly, otherwise the peer closed the stream while
				// sending a packet.
				if self.buffer.is_empty() {
					return Ok(None);
				} else {
					return Err(ClientError::Transport(io::Error::from(
						io::ErrorKind::ConnectionReset,
					)));
				}
			}
		}
	}

	pub async fn write_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
		let mut buffer = BytesMut::new();
		packet.serialize_to_bytes(&mut buffer)?;
		tracing::trace!(len = buffer.len(), "writing to stream");
		self.transport.write_all(&buffer).await
	}

	pub async fn shutdown(&mut self) {
		self.transport.shutdown().await;
	}
}
