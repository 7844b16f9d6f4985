//! An in-process broker end for client tests: the other half of a duplex
//! pipe, speaking the same codec through [`MqttStream`].

use super::{
	options::MAXIMUM_PACKET_SIZE, stream::MqttStream, transport::Transport, Client, ClientError,
	Options,
};
use crate::{
	packets::{self, ConnAck, ConnectReturnCode},
	Packet,
};

pub(crate) fn pair() -> (Transport, MqttStream) {
	let (near, far) = tokio::io::duplex(4096);
	(
		Transport::Stream(Box::new(near)),
		MqttStream::new(Transport::Stream(Box::new(far)), MAXIMUM_PACKET_SIZE),
	)
}

/// The broker end of an established connection.
pub(crate) struct Broker {
	stream: MqttStream,
	connect: packets::Connect,
}

impl Broker {
	pub async fn read_packet(&mut self) -> Result<Option<Packet>, ClientError> {
		self.stream.read_packet().await
	}

	pub async fn write_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
		self.stream.write_packet(packet).await
	}

	/// The Connect packet the client opened the session with.
	pub fn into_connect(self) -> packets::Connect {
		self.connect
	}
}

/// Reads the client's Connect and accepts it.
pub(crate) async fn accept_connect(stream: &mut MqttStream) -> packets::Connect {
	let Some(Packet::Connect(connect)) = stream.read_packet().await.unwrap() else {
		panic!("expected a Connect packet");
	};
	stream
		.write_packet(
			&ConnAck {
				session_present: false,
				code: ConnectReturnCode::Accepted,
			}
			.into(),
		)
		.await
		.unwrap();
	connect
}

/// A client connected to an in-process broker end.
pub(crate) async fn connected(options: Options) -> (Client, Broker) {
	let client = Client::new(options).unwrap();
	let (transport, mut stream) = pair();

	let (result, connect) = tokio::join!(
		client.connect_over(transport),
		accept_connect(&mut stream)
	);
	result.unwrap();

	(client, Broker { stream, connect })
}
