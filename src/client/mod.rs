//! The MQTT client.
//!
//! A [`Client`] owns at most one connection to a broker. Requests are
//! submitted to the connection's task over a channel and each suspends its
//! caller until the broker's acknowledgement arrives, the configured
//! timeout fires, or the connection goes away. Inbound publishes are
//! fanned out to every [`MessageStream`] open on the client.
mod command;
mod connection;
mod conv;
mod id;
mod options;
mod registry;
mod stream;
mod transport;

#[cfg(test)]
mod testing;

pub use self::{
	conv::{Filters, FiltersWithQoS},
	options::{InvalidOptions, Options},
};

use self::{
	command::{Matcher, Operation, Request, RequestTx},
	connection::Connection,
	id::IdAllocator,
	stream::MqttStream,
	transport::Transport,
};
use crate::{
	packets::{self, ConnectReturnCode, ParseError, Publish, SubscribeFailed},
	serde, InvalidFilter, InvalidTopic, Packet, PacketId, QoS, TopicBuf,
};
use bytes::Bytes;
use std::{
	convert, fmt, io,
	sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// An inbound publish as handed to [`MessageStream`] subscribers.
#[derive(Clone, Debug)]
pub struct Message {
	pub topic: TopicBuf,
	pub payload: Bytes,
	pub qos: QoS,
	pub retain: bool,
}

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("client is already connected")]
	AlreadyConnected,
	#[error("client is not connected")]
	NoConnection,
	#[error("broker rejected the connection: {0}")]
	FailedToConnect(ConnectReturnCode),
	#[error("the broker did not acknowledge the request in time")]
	Timeout,
	#[error("received a packet the broker should not have sent")]
	UnexpectedPacket,
	#[error("malformed packet: {0}")]
	MalformedPacket(#[from] ParseError),
	#[error("broker did not answer a ping within the keep-alive window")]
	KeepAliveTimeout,
	#[error("connection closed ({cause})")]
	ConnectionClosed { cause: CloseCause },
	#[error("every packet identifier is in flight")]
	TooManyInflight,
	#[error("broker refused the subscription (filters {indices:?})")]
	SubscribeFailed { indices: Vec<usize> },
	#[error("transport error: {0}")]
	Transport(#[from] io::Error),
	#[error("invalid topic: {0}")]
	InvalidTopic(#[from] InvalidTopic),
	#[error("invalid filter: {0}")]
	InvalidFilter(#[from] InvalidFilter),
}

/// What ended the connection an operation was still riding on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCause {
	/// An orderly disconnect requested through the client.
	Shutdown,
	/// The transport failed or the broker hung up.
	Transport,
	/// The broker violated the protocol.
	Protocol,
	/// Inbound bytes did not decode to a packet.
	Decode,
}

impl fmt::Display for CloseCause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let reason = match self {
			Self::Shutdown => "closed by request",
			Self::Transport => "transport failure",
			Self::Protocol => "protocol violation",
			Self::Decode => "malformed inbound packet",
		};
		f.write_str(reason)
	}
}

impl From<serde::WriteError> for ClientError {
	fn from(_: serde::WriteError) -> Self {
		Self::MalformedPacket(ParseError::PacketTooLarge)
	}
}

impl From<convert::Infallible> for ClientError {
	fn from(_: convert::Infallible) -> Self {
		unreachable!()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
	Disconnected,
	Connecting,
	Connected,
	Closing,
}

struct Core {
	state: ConnectionState,
	requests: Option<RequestTx>,
}

struct ClientShared {
	options: Options,
	core: Mutex<Core>,
	ids: IdAllocator,
	listeners: Listeners,
}

/// Registered message listeners, in insertion order. Deliveries iterate a
/// snapshot so registration never observes a half-delivered publish.
pub(crate) type Listeners = Arc<Mutex<ListenerSet>>;

#[derive(Clone)]
pub(crate) struct Listener {
	pub token: u64,
	pub name: String,
	pub sender: mpsc::Sender<Message>,
}

#[derive(Default)]
pub(crate) struct ListenerSet {
	next_token: u64,
	entries: Vec<Listener>,
}

impl ListenerSet {
	/// Registers a listener. Re-using a name replaces that listener in
	/// place, keeping its position in delivery order.
	pub fn insert(&mut self, name: String, sender: mpsc::Sender<Message>) -> u64 {
		let token = self.next_token;
		self.next_token += 1;

		if let Some(entry) = self.entries.iter_mut().find(|entry| entry.name == name) {
			entry.token = token;
			entry.sender = sender;
		} else {
			self.entries.push(Listener {
				token,
				name,
				sender,
			});
		}
		token
	}

	pub fn remove(&mut self, token: u64) {
		self.entries.retain(|entry| entry.token != token);
	}

	pub fn retain(&mut self, f: impl FnMut(&Listener) -> bool) {
		self.entries.retain(f);
	}

	pub fn snapshot(&self) -> Vec<Listener> {
		self.entries.clone()
	}

	pub fn clear(&mut self) {
		self.entries.clear();
	}
}

/// Yields the inbound publishes delivered to one named listener.
///
/// Dropping the stream deregisters the listener. The stream ends when the
/// connection closes.
pub struct MessageStream {
	name: String,
	token: u64,
	rx: mpsc::Receiver<Message>,
	listeners: Listeners,
}

impl MessageStream {
	/// Receives the next inbound publish.
	///
	/// Returns `None` once the connection has closed and everything already
	/// delivered has been taken.
	#[inline]
	pub async fn recv(&mut self) -> Option<Message> {
		self.rx.recv().await
	}

	/// The name this listener was registered under.
	#[inline]
	pub fn name(&self) -> &str {
		&self.name
	}
}

impl Drop for MessageStream {
	fn drop(&mut self) {
		self.listeners.lock().unwrap().remove(self.token);
	}
}

/// An MQTT 3.1.1 client.
///
/// Cloning the client is cheap; clones share the same connection.
///
/// # Example
///
/// ```no_run
/// # tokio_test::block_on(async {
/// use strand_mqtt::{Client, QoS};
///
/// let client = Client::new(("localhost", 1883)).unwrap();
/// client.connect().await.unwrap();
///
/// client
/// 	.publish("greetings", "Hello, world!", QoS::AtLeastOnce, false)
/// 	.await
/// 	.unwrap();
///
/// client.disconnect().await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct Client {
	shared: Arc<ClientShared>,
}

impl Client {
	/// Creates a client for the broker described by `options`.
	///
	/// Returns an error for option combinations the client cannot honour,
	/// such as an explicit port of 0.
	pub fn new(options: impl Into<Options>) -> Result<Self, InvalidOptions> {
		let options = options.into();
		options.validate()?;

		Ok(Self {
			shared: Arc::new(ClientShared {
				options,
				core: Mutex::new(Core {
					state: ConnectionState::Disconnected,
					requests: None,
				}),
				ids: IdAllocator::default(),
				listeners: Listeners::default(),
			}),
		})
	}

	/// Opens the transport and performs the Connect handshake.
	///
	/// Returns the Server's session-present flag. Fails with
	/// [`ClientError::AlreadyConnected`] if a connection is already up and
	/// with [`ClientError::FailedToConnect`] if the broker answers with a
	/// non-zero return code (in which case the transport is closed again).
	pub async fn connect(&self) -> Result<bool, ClientError> {
		self.begin_connect()?;
		let result = async {
			let transport = Transport::open(&self.shared.options).await?;
			self.establish(transport).await
		}
		.await;
		self.finish_connect(result).await
	}

	#[cfg(test)]
	pub(crate) async fn connect_over(&self, transport: Transport) -> Result<bool, ClientError> {
		self.begin_connect()?;
		let result = self.establish(transport).await;
		self.finish_connect(result).await
	}

	fn begin_connect(&self) -> Result<(), ClientError> {
		let mut core = self.shared.core.lock().unwrap();
		let live = core.requests.as_ref().is_some_and(|tx| !tx.is_closed());
		if live
			|| matches!(
				core.state,
				ConnectionState::Connecting | ConnectionState::Closing
			) {
			return Err(ClientError::AlreadyConnected);
		}

		core.state = ConnectionState::Connecting;
		core.requests = None;
		Ok(())
	}

	async fn establish(&self, transport: Transport) -> Result<bool, ClientError> {
		let options = &self.shared.options;
		let stream = MqttStream::new(transport, options.max_packet_size);

		let (requests, rx) = mpsc::unbounded_channel();
		let connection = Connection::new(
			stream,
			rx,
			Arc::clone(&self.shared.listeners),
			options.keep_alive,
		);
		tokio::spawn(connection.run());
		self.shared.core.lock().unwrap().requests = Some(requests.clone());

		let connect = packets::Connect {
			client_id: options.client_id.clone(),
			keep_alive: options.keep_alive,
			clean_session: options.clean_session,
			will: options.will.clone(),
			credentials: options.credentials.clone(),
		};

		let mut operation = Operation::new(requests, options.timeout, None);
		let response = operation
			.exchange(connect.into(), Some(command::connack()))
			.await?;
		let Some(Packet::ConnAck(ack)) = response else {
			return Err(ClientError::UnexpectedPacket);
		};

		match ack.code {
			ConnectReturnCode::Accepted => Ok(ack.session_present),
			code => Err(ClientError::FailedToConnect(code)),
		}
	}

	async fn finish_connect(&self, result: Result<bool, ClientError>) -> Result<bool, ClientError> {
		match result {
			Ok(session_present) => {
				self.shared.core.lock().unwrap().state = ConnectionState::Connected;
				tracing::info!(session_present, "connected");
				Ok(session_present)
			}
			Err(error) => {
				tracing::warn!(error = %error, "connect failed");
				// Abandon the half-open connection; no Disconnect packet is
				// owed before a successful handshake.
				let requests = {
					let mut core = self.shared.core.lock().unwrap();
					core.state = ConnectionState::Disconnected;
					core.requests.take()
				};
				if let Some(requests) = requests {
					let (response, done) = oneshot::channel();
					if requests
						.send(Request::Shutdown {
							send_disconnect: false,
							response,
						})
						.is_ok()
					{
						let _ = done.await;
					}
				}
				Err(error)
			}
		}
	}

	/// Sends a [`Publish`] packet with the provided topic and payload to
	/// the Server.
	///
	/// With a QoS of [`AtMostOnce`], the call returns as soon as the packet
	/// has been written to the transport stream; with [`AtLeastOnce`] it
	/// returns when the corresponding PubAck has been received from the
	/// Server; and with [`ExactlyOnce`] it returns when the release
	/// handshake has finished with the corresponding PubComp.
	///
	/// [`AtMostOnce`]: QoS#variant.AtMostOnce
	/// [`AtLeastOnce`]: QoS#variant.AtLeastOnce
	/// [`ExactlyOnce`]: QoS#variant.ExactlyOnce
	/// [`Publish`]: crate::packets::Publish
	#[inline]
	pub async fn publish<TryIntoTopic, E>(
		&self,
		topic: TryIntoTopic,
		payload: impl Into<Bytes>,
		qos: QoS,
		retain: bool,
	) -> Result<(), ClientError>
	where
		TryIntoTopic: TryInto<TopicBuf, Error = E>,
		ClientError: From<E>,
	{
		self.publish_impl(topic.try_into()?, payload.into(), qos, retain)
			.await
	}

	async fn publish_impl(
		&self,
		topic: TopicBuf,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), ClientError> {
		match qos {
			QoS::AtMostOnce => {
				self.exchange(
					Publish::AtMostOnce {
						retain,
						topic,
						payload,
					}
					.into(),
					None,
				)
				.await?;
				Ok(())
			}
			QoS::AtLeastOnce => {
				let (mut operation, id) = self.tracked_operation()?;
				operation
					.exchange(
						Publish::AtLeastOnce {
							id,
							retain,
							duplicate: false,
							topic,
							payload,
						}
						.into(),
						Some(command::puback(id)),
					)
					.await?;
				Ok(())
			}
			QoS::ExactlyOnce => {
				let (mut operation, id) = self.tracked_operation()?;
				operation
					.exchange(
						Publish::ExactlyOnce {
							id,
							retain,
							duplicate: false,
							topic,
							payload,
						}
						.into(),
						Some(command::pubrec(id)),
					)
					.await?;

				// The identifier stays held until the release round trip
				// finishes.
				operation
					.exchange(packets::PubRel { id }.into(), Some(command::pubcomp(id)))
					.await?;
				Ok(())
			}
		}
	}

	/// Sends a [`Subscribe`] packet with the requested filters to the
	/// Server and waits for the corresponding SubAck.
	///
	/// Returns the per-filter result: the QoS the Server granted, or the
	/// failure marker for filters it refused. The call only fails with
	/// [`ClientError::SubscribeFailed`] when *every* filter was refused.
	///
	/// Messages arriving for these subscriptions are read through
	/// [`Client::messages`].
	///
	/// [`Subscribe`]: crate::packets::Subscribe
	#[inline]
	pub async fn subscribe<TryIntoFiltersWithQoS, E>(
		&self,
		filters: TryIntoFiltersWithQoS,
	) -> Result<Vec<Result<QoS, SubscribeFailed>>, ClientError>
	where
		TryIntoFiltersWithQoS: TryInto<FiltersWithQoS, Error = E>,
		ClientError: From<E>,
	{
		self.subscribe_impl(filters.try_into()?).await
	}

	async fn subscribe_impl(
		&self,
		filters: FiltersWithQoS,
	) -> Result<Vec<Result<QoS, SubscribeFailed>>, ClientError> {
		let FiltersWithQoS(filters) = filters;
		if filters.is_empty() {
			return Err(InvalidFilter::Empty.into());
		}

		let (mut operation, id) = self.tracked_operation()?;
		let requested = filters.len();

		let response = operation
			.exchange(
				packets::Subscribe { id, filters }.into(),
				Some(command::suback(id)),
			)
			.await?;
		let Some(Packet::SubAck(ack)) = response else {
			return Err(ClientError::UnexpectedPacket);
		};

		if ack.result.len() != requested {
			return Err(ClientError::UnexpectedPacket);
		}

		let failed: Vec<usize> = ack
			.result
			.iter()
			.enumerate()
			.filter_map(|(index, result)| result.is_err().then_some(index))
			.collect();
		if !failed.is_empty() && failed.len() == ack.result.len() {
			return Err(ClientError::SubscribeFailed { indices: failed });
		}

		Ok(ack.result)
	}

	/// Sends an [`Unsubscribe`] packet with `filters` to the Server and
	/// waits for the corresponding UnsubAck.
	///
	/// [`Unsubscribe`]: crate::packets::Unsubscribe
	#[inline]
	pub async fn unsubscribe<TryIntoFilters, E>(
		&self,
		filters: TryIntoFilters,
	) -> Result<(), ClientError>
	where
		TryIntoFilters: TryInto<Filters, Error = E>,
		ClientError: From<E>,
	{
		self.unsubscribe_impl(filters.try_into()?).await
	}

	async fn unsubscribe_impl(&self, filters: Filters) -> Result<(), ClientError> {
		let Filters(filters) = filters;
		if filters.is_empty() {
			return Err(InvalidFilter::Empty.into());
		}

		let (mut operation, id) = self.tracked_operation()?;
		operation
			.exchange(
				packets::Unsubscribe { id, filters }.into(),
				Some(command::unsuback(id)),
			)
			.await?;
		Ok(())
	}

	/// Sends a PingReq and waits for the Server's PingResp.
	///
	/// The connection pings on its own whenever the keep-alive interval
	/// runs down; this is for callers that want to probe the broker
	/// explicitly.
	pub async fn ping(&self) -> Result<(), ClientError> {
		self.exchange(Packet::PingReq, Some(command::pingresp())).await?;
		Ok(())
	}

	/// Opens a stream of the inbound publishes delivered to this client.
	///
	/// Every stream receives every inbound publish. Registering a `name`
	/// already in use replaces that listener. The stream buffers up to
	/// `capacity` messages; while it is full the connection waits, so slow
	/// consumers hold up delivery rather than lose messages.
	pub fn messages(&self, name: impl Into<String>, capacity: usize) -> MessageStream {
		let name = name.into();
		let (sender, rx) = mpsc::channel(capacity.max(1));
		let token = self
			.shared
			.listeners
			.lock()
			.unwrap()
			.insert(name.clone(), sender);

		MessageStream {
			name,
			token,
			rx,
			listeners: Arc::clone(&self.shared.listeners),
		}
	}

	/// Sends a [`Disconnect`] packet and closes the transport.
	///
	/// Outstanding requests fail with [`ClientError::ConnectionClosed`].
	/// Disconnecting a client that is not connected does nothing.
	///
	/// [`Disconnect`]: crate::PacketType#variant.Disconnect
	pub async fn disconnect(&self) -> Result<(), ClientError> {
		let requests = {
			let mut core = self.shared.core.lock().unwrap();
			match core.requests.take() {
				Some(requests) if !requests.is_closed() => {
					core.state = ConnectionState::Closing;
					requests
				}
				_ => {
					core.state = ConnectionState::Disconnected;
					return Ok(());
				}
			}
		};

		let (response, done) = oneshot::channel();
		if requests
			.send(Request::Shutdown {
				send_disconnect: true,
				response,
			})
			.is_ok()
		{
			// The connection acknowledges once the transport is closed.
			let _ = done.await;
		}

		self.shared.core.lock().unwrap().state = ConnectionState::Disconnected;
		Ok(())
	}

	fn requests(&self) -> Result<RequestTx, ClientError> {
		let mut core = self.shared.core.lock().unwrap();
		match &core.requests {
			Some(requests)
				if core.state == ConnectionState::Connected && !requests.is_closed() =>
			{
				Ok(requests.clone())
			}
			_ => {
				// A connection that died on its own is only noticed here.
				if core.requests.as_ref().is_some_and(|tx| tx.is_closed()) {
					core.requests = None;
					core.state = ConnectionState::Disconnected;
				}
				Err(ClientError::NoConnection)
			}
		}
	}

	/// An operation without a packet identifier (ping, QoS 0 publish).
	fn operation(&self) -> Result<Operation, ClientError> {
		Ok(Operation::new(
			self.requests()?,
			self.shared.options.timeout,
			None,
		))
	}

	/// An operation holding a fresh packet identifier. The identifier is
	/// released when the operation ends, however it ends.
	fn tracked_operation(&self) -> Result<(Operation, PacketId), ClientError> {
		let requests = self.requests()?;
		let guard = self.shared.ids.allocate()?;
		let id = guard.id();
		Ok((
			Operation::new(requests, self.shared.options.timeout, Some(guard)),
			id,
		))
	}

	async fn exchange(
		&self,
		packet: Packet,
		matcher: Option<Matcher>,
	) -> Result<Option<Packet>, ClientError> {
		self.operation()?.exchange(packet, matcher).await
	}
}

#[cfg(test)]
mod tests {
	use super::{
		testing::{self, connected},
		Client, ClientError, CloseCause, Options, Transport,
	};
	use crate::{
		packets::{
			ConnAck, ConnectReturnCode, PubAck, PubComp, PubRec, PubRel, Publish, SubAck,
			SubscribeFailed, UnsubAck,
		},
		Packet, PacketId, QoS,
	};
	use bytes::Bytes;
	use std::{collections::HashSet, time::Duration};
	use tokio::io::{AsyncReadExt, AsyncWriteExt};

	fn id(n: u16) -> PacketId {
		PacketId::new(n).unwrap()
	}

	#[tokio::test]
	async fn connect_and_disconnect_write_observed_bytes() {
		let (near, mut far) = tokio::io::duplex(4096);
		let client = Client::new(Options {
			client_id: "c1".into(),
			keep_alive: 60,
			..Default::default()
		})
		.unwrap();

		let broker = async {
			let mut bytes = [0u8; 16];
			far.read_exact(&mut bytes).await.unwrap();
			assert_eq!(
				bytes,
				[
					0x10, 0x0e, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x04, 0x02, 0x00, 0x3c,
					0x00, 0x02, 0x63, 0x31
				]
			);
			far.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
			far
		};

		let (session_present, mut far) = tokio::join!(
			client.connect_over(Transport::Stream(Box::new(near))),
			broker
		);
		assert!(!session_present.unwrap());

		client.disconnect().await.unwrap();
		let mut end = Vec::new();
		far.read_to_end(&mut end).await.unwrap();
		assert_eq!(end, [0xe0, 0x00]);

		// A second disconnect does nothing.
		client.disconnect().await.unwrap();
	}

	#[tokio::test]
	async fn connect_surfaces_the_return_code() {
		let client = Client::new(Options::default()).unwrap();
		let (transport, mut broker) = testing::pair();

		let refuse = async {
			let Some(Packet::Connect(_)) = broker.read_packet().await.unwrap() else {
				panic!("expected Connect");
			};
			broker
				.write_packet(
					&ConnAck {
						session_present: false,
						code: ConnectReturnCode::NotAuthorized,
					}
					.into(),
				)
				.await
				.unwrap();
		};

		let (result, ()) = tokio::join!(client.connect_over(transport), refuse);
		assert!(matches!(
			result,
			Err(ClientError::FailedToConnect(
				ConnectReturnCode::NotAuthorized
			))
		));

		// The failed connect left the client disconnected.
		assert!(matches!(
			client.ping().await,
			Err(ClientError::NoConnection)
		));
	}

	#[tokio::test(start_paused = true)]
	async fn connect_times_out_without_a_connack() {
		let client = Client::new(Options {
			timeout: Some(Duration::from_secs(2)),
			..Default::default()
		})
		.unwrap();
		let (transport, mut broker) = testing::pair();

		let silent = tokio::spawn(async move {
			let Some(Packet::Connect(_)) = broker.read_packet().await.unwrap() else {
				panic!("expected Connect");
			};
			std::future::pending::<()>().await;
		});

		assert!(matches!(
			client.connect_over(transport).await,
			Err(ClientError::Timeout)
		));
		silent.abort();
	}

	#[tokio::test]
	async fn connect_fails_on_anything_but_a_connack() {
		let client = Client::new(Options::default()).unwrap();
		let (transport, mut broker) = testing::pair();

		let confuse = async {
			let Some(Packet::Connect(_)) = broker.read_packet().await.unwrap() else {
				panic!("expected Connect");
			};
			broker.write_packet(&Packet::PingResp).await.unwrap();
		};

		let (result, ()) = tokio::join!(client.connect_over(transport), confuse);
		assert!(matches!(result, Err(ClientError::UnexpectedPacket)));
	}

	#[tokio::test]
	async fn connecting_twice_fails() {
		let (client, mut broker) = connected(Options::default()).await;
		assert!(matches!(
			client.connect().await,
			Err(ClientError::AlreadyConnected)
		));

		// The existing connection is unharmed.
		let ping = async {
			assert!(matches!(
				broker.read_packet().await.unwrap(),
				Some(Packet::PingReq)
			));
			broker.write_packet(&Packet::PingResp).await.unwrap();
		};
		let (result, ()) = tokio::join!(client.ping(), ping);
		result.unwrap();
	}

	#[tokio::test]
	async fn qos0_publish_completes_without_the_broker() {
		let (client, mut broker) = connected(Options::default()).await;

		client
			.publish("a/b", "hi", QoS::AtMostOnce, false)
			.await
			.unwrap();

		let Some(Packet::Publish(publish)) = broker.read_packet().await.unwrap() else {
			panic!("expected Publish");
		};
		assert_eq!(publish.qos(), QoS::AtMostOnce);
		assert_eq!(publish.id(), None);
		assert_eq!(publish.topic().as_str(), "a/b");
		assert_eq!(publish.payload().as_ref(), b"hi");
	}

	#[tokio::test]
	async fn qos1_publish_completes_on_puback() {
		let (client, mut broker) = connected(Options::default()).await;

		let ack = async {
			let Some(Packet::Publish(Publish::AtLeastOnce { id, .. })) =
				broker.read_packet().await.unwrap()
			else {
				panic!("expected a QoS 1 Publish");
			};
			assert_eq!(id.get(), 1);
			broker.write_packet(&PubAck { id }.into()).await.unwrap();
		};

		let (result, ()) = tokio::join!(client.publish("a", "", QoS::AtLeastOnce, false), ack);
		result.unwrap();
	}

	#[tokio::test]
	async fn qos2_publish_walks_the_release_handshake() {
		let (client, mut broker) = connected(Options::default()).await;

		let handshake = async {
			let Some(Packet::Publish(Publish::ExactlyOnce { id, .. })) =
				broker.read_packet().await.unwrap()
			else {
				panic!("expected a QoS 2 Publish");
			};
			broker.write_packet(&PubRec { id }.into()).await.unwrap();

			let Some(Packet::PubRel(PubRel { id: released })) =
				broker.read_packet().await.unwrap()
			else {
				panic!("expected PubRel");
			};
			assert_eq!(released, id);
			broker
				.write_packet(&PubComp { id }.into())
				.await
				.unwrap();
		};

		let (result, ()) = tokio::join!(client.publish("x", "y", QoS::ExactlyOnce, false), handshake);
		result.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn request_timeout_leaves_the_connection_usable() {
		let (client, mut broker) = connected(Options {
			timeout: Some(Duration::from_secs(2)),
			..Default::default()
		})
		.await;

		let broker = tokio::spawn(async move {
			// Swallow the publish and never acknowledge it.
			let Some(Packet::Publish(_)) = broker.read_packet().await.unwrap() else {
				panic!("expected Publish");
			};
			let second = broker.read_packet().await.unwrap();
			assert!(matches!(second, Some(Packet::Publish(_))));
		});

		assert!(matches!(
			client.publish("a", "x", QoS::AtLeastOnce, false).await,
			Err(ClientError::Timeout)
		));

		// The connection survived the timed-out request.
		client
			.publish("a", "y", QoS::AtMostOnce, false)
			.await
			.unwrap();
		broker.await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn missed_pingresp_fails_every_pending_request() {
		let (client, mut broker) = connected(Options {
			keep_alive: 5,
			..Default::default()
		})
		.await;

		let broker = tokio::spawn(async move {
			let Some(Packet::Publish(_)) = broker.read_packet().await.unwrap() else {
				panic!("expected Publish");
			};
			// The ping fires one interval after the publish write.
			assert!(matches!(
				broker.read_packet().await.unwrap(),
				Some(Packet::PingReq)
			));
			// Stay silent; the client must give up on its own.
			broker
		});

		assert!(matches!(
			client.publish("a", "x", QoS::AtLeastOnce, false).await,
			Err(ClientError::KeepAliveTimeout)
		));
		assert!(matches!(
			client.ping().await,
			Err(ClientError::NoConnection)
		));
		broker.await.unwrap();
	}

	#[tokio::test]
	async fn inbound_qos1_publish_is_delivered_then_acked() {
		let (client, mut broker) = connected(Options::default()).await;
		let mut messages = client.messages("sink", 8);

		broker
			.write_packet(
				&Publish::AtLeastOnce {
					id: id(5),
					retain: false,
					duplicate: false,
					topic: "news".try_into().unwrap(),
					payload: Bytes::from_static(b"flash"),
				}
				.into(),
			)
			.await
			.unwrap();

		let message = messages.recv().await.unwrap();
		assert_eq!(message.topic.as_str(), "news");
		assert_eq!(message.payload.as_ref(), b"flash");
		assert_eq!(message.qos, QoS::AtLeastOnce);

		assert!(matches!(
			broker.read_packet().await.unwrap(),
			Some(Packet::PubAck(PubAck { id })) if id.get() == 5
		));
	}

	#[tokio::test]
	async fn duplicate_inbound_qos2_publish_is_not_redelivered() {
		let (client, mut broker) = connected(Options::default()).await;
		let mut messages = client.messages("sink", 8);

		let inbound = Publish::ExactlyOnce {
			id: id(9),
			retain: false,
			duplicate: false,
			topic: "once".try_into().unwrap(),
			payload: Bytes::from_static(b"only"),
		};

		broker.write_packet(&inbound.clone().into()).await.unwrap();
		assert!(matches!(
			broker.read_packet().await.unwrap(),
			Some(Packet::PubRec(PubRec { id })) if id.get() == 9
		));
		assert_eq!(messages.recv().await.unwrap().payload.as_ref(), b"only");

		// The PubRec was lost on its way to the broker, which republishes.
		let duplicate = Publish::ExactlyOnce {
			id: id(9),
			retain: false,
			duplicate: true,
			topic: "once".try_into().unwrap(),
			payload: Bytes::from_static(b"only"),
		};
		broker.write_packet(&duplicate.into()).await.unwrap();
		assert!(matches!(
			broker.read_packet().await.unwrap(),
			Some(Packet::PubRec(PubRec { id })) if id.get() == 9
		));
		// Acked again, but not delivered again.
		assert!(messages.rx.try_recv().is_err());

		broker.write_packet(&PubRel { id: id(9) }.into()).await.unwrap();
		assert!(matches!(
			broker.read_packet().await.unwrap(),
			Some(Packet::PubComp(PubComp { id })) if id.get() == 9
		));
	}

	#[tokio::test]
	async fn inbound_publishes_are_acked_without_listeners() {
		let (client, mut broker) = connected(Options::default()).await;
		drop(client.messages("sink", 8));

		broker
			.write_packet(
				&Publish::AtLeastOnce {
					id: id(3),
					retain: false,
					duplicate: false,
					topic: "void".try_into().unwrap(),
					payload: Bytes::new(),
				}
				.into(),
			)
			.await
			.unwrap();

		assert!(matches!(
			broker.read_packet().await.unwrap(),
			Some(Packet::PubAck(PubAck { id })) if id.get() == 3
		));
	}

	#[tokio::test]
	async fn subscribe_returns_the_granted_qos() {
		let (client, mut broker) = connected(Options::default()).await;

		let grant = async {
			let Some(Packet::Subscribe(subscribe)) = broker.read_packet().await.unwrap() else {
				panic!("expected Subscribe");
			};
			assert_eq!(subscribe.filters.len(), 2);
			broker
				.write_packet(
					&SubAck {
						id: subscribe.id,
						result: vec![Ok(QoS::AtLeastOnce), Err(SubscribeFailed)],
					}
					.into(),
				)
				.await
				.unwrap();
		};

		let (result, ()) = tokio::join!(
			client.subscribe(vec![("a/+", QoS::AtLeastOnce), ("$bad", QoS::AtMostOnce)]),
			grant
		);
		assert_eq!(
			result.unwrap(),
			vec![Ok(QoS::AtLeastOnce), Err(SubscribeFailed)]
		);
	}

	#[tokio::test]
	async fn subscribe_fails_when_every_filter_is_refused() {
		let (client, mut broker) = connected(Options::default()).await;

		let refuse = async {
			let Some(Packet::Subscribe(subscribe)) = broker.read_packet().await.unwrap() else {
				panic!("expected Subscribe");
			};
			broker
				.write_packet(
					&SubAck {
						id: subscribe.id,
						result: vec![Err(SubscribeFailed), Err(SubscribeFailed)],
					}
					.into(),
				)
				.await
				.unwrap();
		};

		let (result, ()) = tokio::join!(client.subscribe(["a", "b"]), refuse);
		assert!(matches!(
			result,
			Err(ClientError::SubscribeFailed { indices }) if indices == [0, 1]
		));
	}

	#[tokio::test]
	async fn unsubscribe_completes_on_unsuback() {
		let (client, mut broker) = connected(Options::default()).await;

		let ack = async {
			let Some(Packet::Unsubscribe(unsubscribe)) = broker.read_packet().await.unwrap()
			else {
				panic!("expected Unsubscribe");
			};
			broker
				.write_packet(&UnsubAck { id: unsubscribe.id }.into())
				.await
				.unwrap();
		};

		let (result, ()) = tokio::join!(client.unsubscribe("a/#"), ack);
		result.unwrap();
	}

	#[tokio::test]
	async fn concurrent_publishes_never_share_an_id() {
		let (client, mut broker) = connected(Options::default()).await;

		let acks = async {
			let mut seen = HashSet::new();
			for _ in 0..5 {
				let Some(Packet::Publish(Publish::AtLeastOnce { id, .. })) =
					broker.read_packet().await.unwrap()
				else {
					panic!("expected a QoS 1 Publish");
				};
				assert!(seen.insert(id), "duplicate in-flight id {id}");
				broker.write_packet(&PubAck { id }.into()).await.unwrap();
			}
		};

		let publish = |topic: &'static str| client.publish(topic, "x", QoS::AtLeastOnce, false);
		let (a, b, c, d, e, ()) = tokio::join!(
			publish("t/1"),
			publish("t/2"),
			publish("t/3"),
			publish("t/4"),
			publish("t/5"),
			acks
		);
		for result in [a, b, c, d, e] {
			result.unwrap();
		}
	}

	#[tokio::test(start_paused = true)]
	async fn abandoned_requests_evict_their_tasks() {
		let (client, mut broker) = connected(Options::default()).await;

		// Drop a QoS 1 publish while it waits for its acknowledgement.
		{
			let abandoned = client.publish("a", "x", QoS::AtLeastOnce, false);
			assert!(tokio::time::timeout(Duration::from_millis(10), abandoned)
				.await
				.is_err());
		}
		let Some(Packet::Publish(Publish::AtLeastOnce { id: first, .. })) =
			broker.read_packet().await.unwrap()
		else {
			panic!("expected a QoS 1 Publish");
		};
		assert_eq!(first.get(), 1);

		// A ping round trip forces the withdrawal through the connection.
		let pong = async {
			assert!(matches!(
				broker.read_packet().await.unwrap(),
				Some(Packet::PingReq)
			));
			broker.write_packet(&Packet::PingResp).await.unwrap();
		};
		let (result, ()) = tokio::join!(client.ping(), pong);
		result.unwrap();

		// The abandoned publish's late acknowledgement finds no task and is
		// discarded; the next publish completes against its own.
		let ack = async {
			let Some(Packet::Publish(Publish::AtLeastOnce { id, .. })) =
				broker.read_packet().await.unwrap()
			else {
				panic!("expected a QoS 1 Publish");
			};
			assert_eq!(id.get(), 2);
			broker.write_packet(&PubAck { id: first }.into()).await.unwrap();
			broker.write_packet(&PubAck { id }.into()).await.unwrap();
		};
		let (result, ()) = tokio::join!(client.publish("b", "y", QoS::AtLeastOnce, false), ack);
		result.unwrap();
	}

	#[tokio::test]
	async fn unsolicited_connack_is_a_protocol_error() {
		let (client, mut broker) = connected(Options::default()).await;

		let betray = async {
			let Some(Packet::Publish(_)) = broker.read_packet().await.unwrap() else {
				panic!("expected Publish");
			};
			broker
				.write_packet(
					&ConnAck {
						session_present: false,
						code: ConnectReturnCode::Accepted,
					}
					.into(),
				)
				.await
				.unwrap();
		};

		let (result, ()) = tokio::join!(client.publish("a", "x", QoS::AtLeastOnce, false), betray);
		assert!(matches!(
			result,
			Err(ClientError::ConnectionClosed {
				cause: CloseCause::Protocol
			})
		));
	}

	#[tokio::test]
	async fn malformed_inbound_bytes_close_the_connection() {
		let (near, mut far) = tokio::io::duplex(4096);
		let client = Client::new(Options::default()).unwrap();

		let broker = async {
			// Read past the Connect packet, then accept.
			let mut prefix = [0u8; 2];
			far.read_exact(&mut prefix).await.unwrap();
			let mut rest = vec![0u8; prefix[1] as usize];
			far.read_exact(&mut rest).await.unwrap();
			far.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
			far
		};

		let (result, mut far) = tokio::join!(
			client.connect_over(Transport::Stream(Box::new(near))),
			broker
		);
		result.unwrap();

		// A reserved packet type is fatal.
		let poison = async {
			far.write_all(&[0x00, 0x00]).await.unwrap();
		};
		let (result, ()) = tokio::join!(client.publish("a", "x", QoS::AtLeastOnce, false), poison);
		assert!(matches!(
			result,
			Err(ClientError::ConnectionClosed {
				cause: CloseCause::Decode
			})
		));
	}

	#[tokio::test]
	async fn operations_require_a_connection() {
		let client = Client::new(Options::default()).unwrap();
		assert!(matches!(
			client.publish("a", "x", QoS::AtMostOnce, false).await,
			Err(ClientError::NoConnection)
		));
		assert!(matches!(
			client.ping().await,
			Err(ClientError::NoConnection)
		));
		client.disconnect().await.unwrap();
	}

	#[tokio::test]
	async fn message_streams_end_when_the_connection_closes() {
		let (client, broker) = connected(Options::default()).await;
		let mut messages = client.messages("sink", 8);

		drop(broker);
		// The broker hanging up fails pending requests and ends streams.
		assert!(messages.recv().await.is_none());
		assert!(matches!(
			client.ping().await,
			Err(ClientError::NoConnection)
		));
	}

	#[tokio::test]
	async fn accept_connect_sees_the_session_fields() {
		let (_client, broker) = connected(Options {
			client_id: "inspector".into(),
			keep_alive: 30,
			clean_session: true,
			..Default::default()
		})
		.await;
		let connect = broker.into_connect();
		assert_eq!(connect.client_id, "inspector");
		assert_eq!(connect.keep_alive, 30);
		assert!(connect.clean_session);
	}
}
