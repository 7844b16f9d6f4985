use super::{
	command::{self, Request, RequestRx},
	registry::{Offered, TaskRegistry},
	stream::MqttStream,
	ClientError, CloseCause, Listeners, Message,
};
use crate::{
	packets::{PubAck, PubComp, PubRec, PubRel, Publish},
	Packet, PacketId, PacketType,
};
use std::collections::HashSet;
use tokio::{
	sync::oneshot,
	time::{sleep_until, Duration, Instant},
};

/// Scheduling slack subtracted from the keep-alive interval, and the floor
/// the interval never drops below.
const KEEP_ALIVE_MARGIN_SECS: u16 = 5;

/// Sleeps until `deadline`, or forever when there is none.
async fn sleep_until_opt(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

/// Why the connection loop stopped.
#[derive(Clone, Copy, Debug)]
enum Close {
	/// The client asked for the connection to end.
	Shutdown,
	/// The broker never answered a keep-alive ping.
	KeepAlive,
	/// Reading or writing the transport failed, or the broker hung up.
	Transport,
	/// The broker sent something the protocol does not allow here.
	Protocol,
	/// Inbound bytes did not decode to a packet.
	Decode,
}

enum Event {
	Request(Option<Request>),
	Inbound(Result<Option<Packet>, ClientError>),
	KeepAlive,
	Deadline,
}

/// The per-connection task: owns the stream, the task registry and the
/// keep-alive clock, and serialises everything the client submits.
pub(crate) struct Connection {
	stream: MqttStream,
	requests: RequestRx,
	registry: TaskRegistry,
	listeners: Listeners,
	ping_interval: Option<Duration>,
	last_write: Instant,
	/// Whether the Connect handshake has been answered. Publishes arriving
	/// before that are a protocol violation.
	handshaken: bool,
	/// Identifiers of inbound QoS 2 publishes between PubRec and PubRel.
	incoming: HashSet<PacketId>,
}

impl Connection {
	pub fn new(
		stream: MqttStream,
		requests: RequestRx,
		listeners: Listeners,
		keep_alive: u16,
	) -> Self {
		let ping_interval = (keep_alive > 0).then(|| {
			Duration::from_secs(
				keep_alive
					.saturating_sub(KEEP_ALIVE_MARGIN_SECS)
					.max(KEEP_ALIVE_MARGIN_SECS)
					.into(),
			)
		});

		Self {
			stream,
			requests,
			registry: TaskRegistry::default(),
			listeners,
			ping_interval,
			last_write: Instant::now(),
			handshaken: false,
			incoming: HashSet::new(),
		}
	}

	pub async fn run(mut self) {
		let close = self.serve().await;
		tracing::debug!(close = ?close, "closing connection");

		// Close the transport before the request channel is torn down, so
		// no request can observe a half-closed connection.
		self.stream.shutdown().await;

		let error = || match close {
			Close::KeepAlive => ClientError::KeepAliveTimeout,
			Close::Shutdown => ClientError::ConnectionClosed {
				cause: CloseCause::Shutdown,
			},
			Close::Transport => ClientError::ConnectionClosed {
				cause: CloseCause::Transport,
			},
			Close::Protocol => ClientError::ConnectionClosed {
				cause: CloseCause::Protocol,
			},
			Close::Decode => ClientError::ConnectionClosed {
				cause: CloseCause::Decode,
			},
		};

		self.registry.cancel_all(&error);

		// Fail whatever was still queued behind the close.
		self.requests.close();
		while let Ok(request) = self.requests.try_recv() {
			match request {
				Request::Exchange { response, .. } => {
					let _ = response.send(Err(error()));
				}
				// Dropping the request frees its packet identifier.
				Request::Cancel { .. } => {}
				Request::Shutdown { response, .. } => {
					let _ = response.send(());
				}
			}
		}

		// Dropping the senders ends every message stream.
		self.listeners.lock().unwrap().clear();
	}

	async fn serve(&mut self) -> Close {
		loop {
			let deadline = self.registry.next_deadline();
			let keep_alive = self.ping_interval.map(|interval| self.last_write + interval);

			let event = tokio::select! {
				request = self.requests.recv() => Event::Request(request),
				result = self.stream.read_packet() => Event::Inbound(result),
				_ = sleep_until_opt(keep_alive) => Event::KeepAlive,
				_ = sleep_until_opt(deadline) => Event::Deadline,
			};

			match event {
				Event::Request(None) => {
					// Every client handle is gone.
					return Close::Shutdown;
				}
				Event::Request(Some(Request::Shutdown {
					send_disconnect,
					response,
				})) => {
					if send_disconnect {
						let _ = self.write(&Packet::Disconnect).await;
					}
					let _ = response.send(());
					return Close::Shutdown;
				}
				Event::Request(Some(Request::Exchange {
					token,
					packet,
					matcher,
					timeout,
					response,
				})) => match matcher {
					Some(matcher) => {
						let deadline = timeout.map(|timeout| Instant::now() + timeout);
						self.registry.register(token, matcher, deadline, false, response);
						if self.write(&packet).await.is_err() {
							return Close::Transport;
						}
					}
					None => {
						let result = self.write(&packet).await;
						let failed = result.is_err();
						let _ = response.send(result.map(|()| None));
						if failed {
							return Close::Transport;
						}
					}
				},
				Event::Request(Some(Request::Cancel { token, id })) => {
					// The task must be gone before the identifier returns to
					// the allocator, or a new request could collide with it.
					self.registry.remove(token);
					drop(id);
				}
				Event::Inbound(Ok(Some(packet))) => {
					tracing::trace!(packet = ?packet, "read from stream");
					if let Some(close) = self.process(packet).await {
						return close;
					}
				}
				Event::Inbound(Ok(None)) => {
					tracing::warn!("connection closed by broker");
					return Close::Transport;
				}
				Event::Inbound(Err(error)) => {
					tracing::error!(error = %error, "failed to read from stream");
					return match error {
						ClientError::MalformedPacket(_) => Close::Decode,
						_ => Close::Transport,
					};
				}
				Event::KeepAlive => {
					if self.ping().await.is_err() {
						return Close::Transport;
					}
				}
				Event::Deadline => {
					if self.registry.expire(Instant::now()) {
						tracing::error!("no answer to a ping within the keep-alive window");
						return Close::KeepAlive;
					}
				}
			}
		}
	}

	/// Routes one inbound packet. Publish and PubRel belong to the inbound
	/// publish flow; everything else is offered to the pending requests.
	async fn process(&mut self, packet: Packet) -> Option<Close> {
		match packet {
			Packet::Publish(publish) => {
				if !self.handshaken {
					tracing::error!("Publish before the Connect handshake finished");
					return Some(Close::Protocol);
				}
				if self.accept_publish(publish).await.is_err() {
					return Some(Close::Transport);
				}
			}
			Packet::PubRel(PubRel { id }) => {
				if !self.handshaken {
					tracing::error!("PubRel before the Connect handshake finished");
					return Some(Close::Protocol);
				}
				if !self.incoming.remove(&id) {
					tracing::warn!(id = id.get(), "PubRel without a pending inbound publish");
				}
				if self.write(&PubComp { id }.into()).await.is_err() {
					return Some(Close::Transport);
				}
			}
			Packet::Connect(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) | Packet::PingReq => {
				tracing::error!(packet = ?packet, "received a packet only a client may send");
				return Some(Close::Protocol);
			}
			packet => {
				let packet_type = packet.packet_type();
				match self.registry.offer(&packet) {
					Offered::Delivered => {
						if packet_type == PacketType::ConnAck {
							self.handshaken = true;
						}
					}
					Offered::Unmatched if packet_type == PacketType::ConnAck => {
						tracing::error!("unsolicited ConnAck");
						return Some(Close::Protocol);
					}
					Offered::Unmatched => {
						tracing::debug!(packet = ?packet, "discarding unmatched packet");
					}
				}
			}
		}

		None
	}

	/// Delivers an inbound publish to the message streams and emits
	/// whatever acknowledgement its QoS calls for.
	async fn accept_publish(&mut self, publish: Publish) -> Result<(), ClientError> {
		match &publish {
			Publish::AtMostOnce { .. } => {
				self.deliver(&publish).await;
				Ok(())
			}
			Publish::AtLeastOnce { id, .. } => {
				let id = *id;
				self.deliver(&publish).await;
				self.write(&PubAck { id }.into()).await
			}
			Publish::ExactlyOnce { id, .. } => {
				let id = *id;
				// A repeat before PubRel means our PubRec was lost;
				// acknowledge again without handing the message out twice.
				if self.incoming.insert(id) {
					self.deliver(&publish).await;
				} else {
					tracing::debug!(id = id.get(), "suppressing duplicate inbound publish");
				}
				self.write(&PubRec { id }.into()).await
			}
		}
	}

	async fn deliver(&self, publish: &Publish) {
		let listeners = self.listeners.lock().unwrap().snapshot();
		if listeners.is_empty() {
			tracing::debug!(topic = %publish.topic(), "no listeners for inbound publish");
			return;
		}

		let message = Message {
			topic: publish.topic().to_topic_buf(),
			payload: publish.payload().clone(),
			qos: publish.qos(),
			retain: publish.retain(),
		};

		let mut stale = Vec::new();
		for listener in &listeners {
			if listener.sender.send(message.clone()).await.is_err() {
				stale.push(listener.token);
			}
		}

		if !stale.is_empty() {
			self.listeners
				.lock()
				.unwrap()
				.retain(|listener| !stale.contains(&listener.token));
		}
	}

	async fn ping(&mut self) -> Result<(), ClientError> {
		let Some(interval) = self.ping_interval else {
			return Ok(());
		};

		// The ping is an ordinary task with a deadline of one interval;
		// its expiry is what tears the connection down.
		let (response, _) = oneshot::channel();
		self.registry.register(
			command::next_token(),
			command::pingresp(),
			Some(Instant::now() + interval),
			true,
			response,
		);
		self.write(&Packet::PingReq).await
	}

	async fn write(&mut self, packet: &Packet) -> Result<(), ClientError> {
		tracing::trace!(packet = ?packet, "writing to stream");
		self.stream.write_packet(packet).await?;
		self.last_write = Instant::now();
		Ok(())
	}
}
