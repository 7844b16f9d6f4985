use super::{id::IdGuard, ClientError, CloseCause};
use crate::{packets, Packet, PacketId};
use std::{
	sync::atomic::{AtomicU64, Ordering},
	time::Duration,
};
use tokio::sync::{mpsc, oneshot};

/// Request responses are sent back to the caller via oneshot::Sender.
pub(crate) type ResponseTx<T> = oneshot::Sender<T>;
pub(crate) type RequestTx = mpsc::UnboundedSender<Request>;
pub(crate) type RequestRx = mpsc::UnboundedReceiver<Request>;

/// Hands out registry task tokens. Tokens are never reused within a
/// process.
pub(crate) fn next_token() -> u64 {
	static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);
	NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// What a matcher decided about an inbound packet.
pub(crate) enum Verdict {
	/// The packet completes the request.
	Matched,
	/// The packet belongs to someone else.
	Ignored,
	/// The packet completes the request with an error.
	Failed(ClientError),
}

/// Decides whether an inbound packet completes a pending request.
pub(crate) struct Matcher(Box<dyn Fn(&Packet) -> Verdict + Send + Sync>);

impl Matcher {
	pub fn new(predicate: impl Fn(&Packet) -> Verdict + Send + Sync + 'static) -> Self {
		Self(Box::new(predicate))
	}

	#[inline]
	pub fn verdict(&self, packet: &Packet) -> Verdict {
		let Self(predicate) = self;
		predicate(packet)
	}
}

pub(crate) enum Request {
	/// Write a packet and, when a matcher is given, wait for the inbound
	/// packet that completes it. The token names the registered task.
	Exchange {
		token: u64,
		packet: Packet,
		matcher: Option<Matcher>,
		timeout: Option<Duration>,
		response: ResponseTx<Result<Option<Packet>, ClientError>>,
	},
	/// Withdraw a registered task whose caller gave up on it. The packet
	/// identifier, when the request carried one, rides along so it goes
	/// back to the allocator only once the task cannot match anything.
	Cancel { token: u64, id: Option<IdGuard> },
	/// Write a Disconnect packet (unless the connection is being abandoned)
	/// and close the transport.
	Shutdown {
		send_disconnect: bool,
		response: ResponseTx<()>,
	},
}

/// One client operation in flight: its request channel, the packet
/// identifier it holds, and the token of whatever task it currently has
/// registered with the connection.
///
/// Dropping the operation mid-exchange submits a [`Request::Cancel`], so
/// an abandoned caller evicts its task before its identifier can be
/// reallocated. An operation that ran to completion (or error) drops its
/// identifier directly; by then the registry has already let go of the
/// task.
pub(crate) struct Operation {
	requests: RequestTx,
	timeout: Option<Duration>,
	id: Option<IdGuard>,
	pending: Option<u64>,
}

impl Operation {
	pub fn new(requests: RequestTx, timeout: Option<Duration>, id: Option<IdGuard>) -> Self {
		Self {
			requests,
			timeout,
			id,
			pending: None,
		}
	}

	/// Writes `packet` and, with a matcher, suspends until the connection
	/// completes the exchange.
	pub async fn exchange(
		&mut self,
		packet: Packet,
		matcher: Option<Matcher>,
	) -> Result<Option<Packet>, ClientError> {
		let token = next_token();
		let awaited = matcher.is_some();
		let (response, rx) = oneshot::channel();
		self.requests
			.send(Request::Exchange {
				token,
				packet,
				matcher,
				timeout: self.timeout,
				response,
			})
			.map_err(|_| ClientError::NoConnection)?;
		if awaited {
			self.pending = Some(token);
		}

		let result = rx.await.map_err(|_| ClientError::ConnectionClosed {
			cause: CloseCause::Shutdown,
		});
		self.pending = None;
		result?
	}
}

impl Drop for Operation {
	fn drop(&mut self) {
		if let Some(token) = self.pending.take() {
			// If the connection is already gone its registry died with it
			// and the identifier can be freed here.
			let _ = self.requests.send(Request::Cancel {
				token,
				id: self.id.take(),
			});
		}
	}
}

/// Matches the ConnAck answering a Connect. Any other packet during the
/// connecting phase is a protocol violation that fails the connect.
pub(crate) fn connack() -> Matcher {
	Matcher::new(|packet| match packet {
		Packet::ConnAck(_) => Verdict::Matched,
		_ => Verdict::Failed(ClientError::UnexpectedPacket),
	})
}

pub(crate) fn puback(id: PacketId) -> Matcher {
	Matcher::new(move |packet| match packet {
		Packet::PubAck(packets::PubAck { id: got }) if *got == id => Verdict::Matched,
		_ => Verdict::Ignored,
	})
}

pub(crate) fn pubrec(id: PacketId) -> Matcher {
	Matcher::new(move |packet| match packet {
		Packet::PubRec(packets::PubRec { id: got }) if *got == id => Verdict::Matched,
		_ => Verdict::Ignored,
	})
}

pub(crate) fn pubcomp(id: PacketId) -> Matcher {
	Matcher::new(move |packet| match packet {
		Packet::PubComp(packets::PubComp { id: got }) if *got == id => Verdict::Matched,
		_ => Verdict::Ignored,
	})
}

pub(crate) fn suback(id: PacketId) -> Matcher {
	Matcher::new(move |packet| match packet {
		Packet::SubAck(suback) if suback.id == id => Verdict::Matched,
		_ => Verdict::Ignored,
	})
}

pub(crate) fn unsuback(id: PacketId) -> Matcher {
	Matcher::new(move |packet| match packet {
		Packet::UnsubAck(packets::UnsubAck { id: got }) if *got == id => Verdict::Matched,
		_ => Verdict::Ignored,
	})
}

pub(crate) fn pingresp() -> Matcher {
	Matcher::new(|packet| match packet {
		Packet::PingResp => Verdict::Matched,
		_ => Verdict::Ignored,
	})
}
