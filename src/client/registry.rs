use super::{
	command::{Matcher, ResponseTx, Verdict},
	ClientError,
};
use crate::Packet;
use tokio::time::Instant;

/// A pending request: the matcher that recognises its acknowledgement and
/// the slot its completion is delivered through.
struct Task {
	/// Registration handle, used to withdraw the task on cancellation.
	token: u64,
	matcher: Matcher,
	deadline: Option<Instant>,
	/// Set only for the keep-alive ping; its expiry kills the connection.
	fatal_on_timeout: bool,
	response: ResponseTx<Result<Option<Packet>, ClientError>>,
}

pub(crate) enum Offered {
	Delivered,
	Unmatched,
}

/// The set of requests awaiting an inbound packet, in registration order.
#[derive(Default)]
pub(crate) struct TaskRegistry {
	tasks: Vec<Task>,
}

impl TaskRegistry {
	pub fn register(
		&mut self,
		token: u64,
		matcher: Matcher,
		deadline: Option<Instant>,
		fatal_on_timeout: bool,
		response: ResponseTx<Result<Option<Packet>, ClientError>>,
	) {
		self.tasks.push(Task {
			token,
			matcher,
			deadline,
			fatal_on_timeout,
			response,
		});
	}

	/// Withdraws a task without completing it. Nothing happens when the
	/// token is unknown (the task may have completed in the meantime).
	pub fn remove(&mut self, token: u64) {
		self.tasks.retain(|task| task.token != token);
	}

	/// Offers an inbound packet to every pending task in registration
	/// order. The first match wins and is completed with the packet; a
	/// failing verdict completes only that task and the packet keeps being
	/// offered to the rest.
	pub fn offer(&mut self, packet: &Packet) -> Offered {
		let mut index = 0;
		while index < self.tasks.len() {
			match self.tasks[index].matcher.verdict(packet) {
				Verdict::Matched => {
					let task = self.tasks.remove(index);
					let _ = task.response.send(Ok(Some(packet.clone())));
					return Offered::Delivered;
				}
				Verdict::Failed(error) => {
					let task = self.tasks.remove(index);
					let _ = task.response.send(Err(error));
				}
				Verdict::Ignored => {
					index += 1;
				}
			}
		}

		Offered::Unmatched
	}

	/// The earliest deadline among pending tasks, if any.
	pub fn next_deadline(&self) -> Option<Instant> {
		self.tasks.iter().filter_map(|task| task.deadline).min()
	}

	/// Completes every task whose deadline has passed with
	/// [`ClientError::Timeout`]. Returns `true` if one of them was fatal to
	/// the connection.
	pub fn expire(&mut self, now: Instant) -> bool {
		let mut fatal = false;
		let mut index = 0;
		while index < self.tasks.len() {
			if self.tasks[index]
				.deadline
				.is_some_and(|deadline| deadline <= now)
			{
				let task = self.tasks.remove(index);
				fatal |= task.fatal_on_timeout;
				let _ = task.response.send(Err(ClientError::Timeout));
			} else {
				index += 1;
			}
		}

		fatal
	}

	/// Completes every outstanding task with the error `cause` produces.
	pub fn cancel_all(&mut self, mut cause: impl FnMut() -> ClientError) {
		for task in self.tasks.drain(..) {
			let _ = task.response.send(Err(cause()));
		}
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.tasks.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		client::{command, CloseCause},
		packets::PubAck,
		PacketId,
	};
	use std::time::Duration;
	use tokio::sync::oneshot;

	fn id(n: u16) -> PacketId {
		PacketId::new(n).unwrap()
	}

	#[tokio::test]
	async fn first_registered_match_wins() {
		let mut registry = TaskRegistry::default();
		let (first_tx, mut first_rx) = oneshot::channel();
		let (second_tx, mut second_rx) = oneshot::channel();

		// Two tasks watching for the same acknowledgement.
		registry.register(1, command::puback(id(1)), None, false, first_tx);
		registry.register(2, command::puback(id(1)), None, false, second_tx);

		let ack = PubAck { id: id(1) }.into();
		assert!(matches!(registry.offer(&ack), Offered::Delivered));
		assert!(matches!(first_rx.try_recv(), Ok(Ok(Some(_)))));
		assert!(second_rx.try_recv().is_err());

		assert!(matches!(registry.offer(&ack), Offered::Delivered));
		assert!(matches!(second_rx.try_recv(), Ok(Ok(Some(_)))));
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn unrelated_packets_pass_over_pending_tasks() {
		let mut registry = TaskRegistry::default();
		let (tx, mut rx) = oneshot::channel();
		registry.register(1, command::puback(id(1)), None, false, tx);

		assert!(matches!(
			registry.offer(&PubAck { id: id(2) }.into()),
			Offered::Unmatched
		));
		assert!(rx.try_recv().is_err());
		assert!(!registry.is_empty());
	}

	#[tokio::test]
	async fn failing_verdict_only_fails_its_own_task() {
		let mut registry = TaskRegistry::default();
		let (connect_tx, mut connect_rx) = oneshot::channel();
		let (publish_tx, mut publish_rx) = oneshot::channel();

		registry.register(1, command::connack(), None, false, connect_tx);
		registry.register(2, command::puback(id(1)), None, false, publish_tx);

		// Fails the connack matcher, then completes the publish.
		assert!(matches!(
			registry.offer(&PubAck { id: id(1) }.into()),
			Offered::Delivered
		));
		assert!(matches!(
			connect_rx.try_recv(),
			Ok(Err(ClientError::UnexpectedPacket))
		));
		assert!(matches!(publish_rx.try_recv(), Ok(Ok(Some(_)))));
	}

	#[tokio::test(start_paused = true)]
	async fn expiry_completes_with_timeout() {
		let mut registry = TaskRegistry::default();
		let (tx, mut rx) = oneshot::channel();
		let (ping_tx, mut ping_rx) = oneshot::channel();

		let now = Instant::now();
		registry.register(
			1,
			command::puback(id(1)),
			Some(now + Duration::from_secs(2)),
			false,
			tx,
		);
		registry.register(
			2,
			command::pingresp(),
			Some(now + Duration::from_secs(5)),
			true,
			ping_tx,
		);

		assert_eq!(registry.next_deadline(), Some(now + Duration::from_secs(2)));
		assert!(!registry.expire(now + Duration::from_secs(2)));
		assert!(matches!(rx.try_recv(), Ok(Err(ClientError::Timeout))));
		assert!(ping_rx.try_recv().is_err());

		// The keep-alive ping expiry is fatal.
		assert!(registry.expire(now + Duration::from_secs(5)));
		assert!(matches!(ping_rx.try_recv(), Ok(Err(ClientError::Timeout))));
	}

	#[tokio::test]
	async fn removed_tasks_never_match_again() {
		let mut registry = TaskRegistry::default();
		let (orphan_tx, mut orphan_rx) = oneshot::channel();
		let (live_tx, mut live_rx) = oneshot::channel();

		// A task abandoned by its caller is withdrawn; a later task may
		// then watch the same identifier.
		registry.register(1, command::puback(id(1)), None, false, orphan_tx);
		registry.remove(1);
		registry.register(2, command::puback(id(1)), None, false, live_tx);

		assert!(matches!(
			registry.offer(&PubAck { id: id(1) }.into()),
			Offered::Delivered
		));
		assert!(matches!(live_rx.try_recv(), Ok(Ok(Some(_)))));
		assert!(orphan_rx.try_recv().is_err());
		assert!(registry.is_empty());

		// Removing an already-completed token changes nothing.
		registry.remove(2);
	}

	#[tokio::test]
	async fn cancel_all_flushes_every_task() {
		let mut registry = TaskRegistry::default();
		let (first_tx, mut first_rx) = oneshot::channel();
		let (second_tx, mut second_rx) = oneshot::channel();
		registry.register(1, command::puback(id(1)), None, false, first_tx);
		registry.register(2, command::suback(id(2)), None, false, second_tx);

		registry.cancel_all(|| ClientError::ConnectionClosed {
			cause: CloseCause::Transport,
		});

		assert!(registry.is_empty());
		assert!(matches!(
			first_rx.try_recv(),
			Ok(Err(ClientError::ConnectionClosed { .. }))
		));
		assert!(matches!(
			second_rx.try_recv(),
			Ok(Err(ClientError::ConnectionClosed { .. }))
		));
	}
}
