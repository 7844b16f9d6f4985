use super::ClientError;
use crate::{misc::WrappingNonZeroU16, PacketId};
use std::{
	collections::HashSet,
	sync::{Arc, Mutex},
};

/// Hands out packet identifiers that are unique among in-flight requests.
///
/// A single wrapping counter walks the identifier space; candidates still
/// held by a pending request are skipped. Identifiers are returned through
/// the [`IdGuard`] drop, so a request that is cancelled mid-flight still
/// frees its identifier.
#[derive(Clone, Default)]
pub(crate) struct IdAllocator {
	inner: Arc<Mutex<AllocatorState>>,
}

struct AllocatorState {
	counter: WrappingNonZeroU16,
	in_flight: HashSet<PacketId>,
}

impl Default for AllocatorState {
	fn default() -> Self {
		Self {
			// Wraps to 1 on the first increment.
			counter: WrappingNonZeroU16::MAX,
			in_flight: HashSet::new(),
		}
	}
}

impl IdAllocator {
	pub fn allocate(&self) -> Result<IdGuard, ClientError> {
		let mut state = self.inner.lock().unwrap();

		if state.in_flight.len() == u16::MAX as usize {
			return Err(ClientError::TooManyInflight);
		}

		loop {
			state.counter += 1;
			let id = state.counter.get();
			if state.in_flight.insert(id) {
				return Ok(IdGuard {
					id,
					inner: Arc::clone(&self.inner),
				});
			}
		}
	}
}

/// Holds a packet identifier in flight until dropped.
pub(crate) struct IdGuard {
	id: PacketId,
	inner: Arc<Mutex<AllocatorState>>,
}

impl IdGuard {
	#[inline]
	pub fn id(&self) -> PacketId {
		self.id
	}
}

impl Drop for IdGuard {
	fn drop(&mut self) {
		self.inner.lock().unwrap().in_flight.remove(&self.id);
	}
}
