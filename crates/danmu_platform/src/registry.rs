#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use danmu_domain::RoomId;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
	/// No session is running for the room.
	NotRunning,
	/// The session was signalled and will stop on its own task.
	Accepted,
}

/// Process-wide set of rooms with a running session.
///
/// Membership is held through a [`RoomLease`]; each room slot carries its own
/// stop signal so a stop request only ever reaches the addressed session.
#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
	inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
	next_generation: u64,
	rooms: HashMap<RoomId, Slot>,
}

#[derive(Debug)]
struct Slot {
	generation: u64,
	stop_tx: watch::Sender<bool>,
}

impl RoomRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Claim `room`. Returns `None` when a session already holds it.
	pub fn try_start(&self, room: RoomId) -> Option<RoomLease> {
		let mut inner = self.inner.lock();
		if inner.rooms.contains_key(&room) {
			return None;
		}

		inner.next_generation += 1;
		let generation = inner.next_generation;
		let (stop_tx, stop_rx) = watch::channel(false);
		inner.rooms.insert(room, Slot { generation, stop_tx });
		metrics::gauge!("danmu_rooms_active").set(inner.rooms.len() as f64);
		debug!(%room, generation, "registry: room claimed");

		Some(RoomLease {
			room,
			generation,
			stop_rx,
			inner: Arc::clone(&self.inner),
			released: false,
		})
	}

	/// Signal the session for `room` to stop. Returns before it has stopped.
	pub fn request_stop(&self, room: RoomId) -> StopOutcome {
		let inner = self.inner.lock();
		match inner.rooms.get(&room) {
			Some(slot) => {
				slot.stop_tx.send_replace(true);
				debug!(%room, generation = slot.generation, "registry: stop requested");
				StopOutcome::Accepted
			}
			None => StopOutcome::NotRunning,
		}
	}

	pub fn is_active(&self, room: RoomId) -> bool {
		self.inner.lock().rooms.contains_key(&room)
	}

	/// Snapshot of active rooms, sorted.
	pub fn active_rooms(&self) -> Vec<RoomId> {
		let mut rooms: Vec<RoomId> = self.inner.lock().rooms.keys().copied().collect();
		rooms.sort_unstable();
		rooms
	}

	pub fn len(&self) -> usize {
		self.inner.lock().rooms.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Exclusive claim on a room. Releasing (or dropping) it removes the room
/// from the registry once.
#[derive(Debug)]
pub struct RoomLease {
	room: RoomId,
	generation: u64,
	stop_rx: watch::Receiver<bool>,
	inner: Arc<Mutex<Inner>>,
	released: bool,
}

impl RoomLease {
	pub fn stop_requested(&self) -> bool {
		*self.stop_rx.borrow()
	}

	/// Resolves once a stop has been requested for this room.
	pub async fn stopped(&mut self) {
		if self.stop_rx.wait_for(|stop| *stop).await.is_err() {
			std::future::pending::<()>().await;
		}
	}

	/// Remove the room from the registry. Returns whether this call removed it.
	pub fn release(mut self) -> bool {
		self.release_slot()
	}

	fn release_slot(&mut self) -> bool {
		if self.released {
			return false;
		}
		self.released = true;

		let mut inner = self.inner.lock();
		let owned = inner
			.rooms
			.get(&self.room)
			.is_some_and(|slot| slot.generation == self.generation);
		if owned {
			inner.rooms.remove(&self.room);
			metrics::gauge!("danmu_rooms_active").set(inner.rooms.len() as f64);
			debug!(room = %self.room, generation = self.generation, "registry: room released");
		}
		owned
	}
}

impl Drop for RoomLease {
	fn drop(&mut self) {
		self.release_slot();
	}
}
