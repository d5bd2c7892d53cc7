#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

pub type ConnId = u64;

/// Text frames queued for one client.
pub type Outbox = mpsc::Receiver<Arc<str>>;

/// Connected gateway clients.
///
/// Broadcasts never block: each client has a bounded queue and frames that do
/// not fit are dropped and counted.
#[derive(Debug, Clone)]
pub struct Subscribers {
	inner: Arc<RwLock<HashMap<ConnId, mpsc::Sender<Arc<str>>>>>,
	next_id: Arc<AtomicU64>,
	capacity: usize,
}

impl Subscribers {
	pub fn new(capacity: usize) -> Self {
		Self {
			inner: Arc::new(RwLock::new(HashMap::new())),
			next_id: Arc::new(AtomicU64::new(1)),
			capacity: capacity.max(1),
		}
	}

	pub fn register(&self) -> (ConnId, Outbox) {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::channel(self.capacity);
		let mut inner = self.inner.write();
		inner.insert(id, tx);
		metrics::gauge!("danmu_gateway_clients").set(inner.len() as f64);
		debug!(conn_id = id, clients = inner.len(), "gateway client registered");
		(id, rx)
	}

	pub fn remove(&self, id: ConnId) {
		let mut inner = self.inner.write();
		if inner.remove(&id).is_some() {
			metrics::gauge!("danmu_gateway_clients").set(inner.len() as f64);
			debug!(conn_id = id, clients = inner.len(), "gateway client removed");
		}
	}

	/// Queue `msg` for one client. Returns whether it was queued.
	pub fn send_to(&self, id: ConnId, msg: impl Into<Arc<str>>) -> bool {
		let inner = self.inner.read();
		let Some(tx) = inner.get(&id) else {
			return false;
		};
		match tx.try_send(msg.into()) {
			Ok(()) => true,
			Err(_) => {
				metrics::counter!("danmu_fanout_dropped_total").increment(1);
				false
			}
		}
	}

	/// Queue `msg` for every client. Returns how many accepted it.
	pub fn broadcast(&self, msg: impl Into<Arc<str>>) -> usize {
		let msg = msg.into();
		let inner = self.inner.read();

		let mut delivered = 0;
		let mut dropped: u64 = 0;
		for tx in inner.values() {
			match tx.try_send(Arc::clone(&msg)) {
				Ok(()) => delivered += 1,
				Err(mpsc::error::TrySendError::Full(_)) => dropped += 1,
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		if dropped > 0 {
			metrics::counter!("danmu_fanout_dropped_total").increment(dropped);
			debug!(dropped, "gateway: dropped due to full client queues");
		}
		delivered
	}

	pub fn len(&self) -> usize {
		self.inner.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn broadcast_reaches_every_client() {
		let subs = Subscribers::new(4);
		let (_a, mut rx_a) = subs.register();
		let (_b, mut rx_b) = subs.register();

		assert_eq!(subs.broadcast("hello"), 2);
		assert_eq!(rx_a.try_recv().unwrap().as_ref(), "hello");
		assert_eq!(rx_b.try_recv().unwrap().as_ref(), "hello");
	}

	#[test]
	fn send_to_targets_one_client() {
		let subs = Subscribers::new(4);
		let (a, mut rx_a) = subs.register();
		let (_b, mut rx_b) = subs.register();

		assert!(subs.send_to(a, "pong"));
		assert_eq!(rx_a.try_recv().unwrap().as_ref(), "pong");
		assert!(rx_b.try_recv().is_err());
		assert!(!subs.send_to(999, "pong"));
	}

	#[test]
	fn full_queue_drops_without_blocking() {
		let subs = Subscribers::new(1);
		let (_a, mut rx) = subs.register();

		assert_eq!(subs.broadcast("1"), 1);
		assert_eq!(subs.broadcast("2"), 0);
		assert_eq!(rx.try_recv().unwrap().as_ref(), "1");
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn remove_only_affects_that_client() {
		let subs = Subscribers::new(4);
		let (a, _rx_a) = subs.register();
		let (_b, mut rx_b) = subs.register();

		subs.remove(a);
		assert_eq!(subs.len(), 1);
		assert_eq!(subs.broadcast("x"), 1);
		assert_eq!(rx_b.try_recv().unwrap().as_ref(), "x");
	}

	#[test]
	fn ids_are_unique_across_threads() {
		let subs = Subscribers::new(1);
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let subs = subs.clone();
				std::thread::spawn(move || {
					(0..32)
						.map(|_| {
							let (id, rx) = subs.register();
							drop(rx);
							id
						})
						.collect::<Vec<_>>()
				})
			})
			.collect();

		let mut ids: Vec<ConnId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
		ids.sort_unstable();
		ids.dedup();
		assert_eq!(ids.len(), 8 * 32);
		assert_eq!(subs.len(), 8 * 32);
	}
}
