#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::LiveEvent;

pub type EventHandler = Arc<dyn Fn(&LiveEvent) + Send + Sync>;

/// Synchronous in-process fan-out owned by one session.
///
/// Handlers run on the publishing task in registration order and must not
/// block.
#[derive(Clone, Default)]
pub struct EventBus {
	handlers: Vec<EventHandler>,
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe<F>(&mut self, handler: F)
	where
		F: Fn(&LiveEvent) + Send + Sync + 'static,
	{
		self.handlers.push(Arc::new(handler));
	}

	pub fn subscribe_shared(&mut self, handler: EventHandler) {
		self.handlers.push(handler);
	}

	pub fn publish(&self, event: &LiveEvent) {
		for handler in &self.handlers {
			handler(event);
		}
	}

	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}
}

impl std::fmt::Debug for EventBus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventBus").field("handlers", &self.handlers.len()).finish()
	}
}
