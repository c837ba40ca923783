use std::sync::Mutex;

use crate::types::Event;

/// Sink for supervisor status events. Injected at construction so the core
/// never writes to a process-wide logger.
pub trait Notifier: Send + Sync {
	fn notify(&self, event: Event);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
	fn notify(&self, event: Event) {
		match &event {
			Event::Spawned { pid } | Event::Terminated { pid } | Event::OutputClosed { pid } => {
				tracing::info!(pid, "{}", event)
			}
			Event::Exited { pid, code } => tracing::info!(pid, code, "{}", event),
			Event::Failure { line, pattern } => tracing::warn!(%line, %pattern, "{}", event),
			Event::Waiting { secs } => tracing::info!(secs, "{}", event),
			Event::TerminateFailed { pid, .. } => tracing::error!(pid, "{}", event),
			_ => tracing::info!("{}", event),
		}
	}
}

/// Keeps every event in arrival order.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
	events: Mutex<Vec<Event>>,
}

impl MemoryNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn events(&self) -> Vec<Event> {
		match self.events.lock() {
			Ok(events) => events.clone(),
			Err(poisoned) => poisoned.into_inner().clone(),
		}
	}
}

impl Notifier for MemoryNotifier {
	fn notify(&self, event: Event) {
		match self.events.lock() {
			Ok(mut events) => events.push(event),
			Err(poisoned) => poisoned.into_inner().push(event),
		}
	}
}
