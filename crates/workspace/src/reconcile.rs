//! Per-key single-flight guard.
//!
//! Configuration edits fire bursts of change events; only one
//! teardown/rebuild per scope is meaningful at a time. A trigger that
//! arrives while one is in flight is **dropped, not queued**. Dropping is
//! safe because the guarded body reads configuration at execution time,
//! so the in-flight run already reflects the newest state by the time it
//! completes.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Result of a [`SingleFlight::try_exclusive`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightOutcome<T> {
	/// The body ran to completion with this value.
	Completed(T),
	/// Another invocation holds the key; the trigger was dropped.
	Skipped,
}

impl<T> FlightOutcome<T> {
	/// The completed value, if the body ran.
	pub fn completed(self) -> Option<T> {
		match self {
			FlightOutcome::Completed(value) => Some(value),
			FlightOutcome::Skipped => None,
		}
	}
}

/// Keyed single-flight guard with drop semantics.
#[derive(Default)]
pub struct SingleFlight {
	held: Mutex<HashSet<String>>,
}

impl SingleFlight {
	/// Create an empty guard.
	pub fn new() -> Self {
		Self::default()
	}

	/// Run `body` only if nobody currently holds `key`.
	///
	/// The key is released on every exit path, including panic and
	/// cancellation of the returned future.
	pub async fn try_exclusive<T>(
		&self,
		key: &str,
		body: impl Future<Output = T>,
	) -> FlightOutcome<T> {
		if !self.held.lock().insert(key.to_owned()) {
			tracing::debug!(key, "reconciliation already in flight; dropping trigger");
			return FlightOutcome::Skipped;
		}
		let _release = Release { flight: self, key };
		FlightOutcome::Completed(body.await)
	}

	/// Whether `key` is currently held.
	pub fn is_held(&self, key: &str) -> bool {
		self.held.lock().contains(key)
	}
}

struct Release<'a> {
	flight: &'a SingleFlight,
	key: &'a str,
}

impl Drop for Release<'_> {
	fn drop(&mut self) {
		self.flight.held.lock().remove(self.key);
	}
}
