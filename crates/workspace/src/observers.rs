//! Collaborator seams for surfacing background state.
//!
//! Start failures and reconciliation errors happen with no user action to
//! answer to, so they land on a persistent per-scope indicator instead of
//! a transient notification.

use noir_ide_lsp::ext::PackageTests;

/// Persistent per-scope status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeStatus {
	/// A client is starting.
	Starting,
	/// A client is running.
	Running {
		/// Display name of the launched server.
		command: String,
	},
	/// The last start or reconciliation failed; no automatic retry.
	Failed {
		/// User-facing diagnostic.
		diagnostic: String,
	},
	/// The scope's client was stopped and removed.
	Stopped,
}

/// Receives persistent status updates per scope.
pub trait StatusSink: Send + Sync {
	/// Update the indicator for one scope.
	fn report(&self, scope_key: &str, status: ScopeStatus);
}

/// Receives test-tree deltas pushed by servers that support them.
pub trait TestSink: Send + Sync {
	/// A server pushed a `tests/update` delta for the given scope.
	fn tests_updated(&self, scope_key: &str, update: PackageTests);
}

/// Default sink that logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl StatusSink for LogObserver {
	fn report(&self, scope_key: &str, status: ScopeStatus) {
		match &status {
			ScopeStatus::Failed { diagnostic } => {
				tracing::error!(scope = %scope_key, %diagnostic, "scope failed");
			}
			other => tracing::info!(scope = %scope_key, status = ?other, "scope status"),
		}
	}
}

impl TestSink for LogObserver {
	fn tests_updated(&self, scope_key: &str, update: PackageTests) {
		tracing::debug!(
			scope = %scope_key,
			package = %update.package,
			tests = update.tests.as_ref().map_or(0, Vec::len),
			"test tree updated"
		);
	}
}
