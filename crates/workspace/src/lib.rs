//! Scope resolution and analysis-server lifecycle management.
//!
//! One editor scope (a workspace folder or a standalone file) owns at
//! most one analysis-server client. This crate decides when that client
//! exists: [`scope::ScopeResolver`] maps documents to their governing
//! scope (outermost workspace folder wins), [`registry::ClientRegistry`]
//! owns the client lifetimes with generation tracking, and
//! [`watcher::ConfigWatcher`] rebuilds a scope's client when its
//! configuration changes, serialized per scope by
//! [`reconcile::SingleFlight`].
//!
//! [`host::Workspace`] ties the pieces together with an explicit
//! activation/shutdown lifecycle; nothing here is process-global.

pub mod commands;
pub mod host;
pub mod locator;
pub mod observers;
pub mod profile;
pub mod reconcile;
pub mod registry;
pub mod scope;
pub mod settings;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use commands::{
	CommandRouter, LogTaskRunner, ProfileRenderer, TaskGroup, TaskRunner, TaskSpec,
};
pub use host::{Workspace, WorkspaceOptions};
pub use locator::{LocateError, Locator, NargoLocator};
pub use observers::{LogObserver, ScopeStatus, StatusSink, TestSink};
pub use reconcile::{FlightOutcome, SingleFlight};
pub use registry::{ClientRegistry, RecordStatus};
pub use scope::{Scope, ScopeResolver};
pub use settings::{ConfigEvent, FeatureToggles, SettingKey, Settings, SettingsStore};
pub use watcher::ConfigWatcher;

/// Language identifier of Noir documents.
pub const LANGUAGE_ID: &str = "noir";

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The protocol client failed.
	#[error(transparent)]
	Client(#[from] noir_ide_lsp::Error),
	/// No usable `nargo` binary was found.
	#[error("{diagnostic}")]
	NargoNotFound {
		/// User-facing diagnostic listing every probed candidate.
		diagnostic: String,
	},
	/// A concurrent start of the same scope's client failed.
	#[error("analysis server failed to start for {scope}: {reason}")]
	StartFailed {
		/// Scope key whose start failed.
		scope: String,
		/// Rendered failure reason.
		reason: String,
	},
	/// The scope has no running client.
	#[error("no running analysis server for {0}")]
	NoClient(String),
	/// The command is not registered for the scope.
	#[error("unknown command {name} for {scope}")]
	UnknownCommand {
		/// Scope key the lookup used.
		scope: String,
		/// Command name.
		name: String,
	},
}
