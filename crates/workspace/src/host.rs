//! Workspace facade.
//!
//! Owns the resolver, registry, settings, command router and config
//! watcher with an explicit lifecycle: construct at activation, call
//! [`Workspace::shutdown`] at deactivation. Nothing is process-global;
//! dependents receive the pieces they need instead of reaching for
//! ambient state.

use std::sync::Arc;

use noir_ide_lsp::{ClientHandle, Transport};
use tokio::task::JoinHandle;
use url::Url;

use crate::LANGUAGE_ID;
use crate::commands::{CommandRouter, LogTaskRunner, ProfileRenderer, TaskRunner};
use crate::locator::{Locator, NargoLocator};
use crate::observers::{LogObserver, StatusSink, TestSink};
use crate::reconcile::SingleFlight;
use crate::registry::ClientRegistry;
use crate::scope::{ScopeResolver, dirpath};
use crate::settings::SettingsStore;
use crate::watcher::ConfigWatcher;

/// Collaborators a host editor can plug in; every field has a logging
/// default so headless use works out of the box.
pub struct WorkspaceOptions {
	/// Binary discovery.
	pub locator: Arc<dyn Locator>,
	/// Persistent status indicator.
	pub status: Arc<dyn StatusSink>,
	/// Test-tree delta consumer.
	pub tests: Arc<dyn TestSink>,
	/// External task executor.
	pub runner: Arc<dyn TaskRunner>,
	/// Profiling annotation renderer.
	pub renderer: Arc<dyn ProfileRenderer>,
}

impl Default for WorkspaceOptions {
	fn default() -> Self {
		Self {
			locator: Arc::new(NargoLocator::new()),
			status: Arc::new(LogObserver),
			tests: Arc::new(LogObserver),
			runner: Arc::new(LogTaskRunner),
			renderer: Arc::new(LogTaskRunner),
		}
	}
}

/// Top-level owner of the scope/client subsystem.
pub struct Workspace {
	resolver: Arc<ScopeResolver>,
	settings: Arc<SettingsStore>,
	registry: Arc<ClientRegistry>,
	commands: Arc<CommandRouter>,
	watcher: JoinHandle<()>,
}

impl Workspace {
	/// Create a workspace with default collaborators.
	pub fn new(transport: Arc<dyn Transport>) -> Self {
		Self::with_options(transport, WorkspaceOptions::default())
	}

	/// Create a workspace with explicit collaborators.
	pub fn with_options(transport: Arc<dyn Transport>, options: WorkspaceOptions) -> Self {
		let resolver = Arc::new(ScopeResolver::new());
		let settings = Arc::new(SettingsStore::new());
		let registry = Arc::new(ClientRegistry::new(
			transport,
			settings.clone(),
			options.locator.clone(),
			options.status.clone(),
			options.tests,
		));
		let commands = Arc::new(CommandRouter::new(
			registry.clone(),
			settings.clone(),
			options.locator,
			options.runner,
			options.renderer,
		));
		let watcher = ConfigWatcher::spawn(
			registry.clone(),
			commands.clone(),
			settings.clone(),
			Arc::new(SingleFlight::new()),
			options.status,
		);
		Self {
			resolver,
			settings,
			registry,
			commands,
			watcher,
		}
	}

	/// The scope resolver.
	pub fn resolver(&self) -> &Arc<ScopeResolver> {
		&self.resolver
	}

	/// The settings store.
	pub fn settings(&self) -> &Arc<SettingsStore> {
		&self.settings
	}

	/// The client registry.
	pub fn registry(&self) -> &Arc<ClientRegistry> {
		&self.registry
	}

	/// The command router.
	pub fn commands(&self) -> &Arc<CommandRouter> {
		&self.commands
	}

	/// Handle a document being opened.
	///
	/// Non-Noir documents and synthetic URI schemes are ignored.
	/// Otherwise the governing scope's client is lazily started and the
	/// scope's commands registered.
	pub async fn document_opened(
		&self,
		uri: &Url,
		language_id: &str,
	) -> crate::Result<Option<ClientHandle>> {
		if language_id != LANGUAGE_ID {
			return Ok(None);
		}
		let Some(scope) = self.resolver.resolve_for_document(uri) else {
			return Ok(None);
		};

		let client = self.registry.ensure(&scope).await?;
		if client.is_some() {
			self.commands.register_scope(&scope)?;
		}
		Ok(client)
	}

	/// Handle a workspace-folder set change.
	///
	/// Added folders start lazily on their next document-open; removed
	/// folders' clients stop and their commands are disposed.
	pub async fn workspace_folders_changed(&self, added: &[Url], removed: &[Url]) {
		self.resolver.folders_changed(added, removed);
		for folder in removed {
			let key = dirpath(folder);
			self.commands.dispose_scope(&key);
			self.registry.forget(&key).await;
		}
	}

	/// Stop everything; the workspace is unusable afterwards.
	pub async fn shutdown(self) {
		self.watcher.abort();
		self.registry.shutdown_all().await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::Ordering;

	use url::Url;

	use crate::testing::{FixedLocator, MockTransport, RecordingStatus, RecordingTests};

	use super::*;

	fn workspace(transport: Arc<MockTransport>) -> Workspace {
		Workspace::with_options(
			transport,
			WorkspaceOptions {
				locator: Arc::new(FixedLocator("/opt/noir/bin/nargo".into())),
				status: RecordingStatus::new(),
				tests: Arc::new(RecordingTests::default()),
				..WorkspaceOptions::default()
			},
		)
	}

	fn url(s: &str) -> Url {
		Url::parse(s).unwrap()
	}

	#[tokio::test]
	async fn nested_folders_share_one_client_scoped_to_the_outermost() {
		let transport = MockTransport::new();
		let ws = workspace(transport.clone());
		ws.resolver()
			.set_folders(vec![url("file:///proj/"), url("file:///proj/contracts/")]);

		let client = ws
			.document_opened(&url("file:///proj/contracts/main.nr"), LANGUAGE_ID)
			.await
			.unwrap()
			.expect("client");

		assert_eq!(transport.start_count.load(Ordering::SeqCst), 1);
		assert_eq!(client.scope().as_str(), "file:///proj/");
		assert!(ws.registry().get("file:///proj/").is_some());
		assert!(ws.registry().get("file:///proj/contracts/").is_none());

		// Opening a sibling document reuses the same client.
		let again = ws
			.document_opened(&url("file:///proj/src/lib.nr"), LANGUAGE_ID)
			.await
			.unwrap()
			.expect("client");
		assert_eq!(again.id(), client.id());
		assert_eq!(transport.start_count.load(Ordering::SeqCst), 1);

		ws.shutdown().await;
	}

	#[tokio::test]
	async fn non_noir_documents_and_synthetic_schemes_are_ignored() {
		let transport = MockTransport::new();
		let ws = workspace(transport.clone());
		ws.resolver().set_folders(vec![url("file:///proj/")]);

		assert!(
			ws.document_opened(&url("file:///proj/notes.md"), "markdown")
				.await
				.unwrap()
				.is_none()
		);
		assert!(
			ws.document_opened(&url("output:analysis-log"), LANGUAGE_ID)
				.await
				.unwrap()
				.is_none()
		);
		assert_eq!(transport.start_count.load(Ordering::SeqCst), 0);

		ws.shutdown().await;
	}

	#[tokio::test]
	async fn standalone_files_each_get_their_own_client() {
		let transport = MockTransport::new();
		let ws = workspace(transport.clone());

		let a = ws
			.document_opened(&url("file:///tmp/a.nr"), LANGUAGE_ID)
			.await
			.unwrap()
			.expect("client");
		let b = ws
			.document_opened(&url("file:///tmp/b.nr"), LANGUAGE_ID)
			.await
			.unwrap()
			.expect("client");

		assert!(a.id() != b.id());
		assert_eq!(transport.start_count.load(Ordering::SeqCst), 2);

		ws.shutdown().await;
	}

	#[tokio::test]
	async fn closing_a_folder_stops_its_client_and_commands() {
		let transport = MockTransport::new();
		let ws = workspace(transport.clone());
		ws.resolver().set_folders(vec![url("file:///proj/")]);

		ws.document_opened(&url("file:///proj/src/main.nr"), LANGUAGE_ID)
			.await
			.unwrap()
			.expect("client");
		assert!(ws.commands().has_scope("file:///proj/"));

		ws.workspace_folders_changed(&[], &[url("file:///proj/")])
			.await;

		assert!(ws.registry().get("file:///proj/").is_none());
		assert!(!ws.commands().has_scope("file:///proj/"));
		assert_eq!(transport.stop_count.load(Ordering::SeqCst), 1);

		// The document now resolves to its own file scope.
		let standalone = ws
			.document_opened(&url("file:///proj/src/main.nr"), LANGUAGE_ID)
			.await
			.unwrap()
			.expect("client");
		assert_eq!(standalone.scope().as_str(), "file:///proj/src/main.nr");

		ws.shutdown().await;
	}

	#[tokio::test]
	async fn commands_are_registered_for_the_governing_scope() {
		let transport = MockTransport::new();
		let ws = workspace(transport);
		ws.resolver().set_folders(vec![url("file:///proj/")]);

		ws.document_opened(&url("file:///proj/src/main.nr"), LANGUAGE_ID)
			.await
			.unwrap()
			.expect("client");

		let spec = ws.commands().task("file:///proj/", "test").unwrap();
		assert_eq!(spec.args, vec!["test"]);
		assert_eq!(spec.cwd, Some(std::path::PathBuf::from("/proj")));

		ws.shutdown().await;
	}
}
