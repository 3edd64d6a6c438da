//! Client startup: transport start, event dispatch, handshake.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lsp_types::notification::Notification;
use lsp_types::request::Request;
use lsp_types::{InitializeParams, WorkspaceFolder};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::transport::{ServerConfig, ServerId, Transport, TransportEvent, TransportStatus};
use crate::{Error, Result};

use super::capabilities::{CapabilitySet, Handshake, client_capabilities};
use super::handle::ClientHandle;
use super::state::ConnectionState;

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for tearing a half-started server back down.
const ABORT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for starting one client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Canonical URI of the governing scope.
	pub scope: Url,
	/// Whether the scope is a workspace folder (as opposed to a lone file).
	pub folder: bool,
	/// Server executable; ignored by the module transport.
	pub command: PathBuf,
	/// Arguments to the server.
	pub args: Vec<String>,
	/// Working directory for the server.
	pub root: Option<PathBuf>,
	/// Generation of this client under its scope.
	pub generation: u64,
	/// Server-specific initialization options.
	pub initialization_options: Option<JsonValue>,
	/// Per-request timeout.
	pub request_timeout: Duration,
}

impl ClientConfig {
	/// Create a configuration with defaults.
	pub fn new(scope: Url, command: impl Into<PathBuf>) -> Self {
		Self {
			scope,
			folder: false,
			command: command.into(),
			args: Vec::new(),
			root: None,
			generation: 0,
			initialization_options: None,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}

	/// Mark the scope as a workspace folder.
	pub fn folder(mut self, folder: bool) -> Self {
		self.folder = folder;
		self
	}

	/// Add server arguments.
	pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	/// Set the working directory.
	pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
		self.root = Some(root.into());
		self
	}

	/// Set the generation counter.
	pub fn generation(mut self, generation: u64) -> Self {
		self.generation = generation;
		self
	}

	/// Set initialization options.
	pub fn initialization_options(mut self, options: JsonValue) -> Self {
		self.initialization_options = Some(options);
		self
	}
}

/// Start a server and run the handshake.
///
/// On handshake failure the half-started server is stopped before the
/// error is returned; the caller never receives a handle to a broken
/// connection.
pub async fn start_client(
	transport: Arc<dyn Transport>,
	id: ServerId,
	config: ClientConfig,
) -> Result<ClientHandle> {
	let server_cfg = {
		let mut cfg = ServerConfig::new(id, &config.command).args(config.args.iter().cloned());
		if let Some(root) = &config.root {
			cfg = cfg.root(root);
		}
		cfg
	};

	let mut started = transport.start(server_cfg).await?;

	let handle = ClientHandle::new(
		id,
		config.scope.clone(),
		config.command.display().to_string(),
		config.generation,
		transport.clone(),
		config.request_timeout,
	);

	let dispatcher = handle.clone();
	tokio::spawn(async move {
		while let Some(event) = started.events.recv().await {
			match event {
				TransportEvent::Notification(notif) => dispatcher.dispatch_notification(notif),
				TransportEvent::Status(status) => {
					match status {
						TransportStatus::Stopped => {
							tracing::info!(server = %id, "analysis server stopped")
						}
						TransportStatus::Crashed => {
							tracing::warn!(server = %id, "analysis server crashed")
						}
					}
					dispatcher.set_state(ConnectionState::Dead);
				}
			}
		}
	});

	match initialize(&handle, &config).await {
		Ok(()) => Ok(handle),
		Err(e) => {
			transport.stop(id, ABORT_STOP_TIMEOUT).await;
			handle.set_state(ConnectionState::Dead);
			Err(e)
		}
	}
}

async fn initialize(handle: &ClientHandle, config: &ClientConfig) -> Result<()> {
	let root_uri = lsp_uri(&config.scope)?;
	let workspace_folders = config.folder.then(|| {
		vec![WorkspaceFolder {
			uri: root_uri.clone(),
			name: folder_name(&config.scope),
		}]
	});

	#[allow(deprecated, reason = "root_uri is still what the server reads")]
	let params = InitializeParams {
		process_id: Some(std::process::id()),
		root_uri: Some(root_uri),
		workspace_folders,
		initialization_options: config.initialization_options.clone(),
		capabilities: client_capabilities(),
		client_info: Some(lsp_types::ClientInfo {
			name: String::from("noir-ide"),
			version: Some(String::from(env!("CARGO_PKG_VERSION"))),
		}),
		..Default::default()
	};

	let raw = handle
		.request_raw(
			lsp_types::request::Initialize::METHOD,
			serde_json::to_value(params)?,
			&CancellationToken::new(),
		)
		.await?;

	let nargo = CapabilitySet::from_initialize(&raw);
	let server = raw
		.get("capabilities")
		.cloned()
		.map(serde_json::from_value)
		.transpose()?
		.unwrap_or_default();
	handle.set_handshake(Handshake { server, nargo });

	handle.notify_raw(
		lsp_types::notification::Initialized::METHOD,
		serde_json::json!({}),
	)?;
	handle.set_state(ConnectionState::Ready);

	tracing::info!(
		server = %handle.id(),
		scope = %handle.scope(),
		command = %handle.command(),
		generation = handle.generation(),
		"analysis server ready"
	);
	Ok(())
}

fn lsp_uri(url: &Url) -> Result<lsp_types::Uri> {
	url.as_str()
		.parse()
		.map_err(|_| Error::Protocol(format!("scope URI is not a valid LSP URI: {url}")))
}

fn folder_name(url: &Url) -> String {
	url.path_segments()
		.and_then(|segments| segments.rev().find(|s| !s.is_empty()))
		.map(str::to_owned)
		.unwrap_or_else(|| url.as_str().to_owned())
}
