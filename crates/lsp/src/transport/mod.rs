//! Transport seam between the client and a running analysis server.
//!
//! A [`Transport`] owns the wire for one or more started servers. Two
//! implementations share the framed codec and the message pump:
//! [`ProcessTransport`] spawns the server as a child process and talks
//! over piped stdio; [`ModuleTransport`] drives an embedded
//! virtual-machine module through the [`ModuleRuntime`] adapter.

mod module;
mod process;
mod pump;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::types::{AnyNotification, AnyRequest, AnyResponse};

pub use module::{ModuleInstance, ModuleRuntime, ModuleTransport, StartedModule};
pub use process::ProcessTransport;

/// Unique identifier for a started server within one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(pub u64);

impl std::fmt::Display for ServerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "server#{}", self.0)
	}
}

/// Configuration for starting a server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	/// Identifier the caller allocated for this instance.
	pub id: ServerId,
	/// Executable to spawn. The module transport ignores this and runs
	/// its embedded module instead.
	pub command: PathBuf,
	/// Arguments to pass.
	pub args: Vec<String>,
	/// Environment variables to set.
	pub env: HashMap<String, String>,
	/// Working directory; defaults to the process working directory.
	pub root: Option<PathBuf>,
}

impl ServerConfig {
	/// Create a configuration with empty arguments and environment.
	pub fn new(id: ServerId, command: impl Into<PathBuf>) -> Self {
		Self {
			id,
			command: command.into(),
			args: Vec::new(),
			env: HashMap::new(),
			root: None,
		}
	}

	/// Add command line arguments.
	pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	/// Set the working directory.
	pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
		self.root = Some(root.into());
		self
	}
}

/// Why a server's pump terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
	/// The server closed the connection cleanly.
	Stopped,
	/// The connection broke (write failure, malformed frame, ...).
	Crashed,
}

/// Events a started server delivers to its client.
#[derive(Debug)]
pub enum TransportEvent {
	/// The pump terminated.
	Status(TransportStatus),
	/// A server-to-client notification.
	Notification(AnyNotification),
}

/// Handle returned by [`Transport::start`].
#[derive(Debug)]
pub struct StartedServer {
	/// The started server's identifier.
	pub id: ServerId,
	/// Event stream for this server; closed when the pump terminates.
	pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// A started connection to an analysis server.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Start a server.
	///
	/// Fails with a start error if the executable is missing or
	/// non-executable, or the embedded module fails to instantiate.
	async fn start(&self, cfg: ServerConfig) -> Result<StartedServer>;

	/// Send a request and await its response.
	///
	/// Cancelling `token` propagates a `$/cancelRequest` notification to
	/// the server; a response arriving after cancellation or timeout is
	/// discarded, never delivered.
	async fn request(
		&self,
		server: ServerId,
		req: AnyRequest,
		timeout: Duration,
		token: &CancellationToken,
	) -> Result<AnyResponse>;

	/// Send a notification.
	fn notify(&self, server: ServerId, notif: AnyNotification) -> Result<()>;

	/// Stop a server.
	///
	/// Always resolves and never errors; failures are logged. The
	/// underlying process or module is forcibly terminated if it has not
	/// shut down within `timeout`. Idempotent.
	async fn stop(&self, server: ServerId, timeout: Duration);
}
