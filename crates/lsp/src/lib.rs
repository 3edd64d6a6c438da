//! Protocol client for the Noir analysis server.
//!
//! This crate owns everything below the scope layer: the JSON-RPC wire
//! types and length-framed codec, the [`Transport`] seam with its two
//! implementations (a subprocess speaking over piped stdio and an embedded
//! virtual-machine module behind the [`transport::ModuleRuntime`] adapter),
//! and the [`ClientHandle`] used to talk to one running server.
//!
//! The scope/lifecycle layer lives in `noir-ide-workspace`; it decides
//! *when* a client exists. This crate only knows how to start one, drive
//! it, and tear it down.

use std::io;

pub use serde_json::Value as JsonValue;

pub mod client;
pub mod codec;
pub mod ext;
pub mod transport;
pub mod types;

pub use client::{
	CapabilitySet, ClientConfig, ClientHandle, ConnectionState, Handshake, TestCapabilities,
	start_client,
};
pub use transport::{
	ModuleInstance, ModuleRuntime, ModuleTransport, ProcessTransport, ServerConfig, ServerId,
	StartedModule, StartedServer, Transport, TransportEvent, TransportStatus,
};
pub use types::{AnyNotification, AnyRequest, AnyResponse, Message, RequestId, ResponseError};

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The connection's message pump stopped.
	#[error("service stopped")]
	ServiceStopped,
	/// The server executable could not be spawned.
	#[error("failed to spawn {command}: {reason}")]
	Spawn {
		/// The command that failed to spawn.
		command: String,
		/// Why it failed (missing, non-executable, ...).
		reason: String,
	},
	/// The embedded module failed to compile or instantiate.
	#[error("module instantiation failed: {0}")]
	Module(String),
	/// The server replied with an undecodable or invalid payload.
	#[error("deserialization failed: {0}")]
	Deserialize(#[from] serde_json::Error),
	/// The server replied with an error.
	#[error("{0}")]
	Response(#[from] ResponseError),
	/// The server violated the wire protocol.
	#[error("protocol error: {0}")]
	Protocol(String),
	/// A request did not complete within its timeout.
	#[error("request timed out: {0}")]
	RequestTimeout(String),
	/// The request was cancelled through its cancellation token.
	#[error("request cancelled")]
	Cancelled,
	/// The server does not declare the capability this operation needs.
	#[error("server does not support {0}")]
	Unsupported(&'static str),
	/// Input/output errors from the underlying channels.
	#[error("{0}")]
	Io(#[from] io::Error),
}
