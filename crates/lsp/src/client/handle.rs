//! Public handle to one running analysis server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lsp_types::notification::Notification;
use lsp_types::request::Request;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tokio::sync::{OnceCell, watch};
use tokio_util::sync::CancellationToken;

use crate::ext::{
	Expand, PackageTests, ProfileRun, ProfileRunParams, ProfileRunResult, TestRunOutcome,
	TestsFetch, TestsFetchParams, TestsRun, TestsRunParams,
};
use crate::transport::{ServerId, Transport};
use crate::types::{AnyNotification, AnyRequest, RequestId};
use crate::{Error, Result};

use super::capabilities::{CapabilitySet, Handshake};
use super::state::ConnectionState;

type NotificationHandler = Box<dyn Fn(JsonValue) + Send + Sync>;

/// Handle to one running analysis server.
///
/// Cloning is cheap; all clones address the same connection. The handle
/// survives the connection's death; requests then fail with
/// [`Error::ServiceStopped`].
#[derive(Clone)]
pub struct ClientHandle {
	inner: Arc<ClientShared>,
}

pub(super) struct ClientShared {
	pub(super) id: ServerId,
	pub(super) scope: url::Url,
	pub(super) command: String,
	pub(super) generation: u64,
	pub(super) transport: Arc<dyn Transport>,
	pub(super) handshake: OnceCell<Handshake>,
	pub(super) state_tx: watch::Sender<ConnectionState>,
	pub(super) request_timeout: Duration,
	pub(super) handlers: RwLock<HashMap<String, NotificationHandler>>,
	pub(super) profile: RwLock<Option<ProfileRunResult>>,
}

impl std::fmt::Debug for ClientHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClientHandle")
			.field("id", &self.inner.id)
			.field("scope", &self.inner.scope.as_str())
			.field("command", &self.inner.command)
			.field("generation", &self.inner.generation)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl ClientHandle {
	pub(super) fn new(
		id: ServerId,
		scope: url::Url,
		command: String,
		generation: u64,
		transport: Arc<dyn Transport>,
		request_timeout: Duration,
	) -> Self {
		let (state_tx, _) = watch::channel(ConnectionState::Starting);
		Self {
			inner: Arc::new(ClientShared {
				id,
				scope,
				command,
				generation,
				transport,
				handshake: OnceCell::new(),
				state_tx,
				request_timeout,
				handlers: RwLock::new(HashMap::new()),
				profile: RwLock::new(None),
			}),
		}
	}

	/// The connection's identifier on its transport.
	pub fn id(&self) -> ServerId {
		self.inner.id
	}

	/// The scope this client serves.
	pub fn scope(&self) -> &url::Url {
		&self.inner.scope
	}

	/// Display name of the launched server (binary path or module name).
	pub fn command(&self) -> &str {
		&self.inner.command
	}

	/// Generation of this client under its scope.
	pub fn generation(&self) -> u64 {
		self.inner.generation
	}

	/// Current connection state.
	pub fn state(&self) -> ConnectionState {
		*self.inner.state_tx.borrow()
	}

	pub(super) fn set_state(&self, state: ConnectionState) {
		// send_replace: the value must update even with no subscribers.
		let _ = self.inner.state_tx.send_replace(state);
	}

	/// Whether the handshake completed and the connection is live.
	pub fn is_ready(&self) -> bool {
		self.state() == ConnectionState::Ready
	}

	/// Wait until the connection is ready for requests.
	///
	/// Fails with [`Error::ServiceStopped`] if it dies first.
	pub async fn wait_ready(&self) -> Result<()> {
		let mut state_rx = self.inner.state_tx.subscribe();
		loop {
			let current = *state_rx.borrow();
			match current {
				ConnectionState::Ready => return Ok(()),
				ConnectionState::Dead => return Err(Error::ServiceStopped),
				ConnectionState::Starting => {
					if state_rx.changed().await.is_err() {
						return Err(Error::ServiceStopped);
					}
				}
			}
		}
	}

	pub(super) fn set_handshake(&self, handshake: Handshake) {
		let _ = self.inner.handshake.set(handshake);
	}

	/// Handshake data, once initialization has completed.
	pub fn handshake(&self) -> Option<&Handshake> {
		self.inner.handshake.get()
	}

	/// The server's typed capability record.
	pub fn capabilities(&self) -> CapabilitySet {
		self.handshake().map(|h| h.nargo).unwrap_or_default()
	}

	/// Register a handler for a server-to-client notification method.
	///
	/// One handler per method; a later registration replaces the earlier.
	pub fn on_notification(
		&self,
		method: impl Into<String>,
		handler: impl Fn(JsonValue) + Send + Sync + 'static,
	) {
		self.inner
			.handlers
			.write()
			.insert(method.into(), Box::new(handler));
	}

	pub(super) fn dispatch_notification(&self, notif: AnyNotification) {
		let handlers = self.inner.handlers.read();
		match handlers.get(&notif.method) {
			Some(handler) => handler(notif.params),
			None => tracing::debug!(
				server = %self.inner.id,
				method = %notif.method,
				"unhandled notification"
			),
		}
	}

	/// Send a raw request by method name.
	pub async fn request_raw(
		&self,
		method: &str,
		params: JsonValue,
		token: &CancellationToken,
	) -> Result<JsonValue> {
		let req = AnyRequest {
			// Placeholder; the transport assigns the real ID.
			id: RequestId::Number(0),
			method: method.into(),
			params,
		};
		let resp = self
			.inner
			.transport
			.request(self.inner.id, req, self.inner.request_timeout, token)
			.await?;
		match resp.error {
			None => Ok(resp.result.unwrap_or(JsonValue::Null)),
			Some(err) => Err(Error::Response(err)),
		}
	}

	/// Send a typed request.
	pub async fn request<R: Request>(
		&self,
		params: R::Params,
		token: &CancellationToken,
	) -> Result<R::Result> {
		let raw = self
			.request_raw(R::METHOD, serde_json::to_value(params)?, token)
			.await?;
		Ok(serde_json::from_value(raw)?)
	}

	/// Send a raw notification by method name.
	pub fn notify_raw(&self, method: &str, params: JsonValue) -> Result<()> {
		self.inner.transport.notify(
			self.inner.id,
			AnyNotification {
				method: method.into(),
				params,
			},
		)
	}

	/// Send a typed notification.
	pub fn notify<N: Notification>(&self, params: N::Params) -> Result<()> {
		self.notify_raw(N::METHOD, serde_json::to_value(params)?)
	}

	/// Fetch the test tree.
	pub async fn fetch_tests(&self, token: &CancellationToken) -> Result<Vec<PackageTests>> {
		if !self.capabilities().tests_fetch() {
			return Err(Error::Unsupported("tests"));
		}
		self.request::<TestsFetch>(TestsFetchParams::default(), token)
			.await
	}

	/// Run one test by ID.
	pub async fn run_test(
		&self,
		id: impl Into<String>,
		token: &CancellationToken,
	) -> Result<TestRunOutcome> {
		if !self.capabilities().tests_run() {
			return Err(Error::Unsupported("tests/run"));
		}
		self.request::<TestsRun>(TestsRunParams { id: id.into() }, token)
			.await
	}

	/// Subscribe to test-tree deltas.
	///
	/// Gated on the server's `tests.update` capability, so this must be
	/// called after the handshake.
	pub fn on_tests_update(
		&self,
		handler: impl Fn(PackageTests) + Send + Sync + 'static,
	) -> Result<()> {
		if !self.capabilities().tests_update() {
			return Err(Error::Unsupported("tests/update"));
		}
		self.on_notification(crate::ext::TestsUpdate::METHOD, move |params| {
			match serde_json::from_value(params) {
				Ok(update) => handler(update),
				Err(e) => tracing::warn!(error = %e, "malformed tests/update payload"),
			}
		});
		Ok(())
	}

	/// Run the profiler and cache its result on the client.
	pub async fn refresh_profile(&self, token: &CancellationToken) -> Result<ProfileRunResult> {
		let result = self
			.request::<ProfileRun>(ProfileRunParams::default(), token)
			.await?;
		*self.inner.profile.write() = Some(result.clone());
		Ok(result)
	}

	/// Last cached profiling result, if any.
	pub fn profile_result(&self) -> Option<ProfileRunResult> {
		self.inner.profile.read().clone()
	}

	/// Expand macros at a document position.
	pub async fn expand(
		&self,
		params: lsp_types::TextDocumentPositionParams,
		token: &CancellationToken,
	) -> Result<String> {
		self.request::<Expand>(params, token).await
	}

	/// Stop the server.
	///
	/// Best-effort graceful shutdown first, then the transport terminates
	/// the process or module after `timeout`. Always resolves; failures
	/// are logged, never returned.
	pub async fn stop(&self, timeout: Duration) {
		if self.is_ready() {
			// The graceful exchange shares the caller's budget; a stuck
			// server must not stall shutdown beyond it.
			let graceful = async {
				let token = CancellationToken::new();
				if let Err(e) = self
					.request_raw(
						lsp_types::request::Shutdown::METHOD,
						JsonValue::Null,
						&token,
					)
					.await
				{
					tracing::debug!(server = %self.inner.id, error = %e, "shutdown request failed");
				}
				if let Err(e) =
					self.notify_raw(lsp_types::notification::Exit::METHOD, JsonValue::Null)
				{
					tracing::debug!(server = %self.inner.id, error = %e, "exit notification failed");
				}
			};
			if tokio::time::timeout(timeout, graceful).await.is_err() {
				tracing::debug!(server = %self.inner.id, "graceful shutdown timed out");
			}
		}
		self.inner.transport.stop(self.inner.id, timeout).await;
		self.set_state(ConnectionState::Dead);
	}
}
