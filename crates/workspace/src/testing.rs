//! Shared fakes for the crate's tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use noir_ide_lsp::types::{AnyNotification, AnyRequest, AnyResponse};
use noir_ide_lsp::{
	Result as LspResult, ServerConfig, ServerId, StartedServer, Transport, TransportEvent,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::observers::{ScopeStatus, StatusSink, TestSink};

/// Transport fake with controllable start/stop timing.
#[derive(Default)]
pub(crate) struct MockTransport {
	pub start_count: AtomicUsize,
	pub stop_count: AtomicUsize,
	pub fail_start: AtomicBool,
	/// When set, `start` signals `started` and then blocks on this gate.
	pub hold_start: Mutex<Option<Arc<Notify>>>,
	/// When set, `stop` blocks on this gate.
	pub hold_stop: Mutex<Option<Arc<Notify>>>,
	pub started: Notify,
	pub last_config: Mutex<Option<ServerConfig>>,
	/// Keeps event channels open so started clients stay alive.
	event_txs: Mutex<HashMap<u64, mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn last_args(&self) -> Vec<String> {
		self.last_config
			.lock()
			.as_ref()
			.map(|cfg| cfg.args.clone())
			.unwrap_or_default()
	}
}

#[async_trait::async_trait]
impl Transport for MockTransport {
	async fn start(&self, cfg: ServerConfig) -> LspResult<StartedServer> {
		self.start_count.fetch_add(1, Ordering::SeqCst);
		*self.last_config.lock() = Some(cfg.clone());
		self.started.notify_one();

		let gate = self.hold_start.lock().clone();
		if let Some(gate) = gate {
			gate.notified().await;
		}

		if self.fail_start.load(Ordering::SeqCst) {
			return Err(noir_ide_lsp::Error::Spawn {
				command: cfg.command.display().to_string(),
				reason: "mock start failure".into(),
			});
		}

		let (tx, events) = mpsc::unbounded_channel();
		self.event_txs.lock().insert(cfg.id.0, tx);
		Ok(StartedServer { id: cfg.id, events })
	}

	async fn request(
		&self,
		_server: ServerId,
		req: AnyRequest,
		_timeout: Duration,
		_token: &CancellationToken,
	) -> LspResult<AnyResponse> {
		let result = match req.method.as_str() {
			"initialize" => serde_json::json!({
				"capabilities": {
					"nargo": { "tests": { "fetch": true, "run": true, "update": true } }
				}
			}),
			_ => serde_json::Value::Null,
		};
		Ok(AnyResponse {
			id: req.id,
			result: Some(result),
			error: None,
		})
	}

	fn notify(&self, _server: ServerId, _notif: AnyNotification) -> LspResult<()> {
		Ok(())
	}

	async fn stop(&self, server: ServerId, _timeout: Duration) {
		self.stop_count.fetch_add(1, Ordering::SeqCst);
		let gate = self.hold_stop.lock().clone();
		if let Some(gate) = gate {
			gate.notified().await;
		}
		self.event_txs.lock().remove(&server.0);
	}
}

/// Locator fake that always yields a fixed path.
pub(crate) struct FixedLocator(pub PathBuf);

impl crate::locator::Locator for FixedLocator {
	fn locate(
		&self,
		_settings: &crate::settings::Settings,
	) -> Result<PathBuf, crate::locator::LocateError> {
		Ok(self.0.clone())
	}
}

/// Status sink that records every report.
#[derive(Default)]
pub(crate) struct RecordingStatus {
	pub reports: Mutex<Vec<(String, ScopeStatus)>>,
}

impl RecordingStatus {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn last_for(&self, scope_key: &str) -> Option<ScopeStatus> {
		self.reports
			.lock()
			.iter()
			.rev()
			.find(|(key, _)| key == scope_key)
			.map(|(_, status)| status.clone())
	}
}

impl StatusSink for RecordingStatus {
	fn report(&self, scope_key: &str, status: ScopeStatus) {
		self.reports.lock().push((scope_key.to_owned(), status));
	}
}

/// Test sink that counts deltas.
#[derive(Default)]
pub(crate) struct RecordingTests {
	pub updates: Mutex<Vec<(String, String)>>,
}

impl TestSink for RecordingTests {
	fn tests_updated(&self, scope_key: &str, update: noir_ide_lsp::ext::PackageTests) {
		self.updates
			.lock()
			.push((scope_key.to_owned(), update.package));
	}
}
