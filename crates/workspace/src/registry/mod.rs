//! Client registry: single owner of analysis-server lifetimes.
//!
//! One [`ClientRecord`] per scope key. All mutation routes through
//! [`ClientRegistry::ensure`] / [`ClientRegistry::remove`] /
//! [`ClientRegistry::restart`]; nothing else writes the map.
//!
//! `ensure` uses a leader-elected in-flight map so the "does the scope
//! already have a client" check and the start that follows form one
//! atomic section per scope: two concurrent document-open events can
//! never spawn two servers for one scope. Each (re)start bumps the
//! scope's generation, and every deferred completion re-checks the
//! generation before touching the map, so a stop that finishes late can
//! never clobber the scope's next client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use noir_ide_lsp::{ClientConfig, ClientHandle, ServerId, Transport, start_client};
use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};

use crate::locator::Locator;
use crate::observers::{ScopeStatus, StatusSink, TestSink};
use crate::scope::Scope;
use crate::settings::SettingsStore;
use crate::{Error, Result};


/// Budget for graceful shutdown before the server is force-terminated.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of a scope's record. Absent scopes have no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
	/// A start is in flight.
	Starting,
	/// The client is live.
	Running,
	/// A stop is in flight.
	Stopping,
}

struct ClientRecord {
	scope: Scope,
	status: RecordStatus,
	generation: u64,
	handle: Option<ClientHandle>,
}

struct RegistryState {
	records: HashMap<String, ClientRecord>,
	/// Per-scope generation counters. These outlive record removal so a
	/// scope's generations stay strictly increasing across restarts.
	generations: HashMap<String, u64>,
	/// Scopes that have been ensured at least once, including currently
	/// disabled ones. The watcher reconciles these; [`Self::records`]
	/// only holds the live subset.
	known: HashMap<String, Scope>,
	next_server_id: u64,
}

/// Result published to concurrent `ensure` waiters. The real error stays
/// with the leader; waiters get a rendered summary.
type StartSignal = Option<std::result::Result<Option<ClientHandle>, String>>;

struct InFlightStart {
	tx: watch::Sender<StartSignal>,
	rx: watch::Receiver<StartSignal>,
}

/// Mapping from scope key to its client, with single-flight starts.
pub struct ClientRegistry {
	state: RwLock<RegistryState>,
	inflight: Arc<Mutex<HashMap<String, Arc<InFlightStart>>>>,
	transport: Arc<dyn Transport>,
	settings: Arc<SettingsStore>,
	locator: Arc<dyn Locator>,
	status: Arc<dyn StatusSink>,
	tests: Arc<dyn TestSink>,
}

impl ClientRegistry {
	/// Create an empty registry.
	pub fn new(
		transport: Arc<dyn Transport>,
		settings: Arc<SettingsStore>,
		locator: Arc<dyn Locator>,
		status: Arc<dyn StatusSink>,
		tests: Arc<dyn TestSink>,
	) -> Self {
		Self {
			state: RwLock::new(RegistryState {
				records: HashMap::new(),
				generations: HashMap::new(),
				known: HashMap::new(),
				next_server_id: 0,
			}),
			inflight: Arc::new(Mutex::new(HashMap::new())),
			transport,
			settings,
			locator,
			status,
			tests,
		}
	}

	/// The running client for a scope key, if any.
	pub fn get(&self, scope_key: &str) -> Option<ClientHandle> {
		let state = self.state.read();
		let record = state.records.get(scope_key)?;
		if record.status == RecordStatus::Running {
			record.handle.clone()
		} else {
			None
		}
	}

	/// Current status of a scope's record; `None` means Absent.
	pub fn status(&self, scope_key: &str) -> Option<RecordStatus> {
		self.state.read().records.get(scope_key).map(|r| r.status)
	}

	/// Scopes with a record, in no particular order.
	pub fn scopes(&self) -> Vec<Scope> {
		self.state
			.read()
			.records
			.values()
			.map(|r| r.scope.clone())
			.collect()
	}

	/// Every scope ensured at least once, including currently disabled
	/// ones.
	pub fn known_scopes(&self) -> Vec<Scope> {
		self.state.read().known.values().cloned().collect()
	}

	/// The known scope behind a key, if it was ever ensured.
	pub fn known_scope(&self, scope_key: &str) -> Option<Scope> {
		self.state.read().known.get(scope_key).cloned()
	}

	/// Number of live records.
	pub fn len(&self) -> usize {
		self.state.read().records.len()
	}

	/// Whether the registry holds no records.
	pub fn is_empty(&self) -> bool {
		self.state.read().records.is_empty()
	}

	/// Lazily start (or return) the scope's client.
	///
	/// Idempotent: a Starting entry is awaited, a Running entry returned
	/// as-is. Returns `Ok(None)` when the scope's settings disable the
	/// server. A failed start leaves the scope Absent with the failure on
	/// the status sink; the next call tries again.
	pub async fn ensure(&self, scope: &Scope) -> Result<Option<ClientHandle>> {
		let key = scope.key();

		// Fast path.
		if let Some(handle) = self.get(&key) {
			return Ok(Some(handle));
		}

		// Leader election: exactly one concurrent caller starts the
		// client, everyone else waits on its published outcome.
		let (flight, is_leader) = {
			let mut inflight = self.inflight.lock().await;
			if let Some(flight) = inflight.get(&key) {
				(flight.clone(), false)
			} else {
				let (tx, rx) = watch::channel(None);
				let flight = Arc::new(InFlightStart { tx, rx });
				inflight.insert(key.clone(), flight.clone());
				(flight, true)
			}
		};

		if !is_leader {
			return self.await_leader(&key, &flight).await;
		}

		let mut guard = StartGuard::new(key.clone(), self.inflight.clone(), flight, self);
		// Re-check under the claim: a previous leader may have finished
		// between our fast path and the election.
		if let Some(handle) = self.get(&key) {
			return guard.complete(Ok(Some(handle)));
		}

		// Remember the scope even if it turns out disabled, so a later
		// configuration change can bring it back.
		self.state.write().known.insert(key.clone(), scope.clone());

		// Settings are read here, at execution time, never at trigger
		// time.
		let settings = self.settings.get(&key);
		if !settings.enabled {
			return guard.complete(Ok(None));
		}

		let command = match self.locator.locate(&settings) {
			Ok(command) => command,
			Err(e) => {
				let err = Error::NargoNotFound {
					diagnostic: e.diagnostic,
				};
				self.status.report(
					&key,
					ScopeStatus::Failed {
						diagnostic: err.to_string(),
					},
				);
				return guard.complete(Err(err));
			}
		};

		// Claim the scope: insert a Starting record under a new
		// generation before any suspension point.
		let (generation, server_id) = {
			let mut state = self.state.write();
			let generation = state.generations.get(&key).copied().unwrap_or(0) + 1;
			state.generations.insert(key.clone(), generation);
			let server_id = ServerId(state.next_server_id);
			state.next_server_id += 1;
			state.records.insert(
				key.clone(),
				ClientRecord {
					scope: scope.clone(),
					status: RecordStatus::Starting,
					generation,
					handle: None,
				},
			);
			(generation, server_id)
		};
		guard.note_claim(server_id, generation);
		self.status.report(&key, ScopeStatus::Starting);

		tracing::info!(scope = %key, command = %command.display(), generation, "starting analysis server");

		let mut config = ClientConfig::new(scope.uri().clone(), command)
			.folder(scope.is_folder())
			.args(settings.lsp_args())
			.generation(generation)
			.initialization_options(settings.initialization_options());
		if let Some(root) = scope.root_path() {
			config = config.root(root);
		}

		match start_client(self.transport.clone(), server_id, config).await {
			Ok(handle) => {
				let registered = {
					let mut state = self.state.write();
					match state.records.get_mut(&key) {
						Some(record) if record.generation == generation => {
							record.status = RecordStatus::Running;
							record.handle = Some(handle.clone());
							true
						}
						// Superseded while starting (e.g. shutdown_all).
						_ => false,
					}
				};
				if !registered {
					tracing::warn!(scope = %key, generation, "start superseded; stopping fresh client");
					let orphan = handle.clone();
					tokio::spawn(async move { orphan.stop(STOP_TIMEOUT).await });
					return guard.complete(Ok(None));
				}

				self.wire_optional_features(&key, &handle);
				self.status.report(
					&key,
					ScopeStatus::Running {
						command: handle.command().to_owned(),
					},
				);
				guard.complete(Ok(Some(handle)))
			}
			Err(e) => {
				// Failed start returns the scope to Absent; no retry
				// until the next document-open or explicit restart.
				{
					let mut state = self.state.write();
					if state
						.records
						.get(&key)
						.is_some_and(|r| r.generation == generation)
					{
						state.records.remove(&key);
					}
				}
				let err = Error::Client(e);
				self.status.report(
					&key,
					ScopeStatus::Failed {
						diagnostic: err.to_string(),
					},
				);
				guard.complete(Err(err))
			}
		}
	}

	/// Wire capability-gated features, consulting the typed record
	/// computed at handshake.
	fn wire_optional_features(&self, key: &str, handle: &ClientHandle) {
		if handle.capabilities().tests_update() {
			let sink = self.tests.clone();
			let scope_key = key.to_owned();
			// Gating already checked; registration cannot fail here.
			let _ = handle.on_tests_update(move |update| {
				sink.tests_updated(&scope_key, update);
			});
		}
	}

	async fn await_leader(
		&self,
		key: &str,
		flight: &Arc<InFlightStart>,
	) -> Result<Option<ClientHandle>> {
		let mut rx = flight.rx.clone();
		loop {
			let outcome = rx.borrow().clone();
			if let Some(outcome) = outcome {
				return outcome.map_err(|reason| Error::StartFailed {
					scope: key.to_owned(),
					reason,
				});
			}
			if rx.changed().await.is_err() {
				return Err(Error::StartFailed {
					scope: key.to_owned(),
					reason: "leader dropped without a result".into(),
				});
			}
		}
	}

	/// Wait until the start that is currently in flight for the key (if
	/// any) has published its outcome. Records are updated before the
	/// outcome is published, so the map is consistent on return.
	async fn settle_inflight(&self, key: &str) {
		let flight = { self.inflight.lock().await.get(key).cloned() };
		let Some(flight) = flight else { return };
		let mut rx = flight.rx.clone();
		loop {
			if rx.borrow().is_some() {
				return;
			}
			if rx.changed().await.is_err() {
				return;
			}
		}
	}

	/// Stop and remove the scope's client. No-op if absent.
	///
	/// Waits for an in-flight start to settle first, so a reconciliation
	/// that follows always rebuilds from the newest settings. The final
	/// delete is generation-checked: if a newer client claimed the scope
	/// while this stop was in flight, the record stays.
	pub async fn remove(&self, scope_key: &str) {
		self.settle_inflight(scope_key).await;

		let (handle, generation) = {
			let mut state = self.state.write();
			match state.records.get_mut(scope_key) {
				None => return,
				// Another remover owns the stop.
				Some(record) if record.status == RecordStatus::Stopping => return,
				Some(record) => {
					record.status = RecordStatus::Stopping;
					(record.handle.take(), record.generation)
				}
			}
		};

		if let Some(handle) = handle {
			tracing::info!(scope = %scope_key, generation, "stopping analysis server");
			handle.stop(STOP_TIMEOUT).await;
		}

		let removed = {
			let mut state = self.state.write();
			if state
				.records
				.get(scope_key)
				.is_some_and(|r| r.generation == generation)
			{
				state.records.remove(scope_key);
				true
			} else {
				false
			}
		};
		if removed {
			self.status.report(scope_key, ScopeStatus::Stopped);
		} else {
			tracing::debug!(scope = %scope_key, generation, "stop completed for a superseded generation");
		}
	}

	/// Stop-then-start the scope's client, preserving its identity and
	/// strictly increasing its generation.
	pub async fn restart(&self, scope: &Scope) -> Result<Option<ClientHandle>> {
		self.remove(&scope.key()).await;
		self.ensure(scope).await
	}

	/// Restart every scope. Per-scope stop-then-start stays ordered;
	/// different scopes restart concurrently.
	pub async fn restart_all(&self) {
		let scopes = self.scopes();
		let restarts = scopes.iter().map(|scope| async move {
			if let Err(e) = self.restart(scope).await {
				tracing::warn!(scope = %scope.key(), error = %e, "restart failed");
			}
		});
		join_all(restarts).await;
	}

	/// Stop the scope's client and forget the scope entirely; used when
	/// its workspace folder closes.
	pub async fn forget(&self, scope_key: &str) {
		self.remove(scope_key).await;
		self.state.write().known.remove(scope_key);
	}

	/// Stop every client and drain the registry.
	pub async fn shutdown_all(&self) {
		let keys: Vec<String> = {
			let state = self.state.read();
			state.records.keys().cloned().collect()
		};
		join_all(keys.iter().map(|key| self.remove(key))).await;
		self.state.write().known.clear();
	}
}

/// Un-wedges the in-flight map if the leader fails or is cancelled, so
/// waiters never hang and a later `ensure` can retry.
struct StartGuard<'a> {
	key: String,
	inflight: Arc<Mutex<HashMap<String, Arc<InFlightStart>>>>,
	flight: Arc<InFlightStart>,
	registry: &'a ClientRegistry,
	claim: Option<(ServerId, u64)>,
	completed: bool,
}

impl<'a> StartGuard<'a> {
	fn new(
		key: String,
		inflight: Arc<Mutex<HashMap<String, Arc<InFlightStart>>>>,
		flight: Arc<InFlightStart>,
		registry: &'a ClientRegistry,
	) -> Self {
		Self {
			key,
			inflight,
			flight,
			registry,
			claim: None,
			completed: false,
		}
	}

	fn note_claim(&mut self, server_id: ServerId, generation: u64) {
		self.claim = Some((server_id, generation));
	}

	fn complete(mut self, res: Result<Option<ClientHandle>>) -> Result<Option<ClientHandle>> {
		self.completed = true;

		// Publish to waiters first, then unwedge the map; a caller
		// cancelled between the two can no longer hurt anyone.
		let summary = match &res {
			Ok(handle) => Ok(handle.clone()),
			Err(e) => Err(e.to_string()),
		};
		let _ = self.flight.tx.send(Some(summary));

		let key = self.key.clone();
		let inflight = self.inflight.clone();
		tokio::spawn(async move {
			inflight.lock().await.remove(&key);
		});

		res
	}
}

impl Drop for StartGuard<'_> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}

		// Leader exited early: roll back the claim, stop a server that
		// may already be up, unblock waiters, and unwedge the map.
		let key = self.key.clone();
		let inflight = self.inflight.clone();
		let tx = self.flight.tx.clone();
		let transport = self.registry.transport.clone();
		let spawned = if let Some((server_id, generation)) = self.claim {
			let mut st = self.registry.state.write();
			if st
				.records
				.get(&key)
				.is_some_and(|r| r.generation == generation && r.status == RecordStatus::Starting)
			{
				st.records.remove(&key);
			}
			Some(server_id)
		} else {
			None
		};

		tokio::spawn(async move {
			if let Some(server_id) = spawned {
				transport.stop(server_id, STOP_TIMEOUT).await;
			}
			inflight.lock().await.remove(&key);
			let _ = tx.send(Some(Err(String::from("start aborted (leader cancelled)"))));
		});
	}
}
