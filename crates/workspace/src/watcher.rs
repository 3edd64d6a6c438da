//! Configuration watcher.
//!
//! Subscribes to the settings store, filters events to the recognized key
//! set, and rebuilds the affected scopes' clients under the per-scope
//! single-flight guard. The guarded body re-reads settings at execution
//! time, which is what makes dropping concurrent triggers safe.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::commands::CommandRouter;
use crate::observers::{ScopeStatus, StatusSink};
use crate::reconcile::{FlightOutcome, SingleFlight};
use crate::registry::ClientRegistry;
use crate::scope::Scope;
use crate::settings::SettingsStore;

/// Watches configuration changes and reconciles affected scopes.
pub struct ConfigWatcher;

impl ConfigWatcher {
	/// Spawn the watcher task. Aborting the handle stops it.
	pub fn spawn(
		registry: Arc<ClientRegistry>,
		commands: Arc<CommandRouter>,
		settings: Arc<SettingsStore>,
		flight: Arc<SingleFlight>,
		status: Arc<dyn StatusSink>,
	) -> JoinHandle<()> {
		let mut rx = settings.subscribe();
		tokio::spawn(async move {
			loop {
				let event = match rx.recv().await {
					Ok(event) => event,
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						// Dropped events are fine: reconciliation reads
						// settings fresh when it runs.
						tracing::warn!(skipped, "configuration events lagged");
						continue;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				};

				if !event.keys.iter().any(|key| key.reconciles()) {
					continue;
				}

				// Only scopes that were actually opened get reconciled; a
				// configuration edit for a never-seen scope starts nothing.
				let scopes: Vec<Scope> = match &event.scope {
					Some(key) => registry.known_scope(key).into_iter().collect(),
					// A default-settings change touches every known scope.
					None => registry.known_scopes(),
				};

				for scope in scopes {
					let registry = registry.clone();
					let commands = commands.clone();
					let flight = flight.clone();
					let status = status.clone();
					tokio::spawn(async move {
						let key = scope.key();
						let outcome = flight
							.try_exclusive(&key, reconcile(&scope, &registry, &commands))
							.await;
						if let FlightOutcome::Completed(Err(e)) = outcome {
							// Background failure: no user action to answer
							// to, so it lands on the persistent indicator.
							tracing::error!(scope = %key, error = %e, "reconciliation failed");
							status.report(
								&key,
								ScopeStatus::Failed {
									diagnostic: e.to_string(),
								},
							);
						}
					});
				}
			}
		})
	}
}

/// Tear down and rebuild one scope's client and commands.
async fn reconcile(
	scope: &Scope,
	registry: &ClientRegistry,
	commands: &CommandRouter,
) -> crate::Result<()> {
	let key = scope.key();
	commands.dispose_scope(&key);
	registry.remove(&key).await;
	let client = registry.ensure(scope).await?;
	if client.is_some() {
		commands.register_scope(scope)?;
	}
	Ok(())
}
