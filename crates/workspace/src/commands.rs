//! Per-scope command registration and routing.
//!
//! Each scope with a client gets a set of `nargo` task templates plus the
//! profile commands. Templates capture the binary path and flags at
//! registration time; reconciliation re-registers them, so they follow
//! configuration changes. Execution is external: the router only builds
//! [`TaskSpec`]s and hands them to the host's [`TaskRunner`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::locator::Locator;
use crate::registry::ClientRegistry;
use crate::scope::Scope;
use crate::settings::SettingsStore;
use crate::{Error, Result};

/// Grouping of a task in the host's task UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskGroup {
	/// Build-like tasks.
	Build,
	/// Test tasks.
	Test,
}

/// Ready-to-execute description of an external `nargo` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
	/// Display label, e.g. `nargo test`.
	pub label: String,
	/// The `nargo` subcommand.
	pub command: String,
	/// Executable to run.
	pub program: PathBuf,
	/// Full argument vector.
	pub args: Vec<String>,
	/// Working directory, when the scope maps to a local path.
	pub cwd: Option<PathBuf>,
	/// Task grouping.
	pub group: TaskGroup,
}

/// Executes external tasks; the execution itself is out of scope here.
pub trait TaskRunner: Send + Sync {
	/// Run the described task and surface its terminal output.
	fn execute(&self, spec: TaskSpec);
}

/// Renders cached profiling data; signalled after a refresh.
pub trait ProfileRenderer: Send + Sync {
	/// Re-read the scope's cached profile and redraw.
	fn refresh(&self, scope_key: &str);
	/// Remove any visible annotations for the scope.
	fn hide(&self, scope_key: &str);
}

/// Runner that only logs; useful for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTaskRunner;

impl TaskRunner for LogTaskRunner {
	fn execute(&self, spec: TaskSpec) {
		tracing::info!(label = %spec.label, program = %spec.program.display(), "task execution requested");
	}
}

impl ProfileRenderer for LogTaskRunner {
	fn refresh(&self, scope_key: &str) {
		tracing::debug!(scope = %scope_key, "profile refresh signalled");
	}

	fn hide(&self, scope_key: &str) {
		tracing::debug!(scope = %scope_key, "profile annotations hidden");
	}
}

/// The built-in `nargo` subcommands exposed as tasks.
const NARGO_TASKS: [(&str, TaskGroup); 4] = [
	("test", TaskGroup::Test),
	("compile", TaskGroup::Build),
	("info", TaskGroup::Build),
	("execute", TaskGroup::Build),
];

struct ScopeCommands {
	tasks: Vec<TaskSpec>,
}

/// Routes commands to the scope's client and task templates.
pub struct CommandRouter {
	registry: Arc<ClientRegistry>,
	settings: Arc<SettingsStore>,
	locator: Arc<dyn Locator>,
	runner: Arc<dyn TaskRunner>,
	renderer: Arc<dyn ProfileRenderer>,
	scopes: RwLock<HashMap<String, ScopeCommands>>,
}

impl CommandRouter {
	/// Create a router over the given collaborators.
	pub fn new(
		registry: Arc<ClientRegistry>,
		settings: Arc<SettingsStore>,
		locator: Arc<dyn Locator>,
		runner: Arc<dyn TaskRunner>,
		renderer: Arc<dyn ProfileRenderer>,
	) -> Self {
		Self {
			registry,
			settings,
			locator,
			runner,
			renderer,
			scopes: RwLock::new(HashMap::new()),
		}
	}

	/// Register the scope's commands, capturing current settings.
	pub fn register_scope(&self, scope: &Scope) -> Result<()> {
		let key = scope.key();
		let settings = self.settings.get(&key);
		let program = self.locator.locate(&settings).map_err(|e| Error::NargoNotFound {
			diagnostic: e.diagnostic,
		})?;

		let flags = settings.flags();
		let cwd = scope.root_path();
		let tasks = NARGO_TASKS
			.iter()
			.map(|(command, group)| {
				let mut args = vec![(*command).to_owned()];
				args.extend(flags.iter().cloned());
				TaskSpec {
					label: format!("nargo {command}"),
					command: (*command).to_owned(),
					program: program.clone(),
					args,
					cwd: cwd.clone(),
					group: *group,
				}
			})
			.collect();

		self.scopes.write().insert(key, ScopeCommands { tasks });
		Ok(())
	}

	/// Drop the scope's commands.
	pub fn dispose_scope(&self, scope_key: &str) {
		self.scopes.write().remove(scope_key);
	}

	/// Whether the scope currently has registered commands.
	pub fn has_scope(&self, scope_key: &str) -> bool {
		self.scopes.read().contains_key(scope_key)
	}

	/// Look up a task template.
	pub fn task(&self, scope_key: &str, command: &str) -> Option<TaskSpec> {
		self.scopes
			.read()
			.get(scope_key)?
			.tasks
			.iter()
			.find(|t| t.command == command)
			.cloned()
	}

	/// Hand a task to the external runner, appending extra arguments.
	pub fn run_task(
		&self,
		scope_key: &str,
		command: &str,
		extra_args: &[String],
	) -> Result<()> {
		let mut spec = self.task(scope_key, command).ok_or_else(|| Error::UnknownCommand {
			scope: scope_key.to_owned(),
			name: command.to_owned(),
		})?;
		spec.args.extend(extra_args.iter().cloned());
		self.runner.execute(spec);
		Ok(())
	}

	/// Fetch fresh profiling data for the scope, cache it on the client,
	/// and signal the renderer.
	pub async fn refresh_profile(
		&self,
		scope_key: &str,
		token: &CancellationToken,
	) -> Result<()> {
		let client = self
			.registry
			.get(scope_key)
			.ok_or_else(|| Error::NoClient(scope_key.to_owned()))?;
		client.refresh_profile(token).await?;
		self.renderer.refresh(scope_key);
		Ok(())
	}

	/// Hide the scope's profiling annotations.
	pub fn hide_profile(&self, scope_key: &str) {
		self.renderer.hide(scope_key);
	}

	/// Restart every scope's client.
	pub async fn restart_all(&self) {
		self.registry.restart_all().await;
	}
}
