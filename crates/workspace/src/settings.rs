//! Per-scope configuration.
//!
//! The store keeps an effective [`Settings`] per scope (falling back to a
//! default) and broadcasts which recognized keys changed. Consumers read
//! settings fresh at execution time; events only say *that* something
//! relevant changed, never carry values.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

/// Optional language features forwarded to the server at initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureToggles {
	/// Code lens annotations.
	pub code_lens: bool,
	/// Inlay hints.
	pub inlay_hints: bool,
	/// Completions.
	pub completions: bool,
	/// Signature help.
	pub signature_help: bool,
	/// Code actions.
	pub code_actions: bool,
	/// Reduced-analysis mode for large workspaces.
	pub lightweight_mode: bool,
}

impl Default for FeatureToggles {
	fn default() -> Self {
		Self {
			code_lens: true,
			inlay_hints: true,
			completions: true,
			signature_help: true,
			code_actions: true,
			lightweight_mode: false,
		}
	}
}

/// Effective configuration of one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
	/// Whether the analysis server runs at all for this scope.
	pub enabled: bool,
	/// Explicit `nargo` binary, overriding discovery.
	pub binary_path: Option<PathBuf>,
	/// Extra flags appended to every `nargo` invocation, whitespace
	/// separated.
	pub extra_flags: String,
	/// Feature toggles.
	pub features: FeatureToggles,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			enabled: true,
			binary_path: None,
			extra_flags: String::new(),
			features: FeatureToggles::default(),
		}
	}
}

impl Settings {
	/// Extra flags split into arguments, empties removed.
	pub fn flags(&self) -> Vec<String> {
		self.extra_flags
			.split_whitespace()
			.map(str::to_owned)
			.collect()
	}

	/// Arguments for launching the language server.
	pub fn lsp_args(&self) -> Vec<String> {
		let mut args = vec![String::from("lsp")];
		args.extend(self.flags());
		args
	}

	/// Initialization options forwarded to the server.
	pub fn initialization_options(&self) -> JsonValue {
		serde_json::json!({
			"enableCodeLens": self.features.code_lens,
			"enableInlayHints": self.features.inlay_hints,
			"enableCompletions": self.features.completions,
			"enableSignatureHelp": self.features.signature_help,
			"enableCodeActions": self.features.code_actions,
			"enableLightweightMode": self.features.lightweight_mode,
		})
	}
}

/// Recognized configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
	/// [`Settings::enabled`].
	Enable,
	/// [`Settings::binary_path`].
	BinaryPath,
	/// [`Settings::extra_flags`].
	ExtraFlags,
	/// [`Settings::features`].
	Features,
}

impl SettingKey {
	/// Whether a change to this key rebuilds the scope's client.
	pub fn reconciles(self) -> bool {
		match self {
			SettingKey::Enable
			| SettingKey::BinaryPath
			| SettingKey::ExtraFlags
			| SettingKey::Features => true,
		}
	}
}

/// A configuration change, scoped or global.
#[derive(Debug, Clone)]
pub struct ConfigEvent {
	/// Affected scope key; `None` means the default changed and every
	/// scope without an override is affected.
	pub scope: Option<String>,
	/// Which recognized keys changed.
	pub keys: Vec<SettingKey>,
}

struct StoreState {
	default: Settings,
	scopes: HashMap<String, Settings>,
}

/// Shared settings store with change broadcast.
pub struct SettingsStore {
	state: RwLock<StoreState>,
	tx: broadcast::Sender<ConfigEvent>,
}

impl Default for SettingsStore {
	fn default() -> Self {
		Self::new()
	}
}

impl SettingsStore {
	/// Create a store holding only defaults.
	pub fn new() -> Self {
		let (tx, _) = broadcast::channel(64);
		Self {
			state: RwLock::new(StoreState {
				default: Settings::default(),
				scopes: HashMap::new(),
			}),
			tx,
		}
	}

	/// Effective settings for a scope.
	pub fn get(&self, scope_key: &str) -> Settings {
		let state = self.state.read();
		state
			.scopes
			.get(scope_key)
			.unwrap_or(&state.default)
			.clone()
	}

	/// Replace one scope's settings, broadcasting the changed keys.
	pub fn set_scope(&self, scope_key: impl Into<String>, settings: Settings) {
		let scope_key = scope_key.into();
		let keys = {
			let mut state = self.state.write();
			let old = state
				.scopes
				.get(&scope_key)
				.unwrap_or(&state.default)
				.clone();
			let keys = diff(&old, &settings);
			state.scopes.insert(scope_key.clone(), settings);
			keys
		};
		if !keys.is_empty() {
			let _ = self.tx.send(ConfigEvent {
				scope: Some(scope_key),
				keys,
			});
		}
	}

	/// Replace the default settings, broadcasting a global event.
	pub fn set_default(&self, settings: Settings) {
		let keys = {
			let mut state = self.state.write();
			let keys = diff(&state.default, &settings);
			state.default = settings;
			keys
		};
		if !keys.is_empty() {
			let _ = self.tx.send(ConfigEvent { scope: None, keys });
		}
	}

	/// Subscribe to configuration changes.
	pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
		self.tx.subscribe()
	}
}

fn diff(old: &Settings, new: &Settings) -> Vec<SettingKey> {
	let mut keys = Vec::new();
	if old.enabled != new.enabled {
		keys.push(SettingKey::Enable);
	}
	if old.binary_path != new.binary_path {
		keys.push(SettingKey::BinaryPath);
	}
	if old.extra_flags != new.extra_flags {
		keys.push(SettingKey::ExtraFlags);
	}
	if old.features != new.features {
		keys.push(SettingKey::Features);
	}
	keys
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scope_overrides_fall_back_to_default() {
		let store = SettingsStore::new();
		assert!(store.get("file:///proj/").enabled);

		store.set_scope(
			"file:///proj/",
			Settings {
				enabled: false,
				..Settings::default()
			},
		);
		assert!(!store.get("file:///proj/").enabled);
		assert!(store.get("file:///other/").enabled);
	}

	#[test]
	fn set_scope_broadcasts_only_changed_keys() {
		let store = SettingsStore::new();
		let mut rx = store.subscribe();

		store.set_scope(
			"file:///proj/",
			Settings {
				extra_flags: "--pedantic-solving".into(),
				..Settings::default()
			},
		);

		let event = rx.try_recv().unwrap();
		assert_eq!(event.scope.as_deref(), Some("file:///proj/"));
		assert_eq!(event.keys, vec![SettingKey::ExtraFlags]);

		// Re-setting identical values is silent.
		store.set_scope(
			"file:///proj/",
			Settings {
				extra_flags: "--pedantic-solving".into(),
				..Settings::default()
			},
		);
		assert!(rx.try_recv().is_err());
	}

	#[test]
	fn lsp_args_drop_empty_flags() {
		let settings = Settings {
			extra_flags: "  --foo   --bar ".into(),
			..Settings::default()
		};
		assert_eq!(settings.lsp_args(), vec!["lsp", "--foo", "--bar"]);

		assert_eq!(Settings::default().lsp_args(), vec!["lsp"]);
	}
}
