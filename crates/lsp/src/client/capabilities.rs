//! Capability negotiation.
//!
//! At handshake time the server declares its optional Noir extensions
//! under a `nargo` key of the initialize result's capabilities. That raw
//! shape is parsed exactly once into a [`CapabilitySet`]; every optional
//! feature gates on the typed record instead of re-inspecting JSON at
//! call sites.

use lsp_types::{
	ClientCapabilities, PublishDiagnosticsClientCapabilities, ServerCapabilities,
	TextDocumentClientCapabilities, WorkspaceClientCapabilities,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Build the capabilities advertised to the analysis server.
pub fn client_capabilities() -> ClientCapabilities {
	ClientCapabilities {
		workspace: Some(WorkspaceClientCapabilities {
			workspace_folders: Some(true),
			..Default::default()
		}),
		text_document: Some(TextDocumentClientCapabilities {
			publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
				version_support: Some(true),
				..Default::default()
			}),
			..Default::default()
		}),
		..Default::default()
	}
}

/// Test-related optional capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TestCapabilities {
	/// The server answers `tests`.
	#[serde(default)]
	pub fetch: bool,
	/// The server answers `tests/run`.
	#[serde(default)]
	pub run: bool,
	/// The server pushes `tests/update`.
	#[serde(default)]
	pub update: bool,
}

/// Typed record of the server's optional capabilities, computed once at
/// handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilitySet {
	/// Test discovery/run/update support; `None` when undeclared.
	pub tests: Option<TestCapabilities>,
}

impl CapabilitySet {
	/// Extract the record from a raw initialize result.
	pub fn from_initialize(result: &JsonValue) -> Self {
		let tests = result
			.get("capabilities")
			.and_then(|caps| caps.get("nargo"))
			.and_then(|nargo| nargo.get("tests"))
			.and_then(|tests| serde_json::from_value(tests.clone()).ok());
		Self { tests }
	}

	/// Whether `tests` can be requested.
	pub fn tests_fetch(&self) -> bool {
		self.tests.is_some_and(|t| t.fetch)
	}

	/// Whether `tests/run` can be requested.
	pub fn tests_run(&self) -> bool {
		self.tests.is_some_and(|t| t.run)
	}

	/// Whether the server pushes `tests/update`.
	pub fn tests_update(&self) -> bool {
		self.tests.is_some_and(|t| t.update)
	}
}

/// Everything learned during the initialize exchange.
#[derive(Debug, Clone)]
pub struct Handshake {
	/// Standard LSP capabilities.
	pub server: ServerCapabilities,
	/// Noir-specific capability record.
	pub nargo: CapabilitySet,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn capability_record_from_initialize() {
		let raw = serde_json::json!({
			"capabilities": {
				"textDocumentSync": 1,
				"nargo": { "tests": { "fetch": true, "run": true, "update": false } }
			}
		});
		let caps = CapabilitySet::from_initialize(&raw);
		assert!(caps.tests_fetch());
		assert!(caps.tests_run());
		assert!(!caps.tests_update());
	}

	#[test]
	fn missing_nargo_section_means_no_tests() {
		let caps =
			CapabilitySet::from_initialize(&serde_json::json!({"capabilities": {}}));
		assert!(caps.tests.is_none());
		assert!(!caps.tests_fetch());
	}
}
