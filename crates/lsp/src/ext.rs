//! Noir-specific protocol extensions.
//!
//! The analysis server speaks standard LSP plus a small custom surface for
//! test discovery, opcode profiling and macro expansion. Method types here
//! implement the [`lsp_types`] request/notification traits so they plug
//! into [`ClientHandle::request`](crate::ClientHandle::request) like any
//! standard method.

use std::collections::HashMap;

use lsp_types::notification::Notification;
use lsp_types::request::Request;
use lsp_types::{Range, TextDocumentPositionParams};
use serde::{Deserialize, Serialize};

/// Index into [`ProfileRunResult::file_map`].
pub type FileId = u32;

/// Fetch the test tree (client → server).
#[derive(Debug)]
pub enum TestsFetch {}

impl Request for TestsFetch {
	type Params = TestsFetchParams;
	type Result = Vec<PackageTests>;
	const METHOD: &'static str = "tests";
}

/// Parameters of [`TestsFetch`]; currently empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestsFetchParams {}

/// Run a single test by ID (client → server, cancellable).
#[derive(Debug)]
pub enum TestsRun {}

impl Request for TestsRun {
	type Params = TestsRunParams;
	type Result = TestRunOutcome;
	const METHOD: &'static str = "tests/run";
}

/// Parameters of [`TestsRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsRunParams {
	/// ID of the test to run, as previously reported by the server.
	pub id: String,
}

/// Result of one test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunOutcome {
	/// ID of the test that ran. Not guaranteed to echo the requested ID;
	/// callers decide how to treat a mismatch.
	pub id: String,
	/// Pass/fail/error verdict.
	pub result: TestRunStatus,
	/// Failure message; empty on pass.
	#[serde(default)]
	pub message: String,
}

/// Verdict of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestRunStatus {
	/// The test passed.
	Pass,
	/// An assertion failed.
	Fail,
	/// The test could not be executed.
	Error,
}

/// Push a test-tree delta (server → client).
#[derive(Debug)]
pub enum TestsUpdate {}

impl Notification for TestsUpdate {
	type Params = PackageTests;
	const METHOD: &'static str = "tests/update";
}

/// Tests of one package, as discovered or updated by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageTests {
	/// Package name.
	pub package: String,
	/// URI of the package root.
	pub uri: String,
	/// The package's tests; absent in deltas that only invalidate.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tests: Option<Vec<TestCase>>,
}

/// One discovered test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
	/// Stable test ID used with [`TestsRun`].
	pub id: String,
	/// Display label.
	pub label: String,
	/// URI of the defining document.
	pub uri: String,
	/// Location of the test within that document.
	pub range: Range,
}

/// Collect opcode counts for the scope's packages (client → server).
#[derive(Debug)]
pub enum ProfileRun {}

impl Request for ProfileRun {
	type Params = ProfileRunParams;
	type Result = ProfileRunResult;
	const METHOD: &'static str = "profile/run";
}

/// Parameters of [`ProfileRun`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRunParams {
	/// Package to profile; empty profiles the whole scope.
	#[serde(default)]
	pub package: String,
}

/// Result of a profiling run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileRunResult {
	/// Source files referenced by the counts, keyed by [`FileId`].
	pub file_map: HashMap<FileId, FileInfo>,
	/// Per-span opcode counts.
	pub opcodes_counts: Vec<(SpanInFile, OpcodesCounts)>,
}

/// A source file participating in a profiling run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
	/// Filesystem path of the source file.
	pub path: String,
	/// Full source text, used to map span offsets to lines.
	pub source: String,
}

/// Byte-offset span within one file's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
	/// Inclusive start offset.
	pub start: u32,
	/// Exclusive end offset.
	pub end: u32,
}

/// A span tagged with its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanInFile {
	/// File the span belongs to.
	pub file: FileId,
	/// The span itself.
	pub span: Span,
}

/// Opcode counts attributed to one span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodesCounts {
	/// ACIR opcodes generated for the span.
	pub acir_size: u64,
	/// Brillig opcodes generated for the span.
	pub brillig_size: u64,
}

/// Expand macros at a document position (client → server).
#[derive(Debug)]
pub enum Expand {}

impl Request for Expand {
	type Params = TextDocumentPositionParams;
	type Result = String;
	const METHOD: &'static str = "expand";
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn profile_result_parses_wire_shape() {
		let raw = serde_json::json!({
			"file_map": {
				"0": {"path": "/proj/src/main.nr", "source": "fn main() {}\n"}
			},
			"opcodes_counts": [
				[{"file": 0, "span": {"start": 10, "end": 20}}, {"acir_size": 3, "brillig_size": 0}],
				[{"file": 0, "span": {"start": 15, "end": 18}}, {"acir_size": 0, "brillig_size": 2}]
			]
		});

		let result: ProfileRunResult = serde_json::from_value(raw).unwrap();
		assert_eq!(result.file_map[&0].path, "/proj/src/main.nr");
		assert_eq!(result.opcodes_counts.len(), 2);
		assert_eq!(
			result.opcodes_counts[0].1,
			OpcodesCounts {
				acir_size: 3,
				brillig_size: 0
			}
		);
		assert_eq!(result.opcodes_counts[1].0.span.start, 15);
	}

	#[test]
	fn test_run_outcome_parses_all_verdicts() {
		for (raw, status) in [
			("pass", TestRunStatus::Pass),
			("fail", TestRunStatus::Fail),
			("error", TestRunStatus::Error),
		] {
			let outcome: TestRunOutcome = serde_json::from_value(serde_json::json!({
				"id": "pkg::t",
				"result": raw,
				"message": ""
			}))
			.unwrap();
			assert_eq!(outcome.result, status);
		}
	}

	#[test]
	fn update_delta_tests_are_optional() {
		let delta: PackageTests =
			serde_json::from_value(serde_json::json!({"package": "main", "uri": "file:///p/"}))
				.unwrap();
		assert!(delta.tests.is_none());
	}

	#[test]
	fn method_names_match_protocol_surface() {
		assert_eq!(TestsFetch::METHOD, "tests");
		assert_eq!(TestsRun::METHOD, "tests/run");
		assert_eq!(TestsUpdate::METHOD, "tests/update");
		assert_eq!(ProfileRun::METHOD, "profile/run");
		assert_eq!(Expand::METHOD, "expand");
	}
}
