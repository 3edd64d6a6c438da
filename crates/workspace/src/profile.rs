//! Per-line aggregation of profiling results.
//!
//! The server reports opcode counts per byte span. For inline display the
//! counts are grouped by the source line a span *ends* on, and spans
//! sharing that line sum into a single annotation.

use std::collections::BTreeMap;

use noir_ide_lsp::ext::{FileId, OpcodesCounts, ProfileRunResult, SpanInFile};

/// Accumulated opcode counts of one source line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCounts {
	/// ACIR opcodes.
	pub acir_size: u64,
	/// Brillig opcodes.
	pub brillig_size: u64,
}

/// Find the file ID whose recorded path matches the document.
pub fn find_file(profile: &ProfileRunResult, path: &str) -> Option<FileId> {
	profile
		.file_map
		.iter()
		.find(|(_, info)| info.path == path)
		.map(|(id, _)| *id)
}

/// Aggregate a file's span counts into per-line sums, keyed by the
/// zero-based line the span ends on.
pub fn aggregate_by_line(
	source: &str,
	file: FileId,
	counts: &[(SpanInFile, OpcodesCounts)],
) -> BTreeMap<u32, LineCounts> {
	let mut lines: BTreeMap<u32, LineCounts> = BTreeMap::new();
	for (span, count) in counts {
		if span.file != file {
			continue;
		}
		let line = line_of_offset(source, span.span.end);
		let entry = lines.entry(line).or_default();
		entry.acir_size += count.acir_size;
		entry.brillig_size += count.brillig_size;
	}
	lines
}

/// Convenience over [`aggregate_by_line`] for a whole profiling result.
pub fn aggregate_for_path(
	profile: &ProfileRunResult,
	path: &str,
) -> Option<BTreeMap<u32, LineCounts>> {
	let file = find_file(profile, path)?;
	let source = &profile.file_map[&file].source;
	Some(aggregate_by_line(source, file, &profile.opcodes_counts))
}

/// Human-readable annotation text; zero counts are omitted.
pub fn line_label(counts: LineCounts) -> String {
	let mut parts = Vec::new();
	if counts.acir_size > 0 {
		parts.push(format!("{} ACIR", counts.acir_size));
	}
	if counts.brillig_size > 0 {
		parts.push(format!("{} Brillig", counts.brillig_size));
	}
	format!("{} opcodes", parts.join(" "))
}

/// Zero-based line containing the byte offset.
fn line_of_offset(source: &str, offset: u32) -> u32 {
	source
		.bytes()
		.take(offset as usize)
		.filter(|b| *b == b'\n')
		.count() as u32
}

#[cfg(test)]
mod tests {
	use noir_ide_lsp::ext::Span;
	use pretty_assertions::assert_eq;

	use super::*;

	fn span(file: FileId, start: u32, end: u32) -> SpanInFile {
		SpanInFile {
			file,
			span: Span { start, end },
		}
	}

	fn counts(acir_size: u64, brillig_size: u64) -> OpcodesCounts {
		OpcodesCounts {
			acir_size,
			brillig_size,
		}
	}

	#[test]
	fn spans_ending_on_one_line_fold_into_one_annotation() {
		// Offsets 10..20 and 15..18 both end on line 1.
		let source = "fn main() {\n    assert(x);\n}\n";
		let entries = vec![
			(span(0, 10, 20), counts(3, 0)),
			(span(0, 15, 18), counts(0, 2)),
		];

		let lines = aggregate_by_line(source, 0, &entries);
		assert_eq!(lines.len(), 1);
		assert_eq!(
			lines[&1],
			LineCounts {
				acir_size: 3,
				brillig_size: 2
			}
		);
	}

	#[test]
	fn other_files_are_filtered_out() {
		let source = "fn main() {}\n";
		let entries = vec![
			(span(0, 0, 4), counts(1, 0)),
			(span(7, 0, 4), counts(5, 5)),
		];
		let lines = aggregate_by_line(source, 0, &entries);
		assert_eq!(lines[&0], LineCounts {
			acir_size: 1,
			brillig_size: 0
		});
		assert_eq!(lines.len(), 1);
	}

	#[test]
	fn aggregate_for_path_resolves_the_file_id() {
		let raw = serde_json::json!({
			"file_map": {
				"2": {"path": "/proj/src/main.nr", "source": "a\nb\nc\n"}
			},
			"opcodes_counts": [
				[{"file": 2, "span": {"start": 2, "end": 3}}, {"acir_size": 4, "brillig_size": 1}]
			]
		});
		let profile: ProfileRunResult = serde_json::from_value(raw).unwrap();

		let lines = aggregate_for_path(&profile, "/proj/src/main.nr").unwrap();
		assert_eq!(lines[&1], LineCounts {
			acir_size: 4,
			brillig_size: 1
		});
		assert!(aggregate_for_path(&profile, "/proj/src/other.nr").is_none());
	}

	#[test]
	fn labels_omit_zero_counts() {
		assert_eq!(
			line_label(LineCounts {
				acir_size: 3,
				brillig_size: 2
			}),
			"3 ACIR 2 Brillig opcodes"
		);
		assert_eq!(
			line_label(LineCounts {
				acir_size: 0,
				brillig_size: 2
			}),
			"2 Brillig opcodes"
		);
	}

	#[test]
	fn offsets_past_the_end_clamp_to_the_last_line() {
		let source = "a\nb";
		let lines = aggregate_by_line(source, 0, &[(span(0, 0, 999), counts(1, 0))]);
		assert!(lines.contains_key(&1));
	}
}
