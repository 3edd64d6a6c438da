//! Scope identity and resolution.
//!
//! A scope is the workspace boundary governing a document. Documents
//! inside a workspace folder belong to the *outermost* open folder
//! containing them, so nested folders share one analysis server rooted at
//! the top. Documents outside every folder are each their own scope.

use parking_lot::RwLock;
use url::Url;

/// URI schemes that participate in scope ownership.
///
/// The host editor emits synthetic schemes (e.g. `output:`) for virtual
/// documents; those never get a client.
pub const ELIGIBLE_SCHEMES: [&str; 2] = ["file", "untitled"];

/// The governing workspace boundary of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
	/// A workspace folder; the key carries a trailing `/`.
	Folder(Url),
	/// A standalone document outside every workspace folder.
	File(Url),
}

impl Scope {
	/// Scope for a workspace folder.
	pub fn folder(uri: Url) -> Self {
		Scope::Folder(uri)
	}

	/// Scope for a standalone document.
	pub fn file(uri: Url) -> Self {
		Scope::File(uri)
	}

	/// Canonical identity of the scope.
	///
	/// Folder keys always end with `/`, which doubles as the
	/// path-segment boundary when used as a prefix.
	pub fn key(&self) -> String {
		match self {
			Scope::Folder(uri) => dirpath(uri),
			Scope::File(uri) => uri.as_str().to_owned(),
		}
	}

	/// Rebuild a scope from its canonical key.
	pub fn from_key(key: &str) -> Option<Self> {
		let uri = Url::parse(key).ok()?;
		if key.ends_with('/') {
			Some(Scope::Folder(uri))
		} else {
			Some(Scope::File(uri))
		}
	}

	/// The scope's URI.
	pub fn uri(&self) -> &Url {
		match self {
			Scope::Folder(uri) | Scope::File(uri) => uri,
		}
	}

	/// Whether the scope is a workspace folder.
	pub fn is_folder(&self) -> bool {
		matches!(self, Scope::Folder(_))
	}

	/// Filesystem root for spawning, when the scope maps to a local path.
	pub fn root_path(&self) -> Option<std::path::PathBuf> {
		match self {
			Scope::Folder(uri) => uri.to_file_path().ok(),
			Scope::File(uri) => uri
				.to_file_path()
				.ok()
				.and_then(|p| p.parent().map(|p| p.to_path_buf())),
		}
	}
}

/// A folder URI as a directory-path string with a trailing `/`.
pub fn dirpath(uri: &Url) -> String {
	let s = uri.as_str();
	if s.ends_with('/') {
		s.to_owned()
	} else {
		format!("{s}/")
	}
}

struct ResolverState {
	folders: Vec<Url>,
	/// Folder dirpaths sorted ascending by length; rebuilt lazily after
	/// the folder set changes.
	sorted: Option<Vec<String>>,
}

/// Maps documents to their governing scope.
#[derive(Default)]
pub struct ScopeResolver {
	state: RwLock<ResolverState>,
}

impl Default for ResolverState {
	fn default() -> Self {
		Self {
			folders: Vec::new(),
			sorted: None,
		}
	}
}

impl ScopeResolver {
	/// Create a resolver with no known folders.
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the set of open workspace folders.
	pub fn set_folders(&self, folders: Vec<Url>) {
		let mut state = self.state.write();
		state.folders = folders;
		state.sorted = None;
	}

	/// Apply a workspace-folder change event.
	pub fn folders_changed(&self, added: &[Url], removed: &[Url]) {
		let mut state = self.state.write();
		state.folders.retain(|f| !removed.contains(f));
		for folder in added {
			if !state.folders.contains(folder) {
				state.folders.push(folder.clone());
			}
		}
		state.sorted = None;
	}

	/// Resolve the scope governing a document.
	///
	/// Returns `None` for URI schemes that never own a scope.
	pub fn resolve_for_document(&self, uri: &Url) -> Option<Scope> {
		if !ELIGIBLE_SCHEMES.contains(&uri.scheme()) {
			return None;
		}
		match self.scan(uri.as_str()) {
			Some(folder) => Some(Scope::folder(folder)),
			None => Some(Scope::file(uri.clone())),
		}
	}

	/// The outermost open folder containing `folder`, or `folder` itself.
	pub fn outermost_folder(&self, folder: &Url) -> Url {
		self.scan(&dirpath(folder)).unwrap_or_else(|| folder.clone())
	}

	/// Shortest folder dirpath that is a true directory prefix of `target`.
	///
	/// Dirpaths end with `/`, so a match can only occur at a path-segment
	/// boundary: `/a/` matches `/a/b/c.nr` but `/ab/…` never matches `/a/`.
	fn scan(&self, target: &str) -> Option<Url> {
		{
			let state = self.state.read();
			if let Some(sorted) = &state.sorted {
				return scan_sorted(sorted, target);
			}
		}

		let mut state = self.state.write();
		let mut sorted: Vec<String> = state.folders.iter().map(dirpath).collect();
		sorted.sort_by_key(String::len);
		let found = scan_sorted(&sorted, target);
		state.sorted = Some(sorted);
		found
	}
}

fn scan_sorted(sorted: &[String], target: &str) -> Option<Url> {
	sorted
		.iter()
		.find(|dir| target.starts_with(dir.as_str()))
		.and_then(|dir| Url::parse(dir).ok())
}
