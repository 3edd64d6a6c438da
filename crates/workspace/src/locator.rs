//! Binary discovery for `nargo`.
//!
//! The registry asks a [`Locator`] for the executable governing a scope.
//! The default prefers an explicit override, then `$PATH`, then the
//! conventional install locations under the home directory. A miss
//! produces a typed error whose diagnostic names everything that was
//! probed, suitable for a persistent status indicator.

use std::path::PathBuf;

use crate::settings::Settings;

/// Candidate binaries on `$PATH`; `aztec-nargo` first as the more
/// specialized toolchain.
const NARGO_BINARIES: [&str; 2] = ["aztec-nargo", "nargo"];

/// Default install locations relative to the home directory.
const INSTALL_LOCATIONS: [&str; 2] = [".aztec/bin/aztec-nargo", ".nargo/bin/nargo"];

/// No usable binary was found.
#[derive(Debug, thiserror::Error)]
#[error("{diagnostic}")]
pub struct LocateError {
	/// User-facing description listing every probed candidate.
	pub diagnostic: String,
}

/// Resolves the analysis-server executable for a scope.
pub trait Locator: Send + Sync {
	/// Find the binary the given settings select.
	fn locate(&self, settings: &Settings) -> Result<PathBuf, LocateError>;
}

/// Default locator over `$PATH` and home-directory installs.
pub struct NargoLocator {
	home: Option<PathBuf>,
}

impl Default for NargoLocator {
	fn default() -> Self {
		Self {
			home: dirs::home_dir(),
		}
	}
}

impl NargoLocator {
	/// Create a locator using the current user's home directory.
	pub fn new() -> Self {
		Self::default()
	}

	/// Create a locator probing installs under the given home directory.
	pub fn with_home(home: impl Into<PathBuf>) -> Self {
		Self {
			home: Some(home.into()),
		}
	}
}

impl Locator for NargoLocator {
	fn locate(&self, settings: &Settings) -> Result<PathBuf, LocateError> {
		if let Some(path) = &settings.binary_path {
			if path.is_file() {
				return Ok(path.clone());
			}
			return Err(LocateError {
				diagnostic: format!(
					"configured nargo binary does not exist: {}",
					path.display()
				),
			});
		}

		for bin in NARGO_BINARIES {
			if let Ok(path) = which::which(bin) {
				return Ok(path);
			}
		}

		let installs: Vec<PathBuf> = self
			.home
			.iter()
			.flat_map(|home| INSTALL_LOCATIONS.iter().map(|loc| home.join(loc)))
			.collect();
		for path in &installs {
			if path.is_file() {
				return Ok(path.clone());
			}
		}

		let mut diagnostic = String::from("could not locate any of ");
		diagnostic.push_str(&NARGO_BINARIES.join(", "));
		diagnostic.push_str(" on $PATH");
		if !installs.is_empty() {
			diagnostic.push_str(", or one of the default install locations: ");
			diagnostic.push_str(
				&installs
					.iter()
					.map(|p| p.display().to_string())
					.collect::<Vec<_>>()
					.join(", "),
			);
		}
		Err(LocateError { diagnostic })
	}
}
