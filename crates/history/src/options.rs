use serde::{Deserialize, Serialize};

use crate::Result;

/// Tunables of a [`History`](crate::History).
///
/// Parsed from TOML with kebab-case keys; missing keys take their defaults:
///
/// ```toml
/// project-id = 1234
/// memory-caching = true
/// disk-fallback = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct HistoryOptions {
	/// Project id passed to every change context.
	pub project_id: i64,
	/// Pin the chosen step in memory. When off, caching goes straight to disk.
	pub memory_caching: bool,
	/// Write the chosen step to the grid cache when pinning it fails.
	pub disk_fallback: bool,
}

impl Default for HistoryOptions {
	fn default() -> Self {
		Self {
			project_id: 0,
			memory_caching: true,
			disk_fallback: true,
		}
	}
}

impl HistoryOptions {
	pub fn from_toml_str(source: &str) -> Result<Self> {
		Ok(toml::from_str(source)?)
	}

	#[must_use]
	pub fn with_project_id(mut self, project_id: i64) -> Self {
		self.project_id = project_id;
		self
	}

	#[must_use]
	pub fn with_memory_caching(mut self, enabled: bool) -> Self {
		self.memory_caching = enabled;
		self
	}

	#[must_use]
	pub fn with_disk_fallback(mut self, enabled: bool) -> Self {
		self.disk_fallback = enabled;
		self
	}
}
