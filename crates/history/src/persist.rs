//! On-disk layout of a history: `<dir>/history.json` holding the entry list
//! and the current position. Grid caches are persisted separately.

use std::fs;
use std::path::Path;

use gridline_model::{GridRef, atomic_write_bytes};
use serde::{Deserialize, Serialize, Serializer};

use crate::entry::EntryRecord;
use crate::{History, HistoryEntry, HistoryError, HistoryOptions, HistoryStores, OperationRegistry, Result};

pub const HISTORY_FILE_NAME: &str = "history.json";

/// Everything needed to rebuild a [`History`] next to its initial grid and
/// stores.
#[derive(Debug, Clone)]
pub struct HistoryManifest {
	pub entries: Vec<HistoryEntry>,
	pub position: usize,
}

#[derive(Serialize, Deserialize)]
struct ManifestRecord {
	entries: Vec<EntryRecord>,
	position: usize,
}

impl Serialize for HistoryManifest {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		ManifestRecord {
			entries: self.entries.iter().map(HistoryEntry::to_record).collect(),
			position: self.position,
		}
		.serialize(serializer)
	}
}

impl HistoryManifest {
	/// Parses a manifest, decoding operations through `registry`.
	pub fn from_json_slice(bytes: &[u8], registry: &OperationRegistry) -> Result<Self> {
		let record: ManifestRecord = serde_json::from_slice(bytes)?;
		let entries = record
			.entries
			.into_iter()
			.map(|entry| HistoryEntry::from_record(entry, registry))
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			entries,
			position: record.position,
		})
	}
}

/// Atomically writes the manifest of `history` to `<dir>/history.json`.
pub fn save_history(dir: &Path, history: &History) -> Result<()> {
	let path = dir.join(HISTORY_FILE_NAME);
	let bytes = serde_json::to_vec_pretty(&history.manifest())?;
	atomic_write_bytes(&path, &bytes).map_err(|source| HistoryError::Io { path: path.clone(), source })?;
	tracing::debug!(path = %path.display(), entries = history.entries().len(), position = history.position(), "history.saved");
	Ok(())
}

/// Reads `<dir>/history.json` and replays it on top of `initial_grid`.
///
/// Fails if the stored position cannot be reached.
pub fn load_history(
	dir: &Path,
	registry: &OperationRegistry,
	initial_grid: GridRef,
	stores: HistoryStores,
	options: HistoryOptions,
) -> Result<History> {
	let path = dir.join(HISTORY_FILE_NAME);
	let bytes = fs::read(&path).map_err(|source| HistoryError::Io { path: path.clone(), source })?;
	let manifest = HistoryManifest::from_json_slice(&bytes, registry)?;
	tracing::debug!(path = %path.display(), entries = manifest.entries.len(), position = manifest.position, "history.loading");
	History::replay(initial_grid, stores, manifest.entries, manifest.position, options)
}
