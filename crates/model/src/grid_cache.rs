use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::{EntryId, Grid, GridRef};

const GRID_FILE: &str = "grid.json";

/// Cache of intermediate grids keyed by the id of the entry that produced them.
pub trait GridCache: Send + Sync + fmt::Debug {
	/// Persists `grid` and returns a handle reading from the persisted copy.
	fn cache_grid(&self, entry_id: EntryId, grid: &GridRef) -> io::Result<GridRef>;

	fn get_cached_grid(&self, entry_id: EntryId) -> io::Result<GridRef>;

	/// Removes a cached grid. Removing an absent grid is not an error.
	fn uncache_grid(&self, entry_id: EntryId) -> io::Result<()>;

	fn list_cached_grid_ids(&self) -> io::Result<BTreeSet<EntryId>>;
}

/// Grid cache held in a map, for tests and ephemeral projects.
#[derive(Debug, Default)]
pub struct MemoryGridCache {
	grids: Mutex<BTreeMap<EntryId, GridRef>>,
}

impl MemoryGridCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn contains(&self, entry_id: EntryId) -> bool {
		self.grids.lock().contains_key(&entry_id)
	}
}

impl GridCache for MemoryGridCache {
	fn cache_grid(&self, entry_id: EntryId, grid: &GridRef) -> io::Result<GridRef> {
		self.grids.lock().insert(entry_id, grid.clone());
		Ok(grid.clone())
	}

	fn get_cached_grid(&self, entry_id: EntryId) -> io::Result<GridRef> {
		self.grids
			.lock()
			.get(&entry_id)
			.cloned()
			.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no cached grid for entry {entry_id}")))
	}

	fn uncache_grid(&self, entry_id: EntryId) -> io::Result<()> {
		self.grids.lock().remove(&entry_id);
		Ok(())
	}

	fn list_cached_grid_ids(&self) -> io::Result<BTreeSet<EntryId>> {
		Ok(self.grids.lock().keys().copied().collect())
	}
}

/// Converts grids to and from their on-disk representation.
pub trait GridCodec: Send + Sync + fmt::Debug {
	fn encode(&self, grid: &dyn Grid) -> io::Result<Vec<u8>>;

	fn decode(&self, bytes: &[u8]) -> io::Result<GridRef>;
}

/// Grid cache storing one directory per entry id under a base directory.
///
/// Layout: `<base>/<entry-id>/grid.json`. Entries whose directory name is not
/// an entry id are ignored when listing.
#[derive(Debug)]
pub struct FileGridCache<C> {
	base: PathBuf,
	codec: C,
}

impl<C: GridCodec> FileGridCache<C> {
	/// Opens a cache rooted at `base`, creating the directory if needed.
	pub fn open(base: impl Into<PathBuf>, codec: C) -> io::Result<Self> {
		let base = base.into();
		fs::create_dir_all(&base)?;
		Ok(Self { base, codec })
	}

	pub fn base_dir(&self) -> &Path {
		&self.base
	}

	fn entry_dir(&self, entry_id: EntryId) -> PathBuf {
		self.base.join(entry_id.to_string())
	}
}

impl<C: GridCodec> GridCache for FileGridCache<C> {
	fn cache_grid(&self, entry_id: EntryId, grid: &GridRef) -> io::Result<GridRef> {
		let bytes = self.codec.encode(grid.as_ref())?;
		atomic_write_bytes(&self.entry_dir(entry_id).join(GRID_FILE), &bytes)?;
		tracing::debug!(entry_id, bytes = bytes.len(), "grid_cache.write");
		self.get_cached_grid(entry_id)
	}

	fn get_cached_grid(&self, entry_id: EntryId) -> io::Result<GridRef> {
		let bytes = fs::read(self.entry_dir(entry_id).join(GRID_FILE))?;
		self.codec.decode(&bytes)
	}

	fn uncache_grid(&self, entry_id: EntryId) -> io::Result<()> {
		match fs::remove_dir_all(self.entry_dir(entry_id)) {
			Ok(()) => {
				tracing::debug!(entry_id, "grid_cache.remove");
				Ok(())
			}
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err),
		}
	}

	fn list_cached_grid_ids(&self) -> io::Result<BTreeSet<EntryId>> {
		let mut ids = BTreeSet::new();
		for dir_entry in fs::read_dir(&self.base)? {
			let dir_entry = dir_entry?;
			let Some(entry_id) = dir_entry.file_name().to_str().and_then(|name| name.parse::<EntryId>().ok()) else {
				continue;
			};
			if dir_entry.path().join(GRID_FILE).is_file() {
				ids.insert(entry_id);
			}
		}
		Ok(ids)
	}
}

/// Writes `bytes` to `dest` through a temporary file in the same directory,
/// so readers see either the old contents or the new ones.
pub fn atomic_write_bytes(dest: &Path, bytes: &[u8]) -> io::Result<()> {
	let dir = dest.parent().unwrap_or_else(|| Path::new("."));
	fs::create_dir_all(dir)?;
	let mut tmp = NamedTempFile::new_in(dir)?;
	tmp.write_all(bytes)?;
	tmp.as_file().sync_all()?;
	tmp.persist(dest).map_err(|err| err.error)?;
	Ok(())
}
