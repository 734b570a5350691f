use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::EntryId;

/// Type-erased change data value.
pub type ChangeData = Arc<dyn Any + Send + Sync>;

/// Key of one piece of change data: the entry that produced it plus a name
/// local to that entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDataId {
	pub history_entry_id: EntryId,
	pub data_id: String,
}

impl ChangeDataId {
	pub fn new(history_entry_id: EntryId, data_id: impl Into<String>) -> Self {
		Self {
			history_entry_id,
			data_id: data_id.into(),
		}
	}

	/// Relative location of this data in a directory-per-entry layout.
	pub fn subdirectory(&self) -> String {
		format!("{}/{}", self.history_entry_id, self.data_id)
	}
}

/// Store of derived data computed alongside changes.
///
/// Only the bookkeeping side is consumed by the history engine; how data is
/// fetched or persisted belongs to the implementation.
pub trait ChangeDataStore: Send + Sync + fmt::Debug {
	/// Whether some change data of this entry is still being computed.
	fn needs_refreshing(&self, entry_id: EntryId) -> bool;

	/// Keys of every piece of change data held for this entry.
	fn change_data_ids(&self, entry_id: EntryId) -> BTreeSet<ChangeDataId>;

	fn retrieve_any(&self, id: &ChangeDataId) -> Option<ChangeData>;

	/// Stores a value. `complete == false` registers it as still in flight.
	fn store_any(&self, id: ChangeDataId, value: ChangeData, complete: bool);

	/// Drops every piece of change data of this entry.
	fn discard_all(&self, entry_id: EntryId);

	/// Releases everything the store holds. The store is unusable afterwards.
	fn dispose(&self);
}

#[derive(Default)]
struct StoreState {
	data: HashMap<ChangeDataId, ChangeData>,
	pending: BTreeSet<ChangeDataId>,
	disposed: bool,
}

/// Change data store keeping everything in memory.
#[derive(Default)]
pub struct MemoryChangeDataStore {
	state: Mutex<StoreState>,
}

impl fmt::Debug for MemoryChangeDataStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.lock();
		f.debug_struct("MemoryChangeDataStore")
			.field("entries", &state.data.len())
			.field("pending", &state.pending)
			.field("disposed", &state.disposed)
			.finish()
	}
}

impl MemoryChangeDataStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores a finished value.
	pub fn store<T: Send + Sync + 'static>(&self, id: ChangeDataId, value: T) {
		self.store_any(id, Arc::new(value), true);
	}

	/// Returns the value under `id` if present and of type `T`.
	pub fn retrieve<T: Send + Sync + 'static>(&self, id: &ChangeDataId) -> Option<Arc<T>> {
		self.retrieve_any(id)?.downcast::<T>().ok()
	}

	/// Returns the value under `id`, computing and registering it as pending
	/// if absent.
	///
	/// `compute` runs without the store lock held.
	pub fn retrieve_or_compute<T, F>(&self, id: ChangeDataId, compute: F) -> Arc<T>
	where
		T: Send + Sync + 'static,
		F: FnOnce() -> T,
	{
		if let Some(existing) = self.retrieve::<T>(&id) {
			return existing;
		}
		let value = Arc::new(compute());
		self.store_any(id, value.clone(), false);
		value
	}

	/// Marks in-flight data as final.
	pub fn mark_complete(&self, id: &ChangeDataId) {
		if self.state.lock().pending.remove(id) {
			tracing::trace!(entry_id = id.history_entry_id, data_id = %id.data_id, "change_data.complete");
		}
	}

	pub fn len(&self) -> usize {
		self.state.lock().data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn is_disposed(&self) -> bool {
		self.state.lock().disposed
	}
}

impl ChangeDataStore for MemoryChangeDataStore {
	fn needs_refreshing(&self, entry_id: EntryId) -> bool {
		self.state.lock().pending.iter().any(|id| id.history_entry_id == entry_id)
	}

	fn change_data_ids(&self, entry_id: EntryId) -> BTreeSet<ChangeDataId> {
		let state = self.state.lock();
		state.data.keys().filter(|id| id.history_entry_id == entry_id).cloned().collect()
	}

	fn retrieve_any(&self, id: &ChangeDataId) -> Option<ChangeData> {
		self.state.lock().data.get(id).cloned()
	}

	fn store_any(&self, id: ChangeDataId, value: ChangeData, complete: bool) {
		let mut state = self.state.lock();
		if state.disposed {
			tracing::warn!(entry_id = id.history_entry_id, data_id = %id.data_id, "change_data.store_after_dispose");
			return;
		}
		if complete {
			state.pending.remove(&id);
		} else {
			state.pending.insert(id.clone());
		}
		state.data.insert(id, value);
	}

	fn discard_all(&self, entry_id: EntryId) {
		let mut state = self.state.lock();
		let before = state.data.len();
		state.data.retain(|id, _| id.history_entry_id != entry_id);
		state.pending.retain(|id| id.history_entry_id != entry_id);
		tracing::trace!(entry_id, discarded = before - state.data.len(), "change_data.discard_all");
	}

	fn dispose(&self) {
		let mut state = self.state.lock();
		state.data.clear();
		state.pending.clear();
		state.disposed = true;
		tracing::debug!("change_data.dispose");
	}
}
