use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::change_data::{ChangeData, ChangeDataId, ChangeDataStore};
use crate::{EntryId, GridPreservation, GridRef};

/// Shared handle to an operation.
pub type OperationRef = Arc<dyn Operation>;

/// Structured, user-displayable failure of an operation.
///
/// History state is never modified when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct OperationError {
	/// Stable machine-readable code, e.g. `"bad_column"`.
	pub code: String,
	pub message: String,
}

impl OperationError {
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
		}
	}
}

/// Concrete effect of applying an operation to a grid.
#[derive(Debug, Clone)]
pub struct ChangeResult {
	pub grid: GridRef,
	pub grid_preservation: GridPreservation,
}

impl ChangeResult {
	pub fn new(grid: GridRef, grid_preservation: GridPreservation) -> Self {
		Self { grid, grid_preservation }
	}
}

/// Everything an operation may know about the step it is computing.
#[derive(Debug, Clone)]
pub struct ChangeContext {
	entry_id: EntryId,
	project_id: i64,
	store: Arc<dyn ChangeDataStore>,
	description: String,
}

impl ChangeContext {
	pub fn create(entry_id: EntryId, project_id: i64, store: Arc<dyn ChangeDataStore>, description: impl Into<String>) -> Self {
		Self {
			entry_id,
			project_id,
			store,
			description: description.into(),
		}
	}

	pub fn entry_id(&self) -> EntryId {
		self.entry_id
	}

	pub fn project_id(&self) -> i64 {
		self.project_id
	}

	pub fn description(&self) -> &str {
		&self.description
	}

	pub fn change_data_store(&self) -> &Arc<dyn ChangeDataStore> {
		&self.store
	}

	/// Returns the change data named `data_id` for this step, starting its
	/// computation if the store does not hold it yet.
	///
	/// Freshly computed data is registered as incomplete: the step keeps
	/// needing a refresh until the store is told the data is final.
	pub fn change_data<T, F>(&self, data_id: &str, compute: F) -> Arc<T>
	where
		T: Send + Sync + 'static,
		F: FnOnce() -> T,
	{
		let id = ChangeDataId::new(self.entry_id, data_id);
		if let Some(existing) = self.store.retrieve_any(&id).and_then(|data| data.downcast::<T>().ok()) {
			return existing;
		}
		let value = Arc::new(compute());
		self.store.store_any(id, value.clone() as ChangeData, false);
		value
	}
}

/// Pure description of one transformation step.
pub trait Operation: Send + Sync + fmt::Debug {
	/// Registry code identifying the operation kind in persisted histories.
	fn op_code(&self) -> &str;

	/// Human readable summary shown in the history list.
	fn description(&self) -> &str;

	/// Computes the next grid. Must not mutate `grid`.
	fn apply(&self, grid: &GridRef, context: &ChangeContext) -> Result<ChangeResult, OperationError>;

	/// Whether this operation maps rows independently of each other.
	///
	/// Row-mapping results get their columns stamped with the entry id.
	fn is_row_map(&self) -> bool {
		false
	}

	/// Operation-specific parameters, persisted next to `op` and `description`.
	fn parameters(&self) -> Map<String, Value> {
		Map::new()
	}
}
