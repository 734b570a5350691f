use serde::{Deserialize, Serialize};

use crate::{EntryId, INITIAL_ENTRY_ID};

/// Identity of a column at a point in history: its name plus the entry that
/// last modified it.
///
/// Two grids holding the same `ColumnId` hold the same column contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnId {
	pub name: String,
	pub last_modified: EntryId,
}

impl ColumnId {
	pub fn new(name: impl Into<String>, last_modified: EntryId) -> Self {
		Self {
			name: name.into(),
			last_modified,
		}
	}
}

/// Metadata of one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
	/// Current column name.
	pub name: String,
	/// Name the column had when it was created.
	pub original_name: String,
	/// Entry that last modified this column, [`INITIAL_ENTRY_ID`] if none did.
	pub last_modified: EntryId,
}

impl ColumnMetadata {
	/// Creates metadata for a column untouched since the initial grid.
	pub fn new(name: impl Into<String>) -> Self {
		let name = name.into();
		Self {
			original_name: name.clone(),
			name,
			last_modified: INITIAL_ENTRY_ID,
		}
	}

	#[must_use]
	pub fn with_last_modified(mut self, entry_id: EntryId) -> Self {
		self.last_modified = entry_id;
		self
	}

	pub fn id(&self) -> ColumnId {
		ColumnId::new(self.name.clone(), self.last_modified)
	}
}

/// Ordered list of columns of a grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnModel {
	columns: Vec<ColumnMetadata>,
}

impl ColumnModel {
	pub fn new(columns: Vec<ColumnMetadata>) -> Self {
		Self { columns }
	}

	/// Builds a model of untouched columns from their names.
	pub fn from_names<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::new(names.into_iter().map(ColumnMetadata::new).collect())
	}

	pub fn columns(&self) -> &[ColumnMetadata] {
		&self.columns
	}

	pub fn len(&self) -> usize {
		self.columns.len()
	}

	pub fn is_empty(&self) -> bool {
		self.columns.is_empty()
	}

	pub fn column_by_name(&self, name: &str) -> Option<&ColumnMetadata> {
		self.columns.iter().find(|c| c.name == name)
	}

	/// Returns true if a column with exactly this name and modification stamp exists.
	pub fn contains_column_id(&self, id: &ColumnId) -> bool {
		self.column_by_name(&id.name).is_some_and(|c| c.last_modified == id.last_modified)
	}

	/// Returns a copy where every column is stamped as last modified by `entry_id`.
	#[must_use]
	pub fn mark_columns_as_modified(&self, entry_id: EntryId) -> Self {
		Self {
			columns: self.columns.iter().cloned().map(|c| c.with_last_modified(entry_id)).collect(),
		}
	}
}
