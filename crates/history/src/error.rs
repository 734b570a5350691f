//! Error types for the history engine.

use std::io;
use std::path::PathBuf;

use gridline_model::{EntryId, OperationError};
use thiserror::Error;

/// Errors surfaced by [`History`](crate::History) and its persistence layer.
///
/// Operation failures during [`History::add_entry`](crate::History::add_entry)
/// are not errors: they are reported through
/// [`OperationApplicationResult`](crate::OperationApplicationResult).
#[derive(Debug, Error)]
pub enum HistoryError {
	/// No entry with this id exists in the history.
	#[error("history entry with id {0} not found")]
	UnknownEntryId(EntryId),

	/// A position outside `0..=len` was requested.
	#[error("position {position} is out of range for a history of {len} entries")]
	InvalidPosition { position: usize, len: usize },

	/// Replaying a persisted history failed. Fatal for construction.
	#[error("replaying entry {entry_id} (step {position}) failed: {source}")]
	Replay {
		position: usize,
		entry_id: EntryId,
		#[source]
		source: OperationError,
	},

	/// A step required by the caller could not be rebuilt.
	#[error("recomputing entry {entry_id} (step {position}) failed: {source}")]
	Recompute {
		position: usize,
		entry_id: EntryId,
		#[source]
		source: OperationError,
	},

	/// Explicit grid cache maintenance failed.
	#[error("grid cache I/O for entry {entry_id} failed: {source}")]
	CacheIo {
		entry_id: EntryId,
		#[source]
		source: io::Error,
	},

	/// A registered decoder rejected the persisted parameters of an operation.
	#[error("operation '{op}' cannot be decoded: {source}")]
	InvalidOperation {
		op: String,
		#[source]
		source: OperationError,
	},

	/// Reading or writing persisted history failed.
	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("malformed history JSON: {0}")]
	Json(#[from] serde_json::Error),

	#[error("malformed history options: {0}")]
	Options(#[from] toml::de::Error),
}

impl HistoryError {
	/// Reclassifies a recomputation failure as a replay failure.
	pub(crate) fn into_replay(self) -> Self {
		match self {
			Self::Recompute { position, entry_id, source } => Self::Replay { position, entry_id, source },
			other => other,
		}
	}
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
