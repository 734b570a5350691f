use gridline_model::OperationError;

use crate::HistoryEntry;

/// Error code of an add whose entry id is already taken.
pub const DUPLICATE_ENTRY_ID_CODE: &str = "duplicate_entry_id";

/// Outcome of [`History::add_entry`](crate::History::add_entry).
///
/// On failure the history is as it was before the call, except when the id
/// belonged to a future entry: that future is dropped before the operation
/// runs.
#[derive(Debug, Clone)]
pub struct OperationApplicationResult {
	outcome: Result<HistoryEntry, OperationError>,
}

impl OperationApplicationResult {
	pub fn success(entry: HistoryEntry) -> Self {
		Self { outcome: Ok(entry) }
	}

	pub fn failure(error: OperationError) -> Self {
		Self { outcome: Err(error) }
	}

	pub fn is_success(&self) -> bool {
		self.outcome.is_ok()
	}

	pub fn history_entry(&self) -> Option<&HistoryEntry> {
		self.outcome.as_ref().ok()
	}

	pub fn error(&self) -> Option<&OperationError> {
		self.outcome.as_ref().err()
	}

	pub fn into_result(self) -> Result<HistoryEntry, OperationError> {
		self.outcome
	}
}

impl From<Result<HistoryEntry, OperationError>> for OperationApplicationResult {
	fn from(outcome: Result<HistoryEntry, OperationError>) -> Self {
		Self { outcome }
	}
}
