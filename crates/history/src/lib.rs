//! Versioned grid history.
//!
//! A [`History`] tracks a linear sequence of operations applied to an
//! immutable initial grid. Clients add entries, move back and forth with
//! [`History::undo_redo`], and read the grid at the current position. Steps
//! are recomputed lazily from the nearest computed ancestor, and one step at
//! or behind the current position is kept resident in memory (or in the grid
//! cache) by a cancellable background attempt.
//!
//! Persistence lives in [`save_history`] / [`load_history`]: entries are
//! written as JSON and operations are rebuilt through an explicit
//! [`OperationRegistry`].

mod entry;
mod error;
mod expense;
mod history;
mod options;
mod outcome;
mod persist;
mod registry;

pub use entry::HistoryEntry;
pub use error::{HistoryError, Result};
pub use expense::{ChangeDataExpense, ExpensePolicy, NeverExpensive};
pub use history::{EngineMode, History, HistoryStores, mark_columns_as_modified};
pub use options::HistoryOptions;
pub use outcome::{DUPLICATE_ENTRY_ID_CODE, OperationApplicationResult};
pub use persist::{HISTORY_FILE_NAME, HistoryManifest, load_history, save_history};
pub use registry::{OperationRegistry, UNKNOWN_OPERATION_CODE, UnknownOperation};
