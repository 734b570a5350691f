//! Contracts between the grid history engine and its collaborators.
//!
//! The history engine never looks inside a grid. It only needs:
//!
//! * [`Grid`]: an immutable snapshot exposing its [`ColumnModel`], a row count
//!   and an advisory in-memory pin (`cache`/`uncache`).
//! * [`Operation`]: a pure transformation from one grid to the next, producing
//!   a [`ChangeResult`] or an [`OperationError`].
//! * [`ChangeDataStore`]: where operations keep derived data computed off the
//!   foreground path, keyed by [`ChangeDataId`].
//! * [`GridCache`]: a disk-backed cache of intermediate grids keyed by history
//!   entry id.
//!
//! Reference store implementations live next to their traits.

/// Change data contracts and the in-memory store.
pub mod change_data;
/// Column metadata and modification tracking.
pub mod column;
/// The grid contract.
pub mod grid;
/// Disk and memory grid caches.
pub mod grid_cache;
/// Operation, change context and change result contracts.
pub mod operation;
/// Grid preservation classification.
pub mod preservation;
#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_helpers;

pub use change_data::{ChangeData, ChangeDataId, ChangeDataStore, MemoryChangeDataStore};
pub use column::{ColumnId, ColumnMetadata, ColumnModel};
pub use grid::{Grid, GridRef};
pub use grid_cache::{FileGridCache, GridCache, GridCodec, MemoryGridCache, atomic_write_bytes};
pub use operation::{ChangeContext, ChangeResult, Operation, OperationError, OperationRef};
pub use preservation::GridPreservation;

/// Identifier of a history entry.
///
/// Allocated ids are strictly positive; [`INITIAL_ENTRY_ID`] and
/// [`NO_ENTRY_ID`] are reserved sentinels.
pub type EntryId = i64;

/// Sentinel naming the state before any entry was applied.
pub const INITIAL_ENTRY_ID: EntryId = 0;

/// Sentinel for "no such entry", returned when asking for the entry before
/// the initial state.
pub const NO_ENTRY_ID: EntryId = -1;
