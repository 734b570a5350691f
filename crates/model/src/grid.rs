use std::fmt;
use std::sync::Arc;

use crate::ColumnModel;

/// Shared handle to an immutable grid snapshot.
pub type GridRef = Arc<dyn Grid>;

/// An immutable snapshot of tabular data.
///
/// Grids are only ever produced by [`Operation::apply`] (or loaded from a
/// [`GridCache`]) and never mutated. The in-memory pin is a hint: a grid may
/// refuse it, or drop it later under memory pressure, and callers must never
/// rely on [`Grid::is_cached`] for correctness.
///
/// [`Operation::apply`]: crate::Operation::apply
/// [`GridCache`]: crate::GridCache
pub trait Grid: Send + Sync + fmt::Debug {
	fn column_model(&self) -> &ColumnModel;

	fn row_count(&self) -> u64;

	/// Returns a grid with the same rows and a replaced column model.
	fn with_column_model(&self, columns: ColumnModel) -> GridRef;

	/// Asks for the grid to be kept resident in memory.
	///
	/// May block while the grid is materialised. Returns `false` when the
	/// grid could not be pinned, for instance under memory pressure.
	fn cache(&self) -> bool;

	/// Releases an in-memory pin. No-op if the grid is not pinned.
	fn uncache(&self);

	/// Whether the grid currently believes it is pinned.
	fn is_cached(&self) -> bool;
}
