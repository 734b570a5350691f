use serde::{Deserialize, Serialize};

/// How much of the previous row/record structure a step is guaranteed to keep.
///
/// Variants are declared weakest first so the derived ordering matches the
/// strength of the guarantee: preserving records implies preserving rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GridPreservation {
	/// Rows may have been added, removed or reordered.
	NoRowPreservation,
	/// Rows are kept in place, but record boundaries may have moved.
	PreservesRows,
	/// Rows and record boundaries are both kept.
	PreservesRecords,
}

impl GridPreservation {
	/// Effective preservation of a sequence of steps: the weakest link.
	///
	/// An empty sequence is a no-op and preserves everything.
	pub fn weakest<I>(items: I) -> Self
	where
		I: IntoIterator<Item = Self>,
	{
		items.into_iter().min().unwrap_or(Self::PreservesRecords)
	}

	/// Returns true if row identities survive the step.
	pub fn preserves_rows(self) -> bool {
		self >= Self::PreservesRows
	}

	/// Returns true if record boundaries survive the step.
	pub fn preserves_records(self) -> bool {
		self == Self::PreservesRecords
	}
}
