use std::fmt;

use gridline_model::ChangeDataStore;

use crate::HistoryEntry;

/// Decides whether the change of an entry is costly enough that the step
/// before it is worth keeping resident.
pub trait ExpensePolicy: Send + Sync + fmt::Debug {
	fn is_expensive(&self, entry: &HistoryEntry, store: &dyn ChangeDataStore) -> bool;
}

/// Default policy: a change is expensive when it owns change data, since
/// replaying it from scratch would mean fetching that data again.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDataExpense;

impl ExpensePolicy for ChangeDataExpense {
	fn is_expensive(&self, entry: &HistoryEntry, store: &dyn ChangeDataStore) -> bool {
		store.needs_refreshing(entry.id()) || !store.change_data_ids(entry.id()).is_empty()
	}
}

/// Treats every change as cheap. The policy then settles on the earliest
/// computed step, usually the initial grid, which disables extra caching.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverExpensive;

impl ExpensePolicy for NeverExpensive {
	fn is_expensive(&self, _entry: &HistoryEntry, _store: &dyn ChangeDataStore) -> bool {
		false
	}
}
