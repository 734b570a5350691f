//! Random editing sessions checked against a plain model of the timeline.

use std::sync::Arc;

use gridline_history::{History, HistoryOptions, HistoryStores};
use gridline_model::test_helpers::{TestGrid, TestOperation};
use gridline_model::{ColumnModel, GridCache, INITIAL_ENTRY_ID, MemoryChangeDataStore, MemoryGridCache};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Action {
	/// Adds a column, optionally registering pending change data.
	Add { fetch: bool },
	/// Applies an operation that always fails.
	Fail,
	/// Moves to the step selected by the seed.
	Move(usize),
	/// Persists the step selected by the seed.
	Persist(usize),
	Settle,
}

fn action() -> impl Strategy<Value = Action> {
	prop_oneof![
		4 => any::<bool>().prop_map(|fetch| Action::Add { fetch }),
		1 => Just(Action::Fail),
		3 => (0usize..64).prop_map(Action::Move),
		1 => (0usize..64).prop_map(Action::Persist),
		1 => Just(Action::Settle),
	]
}

fn new_history(cache: Arc<MemoryGridCache>) -> History {
	let initial = TestGrid::new(ColumnModel::from_names(["key"]), 5);
	History::new(initial, HistoryStores::new(Arc::new(MemoryChangeDataStore::new()), cache), HistoryOptions::default())
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(48))]

	#[test]
	fn random_sessions_match_the_linear_model(actions in prop::collection::vec(action(), 1..24)) {
		let cache = Arc::new(MemoryGridCache::new());
		let mut history = new_history(cache.clone());
		// Column count of every step, as a list of entries would produce it.
		let mut widths = vec![1usize];
		let mut position = 0usize;
		let mut added = 0usize;

		for action in actions {
			match action {
				Action::Add { fetch } => {
					added += 1;
					let mut op = TestOperation::new(format!("add c{added}")).adding_column(format!("c{added}"));
					if fetch {
						op = op.fetching("rows");
					}
					let result = history.add_entry(Arc::new(op));
					prop_assert!(result.is_success());
					widths.truncate(position + 1);
					widths.push(widths[position] + 1);
					position += 1;
				}
				Action::Fail => {
					let result = history.add_entry(Arc::new(TestOperation::new("boom").failing("boom", "always fails")));
					prop_assert!(!result.is_success());
				}
				Action::Move(seed) => {
					let target = seed % widths.len();
					let entry_id = match target {
						0 => INITIAL_ENTRY_ID,
						target => history.entries()[target - 1].id(),
					};
					history.undo_redo(entry_id).unwrap();
					position = target;
				}
				Action::Persist(seed) => {
					if widths.len() > 1 {
						let target = 1 + seed % (widths.len() - 1);
						history.cache_intermediate_grid_on_disk(target).unwrap();
						prop_assert!(history.is_cached_on_disk(target));
					}
				}
				Action::Settle => history.wait_for_caching(),
			}

			prop_assert_eq!(history.position(), position);
			prop_assert_eq!(history.entries().len(), widths.len() - 1);
			prop_assert_eq!(history.current_grid().column_model().len(), widths[position]);
			prop_assert_eq!(history.initial_grid().column_model().len(), 1);
			let ids: Vec<_> = history.entries().iter().map(|entry| entry.id()).collect();
			prop_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
		}

		history.wait_for_caching();
		prop_assert!(history.cached_position() <= history.position());
		prop_assert_eq!(history.position_being_cached(), None);
		prop_assert!(!history.is_caching());

		let persisted: Vec<_> = (1..widths.len()).filter(|&step| history.is_cached_on_disk(step)).map(|step| history.entries()[step - 1].id()).collect();
		let listed: Vec<_> = cache.list_cached_grid_ids().unwrap().into_iter().collect();
		prop_assert_eq!(persisted, listed);
	}
}
