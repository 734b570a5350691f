use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gridline_model::test_helpers::{CacheControl, CacheGate, FlakyGridCache, RecordingChangeDataStore, TestGrid, TestOperation};
use gridline_model::{ChangeDataId, ChangeDataStore, ColumnId, ColumnModel, GridPreservation, INITIAL_ENTRY_ID, NO_ENTRY_ID};

use super::*;
use crate::{ExpensePolicy, NeverExpensive};

/// Treats entries whose description starts with "expensive" as expensive.
#[derive(Debug)]
struct DescribedExpense;

impl ExpensePolicy for DescribedExpense {
	fn is_expensive(&self, entry: &HistoryEntry, _store: &dyn ChangeDataStore) -> bool {
		entry.description().starts_with("expensive")
	}
}

struct Fixture {
	control: Arc<CacheControl>,
	store: Arc<RecordingChangeDataStore>,
	cache: Arc<FlakyGridCache>,
	history: History,
}

impl Fixture {
	fn new() -> Self {
		Self::with_options(HistoryOptions::default())
	}

	fn with_options(options: HistoryOptions) -> Self {
		let _ = tracing_subscriber::fmt::try_init();
		let control = CacheControl::new();
		let initial = TestGrid::with_control(ColumnModel::from_names(["foo", "bar"]), 3, control.clone());
		let store = RecordingChangeDataStore::new();
		let cache = FlakyGridCache::new();
		let history = History::new(initial, HistoryStores::new(store.clone(), cache.clone()), options);
		Self {
			control,
			store,
			cache,
			history,
		}
	}

	/// Switches to [`DescribedExpense`] and lets the initial grid settle.
	fn described(mut self) -> Self {
		self.history = self.history.with_expense_policy(Arc::new(DescribedExpense));
		self.history.wait_for_caching();
		self
	}

	fn stores(&self) -> HistoryStores {
		HistoryStores::new(self.store.clone(), self.cache.clone())
	}

	fn add(&mut self, op: TestOperation) -> (Arc<TestOperation>, HistoryEntry) {
		let op = Arc::new(op);
		let entry = self.history.add_entry(op.clone()).into_result().unwrap();
		(op, entry)
	}
}

#[test]
fn linear_growth_caches_the_step_before_an_expensive_change() {
	let mut fx = Fixture::new();

	fx.add(TestOperation::new("cheap"));
	fx.history.wait_for_caching();
	assert_eq!(fx.history.position(), 1);
	assert_eq!(fx.history.cached_position(), 0);
	assert!(fx.history.initial_grid().is_cached());
	assert_eq!(fx.control.cache_calls(), 1);

	fx.add(TestOperation::new("fetch").fetching("recon"));
	fx.history.wait_for_caching();

	assert_eq!(fx.history.position(), 2);
	assert_eq!(fx.history.cached_position(), 1);
	assert_eq!(fx.history.position_being_cached(), None);
	assert!(fx.history.get_grid(1, false).unwrap().is_cached());
	assert!(!fx.history.initial_grid().is_cached());
	assert_eq!(fx.control.pinned(), 1);
	assert!(fx.history.is_fully_computed_at_step(1));
	assert!(!fx.history.is_fully_computed_at_step(2));
}

#[test]
fn refresh_picks_up_completed_change_data() {
	let mut fx = Fixture::new();
	fx.add(TestOperation::new("cheap"));
	let (fetch, entry) = fx.add(TestOperation::new("fetch").fetching("recon"));
	fx.history.wait_for_caching();
	let step_one = fx.history.get_grid(1, false).unwrap();

	fx.store.inner().mark_complete(&ChangeDataId::new(entry.id(), "recon"));
	fx.history.refresh_current_grid().unwrap();
	fx.history.wait_for_caching();

	assert_eq!(fetch.applications(), 2);
	assert!(fx.history.is_fully_computed_at_step(2));
	assert_eq!(fx.history.cached_position(), 2);
	assert!(fx.history.current_grid().is_cached());
	assert!(!step_one.is_cached());
	assert_eq!(fx.control.pinned(), 1);
}

#[test]
fn refresh_without_pending_data_keeps_the_grid() {
	let mut fx = Fixture::new();
	let (op, _) = fx.add(TestOperation::new("cheap"));
	let before = fx.history.current_grid();

	fx.history.refresh_current_grid().unwrap();

	assert!(Arc::ptr_eq(&before, &fx.history.current_grid()));
	assert_eq!(op.applications(), 1);
}

#[test]
fn no_op_undo_is_idempotent() {
	let mut fx = Fixture::new();
	fx.add(TestOperation::new("cheap"));
	fx.add(TestOperation::new("fetch").fetching("recon"));
	fx.history.wait_for_caching();
	let calls = fx.control.cache_calls();

	let current = fx.history.current_entry_id();
	assert_eq!(fx.history.undo_redo(current).unwrap(), GridPreservation::PreservesRecords);

	assert!(!fx.history.is_caching());
	assert_eq!(fx.control.cache_calls(), calls);
	assert_eq!(fx.history.cached_position(), 1);
}

#[test]
fn failing_operation_changes_nothing() {
	let mut fx = Fixture::new();
	let (_, first) = fx.add(TestOperation::new("one"));
	fx.add(TestOperation::new("two"));
	fx.history.undo_redo(first.id()).unwrap();
	let before = fx.history.current_grid();

	let result = fx.history.add_entry(Arc::new(TestOperation::new("drop baz").removing_column("baz")));

	assert!(!result.is_success());
	assert!(result.history_entry().is_none());
	assert_eq!(result.error().map(|err| err.code.as_str()), Some("bad_column"));
	assert_eq!(fx.history.position(), 1);
	assert_eq!(fx.history.entries().len(), 2);
	assert!(Arc::ptr_eq(&before, &fx.history.current_grid()));
	assert!(!fx.store.discarded().iter().any(|id| fx.history.get_entry(*id).is_some()));
}

#[test]
fn undo_redo_round_trip_keeps_grid_identity() {
	let mut fx = Fixture::new();
	fx.add(TestOperation::new("cheap"));
	let (_, second) = fx.add(TestOperation::new("fetch").fetching("recon"));
	fx.history.wait_for_caching();
	let before = fx.history.current_grid();

	fx.history.undo_redo(INITIAL_ENTRY_ID).unwrap();
	assert_eq!(fx.history.position(), 0);
	assert!(Arc::ptr_eq(&fx.history.current_grid(), &fx.history.initial_grid()));
	fx.history.undo_redo(second.id()).unwrap();
	fx.history.wait_for_caching();

	assert_eq!(fx.history.position(), 2);
	assert!(Arc::ptr_eq(&before, &fx.history.current_grid()));
}

#[test]
fn traversed_preservation_is_the_weakest_link() {
	let mut fx = Fixture::new();
	let (_, records) = fx.add(TestOperation::new("a").with_preservation(GridPreservation::PreservesRecords));
	let (_, rows) = fx.add(TestOperation::new("b").with_preservation(GridPreservation::PreservesRows));
	fx.add(TestOperation::new("c").with_preservation(GridPreservation::NoRowPreservation));

	assert_eq!(fx.history.undo_redo(INITIAL_ENTRY_ID).unwrap(), GridPreservation::NoRowPreservation);
	assert_eq!(fx.history.undo_redo(records.id()).unwrap(), GridPreservation::PreservesRecords);
	assert_eq!(fx.history.undo_redo(rows.id()).unwrap(), GridPreservation::PreservesRows);
}

#[test]
fn unknown_entry_id_is_rejected_without_moving() {
	let mut fx = Fixture::new();
	fx.add(TestOperation::new("a"));

	let err = fx.history.undo_redo(424_242).unwrap_err();

	assert!(matches!(err, HistoryError::UnknownEntryId(424_242)));
	assert_eq!(fx.history.position(), 1);
	assert!(matches!(fx.history.entry_index(424_242), Err(HistoryError::UnknownEntryId(_))));
}

#[test]
fn preceding_entry_ids_use_sentinels() {
	let mut fx = Fixture::new();
	let (_, first) = fx.add(TestOperation::new("a"));
	let (_, second) = fx.add(TestOperation::new("b"));

	assert_eq!(fx.history.get_preceding_entry_id(second.id()), first.id());
	assert_eq!(fx.history.get_preceding_entry_id(first.id()), INITIAL_ENTRY_ID);
	assert_eq!(fx.history.get_preceding_entry_id(INITIAL_ENTRY_ID), NO_ENTRY_ID);
	assert_eq!(fx.history.get_preceding_entry_id(-77), NO_ENTRY_ID);
	assert_eq!(fx.history.get_entry(second.id()).map(HistoryEntry::id), Some(second.id()));
	assert!(fx.history.get_entry(-77).is_none());
}

#[test]
fn last_past_entries_stop_at_the_current_position() {
	let mut fx = Fixture::new();
	let ids: Vec<_> = (0..4).map(|i| fx.add(TestOperation::new(format!("op {i}"))).1.id()).collect();
	fx.history.undo_redo(ids[2]).unwrap();

	let ids_of = |entries: &[HistoryEntry]| entries.iter().map(HistoryEntry::id).collect::<Vec<_>>();
	assert_eq!(ids_of(fx.history.last_past_entries(0)), ids[..3].to_vec());
	assert_eq!(ids_of(fx.history.last_past_entries(2)), ids[1..3].to_vec());
	assert_eq!(ids_of(fx.history.last_past_entries(10)), ids[..3].to_vec());
}

#[test]
fn adding_after_undo_discards_the_future() {
	let mut fx = Fixture::new();
	let (_, first) = fx.add(TestOperation::new("a"));
	let (_, second) = fx.add(TestOperation::new("b"));
	let (_, third) = fx.add(TestOperation::new("c"));
	fx.history.cache_intermediate_grid_on_disk(3).unwrap();
	assert!(fx.cache.contains(third.id()));

	fx.history.undo_redo(first.id()).unwrap();
	let (_, fourth) = fx.add(TestOperation::new("d"));

	assert_eq!(fx.history.entries().len(), 2);
	assert_eq!(fx.history.position(), 2);
	assert_eq!(fx.history.current_entry_id(), fourth.id());
	assert_eq!(fx.store.discarded(), vec![second.id(), third.id()]);
	assert!(!fx.cache.contains(third.id()));
}

#[test]
fn delete_future_entries_without_adding() {
	let mut fx = Fixture::new();
	let (_, first) = fx.add(TestOperation::new("a"));
	fx.add(TestOperation::new("b"));
	fx.history.undo_redo(first.id()).unwrap();

	fx.history.delete_future_entries();
	fx.history.delete_future_entries();

	assert_eq!(fx.history.entries().len(), 1);
	assert_eq!(fx.history.position(), 1);
	assert_eq!(fx.store.discarded().len(), 1);
}

#[test]
fn cancelled_attempts_leave_no_pins_behind() {
	let mut fx = Fixture::new().described();
	let gate = CacheGate::closed();
	fx.control.install_gate(gate.clone());

	let (_, first) = fx.add(TestOperation::new("expensive a"));
	gate.wait_entered(1);
	fx.add(TestOperation::new("cheap"));
	assert_eq!(fx.history.position_being_cached(), Some(1));
	fx.add(TestOperation::new("expensive b"));
	gate.wait_entered(2);
	assert_eq!(fx.history.position_being_cached(), Some(3));

	fx.history.undo_redo(first.id()).unwrap();
	gate.wait_entered(3);
	gate.open();
	fx.history.wait_for_caching();

	assert_eq!(fx.history.cached_position(), 1);
	assert_eq!(fx.history.desired_cached_position(), Some(1));
	assert_eq!(fx.history.position_being_cached(), None);
	assert!(fx.history.current_grid().is_cached());
	assert!(!fx.history.get_grid(3, false).unwrap().is_cached());
	assert_eq!(fx.control.pinned(), 1);
}

#[test]
fn moving_back_to_the_cached_step_cancels_the_attempt() {
	let mut fx = Fixture::new().described();
	let (_, first) = fx.add(TestOperation::new("expensive a"));
	fx.history.wait_for_caching();
	assert_eq!(fx.history.cached_position(), 1);

	let gate = CacheGate::closed();
	fx.control.install_gate(gate.clone());
	fx.add(TestOperation::new("expensive b"));
	gate.wait_entered(1);

	fx.history.undo_redo(first.id()).unwrap();
	assert_eq!(fx.history.position_being_cached(), None);
	gate.open();
	fx.history.wait_for_caching();

	assert_eq!(fx.history.cached_position(), 1);
	assert!(!fx.history.get_grid(2, false).unwrap().is_cached());
	assert_eq!(fx.control.pinned(), 1);
}

#[test]
fn refused_pin_falls_back_to_disk() {
	let mut fx = Fixture::new().described();
	fx.control.refuse_pins(true);
	let (_, entry) = fx.add(TestOperation::new("expensive"));
	let computed = fx.history.current_grid();
	fx.history.wait_for_caching();

	assert_eq!(fx.history.cached_position(), 1);
	assert!(fx.history.is_cached_on_disk(1));
	assert!(fx.cache.contains(entry.id()));
	assert!(!Arc::ptr_eq(&computed, &fx.history.current_grid()));
	assert_eq!(fx.control.pinned(), 0);
}

#[test]
fn disabled_disk_fallback_reports_a_failed_attempt() {
	let mut fx = Fixture::with_options(HistoryOptions::default().with_disk_fallback(false)).described();
	fx.control.refuse_pins(true);
	fx.add(TestOperation::new("expensive"));
	fx.history.wait_for_caching();

	assert_eq!(fx.history.cached_position(), 0);
	assert_eq!(fx.history.position_being_cached(), None);
	assert_eq!(fx.cache.writes(), 0);
}

#[test]
fn failed_disk_write_is_retried_on_the_next_move() {
	let mut fx = Fixture::new().described();
	fx.control.refuse_pins(true);
	fx.cache.fail_writes(true);
	fx.add(TestOperation::new("expensive"));
	fx.history.wait_for_caching();
	assert_eq!(fx.history.cached_position(), 0);

	fx.cache.fail_writes(false);
	let current = fx.history.current_entry_id();
	fx.history.undo_redo(current).unwrap();
	fx.history.wait_for_caching();

	assert_eq!(fx.history.cached_position(), 1);
	assert!(fx.history.is_cached_on_disk(1));
}

#[test]
fn memory_caching_can_be_turned_off() {
	let mut fx = Fixture::with_options(HistoryOptions::default().with_memory_caching(false)).described();
	let (_, entry) = fx.add(TestOperation::new("expensive"));
	fx.history.wait_for_caching();

	assert_eq!(fx.control.cache_calls(), 0);
	assert_eq!(fx.history.cached_position(), 1);
	assert!(fx.cache.contains(entry.id()));
}

#[test]
fn wait_for_caching_returns_when_idle() {
	let mut fx = Fixture::new();
	fx.history.wait_for_caching();
	assert!(!fx.history.is_caching());
}

#[test]
fn caching_on_disk_invalidates_derived_steps() {
	let mut fx = Fixture::new();
	let (a, first) = fx.add(TestOperation::new("a"));
	let (b, _) = fx.add(TestOperation::new("b"));
	let (c, _) = fx.add(TestOperation::new("c"));

	fx.history.cache_intermediate_grid_on_disk(1).unwrap();

	assert!(fx.cache.contains(first.id()));
	assert!(fx.history.is_cached_on_disk(1));
	assert_eq!((a.applications(), b.applications(), c.applications()), (1, 2, 2));
	assert_eq!(fx.history.position(), 3);
	assert!(matches!(
		fx.history.cache_intermediate_grid_on_disk(0),
		Err(HistoryError::InvalidPosition { position: 0, .. })
	));
	assert!(matches!(
		fx.history.cache_intermediate_grid_on_disk(4),
		Err(HistoryError::InvalidPosition { position: 4, len: 3 })
	));
}

#[test]
fn caching_on_disk_reports_io_errors() {
	let mut fx = Fixture::new();
	let (_, entry) = fx.add(TestOperation::new("a"));
	fx.cache.fail_writes(true);

	let err = fx.history.cache_intermediate_grid_on_disk(1).unwrap_err();

	assert!(matches!(err, HistoryError::CacheIo { entry_id, .. } if entry_id == entry.id()));
	assert!(!fx.history.is_cached_on_disk(1));
}

#[test]
fn uncaching_from_disk_recomputes_from_memory() {
	let mut fx = Fixture::new();
	let (a, first) = fx.add(TestOperation::new("a"));
	let (b, _) = fx.add(TestOperation::new("b"));
	fx.history.cache_intermediate_grid_on_disk(1).unwrap();

	fx.history.uncache_grid_from_disk(1).unwrap();

	assert!(!fx.cache.contains(first.id()));
	assert!(!fx.history.is_cached_on_disk(1));
	assert_eq!((a.applications(), b.applications()), (2, 3));
	assert_eq!(fx.history.current_grid().column_model(), &ColumnModel::from_names(["foo", "bar"]));
}

#[test]
fn row_maps_stamp_columns_and_opaque_operations_do_not() {
	let mut fx = Fixture::new();
	let (_, opaque) = fx.add(TestOperation::new("opaque"));
	assert!(
		fx.history
			.current_grid()
			.column_model()
			.columns()
			.iter()
			.all(|c| c.last_modified == INITIAL_ENTRY_ID)
	);
	let (_, mapped) = fx.add(TestOperation::new("map").row_map());

	let columns = fx.history.current_grid().column_model().clone();
	assert!(columns.columns().iter().all(|c| c.last_modified == mapped.id()));
	assert_ne!(mapped.id(), opaque.id());
}

#[test]
fn dependencies_are_traced_back_through_preserving_steps() {
	let mut fx = Fixture::new();
	let (_, mapped) = fx.add(TestOperation::new("map").row_map().with_preservation(GridPreservation::PreservesRows));
	fx.add(TestOperation::new("add baz").adding_column("baz").with_preservation(GridPreservation::PreservesRows));
	fx.add(TestOperation::new("shuffle").with_preservation(GridPreservation::NoRowPreservation));

	let foo = [ColumnId::new("foo", mapped.id())];
	assert_eq!(fx.history.earliest_step_containing_dependencies(2, None, EngineMode::RowBased), 2);
	assert_eq!(fx.history.earliest_step_containing_dependencies(2, Some(&foo), EngineMode::RowBased), 1);
	assert_eq!(fx.history.earliest_step_containing_dependencies(2, Some(&foo), EngineMode::RecordBased), 2);
	assert_eq!(fx.history.earliest_step_containing_dependencies(2, Some(&[]), EngineMode::RowBased), 0);
	assert_eq!(fx.history.earliest_step_containing_dependencies(3, Some(&[]), EngineMode::RowBased), 3);
}

#[test]
fn dispose_releases_change_data() {
	let mut fx = Fixture::new();
	let (_, first) = fx.add(TestOperation::new("fetch").fetching("recon"));
	let (_, second) = fx.add(TestOperation::new("b"));

	fx.history.dispose();

	assert_eq!(fx.store.discarded(), vec![first.id(), second.id()]);
	assert_eq!(fx.store.disposals(), 1);
	assert!(fx.store.inner().is_disposed());
	assert!(!fx.history.is_caching());
}

#[test]
fn replay_restores_cached_steps_without_recomputing() {
	let mut fx = Fixture::new();
	let (a, _) = fx.add(TestOperation::new("a"));
	let (b, _) = fx.add(TestOperation::new("b"));
	fx.add(TestOperation::new("c"));
	fx.history.cache_intermediate_grid_on_disk(2).unwrap();
	let manifest = fx.history.manifest();
	let (a_runs, b_runs) = (a.applications(), b.applications());

	let mut replayed = History::replay(fx.history.initial_grid(), fx.stores(), manifest.entries, 2, HistoryOptions::default()).unwrap();
	replayed.wait_for_caching();

	assert_eq!(replayed.position(), 2);
	assert!(replayed.is_cached_on_disk(2));
	assert_eq!((a.applications(), b.applications()), (a_runs, b_runs));
	assert_eq!(replayed.cached_position(), 2);
}

#[test]
fn replay_recomputes_unreadable_cached_steps() {
	let mut fx = Fixture::new();
	let (a, _) = fx.add(TestOperation::new("a"));
	fx.history.cache_intermediate_grid_on_disk(1).unwrap();
	fx.cache.fail_reads(true);
	let runs = a.applications();

	let replayed = History::replay(fx.history.initial_grid(), fx.stores(), fx.history.entries().to_vec(), 1, HistoryOptions::default()).unwrap();

	assert!(!replayed.is_cached_on_disk(1));
	assert_eq!(a.applications(), runs + 1);
}

#[test]
fn replay_fails_when_the_current_step_cannot_be_built() {
	let fx = Fixture::new();
	let broken = HistoryEntry::new(7, Arc::new(TestOperation::new("broken").failing("bad_column", "gone")), GridPreservation::PreservesRows);

	let err = History::replay(fx.history.initial_grid(), fx.stores(), vec![broken.clone()], 1, HistoryOptions::default()).unwrap_err();
	assert!(matches!(err, HistoryError::Replay { position: 1, entry_id: 7, .. }));

	let replayed = History::replay(fx.history.initial_grid(), fx.stores(), vec![broken.clone()], 0, HistoryOptions::default()).unwrap();
	assert_eq!(replayed.position(), 0);

	let err = History::replay(fx.history.initial_grid(), fx.stores(), vec![broken], 2, HistoryOptions::default()).unwrap_err();
	assert!(matches!(err, HistoryError::InvalidPosition { position: 2, len: 1 }));
}

#[test]
fn never_expensive_policy_keeps_the_initial_grid() {
	let mut fx = Fixture::new();
	fx.history = fx.history.with_expense_policy(Arc::new(NeverExpensive));
	fx.add(TestOperation::new("fetch").fetching("recon"));
	fx.add(TestOperation::new("b"));
	fx.history.wait_for_caching();

	assert_eq!(fx.history.cached_position(), 0);
	assert_eq!(fx.control.cache_calls(), 1);
	assert!(fx.history.initial_grid().is_cached());
}

#[test]
fn reusing_a_future_entry_id_starts_from_fresh_change_data() {
	let mut fx = Fixture::new();
	fx.history.add_entry_with_id(500, Arc::new(TestOperation::new("fetch").fetching("recon"))).into_result().unwrap();
	fx.store.inner().mark_complete(&ChangeDataId::new(500, "recon"));
	fx.history.undo_redo(INITIAL_ENTRY_ID).unwrap();

	let entry = fx
		.history
		.add_entry_with_id(500, Arc::new(TestOperation::new("fetch again").fetching("recon")))
		.into_result()
		.unwrap();

	assert_eq!(entry.description(), "fetch again");
	assert_eq!(fx.history.entries().len(), 1);
	assert_eq!(fx.store.discarded(), vec![500]);
	assert!(fx.store.needs_refreshing(500));
	assert!(!fx.history.is_fully_computed_at_step(1));
	let stored = fx.store.inner().retrieve::<String>(&ChangeDataId::new(500, "recon"));
	assert_eq!(stored.as_deref().map(String::as_str), Some("fetch again"));
	fx.history.wait_for_caching();
}

#[test]
fn past_entry_ids_cannot_be_reused() {
	let mut fx = Fixture::new();
	fx.history.add_entry_with_id(700, Arc::new(TestOperation::new("fetch").fetching("recon"))).into_result().unwrap();
	fx.store.inner().mark_complete(&ChangeDataId::new(700, "recon"));
	let before = fx.history.current_grid();

	let reused = fx.history.add_entry_with_id(700, Arc::new(TestOperation::new("boom").failing("boom", "always fails")));
	let initial = fx.history.add_entry_with_id(INITIAL_ENTRY_ID, Arc::new(TestOperation::new("cheap")));

	assert_eq!(reused.error().map(|err| err.code.as_str()), Some(DUPLICATE_ENTRY_ID_CODE));
	assert_eq!(initial.error().map(|err| err.code.as_str()), Some(DUPLICATE_ENTRY_ID_CODE));
	assert_eq!(fx.history.entries().len(), 1);
	assert!(Arc::ptr_eq(&before, &fx.history.current_grid()));
	assert!(fx.store.discarded().is_empty());
	assert_eq!(fx.store.change_data_ids(700).len(), 1);
	assert!(!fx.store.needs_refreshing(700));
	fx.history.wait_for_caching();
}

#[test]
fn released_pin_is_not_lost_to_a_newer_attempt() {
	let mut fx = Fixture::new().described();
	let (_, first) = fx.add(TestOperation::new("expensive a"));
	fx.history.wait_for_caching();
	let step_one = fx.history.current_grid();
	assert!(step_one.is_cached());

	let gate = CacheGate::closed();
	fx.control.install_uncache_gate(gate.clone());
	fx.add(TestOperation::new("expensive b"));
	// The attempt for step 2 has committed and is releasing step 1.
	gate.wait_entered(1);
	assert!(fx.history.timeline.try_lock().is_none());

	thread::scope(|scope| {
		let history = &mut fx.history;
		let back = scope.spawn(move || {
			history.undo_redo(first.id()).unwrap();
			history.wait_for_caching();
		});
		thread::sleep(Duration::from_millis(50));
		gate.open();
		back.join().unwrap();
	});

	assert_eq!(fx.history.cached_position(), 1);
	assert!(step_one.is_cached());
	assert!(!fx.history.get_grid(2, false).unwrap().is_cached());
	assert_eq!(fx.control.pinned(), 1);
}

#[test]
fn landing_on_the_initial_step_pins_it_once() {
	let mut fx = Fixture::new();
	fx.add(TestOperation::new("cheap"));
	fx.add(TestOperation::new("also cheap"));
	fx.history.wait_for_caching();
	let current = fx.history.current_entry_id();
	fx.history.undo_redo(current).unwrap();
	fx.history.wait_for_caching();

	assert_eq!(fx.history.cached_position(), 0);
	assert_eq!(fx.history.desired_cached_position(), Some(0));
	assert!(fx.history.initial_grid().is_cached());
	assert_eq!(fx.control.cache_calls(), 1);
	assert_eq!(fx.control.pinned(), 1);
}

#[test]
fn failed_recompute_after_caching_on_disk_drops_the_copy() {
	let mut fx = Fixture::new();
	let (_, first) = fx.add(TestOperation::new("a"));
	let (once, _) = fx.add(TestOperation::new("once").failing_after(1));
	let before = fx.history.current_grid();

	let err = fx.history.cache_intermediate_grid_on_disk(1).unwrap_err();

	assert!(matches!(err, HistoryError::Recompute { position: 2, ref source, .. } if source.code == "exhausted"));
	assert_eq!(once.applications(), 2);
	assert!(!fx.cache.contains(first.id()));
	assert!(!fx.history.is_cached_on_disk(1));
	assert!(Arc::ptr_eq(&before, &fx.history.current_grid()));
	assert_eq!(fx.history.position(), 2);
	fx.history.wait_for_caching();
}

#[test]
fn failed_recompute_keeps_an_earlier_disk_copy() {
	let mut fx = Fixture::new();
	let (_, first) = fx.add(TestOperation::new("a"));
	fx.history.cache_intermediate_grid_on_disk(1).unwrap();
	fx.add(TestOperation::new("once").failing_after(1));

	assert!(fx.history.cache_intermediate_grid_on_disk(1).is_err());

	assert!(fx.cache.contains(first.id()));
	assert!(fx.history.is_cached_on_disk(1));
	fx.history.wait_for_caching();
}
