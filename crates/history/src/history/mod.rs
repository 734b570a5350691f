//! The history core: an ordered list of entries, one step per position, and a
//! current position.
//!
//! # Steps
//!
//! `steps[i]` holds the grid obtained by applying `entries[..i]` to the
//! initial grid. Step 0 and the step at the current position are always
//! computed; every other slot may be empty and is rebuilt on demand from the
//! nearest earlier computed step. Recomputation runs on the caller's thread.
//!
//! # Caching
//!
//! After every move the policy picks one step to keep resident and hands it
//! to a background attempt (see `caching.rs`). Attempts only ever touch the
//! shared timeline under its lock, after re-checking their cancellation
//! token.

use std::collections::BTreeSet;
use std::sync::Arc;

use gridline_model::{
	ChangeContext, ChangeDataStore, ChangeResult, ColumnId, EntryId, GridCache, GridPreservation, GridRef, INITIAL_ENTRY_ID, NO_ENTRY_ID,
	Operation, OperationError, OperationRef,
};
use gridline_worker::GenerationClock;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use self::caching::CachingAttempt;
use self::step::{Step, Timeline};
use crate::{
	ChangeDataExpense, DUPLICATE_ENTRY_ID_CODE, ExpensePolicy, HistoryEntry, HistoryError, HistoryManifest, HistoryOptions, OperationApplicationResult,
	Result,
};

mod caching;
mod step;
#[cfg(test)]
mod tests;

/// The stores a history reads and writes besides its own step list.
#[derive(Debug, Clone)]
pub struct HistoryStores {
	pub change_data: Arc<dyn ChangeDataStore>,
	pub grid_cache: Arc<dyn GridCache>,
}

impl HistoryStores {
	pub fn new(change_data: Arc<dyn ChangeDataStore>, grid_cache: Arc<dyn GridCache>) -> Self {
		Self { change_data, grid_cache }
	}
}

/// Granularity at which a browsing state looks at a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
	#[default]
	RowBased,
	RecordBased,
}

/// Linear, versioned history of a grid.
///
/// Mutating methods take `&mut self`: callers serialise them. The only
/// concurrency managed here is the background caching attempt.
#[derive(Debug)]
pub struct History {
	entries: Vec<HistoryEntry>,
	timeline: Arc<Mutex<Timeline>>,
	change_data: Arc<dyn ChangeDataStore>,
	grid_cache: Arc<dyn GridCache>,
	expense: Arc<dyn ExpensePolicy>,
	options: HistoryOptions,
	clock: GenerationClock,
	attempts: Vec<CachingAttempt>,
}

impl History {
	/// Creates the history of a fresh project.
	pub fn new(initial_grid: GridRef, stores: HistoryStores, options: HistoryOptions) -> Self {
		Self {
			entries: Vec::new(),
			timeline: Arc::new(Mutex::new(Timeline::new(initial_grid))),
			change_data: stores.change_data,
			grid_cache: stores.grid_cache,
			expense: Arc::new(ChangeDataExpense),
			options,
			clock: GenerationClock::new(),
			attempts: Vec::new(),
		}
	}

	/// Rebuilds a persisted history.
	///
	/// Steps found in the grid cache are restored from it; the others stay
	/// empty and are recomputed lazily. Fails if the step at `position`
	/// cannot be computed. Unreadable cached grids are only logged.
	pub fn replay(initial_grid: GridRef, stores: HistoryStores, entries: Vec<HistoryEntry>, position: usize, options: HistoryOptions) -> Result<Self> {
		if position > entries.len() {
			return Err(HistoryError::InvalidPosition {
				position,
				len: entries.len(),
			});
		}

		let mut history = Self::new(initial_grid, stores, options);
		let available = history.grid_cache.list_cached_grid_ids().unwrap_or_else(|err| {
			warn!(error = %err, "history.replay.cache_listing_failed");
			BTreeSet::new()
		});

		let restored: Vec<Step> = entries
			.iter()
			.map(|entry| {
				if !available.contains(&entry.id()) {
					return Step::restored(None);
				}
				match history.grid_cache.get_cached_grid(entry.id()) {
					Ok(grid) => Step::restored(Some(grid)),
					Err(err) => {
						warn!(entry_id = entry.id(), error = %err, "history.replay.cached_grid_unreadable");
						Step::restored(None)
					}
				}
			})
			.collect();
		history.timeline.lock().steps.extend(restored);
		history.entries = entries;

		history.compute_step(position, false).map_err(HistoryError::into_replay)?;
		history.timeline.lock().position = position;
		debug!(entries = history.entries.len(), position, "history.replayed");
		history.update_cached_position();
		Ok(history)
	}

	/// Replaces the expense policy and re-runs the caching policy.
	#[must_use]
	pub fn with_expense_policy(mut self, policy: Arc<dyn ExpensePolicy>) -> Self {
		self.expense = policy;
		self.update_cached_position();
		self
	}

	pub fn current_grid(&self) -> GridRef {
		let timeline = self.timeline.lock();
		let Some(grid) = timeline.steps[timeline.position].grid.clone() else {
			panic!("the grid at the current position {} has not been computed", timeline.position);
		};
		grid
	}

	pub fn initial_grid(&self) -> GridRef {
		let Some(grid) = self.timeline.lock().steps[0].grid.clone() else {
			panic!("the initial grid has not been computed");
		};
		grid
	}

	/// Returns the grid at `position`, computing it if needed.
	///
	/// With `refresh`, a step whose change data was still in flight is
	/// recomputed to pick up whatever arrived since.
	pub fn get_grid(&self, position: usize, refresh: bool) -> Result<GridRef> {
		self.check_position(position)?;
		self.compute_step(position, refresh)
	}

	pub fn position(&self) -> usize {
		self.timeline.lock().position
	}

	/// Step believed to be resident in memory or on disk.
	pub fn cached_position(&self) -> usize {
		self.timeline.lock().caching.cached_position
	}

	pub fn desired_cached_position(&self) -> Option<usize> {
		self.timeline.lock().caching.desired_cached_position
	}

	pub fn position_being_cached(&self) -> Option<usize> {
		self.timeline.lock().caching.position_being_cached
	}

	/// Id of the last applied entry, [`INITIAL_ENTRY_ID`] at the initial state.
	pub fn current_entry_id(&self) -> EntryId {
		match self.position() {
			0 => INITIAL_ENTRY_ID,
			position => self.entries[position - 1].id(),
		}
	}

	pub fn entries(&self) -> &[HistoryEntry] {
		&self.entries
	}

	/// The last `count` entries before the current position, or all of them
	/// when `count` is 0.
	pub fn last_past_entries(&self, count: usize) -> &[HistoryEntry] {
		let position = self.position();
		let start = if count == 0 { 0 } else { position.saturating_sub(count) };
		&self.entries[start..position]
	}

	pub fn get_entry(&self, entry_id: EntryId) -> Option<&HistoryEntry> {
		self.entries.iter().find(|entry| entry.id() == entry_id)
	}

	pub fn entry_index(&self, entry_id: EntryId) -> Result<usize> {
		self.entries
			.iter()
			.position(|entry| entry.id() == entry_id)
			.ok_or(HistoryError::UnknownEntryId(entry_id))
	}

	/// Id of the entry applied just before `entry_id`.
	///
	/// The first entry is preceded by [`INITIAL_ENTRY_ID`]; the initial state
	/// and unknown ids are preceded by [`NO_ENTRY_ID`].
	pub fn get_preceding_entry_id(&self, entry_id: EntryId) -> EntryId {
		if entry_id == INITIAL_ENTRY_ID {
			return NO_ENTRY_ID;
		}
		match self.entry_index(entry_id) {
			Ok(0) => INITIAL_ENTRY_ID,
			Ok(index) => self.entries[index - 1].id(),
			Err(_) => NO_ENTRY_ID,
		}
	}

	pub fn change_data_store(&self) -> &Arc<dyn ChangeDataStore> {
		&self.change_data
	}

	pub fn grid_cache(&self) -> &Arc<dyn GridCache> {
		&self.grid_cache
	}

	pub fn options(&self) -> &HistoryOptions {
		&self.options
	}

	/// Whether the step at `position` is final, i.e. none of the change data
	/// it depends on is still being computed.
	pub fn is_fully_computed_at_step(&self, position: usize) -> bool {
		self.timeline.lock().steps.get(position).is_some_and(|step| !step.in_progress)
	}

	/// Whether the step at `position` is served from the grid cache.
	pub fn is_cached_on_disk(&self, position: usize) -> bool {
		self.timeline.lock().steps.get(position).is_some_and(|step| step.on_disk)
	}

	/// Snapshot of what needs persisting to rebuild this history.
	pub fn manifest(&self) -> HistoryManifest {
		HistoryManifest {
			entries: self.entries.clone(),
			position: self.position(),
		}
	}

	/// Applies `operation` with a freshly allocated entry id.
	pub fn add_entry(&mut self, operation: OperationRef) -> OperationApplicationResult {
		self.add_entry_with_id(HistoryEntry::allocate_id(), operation)
	}

	/// Applies `operation` on the current grid and appends it as entry `id`.
	///
	/// Entries after the current position are discarded once the operation
	/// succeeds; if it fails nothing changes, future entries included.
	///
	/// Ids of past entries and the sentinels are rejected with
	/// [`DUPLICATE_ENTRY_ID_CODE`]. An id owned by a future entry is taken
	/// over: that future is dropped before the operation runs, so the new
	/// entry never sees the old entry's change data.
	pub fn add_entry_with_id(&mut self, id: EntryId, operation: OperationRef) -> OperationApplicationResult {
		let position = self.position();
		let owner = self.entries.iter().position(|entry| entry.id() == id);
		if id == INITIAL_ENTRY_ID || id == NO_ENTRY_ID || owner.is_some_and(|index| index < position) {
			debug!(entry_id = id, op = operation.op_code(), "history.add_entry.duplicate_id");
			return OperationApplicationResult::failure(OperationError::new(
				DUPLICATE_ENTRY_ID_CODE,
				format!("entry id {id} is already in use"),
			));
		}
		if owner.is_some() {
			debug!(entry_id = id, "history.add_entry.takes_over_future_id");
			self.delete_future_entries();
		}

		let current = self.current_grid();
		let context = self.change_context(id, operation.description());
		let result = match operation.apply(&current, &context) {
			Ok(result) => mark_columns_as_modified(result, operation.as_ref(), id),
			Err(error) => {
				debug!(entry_id = id, op = operation.op_code(), code = %error.code, "history.add_entry.rejected");
				// No entry owns `id` at this point: whatever it registered is ours.
				self.change_data.discard_all(id);
				return OperationApplicationResult::failure(error);
			}
		};

		self.delete_future_entries();

		let needs_refreshing = self.change_data.needs_refreshing(id);
		let entry = HistoryEntry::new(id, operation, result.grid_preservation);
		let position = {
			let mut timeline = self.timeline.lock();
			let in_progress = timeline.steps[timeline.position].in_progress || needs_refreshing;
			timeline.steps.push(Step::computed(result.grid, in_progress));
			timeline.position += 1;
			timeline.position
		};
		self.entries.push(entry.clone());
		trace!(
			entry_id = id,
			op = entry.operation().op_code(),
			preservation = ?entry.grid_preservation(),
			position,
			"history.add_entry"
		);

		self.update_cached_position();
		OperationApplicationResult::success(entry)
	}

	/// Drops every entry after the current position, along with their change
	/// data and cached grids.
	pub fn delete_future_entries(&mut self) {
		let position = self.position();
		if position == self.entries.len() {
			return;
		}

		self.forget_cached_range(position + 1..self.entries.len() + 1);
		let discarded_steps = self.timeline.lock().steps.split_off(position + 1);
		let discarded = self.entries.split_off(position);
		for (entry, step) in discarded.iter().zip(&discarded_steps) {
			self.change_data.discard_all(entry.id());
			if step.on_disk
				&& let Err(err) = self.grid_cache.uncache_grid(entry.id())
			{
				warn!(entry_id = entry.id(), error = %err, "history.discard.uncache_failed");
			}
		}
		debug!(position, discarded = discarded.len(), "history.future_discarded");
	}

	/// Moves to the state right after entry `entry_id` ([`INITIAL_ENTRY_ID`]
	/// for the initial state).
	///
	/// Returns the weakest preservation among the traversed entries, or
	/// [`GridPreservation::PreservesRecords`] if the position did not change.
	/// Unknown ids and failed recomputations leave the history untouched.
	pub fn undo_redo(&mut self, entry_id: EntryId) -> Result<GridPreservation> {
		let old_position = self.position();
		let new_position = if entry_id == INITIAL_ENTRY_ID {
			0
		} else {
			let position = self.entry_index(entry_id)? + 1;
			self.compute_step(position, false)?;
			position
		};
		self.timeline.lock().position = new_position;

		let traversed = old_position.min(new_position)..old_position.max(new_position);
		let preservation = GridPreservation::weakest(self.entries[traversed].iter().map(HistoryEntry::grid_preservation));
		debug!(from = old_position, to = new_position, ?preservation, "history.undo_redo");

		self.update_cached_position();
		Ok(preservation)
	}

	/// Recomputes the current step if it depends on change data that was
	/// still in flight.
	pub fn refresh_current_grid(&mut self) -> Result<()> {
		let position = self.position();
		self.compute_step(position, true)?;
		self.update_cached_position();
		Ok(())
	}

	/// Persists the step at `position` to the grid cache and serves it from
	/// there.
	///
	/// The following steps up to the next persisted one were derived from the
	/// in-memory grid, so they are dropped and recomputed from the persisted
	/// copy.
	pub fn cache_intermediate_grid_on_disk(&mut self, position: usize) -> Result<()> {
		self.check_position(position)?;
		if position == 0 {
			return Err(HistoryError::InvalidPosition {
				position,
				len: self.entries.len(),
			});
		}

		let grid = self.compute_step(position, false)?;
		let entry_id = self.entries[position - 1].id();
		let was_on_disk = self.is_cached_on_disk(position);
		let cached = self
			.grid_cache
			.cache_grid(entry_id, &grid)
			.map_err(|source| HistoryError::CacheIo { entry_id, source })?;

		let replaced = self.replace_steps(position, |step| {
			step.grid = Some(cached);
			step.on_disk = true;
		});
		if let Err(err) = replaced {
			if !was_on_disk && let Err(cleanup) = self.grid_cache.uncache_grid(entry_id) {
				warn!(entry_id, error = %cleanup, "history.step.cache_rollback_failed");
			}
			return Err(err);
		}
		debug!(position, entry_id, "history.step.cached_on_disk");
		Ok(())
	}

	/// Removes the step at `position` from the grid cache and recomputes
	/// whatever depended on the persisted copy.
	pub fn uncache_grid_from_disk(&mut self, position: usize) -> Result<()> {
		self.check_position(position)?;
		if position == 0 {
			return Err(HistoryError::InvalidPosition {
				position,
				len: self.entries.len(),
			});
		}

		let entry_id = self.entries[position - 1].id();
		self.grid_cache
			.uncache_grid(entry_id)
			.map_err(|source| HistoryError::CacheIo { entry_id, source })?;

		self.replace_steps(position, |step| {
			step.grid = None;
			step.on_disk = false;
		})?;
		debug!(position, entry_id, "history.step.removed_from_disk");
		Ok(())
	}

	/// Earliest step whose grid yields the same result as `step` for a
	/// browsing state reading `dependencies`.
	///
	/// Walks back while the preceding entry keeps rows (or records, in
	/// [`EngineMode::RecordBased`]) and every dependency is unchanged in the
	/// earlier step. Unknown dependencies (`None`) pin the state to `step`.
	/// Steps that are not computed stop the walk.
	pub fn earliest_step_containing_dependencies(&self, step: usize, dependencies: Option<&[ColumnId]>, mode: EngineMode) -> usize {
		let Some(dependencies) = dependencies else {
			return step;
		};
		let timeline = self.timeline.lock();
		let mut current = step.min(self.entries.len());
		while current > 0 {
			let preservation = self.entries[current - 1].grid_preservation();
			let preserved = match mode {
				EngineMode::RowBased => preservation.preserves_rows(),
				EngineMode::RecordBased => preservation.preserves_records(),
			};
			if !preserved {
				break;
			}
			let Some(previous) = timeline.steps[current - 1].grid.as_ref() else {
				break;
			};
			if !dependencies.iter().all(|id| previous.column_model().contains_column_id(id)) {
				break;
			}
			current -= 1;
		}
		current
	}

	/// Cancels caching and releases all change data of this history.
	///
	/// In-flight attempts are not awaited; they observe the cancellation and
	/// discard their work.
	pub fn dispose(&mut self) {
		for attempt in self.attempts.drain(..) {
			attempt.token.cancel();
		}
		{
			let mut timeline = self.timeline.lock();
			let caching = &mut timeline.caching;
			caching.cached_position = 0;
			caching.desired_cached_position = None;
			caching.position_being_cached = None;
			if let Some(grid) = caching.cached_grid.take() {
				grid.uncache();
			}
		}
		for entry in &self.entries {
			self.change_data.discard_all(entry.id());
		}
		self.change_data.dispose();
		debug!(entries = self.entries.len(), "history.disposed");
	}

	fn check_position(&self, position: usize) -> Result<()> {
		if position > self.entries.len() {
			return Err(HistoryError::InvalidPosition {
				position,
				len: self.entries.len(),
			});
		}
		Ok(())
	}

	fn change_context(&self, entry_id: EntryId, description: &str) -> ChangeContext {
		ChangeContext::create(entry_id, self.options.project_id, self.change_data.clone(), description)
	}

	/// Lazily computes the step at `position` from the nearest computed
	/// ancestor. The timeline lock is not held while operations run.
	fn compute_step(&self, position: usize, refresh: bool) -> Result<GridRef> {
		{
			let timeline = self.timeline.lock();
			let step = &timeline.steps[position];
			if let Some(grid) = &step.grid
				&& !(refresh && step.in_progress)
			{
				return Ok(grid.clone());
			}
			assert!(position > 0, "the initial grid is always computed");
		}

		let previous = self.compute_step(position - 1, refresh)?;
		let entry = &self.entries[position - 1];
		let context = self.change_context(entry.id(), entry.description());
		let result = entry.operation().apply(&previous, &context).map_err(|source| HistoryError::Recompute {
			position,
			entry_id: entry.id(),
			source,
		})?;
		let grid = mark_columns_as_modified(result, entry.operation().as_ref(), entry.id()).grid;
		let needs_refreshing = self.change_data.needs_refreshing(entry.id());

		let mut timeline = self.timeline.lock();
		let in_progress = timeline.steps[position - 1].in_progress || needs_refreshing;
		timeline.steps[position] = Step::computed(grid.clone(), in_progress);
		trace!(position, entry_id = entry.id(), in_progress, refresh, "history.step.computed");
		Ok(grid)
	}

	/// Applies `update` to the step at `position`, drops the steps derived
	/// from it up to the next persisted one, then recomputes the current
	/// step. Everything is rolled back if that recomputation fails.
	fn replace_steps(&mut self, position: usize, update: impl FnOnce(&mut Step)) -> Result<()> {
		let end = self.timeline.lock().next_on_disk_after(position);
		self.forget_cached_range(position..end);

		let saved = {
			let mut timeline = self.timeline.lock();
			let saved = timeline.steps[position..end].to_vec();
			update(&mut timeline.steps[position]);
			for step in &mut timeline.steps[position + 1..end] {
				step.grid = None;
			}
			saved
		};

		let current = self.position();
		if let Err(err) = self.compute_step(current, false) {
			{
				let mut timeline = self.timeline.lock();
				for (slot, step) in timeline.steps[position..end].iter_mut().zip(saved) {
					*slot = step;
				}
			}
			self.update_cached_position();
			return Err(err);
		}
		self.update_cached_position();
		Ok(())
	}

	fn is_change_expensive(&self, index: usize) -> bool {
		self.expense.is_expensive(&self.entries[index], self.change_data.as_ref())
	}

	/// Entry whose application produced the step at `position`.
	fn step_entry_id(&self, position: usize) -> EntryId {
		match position {
			0 => INITIAL_ENTRY_ID,
			position => self.entries[position - 1].id(),
		}
	}
}

impl Drop for History {
	fn drop(&mut self) {
		for attempt in &self.attempts {
			attempt.token.cancel();
		}
	}
}

/// Stamps every column of a row-mapping result as last modified by
/// `entry_id`. Other results pass through unchanged.
pub fn mark_columns_as_modified(result: ChangeResult, operation: &dyn Operation, entry_id: EntryId) -> ChangeResult {
	if !operation.is_row_map() {
		return result;
	}
	let columns = result.grid.column_model().mark_columns_as_modified(entry_id);
	ChangeResult {
		grid: result.grid.with_column_model(columns),
		grid_preservation: result.grid_preservation,
	}
}
