use std::sync::Arc;

use gridline_model::GridRef;

/// One slot of the step list. `grid == None` means never computed or evicted.
#[derive(Debug, Clone, Default)]
pub(crate) struct Step {
	pub(crate) grid: Option<GridRef>,
	/// The grid in this slot is served from the grid cache.
	pub(crate) on_disk: bool,
	/// Some change data this step depends on is still being computed.
	pub(crate) in_progress: bool,
}

impl Step {
	/// The initial grid counts as persisted: it is never evicted.
	pub(crate) fn initial(grid: GridRef) -> Self {
		Self {
			grid: Some(grid),
			on_disk: true,
			in_progress: false,
		}
	}

	pub(crate) fn computed(grid: GridRef, in_progress: bool) -> Self {
		Self {
			grid: Some(grid),
			on_disk: false,
			in_progress,
		}
	}

	/// A replayed step, present only if the grid cache held it.
	pub(crate) fn restored(grid: Option<GridRef>) -> Self {
		Self {
			on_disk: grid.is_some(),
			grid,
			in_progress: false,
		}
	}
}

/// Bookkeeping of the step the caching policy keeps resident.
#[derive(Debug)]
pub(crate) struct CachingState {
	/// Step believed to be pinned in memory or on disk.
	pub(crate) cached_position: usize,
	/// The pinned grid, released when another step takes over. `None` until
	/// the first attempt commits.
	pub(crate) cached_grid: Option<GridRef>,
	/// Step the latest policy run wants resident.
	pub(crate) desired_cached_position: Option<usize>,
	/// Step targeted by the attempt currently in flight.
	pub(crate) position_being_cached: Option<usize>,
	/// Generation of the latest attempt.
	pub(crate) attempt_generation: u64,
}

/// State shared between the foreground and the caching attempts.
#[derive(Debug)]
pub(crate) struct Timeline {
	pub(crate) steps: Vec<Step>,
	pub(crate) position: usize,
	pub(crate) caching: CachingState,
}

impl Timeline {
	pub(crate) fn new(initial_grid: GridRef) -> Self {
		Self {
			steps: vec![Step::initial(initial_grid)],
			position: 0,
			caching: CachingState {
				cached_position: 0,
				cached_grid: None,
				desired_cached_position: Some(0),
				position_being_cached: None,
				attempt_generation: 0,
			},
		}
	}

	/// Returns true if the slot at `position` still holds exactly `grid`.
	pub(crate) fn holds(&self, position: usize, grid: &GridRef) -> bool {
		self.steps
			.get(position)
			.and_then(|step| step.grid.as_ref())
			.is_some_and(|held| Arc::ptr_eq(held, grid))
	}

	/// Index of the first on-disk step after `position`, or the step count.
	pub(crate) fn next_on_disk_after(&self, position: usize) -> usize {
		(position + 1..self.steps.len())
			.find(|&index| self.steps[index].on_disk)
			.unwrap_or(self.steps.len())
	}
}
