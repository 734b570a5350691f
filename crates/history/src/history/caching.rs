//! Caching policy and background caching attempts.
//!
//! One attempt runs per policy decision:
//!
//! ```text
//! Idle -> Caching(target) -> Cached(target)
//!                         -> pin refused -> DiskCaching(target) -> Cached | Failed
//!                         -> Cancelled (from either caching state)
//! ```
//!
//! An attempt publishes its result only while holding the timeline lock and
//! only if its token is still live and the step still holds the grid it
//! cached. A cancelled attempt undoes its own pin and disk copy. Pins and
//! disk copies are released under the same lock that records who owns them,
//! so a newer attempt cannot take one over in between.
//!
//! Step 0 is pinned like any other step when the policy lands on it, and
//! released when another step takes over.

use std::ops::Range;
use std::sync::Arc;

use gridline_model::{EntryId, GridCache, GridRef};
use gridline_worker::{GenerationToken, TaskClass};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::History;
use super::step::Timeline;

/// Handle on a spawned attempt, owned by the foreground.
#[derive(Debug)]
pub(super) struct CachingAttempt {
	pub(super) position: usize,
	pub(super) token: GenerationToken,
	pub(super) handle: JoinHandle<()>,
}

impl History {
	/// Picks the step to keep resident and starts an attempt for it, unless
	/// it is already resident or being cached.
	pub(super) fn update_cached_position(&mut self) {
		self.attempts.retain(|attempt| !attempt.handle.is_finished());
		let Some(target) = self.caching_target() else {
			return;
		};

		let (grid, on_disk) = {
			let mut timeline = self.timeline.lock();
			let step = &timeline.steps[target];
			let Some(grid) = step.grid.clone() else {
				return;
			};
			let on_disk = step.on_disk;
			let caching = &mut timeline.caching;

			if caching.desired_cached_position == Some(target) && caching.position_being_cached == Some(target) {
				trace!(target_position = target, "history.caching.in_flight");
				return;
			}
			let settled = caching.cached_position == target && caching.cached_grid.as_ref().is_some_and(|cached| Arc::ptr_eq(cached, &grid));
			if settled {
				caching.desired_cached_position = Some(target);
				caching.position_being_cached = None;
				drop(timeline);
				self.cancel_attempts(|_| true);
				trace!(target_position = target, "history.caching.settled");
				return;
			}
			(grid, on_disk)
		};

		self.cancel_attempts(|_| true);
		let token = self.clock.issue();
		{
			let mut timeline = self.timeline.lock();
			timeline.caching.desired_cached_position = Some(target);
			timeline.caching.position_being_cached = Some(target);
			timeline.caching.attempt_generation = token.generation();
		}

		let job = CachingJob {
			timeline: self.timeline.clone(),
			grid_cache: self.grid_cache.clone(),
			token: token.clone(),
			target,
			entry_id: self.step_entry_id(target),
			grid,
			on_disk,
			memory_caching: self.options.memory_caching,
			disk_fallback: self.options.disk_fallback,
		};
		let class = if self.options.memory_caching { TaskClass::CpuBlocking } else { TaskClass::IoBlocking };
		debug!(target_position = target, generation = token.generation(), on_disk, "history.caching.start");
		let handle = match gridline_worker::spawn_blocking(class, move || job.run()) {
			Ok(handle) => handle,
			Err(err) => {
				warn!(target_position = target, error = %err, "history.caching.spawn_failed");
				self.timeline.lock().caching.position_being_cached = None;
				return;
			}
		};
		self.attempts.push(CachingAttempt {
			position: target,
			token,
			handle,
		});
	}

	/// Blocks until every attempt started so far has settled.
	///
	/// Returns immediately when nothing is in flight. Must not be called from
	/// inside an async task.
	pub fn wait_for_caching(&mut self) {
		for attempt in self.attempts.drain(..) {
			let Err(err) = gridline_worker::join_blocking(attempt.handle) else {
				continue;
			};
			match gridline_worker::join_error_panic_message(err) {
				Some(message) => warn!(position = attempt.position, panic = %message, "history.caching.panicked"),
				None => debug!(position = attempt.position, "history.caching.aborted"),
			}
		}
	}

	/// Whether an attempt is still running.
	pub fn is_caching(&self) -> bool {
		self.attempts.iter().any(|attempt| !attempt.handle.is_finished())
	}

	/// Nearest step at or behind the current position worth keeping
	/// resident: walk back over cheap changes as long as the earlier step is
	/// already computed, then off any step still waiting for change data.
	fn caching_target(&self) -> Option<usize> {
		let (target, computed) = {
			let timeline = self.timeline.lock();
			let mut target = timeline.position;
			while target > 0 && timeline.steps[target - 1].grid.is_some() && !self.is_change_expensive(target - 1) {
				target -= 1;
			}
			while target > 0 && timeline.steps[target].in_progress {
				target -= 1;
			}
			(target, timeline.steps[target].grid.is_some())
		};

		if !computed && let Err(err) = self.compute_step(target, false) {
			warn!(target_position = target, error = %err, "history.caching.target_unavailable");
			return None;
		}
		Some(target)
	}

	/// Forgets caching bookkeeping pointing into `range`, whose steps are
	/// about to be dropped or replaced.
	pub(super) fn forget_cached_range(&mut self, range: Range<usize>) {
		self.cancel_attempts(|position| range.contains(&position));
		let mut timeline = self.timeline.lock();
		let caching = &mut timeline.caching;
		if caching.desired_cached_position.is_some_and(|position| range.contains(&position)) {
			caching.desired_cached_position = None;
		}
		if caching.position_being_cached.is_some_and(|position| range.contains(&position)) {
			caching.position_being_cached = None;
		}
		if range.contains(&caching.cached_position) {
			caching.cached_position = 0;
			if let Some(grid) = caching.cached_grid.take() {
				trace!(range = ?range, "history.caching.released");
				grid.uncache();
			}
		}
	}

	fn cancel_attempts(&self, mut affected: impl FnMut(usize) -> bool) {
		for attempt in &self.attempts {
			if affected(attempt.position) && !attempt.token.is_cancelled() {
				trace!(position = attempt.position, generation = attempt.token.generation(), "history.caching.cancel");
				attempt.token.cancel();
			}
		}
	}
}

/// Everything one attempt needs, moved onto the blocking pool.
struct CachingJob {
	timeline: Arc<Mutex<Timeline>>,
	grid_cache: Arc<dyn GridCache>,
	token: GenerationToken,
	target: usize,
	entry_id: EntryId,
	grid: GridRef,
	on_disk: bool,
	memory_caching: bool,
	disk_fallback: bool,
}

impl CachingJob {
	fn run(self) {
		if self.token.is_cancelled() {
			self.abandon(false, None);
			return;
		}

		let pinned = self.memory_caching && self.grid.cache();
		let mut disk_copy = None;
		let cached = if pinned || self.on_disk {
			true
		} else if self.disk_fallback {
			match self.grid_cache.cache_grid(self.entry_id, &self.grid) {
				Ok(handle) => {
					disk_copy = Some(handle);
					true
				}
				Err(err) => {
					warn!(entry_id = self.entry_id, error = %err, "history.caching.disk_failed");
					false
				}
			}
		} else {
			false
		};

		let mut timeline = self.timeline.lock();
		if self.token.is_cancelled() || !timeline.holds(self.target, &self.grid) {
			drop(timeline);
			self.abandon(pinned, disk_copy);
			return;
		}

		let caching = &mut timeline.caching;
		if caching.attempt_generation == self.token.generation() {
			caching.position_being_cached = None;
		}
		if !cached {
			drop(timeline);
			warn!(target_position = self.target, entry_id = self.entry_id, "history.caching.failed");
			return;
		}

		let wrote_disk_copy = disk_copy.is_some();
		let resident = disk_copy.clone().unwrap_or_else(|| self.grid.clone());
		let previous_position = std::mem::replace(&mut caching.cached_position, self.target);
		let previous_grid = caching.cached_grid.replace(resident.clone());
		if let Some(previous) = previous_grid
			&& !Arc::ptr_eq(&previous, &resident)
		{
			previous.uncache();
		}
		if let Some(handle) = disk_copy {
			let step = &mut timeline.steps[self.target];
			step.grid = Some(handle);
			step.on_disk = true;
		}
		drop(timeline);

		debug!(
			target_position = self.target,
			previous = previous_position,
			pinned,
			wrote_disk_copy,
			"history.caching.committed"
		);
	}

	/// Undoes the side effects of an attempt that lost its target.
	fn abandon(&self, pinned: bool, disk_copy: Option<GridRef>) {
		let mut timeline = self.timeline.lock();
		let still_held = timeline.holds(self.target, &self.grid);
		let on_disk = timeline.steps.get(self.target).is_some_and(|step| step.on_disk);
		let caching = &mut timeline.caching;
		let ours = caching.attempt_generation == self.token.generation();
		if ours {
			caching.position_being_cached = None;
		}
		// A newer attempt on the same grid takes over both the pin and the disk copy.
		let handed_over = !ours && still_held && caching.position_being_cached == Some(self.target);
		let committed = caching.cached_grid.as_ref().is_some_and(|cached| Arc::ptr_eq(cached, &self.grid));

		if pinned && !handed_over && !committed {
			self.grid.uncache();
		}
		if disk_copy.is_some()
			&& !handed_over
			&& !on_disk
			&& let Err(err) = self.grid_cache.uncache_grid(self.entry_id)
		{
			warn!(entry_id = self.entry_id, error = %err, "history.caching.cleanup_failed");
		}
		drop(timeline);
		debug!(target_position = self.target, generation = self.token.generation(), pinned, "history.caching.cancelled");
	}
}
