//! In-process fakes for exercising the history engine without a data engine.
//!
//! Grids created here share a [`CacheControl`] with every grid derived from
//! them, so a test can refuse pins, park `cache()` or `uncache()` calls
//! behind a [`CacheGate`], and count outstanding pins across a whole history.

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
	ChangeContext, ChangeData, ChangeDataId, ChangeDataStore, ChangeResult, ColumnMetadata, ColumnModel, EntryId, Grid, GridCache, GridCodec,
	GridPreservation, GridRef, MemoryChangeDataStore, MemoryGridCache, Operation, OperationError,
};

static NEXT_GRID_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct GateState {
	open: bool,
	entered: usize,
}

/// Parks `cache()` or `uncache()` calls until opened.
#[derive(Debug, Default)]
pub struct CacheGate {
	state: Mutex<GateState>,
	cond: Condvar,
}

impl CacheGate {
	pub fn closed() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn open(&self) {
		self.state.lock().open = true;
		self.cond.notify_all();
	}

	/// Blocks until at least `count` calls reached the gate.
	pub fn wait_entered(&self, count: usize) {
		let mut state = self.state.lock();
		while state.entered < count {
			self.cond.wait(&mut state);
		}
	}

	fn pass(&self) {
		let mut state = self.state.lock();
		state.entered += 1;
		self.cond.notify_all();
		while !state.open {
			self.cond.wait(&mut state);
		}
	}
}

/// Pin behaviour and counters shared by a family of [`TestGrid`]s.
#[derive(Debug, Default)]
pub struct CacheControl {
	refuse: AtomicBool,
	gate: Mutex<Option<Arc<CacheGate>>>,
	uncache_gate: Mutex<Option<Arc<CacheGate>>>,
	cache_calls: AtomicUsize,
	pinned: AtomicUsize,
}

impl CacheControl {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Makes subsequent `cache()` calls fail, as under memory pressure.
	pub fn refuse_pins(&self, refuse: bool) {
		self.refuse.store(refuse, Ordering::SeqCst);
	}

	pub fn install_gate(&self, gate: Arc<CacheGate>) {
		*self.gate.lock() = Some(gate);
	}

	pub fn remove_gate(&self) {
		*self.gate.lock() = None;
	}

	/// Parks subsequent `uncache()` calls on `gate`, before the pin is released.
	pub fn install_uncache_gate(&self, gate: Arc<CacheGate>) {
		*self.uncache_gate.lock() = Some(gate);
	}

	pub fn cache_calls(&self) -> usize {
		self.cache_calls.load(Ordering::SeqCst)
	}

	/// Number of grids currently pinned.
	pub fn pinned(&self) -> usize {
		self.pinned.load(Ordering::SeqCst)
	}
}

/// Grid fake carrying only a column model and a row count.
#[derive(Debug)]
pub struct TestGrid {
	id: u64,
	columns: ColumnModel,
	rows: u64,
	control: Arc<CacheControl>,
	pinned: AtomicBool,
}

impl TestGrid {
	pub fn new(columns: ColumnModel, rows: u64) -> Arc<Self> {
		Self::with_control(columns, rows, CacheControl::new())
	}

	pub fn with_control(columns: ColumnModel, rows: u64, control: Arc<CacheControl>) -> Arc<Self> {
		Arc::new(Self {
			id: NEXT_GRID_ID.fetch_add(1, Ordering::Relaxed),
			columns,
			rows,
			control,
			pinned: AtomicBool::new(false),
		})
	}

	/// Process-unique identity of this snapshot.
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn control(&self) -> &Arc<CacheControl> {
		&self.control
	}
}

impl Grid for TestGrid {
	fn column_model(&self) -> &ColumnModel {
		&self.columns
	}

	fn row_count(&self) -> u64 {
		self.rows
	}

	fn with_column_model(&self, columns: ColumnModel) -> GridRef {
		Self::with_control(columns, self.rows, self.control.clone())
	}

	fn cache(&self) -> bool {
		self.control.cache_calls.fetch_add(1, Ordering::SeqCst);
		let gate = self.control.gate.lock().clone();
		if let Some(gate) = gate {
			gate.pass();
		}
		if self.control.refuse.load(Ordering::SeqCst) {
			return false;
		}
		if !self.pinned.swap(true, Ordering::SeqCst) {
			self.control.pinned.fetch_add(1, Ordering::SeqCst);
		}
		true
	}

	fn uncache(&self) {
		let gate = self.control.uncache_gate.lock().clone();
		if let Some(gate) = gate {
			gate.pass();
		}
		if self.pinned.swap(false, Ordering::SeqCst) {
			self.control.pinned.fetch_sub(1, Ordering::SeqCst);
		}
	}

	fn is_cached(&self) -> bool {
		self.pinned.load(Ordering::SeqCst)
	}
}

#[derive(Serialize, Deserialize)]
struct EncodedGrid {
	columns: ColumnModel,
	rows: u64,
}

/// JSON codec for [`TestGrid`]s. Decoded grids get a fresh [`CacheControl`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TestGridCodec;

impl GridCodec for TestGridCodec {
	fn encode(&self, grid: &dyn Grid) -> io::Result<Vec<u8>> {
		let encoded = EncodedGrid {
			columns: grid.column_model().clone(),
			rows: grid.row_count(),
		};
		serde_json::to_vec(&encoded).map_err(io::Error::other)
	}

	fn decode(&self, bytes: &[u8]) -> io::Result<GridRef> {
		let decoded: EncodedGrid = serde_json::from_slice(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
		Ok(TestGrid::new(decoded.columns, decoded.rows))
	}
}

/// Registry code of [`TestOperation`].
pub const TEST_OPERATION_CODE: &str = "test-operation";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TestOperationParams {
	#[serde(skip_serializing_if = "Option::is_none")]
	preservation: Option<GridPreservation>,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	row_map: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	add_column: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	remove_column: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	failure: Option<OperationError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	change_data: Option<String>,
}

/// Configurable operation fake.
///
/// By default it keeps the columns, preserves records and produces a new
/// grid object on every application.
#[derive(Debug)]
pub struct TestOperation {
	description: String,
	params: TestOperationParams,
	applications: AtomicUsize,
	succeeds: Option<usize>,
}

impl TestOperation {
	pub fn new(description: impl Into<String>) -> Self {
		Self {
			description: description.into(),
			params: TestOperationParams::default(),
			applications: AtomicUsize::new(0),
			succeeds: None,
		}
	}

	/// Rebuilds an operation from its persisted parameters.
	pub fn from_parameters(description: &str, parameters: &Map<String, Value>) -> Result<Self, serde_json::Error> {
		let params = serde_json::from_value(Value::Object(parameters.clone()))?;
		Ok(Self {
			description: description.to_string(),
			params,
			applications: AtomicUsize::new(0),
			succeeds: None,
		})
	}

	#[must_use]
	pub fn with_preservation(mut self, preservation: GridPreservation) -> Self {
		self.params.preservation = Some(preservation);
		self
	}

	#[must_use]
	pub fn row_map(mut self) -> Self {
		self.params.row_map = true;
		self
	}

	#[must_use]
	pub fn adding_column(mut self, name: impl Into<String>) -> Self {
		self.params.add_column = Some(name.into());
		self
	}

	/// Removes a column, failing with `bad_column` if it does not exist.
	#[must_use]
	pub fn removing_column(mut self, name: impl Into<String>) -> Self {
		self.params.remove_column = Some(name.into());
		self
	}

	#[must_use]
	pub fn failing(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
		self.params.failure = Some(OperationError::new(code, message));
		self
	}

	/// Succeeds `times` times, then fails with `exhausted`. Not persisted.
	#[must_use]
	pub fn failing_after(mut self, times: usize) -> Self {
		self.succeeds = Some(times);
		self
	}

	/// Registers in-flight change data named `data_id` when applied.
	#[must_use]
	pub fn fetching(mut self, data_id: impl Into<String>) -> Self {
		self.params.change_data = Some(data_id.into());
		self
	}

	/// Number of times `apply` ran.
	pub fn applications(&self) -> usize {
		self.applications.load(Ordering::SeqCst)
	}
}

impl Operation for TestOperation {
	fn op_code(&self) -> &str {
		TEST_OPERATION_CODE
	}

	fn description(&self) -> &str {
		&self.description
	}

	fn apply(&self, grid: &GridRef, context: &ChangeContext) -> Result<ChangeResult, OperationError> {
		let earlier = self.applications.fetch_add(1, Ordering::SeqCst);
		if let Some(failure) = &self.params.failure {
			return Err(failure.clone());
		}
		if self.succeeds.is_some_and(|times| earlier >= times) {
			return Err(OperationError::new("exhausted", format!("{} already ran {earlier} times", self.description)));
		}

		let mut columns = grid.column_model().columns().to_vec();
		if let Some(name) = &self.params.remove_column {
			let Some(index) = columns.iter().position(|c| &c.name == name) else {
				return Err(OperationError::new("bad_column", format!("column {name} does not exist")));
			};
			columns.remove(index);
		}
		if let Some(name) = &self.params.add_column {
			columns.push(ColumnMetadata::new(name.clone()));
		}
		if let Some(data_id) = &self.params.change_data {
			let description = self.description.clone();
			context.change_data(data_id, move || description);
		}

		let preservation = self.params.preservation.unwrap_or(GridPreservation::PreservesRecords);
		Ok(ChangeResult::new(grid.with_column_model(ColumnModel::new(columns)), preservation))
	}

	fn is_row_map(&self) -> bool {
		self.params.row_map
	}

	fn parameters(&self) -> Map<String, Value> {
		match serde_json::to_value(&self.params) {
			Ok(Value::Object(map)) => map,
			_ => Map::new(),
		}
	}
}

/// Memory change data store recording the bookkeeping calls it receives.
#[derive(Debug, Default)]
pub struct RecordingChangeDataStore {
	inner: MemoryChangeDataStore,
	discarded: Mutex<Vec<EntryId>>,
	disposals: AtomicUsize,
}

impl RecordingChangeDataStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn inner(&self) -> &MemoryChangeDataStore {
		&self.inner
	}

	/// Entry ids passed to `discard_all`, in call order.
	pub fn discarded(&self) -> Vec<EntryId> {
		self.discarded.lock().clone()
	}

	pub fn disposals(&self) -> usize {
		self.disposals.load(Ordering::SeqCst)
	}
}

impl ChangeDataStore for RecordingChangeDataStore {
	fn needs_refreshing(&self, entry_id: EntryId) -> bool {
		self.inner.needs_refreshing(entry_id)
	}

	fn change_data_ids(&self, entry_id: EntryId) -> BTreeSet<ChangeDataId> {
		self.inner.change_data_ids(entry_id)
	}

	fn retrieve_any(&self, id: &ChangeDataId) -> Option<ChangeData> {
		self.inner.retrieve_any(id)
	}

	fn store_any(&self, id: ChangeDataId, value: ChangeData, complete: bool) {
		self.inner.store_any(id, value, complete);
	}

	fn discard_all(&self, entry_id: EntryId) {
		self.discarded.lock().push(entry_id);
		self.inner.discard_all(entry_id);
	}

	fn dispose(&self) {
		self.disposals.fetch_add(1, Ordering::SeqCst);
		self.inner.dispose();
	}
}

/// Memory grid cache whose reads and writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyGridCache {
	inner: MemoryGridCache,
	fail_writes: AtomicBool,
	fail_reads: AtomicBool,
	writes: AtomicUsize,
}

impl FlakyGridCache {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}

	pub fn fail_reads(&self, fail: bool) {
		self.fail_reads.store(fail, Ordering::SeqCst);
	}

	/// Number of successful `cache_grid` calls.
	pub fn writes(&self) -> usize {
		self.writes.load(Ordering::SeqCst)
	}

	pub fn contains(&self, entry_id: EntryId) -> bool {
		self.inner.contains(entry_id)
	}
}

impl GridCache for FlakyGridCache {
	fn cache_grid(&self, entry_id: EntryId, grid: &GridRef) -> io::Result<GridRef> {
		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(io::Error::other("disk full"));
		}
		self.writes.fetch_add(1, Ordering::SeqCst);
		// Hand back a distinct object, as a real cache reading from disk would.
		let stored = grid.with_column_model(grid.column_model().clone());
		self.inner.cache_grid(entry_id, &stored)
	}

	fn get_cached_grid(&self, entry_id: EntryId) -> io::Result<GridRef> {
		if self.fail_reads.load(Ordering::SeqCst) {
			return Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt grid"));
		}
		self.inner.get_cached_grid(entry_id)
	}

	fn uncache_grid(&self, entry_id: EntryId) -> io::Result<()> {
		self.inner.uncache_grid(entry_id)
	}

	fn list_cached_grid_ids(&self) -> io::Result<BTreeSet<EntryId>> {
		self.inner.list_cached_grid_ids()
	}
}
