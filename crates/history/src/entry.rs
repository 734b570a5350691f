use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use gridline_model::{EntryId, GridPreservation, OperationRef};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{OperationRegistry, Result};

static LAST_ALLOCATED_ID: AtomicI64 = AtomicI64::new(0);

/// Immutable record of one applied operation.
///
/// `entries[i]` of a history turns step `i` into step `i + 1`.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
	id: EntryId,
	description: String,
	time: DateTime<Utc>,
	operation: OperationRef,
	grid_preservation: GridPreservation,
}

impl HistoryEntry {
	/// Creates an entry stamped with the current time.
	pub fn new(id: EntryId, operation: OperationRef, grid_preservation: GridPreservation) -> Self {
		Self {
			id,
			description: operation.description().to_string(),
			time: Utc::now(),
			operation,
			grid_preservation,
		}
	}

	#[must_use]
	pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
		self.time = time;
		self
	}

	#[must_use]
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();
		self
	}

	/// Allocates a fresh entry id from the wall clock in milliseconds.
	///
	/// Ids are strictly increasing within the process, even when called
	/// several times in the same millisecond.
	pub fn allocate_id() -> EntryId {
		let now = Utc::now().timestamp_millis();
		let mut last = LAST_ALLOCATED_ID.load(Ordering::Relaxed);
		loop {
			let next = now.max(last + 1);
			match LAST_ALLOCATED_ID.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
				Ok(_) => return next,
				Err(actual) => last = actual,
			}
		}
	}

	pub fn id(&self) -> EntryId {
		self.id
	}

	pub fn description(&self) -> &str {
		&self.description
	}

	pub fn time(&self) -> DateTime<Utc> {
		self.time
	}

	pub fn operation(&self) -> &OperationRef {
		&self.operation
	}

	pub fn grid_preservation(&self) -> GridPreservation {
		self.grid_preservation
	}

	pub(crate) fn to_record(&self) -> EntryRecord {
		EntryRecord {
			id: self.id,
			description: self.description.clone(),
			time: self.time,
			grid_preservation: self.grid_preservation,
			operation: OperationRecord {
				op: self.operation.op_code().to_string(),
				description: self.operation.description().to_string(),
				parameters: self.operation.parameters(),
			},
		}
	}

	pub(crate) fn from_record(record: EntryRecord, registry: &OperationRegistry) -> Result<Self> {
		let operation = registry.decode(&record.operation)?;
		Ok(Self {
			id: record.id,
			description: record.description,
			time: record.time,
			operation,
			grid_preservation: record.grid_preservation,
		})
	}
}

impl Serialize for HistoryEntry {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		self.to_record().serialize(serializer)
	}
}

/// Persisted shape of a [`HistoryEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EntryRecord {
	pub(crate) id: EntryId,
	pub(crate) description: String,
	#[serde(serialize_with = "serialize_seconds")]
	pub(crate) time: DateTime<Utc>,
	// Histories written before preservation was tracked carry no value.
	#[serde(default = "unknown_preservation")]
	pub(crate) grid_preservation: GridPreservation,
	pub(crate) operation: OperationRecord,
}

/// Persisted shape of an operation: its registry code, its description and
/// its own parameters side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OperationRecord {
	pub(crate) op: String,
	pub(crate) description: String,
	#[serde(flatten)]
	pub(crate) parameters: Map<String, Value>,
}

fn serialize_seconds<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
	serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn unknown_preservation() -> GridPreservation {
	GridPreservation::NoRowPreservation
}
