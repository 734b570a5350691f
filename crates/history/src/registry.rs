//! Explicit mapping from persisted operation codes to operations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gridline_model::{ChangeContext, ChangeResult, GridRef, Operation, OperationError, OperationRef};
use serde_json::{Map, Value};

use crate::entry::OperationRecord;
use crate::{HistoryError, Result};

/// Error code reported when an [`UnknownOperation`] is applied.
pub const UNKNOWN_OPERATION_CODE: &str = "unknown_operation";

type Decoder = Arc<dyn Fn(&str, &Map<String, Value>) -> std::result::Result<OperationRef, OperationError> + Send + Sync>;

/// Decoders for persisted operations, keyed by operation code.
///
/// The registry is handed to the persistence boundary; a history never
/// looks operations up by itself.
#[derive(Clone, Default)]
pub struct OperationRegistry {
	decoders: HashMap<String, Decoder>,
}

impl fmt::Debug for OperationRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut codes: Vec<_> = self.decoders.keys().collect();
		codes.sort();
		f.debug_struct("OperationRegistry").field("codes", &codes).finish()
	}
}

impl OperationRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the decoder of an operation code, replacing any previous one.
	///
	/// The decoder receives the operation description and its parameters.
	pub fn register<F>(&mut self, op_code: impl Into<String>, decoder: F) -> &mut Self
	where
		F: Fn(&str, &Map<String, Value>) -> std::result::Result<OperationRef, OperationError> + Send + Sync + 'static,
	{
		let op_code = op_code.into();
		if self.decoders.insert(op_code.clone(), Arc::new(decoder)).is_some() {
			tracing::debug!(op = %op_code, "operation_registry.replaced");
		}
		self
	}

	#[must_use]
	pub fn with<F>(mut self, op_code: impl Into<String>, decoder: F) -> Self
	where
		F: Fn(&str, &Map<String, Value>) -> std::result::Result<OperationRef, OperationError> + Send + Sync + 'static,
	{
		self.register(op_code, decoder);
		self
	}

	pub fn contains(&self, op_code: &str) -> bool {
		self.decoders.contains_key(op_code)
	}

	/// Rebuilds an operation. Unregistered codes yield an [`UnknownOperation`].
	pub fn decode_operation(&self, op_code: &str, description: &str, parameters: &Map<String, Value>) -> Result<OperationRef> {
		let Some(decoder) = self.decoders.get(op_code) else {
			tracing::warn!(op = %op_code, "operation_registry.unknown_code");
			return Ok(Arc::new(UnknownOperation::new(op_code, description, parameters.clone())));
		};
		decoder(description, parameters).map_err(|source| HistoryError::InvalidOperation {
			op: op_code.to_string(),
			source,
		})
	}

	pub(crate) fn decode(&self, record: &OperationRecord) -> Result<OperationRef> {
		self.decode_operation(&record.op, &record.description, &record.parameters)
	}
}

/// Placeholder for an operation whose code is not registered.
///
/// It serialises back to exactly what was read and refuses to apply, so a
/// history mentioning it stays loadable as long as the steps after it can be
/// served from the grid cache.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownOperation {
	op_code: String,
	description: String,
	parameters: Map<String, Value>,
}

impl UnknownOperation {
	pub fn new(op_code: impl Into<String>, description: impl Into<String>, parameters: Map<String, Value>) -> Self {
		Self {
			op_code: op_code.into(),
			description: description.into(),
			parameters,
		}
	}
}

impl Operation for UnknownOperation {
	fn op_code(&self) -> &str {
		&self.op_code
	}

	fn description(&self) -> &str {
		&self.description
	}

	fn apply(&self, _grid: &GridRef, _context: &ChangeContext) -> std::result::Result<ChangeResult, OperationError> {
		Err(OperationError::new(
			UNKNOWN_OPERATION_CODE,
			format!("operation '{}' is not available", self.op_code),
		))
	}

	fn parameters(&self) -> Map<String, Value> {
		self.parameters.clone()
	}
}
