use std::io;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::{JoinError, JoinHandle};
use tracing::trace;

use crate::TaskClass;

/// Runtime lent to callers that are not running inside one.
static FALLBACK: OnceLock<Runtime> = OnceLock::new();

fn blocking_pool() -> io::Result<Handle> {
	if let Ok(ambient) = Handle::try_current() {
		return Ok(ambient);
	}
	if let Some(runtime) = FALLBACK.get() {
		return Ok(runtime.handle().clone());
	}
	// Only the blocking pool is used, so one worker thread is enough.
	let built = Builder::new_multi_thread().worker_threads(1).thread_name("gridline-blocking").build()?;
	Ok(FALLBACK.get_or_init(|| built).handle().clone())
}

/// Runs `work` on the blocking pool of the ambient runtime, or of a shared
/// fallback runtime when called from synchronous code.
///
/// Fails only if the fallback runtime cannot be started.
pub fn spawn_blocking<F, R>(class: TaskClass, work: F) -> io::Result<JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let pool = blocking_pool()?;
	trace!(worker_class = class.as_str(), "worker.blocking.spawn");
	Ok(pool.spawn_blocking(work))
}

/// Waits for a spawned task from synchronous code.
///
/// Parks the calling thread, so it must not be called from inside an async
/// task running on the same runtime.
pub fn join_blocking<T>(handle: JoinHandle<T>) -> Result<T, JoinError> {
	futures::executor::block_on(handle)
}

/// Panic message carried by `err`, or `None` if the task was cancelled.
pub fn join_error_panic_message(err: JoinError) -> Option<String> {
	if !err.is_panic() {
		return None;
	}
	let payload = err.into_panic();
	let message = match payload.downcast::<String>() {
		Ok(owned) => *owned,
		Err(payload) => match payload.downcast_ref::<&'static str>() {
			Some(text) => (*text).to_string(),
			None => "non-string panic payload".to_string(),
		},
	};
	Some(message)
}
