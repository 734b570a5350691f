use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Issues tokens with strictly increasing generations.
///
/// An owner keeps one clock and takes a token per attempt; comparing a
/// token's generation with the last one issued tells whether the attempt is
/// still the newest. Clones share the counter.
#[derive(Debug, Default, Clone)]
pub struct GenerationClock {
	issued: Arc<AtomicU64>,
}

impl GenerationClock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Takes the next generation and wraps it in a fresh, uncancelled token.
	pub fn issue(&self) -> GenerationToken {
		let generation = self.issued.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		GenerationToken {
			generation,
			cancel: CancellationToken::new(),
		}
	}
}

/// Cancellation handle of one attempt, tagged with its generation.
///
/// Cancellation is cooperative. The worker checks [`Self::is_cancelled`]
/// before publishing anything; the owner calls [`Self::cancel`] once the
/// attempt is no longer wanted.
#[derive(Debug, Clone)]
pub struct GenerationToken {
	generation: u64,
	cancel: CancellationToken,
}

impl GenerationToken {
	pub const fn generation(&self) -> u64 {
		self.generation
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub fn cancel(&self) {
		self.cancel.cancel();
	}
}
