//! Background task primitives shared by the gridline crates.
//!
//! Blocking work is labelled with a [`TaskClass`] and runs on the blocking
//! pool of the ambient tokio runtime, or of a fallback runtime for
//! synchronous callers. Each attempt carries a [`GenerationToken`] so its
//! owner can cancel it once it is no longer wanted.

mod class;
mod spawn;
mod token;


pub use class::TaskClass;
pub use spawn::{join_blocking, join_error_panic_message, spawn_blocking};
pub use token::{GenerationClock, GenerationToken};
