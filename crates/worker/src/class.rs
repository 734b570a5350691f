/// Label of a piece of blocking work, reported in `worker_class` log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Dominated by filesystem I/O, such as writing a grid to the cache.
	IoBlocking,
	/// Dominated by computation, such as pinning a grid in memory.
	CpuBlocking,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::IoBlocking => "io_blocking",
			Self::CpuBlocking => "cpu_blocking",
		}
	}
}
