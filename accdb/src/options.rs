/// Database-wide tunables. Per-index sizing (key length, cache budget) is
/// supplied separately to `Database::register_index`, since a single
/// database hosts several indexes of differing shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
	/// Data, index and deletion files are rolled over to a fresh file once
	/// the current one would grow past this size.
	pub max_file_size: u64,

	/// Default cache budget, in bytes of cached B-tree node pages, handed
	/// to an index registered without an explicit override (I6).
	pub default_cache_limit: usize,

	/// Bytes of undo-log space a caller expects a typical commit to need.
	/// Informational only -- the log file is a plain append-only `File`
	/// with no preallocation, so this is never read by the commit engine
	/// itself; it exists for callers (and the CLI) that want to size their
	/// own buffers or monitoring around an expected journal footprint.
	pub journal_reserve: usize,
}

impl Default for Options {
	fn default() -> Options {
		Options {
			max_file_size: 128 * 1024 * 1024,
			default_cache_limit: 1024 * 1024,
			journal_reserve: 64 * 1024,
		}
	}
}
