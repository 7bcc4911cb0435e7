use std::io;
use std::path::PathBuf;

error_chain! {
	foreign_links {
		Io(io::Error);
	}

	errors {
		/// A record, index header or log entry failed its checksum or had an
		/// otherwise malformed on-disk shape.
		Corrupt(what: String) {
			description("corrupted on-disk structure")
			display("corrupted on-disk structure: {}", what)
		}

		/// The queried key has no live entry in the index.
		NotFound {
			description("key not found")
			display("key not found")
		}

		/// A commit failed part-way through and the log has not yet been
		/// replayed; the database must not be used until `ensure_consistent`
		/// has run.
		Inconsistent {
			description("database left inconsistent by a failed commit")
			display("database left inconsistent by a failed commit; call ensure_consistent()")
		}

		/// A caller-supplied argument violated an index's declared shape.
		BadArgument(what: String) {
			description("bad argument")
			display("bad argument: {}", what)
		}

		/// No index is registered under the given id.
		UnknownIndex(id: u8) {
			description("unknown index")
			display("no index registered with id {}", id)
		}

		/// The data directory is held open by another process.
		DatabaseLocked(path: PathBuf) {
			description("database directory is locked")
			display("database directory {:?} is locked by another process", path)
		}
	}
}

impl PartialEq for ErrorKind {
	fn eq(&self, other: &ErrorKind) -> bool {
		match (self, other) {
			(&ErrorKind::Corrupt(ref a), &ErrorKind::Corrupt(ref b)) => a == b,
			(&ErrorKind::NotFound, &ErrorKind::NotFound) => true,
			(&ErrorKind::Inconsistent, &ErrorKind::Inconsistent) => true,
			(&ErrorKind::BadArgument(ref a), &ErrorKind::BadArgument(ref b)) => a == b,
			(&ErrorKind::UnknownIndex(a), &ErrorKind::UnknownIndex(b)) => a == b,
			(&ErrorKind::DatabaseLocked(ref a), &ErrorKind::DatabaseLocked(ref b)) => a == b,
			(&ErrorKind::Msg(ref a), &ErrorKind::Msg(ref b)) => a == b,
			_ => false,
		}
	}
}
