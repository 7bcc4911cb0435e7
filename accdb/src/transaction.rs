//! C4: the transaction buffer.
//!
//! A `Transaction` is a plain, unordered list of operations staged by the
//! caller and handed to `Database::commit` as a whole. Operations on the
//! same key are kept in issue order -- rather than coalesced up front --
//! so that both the read-before-commit path and the commit itself can
//! fold them the same way: later operations win, and a write that follows
//! a delete reactivates the key.

/// Sentinel patch offset meaning "replace the whole value", used by
/// `Database::write_concat` to turn a resize into a plain write without a
/// separate operation variant.
pub const OVERWRITE_DATA: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone)]
pub(crate) enum Op {
	Write { index: u8, key: Vec<u8>, value: Vec<u8> },
	Patch { index: u8, key: Vec<u8>, offset: u32, bytes: Vec<u8> },
	Delete { index: u8, key: Vec<u8> },
	Rename { index: u8, old_key: Vec<u8>, new_key: Vec<u8> },
}

/// A batch of pending writes, patches, deletes and renames, not yet
/// applied to the database. Build one with `Database::begin`, stage
/// operations on it through the `Database` methods that take `&mut
/// Transaction`, then hand it to `Database::commit`.
pub struct Transaction {
	ops: Vec<Op>,
}

impl Transaction {
	pub(crate) fn new() -> Transaction {
		Transaction { ops: Vec::new() }
	}

	pub(crate) fn push(&mut self, op: Op) {
		self.ops.push(op);
	}

	pub(crate) fn ops(&self) -> &[Op] {
		&self.ops
	}
}

/// The result of folding every staged operation on one `(index, key)` in
/// issue order, used both by the read-before-commit path and by the
/// commit engine itself.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Staged {
	Untouched,
	Deleted,
	Full(Vec<u8>),
	Patches(Vec<(u32, Vec<u8>)>),
}

pub(crate) fn staged_value(ops: &[Op], index: u8, key: &[u8]) -> Staged {
	let mut state = Staged::Untouched;

	for op in ops {
		match *op {
			Op::Write { index: i, key: ref k, value: ref v } if i == index && k.as_slice() == key => {
				state = Staged::Full(v.clone());
			},
			Op::Patch { index: i, key: ref k, offset, bytes: ref b } if i == index && k.as_slice() == key => {
				if offset == OVERWRITE_DATA {
					state = Staged::Full(b.clone());
				} else {
					state = match state {
						Staged::Full(mut full) => {
							apply_patch(&mut full, offset, b);
							Staged::Full(full)
						},
						Staged::Patches(mut patches) => {
							patches.push((offset, b.clone()));
							Staged::Patches(patches)
						},
						Staged::Untouched | Staged::Deleted => Staged::Patches(vec![(offset, b.clone())]),
					};
				}
			},
			Op::Delete { index: i, key: ref k } if i == index && k.as_slice() == key => {
				state = Staged::Deleted;
			},
			// Renames affect key identity, not value contents; a read of
			// the literal old or new key during the same transaction does
			// not see the rename until commit (see design notes).
			_ => {},
		}
	}

	state
}

pub(crate) fn apply_patch(buf: &mut Vec<u8>, offset: u32, bytes: &[u8]) {
	let offset = offset as usize;
	let end = offset + bytes.len();
	if buf.len() < end {
		buf.resize(end, 0);
	}
	buf[offset..end].copy_from_slice(bytes);
}
