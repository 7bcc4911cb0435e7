//! The `Database` handle: opens a data directory, owns the file pool, the
//! deletion index and the registered B-tree indexes, and runs the C5
//! commit engine against them.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, warn};

use btree::{BTreeIndex, EntryLoc, DELETED};
use deletion::DeletionIndex;
use error::{Error, ErrorKind, Result};
use key;
use options::Options;
use pool::{FileKey, FileKind, FilePool};
use transaction::{self, Op, Staged, Transaction};
use wal::{self, Log};

/// Sentinel length returned by `Database::length` for a key with no live
/// entry.
pub const DOESNT_EXIST: u32 = 0xFFFF_FFFF;

/// A handle on an open data directory: the file pool, the deletion index
/// and every registered B-tree index, plus the exclusive lock that keeps a
/// second process from opening the same directory concurrently.
pub struct Database {
	dir: PathBuf,
	_lock_file: File,
	options: Options,
	pool: FilePool,
	deletion: DeletionIndex,
	indexes: HashMap<u8, BTreeIndex>,
	data_cursor: (u16, u32),
}

impl Database {
	/// Create a new database directory with default options.
	pub fn create<P: AsRef<Path>>(dir: P) -> Result<Database> {
		Self::create_with_options(dir, Options::default())
	}

	/// Create a new database directory with the given options.
	pub fn create_with_options<P: AsRef<Path>>(dir: P, options: Options) -> Result<Database> {
		fs::create_dir_all(dir.as_ref())?;
		Self::open_internal(dir.as_ref().to_path_buf(), options)
	}

	/// Open an existing database directory with default options, replaying
	/// any stale undo log left behind by a crashed commit.
	pub fn open<P: AsRef<Path>>(dir: P) -> Result<Database> {
		Self::open_with_options(dir, Options::default())
	}

	/// Open an existing database directory with the given options.
	pub fn open_with_options<P: AsRef<Path>>(dir: P, options: Options) -> Result<Database> {
		Self::open_internal(dir.as_ref().to_path_buf(), options)
	}

	fn open_internal(dir: PathBuf, options: Options) -> Result<Database> {
		let lock_path = dir.join("LOCK");
		let lock_file = OpenOptions::new().create(true).write(true).open(&lock_path)?;
		lock_file.try_lock_exclusive().map_err(|_| Error::from(ErrorKind::DatabaseLocked(dir.clone())))?;

		let mut pool = FilePool::new(&dir, options.max_file_size);

		if wal::replay_if_needed(&dir, &mut pool)? {
			debug!("replayed a stale undo log found at {:?} on open", dir);
		}

		let deletion = DeletionIndex::open(&mut pool)?;
		let data_cursor = pool.last_file(FileKind::Data, 0)?;

		Ok(Database {
			dir,
			_lock_file: lock_file,
			options,
			pool,
			deletion,
			indexes: HashMap::new(),
			data_cursor,
		})
	}

	/// Re-run log replay against the on-disk state. Only needed after a
	/// `commit` returns `ErrorKind::Inconsistent`; a fresh `open`/`create`
	/// already does this.
	pub fn ensure_consistent(&mut self) -> Result<()> {
		if wal::replay_if_needed(&self.dir, &mut self.pool)? {
			debug!("ensure_consistent replayed a stale undo log at {:?}", self.dir);
			self.deletion = DeletionIndex::open(&mut self.pool)?;
			self.data_cursor = self.pool.last_file(FileKind::Data, 0)?;

			let ids: Vec<u8> = self.indexes.keys().cloned().collect();
			for id in ids {
				let (key_size, cache_limit) = {
					let index = &self.indexes[&id];
					(index.key_size, index.cache_limit)
				};
				let reloaded = BTreeIndex::open(&mut self.pool, id, key_size, cache_limit)?;
				self.indexes.insert(id, reloaded);
			}
		}
		Ok(())
	}

	/// Register (creating on first use) a B-tree index with a fixed key
	/// size, using `options.default_cache_limit` as its cache budget.
	/// Calling this again for an already registered id is a no-op.
	pub fn register_index(&mut self, id: u8, key_size: usize) -> Result<()> {
		let cache_limit = self.options.default_cache_limit;
		self.register_index_with_cache_limit(id, key_size, cache_limit)
	}

	/// Like `register_index`, but with an explicit cache budget overriding
	/// `options.default_cache_limit`.
	pub fn register_index_with_cache_limit(&mut self, id: u8, key_size: usize, cache_limit: usize) -> Result<()> {
		if self.indexes.contains_key(&id) {
			return Ok(());
		}

		let header_path = self.dir.join(format!("idx_{}_0.dat", id));
		let index = if header_path.exists() {
			BTreeIndex::open(&mut self.pool, id, key_size, cache_limit)?
		} else {
			BTreeIndex::create(&mut self.pool, id, key_size, cache_limit)?
		};

		self.indexes.insert(id, index);
		Ok(())
	}

	/// Start a new, empty transaction.
	pub fn begin(&self) -> Transaction {
		Transaction::new()
	}

	/// Drop a transaction without committing it. Equivalent to letting it
	/// go out of scope; kept as an explicit call for callers that want to
	/// make the discard visible at the point it happens.
	pub fn discard(&self, _tx: Transaction) {}

	fn key_size(&self, index: u8) -> Result<usize> {
		self.indexes.get(&index).map(|i| i.key_size).ok_or_else(|| ErrorKind::UnknownIndex(index).into())
	}

	fn index_mut(&mut self, index: u8) -> Result<&mut BTreeIndex> {
		self.indexes.get_mut(&index).ok_or_else(|| ErrorKind::UnknownIndex(index).into())
	}

	/// Stage a full-value write for `key`, replacing any prior staged
	/// patches for it.
	pub fn write<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, tx: &mut Transaction, index: u8, key: K, value: V) -> Result<()> {
		let key_size = self.key_size(index)?;
		let raw_key = key::decode(key.as_ref(), key_size)?.to_vec();
		tx.push(Op::Write { index, key: raw_key, value: value.as_ref().to_vec() });
		Ok(())
	}

	/// Stage a sub-section patch at `offset` into `key`'s value. An
	/// `offset` of `OVERWRITE_DATA` is equivalent to `write`.
	pub fn write_sub<K: AsRef<[u8]>>(&self, tx: &mut Transaction, index: u8, key: K, offset: u32, bytes: &[u8]) -> Result<()> {
		let key_size = self.key_size(index)?;
		let raw_key = key::decode(key.as_ref(), key_size)?.to_vec();
		tx.push(Op::Patch { index, key: raw_key, offset, bytes: bytes.to_vec() });
		Ok(())
	}

	/// Stage a full-value write built by concatenating `parts`.
	pub fn write_concat<K: AsRef<[u8]>>(&self, tx: &mut Transaction, index: u8, key: K, parts: &[&[u8]]) -> Result<()> {
		let mut value = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
		for part in parts {
			value.extend_from_slice(part);
		}
		self.write(tx, index, key, value)
	}

	/// Stage a delete of `key`. A later `write` on the same key within the
	/// same transaction reactivates it.
	pub fn delete<K: AsRef<[u8]>>(&self, tx: &mut Transaction, index: u8, key: K) -> Result<()> {
		let key_size = self.key_size(index)?;
		let raw_key = key::decode(key.as_ref(), key_size)?.to_vec();
		tx.push(Op::Delete { index, key: raw_key });
		Ok(())
	}

	/// Stage a rename of `old_key` to `new_key`, both the declared key size
	/// for `index`.
	pub fn rename<K: AsRef<[u8]>>(&self, tx: &mut Transaction, index: u8, old_key: K, new_key: K) -> Result<()> {
		let key_size = self.key_size(index)?;
		let raw_old = key::decode(old_key.as_ref(), key_size)?.to_vec();
		let raw_new = key::decode(new_key.as_ref(), key_size)?.to_vec();
		tx.push(Op::Rename { index, old_key: raw_old, new_key: raw_new });
		Ok(())
	}

	/// Resolve a key honoring `tx`'s still-uncommitted staged operations on
	/// top of the last committed state.
	pub fn read<K: AsRef<[u8]>>(&mut self, tx: &Transaction, index: u8, key: K) -> Result<Vec<u8>> {
		let key_size = self.key_size(index)?;
		let raw_key = key::decode(key.as_ref(), key_size)?.to_vec();

		match transaction::staged_value(tx.ops(), index, &raw_key) {
			Staged::Deleted => Err(ErrorKind::NotFound.into()),
			Staged::Full(value) => Ok(value),
			Staged::Patches(patches) => {
				let mut base = self.read_committed(index, &raw_key)?;
				for (offset, bytes) in patches {
					transaction::apply_patch(&mut base, offset, &bytes);
				}
				Ok(base)
			},
			Staged::Untouched => self.read_committed(index, &raw_key),
		}
	}

	/// `key`'s resolved value length, or `DOESNT_EXIST` if it has none,
	/// honoring `tx`'s staged operations the same way `read` does.
	pub fn length<K: AsRef<[u8]>>(&mut self, tx: &Transaction, index: u8, key: K) -> Result<u32> {
		let key_size = self.key_size(index)?;
		let raw_key = key::decode(key.as_ref(), key_size)?.to_vec();

		match transaction::staged_value(tx.ops(), index, &raw_key) {
			Staged::Deleted => Ok(DOESNT_EXIST),
			Staged::Full(value) => Ok(value.len() as u32),
			Staged::Patches(patches) => match self.committed_length(index, &raw_key)? {
				Some(base_len) => {
					let mut len = base_len;
					for (offset, bytes) in &patches {
						let end = offset + bytes.len() as u32;
						if end > len {
							len = end;
						}
					}
					Ok(len)
				},
				None => Ok(DOESNT_EXIST),
			},
			Staged::Untouched => Ok(self.committed_length(index, &raw_key)?.unwrap_or(DOESNT_EXIST)),
		}
	}

	/// Resolved `(key, value)` pairs in key order, live entries only.
	pub fn iter(&mut self, index: u8) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
		let pool = &mut self.pool;
		let bt = self.indexes.get_mut(&index).ok_or_else(|| Error::from(ErrorKind::UnknownIndex(index)))?;

		let mut out = Vec::new();
		bt.for_each_entry(pool, &mut |entry, pool| {
			if entry.loc.length != DELETED {
				let value = pool.read(FileKey::data(entry.loc.file_id), entry.loc.offset, entry.loc.length as usize)?;
				out.push((entry.key.clone(), value));
			}
			Ok(())
		})?;
		Ok(out)
	}

	fn read_committed(&mut self, index: u8, raw_key: &[u8]) -> Result<Vec<u8>> {
		let pool = &mut self.pool;
		let bt = self.index_mut(index)?;
		match bt.find_loc(pool, raw_key)? {
			Some((_, _, loc)) => pool.read(FileKey::data(loc.file_id), loc.offset, loc.length as usize),
			None => Err(ErrorKind::NotFound.into()),
		}
	}

	fn committed_length(&mut self, index: u8, raw_key: &[u8]) -> Result<Option<u32>> {
		let pool = &mut self.pool;
		let bt = self.index_mut(index)?;
		Ok(bt.find_loc(pool, raw_key)?.map(|(_, _, loc)| loc.length))
	}

	/// Run every staged operation against the on-disk state, logging an
	/// undo record ahead of each mutating write. On success the log is
	/// flipped clean and removed; on failure it is left behind and the
	/// caller is told the database is inconsistent until `ensure_consistent`
	/// runs.
	pub fn commit(&mut self, tx: Transaction) -> Result<()> {
		let mut log = Log::begin(&self.dir)?;

		match self.apply_transaction(&tx, &mut log) {
			Ok(()) => {
				log.commit()?;
				Ok(())
			},
			Err(err) => {
				warn!("commit failed ({}); database left inconsistent until ensure_consistent() runs", err);
				Err(ErrorKind::Inconsistent.into())
			},
		}
	}

	fn apply_transaction(&mut self, tx: &Transaction, log: &mut Log) -> Result<()> {
		self.apply_ops(tx.ops(), log)
	}

	/// Apply only the first `limit` staged operations, leaving the rest
	/// untouched. Used by crash-recovery tests to simulate a process dying
	/// partway through a multi-op commit, with the log never flipped clean
	/// so `ensure_consistent` rolls every applied op back.
	#[cfg(test)]
	fn apply_transaction_partial(&mut self, tx: &Transaction, log: &mut Log, limit: usize) -> Result<()> {
		let ops = tx.ops();
		self.apply_ops(&ops[..limit.min(ops.len())], log)
	}

	fn apply_ops(&mut self, ops: &[Op], log: &mut Log) -> Result<()> {
		for op in ops {
			match *op {
				Op::Write { index, ref key, ref value } => self.commit_write(index, key, value, log)?,
				Op::Patch { index, ref key, offset, ref bytes } => self.commit_patch(index, key, offset, bytes, log)?,
				Op::Delete { index, ref key } => self.commit_delete(index, key, log)?,
				Op::Rename { index, ref old_key, ref new_key } => self.commit_rename(index, old_key, new_key, log)?,
			}
		}
		Ok(())
	}

	fn free_region(&mut self, loc: EntryLoc, log: &mut Log) -> Result<()> {
		if loc.length == DELETED || loc.length == 0 {
			return Ok(());
		}
		self.deletion.insert_active(loc.length, loc.file_id, loc.offset, &mut self.pool, log)
	}

	/// Best-fit allocation: take the largest active freed region if it is
	/// big enough, splitting off and reinserting any positive-length
	/// residual, otherwise fall back to appending (rolling to a new data
	/// file once the current one would exceed `max_file_size`).
	fn allocate(&mut self, len: u32, log: &mut Log) -> Result<(u16, u32)> {
		if let Some(region) = self.deletion.largest_active() {
			if region.length() >= len {
				self.deletion.deactivate(region, &mut self.pool, log)?;
				let residual = region.length() - len;
				if residual > 0 {
					self.deletion.insert_active(residual, region.file_id(), region.offset() + len, &mut self.pool, log)?;
				}
				return Ok((region.file_id(), region.offset()));
			}
		}

		Ok(self.next_data_offset(len))
	}

	fn next_data_offset(&mut self, len: u32) -> (u16, u32) {
		let (mut file, mut size) = self.data_cursor;
		if u64::from(size) + u64::from(len) > self.options.max_file_size {
			file += 1;
			size = 0;
		}
		let offset = size;
		self.data_cursor = (file, size + len);
		(file, offset)
	}

	fn commit_write(&mut self, index: u8, key: &[u8], value: &[u8], log: &mut Log) -> Result<()> {
		let existing = self.index_mut(index)?.find_loc(&mut self.pool, key)?;
		if let Some((_, _, old_loc)) = existing {
			self.free_region(old_loc, log)?;
		}

		let (file, offset) = self.allocate(value.len() as u32, log)?;
		let data_key = FileKey::data(file);
		log.record_write(&mut self.pool, data_key, offset, value.len())?;
		self.pool.overwrite(data_key, offset, value)?;

		let loc = EntryLoc { file_id: file, offset, length: value.len() as u32 };
		self.index_mut(index)?.insert(&mut self.pool, log, key.to_vec(), loc)
	}

	fn commit_patch(&mut self, index: u8, key: &[u8], offset: u32, bytes: &[u8], log: &mut Log) -> Result<()> {
		let (_, _, old_loc) = self.index_mut(index)?.find_loc(&mut self.pool, key)?
			.ok_or_else(|| Error::from(ErrorKind::NotFound))?;

		if offset == transaction::OVERWRITE_DATA {
			return self.replace_value(index, key, old_loc, bytes, log);
		}

		let new_len = (u64::from(offset) + bytes.len() as u64).max(u64::from(old_loc.length)) as u32;

		if new_len <= old_loc.length {
			let data_key = FileKey::data(old_loc.file_id);
			let write_offset = old_loc.offset + offset;
			log.record_write(&mut self.pool, data_key, write_offset, bytes.len())?;
			self.pool.overwrite(data_key, write_offset, bytes)?;
			Ok(())
		} else {
			let mut full = self.pool.read(FileKey::data(old_loc.file_id), old_loc.offset, old_loc.length as usize)?;
			transaction::apply_patch(&mut full, offset, bytes);
			self.replace_value(index, key, old_loc, &full, log)
		}
	}

	fn replace_value(&mut self, index: u8, key: &[u8], old_loc: EntryLoc, value: &[u8], log: &mut Log) -> Result<()> {
		self.free_region(old_loc, log)?;
		let (file, offset) = self.allocate(value.len() as u32, log)?;
		let data_key = FileKey::data(file);
		log.record_write(&mut self.pool, data_key, offset, value.len())?;
		self.pool.overwrite(data_key, offset, value)?;
		let loc = EntryLoc { file_id: file, offset, length: value.len() as u32 };
		self.index_mut(index)?.insert(&mut self.pool, log, key.to_vec(), loc)
	}

	fn commit_delete(&mut self, index: u8, key: &[u8], log: &mut Log) -> Result<()> {
		let old = self.index_mut(index)?.mark_deleted(&mut self.pool, log, key)?;
		if let Some(loc) = old {
			self.free_region(loc, log)?;
		}
		Ok(())
	}

	/// Renames are positional, not a free/allocate cycle: the entry keeps
	/// its data location and is structurally repositioned under the new
	/// key.
	fn commit_rename(&mut self, index: u8, old_key: &[u8], new_key: &[u8], log: &mut Log) -> Result<()> {
		let (node_idx, pos, loc) = self.index_mut(index)?.find_loc(&mut self.pool, old_key)?
			.ok_or_else(|| Error::from(ErrorKind::NotFound))?;

		self.index_mut(index)?.remove_entry(&mut self.pool, log, node_idx, pos)?;
		self.index_mut(index)?.insert(&mut self.pool, log, new_key.to_vec(), loc)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempdir::TempDir;

	fn open(dir: &TempDir) -> Database {
		let mut db = Database::create(dir.path()).unwrap();
		db.register_index(0, 4).unwrap();
		db
	}

	/// A length-prefixed 4-byte big-endian key, as the CLI and every test
	/// in this module encode one.
	fn key_n(n: u32) -> [u8; 5] {
		let b = n.to_be_bytes();
		[4, b[0], b[1], b[2], b[3]]
	}

	#[test]
	fn write_commit_and_read_roundtrips() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], b"hello").unwrap();
		db.commit(tx).unwrap();

		let tx = db.begin();
		let value = db.read(&tx, 0, &[4, 0, 0, 0, 1][..]).unwrap();
		assert_eq!(value, b"hello");
	}

	#[test]
	fn read_before_commit_sees_staged_write() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], b"hello").unwrap();
		let value = db.read(&tx, 0, &[4, 0, 0, 0, 1][..]).unwrap();
		assert_eq!(value, b"hello");
	}

	#[test]
	fn delete_then_read_not_found() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], b"hello").unwrap();
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		db.delete(&mut tx, 0, &[4, 0, 0, 0, 1][..]).unwrap();
		db.commit(tx).unwrap();

		let tx = db.begin();
		assert!(matches!(db.read(&tx, 0, &[4, 0, 0, 0, 1][..]), Err(_)));
		assert_eq!(db.length(&tx, 0, &[4, 0, 0, 0, 1][..]).unwrap(), DOESNT_EXIST);
	}

	#[test]
	fn rename_preserves_value_under_new_key() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], b"hello").unwrap();
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		db.rename(&mut tx, 0, &[4, 0, 0, 0, 1][..], &[4, 0, 0, 0, 2][..]).unwrap();
		db.commit(tx).unwrap();

		let tx = db.begin();
		assert!(db.read(&tx, 0, &[4, 0, 0, 0, 1][..]).is_err());
		assert_eq!(db.read(&tx, 0, &[4, 0, 0, 0, 2][..]).unwrap(), b"hello");
	}

	#[test]
	fn overwrite_frees_old_region_for_reuse() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], &[0u8; 64][..]).unwrap();
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], &[1u8; 64][..]).unwrap();
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 2][..], &[2u8; 32][..]).unwrap();
		db.commit(tx).unwrap();

		assert!(db.deletion.largest_active().is_some());
	}

	#[test]
	fn write_sub_patches_in_place() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], &[0u8; 8][..]).unwrap();
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		db.write_sub(&mut tx, 0, &[4, 0, 0, 0, 1][..], 2, &[9, 9]).unwrap();
		db.commit(tx).unwrap();

		let tx = db.begin();
		let value = db.read(&tx, 0, &[4, 0, 0, 0, 1][..]).unwrap();
		assert_eq!(value, vec![0, 0, 9, 9, 0, 0, 0, 0]);
	}

	#[test]
	fn commit_durability_survives_reopen() {
		let dir = TempDir::new("accdb").unwrap();
		{
			let mut db = open(&dir);
			let mut tx = db.begin();
			db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], b"persisted").unwrap();
			db.commit(tx).unwrap();
		}

		let mut db = Database::open(dir.path()).unwrap();
		db.register_index(0, 4).unwrap();
		let tx = db.begin();
		assert_eq!(db.read(&tx, 0, &[4, 0, 0, 0, 1][..]).unwrap(), b"persisted");
	}

	#[test]
	fn exclusive_lock_rejects_second_open() {
		let dir = TempDir::new("accdb").unwrap();
		let _db = open(&dir);
		let second = Database::open(dir.path());
		assert!(second.is_err());
	}

	#[test]
	fn iter_returns_live_entries_in_key_order() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 2][..], b"b").unwrap();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 1][..], b"a").unwrap();
		db.write(&mut tx, 0, &[4, 0, 0, 0, 3][..], b"c").unwrap();
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		db.delete(&mut tx, 0, &[4, 0, 0, 0, 2][..]).unwrap();
		db.commit(tx).unwrap();

		let all = db.iter(0).unwrap();
		let values: Vec<Vec<u8>> = all.into_iter().map(|(_, v)| v).collect();
		assert_eq!(values, vec![b"a".to_vec(), b"c".to_vec()]);
	}

	// Crash-recovery scenarios, simulated by applying a transaction's
	// operations against a `Log` that is then dropped without ever being
	// flipped clean -- exactly what a process crash mid-commit leaves
	// behind on disk.

	/// Scenario 1: truncate before the log's final flip. After recovery the
	/// write must be fully rolled back.
	#[test]
	fn crash_before_log_flip_rolls_back_the_write() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &key_n(1)[..], b"1").unwrap();
		{
			let mut log = Log::begin(&db.dir).unwrap();
			db.apply_transaction(&tx, &mut log).unwrap();
			// log dropped here without `commit()` -- simulates the crash.
		}

		db.ensure_consistent().unwrap();

		let tx = db.begin();
		assert!(matches!(db.read(&tx, 0, &key_n(1)[..]), Err(_)));
	}

	/// Scenario 2: truncate after the log's final flip. The commit is
	/// already durable, so recovery is a no-op and the write survives.
	#[test]
	fn crash_after_log_flip_leaves_the_write_durable() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &key_n(1)[..], b"1").unwrap();
		db.commit(tx).unwrap();

		db.ensure_consistent().unwrap();

		let tx = db.begin();
		assert_eq!(db.read(&tx, 0, &key_n(1)[..]).unwrap(), b"1");
	}

	/// Scenario 3: write 100 keys, commit; stage a 50-key delete batch but
	/// crash partway through applying it. Recovery must leave either every
	/// key deleted or none -- never a mix.
	#[test]
	fn crash_mid_batch_delete_leaves_no_mixed_state() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		for i in 0..100u32 {
			db.write(&mut tx, 0, &key_n(i)[..], &[i as u8; 16][..]).unwrap();
		}
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		for i in 0..50u32 {
			db.delete(&mut tx, 0, &key_n(i)[..]).unwrap();
		}
		{
			let mut log = Log::begin(&db.dir).unwrap();
			db.apply_transaction_partial(&tx, &mut log, 25).unwrap();
		}

		db.ensure_consistent().unwrap();

		let check_tx = db.begin();
		let mut any_deleted = false;
		let mut any_present = false;
		for i in 0..50u32 {
			match db.read(&check_tx, 0, &key_n(i)[..]) {
				Ok(_) => any_present = true,
				Err(_) => any_deleted = true,
			}
		}
		assert!(!(any_deleted && any_present), "an aborted commit must not leave a mixed state");
		assert!(any_present, "an aborted commit must roll back entirely");

		for i in 0..100u32 {
			assert!(db.read(&check_tx, 0, &key_n(i)[..]).is_ok());
		}
	}

	/// Scenario 5: rename into an index with 64 existing keys, forcing a
	/// tree reshuffle; the post-commit in-order traversal must stay sorted.
	#[test]
	fn rename_with_64_keys_keeps_traversal_sorted() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		for i in 0..64u32 {
			db.write(&mut tx, 0, &key_n(i)[..], &[i as u8; 4][..]).unwrap();
		}
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		db.rename(&mut tx, 0, &key_n(1)[..], &key_n(200)[..]).unwrap();
		db.commit(tx).unwrap();

		let all = db.iter(0).unwrap();
		let keys: Vec<Vec<u8>> = all.into_iter().map(|(k, _)| k).collect();
		let mut sorted = keys.clone();
		sorted.sort();
		assert_eq!(keys, sorted);
		assert_eq!(keys.len(), 64);
	}

	/// Scenario 6: allocate 1 KiB, delete it, allocate 512 B -- the smaller
	/// write must land inside the freed region and leave a 512 B residual
	/// active in the deletion index.
	#[test]
	fn allocate_after_delete_reuses_freed_region_with_residual() {
		let dir = TempDir::new("accdb").unwrap();
		let mut db = open(&dir);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &key_n(1)[..], &[0u8; 1024][..]).unwrap();
		db.commit(tx).unwrap();

		let mut tx = db.begin();
		db.delete(&mut tx, 0, &key_n(1)[..]).unwrap();
		db.commit(tx).unwrap();

		let freed = db.deletion.largest_active().unwrap();
		assert_eq!(freed.length(), 1024);

		let mut tx = db.begin();
		db.write(&mut tx, 0, &key_n(2)[..], &[1u8; 512][..]).unwrap();
		db.commit(tx).unwrap();

		let residual = db.deletion.largest_active().unwrap();
		assert_eq!(residual.file_id(), freed.file_id());
		assert_eq!(residual.offset(), freed.offset() + 512);
		assert_eq!(residual.length(), 512);

		let check_tx = db.begin();
		assert_eq!(db.read(&check_tx, 0, &key_n(2)[..]).unwrap(), vec![1u8; 512]);
	}
}
