//! C2: the deletion index.
//!
//! `del.dat` is an append-only sequence of 12-byte records, one per region
//! ever freed by a data-file overwrite or a tombstoned key:
//!
//! ```text
//! | active:1 | length:4 | file_id:2 | offset(unused):0 |
//! ```
//!
//! (see `DelKey` below for the exact packing). Each record's `active` byte
//! starts at `1`; when the region it describes is handed back out it is
//! flipped to `0` in place -- the record itself is never removed, so the
//! file only ever grows, and its length is always its own append cursor.
//!
//! Allocation is best-fit from the top: the largest active region is
//! tried first, and the allocator never searches further than that, per
//! the design notes -- a long tail of small freed regions is left
//! unused rather than walked looking for a tighter fit.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use error::Result;
use pool::{FileKey, FilePool};
use wal::Log;

const RECORD_LEN: usize = 12;

/// `(length, file_id, offset)` packed so that ordering by `DelKey` orders
/// by length first -- `largest_active` is then just "last active entry".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct DelKey {
	length: u32,
	file_id: u16,
	offset: u32,
}

impl DelKey {
	pub(crate) fn new(length: u32, file_id: u16, offset: u32) -> DelKey {
		DelKey { length, file_id, offset }
	}

	pub(crate) fn length(&self) -> u32 {
		self.length
	}

	pub(crate) fn file_id(&self) -> u16 {
		self.file_id
	}

	pub(crate) fn offset(&self) -> u32 {
		self.offset
	}

	fn encode(&self, active: bool) -> [u8; RECORD_LEN] {
		let mut buf = [0u8; RECORD_LEN];
		buf[0] = if active { 1 } else { 0 };
		BigEndian::write_u32(&mut buf[1..5], self.length);
		BigEndian::write_u16(&mut buf[5..7], self.file_id);
		BigEndian::write_u32(&mut buf[7..11], self.offset);
		buf
	}

	fn decode(buf: &[u8; RECORD_LEN]) -> (bool, DelKey) {
		let active = buf[0] == 1;
		let length = BigEndian::read_u32(&buf[1..5]);
		let file_id = BigEndian::read_u16(&buf[5..7]);
		let offset = BigEndian::read_u32(&buf[7..11]);
		(active, DelKey::new(length, file_id, offset))
	}
}

/// Active regions ordered by size, so the largest is the last entry; the
/// value is the record's own offset within `del.dat`, needed to flip its
/// active byte when the region is handed out.
pub(crate) struct DeletionIndex {
	active: BTreeMap<DelKey, u64>,
}

impl DeletionIndex {
	/// Load the index by scanning `del.dat` front to back, replaying each
	/// record's current active bit. There is nothing else to recover: a
	/// record's on-disk active byte is the ground truth.
	pub(crate) fn open(pool: &mut FilePool) -> Result<DeletionIndex> {
		let key = FileKey::deletion();
		let len = pool.file_len(key)? as usize;
		let mut active = BTreeMap::new();

		let mut pos = 0u64;
		while pos as usize + RECORD_LEN <= len {
			let raw = pool.read(key, pos as u32, RECORD_LEN)?;
			let mut buf = [0u8; RECORD_LEN];
			buf.copy_from_slice(&raw);
			let (is_active, del_key) = DelKey::decode(&buf);
			if is_active {
				active.insert(del_key, pos);
			}
			pos += RECORD_LEN as u64;
		}

		Ok(DeletionIndex { active })
	}

	/// The largest currently-active region, if any.
	pub(crate) fn largest_active(&self) -> Option<DelKey> {
		self.active.keys().next_back().cloned()
	}

	/// Flip a region's active byte to 0 and drop it from the in-memory map.
	/// `key` must be a key previously returned by `largest_active`.
	pub(crate) fn deactivate(&mut self, key: DelKey, pool: &mut FilePool, log: &mut Log) -> Result<()> {
		let record_offset = self.active.remove(&key).expect("deactivated key must be tracked; qed");
		let file_key = FileKey::deletion();
		log.record_write(pool, file_key, record_offset as u32, 1)?;
		pool.overwrite(file_key, record_offset as u32, &[0u8])?;
		Ok(())
	}

	/// Append a new active region record for a freshly freed or leftover
	/// range.
	pub(crate) fn insert_active(&mut self, length: u32, file_id: u16, offset: u32, pool: &mut FilePool, log: &mut Log) -> Result<()> {
		let del_key = DelKey::new(length, file_id, offset);
		let file_key = FileKey::deletion();
		let encoded = del_key.encode(true);
		log.record_write(pool, file_key, pool.file_len(file_key)? as u32, RECORD_LEN)?;
		let record_offset = pool.append(file_key, &encoded)?;
		self.active.insert(del_key, u64::from(record_offset));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempdir::TempDir;

	#[test]
	fn largest_active_picks_biggest_region() {
		let dir = TempDir::new("accdb-del").unwrap();
		let mut pool = FilePool::new(dir.path(), 1024);
		let mut index = DeletionIndex::open(&mut pool).unwrap();
		let mut log = Log::begin(dir.path()).unwrap();

		index.insert_active(100, 1, 0, &mut pool, &mut log).unwrap();
		index.insert_active(500, 1, 100, &mut pool, &mut log).unwrap();
		index.insert_active(200, 1, 600, &mut pool, &mut log).unwrap();

		let largest = index.largest_active().unwrap();
		assert_eq!(largest.length(), 500);
	}

	#[test]
	fn deactivate_removes_from_active_set() {
		let dir = TempDir::new("accdb-del").unwrap();
		let mut pool = FilePool::new(dir.path(), 1024);
		let mut index = DeletionIndex::open(&mut pool).unwrap();
		let mut log = Log::begin(dir.path()).unwrap();

		index.insert_active(100, 1, 0, &mut pool, &mut log).unwrap();
		let key = index.largest_active().unwrap();
		index.deactivate(key, &mut pool, &mut log).unwrap();
		assert!(index.largest_active().is_none());
	}

	#[test]
	fn reload_from_disk_sees_only_active_records() {
		let dir = TempDir::new("accdb-del").unwrap();
		let mut pool = FilePool::new(dir.path(), 1024);
		{
			let mut index = DeletionIndex::open(&mut pool).unwrap();
			let mut log = Log::begin(dir.path()).unwrap();
			index.insert_active(100, 1, 0, &mut pool, &mut log).unwrap();
			index.insert_active(200, 1, 100, &mut pool, &mut log).unwrap();
			let key = index.largest_active().unwrap();
			index.deactivate(key, &mut pool, &mut log).unwrap();
			log.commit().unwrap();
		}

		let index = DeletionIndex::open(&mut pool).unwrap();
		let remaining = index.largest_active().unwrap();
		assert_eq!(remaining.length(), 100);
	}
}
