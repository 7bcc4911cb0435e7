//! C5: the undo log that makes a commit crash-atomic.
//!
//! A commit opens `log.dat`, writes a leading status byte (`0x01`, "commit
//! in progress"), then -- before every mutating write to a data, deletion
//! or index file -- appends a record capturing enough of that region's
//! prior state to undo the write. If every step in the commit succeeds the
//! status byte flips to `0x00` and the file is fsynced and removed; if a
//! step fails, or the process dies mid-commit, the file is left behind
//! with its status byte still `0x01` and `ensure_consistent` replays the
//! records in reverse on the next open.
//!
//! Two kinds of record exist, distinguished only by whether the captured
//! pre-image is empty:
//!
//! - a write that landed entirely past the file's previous end simply
//!   grew it; undoing it means truncating the file back to `offset`.
//! - a write that landed on bytes that already existed captures those
//!   bytes verbatim; undoing it means writing them back.
//!
//! Each record carries a trailing CRC32 over everything before it, so a
//! log torn by a crash mid-`write` is detected and its dangling tail is
//! discarded rather than misapplied.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc32fast::Hasher;

use error::Result;
use pool::{FileKey, FileKind, FilePool};

const CLEAN: u8 = 0x00;
const IN_PROGRESS: u8 = 0x01;

struct Record {
	kind: FileKind,
	index_id: u8,
	file_id: u16,
	offset: u32,
	pre_image: Vec<u8>,
}

pub(crate) struct Log {
	file: File,
	path: PathBuf,
}

impl Log {
	/// Begin a new commit: truncate (or create) `log.dat` and write the
	/// in-progress marker.
	pub(crate) fn begin<P: AsRef<Path>>(dir: P) -> Result<Log> {
		let path = dir.as_ref().join("log.dat");
		let mut file = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(&path)?;
		file.write_all(&[IN_PROGRESS])?;
		Ok(Log { file, path })
	}

	/// Capture the pre-image for a write of `new_len` bytes at `offset` and
	/// append the undo record, before the caller performs the write itself.
	pub(crate) fn record_write(&mut self, pool: &mut FilePool, key: FileKey, offset: u32, new_len: usize) -> Result<()> {
		let current_len = pool.file_len(key)?;
		let pre_image = if u64::from(offset) >= current_len {
			Vec::new()
		} else {
			let available = (current_len - u64::from(offset)) as usize;
			let take = available.min(new_len);
			pool.read(key, offset, take)?
		};

		self.append(Record { kind: key.kind, index_id: key.index_id, file_id: key.file_id, offset, pre_image })
	}

	fn append(&mut self, record: Record) -> Result<()> {
		let mut buf = Vec::with_capacity(12 + record.pre_image.len() + 4);
		buf.push(record.kind.tag());
		buf.push(record.index_id);
		buf.write_u16::<LittleEndian>(record.file_id)?;
		buf.write_u32::<LittleEndian>(record.offset)?;
		buf.write_u32::<LittleEndian>(record.pre_image.len() as u32)?;
		buf.extend_from_slice(&record.pre_image);

		let mut hasher = Hasher::new();
		hasher.update(&buf);
		let crc = hasher.finalize();
		buf.write_u32::<LittleEndian>(crc)?;

		self.file.write_all(&buf)?;
		Ok(())
	}

	/// Flip the status byte, fsync, and remove the log file: the commit is
	/// durable and no longer needs undoing.
	pub(crate) fn commit(mut self) -> Result<()> {
		self.file.seek(SeekFrom::Start(0))?;
		self.file.write_all(&[CLEAN])?;
		self.file.sync_all()?;
		drop(self.file);
		fs::remove_file(&self.path)?;
		Ok(())
	}
}

/// Replay a stale `log.dat` left behind by a crash, if one exists. Returns
/// whether a replay actually happened.
pub(crate) fn replay_if_needed<P: AsRef<Path>>(dir: P, pool: &mut FilePool) -> Result<bool> {
	let path = dir.as_ref().join("log.dat");
	let mut file = match File::open(&path) {
		Ok(f) => f,
		Err(ref err) if err.kind() == ::std::io::ErrorKind::NotFound => return Ok(false),
		Err(err) => return Err(err.into()),
	};

	let mut data = Vec::new();
	file.read_to_end(&mut data)?;
	drop(file);

	if data.is_empty() || data[0] == CLEAN {
		fs::remove_file(&path)?;
		return Ok(false);
	}

	let records = parse_records(&data[1..]);
	::log::debug!("replaying {} undo record(s) from a stale log", records.len());

	for record in records.iter().rev() {
		let key = FileKey { kind: record.kind, index_id: record.index_id, file_id: record.file_id };
		if record.pre_image.is_empty() {
			pool.truncate(key, record.offset)?;
		} else {
			pool.overwrite(key, record.offset, &record.pre_image)?;
		}
	}

	fs::remove_file(&path)?;
	Ok(true)
}

fn parse_records(mut data: &[u8]) -> Vec<Record> {
	let mut records = Vec::new();

	loop {
		if data.len() < 12 {
			if !data.is_empty() {
				::log::warn!("discarding {} torn byte(s) at the tail of the undo log", data.len());
			}
			break;
		}

		let kind = match FileKind::from_tag(data[0]) {
			Some(kind) => kind,
			None => {
				::log::warn!("discarding undo log tail: unknown file kind tag {}", data[0]);
				break;
			},
		};
		let index_id = data[1];
		let file_id = LittleEndian::read_u16(&data[2..4]);
		let offset = LittleEndian::read_u32(&data[4..8]);
		let pre_len = LittleEndian::read_u32(&data[8..12]) as usize;

		let record_len = 12 + pre_len + 4;
		if data.len() < record_len {
			::log::warn!("discarding a torn undo record at the tail of the log");
			break;
		}

		let pre_image = data[12..12 + pre_len].to_vec();
		let stored_crc = LittleEndian::read_u32(&data[12 + pre_len..record_len]);

		let mut hasher = Hasher::new();
		hasher.update(&data[..12 + pre_len]);
		let actual_crc = hasher.finalize();

		if actual_crc != stored_crc {
			::log::warn!("discarding a corrupted undo record (checksum mismatch)");
			break;
		}

		records.push(Record { kind, index_id, file_id, offset, pre_image });
		data = &data[record_len..];
	}

	records
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempdir::TempDir;

	#[test]
	fn clean_log_is_not_replayed() {
		let dir = TempDir::new("accdb-log").unwrap();
		let mut pool = FilePool::new(dir.path(), 1024);
		let log = Log::begin(dir.path()).unwrap();
		log.commit().unwrap();
		assert!(!replay_if_needed(dir.path(), &mut pool).unwrap());
	}

	#[test]
	fn undoes_growth_via_truncate() {
		let dir = TempDir::new("accdb-log").unwrap();
		let mut pool = FilePool::new(dir.path(), 1024);
		let key = FileKey::data(1);

		let mut log = Log::begin(dir.path()).unwrap();
		log.record_write(&mut pool, key, 0, 5).unwrap();
		pool.overwrite(key, 0, b"hello").unwrap();
		// commit never finalized -- simulate a crash by dropping `log`.
		drop(log);

		assert!(replay_if_needed(dir.path(), &mut pool).unwrap());
		assert_eq!(pool.file_len(key).unwrap(), 0);
	}

	#[test]
	fn undoes_overwrite_via_restore() {
		let dir = TempDir::new("accdb-log").unwrap();
		let mut pool = FilePool::new(dir.path(), 1024);
		let key = FileKey::data(1);
		pool.overwrite(key, 0, b"aaaaa").unwrap();

		let mut log = Log::begin(dir.path()).unwrap();
		log.record_write(&mut pool, key, 0, 5).unwrap();
		pool.overwrite(key, 0, b"bbbbb").unwrap();
		drop(log);

		assert!(replay_if_needed(dir.path(), &mut pool).unwrap());
		assert_eq!(pool.read(key, 0, 5).unwrap(), b"aaaaa");
	}
}
