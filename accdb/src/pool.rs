//! C1: data file pool.
//!
//! Every on-disk region the rest of the crate touches -- data files,
//! `del.dat`, and the per-index node-page files -- is read and written
//! through this single mediator. It keeps exactly one file handle open at
//! a time (a single-slot cache, reopened on demand) and never interprets
//! the bytes it moves; callers resolve `(kind, index id, file id)` to a
//! path and an offset, the pool just seeks and does I/O.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use error::Result;

/// Which family of file a `FileKey` addresses. Mirrors the tag byte stored
/// in undo log records, so the discriminant values here are load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum FileKind {
	Data = 0,
	Deletion = 1,
	Index = 2,
}

impl FileKind {
	pub(crate) fn from_tag(tag: u8) -> Option<FileKind> {
		match tag {
			0 => Some(FileKind::Data),
			1 => Some(FileKind::Deletion),
			2 => Some(FileKind::Index),
			_ => None,
		}
	}

	pub(crate) fn tag(self) -> u8 {
		self as u8
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FileKey {
	pub kind: FileKind,
	pub index_id: u8,
	pub file_id: u16,
}

impl FileKey {
	pub(crate) fn data(file_id: u16) -> FileKey {
		FileKey { kind: FileKind::Data, index_id: 0, file_id }
	}

	pub(crate) fn deletion() -> FileKey {
		FileKey { kind: FileKind::Deletion, index_id: 0, file_id: 0 }
	}

	pub(crate) fn index(index_id: u8, file_id: u16) -> FileKey {
		FileKey { kind: FileKind::Index, index_id, file_id }
	}

	pub(crate) fn index_header(index_id: u8) -> FileKey {
		FileKey::index(index_id, 0)
	}
}

pub(crate) struct FilePool {
	dir: PathBuf,
	max_file_size: u64,
	cached: Option<(FileKey, File)>,
}

impl FilePool {
	pub(crate) fn new<P: AsRef<Path>>(dir: P, max_file_size: u64) -> FilePool {
		FilePool {
			dir: dir.as_ref().to_path_buf(),
			max_file_size,
			cached: None,
		}
	}

	pub(crate) fn max_file_size(&self) -> u64 {
		self.max_file_size
	}

	pub(crate) fn path(&self, key: FileKey) -> PathBuf {
		match key.kind {
			FileKind::Data => self.dir.join(format!("{}.dat", key.file_id)),
			FileKind::Deletion => self.dir.join("del.dat"),
			FileKind::Index => self.dir.join(format!("idx_{}_{}.dat", key.index_id, key.file_id)),
		}
	}

	fn handle(&mut self, key: FileKey) -> Result<&mut File> {
		let needs_open = match self.cached {
			Some((cached_key, _)) => cached_key != key,
			None => true,
		};

		if needs_open {
			let path = self.path(key);
			let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
			self.cached = Some((key, file));
		}

		Ok(&mut self.cached.as_mut().expect("just inserted; qed").1)
	}

	/// Write `bytes` at the current end of the file, returning the offset
	/// they landed at.
	pub(crate) fn append(&mut self, key: FileKey, bytes: &[u8]) -> Result<u32> {
		let file = self.handle(key)?;
		let offset = file.seek(SeekFrom::End(0))? as u32;
		file.write_all(bytes)?;
		Ok(offset)
	}

	/// Write `bytes` at `offset`, extending the file if necessary.
	pub(crate) fn overwrite(&mut self, key: FileKey, offset: u32, bytes: &[u8]) -> Result<()> {
		let file = self.handle(key)?;
		file.seek(SeekFrom::Start(u64::from(offset)))?;
		file.write_all(bytes)?;
		Ok(())
	}

	pub(crate) fn read(&mut self, key: FileKey, offset: u32, len: usize) -> Result<Vec<u8>> {
		let file = self.handle(key)?;
		file.seek(SeekFrom::Start(u64::from(offset)))?;
		let mut buf = vec![0u8; len];
		file.read_exact(&mut buf)?;
		Ok(buf)
	}

	pub(crate) fn file_len(&mut self, key: FileKey) -> Result<u64> {
		let path = self.path(key);
		match fs::metadata(&path) {
			Ok(meta) => Ok(meta.len()),
			Err(ref err) if err.kind() == ::std::io::ErrorKind::NotFound => Ok(0),
			Err(err) => Err(err.into()),
		}
	}

	pub(crate) fn truncate(&mut self, key: FileKey, len: u32) -> Result<()> {
		let file = self.handle(key)?;
		file.set_len(u64::from(len))?;
		Ok(())
	}

	pub(crate) fn sync(&mut self, key: FileKey) -> Result<()> {
		let file = self.handle(key)?;
		file.sync_all()?;
		Ok(())
	}

	/// Scan the data directory for the highest-numbered file of `kind` and
	/// return `(file_id, length)` of its tail, so that append cursors can be
	/// rebuilt on open without any separately persisted counter.
	pub(crate) fn last_file(&mut self, kind: FileKind, index_id: u8) -> Result<(u16, u32)> {
		let prefix = match kind {
			FileKind::Data => String::new(),
			FileKind::Deletion => return Ok((0, self.file_len(FileKey::deletion())? as u32)),
			FileKind::Index => format!("idx_{}_", index_id),
		};

		let mut max_id: u16 = 0;
		for entry in fs::read_dir(&self.dir)? {
			let entry = entry?;
			let name = entry.file_name();
			let name = match name.to_str() {
				Some(n) => n,
				None => continue,
			};

			if kind == FileKind::Data {
				if let Some(stem) = name.strip_suffix(".dat") {
					if let Ok(id) = stem.parse::<u16>() {
						if id > max_id {
							max_id = id;
						}
					}
				}
			} else if let Some(rest) = name.strip_prefix(&prefix as &str) {
				if let Some(stem) = rest.strip_suffix(".dat") {
					if let Ok(id) = stem.parse::<u16>() {
						if id > max_id && id != 0 {
							max_id = id;
						}
					}
				}
			}
		}

		if max_id == 0 && kind == FileKind::Data {
			// first data file is 1, not 0: there is no file yet.
			return Ok((1, 0));
		}

		let id = if max_id == 0 { 1 } else { max_id };
		let len = self.file_len(match kind {
			FileKind::Data => FileKey::data(id),
			FileKind::Index => FileKey::index(index_id, id),
			FileKind::Deletion => unreachable!(),
		})? as u32;
		Ok((id, len))
	}
}
