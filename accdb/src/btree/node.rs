//! Fixed-size node pages for the order-64 B-tree.
//!
//! Every page on disk is the same size regardless of how many entries it
//! actually holds, so that a node can always be rewritten in place:
//!
//! ```text
//! | numElements:1 | entry x 64 | child_location x 65 |
//! ```
//!
//! An `entry` is `key (key_size bytes) | file_id:2 | offset:4 | length:4`.
//! A `child_location` is `file_id:2 | offset:4`, with `(0, 0)` standing for
//! "no child" (a leaf slot, or a slot past `numElements`).

use byteorder::{BigEndian, ByteOrder};

use error::{ErrorKind, Result};

pub(crate) const ORDER: usize = 64;

pub(crate) const ENTRY_FIXED_LEN: usize = 10; // file_id:2 + offset:4 + length:4
pub(crate) const CHILD_LEN: usize = 6; // file_id:2 + offset:4

pub(crate) fn page_size(key_size: usize) -> usize {
	1 + ORDER * (key_size + ENTRY_FIXED_LEN) + (ORDER + 1) * CHILD_LEN
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryLoc {
	pub file_id: u16,
	pub offset: u32,
	pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
	pub key: Vec<u8>,
	pub loc: EntryLoc,
}

/// A child pointer as it sits inside a `Node` still in memory: either
/// resolved to a loaded node in the cache arena, or not yet paged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildLoc {
	Disk { file: u16, offset: u32 },
	Cached(usize),
}

impl ChildLoc {
	fn is_none(disk_file: u16, disk_offset: u32) -> bool {
		disk_file == 0 && disk_offset == 0
	}
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
	pub entries: Vec<Entry>,
	/// Empty for a leaf; otherwise always `entries.len() + 1` long.
	pub children: Vec<ChildLoc>,
	pub parent: Option<usize>,
	pub parent_child_index: u8,
	pub file: u16,
	pub offset: u32,
}

impl Node {
	pub(crate) fn new_leaf(file: u16, offset: u32) -> Node {
		Node { entries: Vec::new(), children: Vec::new(), parent: None, parent_child_index: 0, file, offset }
	}

	pub(crate) fn is_leaf(&self) -> bool {
		self.children.is_empty()
	}

	/// Encode using this node's own `children` array. Only valid when every
	/// child is already `ChildLoc::Disk` -- a node with a `Cached` child
	/// (any node that still has a sibling resident in the arena) must go
	/// through `encode_resolved` instead, since a page on disk can only
	/// ever store `(file, offset)` pairs.
	pub(crate) fn encode(&self, key_size: usize) -> Vec<u8> {
		self.encode_resolved(key_size, &self.children)
	}

	/// Encode this node's entries against a caller-supplied `children`
	/// array, resolving any cached child to the permanent `(file, offset)`
	/// it was allocated at creation time. Used by `BTreeIndex::persist_node`
	/// so a node can be written to disk while its children still live in
	/// the arena.
	pub(crate) fn encode_resolved(&self, key_size: usize, children: &[ChildLoc]) -> Vec<u8> {
		let mut buf = vec![0u8; page_size(key_size)];
		buf[0] = self.entries.len() as u8;

		let entry_len = key_size + ENTRY_FIXED_LEN;
		for (i, entry) in self.entries.iter().enumerate() {
			let start = 1 + i * entry_len;
			buf[start..start + key_size].copy_from_slice(&entry.key);
			let tail = start + key_size;
			BigEndian::write_u16(&mut buf[tail..tail + 2], entry.loc.file_id);
			BigEndian::write_u32(&mut buf[tail + 2..tail + 6], entry.loc.offset);
			BigEndian::write_u32(&mut buf[tail + 6..tail + 10], entry.loc.length);
		}

		let children_start = 1 + ORDER * entry_len;
		for (i, child) in children.iter().enumerate() {
			let start = children_start + i * CHILD_LEN;
			let (file, offset) = match *child {
				ChildLoc::Disk { file, offset } => (file, offset),
				ChildLoc::Cached(_) => {
					panic!("cannot encode a node with an unresolved cached child; qed")
				},
			};
			BigEndian::write_u16(&mut buf[start..start + 2], file);
			BigEndian::write_u32(&mut buf[start + 2..start + 6], offset);
		}

		buf
	}

	pub(crate) fn decode(buf: &[u8], key_size: usize, file: u16, offset: u32, parent: Option<usize>, parent_child_index: u8) -> Result<Node> {
		if buf.len() != page_size(key_size) {
			return Err(ErrorKind::Corrupt(format!("index node page has wrong length: {} bytes", buf.len())).into());
		}

		let num_elements = buf[0] as usize;
		if num_elements > ORDER {
			return Err(ErrorKind::Corrupt(format!("index node claims {} elements, max is {}", num_elements, ORDER)).into());
		}

		let entry_len = key_size + ENTRY_FIXED_LEN;
		let mut entries = Vec::with_capacity(num_elements);
		for i in 0..num_elements {
			let start = 1 + i * entry_len;
			let key = buf[start..start + key_size].to_vec();
			let tail = start + key_size;
			let file_id = BigEndian::read_u16(&buf[tail..tail + 2]);
			let entry_offset = BigEndian::read_u32(&buf[tail + 2..tail + 6]);
			let length = BigEndian::read_u32(&buf[tail + 6..tail + 10]);
			entries.push(Entry { key, loc: EntryLoc { file_id, offset: entry_offset, length } });
		}

		let children_start = 1 + ORDER * entry_len;
		let mut first_child = [0u8; CHILD_LEN];
		first_child.copy_from_slice(&buf[children_start..children_start + CHILD_LEN]);
		let first_file = BigEndian::read_u16(&first_child[0..2]);
		let first_offset = BigEndian::read_u32(&first_child[2..6]);

		let children = if num_elements == 0 && ChildLoc::is_none(first_file, first_offset) {
			Vec::new()
		} else {
			let mut children = Vec::with_capacity(num_elements + 1);
			for i in 0..=num_elements {
				let start = children_start + i * CHILD_LEN;
				let cfile = BigEndian::read_u16(&buf[start..start + 2]);
				let coffset = BigEndian::read_u32(&buf[start + 2..start + 6]);
				children.push(ChildLoc::Disk { file: cfile, offset: coffset });
			}
			children
		};

		Ok(Node { entries, children, parent, parent_child_index, file, offset })
	}
}
