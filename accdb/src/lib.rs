//! Append-biased key/value storage for accounter state.
//!
//! A database is a directory holding a handful of flat files:
//!
//! - one or more numbered data files holding raw values, append-only except
//!   where an in-place patch or a best-fit reuse of a freed region lands a
//!   write inside an existing one;
//! - `del.dat`, an append-only log of every region ever freed, searched
//!   best-fit on allocation;
//! - one order-64 B-tree per registered index, each its own `idx_<id>_*.dat`
//!   file family, mapping fixed-size keys to `(file, offset, length)`;
//! - `log.dat`, present only while a commit is in flight, recording enough
//!   of each write's prior state to undo it if the process dies mid-commit.
//!
//! Callers stage a batch of writes, patches, deletes and renames on a
//! `Transaction` and hand the whole thing to `Database::commit`, which
//! applies it under the undo log so a crash never leaves the database
//! partially written. Reads can run against an uncommitted transaction too,
//! folding its staged operations on top of the last committed state.

#![warn(missing_docs)]

extern crate byteorder;
extern crate crc32fast;
#[macro_use]
extern crate error_chain;
extern crate fs2;
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate matches;
#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
extern crate tempdir;

mod btree;
mod database;
mod deletion;
mod error;
mod key;
mod options;
mod pool;
mod transaction;
mod wal;

pub use database::{Database, DOESNT_EXIST};
pub use error::{Error, ErrorKind, Result};
pub use options::Options;
pub use transaction::{Transaction, OVERWRITE_DATA};
