//! Length-prefixed keys at the API boundary.
//!
//! Callers pass `[len][key bytes...]`; `len` must match the key size an
//! index was registered with. Only the raw key bytes are ever written to
//! disk -- the length prefix is a convenience for the caller, not part of
//! the on-disk format.

use error::{ErrorKind, Result};

pub fn decode(buf: &[u8], key_size: usize) -> Result<&[u8]> {
	let declared = match buf.first() {
		Some(&b) => b as usize,
		None => {
			return Err(ErrorKind::BadArgument("key buffer is empty".into()).into());
		},
	};

	if declared != key_size {
		return Err(ErrorKind::BadArgument(
			format!("key length prefix {} does not match registered key size {}", declared, key_size)
		).into());
	}

	if buf.len() < 1 + key_size {
		return Err(ErrorKind::BadArgument("key buffer shorter than its declared length".into()).into());
	}

	Ok(&buf[1..1 + key_size])
}

#[cfg(test)]
mod tests {
	use super::decode;

	#[test]
	fn rejects_mismatched_prefix() {
		let buf = [3u8, 1, 2, 3];
		assert!(decode(&buf, 4).is_err());
	}

	#[test]
	fn rejects_short_buffer() {
		let buf = [4u8, 1, 2];
		assert!(decode(&buf, 4).is_err());
	}

	#[test]
	fn strips_prefix() {
		let buf = [3u8, 1, 2, 3];
		assert_eq!(decode(&buf, 3).unwrap(), &[1, 2, 3]);
	}
}
