//! Non-protocol-related utilities

use std::{
	fmt::{Debug, Display, Formatter, Result as FmtResult},
	net::SocketAddr,
	str,
};

/// Format an ASCII-ish byte string
pub struct FmtAsciiIsh<'a>(pub &'a [u8]);

impl Debug for FmtAsciiIsh<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_fmt(format_args!("b\"{self}\""))
	}
}

impl Display for FmtAsciiIsh<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		use std::fmt::Write;

		const ASCII_CONTROL_ESCAPES: &[(u8, &str)] = &[
			(b'\0', "\\0"),
			(b'\t', "\\t"),
			(b'\n', "\\n"),
			(b'\r', "\\r"),
			(b'"', "\\\""),
			(b'\\', "\\\\"),
		];

		for byte in self.0.iter().copied() {
			if let Ok(escaped) = ASCII_CONTROL_ESCAPES.binary_search_by_key(&byte, |&(c, _)| c) {
				f.write_str(ASCII_CONTROL_ESCAPES[escaped].1)?;
			} else if byte.is_ascii_graphic() || byte == b' ' {
				f.write_char(byte as char)?;
			} else {
				f.write_fmt(format_args!("\\x{byte:02x}"))?;
			}
		}

		Ok(())
	}
}

/// Format a byte string as UTF-8 if possible, otherwise as an ASCII-ish string
pub struct FmtMaybeUtf8<'a>(pub &'a [u8]);

impl Debug for FmtMaybeUtf8<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		if let Ok(s) = str::from_utf8(self.0) {
			write!(f, "\"{s}\"")
		} else {
			write!(f, "{:?}", FmtAsciiIsh(self.0))
		}
	}
}

impl Display for FmtMaybeUtf8<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		if let Ok(s) = str::from_utf8(self.0) {
			write!(f, "{s}")
		} else {
			write!(f, "{}", FmtAsciiIsh(self.0))
		}
	}
}

/// Format a socket address, if it's known
pub struct FmtMaybeAddr<'a, E>(pub &'a Result<SocketAddr, E>);

impl<E: Debug> Debug for FmtMaybeAddr<'_, E> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self.0 {
			Ok(addr) => write!(f, "{addr:?}"),
			Err(err) => write!(f, "{err:?}"),
		}
	}
}

impl<E> Display for FmtMaybeAddr<'_, E> {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		if let Ok(addr) = self.0 {
			write!(f, "{addr}")
		} else {
			write!(f, "[address unknown]")
		}
	}
}

/// Strip a leading `::ffff:` IPv4-mapped prefix from a textual IPv6 address
pub fn strip_ipv4_mapped_prefix(addr: &str) -> &str {
	addr.strip_prefix("::ffff:").unwrap_or(addr)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fmt_ascii_ish_display() {
		assert_eq!(format!("a {} c", FmtAsciiIsh(b"b")), r"a b c");
		assert_eq!(format!("a {} c", FmtAsciiIsh(b"123")), r"a 123 c");
		assert_eq!(format!("a {} c", FmtAsciiIsh(b"\0b")), r"a \0b c");
		assert_eq!(
			format!("a {} c", FmtAsciiIsh(&[0xff, 0xee][..])),
			r"a \xff\xee c"
		);
	}

	#[test]
	fn fmt_maybe_utf8_display() {
		assert_eq!(format!("a {} c", FmtMaybeUtf8(b"b")), "a b c");
		assert_eq!(
			format!("a {} c", FmtMaybeUtf8(&[0xff, 0xee][..])),
			r"a \xff\xee c"
		);
	}

	#[test]
	fn fmt_maybe_addr_display() {
		use std::net::{IpAddr, Ipv4Addr};

		assert_eq!(
			format!(
				"a {} c",
				FmtMaybeAddr(&Ok::<_, ()>(SocketAddr::new(
					IpAddr::V4(Ipv4Addr::LOCALHOST),
					80
				)))
			),
			r#"a 127.0.0.1:80 c"#
		);
		assert_eq!(
			format!("a {} c", FmtMaybeAddr(&Err(()))),
			r#"a [address unknown] c"#
		);
	}

	#[test]
	fn strip_ipv4_mapped() {
		assert_eq!(strip_ipv4_mapped_prefix("::ffff:127.0.0.1"), "127.0.0.1");
		assert_eq!(strip_ipv4_mapped_prefix("::1"), "::1");
	}
}
