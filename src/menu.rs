//! Gopher menu lines — the five-field, tab-separated records a Gopher
//! directory listing (or gophermap) is built from.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Well-known Gopher item-type bytes (RFC 1436 plus the common extensions
/// every gopherspace of the era settled on).
pub mod item_type {
	pub const TEXT_FILE: u8 = b'0';
	pub const DIRECTORY: u8 = b'1';
	pub const CCSO_NAMESERVER: u8 = b'2';
	pub const ERROR: u8 = b'3';
	pub const BINHEX: u8 = b'4';
	pub const DOS_BINARY: u8 = b'5';
	pub const UUENCODED: u8 = b'6';
	pub const SEARCH: u8 = b'7';
	pub const TELNET: u8 = b'8';
	pub const BINARY: u8 = b'9';
	pub const MIRROR: u8 = b'+';
	pub const GIF: u8 = b'g';
	pub const HTML: u8 = b'h';
	pub const INFO: u8 = b'i';
	pub const IMAGE: u8 = b'I';
	pub const TELNET_3270: u8 = b'T';
	pub const SOUND: u8 = b's';

	/// Gophermap-only directive: "run this script and splice its output
	/// in". Never appears on the wire — [`super::MenuLine`] should not be
	/// constructed with this type.
	pub const INLINE_SCRIPT: u8 = b'=';
}

/// A single Gopher menu line: `<type><desc>\t<selector>\t<host>\t<port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuLine {
	pub item_type: u8,
	pub desc: String,
	pub selector: String,
	pub host: String,
	pub port: u16,
}

impl MenuLine {
	pub fn new(
		item_type: u8,
		desc: impl Into<String>,
		selector: impl Into<String>,
		host: impl Into<String>,
		port: u16,
	) -> Self {
		Self {
			item_type,
			desc: desc.into(),
			selector: selector.into(),
			host: host.into(),
			port,
		}
	}

	/// Build the fixed `iForbidden!\tfake\tfake\t0` / `3The selected
	/// resource doesn't exist!\tfake\tfake\t0`-style informational lines the
	/// reference server uses for in-band error reporting.
	pub fn info(desc: impl Into<String>) -> Self {
		Self::new(item_type::INFO, desc, "fake", "fake", 0)
	}

	pub fn error(desc: impl Into<String>) -> Self {
		Self::new(item_type::ERROR, desc, "fake", "fake", 0)
	}

	/// Render this line with its trailing `\r\n`, as bytes ready to be
	/// written to the client socket in a single call (keeping the line and
	/// its terminator in one write, the way the reference uses `writev()`
	/// with a two-segment `iovec` to keep both in a single TCP segment where
	/// possible).
	pub fn to_wire(&self) -> Vec<u8> {
		format!("{self}").into_bytes()
	}
}

impl Display for MenuLine {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		write!(
			f,
			"{}{}\t{}\t{}\t{}\r\n",
			self.item_type as char, self.desc, self.selector, self.host, self.port
		)
	}
}

/// The terminator line ending every menu response.
pub const END_OF_MENU: &[u8] = b".\r\n";

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_tab_separated_line() {
		let line = MenuLine::new(item_type::TEXT_FILE, "Readme", "/readme.txt", "example.org", 70);
		assert_eq!(
			format!("{line}"),
			"0Readme\t/readme.txt\texample.org\t70\r\n"
		);
	}

	#[test]
	fn info_and_error_use_fake_host() {
		assert_eq!(
			format!("{}", MenuLine::info("Forbidden!")),
			"iForbidden!\tfake\tfake\t0\r\n"
		);
		assert_eq!(
			format!("{}", MenuLine::error("Not found")),
			"3Not found\tfake\tfake\t0\r\n"
		);
	}
}
