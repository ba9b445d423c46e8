//! Extension-to-Gopher-item-type lookup
//!
//! Maps a file's extension (the text after its last `.`) to the single byte
//! a Gopher menu line uses to describe that file's kind. Consumed as a pure
//! lookup table by [`crate::router`] and [`crate::dirlister`].

use std::{collections::HashMap, fs, io, path::Path};

/// Gopher item-type byte used when an extension has no mapping, and an entry
/// still needs to be classified as *something* for a binary transfer.
pub const DEFAULT_TYPE: u8 = b'9';

#[derive(Debug, Clone)]
pub struct ExtMap {
	table: HashMap<String, u8>,
}

impl ExtMap {
	/// The built-in mapping, used when no `ExtMapFile` is configured.
	pub fn default_table() -> Self {
		const ENTRIES: &[(&str, u8)] = &[
			("txt", b'0'),
			("md", b'0'),
			("asc", b'0'),
			("conf", b'0'),
			("gophermap", b'0'),
			("c", b'0'),
			("h", b'0'),
			("rs", b'0'),
			("htm", b'h'),
			("html", b'h'),
			("gif", b'g'),
			("jpg", b'I'),
			("jpeg", b'I'),
			("png", b'I'),
			("bmp", b'I'),
			("tif", b'I'),
			("tiff", b'I'),
			("mp3", b's'),
			("wav", b's'),
			("ogg", b's'),
			("flac", b's'),
			("mp4", b';'),
			("mov", b';'),
			("avi", b';'),
			("mkv", b';'),
			("pdf", b'9'),
			("zip", b'9'),
			("gz", b'9'),
			("tar", b'9'),
			("bz2", b'9'),
			("xz", b'9'),
			("exe", b'9'),
			("bin", b'9'),
			("hqx", b'4'),
			("uu", b'6'),
		];

		Self {
			table: ENTRIES
				.iter()
				.map(|&(ext, ty)| (ext.to_string(), ty))
				.collect(),
		}
	}

	/// Load a mapping file of `extension<whitespace>type` lines, one per
	/// line, falling back to [`ExtMap::default_table`] for any extension not
	/// listed. `#`-prefixed lines and blank lines are ignored.
	pub fn load(path: &Path) -> io::Result<Self> {
		let contents = fs::read_to_string(path)?;
		let mut map = Self::default_table();

		for line in contents.lines() {
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			let mut fields = line.split_whitespace();
			let (Some(ext), Some(ty)) = (fields.next(), fields.next()) else {
				continue;
			};
			let Some(ty) = ty.bytes().next() else {
				continue;
			};

			map.table.insert(ext.to_ascii_lowercase(), ty);
		}

		Ok(map)
	}

	/// Look up the Gopher item-type byte for a file name's extension.
	/// Returns [`DEFAULT_TYPE`] when the extension is unknown or absent.
	pub fn lookup(&self, filename: &str) -> u8 {
		let ext = extension_of(filename);

		if ext.is_empty() {
			return DEFAULT_TYPE;
		}

		self.table
			.get(&ext.to_ascii_lowercase())
			.copied()
			.unwrap_or(DEFAULT_TYPE)
	}
}

/// The extension of a file name: everything after the *last* `.`, or an
/// empty string if there is none. Mirrors `getfileextension()` in the
/// reference implementation, which scans for the last dot rather than using
/// a path-component-aware splitter.
fn extension_of(filename: &str) -> &str {
	match filename.rfind('.') {
		Some(pos) => &filename[pos + 1..],
		None => "",
	}
}
