//! DirLister: turn a directory's contents into Gopher menu lines, the way
//! `outputdircontent()` and `%FILES%`/`%DIRS%` gophermap directives do.

use std::{fs, path::Path};

use crate::{config::Config, errors::GopherError, menu::MenuLine};

/// List `local_dir`'s entries as menu lines, using `selector_prefix` (the
/// request path, expected to already end in `/`) to build each entry's
/// selector. Hidden entries (dotfiles) and the three gophermap file names
/// are always skipped. When `dirs_only` is set, regular files are skipped
/// too (used by the gophermap engine's `%DIRS%` directive).
pub fn list(
	local_dir: &Path,
	selector_prefix: &str,
	config: &Config,
	dirs_only: bool,
) -> Result<Vec<MenuLine>, GopherError> {
	let mut entries: Vec<_> = fs::read_dir(local_dir)
		.map_err(|e| GopherError::NotFound(format!("{}: {e}", local_dir.display())))?
		.filter_map(|e| e.ok())
		.collect();

	entries.sort_by(|a, b| {
		let a_is_dir = a.file_type().map(|t| t.is_dir()).unwrap_or(false);
		let b_is_dir = b.file_type().map(|t| t.is_dir()).unwrap_or(false);

		match (a_is_dir, b_is_dir) {
			(true, false) => std::cmp::Ordering::Less,
			(false, true) => std::cmp::Ordering::Greater,
			_ => a
				.file_name()
				.to_string_lossy()
				.to_ascii_lowercase()
				.cmp(&b.file_name().to_string_lossy().to_ascii_lowercase()),
		}
	});

	let mut lines = Vec::new();

	for entry in entries {
		let name = entry.file_name();
		let name = name.to_string_lossy();

		if name.starts_with('.') {
			continue;
		}
		if matches!(&*name, "gophermap" | "gophermap.cgi" | "gophermap.php") {
			continue;
		}

		let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
		if !is_dir && dirs_only {
			continue;
		}

		let item_type = if is_dir {
			crate::menu::item_type::DIRECTORY
		} else {
			config.ext_map.lookup(&name)
		};

		let selector = percent_encode(&format!("{selector_prefix}{name}"));

		lines.push(MenuLine::new(
			item_type,
			name.into_owned(),
			selector,
			config.gopher_hostname.clone().unwrap_or_default(),
			config.gopher_port,
		));
	}

	if lines.is_empty() {
		lines.push(MenuLine::info("This directory is empty."));
	}

	Ok(lines)
}

/// Percent-encode a selector for inclusion in a generated menu line.
/// Deliberately conservative: only `a-z A-Z 0-9 - / _ . ~` pass through
/// unescaped, matching `percencode()` exactly (a narrower "safe" set than
/// RFC 3986's unreserved characters, but the one real clients of this
/// server expect).
pub fn percent_encode(s: &str) -> String {
	const HEX: &[u8; 16] = b"0123456789ABCDEF";
	let mut out = String::with_capacity(s.len());

	for b in s.bytes() {
		if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'/' | b'_' | b'.' | b'~') {
			out.push(b as char);
		} else {
			out.push('%');
			out.push(HEX[(b >> 4) as usize] as char);
			out.push(HEX[(b & 0x0F) as usize] as char);
		}
	}

	out
}
