//! GophermapEngine: render a `gophermap` file's mini-language into the menu
//! lines sent back to the client — directives, `%FILES%`/`%DIRS%`
//! expansion, relative-selector rewriting, and `=`-prefixed sub-gophermap
//! execution.

use std::path::Path;

use log::warn;

use crate::{
	cgi::{self, ServerSideParams},
	config::Config,
	dirlister,
	errors::GopherError,
	menu::{item_type, MenuLine},
};

/// One parsed gophermap line's fields, before server/port defaulting and
/// selector rewriting. Mirrors `explodegophermapline()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GophermapField {
	pub item_type: u8,
	pub desc: String,
	pub selector: String,
	pub server: String,
	pub port: u16,
}

/// Parse a single gophermap content line into its four tab-separated
/// fields. A field longer than its limit (desc/selector: 1023 bytes,
/// server: 63, port: 8 digits) is a parse error; a line that runs out
/// before all four fields are seen is not — the remaining fields simply
/// default to empty/zero, same as the reference.
pub fn parse_line(line: &str) -> Result<GophermapField, ()> {
	let bytes = line.as_bytes();
	if bytes.is_empty() {
		return Ok(GophermapField {
			item_type: item_type::INFO,
			..Default::default()
		});
	}

	let item_type = bytes[0];
	let rest = &bytes[1..];

	let (desc, rest) = scan_field(rest, 1023)?;
	let desc = String::from_utf8_lossy(&desc).into_owned();
	let Some(rest) = rest else {
		return Ok(GophermapField { item_type, desc, ..Default::default() });
	};

	let (selector, rest) = scan_field(rest, 1023)?;
	let selector = String::from_utf8_lossy(&selector).into_owned();
	let Some(rest) = rest else {
		return Ok(GophermapField { item_type, desc, selector, ..Default::default() });
	};

	let (server, rest) = scan_field(rest, 63)?;
	let server = String::from_utf8_lossy(&server).into_owned();
	let Some(rest) = rest else {
		return Ok(GophermapField { item_type, desc, selector, server, port: 0 });
	};

	let (port_bytes, _rest) = scan_field(rest, 8)?;
	let port_str = String::from_utf8_lossy(&port_bytes);
	let parsed: i64 = port_str.trim().parse().unwrap_or(0);
	let port = if (1..=65535).contains(&parsed) { parsed as u16 } else { 0 };

	Ok(GophermapField { item_type, desc, selector, server, port })
}

/// Scan for the next `\t`, returning the field content and, if a tab was
/// found, the remainder after it. `None` as the remainder means the input
/// ran out first. Errors if the field exceeds `max_len` bytes before
/// either.
fn scan_field(input: &[u8], max_len: usize) -> Result<(Vec<u8>, Option<&[u8]>), ()> {
	let mut i = 0;
	while i < input.len() {
		if input[i] == b'\t' {
			return Ok((input[..i].to_vec(), Some(&input[i + 1..])));
		}
		i += 1;
		if i > max_len {
			return Err(());
		}
	}
	Ok((input.to_vec(), None))
}

/// Fill in default server/port values and, for same-server relative
/// selectors, resolve them against `curdir`. Mirrors `buildgophermapline()`.
pub fn build_line(field: &GophermapField, curdir: &str, config: &Config) -> MenuLine {
	let hostname = config.gopher_hostname.clone().unwrap_or_default();
	let (mut item_server, mut item_port) = (field.server.clone(), field.port);

	if field.server.is_empty() && item_port == 0 {
		item_server = hostname.clone();
		item_port = config.gopher_port;
	} else if item_port == 0 {
		item_port = if field.server.eq_ignore_ascii_case(&hostname) {
			config.gopher_port
		} else {
			70
		};
	} else if field.server.is_empty() {
		item_server = hostname.clone();
	}

	let is_relative_local_selector = field.item_type != item_type::INFO
		&& !field.selector.is_empty()
		&& !field.selector.starts_with('/')
		&& item_server.eq_ignore_ascii_case(&hostname)
		&& !field.selector.starts_with("URL:");

	let item_selector = if is_relative_local_selector {
		compute_relative_path(curdir, &field.selector)
	} else {
		field.selector.clone()
	};

	MenuLine::new(field.item_type, field.desc.clone(), item_selector, item_server, item_port)
}

/// Resolve `relpath` against `curdir` the way a shell resolves `cd`: glue
/// them with `/`, collapse doubled slashes, then repeatedly fold `/../`
/// segments. Mirrors `computerelativepath()` textually — this is not path
/// canonicalization and never touches the filesystem, so it can resolve a
/// selector that doesn't correspond to any real file.
pub fn compute_relative_path(curdir: &str, relpath: &str) -> String {
	let mut result = collapse_slashes(&format!("{curdir}/{relpath}"));

	while let Some(pos) = result.find("/../") {
		let start = if pos == 0 {
			0
		} else {
			result[..pos].rfind('/').unwrap_or(0)
		};
		result = format!("{}{}", &result[..start], &result[pos + 3..]);
	}

	if result.len() >= 3 && result.ends_with("/..") {
		if result.len() == 3 {
			return "/".to_string();
		}
		let head = &result[..result.len() - 3];
		return match head.rfind('/') {
			Some(idx) => result[..idx + 1].to_string(),
			None => String::new(),
		};
	}

	result
}

fn collapse_slashes(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	let mut prev_slash = false;
	for c in s.chars() {
		if c == '/' {
			if prev_slash {
				continue;
			}
			prev_slash = true;
		} else {
			prev_slash = false;
		}
		out.push(c);
	}
	out
}

/// Render a gophermap's text `content` into the menu lines it expands to.
/// `local_dir` is the directory the gophermap lives in (for `%FILES%`
/// and `%DIRS%`), `selector_prefix` is the request's directory selector
/// (with trailing `/`), used both as `curdir` for relative-path resolution
/// and as the prefix for listed entries' selectors.
pub async fn render(
	content: &str,
	local_dir: &Path,
	selector_prefix: &str,
	config: &Config,
	version: &str,
	remote_addr: &str,
) -> Vec<MenuLine> {
	let mut lines = Vec::new();
	let curdir = selector_prefix.trim_end_matches('/');

	for raw_line in content.lines() {
		if raw_line.starts_with('#') {
			continue;
		}

		if raw_line.eq_ignore_ascii_case("%FILES%") {
			match dirlister::list(local_dir, selector_prefix, config, false) {
				Ok(mut entries) => lines.append(&mut entries),
				Err(e) => warn!("failed to expand %FILES% for '{}': {e}", local_dir.display()),
			}
			continue;
		}

		if raw_line.eq_ignore_ascii_case("%DIRS%") {
			match dirlister::list(local_dir, selector_prefix, config, true) {
				Ok(mut entries) => lines.append(&mut entries),
				Err(e) => warn!("failed to expand %DIRS% for '{}': {e}", local_dir.display()),
			}
			continue;
		}

		let Ok(field) = parse_line(raw_line) else {
			lines.push(MenuLine::error("Parsing error"));
			continue;
		};

		if field.item_type == item_type::INLINE_SCRIPT {
			if config.sub_gophermaps {
				run_sub_gophermap(&field.desc, config, version, remote_addr, selector_prefix, &mut lines)
					.await;
			}
			continue;
		}

		lines.push(build_line(&field, curdir, config));
	}

	lines
}

async fn run_sub_gophermap(
	script_path: &str,
	config: &Config,
	version: &str,
	remote_addr: &str,
	script_name: &str,
	lines: &mut Vec<MenuLine>,
) {
	let Ok(resolved) = std::fs::canonicalize(script_path) else {
		warn!("failed to resolve the path to '{script_path}'");
		return;
	};

	let is_php = config.php_support && resolved.extension().and_then(|e| e.to_str()) == Some("php");
	let launcher = if is_php {
		Some("php")
	} else if config.cgi_support {
		None
	} else {
		return;
	};

	let output = cgi::run(
		&resolved,
		launcher,
		&ServerSideParams::default(),
		config,
		version,
		script_name,
		remote_addr,
	)
	.await;

	let curdir = script_name.trim_end_matches('/');
	for raw_line in String::from_utf8_lossy(&output.stdout).lines() {
		if raw_line.starts_with('#') {
			continue;
		}
		match parse_line(raw_line) {
			Ok(field) => lines.push(build_line(&field, curdir, config)),
			Err(()) => break,
		}
	}
}
