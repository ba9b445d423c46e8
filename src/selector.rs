//! SelectorPipeline: read one request line off the wire, recognise the
//! handful of non-standard requests real clients send, split off secondary
//! parameters, percent-decode, and run the security checks from RFC 1436's
//! "don't trust the selector" footnote.

use std::{
	error::Error,
	fmt::{Display, Formatter, Result as FmtResult},
	time::Duration,
};

use async_std::io::{self, prelude::*};

/// Wall-clock budget for a selector to arrive, from the moment the
/// connection is accepted (§4.2). Implemented as a single async timeout
/// around the whole read rather than the reference's per-second
/// `SO_RCVTIMEO` polling loop — both bound the same 10s deadline, but this
/// one is driven by a monotonic timer instead of re-sampling `time(NULL)`,
/// which avoids the clock-jump hazard of the wall-clock approach.
pub const SELECTOR_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Selectors longer than this (before percent-decoding) are refused outright
/// rather than parsed; generous slack over the 512-byte wire limit so a
/// malformed-but-short selector still gets a proper security-check error
/// instead of a silent truncation.
const MAX_RAW_SELECTOR_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorOutcome {
	/// Looked like an HTTP request line (`GET /… HTTP/…`).
	Http,
	/// The UMN gopher+ client's root-resource probe (`\t$`).
	GopherPlus,
	/// `URL:<target>` — a foreign-protocol redirection request.
	UrlRedirect(String),
	/// An ordinary Gopher selector, fully parsed.
	Request(ParsedRequest),
}

/// A selector after secondary-parameter splitting and percent-decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
	/// Percent-decoded, always starts with `/`, runs of `/` collapsed.
	pub path: String,
	/// Raw bytes after the first `?` / configured delimiter, if any.
	/// Never percent-decoded: CGI's `QUERY_STRING` conventions require the
	/// raw bytes.
	pub url_query: Option<Vec<u8>>,
	/// Raw bytes after the first TAB, if any (the RFC 1436 search
	/// argument). Also never decoded.
	pub search_query: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorError {
	TooLong,
	DoubleTab,
	TrailingTab,
	ControlChar,
	InvalidUtf8,
	NullByte,
	MalformedPercent,
}

impl Display for SelectorError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(match self {
			Self::TooLong => "the selector is longer than 512 bytes",
			Self::DoubleTab => "the selector contains two consecutive TAB characters",
			Self::TrailingTab => "the selector ends with a TAB character",
			Self::ControlChar => "the selector contains an ASCII control character",
			Self::InvalidUtf8 => "the selector contains an invalid UTF-8 sequence",
			Self::NullByte => "the selector contains a %00 sequence",
			Self::MalformedPercent => "the selector contains a malformed percent-encoding",
		})
	}
}

impl Error for SelectorError {}

/// Read one LF-terminated line off `stream`, discarding any CR immediately
/// preceding it, bounded by [`SELECTOR_READ_TIMEOUT`].
pub async fn read_selector_line(
	stream: &mut (impl Read + Unpin),
) -> io::Result<Vec<u8>> {
	io::timeout(SELECTOR_READ_TIMEOUT, async {
		let mut buf = Vec::new();
		let mut byte = [0u8; 1];

		loop {
			if stream.read(&mut byte).await? == 0 {
				break;
			}

			if byte[0] == b'\n' {
				if buf.last() == Some(&b'\r') {
					buf.pop();
				}
				break;
			}

			if buf.len() < MAX_RAW_SELECTOR_LEN {
				buf.push(byte[0]);
			}
		}

		Ok(buf)
	})
	.await
}

/// Classify and fully parse a raw selector line (already stripped of its
/// trailing CR LF).
pub fn classify(raw: &[u8], sec_url_delim: u8) -> Result<SelectorOutcome, SelectorError> {
	if looks_like_http(raw) {
		return Ok(SelectorOutcome::Http);
	}

	if raw == b"\t$" {
		return Ok(SelectorOutcome::GopherPlus);
	}

	if let Some(target) = raw.strip_prefix(b"URL:") {
		return Ok(SelectorOutcome::UrlRedirect(
			String::from_utf8_lossy(target).into_owned(),
		));
	}

	let raw = if raw.is_empty() { &b"/"[..] } else { raw };

	// Prepend '/' before splitting, matching the reference's ordering: the
	// leading slash is added before server-side params are sliced off.
	let mut prefixed;
	let raw: &[u8] = if raw[0] != b'/' {
		prefixed = Vec::with_capacity(raw.len() + 1);
		prefixed.push(b'/');
		prefixed.extend_from_slice(raw);
		&prefixed
	} else {
		raw
	};

	let (selector_part, url_query, search_query) = split_secondary(raw, sec_url_delim);

	let decoded = percent_decode(selector_part)?;
	security_check(&decoded)?;

	let path = collapse_slashes(&String::from_utf8_lossy(&decoded));

	Ok(SelectorOutcome::Request(ParsedRequest {
		path,
		url_query,
		search_query,
	}))
}

fn looks_like_http(raw: &[u8]) -> bool {
	raw.starts_with(b"GET /") && contains_subslice(raw, b" HTTP/")
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
	haystack.windows(needle.len()).any(|w| w == needle)
}

/// Scan left-to-right for the first `?`/delimiter and the first TAB. The
/// TAB, wherever it falls, ends the scan — a `?`/delimiter appearing after
/// it is never seen. Mirrors `explode_serverside_params_from_query()`.
fn split_secondary(raw: &[u8], delim: u8) -> (&[u8], Option<Vec<u8>>, Option<Vec<u8>>) {
	let mut query_pos = None;
	let mut tab_pos = None;

	for (i, &b) in raw.iter().enumerate() {
		if (b == b'?' || (delim != 0 && b == delim)) && query_pos.is_none() {
			query_pos = Some(i);
		}
		if b == b'\t' {
			tab_pos = Some(i);
			break;
		}
	}

	let (main, search_query) = match tab_pos {
		Some(t) => {
			let rest = &raw[t + 1..];
			let end = rest.iter().position(|&b| b == b'\t').unwrap_or(rest.len());
			(&raw[..t], Some(rest[..end].to_vec()))
		}
		None => (raw, None),
	};

	match query_pos {
		Some(q) if q < main.len() => (&main[..q], Some(main[q + 1..].to_vec()), search_query),
		_ => (main, None, search_query),
	}
}

/// Percent-decode in place: `+` becomes space, `%HH` becomes the byte,
/// `%00` and malformed escapes abort the whole decode.
fn percent_decode(input: &[u8]) -> Result<Vec<u8>, SelectorError> {
	let mut out = Vec::with_capacity(input.len());
	let mut i = 0;

	while i < input.len() {
		match input[i] {
			b'+' => {
				out.push(b' ');
				i += 1;
			}
			b'%' => {
				let h1 = input.get(i + 1).copied();
				let h2 = input.get(i + 2).copied();
				let (Some(h1), Some(h2)) = (h1, h2) else {
					return Err(SelectorError::MalformedPercent);
				};

				if h1 == b'0' && h2 == b'0' {
					return Err(SelectorError::NullByte);
				}

				let (Some(n1), Some(n2)) = (hex_val(h1), hex_val(h2)) else {
					return Err(SelectorError::MalformedPercent);
				};

				out.push((n1 << 4) | n2);
				i += 3;
			}
			b => {
				out.push(b);
				i += 1;
			}
		}
	}

	Ok(out)
}

fn hex_val(c: u8) -> Option<u8> {
	match c {
		b'0'..=b'9' => Some(c - b'0'),
		b'a'..=b'f' => Some(c - b'a' + 10),
		b'A'..=b'F' => Some(c - b'A' + 10),
		_ => None,
	}
}

/// Selector-content checks (no raw tab, no trailing tab, no control bytes),
/// plus the bug-compatible UTF-8 validator: only 2- and 3-byte sequences are
/// recognised, 4-byte (astral) sequences are rejected, matching the
/// reference's `gophersecuritycheck()` exactly.
fn security_check(decoded: &[u8]) -> Result<(), SelectorError> {
	if decoded.len() > 512 {
		return Err(SelectorError::TooLong);
	}

	if contains_subslice(decoded, b"\t\t") {
		return Err(SelectorError::DoubleTab);
	}

	if decoded.last() == Some(&b'\t') {
		return Err(SelectorError::TrailingTab);
	}

	let mut i = 0;
	while i < decoded.len() {
		let b = decoded[i];

		if (1..32).contains(&b) {
			return Err(SelectorError::ControlChar);
		}

		if b & 0x80 == 0 {
			i += 1;
			continue;
		}

		if b & 0xE0 == 0xC0 {
			if decoded.get(i + 1).is_some_and(|&c| c & 0xC0 == 0x80) {
				i += 2;
				continue;
			}
		} else if b & 0xF0 == 0xE0 {
			if decoded.get(i + 1).is_some_and(|&c| c & 0xC0 == 0x80)
				&& decoded.get(i + 2).is_some_and(|&c| c & 0xC0 == 0x80)
			{
				i += 3;
				continue;
			}
		}

		return Err(SelectorError::InvalidUtf8);
	}

	Ok(())
}

/// Collapse runs of `/` to a single `/`, and prepend one if the string is
/// empty or doesn't already start with one.
fn collapse_slashes(s: &str) -> String {
	let mut out = String::with_capacity(s.len() + 1);
	if !s.starts_with('/') {
		out.push('/');
	}

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
