//! The error type a request handler returns when it can't produce a normal
//! response, and the in-band Gopher error line that gets sent back for it.

use std::{
	error::Error,
	fmt::{Display, Formatter, Result as FmtResult},
	io,
};

use crate::{menu::MenuLine, selector::SelectorError};

/// Everything that can go wrong while serving a single request, past the
/// point the connection was accepted. Each variant maps to one in-band
/// Gopher response (never a dropped connection) except [`GopherError::Io`],
/// which means the socket itself is unusable.
#[derive(Debug)]
pub enum GopherError {
	/// The selector failed a security check: malformed percent-encoding,
	/// embedded NUL, control characters, and the like.
	Request(SelectorError),
	/// The resolved path exists but falls outside `GopherRoot`/`PubDirList`,
	/// or the requesting user isn't allowed to reach it.
	Access(String),
	/// Nothing exists at the resolved path.
	NotFound(String),
	/// A CGI script, plugin, or sub-gophermap could not be launched or
	/// exited abnormally in a way that prevented a response.
	Script(String),
	/// The underlying connection broke while a response was being written.
	Io(io::Error),
}

impl Display for GopherError {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Request(e) => write!(f, "bad request: {e}"),
			Self::Access(msg) => write!(f, "access denied: {msg}"),
			Self::NotFound(msg) => write!(f, "not found: {msg}"),
			Self::Script(msg) => write!(f, "script error: {msg}"),
			Self::Io(e) => write!(f, "I/O error: {e}"),
		}
	}
}

impl Error for GopherError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			Self::Request(e) => Some(e),
			Self::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for GopherError {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}

impl From<SelectorError> for GopherError {
	fn from(e: SelectorError) -> Self {
		Self::Request(e)
	}
}

impl GopherError {
	/// The exact wording the reference server puts in front of the client
	/// for each error class, wrapped as a single `i`/`3` line plus the menu
	/// terminator so it can be written straight to the socket.
	pub fn as_menu_line(&self) -> MenuLine {
		match self {
			Self::Request(_) => MenuLine::error("Invalid request."),
			Self::Access(_) => MenuLine::info("Forbidden!"),
			Self::NotFound(_) => MenuLine::error("The selected resource doesn't exist!"),
			Self::Script(_) => MenuLine::error("The selected resource failed to execute!"),
			Self::Io(_) => MenuLine::error("Internal server error."),
		}
	}
}
