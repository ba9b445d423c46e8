//! PathResolver: turn a decoded selector into a local filesystem path, and
//! make sure that path can't be used to escape the directories the server is
//! allowed to serve from.

use std::path::{Path, PathBuf};

use crate::{config::Config, errors::GopherError};

/// A selector resolved to a concrete place on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
	/// The absolute local path the selector maps to. May not exist.
	pub local_file: PathBuf,
	/// The root directory this request is confined to: either
	/// [`Config::gopher_root`] or a `/~user/` substitution, never a
	/// `PubDirList` entry (those are only ever checked as alternate
	/// allow-listed roots, the way the reference does).
	pub effective_root: PathBuf,
}

/// Resolve `path` (the decoded, `/`-collapsed selector) against `config`,
/// substituting `/~user/...` against [`Config::user_dir`] when present.
/// Mirrors `BuildLocalFileAndRootDir()`.
pub fn resolve(path: &str, config: &Config) -> Resolved {
	if let (Some(rest), Some(template)) = (path.strip_prefix("/~"), &config.user_dir) {
		let (username, remainder) = match rest.find('/') {
			Some(idx) => (&rest[..idx], &rest[idx..]),
			None => (rest, ""),
		};

		let effective_root = PathBuf::from(template.replacen("%s", username, 1));
		let local_file = join_raw(&effective_root, remainder);

		return Resolved {
			local_file: collapse_path_slashes(&local_file),
			effective_root,
		};
	}

	let local_file = join_raw(&config.gopher_root, path);
	Resolved {
		local_file: collapse_path_slashes(&local_file),
		effective_root: config.gopher_root.clone(),
	}
}

/// Concatenate a root and a selector textually (not via [`Path::join`],
/// which would discard `root` if `suffix` started with `/`).
fn join_raw(root: &Path, suffix: &str) -> PathBuf {
	PathBuf::from(format!("{}{}", root.display(), suffix))
}

fn collapse_path_slashes(path: &Path) -> PathBuf {
	let s = path.to_string_lossy();
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
	PathBuf::from(out)
}

/// Confirm `resolved.local_file` doesn't escape `resolved.effective_root` or
/// any configured `PubDirList` entry, following symlinks. A path that
/// doesn't exist yet passes this check unconditionally — the later
/// existence check is what rejects it — mirroring `checkforevasion()`,
/// which treats a failed `realpath()` as "not an evasion".
pub fn check_containment(resolved: &Resolved, config: &Config) -> Result<(), GopherError> {
	let Ok(canonical) = std::fs::canonicalize(&resolved.local_file) else {
		return Ok(());
	};

	let mut canonical_str = canonical.to_string_lossy().into_owned();
	canonical_str.push('/');

	if canonical_str.starts_with(&*resolved.effective_root.to_string_lossy()) {
		return Ok(());
	}

	for pub_dir in &config.pub_dirs {
		if canonical_str.starts_with(&*pub_dir.to_string_lossy()) {
			return Ok(());
		}
	}

	Err(GopherError::Access(format!(
		"'{}' resolves to '{}', which is outside the served directories",
		resolved.local_file.display(),
		canonical.display()
	)))
}

/// Whether `path`'s file name is one of the three gophermap-ish names the
/// server refuses to serve as a plain file (`gophermap`, `gophermap.cgi`,
/// `gophermap.php`).
pub fn is_gophermap_name(path: &Path) -> bool {
	matches!(
		path.file_name().and_then(|n| n.to_str()),
		Some("gophermap") | Some("gophermap.cgi") | Some("gophermap.php")
	)
}
