//! Configuration: parsing the `key = value` file into a typed, immutable
//! record, and resolving the optional `RunAsUser` account up front (so the
//! lookup still works after a later `chroot`).

use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use log::warn;
use regex::Regex;

use crate::extmap::ExtMap;

/// Default Gopher port, per RFC 1436.
pub const DEFAULT_PORT: u16 = 70;

/// The resolved identity of a `RunAsUser=` account, looked up once at load
/// time (uid/gid/home), so privilege drop never needs to resolve a name
/// after a `chroot` has made `/etc/passwd` unreachable.
#[derive(Debug, Clone)]
pub struct ResolvedUser {
	pub name: String,
	pub uid: u32,
	pub gid: u32,
	pub home: PathBuf,
}

#[derive(Debug, Clone, Default)]
struct Raw {
	gopher_root: Option<String>,
	user_dir: Option<String>,
	pub_dir_list: Option<String>,
	gopher_port: Option<String>,
	gopher_hostname: Option<String>,
	default_gophermap: Option<String>,
	verbose: Option<String>,
	caps_support: Option<String>,
	caps_server_geolocation_string: Option<String>,
	caps_server_architecture: Option<String>,
	caps_server_description: Option<String>,
	caps_server_default_encoding: Option<String>,
	cgi_support: Option<String>,
	php_support: Option<String>,
	sub_gophermaps: Option<String>,
	paranoid_mode: Option<String>,
	plugin: Option<String>,
	plugin_filter: Option<String>,
	run_as_user: Option<String>,
	chroot: Option<String>,
	http_err_file: Option<String>,
	bind: Option<String>,
	disable_ipv6: Option<String>,
	ext_map_file: Option<String>,
	sec_url_delim: Option<String>,
}

/// The server's fully validated, immutable configuration. Loaded once at
/// startup and then shared read-only (behind an `Arc`) with every connection
/// task. [`Clone`] is used once per connection, to substitute the local
/// address for `gopher_hostname` when it was left unset (§4.1) without
/// disturbing the shared copy every other connection sees.
#[derive(Debug, Clone)]
pub struct Config {
	pub gopher_root: PathBuf,
	pub user_dir: Option<String>,
	pub pub_dirs: Vec<PathBuf>,
	pub gopher_port: u16,
	pub gopher_hostname: Option<String>,
	pub default_gophermap: Option<PathBuf>,
	pub verbose: u32,
	pub caps_support: bool,
	pub caps_server_geolocation_string: Option<String>,
	pub caps_server_architecture: Option<String>,
	pub caps_server_description: Option<String>,
	pub caps_server_default_encoding: Option<String>,
	pub cgi_support: bool,
	pub php_support: bool,
	pub sub_gophermaps: bool,
	pub paranoid_mode: bool,
	pub plugin: Option<PathBuf>,
	pub plugin_filter: Option<Regex>,
	pub run_as_user: Option<ResolvedUser>,
	pub chroot: Option<PathBuf>,
	pub http_err_file: Option<String>,
	pub bind: Option<String>,
	pub disable_ipv6: bool,
	pub ext_map_file: Option<PathBuf>,
	pub ext_map: ExtMap,
	pub sec_url_delim: u8,
}

impl Config {
	/// Load and validate the configuration file at `path`.
	pub fn load(path: &std::path::Path) -> Result<Self> {
		let text = fs::read_to_string(path)
			.with_context(|| format!("failed to open configuration file '{}'", path.display()))?;

		Self::parse(&text)
	}

	/// Parse an already-loaded configuration file's text. Exposed separately
	/// from [`Config::load`] so tests (and anything else that already has the
	/// text in hand) don't need a real file on disk.
	pub fn parse(text: &str) -> Result<Self> {
		let mut raw = Raw::default();

		for line in text.lines() {
			let Some(eq) = line.find('=') else { continue };
			let key = line[..eq].trim();
			if key.is_empty() {
				continue;
			}

			let mut value = &line[eq + 1..];
			if let Some(hash) = value.find('#') {
				value = &value[..hash];
			}
			let value = value.trim();
			if value.is_empty() {
				continue;
			}

			let slot = match key.to_ascii_lowercase().as_str() {
				"gopherroot" => &mut raw.gopher_root,
				"userdir" => &mut raw.user_dir,
				"pubdirlist" => &mut raw.pub_dir_list,
				"gopherport" => &mut raw.gopher_port,
				"gopherhostname" => &mut raw.gopher_hostname,
				"defaultgophermap" => &mut raw.default_gophermap,
				"verbose" => &mut raw.verbose,
				"capssupport" => &mut raw.caps_support,
				"capsservergeolocationstring" => &mut raw.caps_server_geolocation_string,
				"capsserverarchitecture" => &mut raw.caps_server_architecture,
				"capsserverdescription" => &mut raw.caps_server_description,
				"capsserverdefaultencoding" => &mut raw.caps_server_default_encoding,
				"gophercgisupport" => &mut raw.cgi_support,
				"gopherphpsupport" => &mut raw.php_support,
				"subgophermaps" => &mut raw.sub_gophermaps,
				"paranoidmode" => &mut raw.paranoid_mode,
				"plugin" => &mut raw.plugin,
				"pluginfilter" => &mut raw.plugin_filter,
				"runasuser" => &mut raw.run_as_user,
				"chroot" => &mut raw.chroot,
				"httperrfile" => &mut raw.http_err_file,
				"bind" => &mut raw.bind,
				"disableipv6" => &mut raw.disable_ipv6,
				"extmapfile" => &mut raw.ext_map_file,
				"securldelim" => &mut raw.sec_url_delim,
				other => {
					warn!("ignoring unknown configuration key '{other}'");
					continue;
				}
			};

			*slot = Some(value.to_string());
		}

		Self::from_raw(raw)
	}

	fn from_raw(raw: Raw) -> Result<Self> {
		let gopher_root = raw
			.gopher_root
			.filter(|s| !s.is_empty())
			.context("missing 'GopherRoot' directive in the configuration file")?;

		let user_dir = match raw.user_dir {
			Some(s) => {
				if !s.starts_with('/') || !s.contains("%s") {
					bail!(
						"'UserDir' must be an absolute path containing the '%s' placeholder, got \
						 '{s}'"
					);
				}
				Some(s)
			}
			None => None,
		};

		let pub_dirs = raw
			.pub_dir_list
			.as_deref()
			.map(|s| s.split(':').map(PathBuf::from).collect())
			.unwrap_or_default();

		let gopher_port = match raw.gopher_port {
			Some(s) => s
				.parse::<u16>()
				.ok()
				.filter(|&p| p >= 1)
				.with_context(|| format!("invalid 'GopherPort' value '{s}'"))?,
			None => DEFAULT_PORT,
		};

		let verbose = match raw.verbose {
			Some(s) => s
				.parse::<u32>()
				.with_context(|| format!("invalid 'Verbose' value '{s}'"))?,
			None => 0,
		};

		if raw.gopher_hostname.is_none() {
			warn!(
				"missing 'GopherHostname' directive; the local IP address will be used instead"
			);
		}

		let ext_map_file = raw.ext_map_file.map(PathBuf::from);
		let ext_map = match &ext_map_file {
			Some(path) => ExtMap::load(path)
				.with_context(|| format!("failed to load extension map '{}'", path.display()))?,
			None => ExtMap::default_table(),
		};

		let run_as_user = raw.run_as_user.map(|name| resolve_user(&name)).transpose()?;

		let plugin_filter = raw
			.plugin_filter
			.as_deref()
			.map(Regex::new)
			.transpose()
			.context("invalid 'PluginFilter' regular expression")?;

		let http_err_file = match raw.http_err_file {
			Some(path) => match fs::read_to_string(&path) {
				Ok(contents) => Some(contents),
				Err(e) => {
					warn!(
						"failed to load custom http error file '{path}' ({e}); falling back to \
						 the default body"
					);
					None
				}
			},
			None => None,
		};

		Ok(Self {
			gopher_root: PathBuf::from(gopher_root),
			user_dir,
			pub_dirs,
			gopher_port,
			gopher_hostname: raw.gopher_hostname,
			default_gophermap: raw.default_gophermap.map(PathBuf::from),
			verbose,
			caps_support: parse_bool(raw.caps_support),
			caps_server_geolocation_string: raw.caps_server_geolocation_string,
			caps_server_architecture: raw.caps_server_architecture,
			caps_server_description: raw.caps_server_description,
			caps_server_default_encoding: raw.caps_server_default_encoding,
			cgi_support: parse_bool(raw.cgi_support),
			php_support: parse_bool(raw.php_support),
			sub_gophermaps: parse_bool(raw.sub_gophermaps),
			paranoid_mode: parse_bool(raw.paranoid_mode),
			plugin: raw.plugin.map(PathBuf::from),
			plugin_filter,
			run_as_user,
			chroot: raw.chroot.map(PathBuf::from),
			http_err_file,
			bind: raw.bind,
			disable_ipv6: parse_bool(raw.disable_ipv6),
			ext_map_file,
			ext_map,
			sec_url_delim: raw
				.sec_url_delim
				.and_then(|s| s.parse::<u8>().ok())
				.unwrap_or(0),
		})
	}
}

fn parse_bool(value: Option<String>) -> bool {
	value
		.and_then(|s| s.trim().parse::<i64>().ok())
		.map(|n| n != 0)
		.unwrap_or(false)
}

#[cfg(unix)]
fn resolve_user(name: &str) -> Result<ResolvedUser> {
	use nix::unistd::User;

	let user = User::from_name(name)
		.with_context(|| format!("failed to look up user '{name}'"))?
		.with_context(|| format!("no such user '{name}'"))?;

	Ok(ResolvedUser {
		name: user.name,
		uid: user.uid.as_raw(),
		gid: user.gid.as_raw(),
		home: user.dir,
	})
}

#[cfg(not(unix))]
fn resolve_user(_name: &str) -> Result<ResolvedUser> {
	bail!("RunAsUser is only supported on POSIX hosts")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn minimal_config() {
		let cfg = Config::parse("GopherRoot = /srv/gopher\n").unwrap();
		assert_eq!(cfg.gopher_root, PathBuf::from("/srv/gopher"));
		assert_eq!(cfg.gopher_port, DEFAULT_PORT);
		assert!(!cfg.caps_support);
	}

	#[test]
	fn missing_root_is_an_error() {
		assert!(Config::parse("GopherPort = 70\n").is_err());
	}

	#[test]
	fn comments_and_case_insensitive_keys() {
		let cfg = Config::parse(
			"GOPHERROOT = /srv/gopher # trailing comment\n\
			 gopherport = 7070\n\
			 CapsSupport = 1\n",
		)
		.unwrap();
		assert_eq!(cfg.gopher_root, PathBuf::from("/srv/gopher"));
		assert_eq!(cfg.gopher_port, 7070);
		assert!(cfg.caps_support);
	}

	#[test]
	fn empty_value_is_ignored() {
		let cfg = Config::parse("GopherRoot = /srv/gopher\nGopherHostname =\n").unwrap();
		assert!(cfg.gopher_hostname.is_none());
	}

	#[test]
	fn userdir_must_be_absolute_with_placeholder() {
		let err = Config::parse("GopherRoot = /srv/gopher\nUserDir = relative/%s\n").unwrap_err();
		assert!(err.to_string().contains("UserDir"));

		let err = Config::parse("GopherRoot = /srv/gopher\nUserDir = /home/foo\n").unwrap_err();
		assert!(err.to_string().contains("UserDir"));

		let cfg =
			Config::parse("GopherRoot = /srv/gopher\nUserDir = /home/%s/public_gopher\n").unwrap();
		assert_eq!(cfg.user_dir.as_deref(), Some("/home/%s/public_gopher"));
	}

	#[test]
	fn pubdirlist_splits_on_colon() {
		let cfg =
			Config::parse("GopherRoot = /srv/gopher\nPubDirList = /pub/a:/pub/b\n").unwrap();
		assert_eq!(
			cfg.pub_dirs,
			vec![PathBuf::from("/pub/a"), PathBuf::from("/pub/b")]
		);
	}
}
