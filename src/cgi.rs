//! CgiGateway: launch a CGI (or PHP) script with the standard environment
//! variables set, and capture its output for the caller to forward — either
//! raw, or line-by-line through the gophermap engine's field parser when the
//! script is itself generating a dynamic gophermap.

use std::{
	path::Path,
	process::{Command, Stdio},
};

use async_std::task;
use log::warn;

use crate::config::Config;

/// The two server-side parameter strings a request can carry: the part
/// after a literal `?`/configured delimiter, and the part after a TAB (the
/// RFC 1436 search argument). Neither is ever percent-decoded before being
/// handed to a script.
#[derive(Debug, Clone, Default)]
pub struct ServerSideParams {
	pub url_query: Option<Vec<u8>>,
	pub search_query: Option<Vec<u8>>,
}

/// The outcome of launching a script: raw bytes written to stdout, whether
/// it exited non-zero (logged, never surfaced to the client), or that it
/// couldn't be launched at all (treated as producing zero bytes, same as
/// the reference's `popen()` failure path).
pub struct CgiOutput {
	pub stdout: Vec<u8>,
}

/// Run `program` (optionally through `launcher`, e.g. `"php"`) with the CGI
/// environment populated, returning everything it wrote to stdout. A launch
/// failure is logged and reported as an empty output, matching
/// `execCgi()`'s behaviour when `popen()` returns `NULL`.
pub async fn run(
	program: &Path,
	launcher: Option<&str>,
	params: &ServerSideParams,
	config: &Config,
	version: &str,
	script_name: &str,
	remote_addr: &str,
) -> CgiOutput {
	let mut cmd = match launcher {
		Some(launcher) => {
			let mut c = Command::new(launcher);
			c.arg(program);
			c
		}
		None => Command::new(program),
	};

	cmd.env("SERVER_NAME", config.gopher_hostname.as_deref().unwrap_or(""));
	cmd.env("SERVER_PORT", config.gopher_port.to_string());
	cmd.env("SERVER_SOFTWARE", format!("Motsognir/{version}"));
	cmd.env("GATEWAY_INTERFACE", "CGI/1.0");
	cmd.env("REMOTE_HOST", remote_addr);
	cmd.env("REMOTE_ADDR", remote_addr);

	if let Some(q) = params.url_query.as_deref().or(params.search_query.as_deref()) {
		cmd.env("QUERY_STRING", String::from_utf8_lossy(q).into_owned());
	}
	if let Some(q) = &params.url_query {
		cmd.env("QUERY_STRING_URL", String::from_utf8_lossy(q).into_owned());
	}
	if let Some(q) = &params.search_query {
		cmd.env(
			"QUERY_STRING_SEARCH",
			String::from_utf8_lossy(q).into_owned(),
		);
	}
	cmd.env("SCRIPT_NAME", script_name);

	cmd.stdin(Stdio::null());
	cmd.stdout(Stdio::piped());
	cmd.stderr(Stdio::null());

	let program_desc = program.display().to_string();

	let output = task::spawn_blocking(move || cmd.output()).await;

	match output {
		Ok(output) => {
			if !output.status.success() {
				warn!(
					"server-side app '{program_desc}' terminated with a non-zero exit code ({:?})",
					output.status.code()
				);
			}
			CgiOutput {
				stdout: output.stdout,
			}
		}
		Err(e) => {
			warn!("failed to run the server-side app '{program_desc}' ({e})");
			CgiOutput { stdout: Vec::new() }
		}
	}
}

#[cfg(test)]
mod tests {
	use async_std::task;

	use super::*;

	fn config() -> Config {
		Config::parse("GopherRoot = /srv/gopher\nGopherHostname = example.org\n").unwrap()
	}

	#[test]
	fn launch_failure_yields_empty_output() {
		task::block_on(async {
			let out = run(
				Path::new("/no/such/executable-at-all"),
				None,
				&ServerSideParams::default(),
				&config(),
				"0.1.0",
				"/cgi/x",
				"203.0.113.1",
			)
			.await;
			assert!(out.stdout.is_empty());
		});
	}

	#[test]
	fn successful_script_output_is_captured() {
		task::block_on(async {
			let out = run(
				Path::new("/bin/echo"),
				None,
				&ServerSideParams::default(),
				&config(),
				"0.1.0",
				"/cgi/x",
				"203.0.113.1",
			)
			.await;
			assert_eq!(out.stdout, b"\n");
		});
	}
}
