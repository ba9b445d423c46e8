//! ResponseRouter: the per-connection dispatcher tying every other module
//! together — plugin interception, special-request detection, path
//! resolution, and the directory/gophermap/CGI/file decision tree. Mirrors
//! the body of the reference server's `main()` connection-handling branch.

use std::{os::unix::fs::PermissionsExt, path::Path, sync::Arc, time::Duration};

use async_std::io::{self, prelude::*};
use log::info;
use regex::Regex;

use crate::{
	cgi::{self, ServerSideParams},
	config::Config,
	dirlister,
	errors::GopherError,
	gophermap,
	menu::{item_type, MenuLine, END_OF_MENU},
	pathresolver::{self, Resolved},
	selector::{self, SelectorOutcome},
	static_responses,
	utils::FmtMaybeUtf8,
};

/// Budget for draining any bytes the client sent after we've already
/// decided to close — long enough to catch a client that sent its whole
/// request in one write, short enough not to hang a connection that's
/// gone quiet. The reference does this with a blocking read right before
/// `close()`, purely to avoid an RST on some TCP stacks.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Handle one accepted connection end to end: read a selector, route it,
/// write the response, and return. Never propagates an error past logging
/// it — a broken connection just ends the task.
pub async fn handle_connection(
	stream: &mut (impl Read + Write + Unpin),
	remote_addr: &str,
	config: &Arc<Config>,
	version: &str,
) {
	let raw = match selector::read_selector_line(stream).await {
		Ok(raw) => raw,
		Err(e) => {
			info!("[{remote_addr}] error while receiving the selector: {e}");
			return;
		}
	};
	let raw = if raw.is_empty() { b"/".to_vec() } else { raw };

	info!("[{remote_addr}] query='{}'", FmtMaybeUtf8(&raw));

	if plugin_matches(&raw, config) {
		let output = cgi::run(
			config.plugin.as_deref().unwrap(),
			plugin_launcher(config),
			&ServerSideParams { url_query: Some(raw.clone()), search_query: None },
			config,
			version,
			"",
			remote_addr,
		)
		.await;

		if !output.stdout.is_empty() {
			info!("[{remote_addr}] query handled by plugin");
			let _ = stream.write_all(&output.stdout).await;
			let _ = drain(stream).await;
			return;
		}
	}

	let outcome = match selector::classify(&raw, config.sec_url_delim) {
		Ok(outcome) => outcome,
		Err(e) => {
			info!("[{remote_addr}] security check rejected the request: {e}");
			return;
		}
	};

	let body = match outcome {
		SelectorOutcome::Http => {
			info!("[{remote_addr}] HTTP request detected - returning an HTTP error page");
			let body = static_responses::http_error_response(config);
			let _ = stream.write_all(body.as_bytes()).await;
			let _ = drain(stream).await;
			return;
		}
		SelectorOutcome::GopherPlus => {
			info!("[{remote_addr}] gopher+ probe detected - returning the compatibility stub");
			let body = static_responses::gopher_plus_stub(config);
			let _ = stream.write_all(body.as_bytes()).await;
			let _ = drain(stream).await;
			return;
		}
		SelectorOutcome::UrlRedirect(target) => {
			info!("[{remote_addr}] foreign URL redirection requested: '{target}'");
			let body = static_responses::url_redirect_page(&target);
			let _ = stream.write_all(body.as_bytes()).await;
			return;
		}
		SelectorOutcome::Request(req) => {
			serve_request(req, config, version, remote_addr).await
		}
	};

	let _ = stream.write_all(&body).await;
}

fn plugin_launcher(config: &Config) -> Option<&'static str> {
	let plugin = config.plugin.as_ref()?;
	if config.php_support && plugin.extension().and_then(|e| e.to_str()) == Some("php") {
		Some("php")
	} else {
		None
	}
}

fn plugin_matches(raw: &[u8], config: &Config) -> bool {
	let Some(_plugin) = &config.plugin else { return false };

	match &config.plugin_filter {
		Some(re) => regex_matches(re, raw),
		None => true,
	}
}

fn regex_matches(re: &Regex, raw: &[u8]) -> bool {
	re.is_match(&String::from_utf8_lossy(raw))
}

/// Best-effort drain of whatever the client already sent after we've
/// decided to close, so the TCP stack sees an orderly shutdown rather than
/// a reset. Never reports an error — the connection is going away either
/// way.
async fn drain(stream: &mut (impl Read + Unpin)) -> io::Result<()> {
	let mut buf = [0u8; 4096];
	let _ = io::timeout(DRAIN_TIMEOUT, async {
		loop {
			if stream.read(&mut buf).await? == 0 {
				break;
			}
		}
		Ok(())
	})
	.await;
	Ok(())
}

async fn serve_request(
	req: selector::ParsedRequest,
	config: &Config,
	version: &str,
	remote_addr: &str,
) -> Vec<u8> {
	let resolved = pathresolver::resolve(&req.path, config);

	if let Err(e) = pathresolver::check_containment(&resolved, config) {
		info!("[{remote_addr}] {e}");
		return error_response(&e);
	}

	// `/caps.txt` is answered positionally, the way the reference checks it
	// on the "not a directory" branch right after resolving the local path —
	// it never depends on a real file existing at that selector.
	if req.path == "/caps.txt" && config.caps_support {
		info!("[{remote_addr}] returned caps.txt data");
		return static_responses::caps_document(config, version).into_bytes();
	}

	let params = ServerSideParams {
		url_query: req.url_query.clone(),
		search_query: req.search_query.clone(),
	};

	if resolved.local_file.is_dir() {
		return serve_directory(&resolved, &req.path, config, version, remote_addr, &params).await;
	}

	serve_file(&resolved.local_file, &req.path, config, version, remote_addr, &params).await
}

async fn serve_directory(
	resolved: &Resolved,
	request_path: &str,
	config: &Config,
	version: &str,
	remote_addr: &str,
	params: &ServerSideParams,
) -> Vec<u8> {
	let mut selector_prefix = request_path.to_string();
	if !selector_prefix.ends_with('/') {
		selector_prefix.push('/');
	}
	let local_dir = &resolved.local_file;
	let mut body = Vec::new();

	let static_gophermap = local_dir.join("gophermap");
	let cgi_gophermap = local_dir.join("gophermap.cgi");
	let php_gophermap = local_dir.join("gophermap.php");

	if static_gophermap.is_file() {
		match std::fs::read_to_string(&static_gophermap) {
			Ok(content) => {
				let lines =
					gophermap::render(&content, local_dir, &selector_prefix, config, version, remote_addr)
						.await;
				append_lines(&mut body, &lines);
			}
			Err(e) => info!("[{remote_addr}] failed to open gophermap '{}': {e}", static_gophermap.display()),
		}
	} else if config.cgi_support && cgi_gophermap.is_file() {
		let output = cgi::run(
			&cgi_gophermap,
			None,
			params,
			config,
			version,
			request_path,
			remote_addr,
		)
		.await;
		append_dynamic_gophermap(&mut body, &output.stdout, &selector_prefix, config);
	} else if config.php_support && php_gophermap.is_file() {
		let output = cgi::run(
			&php_gophermap,
			Some("php"),
			params,
			config,
			version,
			request_path,
			remote_addr,
		)
		.await;
		append_dynamic_gophermap(&mut body, &output.stdout, &selector_prefix, config);
	} else if let Some(default_map) = &config.default_gophermap {
		match std::fs::read_to_string(default_map) {
			Ok(content) => {
				let lines =
					gophermap::render(&content, local_dir, &selector_prefix, config, version, remote_addr)
						.await;
				append_lines(&mut body, &lines);
			}
			Err(e) => info!("[{remote_addr}] failed to open default gophermap '{}': {e}", default_map.display()),
		}
	} else {
		match dirlister::list(local_dir, &selector_prefix, config, false) {
			Ok(lines) => append_lines(&mut body, &lines),
			Err(e) => info!("[{remote_addr}] {e}"),
		}
	}

	body.extend_from_slice(END_OF_MENU);
	body
}

fn append_lines(body: &mut Vec<u8>, lines: &[MenuLine]) {
	for line in lines {
		body.extend_from_slice(&line.to_wire());
	}
}

/// Parse a CGI-generated gophermap's stdout line by line the same way a
/// static gophermap file is parsed, stopping at the first unparseable line
/// (matching the reference, which aborts the loop on a bad line rather than
/// emitting a parse-error line for CGI output).
fn append_dynamic_gophermap(body: &mut Vec<u8>, stdout: &[u8], selector_prefix: &str, config: &Config) {
	let curdir = selector_prefix.trim_end_matches('/');
	for raw_line in String::from_utf8_lossy(stdout).lines() {
		if raw_line.starts_with('#') {
			continue;
		}
		match gophermap::parse_line(raw_line) {
			Ok(field) => body.extend_from_slice(&gophermap::build_line(&field, curdir, config).to_wire()),
			Err(()) => break,
		}
	}
}

async fn serve_file(
	local_file: &Path,
	request_path: &str,
	config: &Config,
	version: &str,
	remote_addr: &str,
	params: &ServerSideParams,
) -> Vec<u8> {
	if !local_file.is_file() || pathresolver::is_gophermap_name(local_file) {
		info!("[{remote_addr}] requested resource does not exist");
		return not_found_response();
	}

	if config.paranoid_mode {
		match std::fs::metadata(local_file) {
			Ok(meta) => {
				if meta.permissions().mode() & 0o004 == 0 {
					info!("[{remote_addr}] paranoid mode: '{}' is not world-readable", local_file.display());
					return permission_denied_response();
				}
			}
			Err(_) => return error_response(&GopherError::Io(std::io::Error::other("stat failed"))),
		}
	}

	let extension = local_file.extension().and_then(|e| e.to_str());

	if extension == Some("cgi") && config.cgi_support {
		let output = cgi::run(local_file, None, params, config, version, request_path, remote_addr).await;
		return output.stdout;
	}

	if extension == Some("php") && config.php_support {
		let output =
			cgi::run(local_file, Some("php"), params, config, version, request_path, remote_addr).await;
		return output.stdout;
	}

	info!("[{remote_addr}] returning file '{}'", local_file.display());
	let gopher_type = config.ext_map.lookup(&local_file.to_string_lossy());

	let mut body = Vec::new();
	let result = match gopher_type {
		item_type::TEXT_FILE | item_type::CCSO_NAMESERVER | item_type::UUENCODED => {
			crate::filesender::send_text(local_file, &mut body).await
		}
		_ => crate::filesender::send_binary(local_file, &mut body).await,
	};

	if let Err(e) = result {
		info!("[{remote_addr}] {e}");
		return error_response(&e);
	}

	body
}

fn error_response(err: &GopherError) -> Vec<u8> {
	let mut body = err.as_menu_line().to_wire();
	body.extend_from_slice(END_OF_MENU);
	body
}

fn not_found_response() -> Vec<u8> {
	let mut body = MenuLine::error("The selected resource doesn't exist!").to_wire();
	body.extend_from_slice(&MenuLine::info("The selected resource cannot be located.").to_wire());
	body.extend_from_slice(END_OF_MENU);
	body
}

/// Paranoid mode's denial for a file that exists but isn't world-readable:
/// a `3`/`i` "Permission denied" pair, distinct from both the generic
/// `Forbidden!` evasion reply and the `not_found_response` wording.
fn permission_denied_response() -> Vec<u8> {
	let mut body = MenuLine::error("Permission denied").to_wire();
	body.extend_from_slice(&MenuLine::info("Permission denied").to_wire());
	body.extend_from_slice(END_OF_MENU);
	body
}

#[cfg(test)]
mod tests {
	use async_std::task;

	use super::*;

	fn config(root: &Path, extra: &str) -> Config {
		Config::parse(&format!(
			"GopherRoot = {}\nGopherHostname = example.org\n{extra}",
			root.display()
		))
		.unwrap()
	}

	#[test]
	fn plugin_matches_respects_filter() {
		let dir = tempfile::tempdir().unwrap();
		let cfg = config(
			dir.path(),
			"Plugin = /bin/true\nPluginFilter = ^/api/\n",
		);
		assert!(plugin_matches(b"/api/x", &cfg));
		assert!(!plugin_matches(b"/other", &cfg));
	}

	#[test]
	fn plugin_with_no_filter_always_matches() {
		let dir = tempfile::tempdir().unwrap();
		let cfg = config(dir.path(), "Plugin = /bin/true\n");
		assert!(plugin_matches(b"/anything", &cfg));
	}

	#[test]
	fn no_plugin_never_matches() {
		let dir = tempfile::tempdir().unwrap();
		let cfg = config(dir.path(), "");
		assert!(!plugin_matches(b"/anything", &cfg));
	}

	#[test]
	fn missing_file_returns_not_found_menu() {
		task::block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let cfg = config(dir.path(), "");
			let body = serve_file(
				&dir.path().join("nope.txt"),
				"/nope.txt",
				&cfg,
				"0.1.0",
				"203.0.113.1",
				&ServerSideParams::default(),
			)
			.await;
			let text = String::from_utf8_lossy(&body);
			assert!(text.starts_with("3The selected resource doesn't exist!"));
		});
	}

	#[test]
	fn paranoid_mode_denies_non_world_readable_file() {
		task::block_on(async {
			let dir = tempfile::tempdir().unwrap();
			let path = dir.path().join("secret.txt");
			std::fs::write(&path, "shh").unwrap();
			std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
			let cfg = config(dir.path(), "ParanoidMode = 1\n");
			let body = serve_file(
				&path,
				"/secret.txt",
				&cfg,
				"0.1.0",
				"203.0.113.1",
				&ServerSideParams::default(),
			)
			.await;
			assert_eq!(
				String::from_utf8(body).unwrap(),
				"3Permission denied\tfake\tfake\t0\r\niPermission denied\tfake\tfake\t0\r\n.\r\n"
			);
		});
	}

	#[test]
	fn text_file_is_served_with_terminator() {
		task::block_on(async {
			let dir = tempfile::tempdir().unwrap();
			std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
			let cfg = config(dir.path(), "");
			let body = serve_file(
				&dir.path().join("a.txt"),
				"/a.txt",
				&cfg,
				"0.1.0",
				"203.0.113.1",
				&ServerSideParams::default(),
			)
			.await;
			assert_eq!(String::from_utf8(body).unwrap(), "hello\r\n.\r\n");
		});
	}

	#[test]
	fn directory_without_gophermap_lists_contents() {
		task::block_on(async {
			let dir = tempfile::tempdir().unwrap();
			std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
			let cfg = config(dir.path(), "");
			let resolved = Resolved {
				local_file: dir.path().to_path_buf(),
				effective_root: dir.path().to_path_buf(),
			};
			let body = serve_directory(
				&resolved,
				"/",
				&cfg,
				"0.1.0",
				"203.0.113.1",
				&ServerSideParams::default(),
			)
			.await;
			let text = String::from_utf8_lossy(&body);
			assert!(text.contains("a.txt"));
			assert!(text.ends_with(".\r\n"));
		});
	}

	#[test]
	fn static_gophermap_takes_priority_over_listing() {
		task::block_on(async {
			let dir = tempfile::tempdir().unwrap();
			std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
			std::fs::write(dir.path().join("gophermap"), "iHello from gophermap\n").unwrap();
			let cfg = config(dir.path(), "");
			let resolved = Resolved {
				local_file: dir.path().to_path_buf(),
				effective_root: dir.path().to_path_buf(),
			};
			let body = serve_directory(
				&resolved,
				"/",
				&cfg,
				"0.1.0",
				"203.0.113.1",
				&ServerSideParams::default(),
			)
			.await;
			let text = String::from_utf8_lossy(&body);
			assert!(text.contains("Hello from gophermap"));
			assert!(!text.contains("a.txt"));
		});
	}
}
