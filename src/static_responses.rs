//! Fixed response bodies that don't depend on the filesystem: the HTTP
//! fallback page, the gopher+ compatibility stub, the foreign-URL redirect
//! page, and the CAPS document. Every string here is reproduced verbatim
//! from the reference server, byte for byte, since real clients (and the
//! UMN gopher+ client in particular) are known to depend on this exact
//! wording.

use crate::config::Config;

/// The full HTTP/1.1 response sent when a client speaks HTTP to the Gopher
/// port, including headers. `config.http_err_file`, if set, replaces only
/// the body.
pub fn http_error_response(config: &Config) -> String {
	let mut out = String::new();
	out.push_str("HTTP/1.1 400 Bad request\r\n");
	out.push_str("Content-Type: text/html; charset=UTF-8\r\n");
	out.push_str("Server: Motsognir\r\n");
	out.push_str("Connection: close\r\n");
	out.push_str("\r\n");

	match &config.http_err_file {
		Some(body) => out.push_str(body),
		None => {
			let portstr = if config.gopher_port == 70 {
				String::new()
			} else {
				format!(":{}", config.gopher_port)
			};
			let hostname = config.gopher_hostname.as_deref().unwrap_or("");

			out.push_str("<!DOCTYPE html>\r\n");
			out.push_str("<html>\r\n");
			out.push_str("  <head>\r\n");
			out.push_str("    <title>Error 400 - Bad request</title>\r\n");
			out.push_str("    <style>\r\n");
			out.push_str("      body { font-family: sans-serif; font-size: 1.1em; margin: 1em; }\r\n");
			out.push_str("      h1 { color: red; text-align: center; }\r\n");
			out.push_str("    </style>\r\n");
			out.push_str("  </head>\r\n");
			out.push_str("  <body>\r\n");
			out.push_str("    <h1>Error 400 - BAD REQUEST</h1>\r\n");
			out.push_str(
				"    <p>Your request is not admissible. Sorry. This is a gopher server, which \
				 means that you have to use the gopher protocol to access it. Right now, you \
				 used the HTTP protocol instead.</p>\r\n",
			);
			out.push_str("    <p style='text-align: center'>\r\n");
			out.push_str(&format!(
				"      <a href='gopher://{hostname}{portstr}/' style='font-size: 1.15em;'>Click \
				 here to access this server using the gopher protocol.</a>\r\n"
			));
			out.push_str("    </p>\r\n");
			out.push_str("  </body>\r\n");
			out.push_str("</html>\r\n");
		}
	}

	out
}

/// The fake gopher+ root-resource response the UMN gopher+ client needs to
/// see instead of an error, when it probes with `\t$`.
pub fn gopher_plus_stub(config: &Config) -> String {
	let hostname = config.gopher_hostname.as_deref().unwrap_or("");
	let mut out = String::new();
	out.push_str("+-1\r\n");
	out.push_str(&format!(
		"+INFO: 1Main menu (non-gopher+)\t\t{hostname}\t{}\r\n",
		config.gopher_port
	));
	out.push_str("+VIEWS:\r\n");
	out.push_str(" application/gopher+-menu: <512b>\r\n");
	out.push_str("+ABSTRACT:\r\n");
	out.push_str(" This gopher supports standard gopher access only.\r\n");
	out.push_str(".\r\n");
	out
}

/// A meta-refresh redirect page for a `URL:<target>` selector, pointed at
/// `target` (the raw text following `URL:`, unescaped).
pub fn url_redirect_page(target: &str) -> String {
	let mut out = String::new();
	out.push_str("<!DOCTYPE html>\r\n");
	out.push_str("<html>\r\n");
	out.push_str("  <head>\r\n");
	out.push_str("    <title>Non-gopher link detected</title>\r\n");
	out.push_str(&format!(
		"    <meta http-equiv=\"refresh\" content=\"10;url={target}\">\r\n"
	));
	out.push_str("  </head>\r\n");
	out.push_str(
		"  <body style=\"margin: 1em 2em 1em 2em; background-color: #D0E0FF; color: \
		 #101010;\">\r\n",
	);
	out.push_str(
		"    <table style=\"margin-left: auto; margin-right: auto; width: 70%; border: 1px \
		 solid black; padding: 1.5em 1.1em 1.5em 1.1em; background-color: #E0F0FF;\">\r\n",
	);
	out.push_str("      <tr>\r\n");
	out.push_str("        <td>\r\n");
	out.push_str(
		"          <p style=\"text-align: center; font-size: 1.3em; margin: 0 0 2em 0;\">A \
		 non-gopher link has been detected.</p>\r\n",
	);
	out.push_str(
		"          <p style=\"text-align: justify; margin: 0 0 0 0;\">It appears that you \
		 clicked on a non-gopher link, which will make you use another protocol from now on \
		 (typically HTTP). Your gopher journey ends here.</p>\r\n",
	);
	out.push_str(
		"          <p style=\"text-align: center; margin: 0.8em 0 0 0;\">Click on the link \
		 below to continue (or wait 10 seconds):</p>\r\n",
	);
	out.push_str(&format!(
		"          <p style=\"text-align: center; font-size: 1.1em; margin: 0.8em 0 0 \
		 0;\"><a href=\"{target}\" style=\"color: #0000F0;\">{target}</a></p>\r\n"
	));
	out.push_str("        </td>\r\n");
	out.push_str("      </tr>\r\n");
	out.push_str("    </table>\r\n");
	out.push_str("  </body>\r\n");
	out.push_str("</html>\r\n");
	out
}

/// The `CAPS` document gopher+-aware clients fetch to learn server
/// capabilities. Key order matches the reference exactly, since at least one
/// real client parses this positionally rather than as free-form key/value
/// pairs.
pub fn caps_document(config: &Config, version: &str) -> String {
	let mut out = String::new();
	out.push_str("CAPS\r\n");
	out.push_str("CapsVersion=1\r\n");
	out.push_str("ExpireCapsAfter=3600\r\n");
	out.push_str("PathDelimiter=/\r\n");
	out.push_str("PathIdentity=.\r\n");
	out.push_str("PathParent=..\r\n");
	out.push_str("PathParentDouble=FALSE\r\n");
	out.push_str("PathKeepPreDelimeter=FALSE\r\n");
	out.push_str("ServerSoftware=Motsognir\r\n");
	out.push_str(&format!("ServerSoftwareVersion={version}\r\n"));

	if let Some(arch) = &config.caps_server_architecture {
		out.push_str(&format!("ServerArchitecture={arch}\r\n"));
	}
	if let Some(desc) = &config.caps_server_description {
		out.push_str(&format!("ServerDescription={desc}\r\n"));
	}
	if let Some(geo) = &config.caps_server_geolocation_string {
		out.push_str(&format!("ServerGeolocationString={geo}\r\n"));
	}
	if let Some(enc) = &config.caps_server_default_encoding {
		out.push_str(&format!("ServerDefaultEncoding={enc}\r\n"));
	}

	out.push_str(".\r\n");
	out
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;

	use super::*;

	fn base_config() -> Config {
		Config::parse("GopherRoot = /srv/gopher\nGopherHostname = example.org\n").unwrap()
	}

	#[test]
	fn http_error_omits_port_suffix_on_default_port() {
		let body = http_error_response(&base_config());
		assert!(body.contains("gopher://example.org/"));
		assert!(body.starts_with("HTTP/1.1 400 Bad request\r\n"));
	}

	#[test]
	fn http_error_includes_port_suffix_on_nondefault_port() {
		let cfg =
			Config::parse("GopherRoot = /srv/gopher\nGopherHostname = example.org\nGopherPort = 7070\n")
				.unwrap();
		let body = http_error_response(&cfg);
		assert!(body.contains("gopher://example.org:7070/"));
	}

	#[test]
	fn custom_http_err_file_replaces_only_body() {
		let mut cfg = base_config();
		cfg.http_err_file = Some("custom body\r\n".to_string());
		let body = http_error_response(&cfg);
		assert!(body.contains("Content-Type: text/html"));
		assert!(body.contains("custom body"));
		assert!(!body.contains("<h1>Error 400"));
	}

	#[test]
	fn gopher_plus_stub_ends_with_terminator() {
		let stub = gopher_plus_stub(&base_config());
		assert!(stub.starts_with("+-1\r\n"));
		assert!(stub.ends_with(".\r\n"));
	}

	#[test]
	fn url_redirect_page_embeds_target_twice() {
		let page = url_redirect_page("https://example.com/x");
		assert_eq!(page.matches("https://example.com/x").count(), 3);
	}

	#[test]
	fn caps_document_key_order() {
		let mut cfg = base_config();
		cfg.caps_server_description = Some("A test gopher".to_string());
		let doc = caps_document(&cfg, "0.1.0");

		let version_pos = doc.find("ServerSoftwareVersion=").unwrap();
		let desc_pos = doc.find("ServerDescription=").unwrap();
		assert!(version_pos < desc_pos);
		assert!(doc.ends_with(".\r\n"));
		assert!(PathBuf::from(&cfg.gopher_root).is_absolute());
	}
}
