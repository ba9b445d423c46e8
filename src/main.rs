//! `motsognir` — a Gopher (RFC 1436) server for POSIX hosts.
//!
//! Startup order mirrors the reference server exactly (§4.1): parse
//! `--config`, load the configuration, bind the listening socket(s),
//! daemonise (fork, detach, optionally chroot), drop privileges, then
//! accept connections forever.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use log::error;
use motsognir::{config, daemon, listener};

/// Compiled-in default configuration path, used when `--config` is absent.
/// The reference allows overriding this at compile time; here it's simply a
/// constant, since this build has no separate packaging story per platform.
const DEFAULT_CONFIG_PATH: &str = "/etc/motsognir.conf";

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
	env_logger::init_from_env("MOTSOGNIR_LOG");

	if std::env::var_os("MOTSOGNIR_LOG").is_none() {
		eprintln!("Logging is not configured, and only errors will be logged by default");
		eprintln!("Configure logging using the `MOTSOGNIR_LOG` environment variable");
	}

	let config_path = match parse_args() {
		Ok(path) => path,
		Err(code) => return code,
	};

	let config = match config::Config::load(&config_path) {
		Ok(config) => config,
		Err(e) => {
			println!("ERROR: A configuration error has been detected. Check the logs for details.");
			error!("configuration error: {e:#}");
			return exit_code(9);
		}
	};

	// Bind before daemonising, so a bad `Bind`/`GopherPort` is reported to
	// the foreground process instead of being swallowed after detaching.
	let bound = match listener::bind(&config) {
		Ok(bound) => bound,
		Err(e) => {
			error!("fatal: {e:#}");
			return exit_code(2);
		}
	};

	if let Err(e) = daemon::install_signal_dispositions() {
		error!("fatal: {e:#}");
		return exit_code(2);
	}

	if let Err(e) = daemon::daemonize(&config) {
		error!("fatal: failed to daemonise: {e:#}");
		return exit_code(2);
	}

	if let Err(e) = daemon::drop_privileges(&config) {
		error!("fatal: failed to drop privileges: {e:#}");
		return exit_code(2);
	}

	let config = Arc::new(config);
	let version = Arc::new(VERSION.to_string());

	match async_std::task::block_on(listener::serve(bound, config, version)) {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("fatal: {e:#}");
			exit_code(2)
		}
	}
}

fn exit_code(code: u8) -> ExitCode {
	ExitCode::from(code)
}

/// Parse CLI arguments per §6: only `--config <path>` is recognised; any
/// other argument (or a malformed `--config`) prints the About screen and
/// exits with status 1.
fn parse_args() -> Result<PathBuf, ExitCode> {
	let mut args = pico_args::Arguments::from_env();

	let config_path: Option<PathBuf> = match args.opt_value_from_str("--config") {
		Ok(path) => path,
		Err(_) => {
			print_about();
			return Err(exit_code(1));
		}
	};

	let remaining = args.finish();
	if !remaining.is_empty() {
		print_about();
		return Err(exit_code(1));
	}

	Ok(config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)))
}

fn print_about() {
	println!("motsognir {VERSION} - a Gopher (RFC 1436) server for POSIX hosts");
	println!();
	println!("Usage: motsognir [--config <path>]");
	println!();
	println!(
		"  --config <path>   load the configuration from <path> (default: {DEFAULT_CONFIG_PATH})"
	);
}
