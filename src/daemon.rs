//! Daemonisation and privilege drop (§4.1). This runs once, synchronously,
//! after the listening socket(s) have been bound but before the async
//! runtime starts: a forked child only inherits the thread that called
//! `fork()`, so this has to happen before anything spawns a second thread.
//!
//! The per-connection side of §4.1 (accepting, forking in the reference,
//! tasks here) lives in [`crate::listener`].

use std::{env, ffi::CString, fs::OpenOptions, os::fd::AsRawFd};

use anyhow::{bail, Context, Result};
use log::{info, warn};
use nix::{
	sys::{
		signal::{signal, SigHandler, Signal},
		stat::{umask, Mode},
	},
	unistd::{chdir, chroot, dup2, fork, initgroups, setgid, setsid, setuid, ForkResult, Gid, Uid},
};

use crate::config::Config;

/// Environment variables stripped unconditionally at daemon start (§6).
const SCRUBBED_ENV_VARS: &[&str] = &["COLUMNS", "DISPLAY", "INPUTRC", "LINES", "SHLVL", "TERM"];

/// Ignore `SIGCHLD` (nothing reaps the one-time daemonising fork, so this
/// just avoids a stray zombie notification) and `SIGHUP` process-wide, as
/// the reference does right after `listen()`.
pub fn install_signal_dispositions() -> Result<()> {
	unsafe {
		signal(Signal::SIGCHLD, SigHandler::SigIgn).context("failed to ignore SIGCHLD")?;
		signal(Signal::SIGHUP, SigHandler::SigIgn).context("failed to ignore SIGHUP")?;
	}
	Ok(())
}

/// Fork and detach from the controlling terminal, then (if configured)
/// chroot and always scrub the environment. The parent exits immediately
/// (status 0); only the child returns from this function.
pub fn daemonize(config: &Config) -> Result<()> {
	match unsafe { fork() }.context("fork() failed while daemonising")? {
		ForkResult::Parent { .. } => std::process::exit(0),
		ForkResult::Child => {}
	}

	setsid().context("setsid() failed")?;
	umask(Mode::empty());
	redirect_stdio_to_null().context("failed to redirect standard streams to /dev/null")?;

	if let Some(path) = &config.chroot {
		chdir(path)
			.with_context(|| format!("failed to chdir into chroot target '{}'", path.display()))?;
		chroot(path).with_context(|| format!("chroot('{}') failed", path.display()))?;
	}

	chdir("/").context("failed to chdir to /")?;
	scrub_environment();

	Ok(())
}

fn redirect_stdio_to_null() -> Result<()> {
	let read_end = OpenOptions::new().read(true).open("/dev/null")?;
	let write_end = OpenOptions::new().write(true).open("/dev/null")?;

	dup2(read_end.as_raw_fd(), 0).context("failed to redirect stdin")?;
	dup2(write_end.as_raw_fd(), 1).context("failed to redirect stdout")?;
	dup2(write_end.as_raw_fd(), 2).context("failed to redirect stderr")?;

	Ok(())
}

fn scrub_environment() {
	for var in SCRUBBED_ENV_VARS {
		env::remove_var(var);
	}
}

/// Drop from root to `config.run_as_user`, if configured. A no-op if
/// `RunAsUser` isn't set; a logged, non-fatal no-op if it is set but the
/// process wasn't actually started as root (matching the reference, which
/// only refuses the directive rather than aborting the whole server).
pub fn drop_privileges(config: &Config) -> Result<()> {
	let Some(user) = &config.run_as_user else {
		return Ok(());
	};

	if Uid::effective().as_raw() != 0 {
		warn!(
			"a 'RunAsUser' directive is configured, but the process has not been launched under \
			 the root account; the directive is therefore ignored"
		);
		return Ok(());
	}

	let gid = Gid::from_raw(user.gid);
	let uid = Uid::from_raw(user.uid);
	let c_name = CString::new(user.name.as_str()).context("user name contains a NUL byte")?;

	initgroups(&c_name, gid)
		.with_context(|| format!("initgroups() failed for user '{}'", user.name))?;
	setgid(gid).with_context(|| format!("setgid({}) failed", user.gid))?;
	setuid(uid).with_context(|| format!("setuid({}) failed", user.uid))?;

	if Uid::effective() != uid {
		bail!(
			"privilege drop failed: effective uid is still {} after setuid({uid})",
			Uid::effective()
		);
	}

	env::set_var("USER", &user.name);
	env::set_var("USERNAME", &user.name);
	env::remove_var("SUDO_USER");
	env::remove_var("SUDO_UID");
	env::remove_var("SUDO_GID");
	env::remove_var("SUDO_COMMAND");
	env::set_var("HOME", &user.home);

	info!(
		"successfully dropped root privileges; motsognir runs as user '{}' now",
		user.name
	);
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::config::Config;

	use super::*;

	#[test]
	fn drop_privileges_is_a_no_op_without_run_as_user() {
		let cfg = Config::parse("GopherRoot = /srv/gopher\n").unwrap();
		assert!(cfg.run_as_user.is_none());
		assert!(drop_privileges(&cfg).is_ok());
	}

	#[test]
	fn drop_privileges_refuses_politely_when_not_root() {
		// The test process is never actually root, so this exercises the
		// "configured but ignored" branch without touching real credentials.
		if Uid::effective().as_raw() == 0 {
			return;
		}

		// `nobody` doesn't resolve on every test host, in which case
		// `Config::parse` itself fails; nothing to exercise then either.
		let Ok(cfg) = Config::parse("GopherRoot = /srv/gopher\nRunAsUser = nobody\n") else {
			return;
		};

		assert!(drop_privileges(&cfg).is_ok());
		assert_ne!(Uid::effective().as_raw(), 0);
	}
}
