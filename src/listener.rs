//! Listener: bind the configured TCP port — dual-stack by default, per
//! §4.1 — and run the accept loop, handing each connection to
//! [`crate::router::handle_connection`] on its own task.
//!
//! Binding happens synchronously, before [`crate::daemon::daemonize`] forks,
//! so a bad `Bind`/`GopherPort` value is reported to the foreground process
//! rather than swallowed after the daemon detaches; the bound sockets are
//! simply inherited by the forked child. Rather than one dual-stack
//! `AF_INET6` socket with `IPV6_V6ONLY` cleared, this binds two separate
//! sockets, so an IPv4 literal `Bind` address binds cleanly instead of being
//! misparsed as IPv6.

use std::{
	net::{
		IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6,
		TcpListener as StdTcpListener,
	},
	sync::Arc,
};

use anyhow::{bail, Context, Result};
use async_std::{net::TcpListener, task};
use log::{info, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::{config::Config, router, utils::strip_ipv4_mapped_prefix};

/// Per §4.1: "the listen backlog is 10".
const TCP_BACKLOG: i32 = 10;

/// The listening sockets selected for this configuration, bound and put in
/// listening state, but not yet handed to the async runtime.
pub struct BoundListeners {
	v4: Option<StdTcpListener>,
	v6: Option<StdTcpListener>,
}

/// Bind whichever of the IPv4/IPv6 listeners `config` calls for. At least
/// one of `v4`/`v6` is always `Some` on success.
pub fn bind(config: &Config) -> Result<BoundListeners> {
	let bind_addr = match &config.bind {
		Some(s) => Some(
			s.parse::<IpAddr>()
				.with_context(|| format!("invalid 'Bind' address '{s}'"))?,
		),
		None => None,
	};

	let want_v4 = !matches!(bind_addr, Some(IpAddr::V6(_)));
	let want_v6 = !config.disable_ipv6 && !matches!(bind_addr, Some(IpAddr::V4(_)));

	if config.disable_ipv6 && matches!(bind_addr, Some(IpAddr::V6(_))) {
		bail!("'Bind' is an IPv6 literal but 'DisableIPv6' is set");
	}

	let v4 = if want_v4 {
		let addr = match bind_addr {
			Some(IpAddr::V4(addr)) => addr,
			_ => Ipv4Addr::UNSPECIFIED,
		};
		Some(
			bind_one(
				Domain::IPV4,
				SocketAddr::V4(SocketAddrV4::new(addr, config.gopher_port)),
				false,
			)
			.context("failed to bind the IPv4 listener")?,
		)
	} else {
		None
	};

	let v6 = if want_v6 {
		let addr = match bind_addr {
			Some(IpAddr::V6(addr)) => addr,
			_ => Ipv6Addr::UNSPECIFIED,
		};
		Some(
			bind_one(
				Domain::IPV6,
				SocketAddr::V6(SocketAddrV6::new(addr, config.gopher_port, 0, 0)),
				true,
			)
			.context("failed to bind the IPv6 listener")?,
		)
	} else {
		None
	};

	if v4.is_none() && v6.is_none() {
		bail!("no listener could be bound (check 'Bind' and 'DisableIPv6')");
	}

	Ok(BoundListeners { v4, v6 })
}

fn bind_one(domain: Domain, addr: SocketAddr, v6_only: bool) -> Result<StdTcpListener> {
	let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
	socket.set_reuse_address(true)?;
	socket.set_nodelay(true)?;
	socket.set_nonblocking(true)?;
	if v6_only {
		socket.set_only_v6(true)?;
	}
	socket.bind(&SockAddr::from(addr))?;
	socket.listen(TCP_BACKLOG)?;
	Ok(StdTcpListener::from(socket))
}

/// Run the accept loop(s) forever. Each accepted connection is handed to
/// [`crate::router::handle_connection`] on its own task (a task-per-connection
/// stand-in for the reference's fork-per-connection); an `accept()` failure on
/// either listener is fatal, matching §4.1.
pub async fn serve(bound: BoundListeners, config: Arc<Config>, version: Arc<String>) -> Result<()> {
	let mut loops = Vec::new();

	if let Some(v4) = bound.v4 {
		let listener = TcpListener::from(v4);
		loops.push(task::spawn(accept_loop(listener, config.clone(), version.clone())));
	}
	if let Some(v6) = bound.v6 {
		let listener = TcpListener::from(v6);
		loops.push(task::spawn(accept_loop(listener, config, version)));
	}

	for handle in loops {
		handle.await?;
	}

	Ok(())
}

async fn accept_loop(listener: TcpListener, config: Arc<Config>, version: Arc<String>) -> Result<()> {
	let local_addr = listener.local_addr().ok();
	info!(
		"listening on {}",
		local_addr
			.map(|a| a.to_string())
			.unwrap_or_else(|| "unknown address".to_string())
	);

	loop {
		let (stream, peer_addr) = listener.accept().await.context("accept() failed")?;

		let config = config.clone();
		let version = version.clone();
		task::spawn(async move {
			handle_one(stream, peer_addr, local_addr, config, version).await;
		});
	}
}

/// Per-connection bookkeeping that the reference does right after its
/// per-connection `fork()`: resolve peer/local addresses, strip the
/// `::ffff:` IPv4-mapped prefix, substitute the local address for
/// `gopher_hostname` when it was never configured, and install a
/// per-connection log prefix (here, just tagging every log line inline,
/// standing in for the reference's per-PID `openlog()` prefix).
async fn handle_one(
	mut stream: async_std::net::TcpStream,
	peer_addr: SocketAddr,
	local_addr: Option<SocketAddr>,
	config: Arc<Config>,
	version: Arc<String>,
) {
	let peer_ip = peer_addr.ip().to_string();
	let peer_ip = strip_ipv4_mapped_prefix(&peer_ip).to_string();

	let local_ip = local_addr.map(|a| {
		let s = a.ip().to_string();
		strip_ipv4_mapped_prefix(&s).to_string()
	});

	info!(
		"[{peer_ip}] new connection to {}",
		local_ip.as_deref().unwrap_or("unknown")
	);

	let config = if config.gopher_hostname.is_none() {
		let mut substituted = (*config).clone();
		substituted.gopher_hostname = match &local_ip {
			Some(addr) => Some(addr.clone()),
			None => {
				warn!("[{peer_ip}] failed to determine the local address; using the peer's instead");
				Some(peer_ip.clone())
			}
		};
		Arc::new(substituted)
	} else {
		config
	};

	router::handle_connection(&mut stream, &peer_ip, &config, &version).await;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(extra: &str) -> Config {
		Config::parse(&format!(
			"GopherRoot = /srv/gopher\nGopherPort = 18733\nBind = 127.0.0.1\nDisableIPv6 = 1\n{extra}"
		))
		.unwrap()
	}

	#[test]
	fn binds_an_ipv4_only_listener_when_ipv6_is_disabled() {
		let cfg = config("");
		let bound = bind(&cfg).unwrap();
		assert!(bound.v4.is_some());
		assert!(bound.v6.is_none());
	}

	#[test]
	fn rejects_ipv6_bind_address_with_ipv6_disabled() {
		let cfg = Config::parse(
			"GopherRoot = /srv/gopher\nGopherPort = 18734\nBind = ::1\nDisableIPv6 = 1\n",
		)
		.unwrap();
		assert!(bind(&cfg).is_err());
	}

	#[test]
	fn rejects_an_unparseable_bind_address() {
		let cfg =
			Config::parse("GopherRoot = /srv/gopher\nGopherPort = 18735\nBind = not-an-ip\n")
				.unwrap();
		assert!(bind(&cfg).is_err());
	}
}
