// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::net::{SocketAddr, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{
	config::ServerConfig,
	error::{Error, Result},
};

/// Resolves the configured bind address to the first socket address.
pub(crate) fn resolve(config: &ServerConfig) -> Result<SocketAddr> {
	let addr = config.socket_addr();
	addr.to_socket_addrs()
		.map_err(|_| Error::InvalidAddress(addr.to_string()))?
		.next()
		.ok_or_else(|| Error::InvalidAddress(addr.to_string()))
}

/// Non-blocking listening socket with address reuse enabled.
pub(crate) fn create_listener(addr: SocketAddr, config: &ServerConfig) -> Result<std::net::TcpListener> {
	let bind = |addr: SocketAddr| -> std::io::Result<std::net::TcpListener> {
		let domain = match addr {
			SocketAddr::V4(_) => Domain::IPV4,
			SocketAddr::V6(_) => Domain::IPV6,
		};

		let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
		socket.set_reuse_address(true)?;
		socket.set_nonblocking(true)?;
		socket.set_tcp_nodelay(config.nodelay)?;
		socket.bind(&addr.into())?;
		socket.listen(config.backlog)?;

		Ok(socket.into())
	};

	bind(addr).map_err(|source| Error::Bind {
		addr: addr.to_string(),
		source,
	})
}
