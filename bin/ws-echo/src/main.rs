// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Echo server with a broadcast command.
//!
//! Every message is sent back to its sender, except text starting with
//! `/all `, whose remainder goes to every connected client.
//!
//! ```text
//! RUST_LOG=debug ws-echo 127.0.0.1:8091
//! ```

use std::{env, error::Error, time::Duration};

use reifydb_ws_server::{Client, Handler, HandlerResult, Message, Server, ServerConfig, ServerHandle};
use tracing::info;
use tracing_subscriber::EnvFilter;

const BIND_VAR: &str = "REIFYDB_WS_BIND";
const IDLE_TIMEOUT_VAR: &str = "REIFYDB_WS_IDLE_TIMEOUT_SECS";
const PING_INTERVAL_VAR: &str = "REIFYDB_WS_PING_INTERVAL_SECS";

struct Echo;

impl Handler for Echo {
	fn on_connect(&mut self, client: &mut Client, _server: &ServerHandle) -> HandlerResult {
		info!(client = %client.id(), uri = client.uri(), "joined");
		Ok(())
	}

	fn on_message(&mut self, client: &mut Client, message: Message, server: &ServerHandle) -> HandlerResult {
		if let Some(text) = message.as_text().and_then(|text| text.strip_prefix("/all ")) {
			server.broadcast(text)?;
			return Ok(());
		}
		client.send(message)?;
		Ok(())
	}

	fn on_disconnect(&mut self, client: &Client, _server: &ServerHandle) {
		let code = client.peer_close().map(|close| close.code.as_u16());
		info!(client = %client.id(), code = ?code, "left");
	}
}

/// Seconds from the environment; `0` turns the timer off.
fn seconds(var: &str) -> Result<Option<Option<Duration>>, Box<dyn Error>> {
	match env::var(var) {
		Ok(value) => {
			let secs: u64 = value.trim().parse().map_err(|e| format!("{}={:?}: {}", var, value, e))?;
			Ok(Some((secs > 0).then(|| Duration::from_secs(secs))))
		}
		Err(env::VarError::NotPresent) => Ok(None),
		Err(e) => Err(format!("{}: {}", var, e).into()),
	}
}

fn config() -> Result<ServerConfig, Box<dyn Error>> {
	let mut config = ServerConfig::default();

	if let Some(addr) = env::args().nth(1).or_else(|| env::var(BIND_VAR).ok()) {
		config = config.bind_addr(addr);
	}
	if let Some(timeout) = seconds(IDLE_TIMEOUT_VAR)? {
		config = config.idle_timeout(timeout);
	}
	if let Some(interval) = seconds(PING_INTERVAL_VAR)? {
		config = config.ping_interval(interval);
	}

	Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let mut server = Server::bind(config()?, Echo)?;
	info!("echo server ready on ws://{}", server.local_addr());
	server.run()?;
	Ok(())
}
