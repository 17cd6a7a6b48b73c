// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::time::Duration;

use reifydb_ws_protocol::constants::READ_CHUNK_SIZE;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
	/// `host:port`, optionally prefixed with `tcp://`. Port 0 binds a free port.
	pub bind_addr: String,
	/// Bytes requested from the socket per read call.
	pub read_chunk_size: usize,
	/// Largest payload accepted in a single frame.
	pub max_payload_size: usize,
	/// Largest reassembled message.
	pub max_message_size: usize,
	/// Outbound messages above this size are split into continuation frames.
	pub max_frame_size: usize,
	/// Pending outbound bytes per client before sends are refused.
	pub max_outbox_bytes: usize,
	pub max_handshake_bytes: usize,
	/// Clients that sent nothing for this long are closed. `None` disables.
	pub idle_timeout: Option<Duration>,
	/// Connections that have not completed the upgrade within this window are
	/// dropped.
	pub handshake_timeout: Duration,
	/// How long a client may stay in the closing state waiting for the peer.
	pub close_timeout: Duration,
	/// Send a keep-alive ping after this much silence. `None` disables.
	pub ping_interval: Option<Duration>,
	/// Upper bound for a single readiness wait; housekeeping runs at least
	/// this often.
	pub tick: Duration,
	pub max_connections: Option<usize>,
	pub validate_utf8: bool,
	pub disconnect_on_handler_error: bool,
	pub backlog: i32,
	pub nodelay: bool,
	pub events_capacity: usize,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			bind_addr: "0.0.0.0:8091".to_string(),
			read_chunk_size: READ_CHUNK_SIZE,
			max_payload_size: 16 << 20,
			max_message_size: 64 << 20,
			max_frame_size: 64 << 10,
			max_outbox_bytes: 8 << 20,
			max_handshake_bytes: 16 << 10,
			idle_timeout: Some(Duration::from_secs(60)),
			handshake_timeout: Duration::from_secs(10),
			close_timeout: Duration::from_secs(5),
			ping_interval: None,
			tick: Duration::from_millis(100),
			max_connections: None,
			validate_utf8: true,
			disconnect_on_handler_error: false,
			backlog: 1024,
			nodelay: true,
			events_capacity: 1024,
		}
	}
}

impl ServerConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
		self.bind_addr = addr.into();
		self
	}

	pub fn read_chunk_size(mut self, size: usize) -> Self {
		self.read_chunk_size = size;
		self
	}

	pub fn max_payload_size(mut self, size: usize) -> Self {
		self.max_payload_size = size;
		self
	}

	pub fn max_message_size(mut self, size: usize) -> Self {
		self.max_message_size = size;
		self
	}

	pub fn max_frame_size(mut self, size: usize) -> Self {
		self.max_frame_size = size;
		self
	}

	pub fn max_outbox_bytes(mut self, bytes: usize) -> Self {
		self.max_outbox_bytes = bytes;
		self
	}

	pub fn max_handshake_bytes(mut self, bytes: usize) -> Self {
		self.max_handshake_bytes = bytes;
		self
	}

	pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.idle_timeout = timeout;
		self
	}

	pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
		self.handshake_timeout = timeout;
		self
	}

	pub fn close_timeout(mut self, timeout: Duration) -> Self {
		self.close_timeout = timeout;
		self
	}

	pub fn ping_interval(mut self, interval: Option<Duration>) -> Self {
		self.ping_interval = interval;
		self
	}

	pub fn tick(mut self, tick: Duration) -> Self {
		self.tick = tick;
		self
	}

	pub fn max_connections(mut self, max: Option<usize>) -> Self {
		self.max_connections = max;
		self
	}

	pub fn validate_utf8(mut self, validate: bool) -> Self {
		self.validate_utf8 = validate;
		self
	}

	pub fn disconnect_on_handler_error(mut self, disconnect: bool) -> Self {
		self.disconnect_on_handler_error = disconnect;
		self
	}

	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = backlog;
		self
	}

	pub fn nodelay(mut self, nodelay: bool) -> Self {
		self.nodelay = nodelay;
		self
	}

	/// Address without the optional `tcp://` scheme.
	pub fn socket_addr(&self) -> &str {
		self.bind_addr.strip_prefix("tcp://").unwrap_or(&self.bind_addr)
	}

	pub fn validate(&self) -> Result<()> {
		let sizes = [
			("read_chunk_size", self.read_chunk_size),
			("max_payload_size", self.max_payload_size),
			("max_message_size", self.max_message_size),
			("max_frame_size", self.max_frame_size),
			("max_outbox_bytes", self.max_outbox_bytes),
			("max_handshake_bytes", self.max_handshake_bytes),
			("events_capacity", self.events_capacity),
		];
		for (name, value) in sizes {
			if value == 0 {
				return Err(Error::Config(format!("{} must be greater than zero", name)));
			}
		}
		if self.tick.is_zero() {
			return Err(Error::Config("tick must be greater than zero".to_string()));
		}
		if self.max_connections == Some(0) {
			return Err(Error::Config("max_connections must be greater than zero".to_string()));
		}
		Ok(())
	}
}
