// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::io;

use reifydb_ws_protocol::Opcode;

use crate::client::ClientId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("invalid bind address {0}")]
	InvalidAddress(String),

	#[error("failed to bind {addr}: {source}")]
	Bind {
		addr: String,
		#[source]
		source: io::Error,
	},

	#[error(transparent)]
	Io(#[from] io::Error),

	#[error("server event loop is no longer running")]
	ServerGone,
}

/// Why an outbound frame could not be queued or written.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
	#[error("connection is not open")]
	NotOpen,

	#[error("no open client {0}")]
	UnknownClient(ClientId),

	#[error("outbox holds {pending} bytes, limit is {max}")]
	OutboxFull {
		pending: usize,
		max: usize,
	},

	#[error("control frame payload of {0} bytes exceeds 125")]
	ControlTooLarge(usize),

	#[error("{0:?} frames cannot be sent on their own")]
	InvalidOpcode(Opcode),

	#[error("transport error: {0}")]
	Transport(#[from] io::Error),
}
