// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	net::SocketAddr,
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
};

use crossbeam_channel::Sender;
use mio::Waker;
use reifydb_ws_protocol::{CloseCode, Message};

use crate::{
	client::ClientId,
	error::{Error, Result},
};

#[derive(Debug)]
pub(crate) enum Command {
	Send {
		to: ClientId,
		message: Message,
	},
	Broadcast {
		message: Message,
		except: Option<ClientId>,
	},
	Close {
		to: ClientId,
		code: CloseCode,
		reason: String,
	},
	Shutdown,
}

/// Thread-safe handle to a running server.
///
/// Commands are queued and executed by the event loop on its next cycle, so a
/// successful return only means the loop accepted the command.
#[derive(Clone)]
pub struct ServerHandle {
	commands: Sender<Command>,
	waker: Arc<Waker>,
	shutdown: Arc<AtomicBool>,
	local_addr: SocketAddr,
}

impl ServerHandle {
	pub(crate) fn new(
		commands: Sender<Command>,
		waker: Arc<Waker>,
		shutdown: Arc<AtomicBool>,
		local_addr: SocketAddr,
	) -> Self {
		Self {
			commands,
			waker,
			shutdown,
			local_addr,
		}
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn send(&self, to: ClientId, message: impl Into<Message>) -> Result<()> {
		self.submit(Command::Send {
			to,
			message: message.into(),
		})
	}

	pub fn broadcast(&self, message: impl Into<Message>) -> Result<()> {
		self.submit(Command::Broadcast {
			message: message.into(),
			except: None,
		})
	}

	pub fn broadcast_except(&self, except: ClientId, message: impl Into<Message>) -> Result<()> {
		self.submit(Command::Broadcast {
			message: message.into(),
			except: Some(except),
		})
	}

	pub fn close(&self, to: ClientId, code: CloseCode, reason: impl Into<String>) -> Result<()> {
		self.submit(Command::Close {
			to,
			code,
			reason: reason.into(),
		})
	}

	/// Asks the loop to close every client and return from `run`.
	pub fn shutdown(&self) -> Result<()> {
		self.shutdown.store(true, Ordering::Release);
		self.submit(Command::Shutdown)
	}

	pub fn is_shutting_down(&self) -> bool {
		self.shutdown.load(Ordering::Acquire)
	}

	fn submit(&self, command: Command) -> Result<()> {
		self.commands.send(command).map_err(|_| Error::ServerGone)?;
		self.waker.wake()?;
		Ok(())
	}
}

impl std::fmt::Debug for ServerHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ServerHandle").field("local_addr", &self.local_addr).finish()
	}
}
