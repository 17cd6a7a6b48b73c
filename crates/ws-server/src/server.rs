// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	any::Any,
	io,
	net::{Shutdown, SocketAddr},
	panic::{self, AssertUnwindSafe},
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use mio::{
	Events, Interest, Poll, Token, Waker,
	net::{TcpListener, TcpStream},
};
use reifydb_ws_protocol::{CloseCode, HandshakeError, Incoming, Message};
use slab::Slab;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
	client::{Client, ClientId, ClientState},
	config::ServerConfig,
	error::{Result, SendError},
	handle::{Command, ServerHandle},
	handler::{Handler, HandlerResult},
	listener,
	registry::{BroadcastReport, Registry},
};

const LISTENER: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);
const TOKEN_BASE: usize = 2;

/// Token owner. Clients live in the slab until the upgrade completes and in
/// the registry afterwards.
enum Slot {
	Handshaking(Client),
	Registered(ClientId),
}

enum HandshakeProgress {
	Pending,
	Upgraded,
	Rejected(HandshakeError),
	Disconnected(Option<io::Error>),
}

/// Single-threaded WebSocket server driven by a mio readiness loop.
///
/// All sockets are non-blocking and every handler callback runs on the thread
/// calling [`Server::run`] or [`Server::poll_once`]. Other threads talk to the
/// loop through a [`ServerHandle`].
pub struct Server<H: Handler> {
	config: ServerConfig,
	poll: Poll,
	events: Events,
	listener: TcpListener,
	local_addr: SocketAddr,
	slots: Slab<Slot>,
	registry: Registry,
	handler: H,
	handle: ServerHandle,
	commands: Receiver<Command>,
	shutdown: Arc<AtomicBool>,
	scratch: Vec<u8>,
	last_housekeeping: Instant,
}

impl<H: Handler> Server<H> {
	#[instrument(name = "ws::server::bind", level = "debug", skip(config, handler), fields(addr = %config.bind_addr))]
	pub fn bind(config: ServerConfig, handler: H) -> Result<Self> {
		config.validate()?;

		let addr = listener::resolve(&config)?;
		let mut listener = TcpListener::from_std(listener::create_listener(addr, &config)?);
		let local_addr = listener.local_addr()?;

		let poll = Poll::new()?;
		poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
		let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

		let (sender, commands) = crossbeam_channel::unbounded();
		let shutdown = Arc::new(AtomicBool::new(false));
		let handle = ServerHandle::new(sender, waker, Arc::clone(&shutdown), local_addr);

		info!("websocket server listening on {}", local_addr);

		Ok(Self {
			events: Events::with_capacity(config.events_capacity),
			scratch: vec![0u8; config.read_chunk_size],
			config,
			poll,
			listener,
			local_addr,
			slots: Slab::new(),
			registry: Registry::new(),
			handler,
			handle,
			commands,
			shutdown,
			last_housekeeping: Instant::now(),
		})
	}

	pub fn handle(&self) -> ServerHandle {
		self.handle.clone()
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn config(&self) -> &ServerConfig {
		&self.config
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn handler(&self) -> &H {
		&self.handler
	}

	/// Connections still negotiating the upgrade.
	pub fn pending(&self) -> usize {
		self.slots.len() - self.registry.len()
	}

	/// Runs until [`ServerHandle::shutdown`] is called, then closes every
	/// client with `1001 Going Away`.
	pub fn run(&mut self) -> Result<()> {
		while !self.shutdown.load(Ordering::Acquire) {
			self.poll_once(Some(self.config.tick))?;
		}
		self.shutdown_clients();
		Ok(())
	}

	/// One readiness cycle: waits up to `timeout`, serves every ready socket,
	/// executes queued commands and runs housekeeping once per tick.
	pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<()> {
		if let Err(err) = self.poll.poll(&mut self.events, timeout) {
			if err.kind() != io::ErrorKind::Interrupted {
				return Err(err.into());
			}
		}

		let ready: Vec<(Token, bool, bool)> = self
			.events
			.iter()
			.map(|event| {
				let readable = event.is_readable() || event.is_read_closed() || event.is_error();
				(event.token(), readable, event.is_writable())
			})
			.collect();

		for (token, readable, writable) in ready {
			match token {
				LISTENER => self.accept(),
				// commands are drained below
				WAKE_TOKEN => {}
				token => self.connection_event(token, readable, writable),
			}
		}

		self.drain_commands();
		self.housekeeping(Instant::now());
		Ok(())
	}

	/// Sends to one registered client from the loop thread.
	pub fn send(&mut self, id: ClientId, message: impl Into<Message>) -> std::result::Result<usize, SendError> {
		let result = self.registry.send(&id, message);
		self.settle(id);
		result
	}

	/// Sends to every open client. Clients whose transport failed are removed
	/// before this returns.
	pub fn broadcast(&mut self, message: impl Into<Message>) -> BroadcastReport {
		let report = self.registry.broadcast(&message.into());
		self.settle_all();
		report
	}

	fn accept(&mut self) {
		loop {
			match self.listener.accept() {
				Ok((stream, peer)) => self.on_accept(stream, peer),
				Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
				Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
				Err(err) => {
					warn!("accept failed: {}", err);
					break;
				}
			}
		}
	}

	fn on_accept(&mut self, mut stream: TcpStream, peer: SocketAddr) {
		if let Some(max) = self.config.max_connections {
			if self.slots.len() >= max {
				warn!(peer = %peer, "connection limit of {} reached, refusing", max);
				if let Err(err) = stream.shutdown(Shutdown::Both) {
					trace!(peer = %peer, "shutdown failed: {}", err);
				}
				return;
			}
		}

		if let Err(err) = stream.set_nodelay(self.config.nodelay) {
			debug!(peer = %peer, "failed to set TCP_NODELAY: {}", err);
		}

		let entry = self.slots.vacant_entry();
		let token = Token(TOKEN_BASE + entry.key());
		if let Err(err) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
			warn!(peer = %peer, "failed to register connection: {}", err);
			return;
		}

		entry.insert(Slot::Handshaking(Client::new(ClientId::new(peer), stream, token, &self.config)));
		debug!(peer = %peer, "accepted connection");
	}

	fn connection_event(&mut self, token: Token, readable: bool, writable: bool) {
		let Some(key) = token.0.checked_sub(TOKEN_BASE) else {
			return;
		};

		match self.slots.get(key) {
			Some(Slot::Handshaking(_)) => {
				if readable {
					self.handshake_event(key);
				}
			}
			Some(Slot::Registered(id)) => {
				let id = *id;
				self.client_event(id, readable, writable);
			}
			None => {}
		}
	}

	fn handshake_event(&mut self, key: usize) {
		let Some(Slot::Handshaking(client)) = self.slots.get_mut(key) else {
			return;
		};

		let progress = loop {
			match client.read_chunk(&mut self.scratch) {
				Ok(Some(0)) => break HandshakeProgress::Disconnected(None),
				Ok(Some(_)) => match client.advance_handshake() {
					Ok(true) => break HandshakeProgress::Upgraded,
					Ok(false) => continue,
					Err(err) => {
						client.reject(&err);
						break HandshakeProgress::Rejected(err);
					}
				},
				Ok(None) => break HandshakeProgress::Pending,
				Err(err) => break HandshakeProgress::Disconnected(Some(err)),
			}
		};

		match progress {
			HandshakeProgress::Pending => {}
			HandshakeProgress::Upgraded => self.promote(key),
			HandshakeProgress::Rejected(err) => {
				debug!(slot = key, "rejected upgrade: {}", err);
				self.drop_pending(key);
			}
			HandshakeProgress::Disconnected(err) => {
				match err {
					Some(err) => debug!(slot = key, "connection failed during handshake: {}", err),
					None => debug!(slot = key, "peer left during handshake"),
				}
				self.drop_pending(key);
			}
		}
	}

	/// Moves an upgraded client from its slot into the registry.
	fn promote(&mut self, key: usize) {
		let Some(slot) = self.slots.get_mut(key) else {
			return;
		};
		let (id, state) = match slot {
			Slot::Handshaking(client) => (client.id(), client.state()),
			Slot::Registered(_) => return,
		};
		if state == ClientState::Closed {
			debug!(client = %id, "upgrade response not delivered");
			self.drop_pending(key);
			return;
		}
		let Some(slot) = self.slots.get_mut(key) else {
			return;
		};
		let Slot::Handshaking(client) = std::mem::replace(slot, Slot::Registered(id)) else {
			return;
		};

		if self.registry.contains(&id) {
			warn!(client = %id, "replacing stale registration");
			self.teardown(id);
		}

		info!(client = %id, path = client.path(), "client connected");
		self.registry.insert(client);

		if let Some(client) = self.registry.get_mut(&id) {
			let handler = &mut self.handler;
			let handle = &self.handle;
			let result = panic::catch_unwind(AssertUnwindSafe(|| handler.on_connect(client, handle)));
			self.after_callback(id, "connect", result);
		}

		// frames that arrived together with the upgrade request
		self.process_frames(id);
		self.read_client(id);
		self.settle(id);
	}

	fn client_event(&mut self, id: ClientId, readable: bool, writable: bool) {
		if writable {
			if let Some(client) = self.registry.get_mut(&id) {
				if let Err(err) = client.flush() {
					debug!(client = %id, "write failed: {}", err);
					client.mark_closed();
				}
			}
		}
		if readable {
			self.read_client(id);
		}
		self.settle(id);
	}

	/// Reads until the socket would block, dispatching complete frames after
	/// every chunk.
	fn read_client(&mut self, id: ClientId) {
		loop {
			let Some(client) = self.registry.get_mut(&id) else {
				return;
			};
			if client.state() == ClientState::Closed {
				return;
			}

			match client.read_chunk(&mut self.scratch) {
				Ok(Some(0)) => {
					debug!(client = %id, "peer closed the connection");
					client.mark_closed();
					return;
				}
				Ok(Some(_)) => self.process_frames(id),
				Ok(None) => return,
				Err(err) => {
					debug!(client = %id, "read failed: {}", err);
					client.mark_closed();
					return;
				}
			}
		}
	}

	fn process_frames(&mut self, id: ClientId) {
		loop {
			let Some(client) = self.registry.get_mut(&id) else {
				return;
			};
			if client.state() == ClientState::Closed {
				return;
			}

			let incoming = match client.next_incoming() {
				Ok(Some(incoming)) => incoming,
				Ok(None) => return,
				Err(err) => {
					warn!(client = %id, "protocol violation: {}", err);
					client.fail(&err);
					return;
				}
			};

			match incoming {
				Incoming::Message(message) => {
					let handler = &mut self.handler;
					let handle = &self.handle;
					let result =
						panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(client, message, handle)));
					self.after_callback(id, "message", result);
				}
				Incoming::Ping(payload) => {
					if client.is_open() {
						if let Err(err) = client.pong(&payload) {
							debug!(client = %id, "failed to answer ping: {}", err);
						}
					}
				}
				Incoming::Pong(_) => trace!(client = %id, "pong received"),
				Incoming::Close(frame) => {
					debug!(client = %id, code = ?frame.as_ref().map(|f| f.code.as_u16()), "close received");
					client.receive_close(frame);
				}
			}
		}
	}

	fn after_callback(&mut self, id: ClientId, callback: &str, result: std::thread::Result<HandlerResult>) {
		let failure = match result {
			Ok(Ok(())) => return,
			Ok(Err(err)) => err.to_string(),
			Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
		};
		error!(client = %id, "{} handler failed: {}", callback, failure);

		if self.config.disconnect_on_handler_error {
			if let Some(client) = self.registry.get_mut(&id) {
				if let Err(err) = client.close(CloseCode::Internal, "internal error") {
					debug!(client = %id, "failed to close after handler error: {}", err);
				}
			}
		}
	}

	fn drain_commands(&mut self) {
		let mut executed = false;
		while let Ok(command) = self.commands.try_recv() {
			executed = true;
			match command {
				Command::Send {
					to,
					message,
				} => {
					if let Err(err) = self.registry.send(&to, message) {
						debug!(client = %to, "send failed: {}", err);
					}
				}
				Command::Broadcast {
					message,
					except,
				} => {
					let report = self.registry.broadcast_except(&message, except);
					trace!(delivered = report.delivered, failed = report.failed.len(), "broadcast");
				}
				Command::Close {
					to,
					code,
					reason,
				} => match self.registry.get_mut(&to) {
					Some(client) => {
						if let Err(err) = client.close(code, &reason) {
							debug!(client = %to, "close failed: {}", err);
						}
					}
					None => debug!(client = %to, "close requested for unknown client"),
				},
				Command::Shutdown => self.shutdown.store(true, Ordering::Release),
			}
		}

		if executed {
			self.settle_all();
		}
	}

	fn housekeeping(&mut self, now: Instant) {
		if now.saturating_duration_since(self.last_housekeeping) < self.config.tick {
			return;
		}
		self.last_housekeeping = now;

		let handshake_timeout = self.config.handshake_timeout;
		let stale: Vec<usize> = self
			.slots
			.iter()
			.filter_map(|(key, slot)| match slot {
				Slot::Handshaking(client)
					if now.saturating_duration_since(client.connected_at()) >= handshake_timeout =>
				{
					Some(key)
				}
				_ => None,
			})
			.collect();
		for key in stale {
			debug!(slot = key, "handshake timed out");
			self.drop_pending(key);
		}

		for id in self.registry.close_expired(now, self.config.close_timeout) {
			debug!(client = %id, "peer did not answer close");
			if let Some(client) = self.registry.get_mut(&id) {
				client.mark_closed();
			}
		}

		if let Some(timeout) = self.config.idle_timeout {
			for id in self.registry.idle(now, timeout) {
				info!(client = %id, "closing idle client");
				if let Some(client) = self.registry.get_mut(&id) {
					if let Err(err) = client.close(CloseCode::GoingAway, "idle timeout") {
						trace!(client = %id, "idle close not delivered: {}", err);
					}
					client.mark_closed();
				}
			}
		}

		if let Some(interval) = self.config.ping_interval {
			for client in self.registry.iter_mut() {
				if !client.is_open() {
					continue;
				}
				let silent = now.saturating_duration_since(client.last_received()) >= interval;
				let due = client.last_ping_sent().is_none_or(|sent| now.saturating_duration_since(sent) >= interval);
				if silent && due {
					if let Err(err) = client.ping(b"") {
						debug!(client = %client.id(), "keep-alive ping failed: {}", err);
					}
				}
			}
		}

		self.settle_all();
	}

	/// Syncs write interest with the outbox and removes the client once its
	/// connection ended.
	fn settle(&mut self, id: ClientId) {
		let Some(client) = self.registry.get_mut(&id) else {
			return;
		};

		if client.state() != ClientState::Closed {
			let wants = client.wants_write();
			if wants != client.write_interest() {
				let interest = if wants {
					Interest::READABLE | Interest::WRITABLE
				} else {
					Interest::READABLE
				};
				let token = client.token();
				match self.poll.registry().reregister(client.stream_mut(), token, interest) {
					Ok(()) => client.set_write_interest(wants),
					Err(err) => {
						warn!(client = %id, "failed to update interest: {}", err);
						client.mark_closed();
					}
				}
			}
		}

		if client.state() == ClientState::Closed {
			self.teardown(id);
		}
	}

	fn settle_all(&mut self) {
		for id in self.registry.ids() {
			self.settle(id);
		}
	}

	/// Removes a registered client and reports it to the handler.
	fn teardown(&mut self, id: ClientId) {
		let Some(mut client) = self.registry.remove(&id) else {
			return;
		};

		if let Some(key) = client.token().0.checked_sub(TOKEN_BASE) {
			if matches!(self.slots.get(key), Some(Slot::Registered(registered)) if *registered == id) {
				self.slots.remove(key);
			}
		}
		if let Err(err) = self.poll.registry().deregister(client.stream_mut()) {
			trace!(client = %id, "deregister failed: {}", err);
		}
		client.shutdown();
		info!(client = %id, "client disconnected");

		let handler = &mut self.handler;
		let handle = &self.handle;
		if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler.on_disconnect(&client, handle))) {
			error!(client = %id, "disconnect handler panicked: {}", panic_message(panic.as_ref()));
		}
	}

	fn drop_pending(&mut self, key: usize) {
		if !matches!(self.slots.get(key), Some(Slot::Handshaking(_))) {
			return;
		}
		if let Slot::Handshaking(mut client) = self.slots.remove(key) {
			if let Err(err) = self.poll.registry().deregister(client.stream_mut()) {
				trace!(slot = key, "deregister failed: {}", err);
			}
			client.shutdown();
		}
	}

	fn shutdown_clients(&mut self) {
		info!("shutting down, closing {} clients", self.registry.len());
		for id in self.registry.ids() {
			if let Some(client) = self.registry.get_mut(&id) {
				if let Err(err) = client.close(CloseCode::GoingAway, "server shutting down") {
					trace!(client = %id, "shutdown close not delivered: {}", err);
				}
			}
			self.teardown(id);
		}

		let pending: Vec<usize> = self.slots.iter().map(|(key, _)| key).collect();
		for key in pending {
			self.drop_pending(key);
		}
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
	if let Some(message) = panic.downcast_ref::<&str>() {
		message
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message
	} else {
		"unknown panic"
	}
}
