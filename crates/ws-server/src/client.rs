// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	collections::VecDeque,
	fmt,
	io::{self, Read, Write},
	net::{Shutdown, SocketAddr},
	time::Instant,
};

use mio::{Token, net::TcpStream};
use reifydb_ws_protocol::{
	Assembler, CloseCode, CloseFrame, Decoder, FrameError, HandshakeError, HandshakeRequest, Headers, Incoming,
	Message, Opcode, Role, constants::MAX_CONTROL_PAYLOAD, encode, handshake,
};

use crate::{config::ServerConfig, error::SendError};

/// Byte stream a client talks over. Implemented for the mio stream the server
/// accepts; tests substitute in-memory streams.
pub trait Transport: Read + Write {
	fn shutdown(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
	fn shutdown(&self) -> io::Result<()> {
		TcpStream::shutdown(self, Shutdown::Both)
	}
}

/// Identity of a connection, derived from the peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(SocketAddr);

impl ClientId {
	pub fn new(addr: SocketAddr) -> Self {
		Self(addr)
	}

	pub fn addr(&self) -> SocketAddr {
		self.0
	}
}

impl From<SocketAddr> for ClientId {
	fn from(addr: SocketAddr) -> Self {
		Self(addr)
	}
}

impl fmt::Display for ClientId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	/// Accepted, waiting for the upgrade request.
	Connecting,
	Open,
	/// We sent a close frame and wait for the peer's.
	Closing,
	Closed,
}

/// How a write counts against the outbox limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
	/// Refused with `OutboxFull` when it would exceed the limit.
	Limited,
	/// Replaces a queued pong that has not started writing. A pong that
	/// still does not fit fails the client.
	Pong,
	/// Always queued: the upgrade response and close frames.
	Unlimited,
}

struct Outgoing {
	bytes: Vec<u8>,
	pong: bool,
}

/// One accepted connection.
pub struct Client<S = TcpStream> {
	id: ClientId,
	stream: S,
	token: Token,
	state: ClientState,

	method: String,
	uri: String,
	headers: Headers,

	handshake: Vec<u8>,
	max_handshake_bytes: usize,
	decoder: Decoder,
	assembler: Assembler,

	outbox: VecDeque<Outgoing>,
	// bytes of the front frame already written
	written: usize,
	outbox_bytes: usize,
	max_outbox_bytes: usize,
	max_frame_size: usize,
	write_interest: bool,

	connected_at: Instant,
	last_activity: Instant,
	last_received: Instant,
	closing_since: Option<Instant>,
	last_ping_sent: Option<Instant>,
	peer_close: Option<CloseFrame>,
}

impl<S: Transport> Client<S> {
	pub fn new(id: ClientId, stream: S, token: Token, config: &ServerConfig) -> Self {
		let now = Instant::now();
		Self {
			id,
			stream,
			token,
			state: ClientState::Connecting,
			method: String::new(),
			uri: String::new(),
			headers: Headers::new(),
			handshake: Vec::new(),
			max_handshake_bytes: config.max_handshake_bytes,
			decoder: Decoder::new(Role::Server, config.max_payload_size),
			assembler: Assembler::new(config.max_message_size).validate_utf8(config.validate_utf8),
			outbox: VecDeque::new(),
			written: 0,
			outbox_bytes: 0,
			max_outbox_bytes: config.max_outbox_bytes,
			max_frame_size: config.max_frame_size,
			write_interest: false,
			connected_at: now,
			last_activity: now,
			last_received: now,
			closing_since: None,
			last_ping_sent: None,
			peer_close: None,
		}
	}

	pub fn id(&self) -> ClientId {
		self.id
	}

	pub fn stream(&self) -> &S {
		&self.stream
	}

	pub fn state(&self) -> ClientState {
		self.state
	}

	pub fn is_open(&self) -> bool {
		self.state == ClientState::Open
	}

	pub fn method(&self) -> &str {
		&self.method
	}

	pub fn uri(&self) -> &str {
		&self.uri
	}

	pub fn path(&self) -> &str {
		self.uri.split_once('?').map_or(self.uri.as_str(), |(path, _)| path)
	}

	pub fn query(&self) -> Option<&str> {
		self.uri.split_once('?').map(|(_, query)| query)
	}

	pub fn headers(&self) -> &Headers {
		&self.headers
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name)
	}

	pub fn connected_at(&self) -> Instant {
		self.connected_at
	}

	/// Last time bytes were read from or written to the connection.
	pub fn last_activity(&self) -> Instant {
		self.last_activity
	}

	/// Last time bytes arrived from the peer.
	pub fn last_received(&self) -> Instant {
		self.last_received
	}

	pub fn closing_since(&self) -> Option<Instant> {
		self.closing_since
	}

	pub fn last_ping_sent(&self) -> Option<Instant> {
		self.last_ping_sent
	}

	/// Close frame the peer sent, if it sent one with a status code.
	pub fn peer_close(&self) -> Option<&CloseFrame> {
		self.peer_close.as_ref()
	}

	/// Encoded bytes waiting for the socket to become writable.
	pub fn pending_bytes(&self) -> usize {
		self.outbox_bytes
	}

	pub fn send(&mut self, message: impl Into<Message>) -> Result<usize, SendError> {
		let message = message.into();
		self.send_frame(message.opcode(), message.as_bytes())
	}

	/// Sends one message or control frame and returns the number of payload
	/// bytes accepted.
	///
	/// Text and binary payloads above the frame ceiling go out as a non-final
	/// first frame followed by continuation frames. Sending `Close` starts the
	/// close handshake like [`Client::close`] with the raw payload.
	pub fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<usize, SendError> {
		match opcode {
			Opcode::Text | Opcode::Binary => {
				self.ensure_open()?;
				let frames = fragment(opcode, payload, self.max_frame_size);
				self.queue(frames, Admission::Limited)?;
				Ok(payload.len())
			}
			Opcode::Ping | Opcode::Pong => {
				self.ensure_open()?;
				self.control(opcode, payload)?;
				Ok(payload.len())
			}
			Opcode::Close => {
				self.ensure_open()?;
				self.control(Opcode::Close, payload)?;
				self.begin_closing();
				Ok(payload.len())
			}
			Opcode::Continuation => Err(SendError::InvalidOpcode(opcode)),
		}
	}

	pub fn ping(&mut self, payload: &[u8]) -> Result<(), SendError> {
		self.ensure_open()?;
		self.control(Opcode::Ping, payload)?;
		self.last_ping_sent = Some(Instant::now());
		Ok(())
	}

	pub fn pong(&mut self, payload: &[u8]) -> Result<(), SendError> {
		self.ensure_open()?;
		self.control(Opcode::Pong, payload)
	}

	/// Starts the close handshake. The socket stays open until the peer
	/// answers with its own close frame or the close timeout elapses.
	/// Closing an already closing or closed client does nothing.
	pub fn close(&mut self, code: CloseCode, reason: &str) -> Result<(), SendError> {
		match self.state {
			ClientState::Connecting => Err(SendError::NotOpen),
			ClientState::Closing | ClientState::Closed => Ok(()),
			ClientState::Open => {
				let payload = CloseFrame::new(code, reason).encode();
				let result = self.control(Opcode::Close, &payload);
				self.begin_closing();
				result
			}
		}
	}

	fn ensure_open(&self) -> Result<(), SendError> {
		if self.state == ClientState::Open {
			Ok(())
		} else {
			Err(SendError::NotOpen)
		}
	}

	fn begin_closing(&mut self) {
		if self.state == ClientState::Open {
			self.state = ClientState::Closing;
			self.closing_since = Some(Instant::now());
		}
	}

	fn control(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), SendError> {
		if payload.len() > MAX_CONTROL_PAYLOAD {
			return Err(SendError::ControlTooLarge(payload.len()));
		}
		let admission = match opcode {
			Opcode::Close => Admission::Unlimited,
			Opcode::Pong => Admission::Pong,
			_ => Admission::Limited,
		};
		self.queue(vec![encode(opcode, payload, true)], admission)
	}

	fn queue(&mut self, frames: Vec<Vec<u8>>, admission: Admission) -> Result<(), SendError> {
		if admission == Admission::Pong {
			self.discard_queued_pong();
		}

		let size: usize = frames.iter().map(Vec::len).sum();
		if admission != Admission::Unlimited && self.outbox_bytes + size > self.max_outbox_bytes {
			let err = SendError::OutboxFull {
				pending: self.outbox_bytes,
				max: self.max_outbox_bytes,
			};
			if admission == Admission::Pong {
				self.overflow();
			}
			return Err(err);
		}

		self.outbox_bytes += size;
		let pong = admission == Admission::Pong;
		self.outbox.extend(frames.into_iter().map(|bytes| Outgoing {
			bytes,
			pong,
		}));

		if let Err(err) = self.flush() {
			tracing::debug!(client = %self.id, "write failed: {}", err);
			self.state = ClientState::Closed;
			return Err(SendError::Transport(err));
		}
		Ok(())
	}

	/// Only the latest ping needs an answer. A pong whose first byte already
	/// went out stays queued.
	fn discard_queued_pong(&mut self) {
		let skip = usize::from(self.written > 0);
		let Some(index) = self.outbox.iter().skip(skip).position(|o| o.pong) else {
			return;
		};
		if let Some(stale) = self.outbox.remove(index + skip) {
			self.outbox_bytes -= stale.bytes.len();
		}
	}

	/// The peer keeps pinging without reading our answers.
	fn overflow(&mut self) {
		tracing::debug!(client = %self.id, pending = self.outbox_bytes, "outbox full, closing");
		let payload = CloseFrame::new(CloseCode::Policy, "outbox full").encode();
		let bytes = encode(Opcode::Close, &payload, true);
		self.outbox_bytes += bytes.len();
		self.outbox.push_back(Outgoing {
			bytes,
			pong: false,
		});
		if let Err(err) = self.flush() {
			tracing::trace!(client = %self.id, "failed to send overflow close: {}", err);
		}
		self.state = ClientState::Closed;
	}

	/// Writes queued frames until the socket would block.
	pub(crate) fn flush(&mut self) -> io::Result<()> {
		loop {
			let Some(front) = self.outbox.front() else {
				return Ok(());
			};
			let len = front.bytes.len();

			match self.stream.write(&front.bytes[self.written..]) {
				Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
				Ok(n) => {
					self.written += n;
					self.outbox_bytes -= n;
					self.last_activity = Instant::now();
					if self.written == len {
						self.outbox.pop_front();
						self.written = 0;
					}
				}
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
			}
		}
	}

	pub(crate) fn wants_write(&self) -> bool {
		!self.outbox.is_empty()
	}

	pub(crate) fn write_interest(&self) -> bool {
		self.write_interest
	}

	pub(crate) fn set_write_interest(&mut self, interest: bool) {
		self.write_interest = interest;
	}

	pub(crate) fn token(&self) -> Token {
		self.token
	}

	pub(crate) fn stream_mut(&mut self) -> &mut S {
		&mut self.stream
	}

	/// Reads one chunk into the handshake or frame buffer.
	///
	/// `Ok(None)` means the socket would block, `Ok(Some(0))` that the peer
	/// closed its side.
	pub(crate) fn read_chunk(&mut self, scratch: &mut [u8]) -> io::Result<Option<usize>> {
		loop {
			match self.stream.read(scratch) {
				Ok(0) => return Ok(Some(0)),
				Ok(n) => {
					let now = Instant::now();
					self.last_activity = now;
					self.last_received = now;
					if self.state == ClientState::Connecting {
						self.handshake.extend_from_slice(&scratch[..n]);
					} else {
						self.decoder.extend(&scratch[..n]);
					}
					return Ok(Some(n));
				}
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
			}
		}
	}

	/// Tries to complete the upgrade with the bytes received so far.
	///
	/// Returns `Ok(true)` once the request was accepted; the `101` response is
	/// queued and bytes that followed the request are moved to the frame
	/// decoder. The client ends up `Closed` instead of `Open` when the
	/// response could not be written.
	pub(crate) fn advance_handshake(&mut self) -> Result<bool, HandshakeError> {
		if self.state != ClientState::Connecting {
			return Ok(false);
		}

		let Some((request, consumed)) = handshake::process(&self.handshake, self.max_handshake_bytes)? else {
			return Ok(false);
		};

		let leftover = self.handshake.split_off(consumed);
		self.handshake = Vec::new();
		self.upgrade(request);
		if !leftover.is_empty() {
			self.decoder.extend(&leftover);
		}
		Ok(true)
	}

	fn upgrade(&mut self, request: HandshakeRequest) {
		let response = handshake::switching_protocols(&request.accept_key());
		self.method = request.method;
		self.uri = request.uri;
		self.headers = request.headers;
		self.state = ClientState::Open;

		if let Err(err) = self.queue(vec![response], Admission::Unlimited) {
			tracing::debug!(client = %self.id, "failed to write handshake response: {}", err);
		}
	}

	/// Writes the rejection response without waiting for writability.
	pub(crate) fn reject(&mut self, error: &HandshakeError) {
		let response = handshake::rejection(error);
		if let Err(err) = self.stream.write_all(&response) {
			tracing::trace!(client = %self.id, "rejection response not delivered: {}", err);
		}
		self.state = ClientState::Closed;
	}

	/// Next complete message or control frame from the receive buffer.
	pub(crate) fn next_incoming(&mut self) -> Result<Option<Incoming>, FrameError> {
		while let Some(frame) = self.decoder.next_frame()? {
			if let Some(incoming) = self.assembler.push(frame)? {
				return Ok(Some(incoming));
			}
		}
		Ok(None)
	}

	/// Handles the peer's close frame. While open the close is echoed with
	/// the peer's status code, or 1000 when it sent none; while closing our
	/// own close already went out.
	/// Returns whether an echo was sent.
	pub(crate) fn receive_close(&mut self, frame: Option<CloseFrame>) -> bool {
		let echoed = match self.state {
			ClientState::Open => {
				let code = frame.as_ref().map_or(CloseCode::Normal, |f| f.code);
				let payload = CloseFrame::new(code, "").encode();
				if let Err(err) = self.control(Opcode::Close, &payload) {
					tracing::debug!(client = %self.id, "failed to echo close: {}", err);
				}
				true
			}
			_ => false,
		};
		self.peer_close = frame;
		self.state = ClientState::Closed;
		echoed
	}

	/// Closes because the peer broke the protocol. Nothing else is read from
	/// this client afterwards.
	pub(crate) fn fail(&mut self, error: &FrameError) {
		if self.state == ClientState::Open {
			let payload = CloseFrame::new(error.close_code(), error.to_string()).encode();
			if let Err(err) = self.control(Opcode::Close, &payload) {
				tracing::trace!(client = %self.id, "failed to send protocol error close: {}", err);
			}
		}
		self.decoder.clear();
		self.assembler.reset();
		self.state = ClientState::Closed;
	}

	pub(crate) fn mark_closed(&mut self) {
		self.state = ClientState::Closed;
	}

	pub(crate) fn shutdown(&mut self) {
		if let Err(err) = self.flush() {
			tracing::trace!(client = %self.id, "final flush failed: {}", err);
		}
		if let Err(err) = self.stream.shutdown() {
			tracing::trace!(client = %self.id, "shutdown failed: {}", err);
		}
		self.state = ClientState::Closed;
	}
}

impl<S> fmt::Debug for Client<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Client")
			.field("id", &self.id)
			.field("state", &self.state)
			.field("uri", &self.uri)
			.field("pending_bytes", &self.outbox_bytes)
			.finish()
	}
}

/// Splits a data payload into frames no larger than `max_frame_size`.
fn fragment(opcode: Opcode, payload: &[u8], max_frame_size: usize) -> Vec<Vec<u8>> {
	if payload.len() <= max_frame_size {
		return vec![encode(opcode, payload, true)];
	}

	let count = payload.len().div_ceil(max_frame_size);
	payload.chunks(max_frame_size)
		.enumerate()
		.map(|(i, part)| {
			let op = if i == 0 {
				opcode
			} else {
				Opcode::Continuation
			};
			encode(op, part, i + 1 == count)
		})
		.collect()
}
