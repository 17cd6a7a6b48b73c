// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! In-memory transport for unit tests.

use std::{
	cell::RefCell,
	collections::VecDeque,
	io::{self, Read, Write},
	rc::Rc,
};

use mio::Token;
use reifydb_ws_protocol::{Frame, Role, decode, handshake};

use crate::{
	client::{Client, ClientId, Transport},
	config::ServerConfig,
};

#[derive(Default)]
struct Inner {
	input: VecDeque<u8>,
	output: Vec<u8>,
	write_budget: Option<usize>,
	broken: bool,
	eof: bool,
	shut_down: bool,
}

/// Cloned handles share the same buffers, so a test keeps one clone while the
/// client owns the other.
#[derive(Clone, Default)]
pub(crate) struct MockStream {
	inner: Rc<RefCell<Inner>>,
}

impl MockStream {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	pub(crate) fn push_input(&self, bytes: &[u8]) {
		self.inner.borrow_mut().input.extend(bytes);
	}

	pub(crate) fn take_output(&self) -> Vec<u8> {
		std::mem::take(&mut self.inner.borrow_mut().output)
	}

	/// Limits the bytes accepted by future writes; `Some(0)` makes every
	/// write block.
	pub(crate) fn set_write_budget(&self, budget: Option<usize>) {
		self.inner.borrow_mut().write_budget = budget;
	}

	pub(crate) fn set_broken(&self) {
		self.inner.borrow_mut().broken = true;
	}

	pub(crate) fn set_eof(&self) {
		self.inner.borrow_mut().eof = true;
	}

	pub(crate) fn is_shut_down(&self) -> bool {
		self.inner.borrow().shut_down
	}
}

impl Read for MockStream {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let mut inner = self.inner.borrow_mut();
		if inner.input.is_empty() {
			return if inner.eof {
				Ok(0)
			} else {
				Err(io::ErrorKind::WouldBlock.into())
			};
		}
		let n = buf.len().min(inner.input.len());
		for (slot, byte) in buf.iter_mut().zip(inner.input.drain(..n)) {
			*slot = byte;
		}
		Ok(n)
	}
}

impl Write for MockStream {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let mut inner = self.inner.borrow_mut();
		if inner.broken {
			return Err(io::ErrorKind::BrokenPipe.into());
		}
		let n = match inner.write_budget {
			Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
			Some(budget) => {
				let n = budget.min(buf.len());
				inner.write_budget = Some(budget - n);
				n
			}
			None => buf.len(),
		};
		inner.output.extend_from_slice(&buf[..n]);
		Ok(n)
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl Transport for MockStream {
	fn shutdown(&self) -> io::Result<()> {
		self.inner.borrow_mut().shut_down = true;
		Ok(())
	}
}

pub(crate) fn open_client(config: &ServerConfig) -> (Client<MockStream>, MockStream) {
	open_client_at("127.0.0.1:40000", config)
}

/// A client that completed the upgrade for `GET /chat?room=1`.
pub(crate) fn open_client_at(addr: &str, config: &ServerConfig) -> (Client<MockStream>, MockStream) {
	let stream = MockStream::new();
	let mut client = Client::new(ClientId::new(addr.parse().unwrap()), stream.clone(), Token(2), config);
	stream.push_input(&handshake::request("localhost", "/chat?room=1", "dGhlIHNhbXBsZSBub25jZQ=="));
	client.read_chunk(&mut vec![0u8; 4096]).unwrap();
	assert_eq!(client.advance_handshake(), Ok(true));
	(client, stream)
}

/// Decodes server-to-client frames written to a mock stream.
pub(crate) fn parse_frames(mut bytes: &[u8]) -> Vec<Frame> {
	let mut frames = Vec::new();
	while let Some((frame, consumed)) = decode(bytes, Role::Client, usize::MAX).unwrap() {
		frames.push(frame);
		bytes = &bytes[consumed..];
	}
	frames
}
