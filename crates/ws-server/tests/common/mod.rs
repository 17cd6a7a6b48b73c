// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

#![allow(dead_code)]

use std::{
	io::{ErrorKind, Read, Write},
	net::{SocketAddr, TcpStream},
	thread::{self, JoinHandle},
	time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use reifydb_ws_protocol::{CloseCode, CloseFrame, Frame, Opcode, Role, decode, encode_masked, handshake};
use reifydb_ws_server::{
	Client, ClientId, Handler, HandlerResult, Message, Result, Server, ServerConfig, ServerHandle,
};
use tracing_subscriber::EnvFilter;

pub const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> ServerConfig {
	ServerConfig::new().bind_addr("127.0.0.1:0").tick(Duration::from_millis(20))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
	Connected(ClientId, String),
	Message(ClientId, Message),
	Disconnected(ClientId),
}

/// Echoes every message and reports callbacks over a channel.
///
/// `fail` makes the callback return an error, `panic` makes it panic and
/// `/all <text>` broadcasts `<text>` through the server handle.
pub struct Recorder {
	events: Sender<Event>,
}

impl Handler for Recorder {
	fn on_connect(&mut self, client: &mut Client, _server: &ServerHandle) -> HandlerResult {
		self.events.send(Event::Connected(client.id(), client.path().to_string()))?;
		Ok(())
	}

	fn on_message(&mut self, client: &mut Client, message: Message, server: &ServerHandle) -> HandlerResult {
		self.events.send(Event::Message(client.id(), message.clone()))?;
		match message.as_text() {
			Some("fail") => Err("requested failure".into()),
			Some("panic") => panic!("requested panic"),
			Some(text) if text.starts_with("/all ") => {
				server.broadcast(&text[5..])?;
				Ok(())
			}
			_ => {
				client.send(message)?;
				Ok(())
			}
		}
	}

	fn on_disconnect(&mut self, client: &Client, _server: &ServerHandle) {
		let _ = self.events.send(Event::Disconnected(client.id()));
	}
}

pub struct TestServer {
	pub handle: ServerHandle,
	pub events: Receiver<Event>,
	thread: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
	pub fn start(config: ServerConfig) -> Self {
		let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_test_writer().try_init();

		let (sender, events) = crossbeam_channel::unbounded();
		let mut server = Server::bind(
			config,
			Recorder {
				events: sender,
			},
		)
		.unwrap();
		let handle = server.handle();
		let thread = thread::Builder::new().name("ws-test-server".to_string()).spawn(move || server.run()).unwrap();

		Self {
			handle,
			events,
			thread: Some(thread),
		}
	}

	pub fn addr(&self) -> SocketAddr {
		self.handle.local_addr()
	}

	pub fn next_event(&self) -> Event {
		self.events.recv_timeout(TIMEOUT).expect("no event from server")
	}

	/// Skips events until one matches.
	pub fn wait_for(&self, predicate: impl Fn(&Event) -> bool) -> Event {
		loop {
			let event = self.next_event();
			if predicate(&event) {
				return event;
			}
		}
	}

	pub fn assert_no_event(&self, wait: Duration) {
		if let Ok(event) = self.events.recv_timeout(wait) {
			panic!("unexpected event {:?}", event);
		}
	}

	pub fn stop(mut self) {
		self.handle.shutdown().unwrap();
		if let Some(thread) = self.thread.take() {
			thread.join().unwrap().unwrap();
		}
	}
}

impl Drop for TestServer {
	fn drop(&mut self) {
		if let Some(thread) = self.thread.take() {
			let _ = self.handle.shutdown();
			let _ = thread.join();
		}
	}
}

/// Blocking client speaking just enough of the protocol for tests.
pub struct TestClient {
	stream: TcpStream,
	buffer: Vec<u8>,
}

impl TestClient {
	pub fn connect(addr: SocketAddr) -> Self {
		Self::connect_path(addr, "/chat")
	}

	pub fn connect_path(addr: SocketAddr, path: &str) -> Self {
		let mut client = Self::raw(addr);
		client.write_raw(&handshake::request("localhost", path, KEY));
		let response = client.read_head();
		assert!(response.starts_with("HTTP/1.1 101 "), "unexpected response: {}", response);
		assert!(response.contains(&format!("Sec-WebSocket-Accept: {}\r\n", handshake::accept_key(KEY))));
		client
	}

	/// A TCP connection that has not sent anything yet.
	pub fn raw(addr: SocketAddr) -> Self {
		let stream = TcpStream::connect(addr).unwrap();
		stream.set_read_timeout(Some(TIMEOUT)).unwrap();
		stream.set_nodelay(true).unwrap();
		Self {
			stream,
			buffer: Vec::new(),
		}
	}

	pub fn id(&self) -> ClientId {
		ClientId::new(self.stream.local_addr().unwrap())
	}

	pub fn write_raw(&mut self, bytes: &[u8]) {
		self.stream.write_all(bytes).unwrap();
	}

	pub fn send_frame(&mut self, opcode: Opcode, payload: &[u8], fin: bool) {
		self.write_raw(&encode_masked(opcode, payload, fin, MASK));
	}

	pub fn send_text(&mut self, text: &str) {
		self.send_frame(Opcode::Text, text.as_bytes(), true);
	}

	pub fn send_close(&mut self, code: CloseCode, reason: &str) {
		self.send_frame(Opcode::Close, &CloseFrame::new(code, reason).encode(), true);
	}

	/// Reads an HTTP header block.
	pub fn read_head(&mut self) -> String {
		loop {
			if let Some(end) = handshake::find_header_end(&self.buffer) {
				let head: Vec<u8> = self.buffer.drain(..end).collect();
				return String::from_utf8(head).unwrap();
			}
			self.fill();
		}
	}

	/// Everything the server sends until it closes the connection.
	pub fn read_to_end(&mut self) -> Vec<u8> {
		let mut bytes = std::mem::take(&mut self.buffer);
		let mut chunk = [0u8; 4096];
		loop {
			match self.stream.read(&mut chunk) {
				Ok(0) => return bytes,
				Ok(n) => bytes.extend_from_slice(&chunk[..n]),
				Err(e) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted) => {
					return bytes;
				}
				Err(e) => panic!("read failed: {}", e),
			}
		}
	}

	pub fn recv(&mut self) -> Frame {
		loop {
			if let Some((frame, consumed)) = decode(&self.buffer, Role::Client, usize::MAX).unwrap() {
				self.buffer.drain(..consumed);
				return frame;
			}
			self.fill();
		}
	}

	pub fn recv_text(&mut self) -> String {
		let frame = self.recv();
		assert_eq!(frame.opcode, Opcode::Text, "expected text, got {:?}", frame);
		assert!(frame.fin);
		String::from_utf8(frame.payload).unwrap()
	}

	pub fn recv_close(&mut self) -> Option<CloseFrame> {
		let frame = self.recv();
		assert_eq!(frame.opcode, Opcode::Close, "expected close, got {:?}", frame);
		CloseFrame::parse(&frame.payload).unwrap()
	}

	/// Asserts the server closed the TCP connection without sending more
	/// frames.
	pub fn expect_eof(&mut self) {
		let rest = self.read_to_end();
		assert!(rest.is_empty(), "unexpected trailing bytes {:?}", rest);
	}

	fn fill(&mut self) {
		let mut chunk = [0u8; 4096];
		let n = self.stream.read(&mut chunk).unwrap();
		assert!(n > 0, "connection closed by server");
		self.buffer.extend_from_slice(&chunk[..n]);
	}
}
