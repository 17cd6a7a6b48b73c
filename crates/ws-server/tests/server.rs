// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

mod common;

use std::{thread, time::Duration};

use common::{Event, TestClient, TestServer, test_config};
use reifydb_ws_protocol::{CloseCode, Opcode, encode};
use reifydb_ws_server::{Error, Message};

#[test]
fn test_upgrade_and_echo() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect_path(server.addr(), "/chat?room=1");

	assert_eq!(server.next_event(), Event::Connected(client.id(), "/chat".to_string()));

	client.send_text("hello");
	assert_eq!(client.recv_text(), "hello");
	assert_eq!(server.next_event(), Event::Message(client.id(), Message::from("hello")));

	client.send_frame(Opcode::Binary, &[0, 1, 2, 255], true);
	let frame = client.recv();
	assert_eq!(frame.opcode, Opcode::Binary);
	assert_eq!(frame.payload, vec![0, 1, 2, 255]);
	assert_eq!(frame.mask, None);

	server.stop();
}

#[test]
fn test_rejects_request_without_upgrade() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::raw(server.addr());
	client.write_raw(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");

	let response = String::from_utf8(client.read_to_end()).unwrap();
	assert!(response.starts_with("HTTP/1.1 400 "), "{}", response);
	server.assert_no_event(Duration::from_millis(100));
}

#[test]
fn test_rejects_unsupported_version() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::raw(server.addr());
	client.write_raw(
		b"GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 8\r\n\r\n",
	);

	let response = String::from_utf8(client.read_to_end()).unwrap();
	assert!(response.starts_with("HTTP/1.1 426 "), "{}", response);
	assert!(response.contains("Sec-WebSocket-Version: 13\r\n"));
}

#[test]
fn test_rejects_post() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::raw(server.addr());
	client.write_raw(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n");

	let response = String::from_utf8(client.read_to_end()).unwrap();
	assert!(response.starts_with("HTTP/1.1 405 "), "{}", response);
}

#[test]
fn test_rejects_oversized_request_head() {
	let server = TestServer::start(test_config().max_handshake_bytes(512));
	let mut client = TestClient::raw(server.addr());
	let padding = "a".repeat(900);
	client.write_raw(format!("GET / HTTP/1.1\r\nHost: localhost\r\nX-Padding: {}\r\n\r\n", padding).as_bytes());

	let response = String::from_utf8(client.read_to_end()).unwrap();
	assert!(response.starts_with("HTTP/1.1 431 "), "{}", response);
	server.assert_no_event(Duration::from_millis(100));
}

#[test]
fn test_stalled_handshake_is_dropped() {
	let server = TestServer::start(test_config().handshake_timeout(Duration::from_millis(100)));
	let mut client = TestClient::raw(server.addr());
	let request = reifydb_ws_protocol::handshake::request("localhost", "/", common::KEY);
	client.write_raw(&request[..20]);

	assert!(client.read_to_end().is_empty());
	server.assert_no_event(Duration::from_millis(100));
}

#[test]
fn test_handshake_split_across_writes() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::raw(server.addr());
	let request = reifydb_ws_protocol::handshake::request("localhost", "/", common::KEY);

	client.write_raw(&request[..20]);
	thread::sleep(Duration::from_millis(50));
	client.write_raw(&request[20..]);

	assert!(client.read_head().starts_with("HTTP/1.1 101 "));
	client.send_text("after split");
	assert_eq!(client.recv_text(), "after split");
}

#[test]
fn test_fragmented_message_with_interleaved_ping() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());

	client.send_frame(Opcode::Text, b"Hel", false);
	client.send_frame(Opcode::Ping, b"mid", true);
	client.send_frame(Opcode::Continuation, b"lo", true);

	let pong = client.recv();
	assert_eq!(pong.opcode, Opcode::Pong);
	assert_eq!(pong.payload, b"mid");
	assert_eq!(client.recv_text(), "Hello");
}

#[test]
fn test_frames_in_one_write_are_all_delivered() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());

	let mut bytes = reifydb_ws_protocol::encode_masked(Opcode::Text, b"one", true, common::MASK);
	bytes.extend(reifydb_ws_protocol::encode_masked(Opcode::Text, b"two", true, common::MASK));
	client.write_raw(&bytes);

	assert_eq!(client.recv_text(), "one");
	assert_eq!(client.recv_text(), "two");
}

#[test]
fn test_ping_is_answered_with_pong() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());

	client.send_frame(Opcode::Ping, b"are you there", true);
	let frame = client.recv();
	assert_eq!(frame.opcode, Opcode::Pong);
	assert_eq!(frame.payload, b"are you there");
}

#[test]
fn test_large_message_is_fragmented() {
	let server = TestServer::start(test_config().max_frame_size(8));
	let mut client = TestClient::connect(server.addr());

	client.send_text("abcdefghijklmnopqrst");

	let first = client.recv();
	assert_eq!((first.opcode, first.fin), (Opcode::Text, false));
	let second = client.recv();
	assert_eq!((second.opcode, second.fin), (Opcode::Continuation, false));
	let third = client.recv();
	assert_eq!((third.opcode, third.fin), (Opcode::Continuation, true));

	let payload = [first.payload, second.payload, third.payload].concat();
	assert_eq!(payload, b"abcdefghijklmnopqrst");
}

#[test]
fn test_client_close_is_echoed_once() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());
	let id = client.id();
	server.next_event();

	client.send_close(CloseCode::Normal, "bye");
	let echo = client.recv_close().unwrap();
	assert_eq!(echo.code, CloseCode::Normal);
	client.expect_eof();

	assert_eq!(server.wait_for(|e| matches!(e, Event::Disconnected(_))), Event::Disconnected(id));
	server.assert_no_event(Duration::from_millis(200));
}

#[test]
fn test_eof_counts_as_close() {
	let server = TestServer::start(test_config());
	let client = TestClient::connect(server.addr());
	let id = client.id();
	server.next_event();

	drop(client);
	assert_eq!(server.next_event(), Event::Disconnected(id));
}

#[test]
fn test_unmasked_frame_is_protocol_error() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());
	let id = client.id();

	client.write_raw(&encode(Opcode::Text, b"no mask", true));
	assert_eq!(client.recv_close().unwrap().code, CloseCode::Protocol);
	client.expect_eof();
	server.wait_for(|e| *e == Event::Disconnected(id));
}

#[test]
fn test_second_request_after_upgrade_is_protocol_error() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());

	client.write_raw(&reifydb_ws_protocol::handshake::request("localhost", "/", common::KEY));
	assert_eq!(client.recv_close().unwrap().code, CloseCode::Protocol);
	client.expect_eof();
}

#[test]
fn test_invalid_utf8_closes_with_1007() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());

	client.send_frame(Opcode::Text, &[0xff, 0xfe], true);
	assert_eq!(client.recv_close().unwrap().code, CloseCode::InvalidPayload);
	client.expect_eof();
}

#[test]
fn test_oversized_frame_closes_with_1009() {
	let server = TestServer::start(test_config().max_payload_size(16));
	let mut client = TestClient::connect(server.addr());

	client.send_frame(Opcode::Binary, &[7u8; 17], true);
	assert_eq!(client.recv_close().unwrap().code, CloseCode::TooBig);
	client.expect_eof();
}

#[test]
fn test_idle_client_is_closed_once() {
	let server = TestServer::start(test_config().idle_timeout(Some(Duration::from_millis(200))));
	let mut client = TestClient::connect(server.addr());
	let id = client.id();
	server.next_event();

	assert_eq!(client.recv_close().unwrap().code, CloseCode::GoingAway);
	client.expect_eof();
	assert_eq!(server.next_event(), Event::Disconnected(id));
	server.assert_no_event(Duration::from_millis(300));
}

#[test]
fn test_keepalive_ping() {
	let config = test_config().idle_timeout(None).ping_interval(Some(Duration::from_millis(100)));
	let server = TestServer::start(config);
	let mut client = TestClient::connect(server.addr());

	let frame = client.recv();
	assert_eq!(frame.opcode, Opcode::Ping);
	client.send_frame(Opcode::Pong, &frame.payload, true);
	client.send_text("still here");
	assert_eq!(client.recv_text(), "still here");
}

#[test]
fn test_broadcast_from_handler() {
	let server = TestServer::start(test_config());
	let mut alice = TestClient::connect(server.addr());
	let mut bob = TestClient::connect(server.addr());
	server.next_event();
	server.next_event();

	alice.send_text("/all hi everyone");
	assert_eq!(alice.recv_text(), "hi everyone");
	assert_eq!(bob.recv_text(), "hi everyone");
}

#[test]
fn test_handle_commands_from_other_thread() {
	let server = TestServer::start(test_config());
	let mut alice = TestClient::connect(server.addr());
	let mut bob = TestClient::connect(server.addr());
	server.next_event();
	server.next_event();

	let handle = server.handle.clone();
	let alice_id = alice.id();
	thread::spawn(move || {
		handle.broadcast("to all").unwrap();
		handle.send(alice_id, "only alice").unwrap();
	})
	.join()
	.unwrap();

	assert_eq!(alice.recv_text(), "to all");
	assert_eq!(alice.recv_text(), "only alice");
	assert_eq!(bob.recv_text(), "to all");

	server.handle.broadcast_except(alice_id, "not alice").unwrap();
	assert_eq!(bob.recv_text(), "not alice");
}

#[test]
fn test_server_initiated_close() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());
	let id = client.id();
	server.next_event();

	server.handle.close(id, CloseCode::Other(4000), "kicked").unwrap();
	let close = client.recv_close().unwrap();
	assert_eq!(close.code, CloseCode::Other(4000));
	assert_eq!(close.reason, "kicked");

	client.send_close(CloseCode::Other(4000), "");
	client.expect_eof();
	assert_eq!(server.next_event(), Event::Disconnected(id));
}

#[test]
fn test_unanswered_close_times_out() {
	let server = TestServer::start(test_config().close_timeout(Duration::from_millis(100)));
	let mut client = TestClient::connect(server.addr());
	let id = client.id();
	server.next_event();

	server.handle.close(id, CloseCode::Normal, "").unwrap();
	assert_eq!(client.recv_close().unwrap().code, CloseCode::Normal);
	client.expect_eof();
	assert_eq!(server.next_event(), Event::Disconnected(id));
}

#[test]
fn test_handler_failures_keep_loop_running() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());

	client.send_text("fail");
	client.send_text("panic");
	client.send_text("still alive");
	assert_eq!(client.recv_text(), "still alive");

	let mut other = TestClient::connect(server.addr());
	other.send_text("new client");
	assert_eq!(other.recv_text(), "new client");
}

#[test]
fn test_handler_error_can_disconnect() {
	let server = TestServer::start(test_config().disconnect_on_handler_error(true));
	let mut client = TestClient::connect(server.addr());

	client.send_text("fail");
	assert_eq!(client.recv_close().unwrap().code, CloseCode::Internal);
}

#[test]
fn test_connection_limit() {
	let server = TestServer::start(test_config().max_connections(Some(1)));
	let mut first = TestClient::connect(server.addr());

	let mut second = TestClient::raw(server.addr());
	assert!(second.read_to_end().is_empty());

	first.send_text("ok");
	assert_eq!(first.recv_text(), "ok");
}

#[test]
fn test_shutdown_closes_clients() {
	let server = TestServer::start(test_config());
	let mut client = TestClient::connect(server.addr());
	let id = client.id();
	server.next_event();

	let handle = server.handle.clone();
	let events = server.events.clone();
	server.stop();

	assert_eq!(client.recv_close().unwrap().code, CloseCode::GoingAway);
	client.expect_eof();
	assert_eq!(events.recv_timeout(common::TIMEOUT).unwrap(), Event::Disconnected(id));
	assert!(matches!(handle.broadcast("too late"), Err(Error::ServerGone)));
}
