// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! HTTP -> WebSocket upgrade handshake.

use std::collections::BTreeMap;

use base64::{Engine, prelude::BASE64_STANDARD};
use sha1::{Digest, Sha1};

use crate::{
	constants::{WEBSOCKET_GUID, WEBSOCKET_VERSION},
	error::HandshakeError,
};

const MAX_HEADERS: usize = 64;

/// Request headers keyed by lower-cased name. Repeated headers are joined with
/// `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
	entries: BTreeMap<String, String>,
}

impl Headers {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, name: &str, value: &str) {
		self.entries
			.entry(name.to_ascii_lowercase())
			.and_modify(|existing| {
				existing.push_str(", ");
				existing.push_str(value);
			})
			.or_insert_with(|| value.to_string());
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.entries.contains_key(&name.to_ascii_lowercase())
	}

	/// True if the comma-separated header `name` contains `token`,
	/// compared case-insensitively.
	pub fn has_token(&self, name: &str, token: &str) -> bool {
		self.get(name).is_some_and(|value| value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
	pub method: String,
	pub uri: String,
	pub headers: Headers,
	pub key: String,
}

impl HandshakeRequest {
	pub fn accept_key(&self) -> String {
		accept_key(&self.key)
	}

	/// Request target without the query string.
	pub fn path(&self) -> &str {
		self.uri.split_once('?').map_or(self.uri.as_str(), |(path, _)| path)
	}

	pub fn query(&self) -> Option<&str> {
		self.uri.split_once('?').map(|(_, query)| query)
	}
}

pub fn find_header_end(buf: &[u8]) -> Option<usize> {
	let pattern = b"\r\n\r\n";
	buf.windows(4).position(|w| w == pattern).map(|i| i + 4)
}

/// Parses and validates an upgrade request at the start of `buf`.
///
/// Returns `Ok(None)` while the header block is incomplete. On success the
/// second value is the length of the header block; anything after it already
/// belongs to the frame stream.
pub fn process(buf: &[u8], max_len: usize) -> Result<Option<(HandshakeRequest, usize)>, HandshakeError> {
	let Some(end) = find_header_end(buf) else {
		if buf.len() > max_len {
			return Err(HandshakeError::TooLarge {
				len: buf.len(),
				max: max_len,
			});
		}
		return Ok(None);
	};

	if end > max_len {
		return Err(HandshakeError::TooLarge {
			len: end,
			max: max_len,
		});
	}

	let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
	let mut req = httparse::Request::new(&mut raw_headers);
	let status = req.parse(&buf[..end]).map_err(|e| match e {
		httparse::Error::TooManyHeaders => HandshakeError::TooManyHeaders,
		other => HandshakeError::Malformed(other.to_string()),
	})?;

	if status.is_partial() {
		return Err(HandshakeError::Malformed("incomplete request head".to_string()));
	}

	let method = req.method.unwrap_or_default().to_string();
	let uri = req.path.unwrap_or_default().to_string();

	if req.version != Some(1) {
		return Err(HandshakeError::HttpVersion);
	}
	if method != "GET" {
		return Err(HandshakeError::MethodNotAllowed(method));
	}

	let mut headers = Headers::new();
	for header in req.headers.iter() {
		let value = std::str::from_utf8(header.value).map_err(|_| HandshakeError::Malformed(format!(
			"non UTF-8 value in header {}",
			header.name
		)))?;
		headers.insert(header.name, value.trim());
	}

	validate(&headers)?;

	let key = headers.get("sec-websocket-key").unwrap_or_default().to_string();

	Ok(Some((
		HandshakeRequest {
			method,
			uri,
			headers,
			key,
		},
		end,
	)))
}

fn validate(headers: &Headers) -> Result<(), HandshakeError> {
	let upgrade = headers.get("upgrade").ok_or(HandshakeError::MissingHeader("Upgrade"))?;
	if !headers.has_token("upgrade", "websocket") {
		return Err(HandshakeError::InvalidHeader {
			name: "Upgrade",
			value: upgrade.to_string(),
		});
	}

	let connection = headers.get("connection").ok_or(HandshakeError::MissingHeader("Connection"))?;
	if !headers.has_token("connection", "upgrade") {
		return Err(HandshakeError::InvalidHeader {
			name: "Connection",
			value: connection.to_string(),
		});
	}

	let key = headers.get("sec-websocket-key").ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
	match BASE64_STANDARD.decode(key) {
		Ok(nonce) if nonce.len() == 16 => {}
		_ => return Err(HandshakeError::InvalidKey),
	}

	let version =
		headers.get("sec-websocket-version").ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Version"))?;
	if version != WEBSOCKET_VERSION {
		return Err(HandshakeError::UnsupportedVersion(version.to_string()));
	}

	Ok(())
}

pub fn accept_key(sec_websocket_key: &str) -> String {
	let mut sha1 = Sha1::new();
	sha1.update(sec_websocket_key.as_bytes());
	sha1.update(WEBSOCKET_GUID.as_bytes());
	BASE64_STANDARD.encode(sha1.finalize())
}

pub fn switching_protocols(accept: &str) -> Vec<u8> {
	format!(
		"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
		accept
	)
	.into_bytes()
}

/// Error response sent before dropping a connection whose upgrade failed.
pub fn rejection(error: &HandshakeError) -> Vec<u8> {
	let (code, reason) = error.status();
	let body = error.to_string();
	let mut response = format!("HTTP/1.1 {} {}\r\nConnection: close\r\n", code, reason);
	if let HandshakeError::UnsupportedVersion(_) = error {
		response.push_str("Sec-WebSocket-Version: 13\r\n");
	}
	response.push_str(&format!(
		"Content-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
		body.len(),
		body
	));
	response.into_bytes()
}

/// Builds a client upgrade request. Used by tools and tests talking to the
/// server.
pub fn request(host: &str, uri: &str, key: &str) -> Vec<u8> {
	format!(
		"GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
		uri, host, key
	)
	.into_bytes()
}
