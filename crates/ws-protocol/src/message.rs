// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use crate::{close::CloseFrame, frame::Opcode};

/// A complete application message, reassembled from one or more frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	Text(String),
	Binary(Vec<u8>),
}

impl Message {
	pub fn opcode(&self) -> Opcode {
		match self {
			Message::Text(_) => Opcode::Text,
			Message::Binary(_) => Opcode::Binary,
		}
	}

	pub fn as_bytes(&self) -> &[u8] {
		match self {
			Message::Text(text) => text.as_bytes(),
			Message::Binary(data) => data,
		}
	}

	pub fn into_bytes(self) -> Vec<u8> {
		match self {
			Message::Text(text) => text.into_bytes(),
			Message::Binary(data) => data,
		}
	}

	pub fn as_text(&self) -> Option<&str> {
		match self {
			Message::Text(text) => Some(text),
			Message::Binary(_) => None,
		}
	}

	pub fn len(&self) -> usize {
		self.as_bytes().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl From<String> for Message {
	fn from(text: String) -> Self {
		Message::Text(text)
	}
}

impl From<&str> for Message {
	fn from(text: &str) -> Self {
		Message::Text(text.to_string())
	}
}

impl From<Vec<u8>> for Message {
	fn from(data: Vec<u8>) -> Self {
		Message::Binary(data)
	}
}

impl From<&[u8]> for Message {
	fn from(data: &[u8]) -> Self {
		Message::Binary(data.to_vec())
	}
}

/// Everything a peer can deliver once frames have been reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
	Message(Message),
	Ping(Vec<u8>),
	Pong(Vec<u8>),
	Close(Option<CloseFrame>),
}
