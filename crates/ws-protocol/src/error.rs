// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use crate::{close::CloseCode, frame::Opcode};

pub type Result<T> = std::result::Result<T, FrameError>;

/// Violations of the framing rules detected while decoding client traffic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
	#[error("invalid opcode {0:#x}")]
	InvalidOpcode(u8),

	#[error("reserved bits set ({0:#04x}) without a negotiated extension")]
	ReservedBits(u8),

	#[error("client frame is not masked")]
	UnmaskedFrame,

	#[error("server frame must not be masked")]
	MaskedFrame,

	#[error("control frame {0:?} is fragmented")]
	FragmentedControl(Opcode),

	#[error("control frame payload of {len} bytes exceeds 125")]
	ControlTooLarge {
		len: u64,
	},

	#[error("frame payload of {len} bytes exceeds limit of {max}")]
	PayloadTooLarge {
		len: u64,
		max: usize,
	},

	#[error("64-bit payload length has the most significant bit set")]
	InvalidLength,

	#[error("continuation frame without a message in progress")]
	UnexpectedContinuation,

	#[error("new data frame while a fragmented message is in progress")]
	InterleavedMessage,

	#[error("message of {len} bytes exceeds limit of {max}")]
	MessageTooLarge {
		len: usize,
		max: usize,
	},

	#[error("text message is not valid UTF-8")]
	InvalidUtf8,

	#[error("close frame payload of one byte")]
	InvalidClosePayload,

	#[error("close code {0} is not allowed on the wire")]
	InvalidCloseCode(u16),
}

impl FrameError {
	/// Status code used when closing a connection because of this error.
	pub fn close_code(&self) -> CloseCode {
		match self {
			FrameError::InvalidUtf8 => CloseCode::InvalidPayload,
			FrameError::PayloadTooLarge {
				..
			}
			| FrameError::MessageTooLarge {
				..
			} => CloseCode::TooBig,
			_ => CloseCode::Protocol,
		}
	}
}

/// Reasons an upgrade request is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
	#[error("malformed HTTP request: {0}")]
	Malformed(String),

	#[error("method {0} not allowed, expected GET")]
	MethodNotAllowed(String),

	#[error("unsupported HTTP version, expected HTTP/1.1")]
	HttpVersion,

	#[error("missing {0} header")]
	MissingHeader(&'static str),

	#[error("invalid {name} header: {value}")]
	InvalidHeader {
		name: &'static str,
		value: String,
	},

	#[error("Sec-WebSocket-Key is not a base64 encoded 16 byte nonce")]
	InvalidKey,

	#[error("unsupported Sec-WebSocket-Version {0}, expected 13")]
	UnsupportedVersion(String),

	#[error("request headers of {len} bytes exceed limit of {max}")]
	TooLarge {
		len: usize,
		max: usize,
	},

	#[error("too many request headers")]
	TooManyHeaders,
}

impl HandshakeError {
	/// HTTP status line parts sent back for this rejection.
	pub fn status(&self) -> (u16, &'static str) {
		match self {
			HandshakeError::MethodNotAllowed(_) => (405, "Method Not Allowed"),
			HandshakeError::UnsupportedVersion(_) => (426, "Upgrade Required"),
			HandshakeError::TooLarge {
				..
			}
			| HandshakeError::TooManyHeaders => (431, "Request Header Fields Too Large"),
			_ => (400, "Bad Request"),
		}
	}
}
