// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Single frame encoding and decoding.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use crate::{
	constants::{
		FIN_BIT, LENGTH_16, LENGTH_64, LENGTH_MASK, MASK_BIT, MAX_CONTROL_PAYLOAD, OPCODE_BINARY, OPCODE_CLOSE,
		OPCODE_CONTINUATION, OPCODE_MASK, OPCODE_PING, OPCODE_PONG, OPCODE_TEXT, RSV_MASK,
	},
	error::{FrameError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
	Continuation,
	Text,
	Binary,
	Close,
	Ping,
	Pong,
}

impl Opcode {
	pub fn from_u8(value: u8) -> Result<Self> {
		match value {
			OPCODE_CONTINUATION => Ok(Opcode::Continuation),
			OPCODE_TEXT => Ok(Opcode::Text),
			OPCODE_BINARY => Ok(Opcode::Binary),
			OPCODE_CLOSE => Ok(Opcode::Close),
			OPCODE_PING => Ok(Opcode::Ping),
			OPCODE_PONG => Ok(Opcode::Pong),
			other => Err(FrameError::InvalidOpcode(other)),
		}
	}

	pub fn as_u8(self) -> u8 {
		match self {
			Opcode::Continuation => OPCODE_CONTINUATION,
			Opcode::Text => OPCODE_TEXT,
			Opcode::Binary => OPCODE_BINARY,
			Opcode::Close => OPCODE_CLOSE,
			Opcode::Ping => OPCODE_PING,
			Opcode::Pong => OPCODE_PONG,
		}
	}

	pub fn is_control(self) -> bool {
		matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
	}
}

/// Which end of the connection is decoding. Servers demand masked frames,
/// clients demand unmasked ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Server,
	Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub fin: bool,
	pub opcode: Opcode,
	pub mask: Option<[u8; 4]>,
	/// Always unmasked.
	pub payload: Vec<u8>,
}

impl Frame {
	pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
		Self {
			fin: true,
			opcode,
			mask: None,
			payload: payload.into(),
		}
	}

	pub fn with_fin(mut self, fin: bool) -> Self {
		self.fin = fin;
		self
	}

	pub fn with_mask(mut self, key: [u8; 4]) -> Self {
		self.mask = Some(key);
		self
	}

	pub fn encode(&self) -> Vec<u8> {
		match self.mask {
			Some(key) => encode_masked(self.opcode, &self.payload, self.fin, key),
			None => encode(self.opcode, &self.payload, self.fin),
		}
	}
}

/// XORs `payload` in place with the cycling 4-byte key. Applying it twice
/// restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
	for (i, byte) in payload.iter_mut().enumerate() {
		*byte ^= key[i & 3];
	}
}

/// Decodes one frame from the start of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only part of a frame, otherwise the
/// frame and the number of bytes it occupied. The payload length is checked
/// against `max_payload` as soon as the length field is readable, so a hostile
/// length never causes buffering.
pub fn decode(buf: &[u8], role: Role, max_payload: usize) -> Result<Option<(Frame, usize)>> {
	if buf.len() < 2 {
		return Ok(None);
	}

	let first = buf[0];
	let second = buf[1];

	let rsv = first & RSV_MASK;
	if rsv != 0 {
		return Err(FrameError::ReservedBits(rsv));
	}

	let fin = first & FIN_BIT != 0;
	let opcode = Opcode::from_u8(first & OPCODE_MASK)?;
	let masked = second & MASK_BIT != 0;

	match (role, masked) {
		(Role::Server, false) => return Err(FrameError::UnmaskedFrame),
		(Role::Client, true) => return Err(FrameError::MaskedFrame),
		_ => {}
	}

	let base_len = second & LENGTH_MASK;
	let mut header_len = 2;

	let payload_len: u64 = match base_len {
		LENGTH_16 => {
			if buf.len() < 4 {
				return Ok(None);
			}
			header_len = 4;
			u16::from_be_bytes([buf[2], buf[3]]) as u64
		}
		LENGTH_64 => {
			if buf.len() < 10 {
				return Ok(None);
			}
			header_len = 10;
			let mut raw = [0u8; 8];
			raw.copy_from_slice(&buf[2..10]);
			let len = u64::from_be_bytes(raw);
			if len & (1 << 63) != 0 {
				return Err(FrameError::InvalidLength);
			}
			len
		}
		len => len as u64,
	};

	if opcode.is_control() {
		if !fin {
			return Err(FrameError::FragmentedControl(opcode));
		}
		if payload_len > MAX_CONTROL_PAYLOAD as u64 {
			return Err(FrameError::ControlTooLarge {
				len: payload_len,
			});
		}
	}

	if payload_len > max_payload as u64 {
		return Err(FrameError::PayloadTooLarge {
			len: payload_len,
			max: max_payload,
		});
	}

	let mask = if masked {
		if buf.len() < header_len + 4 {
			return Ok(None);
		}
		let key = [buf[header_len], buf[header_len + 1], buf[header_len + 2], buf[header_len + 3]];
		header_len += 4;
		Some(key)
	} else {
		None
	};

	// bounded by max_payload above
	let payload_len = payload_len as usize;
	let total = header_len + payload_len;
	if buf.len() < total {
		return Ok(None);
	}

	let mut payload = buf[header_len..total].to_vec();
	if let Some(key) = mask {
		apply_mask(&mut payload, key);
	}

	Ok(Some((
		Frame {
			fin,
			opcode,
			mask,
			payload,
		},
		total,
	)))
}

fn write_header(out: &mut Vec<u8>, opcode: Opcode, len: usize, fin: bool, mask_bit: u8) {
	let first = if fin {
		FIN_BIT | opcode.as_u8()
	} else {
		opcode.as_u8()
	};
	out.push(first);

	if len < LENGTH_16 as usize {
		out.push(mask_bit | len as u8);
	} else if len <= u16::MAX as usize {
		out.push(mask_bit | LENGTH_16);
		out.extend_from_slice(&(len as u16).to_be_bytes());
	} else {
		out.push(mask_bit | LENGTH_64);
		out.extend_from_slice(&(len as u64).to_be_bytes());
	}
}

/// Number of header bytes an unmasked frame with `len` payload bytes needs.
pub fn header_len(len: usize) -> usize {
	if len < LENGTH_16 as usize {
		2
	} else if len <= u16::MAX as usize {
		4
	} else {
		10
	}
}

/// Encodes a server-originated frame. Server frames are never masked.
pub fn encode(opcode: Opcode, payload: &[u8], fin: bool) -> Vec<u8> {
	let mut out = Vec::with_capacity(header_len(payload.len()) + payload.len());
	write_header(&mut out, opcode, payload.len(), fin, 0);
	out.extend_from_slice(payload);
	out
}

/// Encodes a client-originated frame masked with `key`.
pub fn encode_masked(opcode: Opcode, payload: &[u8], fin: bool, key: [u8; 4]) -> Vec<u8> {
	let mut out = Vec::with_capacity(header_len(payload.len()) + 4 + payload.len());
	write_header(&mut out, opcode, payload.len(), fin, MASK_BIT);
	out.extend_from_slice(&key);
	let start = out.len();
	out.extend_from_slice(payload);
	apply_mask(&mut out[start..], key);
	out
}
