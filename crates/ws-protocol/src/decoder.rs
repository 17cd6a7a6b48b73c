// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use crate::{
	error::Result,
	frame::{Frame, Role, decode},
};

/// Receive buffer that turns a byte stream into frames.
///
/// Bytes from any number of reads are appended with [`Decoder::extend`];
/// [`Decoder::next_frame`] yields frames until only a partial frame is left,
/// which stays buffered for the next read.
#[derive(Debug)]
pub struct Decoder {
	buffer: Vec<u8>,
	// start of the undecoded region
	offset: usize,
	role: Role,
	max_payload: usize,
}

impl Decoder {
	pub fn new(role: Role, max_payload: usize) -> Self {
		Self {
			buffer: Vec::new(),
			offset: 0,
			role,
			max_payload,
		}
	}

	pub fn extend(&mut self, bytes: &[u8]) {
		if self.offset > 0 {
			self.buffer.drain(..self.offset);
			self.offset = 0;
		}
		self.buffer.extend_from_slice(bytes);
	}

	pub fn next_frame(&mut self) -> Result<Option<Frame>> {
		match decode(&self.buffer[self.offset..], self.role, self.max_payload)? {
			Some((frame, consumed)) => {
				self.offset += consumed;
				if self.offset == self.buffer.len() {
					self.buffer.clear();
					self.offset = 0;
				}
				Ok(Some(frame))
			}
			None => Ok(None),
		}
	}

	/// Bytes received but not yet decoded.
	pub fn buffered(&self) -> usize {
		self.buffer.len() - self.offset
	}

	pub fn is_empty(&self) -> bool {
		self.buffered() == 0
	}

	pub fn clear(&mut self) {
		self.buffer.clear();
		self.offset = 0;
	}
}
