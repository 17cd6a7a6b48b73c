// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use crate::{
	close::CloseFrame,
	error::{FrameError, Result},
	frame::{Frame, Opcode},
	message::{Incoming, Message},
};

/// Reassembles fragmented messages.
///
/// A non-final text or binary frame opens the fragment buffer, continuation
/// frames append to it, and the final continuation completes the message with
/// the opcode of the first frame. Control frames may arrive in between and
/// leave the buffer untouched.
#[derive(Debug)]
pub struct Assembler {
	fragment: Option<Fragment>,
	max_message_size: usize,
	validate_utf8: bool,
}

#[derive(Debug)]
struct Fragment {
	opcode: Opcode,
	payload: Vec<u8>,
}

impl Assembler {
	pub fn new(max_message_size: usize) -> Self {
		Self {
			fragment: None,
			max_message_size,
			validate_utf8: true,
		}
	}

	pub fn validate_utf8(mut self, validate: bool) -> Self {
		self.validate_utf8 = validate;
		self
	}

	/// True while a fragmented message is waiting for its final frame.
	pub fn in_progress(&self) -> bool {
		self.fragment.is_some()
	}

	pub fn push(&mut self, frame: Frame) -> Result<Option<Incoming>> {
		match frame.opcode {
			Opcode::Ping => Ok(Some(Incoming::Ping(frame.payload))),
			Opcode::Pong => Ok(Some(Incoming::Pong(frame.payload))),
			Opcode::Close => Ok(Some(Incoming::Close(CloseFrame::parse(&frame.payload)?))),
			Opcode::Text | Opcode::Binary => {
				if self.fragment.is_some() {
					return Err(FrameError::InterleavedMessage);
				}
				self.check_size(frame.payload.len())?;

				if frame.fin {
					return self.complete(frame.opcode, frame.payload).map(Some);
				}

				self.fragment = Some(Fragment {
					opcode: frame.opcode,
					payload: frame.payload,
				});
				Ok(None)
			}
			Opcode::Continuation => {
				let Some(fragment) = self.fragment.as_mut() else {
					return Err(FrameError::UnexpectedContinuation);
				};

				let len = fragment.payload.len() + frame.payload.len();
				if len > self.max_message_size {
					self.fragment = None;
					return Err(FrameError::MessageTooLarge {
						len,
						max: self.max_message_size,
					});
				}
				fragment.payload.extend_from_slice(&frame.payload);

				if !frame.fin {
					return Ok(None);
				}

				match self.fragment.take() {
					Some(Fragment {
						opcode,
						payload,
					}) => self.complete(opcode, payload).map(Some),
					None => Ok(None),
				}
			}
		}
	}

	pub fn reset(&mut self) {
		self.fragment = None;
	}

	fn check_size(&self, len: usize) -> Result<()> {
		if len > self.max_message_size {
			return Err(FrameError::MessageTooLarge {
				len,
				max: self.max_message_size,
			});
		}
		Ok(())
	}

	fn complete(&self, opcode: Opcode, payload: Vec<u8>) -> Result<Incoming> {
		let message = match opcode {
			Opcode::Text if self.validate_utf8 => {
				Message::Text(String::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)?)
			}
			Opcode::Text => Message::Text(String::from_utf8_lossy(&payload).into_owned()),
			_ => Message::Binary(payload),
		};
		Ok(Incoming::Message(message))
	}
}
