// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! WebSocket wire protocol (RFC 6455) without any I/O.
//!
//! - [`handshake`] validates the HTTP upgrade request and builds the
//!   `101 Switching Protocols` answer or a rejection.
//! - [`frame`] encodes and decodes single frames.
//! - [`Decoder`] buffers a byte stream and yields frames, tolerating frames
//!   split over several reads.
//! - [`Assembler`] reassembles fragmented messages and validates text.
//!
//! Extensions (permessage-deflate and friends) are not negotiated, so the RSV
//! bits must always be zero.

pub mod assembler;
pub mod close;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;

pub use assembler::Assembler;
pub use close::{CloseCode, CloseFrame};
pub use decoder::Decoder;
pub use error::{FrameError, HandshakeError, Result};
pub use frame::{Frame, Opcode, Role, apply_mask, decode, encode, encode_masked};
pub use handshake::{HandshakeRequest, Headers};
pub use message::{Incoming, Message};
