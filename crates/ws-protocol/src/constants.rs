// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Wire-level constants shared by the codec and the handshake.

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

pub const FIN_BIT: u8 = 0x80;
pub const RSV_MASK: u8 = 0x70;
pub const OPCODE_MASK: u8 = 0x0F;
pub const MASK_BIT: u8 = 0x80;
pub const LENGTH_MASK: u8 = 0x7F;

/// Base length values announcing an extended length field.
pub const LENGTH_16: u8 = 126;
pub const LENGTH_64: u8 = 127;

pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Bytes read from a socket per read call.
pub const READ_CHUNK_SIZE: usize = 65536;

pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WEBSOCKET_VERSION: &str = "13";

/// Largest possible header: 2 bytes + 8 bytes extended length + 4 bytes mask.
pub const MAX_HEADER_LEN: usize = 14;
