// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Close frame payloads: a 2-byte status code followed by an optional UTF-8
//! reason.

use std::fmt;

use crate::{
	constants::MAX_CONTROL_PAYLOAD,
	error::{FrameError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
	Normal,
	GoingAway,
	Protocol,
	Unsupported,
	NoStatus,
	Abnormal,
	InvalidPayload,
	Policy,
	TooBig,
	MandatoryExtension,
	Internal,
	TlsHandshake,
	Other(u16),
}

impl CloseCode {
	pub fn as_u16(self) -> u16 {
		match self {
			CloseCode::Normal => 1000,
			CloseCode::GoingAway => 1001,
			CloseCode::Protocol => 1002,
			CloseCode::Unsupported => 1003,
			CloseCode::NoStatus => 1005,
			CloseCode::Abnormal => 1006,
			CloseCode::InvalidPayload => 1007,
			CloseCode::Policy => 1008,
			CloseCode::TooBig => 1009,
			CloseCode::MandatoryExtension => 1010,
			CloseCode::Internal => 1011,
			CloseCode::TlsHandshake => 1015,
			CloseCode::Other(code) => code,
		}
	}

	/// Whether an endpoint may put this code into a close frame.
	///
	/// 1005, 1006 and 1015 are reserved for local reporting. Codes below 1000,
	/// 1004 and the unassigned 1016..=2999 range are invalid.
	pub fn is_sendable(self) -> bool {
		matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
	}
}

impl From<u16> for CloseCode {
	fn from(code: u16) -> Self {
		match code {
			1000 => CloseCode::Normal,
			1001 => CloseCode::GoingAway,
			1002 => CloseCode::Protocol,
			1003 => CloseCode::Unsupported,
			1005 => CloseCode::NoStatus,
			1006 => CloseCode::Abnormal,
			1007 => CloseCode::InvalidPayload,
			1008 => CloseCode::Policy,
			1009 => CloseCode::TooBig,
			1010 => CloseCode::MandatoryExtension,
			1011 => CloseCode::Internal,
			1015 => CloseCode::TlsHandshake,
			other => CloseCode::Other(other),
		}
	}
}

impl From<CloseCode> for u16 {
	fn from(code: CloseCode) -> Self {
		code.as_u16()
	}
}

impl fmt::Display for CloseCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_u16())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
	pub code: CloseCode,
	pub reason: String,
}

impl CloseFrame {
	pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
		Self {
			code,
			reason: reason.into(),
		}
	}

	/// Parses a received close payload. An empty payload carries no status.
	pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
		match payload.len() {
			0 => Ok(None),
			1 => Err(FrameError::InvalidClosePayload),
			_ => {
				let raw = u16::from_be_bytes([payload[0], payload[1]]);
				let code = CloseCode::from(raw);
				if !code.is_sendable() {
					return Err(FrameError::InvalidCloseCode(raw));
				}
				let reason = std::str::from_utf8(&payload[2..]).map_err(|_| FrameError::InvalidUtf8)?;
				Ok(Some(Self {
					code,
					reason: reason.to_string(),
				}))
			}
		}
	}

	/// Encodes the payload, cutting the reason at a char boundary so the whole
	/// payload fits a control frame.
	pub fn encode(&self) -> Vec<u8> {
		let mut reason = self.reason.as_str();
		let max_reason = MAX_CONTROL_PAYLOAD - 2;
		if reason.len() > max_reason {
			let mut end = max_reason;
			while !reason.is_char_boundary(end) {
				end -= 1;
			}
			reason = &reason[..end];
		}

		let mut payload = Vec::with_capacity(2 + reason.len());
		payload.extend_from_slice(&self.code.as_u16().to_be_bytes());
		payload.extend_from_slice(reason.as_bytes());
		payload
	}
}
