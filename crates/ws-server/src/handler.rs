// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use reifydb_ws_protocol::Message;

use crate::{client::Client, handle::ServerHandle};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Application callbacks, invoked on the event loop thread.
///
/// Callbacks must not block: while one runs no other client is served. An
/// error or panic is logged and the loop keeps going; with
/// `disconnect_on_handler_error` the offending client is closed with 1011.
pub trait Handler {
	/// The upgrade completed and the client is registered.
	fn on_connect(&mut self, client: &mut Client, server: &ServerHandle) -> HandlerResult {
		let _ = (client, server);
		Ok(())
	}

	/// A complete text or binary message arrived.
	fn on_message(&mut self, client: &mut Client, message: Message, server: &ServerHandle) -> HandlerResult;

	/// The client was removed. Called exactly once per registered client,
	/// whatever ended the connection.
	fn on_disconnect(&mut self, client: &Client, server: &ServerHandle) {
		let _ = (client, server);
	}
}
