// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Single-threaded WebSocket server.
//!
//! A [`Server`] owns a mio poll loop, the listening socket and every client
//! connection. Application code plugs in through the [`Handler`] trait, whose
//! callbacks run on the loop thread, and reaches the loop from other threads
//! through a cloneable [`ServerHandle`].
//!
//! ```no_run
//! use reifydb_ws_server::{Client, Handler, HandlerResult, Message, Server, ServerConfig, ServerHandle};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//! 	fn on_message(&mut self, client: &mut Client, message: Message, _: &ServerHandle) -> HandlerResult {
//! 		client.send(message)?;
//! 		Ok(())
//! 	}
//! }
//!
//! let mut server = Server::bind(ServerConfig::new().bind_addr("127.0.0.1:8091"), Echo).unwrap();
//! server.run().unwrap();
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handle;
pub mod handler;
mod listener;
pub mod registry;
pub mod server;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientId, ClientState, Transport};
pub use config::ServerConfig;
pub use error::{Error, Result, SendError};
pub use handle::ServerHandle;
pub use handler::{Handler, HandlerError, HandlerResult};
pub use registry::{BroadcastReport, Registry};
pub use reifydb_ws_protocol::{CloseCode, CloseFrame, Message, Opcode};
pub use server::Server;
