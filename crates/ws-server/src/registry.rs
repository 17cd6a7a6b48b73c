// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	collections::{HashMap, hash_map},
	time::{Duration, Instant},
};

use mio::net::TcpStream;
use reifydb_ws_protocol::Message;

use crate::{
	client::{Client, ClientId, ClientState, Transport},
	error::SendError,
};

/// Outcome of a broadcast. Clients listed in `failed` are closed by the
/// server once the broadcast returns.
#[derive(Debug, Default)]
pub struct BroadcastReport {
	pub delivered: usize,
	pub failed: Vec<(ClientId, SendError)>,
}

impl BroadcastReport {
	pub fn is_complete(&self) -> bool {
		self.failed.is_empty()
	}
}

/// Clients that completed the upgrade, keyed by peer address.
pub struct Registry<S = TcpStream> {
	clients: HashMap<ClientId, Client<S>>,
}

impl<S> Default for Registry<S> {
	fn default() -> Self {
		Self {
			clients: HashMap::new(),
		}
	}
}

impl<S: Transport> Registry<S> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.clients.len()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.is_empty()
	}

	pub fn contains(&self, id: &ClientId) -> bool {
		self.clients.contains_key(id)
	}

	pub fn get(&self, id: &ClientId) -> Option<&Client<S>> {
		self.clients.get(id)
	}

	pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut Client<S>> {
		self.clients.get_mut(id)
	}

	/// Returns the client previously registered under the same id, if any.
	pub fn insert(&mut self, client: Client<S>) -> Option<Client<S>> {
		self.clients.insert(client.id(), client)
	}

	pub fn remove(&mut self, id: &ClientId) -> Option<Client<S>> {
		self.clients.remove(id)
	}

	pub fn iter(&self) -> hash_map::Values<'_, ClientId, Client<S>> {
		self.clients.values()
	}

	pub fn iter_mut(&mut self) -> hash_map::ValuesMut<'_, ClientId, Client<S>> {
		self.clients.values_mut()
	}

	/// Snapshot of the registered ids, safe to hold while clients are
	/// removed.
	pub fn ids(&self) -> Vec<ClientId> {
		self.clients.keys().copied().collect()
	}

	pub fn send(&mut self, id: &ClientId, message: impl Into<Message>) -> Result<usize, SendError> {
		match self.clients.get_mut(id) {
			Some(client) => client.send(message),
			None => Err(SendError::UnknownClient(*id)),
		}
	}

	pub fn broadcast(&mut self, message: &Message) -> BroadcastReport {
		self.broadcast_except(message, None)
	}

	/// Sends `message` to every open client except `except`. A failing
	/// client never stops delivery to the others.
	pub fn broadcast_except(&mut self, message: &Message, except: Option<ClientId>) -> BroadcastReport {
		let mut report = BroadcastReport::default();
		for (id, client) in self.clients.iter_mut() {
			if Some(*id) == except {
				continue;
			}
			match client.send_frame(message.opcode(), message.as_bytes()) {
				Ok(_) => report.delivered += 1,
				Err(err) => {
					tracing::debug!(client = %id, "broadcast delivery failed: {}", err);
					report.failed.push((*id, err));
				}
			}
		}
		report
	}

	/// Open clients that received nothing for at least `timeout`.
	pub fn idle(&self, now: Instant, timeout: Duration) -> Vec<ClientId> {
		self.clients
			.values()
			.filter(|c| c.state() == ClientState::Open && now.saturating_duration_since(c.last_received()) >= timeout)
			.map(Client::id)
			.collect()
	}

	/// Closing clients whose peer did not answer within `timeout`.
	pub fn close_expired(&self, now: Instant, timeout: Duration) -> Vec<ClientId> {
		self.clients
			.values()
			.filter(|c| {
				c.state() == ClientState::Closing
					&& c.closing_since().is_some_and(|since| now.saturating_duration_since(since) >= timeout)
			})
			.map(Client::id)
			.collect()
	}

	/// Clients whose connection ended and that wait to be removed.
	pub fn closed(&self) -> Vec<ClientId> {
		self.clients.values().filter(|c| c.state() == ClientState::Closed).map(Client::id).collect()
	}
}
