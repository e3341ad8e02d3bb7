//! The single task that applies commands.
//!
//! Every store mutation and every change to a peer's `authenticated` flag
//! happens here, one event at a time, so they are totally ordered without
//! any locking beyond the store's own per-operation lock.

use crate::command::Command;
use crate::config::SharedConfig;
use crate::connection::{Event, Peer, PeerId};
use crate::error::BlinkError;
use crate::resp::RespValue;
use crate::store::SharedStore;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    config: SharedConfig,
    store: SharedStore,
    peers: HashMap<PeerId, Peer>,
    events: mpsc::Receiver<Event>,
    registrations: mpsc::UnboundedReceiver<Peer>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        config: SharedConfig,
        store: SharedStore,
        events: mpsc::Receiver<Event>,
        registrations: mpsc::UnboundedReceiver<Peer>,
        shutdown: CancellationToken,
    ) -> Self {
        Dispatcher {
            config,
            store,
            peers: HashMap::new(),
            events,
            registrations,
            shutdown,
        }
    }

    /// Run until shutdown, then close every tracked connection.
    pub async fn run(mut self) {
        loop {
            // Registrations are polled before events: a peer is registered
            // before its session is spawned, so it is always known by the
            // time its first event is received.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(peer) = self.registrations.recv() => {
                    debug!(peer = %peer.addr, id = peer.id, "peer registered");
                    self.peers.insert(peer.id, peer);
                }
                Some(event) = self.events.recv() => self.handle_event(event).await,
                else => break,
            }
        }
        self.close_all().await;
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command { peer, command } => self.apply(peer, command).await,
            Event::Reply { peer, reply } => self.reply(peer, &reply).await,
            Event::Closed { peer } => {
                if let Some(peer) = self.peers.remove(&peer) {
                    debug!(peer = %peer.addr, "peer released");
                    peer.close().await;
                }
            }
        }
    }

    async fn apply(&mut self, id: PeerId, command: Command) {
        let Some(peer) = self.peers.get_mut(&id) else {
            debug!(id, "dropping {} from released peer", command.name());
            return;
        };

        let is_auth = matches!(command, Command::Auth { .. });
        if !is_auth && self.config.auth_required() && !peer.authenticated {
            debug!(peer = %peer.addr, "rejected unauthenticated {}", command.name());
            self.reply(id, &BlinkError::NoAuth.to_resp_error()).await;
            return;
        }

        let reply = match command {
            Command::Set { key, value } => {
                self.store.set(key, value).await;
                None
            }
            Command::Get { key } => match self.store.get(&key).await {
                Some(value) => Some(RespValue::bulk_string(value)),
                None => {
                    debug!(key = %String::from_utf8_lossy(&key), "key not found");
                    Some(RespValue::null_bulk_string())
                }
            },
            Command::Delete { key } => {
                self.store.delete(&key).await;
                None
            }
            Command::Auth { username, password } => {
                let valid = self.config.check_credentials(username.as_deref(), &password);
                peer.authenticated = valid;
                if valid {
                    info!(peer = %peer.addr, "client authenticated");
                    Some(RespValue::ok())
                } else {
                    warn!(peer = %peer.addr, "authentication failed");
                    Some(BlinkError::InvalidCredentials.to_resp_error())
                }
            }
        };

        if let Some(reply) = reply {
            self.reply(id, &reply).await;
        }
    }

    /// Write a reply, giving up on the peer if the write fails or does not
    /// finish within the configured timeout.
    async fn reply(&mut self, id: PeerId, reply: &RespValue) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        let limit = Duration::from_millis(self.config.write_timeout_ms);
        let failure = match tokio::time::timeout(limit, peer.reply(reply)).await {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => format!("send error: {e}"),
            Err(_) => format!("write timed out after {limit:?}"),
        };
        if let Some(peer) = self.peers.remove(&id) {
            warn!(peer = %peer.addr, "dropping peer: {failure}");
            peer.close().await;
        }
    }

    async fn close_all(&mut self) {
        info!(peers = self.peers.len(), "closing tracked connections");
        for (_, peer) in self.peers.drain() {
            peer.close().await;
        }
    }
}
