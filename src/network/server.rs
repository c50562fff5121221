//! Server connection manager
//!
//! Event-driven, single-threaded tick over a mio poll set:
//! - Accept: admit clients and exchange roster notices immediately
//! - Read: split received bytes into frames and queue them inbound
//! - Write: route the outbound queue into frame buffers, then flush
//!
//! Every socket operation is non-blocking and the poll uses a zero
//! timeout, so a tick always returns promptly.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use super::client::{ClientRecord, DisconnectReason, Staged};
use super::config::{ConnectionConfig, Role};
use super::directory::{Directory, LISTENER};
use super::hooks::Hooks;
use super::stats::{bump, ServerStats};
use crate::core::{ClientId, Identities, MessageQueue};
use crate::error::{Error, Result};
use crate::protocol::{FrameBuffer, Message, Notice, Route};

/// Server-wide lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    ShuttingDown,
    Closed,
}

/// Owns the listener, the poll set and every connected client.
///
/// Not thread-safe by itself; run it on one thread and talk to it through
/// the message queues.
pub struct ConnectionManager {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    clients: Directory,
    config: ConnectionConfig,
    ids: Arc<Identities>,
    inbound: Arc<MessageQueue>,
    outbound: Arc<MessageQueue>,
    hooks: Hooks,
    stats: Arc<ServerStats>,
    state: ServerState,
}

impl ConnectionManager {
    /// Bind the listener and register it with a fresh poll set.
    pub fn bind(
        config: ConnectionConfig,
        ids: Arc<Identities>,
        inbound: Arc<MessageQueue>,
        outbound: Arc<MessageQueue>,
        mut hooks: Hooks,
        stats: Arc<ServerStats>,
    ) -> Result<Self> {
        config.validate()?;
        if config.role != Role::Server {
            return Err(Error::UnsupportedRole);
        }

        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.socket_addr())?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        info!(
            "listening on {} (max {} clients, {} byte buffers)",
            local_addr, config.max_clients, config.buffer_size
        );
        hooks.ready(ClientId::none());

        Ok(Self {
            poll,
            events: Events::with_capacity(config.poll_capacity()),
            listener: Some(listener),
            local_addr,
            clients: Directory::new(config.poll_capacity()),
            config,
            ids,
            inbound,
            outbound,
            hooks,
            stats,
            state: ServerState::Listening,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn state(&self) -> ServerState {
        self.state
    }

    #[inline]
    pub fn is_listening(&self) -> bool {
        self.state == ServerState::Listening
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.ids()
    }

    pub fn is_connected(&self, id: ClientId) -> bool {
        self.clients.contains(id)
    }

    /// One full cycle: accept and read, then route and flush.
    pub fn tick(&mut self) -> Result<()> {
        self.read()?;
        self.send()
    }

    /// Poll without blocking, admit new clients and read ready sockets.
    pub fn read(&mut self) -> Result<()> {
        if !self.is_listening() {
            return Ok(());
        }

        match self.poll.poll(&mut self.events, Some(Duration::ZERO)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        for token in ready {
            if token == LISTENER {
                self.accept_all()?;
            } else if let Some(id) = self.clients.id_for_token(token) {
                self.service(id);
            }
        }
        Ok(())
    }

    /// Route the outbound queue, then flush every client.
    pub fn send(&mut self) -> Result<()> {
        if !self.is_listening() {
            return Ok(());
        }

        let mut failed = Vec::new();
        while let Some(message) = self.outbound.try_dequeue() {
            self.route(&message, &mut failed);
        }

        for record in self.clients.iter_mut() {
            if let Err(reason) = record.flush(&self.stats) {
                failed.push((record.id, reason));
            }
        }

        for (id, reason) in failed {
            self.disconnect_client(id, reason);
        }
        Ok(())
    }

    fn route(&mut self, message: &Message, failed: &mut Vec<(ClientId, DisconnectReason)>) {
        let encode = |buffer: &mut FrameBuffer| message.encode_into(buffer);
        let stats = &self.stats;
        let mut delivered = false;

        match message.route() {
            Route::Unicast(callee) => match self.clients.get_mut(callee) {
                Some(record) => {
                    delivered = stage(record, stats, encode, failed);
                }
                None => {
                    debug!("{} for unknown callee {} dropped", message.rpc, callee);
                    bump(&stats.messages_dropped, 1);
                }
            },
            route @ (Route::Broadcast | Route::Lifecycle) => {
                if route == Route::Lifecycle {
                    trace!("object event {} on {}", message.rpc, message.target);
                }
                for record in self.clients.iter_mut() {
                    delivered |= stage(record, stats, encode, failed);
                }
            }
        }

        if delivered {
            bump(&stats.messages_routed, 1);
        }
    }

    fn accept_all(&mut self) -> Result<()> {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return Ok(());
            };
            match listener.accept() {
                Ok((stream, addr)) => {
                    if self.clients.is_full() {
                        warn!("server full, rejecting {}", addr);
                        bump(&self.stats.connections_rejected, 1);
                        continue;
                    }
                    self.admit(stream, addr)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_per_connection(e.kind()) => {
                    debug!("dropped a connection before accept: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!("accept failed: {}", e);
                    return Ok(());
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let id = self.ids.clients.allocate()?;
        let record = match ClientRecord::new(id, stream, addr, self.config.buffer_size) {
            Ok(record) => record,
            Err(e) => {
                warn!("failed to set up {}: {}", addr, e);
                return Ok(());
            }
        };
        self.clients.insert(self.poll.registry(), record)?;

        bump(&self.stats.connections_total, 1);
        bump(&self.stats.connections_active, 1);
        info!("{} connected from {}", id, addr);

        self.sync_roster(id);
        Ok(())
    }

    /// Exchange connect notices between `joined` and every peer, and
    /// deliver them before any application traffic.
    fn sync_roster(&mut self, joined: ClientId) {
        let peers: Vec<ClientId> = self
            .clients
            .ids()
            .into_iter()
            .filter(|&id| id != joined)
            .collect();
        let stats = &self.stats;
        let mut failed = Vec::new();

        if let Some(record) = self.clients.get_mut(joined) {
            let notices = std::iter::once(Notice::LocalClientConnected(joined))
                .chain(peers.iter().map(|&peer| Notice::ClientConnected(peer)));
            for notice in notices {
                stage(record, stats, |buffer| notice.encode_into(buffer), &mut failed);
            }
        }

        for &peer in &peers {
            if let Some(record) = self.clients.get_mut(peer) {
                let notice = Notice::ClientConnected(joined);
                stage(record, stats, |buffer| notice.encode_into(buffer), &mut failed);
            }
        }

        for id in std::iter::once(joined).chain(peers.iter().copied()) {
            if let Some(record) = self.clients.get_mut(id) {
                if let Err(reason) = record.flush(stats) {
                    failed.push((id, reason));
                }
            }
        }

        self.hooks.client_connected(joined);
        for (id, reason) in failed {
            self.disconnect_client(id, reason);
        }
    }

    fn service(&mut self, id: ClientId) {
        let Some(record) = self.clients.get_mut(id) else {
            return;
        };
        let ids = &self.ids;
        let inbound = &self.inbound;
        let stats = &self.stats;

        let result = record.receive(stats, |frame| {
            let message = Message::decode(id, frame, ids)?;
            bump(&stats.messages_received, 1);
            inbound.enqueue(message);
            Ok(())
        });

        if let Err(reason) = result {
            if let DisconnectReason::Protocol(ref err) = reason {
                warn!("{} sent malformed data: {}", id, err);
                bump(&stats.protocol_errors, 1);
            }
            self.disconnect_client(id, reason);
        }
    }

    /// Drop one client and tell the remaining ones.
    ///
    /// Returns `false` if `id` was not connected.
    pub fn disconnect_client(&mut self, id: ClientId, reason: DisconnectReason) -> bool {
        let mut pending = vec![(id, reason)];
        let mut found = false;

        while let Some((id, reason)) = pending.pop() {
            let Some(mut record) = self.clients.remove(id) else {
                continue;
            };
            found = true;

            if let Err(e) = record.deregister(self.poll.registry()) {
                debug!("deregister {} failed: {}", id, e);
            }
            self.stats.client_left();
            info!("{} disconnected from {} ({})", id, record.addr, reason);
            // Closes the socket
            drop(record);

            self.hooks.client_disconnected(id);

            let notice = Notice::ClientDisconnected(id);
            for peer in self.clients.iter_mut() {
                stage(peer, &self.stats, |buffer| notice.encode_into(buffer), &mut pending);
            }
        }
        found
    }

    /// Disconnect an administrator-chosen client.
    pub fn kick(&mut self, id: ClientId) -> bool {
        self.disconnect_client(id, DisconnectReason::Kicked)
    }

    /// Shut the whole server down: every client, then the listener.
    pub fn disconnect(&mut self) {
        if self.state == ServerState::Closed {
            return;
        }
        self.state = ServerState::ShuttingDown;

        for id in self.clients.ids() {
            self.disconnect_client(id, DisconnectReason::Shutdown);
        }
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener) {
                debug!("deregister listener failed: {}", e);
            }
        }

        self.state = ServerState::Closed;
        info!("server on {} shut down: {}", self.local_addr, self.stats.snapshot());
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state)
            .field("clients", &self.clients.len())
            .finish()
    }
}

/// Stage one frame for `record`, recording drops and failed flushes.
///
/// Returns whether the frame was queued.
fn stage<F>(
    record: &mut ClientRecord,
    stats: &ServerStats,
    encode: F,
    failed: &mut Vec<(ClientId, DisconnectReason)>,
) -> bool
where
    F: Fn(&mut FrameBuffer) -> Result<()>,
{
    match record.stage(stats, encode) {
        Ok(Staged::Queued) => true,
        Ok(Staged::Dropped(err)) => {
            warn!("frame for {} dropped: {}", record.id, err);
            bump(&stats.messages_dropped, 1);
            false
        }
        Err(reason) => {
            failed.push((record.id, reason));
            false
        }
    }
}

/// Accept errors that only cost the connection being accepted.
fn is_per_connection(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::PermissionDenied
    )
}
