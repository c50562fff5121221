//! Application-facing connection
//!
//! Wraps a [`ConnectionManager`] and its queues. In synchronous mode the
//! application drives ticks itself; in threaded mode a `herald-net`
//! thread ticks at the configured interval and the application only
//! touches the queues.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::core::{ClientId, Identities, MessageQueue};
use crate::error::{Error, Result};
use crate::network::{ConnectionConfig, ConnectionManager, Hooks, ServerStats, StatsSnapshot};
use crate::protocol::Message;

/// Requests the application sends to the network thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Kick(ClientId),
}

struct Worker {
    control: Arc<MessageQueue<Control>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
}

enum Mode {
    Inline(ConnectionManager),
    Threaded(Worker),
}

/// A server endpoint plus the queues that connect it to the application.
pub struct Connection {
    config: ConnectionConfig,
    local_addr: SocketAddr,
    ids: Arc<Identities>,
    inbound: Arc<MessageQueue>,
    outbound: Arc<MessageQueue>,
    stats: Arc<ServerStats>,
    mode: Mode,
}

impl Connection {
    pub fn new(config: ConnectionConfig, hooks: Hooks) -> Result<Self> {
        Self::with_identities(config, hooks, Arc::new(Identities::new()))
    }

    /// Build on identity allocators shared with other components.
    pub fn with_identities(config: ConnectionConfig, hooks: Hooks, ids: Arc<Identities>) -> Result<Self> {
        let inbound = Arc::new(MessageQueue::new());
        let outbound = Arc::new(MessageQueue::new());
        let stats = Arc::new(ServerStats::new());

        let manager = ConnectionManager::bind(
            config.clone(),
            Arc::clone(&ids),
            Arc::clone(&inbound),
            Arc::clone(&outbound),
            hooks,
            Arc::clone(&stats),
        )?;
        let local_addr = manager.local_addr();

        let mode = if config.threaded {
            Mode::Threaded(spawn_worker(manager, config.tick_interval)?)
        } else {
            Mode::Inline(manager)
        };

        Ok(Self {
            config,
            local_addr,
            ids,
            inbound,
            outbound,
            stats,
            mode,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The server's own identity
    #[inline]
    pub fn local_id(&self) -> ClientId {
        ClientId::none()
    }

    pub fn identities(&self) -> &Arc<Identities> {
        &self.ids
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Threaded(_))
    }

    /// Still accepting and servicing clients.
    pub fn is_active(&self) -> bool {
        match &self.mode {
            Mode::Inline(manager) => manager.is_listening(),
            Mode::Threaded(worker) => worker.running.load(Ordering::Acquire),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Inbound queue, for handing to a dispatcher.
    pub fn inbound(&self) -> &Arc<MessageQueue> {
        &self.inbound
    }

    /// Queue a message for the next write phase.
    pub fn add_message(&self, message: Message) {
        self.outbound.enqueue(message);
    }

    pub fn next_message(&self) -> Option<Message> {
        self.inbound.try_dequeue()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Accept and read once. No-op in threaded mode.
    pub fn read(&mut self) -> Result<()> {
        match &mut self.mode {
            Mode::Inline(manager) => manager.read(),
            Mode::Threaded(_) => Ok(()),
        }
    }

    /// Route and flush once. No-op in threaded mode.
    pub fn send(&mut self) -> Result<()> {
        match &mut self.mode {
            Mode::Inline(manager) => manager.send(),
            Mode::Threaded(_) => Ok(()),
        }
    }

    /// One read/send cycle. No-op in threaded mode.
    pub fn tick(&mut self) -> Result<()> {
        match &mut self.mode {
            Mode::Inline(manager) => manager.tick(),
            Mode::Threaded(_) => Ok(()),
        }
    }

    /// Drop one client. Returns whether `id` was connected.
    ///
    /// In threaded mode the kick is queued for the next tick, so the outcome
    /// is not known yet and this always returns `true`.
    pub fn kick(&mut self, id: ClientId) -> bool {
        match &mut self.mode {
            Mode::Inline(manager) => manager.kick(id),
            Mode::Threaded(worker) => {
                worker.control.enqueue(Control::Kick(id));
                true
            }
        }
    }

    /// Shut down every client and the listener.
    ///
    /// In threaded mode this stops and joins the network thread and returns
    /// the error that stopped it, if any.
    pub fn disconnect(&mut self) -> Result<()> {
        match &mut self.mode {
            Mode::Inline(manager) => {
                manager.disconnect();
                Ok(())
            }
            Mode::Threaded(worker) => worker.stop(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Mode::Threaded(worker) = &mut self.mode {
            if let Err(e) = worker.stop() {
                debug!("network thread ended with {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("local_addr", &self.local_addr)
            .field("threaded", &self.is_threaded())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Worker {
    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::WorkerPanicked)?,
            None => Ok(()),
        }
    }
}

fn spawn_worker(manager: ConnectionManager, interval: Duration) -> Result<Worker> {
    let control = Arc::new(MessageQueue::new());
    let running = Arc::new(AtomicBool::new(true));

    let handle = {
        let control = Arc::clone(&control);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("herald-net".into())
            .spawn(move || run_loop(manager, &control, &running, interval))?
    };
    info!("network thread started, ticking every {:?}", interval);

    Ok(Worker {
        control,
        running,
        handle: Some(handle),
    })
}

fn run_loop(
    mut manager: ConnectionManager,
    control: &MessageQueue<Control>,
    running: &AtomicBool,
    interval: Duration,
) -> Result<()> {
    let mut result = Ok(());

    while running.load(Ordering::Acquire) {
        let started = Instant::now();

        for command in control.drain() {
            match command {
                Control::Kick(id) => {
                    manager.kick(id);
                }
            }
        }

        if let Err(e) = manager.tick() {
            error!("network loop stopped: {}", e);
            result = Err(e);
            break;
        }

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    running.store(false, Ordering::Release);
    manager.disconnect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NetworkId, RpcId};

    #[test]
    fn test_sync_mode_queues() {
        let mut conn = Connection::new(ConnectionConfig::ephemeral(), Hooks::new()).unwrap();
        assert!(!conn.is_threaded());
        assert!(conn.is_active());
        assert!(conn.local_id().is_none());

        conn.add_message(Message::broadcast(
            ClientId::none(),
            RpcId::FIRST_USER,
            NetworkId::none(),
            vec![],
        ));
        assert!(conn.has_outgoing());

        // Nobody is connected, so the message goes nowhere
        conn.tick().unwrap();
        assert!(!conn.has_outgoing());
        assert_eq!(conn.stats().messages_routed, 0);
        assert!(conn.next_message().is_none());
        assert!(!conn.kick(ClientId::from_raw(42)));

        conn.disconnect().unwrap();
        assert!(!conn.is_active());
    }

    #[test]
    fn test_threaded_mode_stops_cleanly() {
        let config = ConnectionConfig::ephemeral().threaded(Duration::from_millis(2));
        let mut conn = Connection::new(config, Hooks::new()).unwrap();
        assert!(conn.is_threaded());
        assert!(conn.is_active());

        assert!(conn.kick(ClientId::from_raw(3)));
        thread::sleep(Duration::from_millis(20));

        conn.disconnect().unwrap();
        assert!(!conn.is_active());
        // Second stop finds no thread left
        conn.disconnect().unwrap();
    }
}
