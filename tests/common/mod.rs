//! Loopback harness shared by the integration tests
//!
//! The server runs in synchronous mode on the test thread; plain std
//! sockets play the clients. Every wait is bounded by `DEADLINE`.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use herald::core::{ClientId, Identities, MessageQueue};
use herald::network::{ConnectionConfig, ConnectionManager, Hooks, ServerStats};
use herald::protocol::{ByteSpan, Frames, Notice};

pub const DEADLINE: Duration = Duration::from_secs(3);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Connected(ClientId),
    Disconnected(ClientId),
}

pub struct Harness {
    pub server: ConnectionManager,
    pub inbound: Arc<MessageQueue>,
    pub outbound: Arc<MessageQueue>,
    pub stats: Arc<ServerStats>,
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl Harness {
    pub fn new(max_clients: usize) -> Self {
        Self::with_config(ConnectionConfig::ephemeral().with_max_clients(max_clients))
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        init_logging();
        let events = Arc::new(Mutex::new(Vec::new()));
        let on_connect = Arc::clone(&events);
        let on_disconnect = Arc::clone(&events);
        let hooks = Hooks::new()
            .on_client_connected(move |id| on_connect.lock().unwrap().push(Event::Connected(id)))
            .on_client_disconnected(move |id| {
                on_disconnect.lock().unwrap().push(Event::Disconnected(id))
            });

        let inbound = Arc::new(MessageQueue::new());
        let outbound = Arc::new(MessageQueue::new());
        let stats = Arc::new(ServerStats::new());
        let server = ConnectionManager::bind(
            config,
            Arc::new(Identities::new()),
            Arc::clone(&inbound),
            Arc::clone(&outbound),
            hooks,
            Arc::clone(&stats),
        )
        .unwrap();

        Self {
            server,
            inbound,
            outbound,
            stats,
            events,
        }
    }

    /// Tick until `done` holds. Returns false on timeout.
    pub fn tick_until(&mut self, mut done: impl FnMut(&mut Self) -> bool) -> bool {
        let deadline = Instant::now() + DEADLINE;
        while Instant::now() < deadline {
            self.server.tick().unwrap();
            if done(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    /// Tick a few times for traffic that should not arrive.
    pub fn settle(&mut self) {
        for _ in 0..10 {
            self.server.tick().unwrap();
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Connect a client and wait until the server has admitted it.
    pub fn connect(&mut self) -> TestClient {
        let before = self.stats.snapshot().connections_total;
        let client = TestClient::connect(&self.server);
        assert!(
            self.tick_until(|h| h.stats.snapshot().connections_total > before),
            "server never admitted the client"
        );
        client
    }

    /// Connect and consume the roster notices, returning the client and its id.
    pub fn join(&mut self) -> (TestClient, ClientId) {
        let peers = self.server.client_count();
        let mut client = self.connect();
        let notices = self.notices(&mut client, peers + 1);
        let id = match notices[0] {
            Notice::LocalClientConnected(id) => id,
            other => panic!("expected local-client-connected, got {:?}", other),
        };
        (client, id)
    }

    /// Tick until `client` has `count` frames.
    pub fn frames(&mut self, client: &mut TestClient, count: usize) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let ok = self.tick_until(|_| {
            frames.extend(client.poll_frames());
            frames.len() >= count
        });
        assert!(ok, "expected {} frames, got {:?}", count, frames);
        assert_eq!(frames.len(), count, "unexpected extra frames");
        frames
    }

    pub fn notices(&mut self, client: &mut TestClient, count: usize) -> Vec<Notice> {
        self.frames(client, count)
            .iter()
            .map(|frame| decode_notice(frame))
            .collect()
    }

    /// Tick until the server closes `client`'s socket.
    pub fn wait_closed(&mut self, client: &mut TestClient) -> bool {
        self.tick_until(|_| {
            client.poll_frames();
            client.closed
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

pub fn decode_notice(frame: &[u8]) -> Notice {
    let span = ByteSpan::from_slice(frame).unwrap();
    Notice::decode(span).unwrap_or_else(|| panic!("not a notice: {:?}", frame))
}

/// Blocking-free std socket playing a client.
pub struct TestClient {
    stream: TcpStream,
    pending: Vec<u8>,
    pub closed: bool,
}

impl TestClient {
    pub fn connect(server: &ConnectionManager) -> Self {
        let stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.set_nodelay(true).unwrap();
        stream.set_nonblocking(true).unwrap();
        Self {
            stream,
            pending: Vec::new(),
            closed: false,
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.set_nonblocking(false).unwrap();
        self.stream.write_all(bytes).unwrap();
        self.stream.set_nonblocking(true).unwrap();
    }

    pub fn send_frame(&mut self, payload: &[u8]) {
        let mut bytes = (payload.len() as u16).to_le_bytes().to_vec();
        bytes.extend_from_slice(payload);
        self.send_raw(&bytes);
    }

    /// Read whatever arrived and return the complete frames.
    pub fn poll_frames(&mut self) -> Vec<Vec<u8>> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.closed = true;
                    break;
                }
            }
        }

        let mut frames = Frames::new(&self.pending);
        let out: Vec<Vec<u8>> = frames
            .by_ref()
            .map(|frame| frame.unwrap().as_bytes().to_vec())
            .collect();
        let consumed = frames.consumed();
        self.pending.drain(..consumed);
        out
    }
}
