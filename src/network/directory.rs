//! Client directory
//!
//! One slab owns every live [`ClientRecord`]; the slab key doubles as the
//! poll token (offset past the listener's token). A secondary map resolves
//! client identities to slab keys. Both are only changed together.

use std::collections::HashMap;

use mio::{Registry, Token};
use slab::Slab;

use super::client::ClientRecord;
use crate::core::ClientId;
use crate::error::{Error, Result};

/// Token of the listening socket
pub(crate) const LISTENER: Token = Token(0);

#[inline(always)]
fn token_for(key: usize) -> Token {
    Token(key + 1)
}

#[inline(always)]
fn key_for(token: Token) -> Option<usize> {
    token.0.checked_sub(1)
}

#[derive(Debug)]
pub(crate) struct Directory {
    records: Slab<ClientRecord>,
    by_id: HashMap<ClientId, usize>,
    /// Sockets the poll set may hold, listener included
    poll_capacity: usize,
}

impl Directory {
    pub fn new(poll_capacity: usize) -> Self {
        let clients = poll_capacity.saturating_sub(1);
        Self {
            records: Slab::with_capacity(clients),
            by_id: HashMap::with_capacity(clients),
            poll_capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No room for another client next to the listener
    #[inline]
    pub fn is_full(&self) -> bool {
        self.records.len() + 1 >= self.poll_capacity
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Register `record` with the poll set and take ownership of it.
    pub fn insert(&mut self, registry: &Registry, mut record: ClientRecord) -> Result<ClientId> {
        if self.is_full() {
            return Err(Error::PollSetFull {
                capacity: self.poll_capacity,
            });
        }

        let entry = self.records.vacant_entry();
        let key = entry.key();
        record.register(registry, token_for(key))?;

        let id = record.id;
        entry.insert(record);
        self.by_id.insert(id, key);
        self.check_invariant();
        Ok(id)
    }

    /// Take a record out of both indexes.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientRecord> {
        let key = self.by_id.remove(&id)?;
        let record = self.records.try_remove(key);
        self.check_invariant();
        record
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientRecord> {
        let key = *self.by_id.get(&id)?;
        self.records.get_mut(key)
    }

    pub fn id_for_token(&self, token: Token) -> Option<ClientId> {
        self.records.get(key_for(token)?).map(|record| record.id)
    }

    /// Live identities in slab order.
    pub fn ids(&self) -> Vec<ClientId> {
        self.records.iter().map(|(_, record)| record.id).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientRecord> {
        self.records.iter_mut().map(|(_, record)| record)
    }

    #[inline(always)]
    fn check_invariant(&self) {
        debug_assert_eq!(self.records.len(), self.by_id.len());
        debug_assert!(self
            .by_id
            .iter()
            .all(|(id, &key)| self.records.get(key).map(|r| r.id) == Some(*id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpStream;
    use mio::Poll;
    use std::net::{TcpListener, TcpStream as StdStream};

    fn record(id: u32, listener: &TcpListener) -> (ClientRecord, StdStream) {
        let peer = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, addr) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let record =
            ClientRecord::new(ClientId::from_raw(id), TcpStream::from_std(accepted), addr, 64).unwrap();
        (record, peer)
    }

    #[test]
    fn test_insert_lookup_remove() {
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut dir = Directory::new(3);

        let (a, _pa) = record(1, &listener);
        let (b, _pb) = record(2, &listener);
        dir.insert(poll.registry(), a).unwrap();
        dir.insert(poll.registry(), b).unwrap();
        assert!(dir.is_full());
        assert_eq!(dir.ids(), vec![ClientId::from_raw(1), ClientId::from_raw(2)]);

        let token = dir.get_mut(ClientId::from_raw(2)).unwrap().token;
        assert_ne!(token, LISTENER);
        assert_eq!(dir.id_for_token(token), Some(ClientId::from_raw(2)));
        assert_eq!(dir.id_for_token(LISTENER), None);

        let mut removed = dir.remove(ClientId::from_raw(1)).unwrap();
        removed.deregister(poll.registry()).unwrap();
        assert!(!dir.contains(ClientId::from_raw(1)));
        assert!(dir.remove(ClientId::from_raw(1)).is_none());
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_full_poll_set_is_an_error() {
        let poll = Poll::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut dir = Directory::new(2);

        let (a, _pa) = record(1, &listener);
        let (b, _pb) = record(2, &listener);
        dir.insert(poll.registry(), a).unwrap();
        assert!(matches!(
            dir.insert(poll.registry(), b),
            Err(Error::PollSetFull { capacity: 2 })
        ));
        assert_eq!(dir.len(), 1);
    }
}
