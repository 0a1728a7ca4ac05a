//! Connection state machine and the bounded connection table.
//!
//! Each connection tracks where it is in the payload (cursor) and how much
//! is left to send (remaining). The table is a fixed-capacity slab; slot
//! indices double as readiness tokens.

use mio::net::TcpStream;
use mio::Interest;
use slab::Slab;
use std::net::SocketAddr;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepted, no `run` seen yet.
    AwaitingCommand,
    /// Payload bytes are queued for this connection.
    Streaming,
    /// Payload fully sent and the send side shut down. Still readable.
    Closing,
}

/// Transmit bookkeeping for one connection.
///
/// `cursor + remaining` always equals the payload length fixed at the last
/// `arm`. A state with `remaining == 0` never asks for write readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamState {
    lifecycle: Lifecycle,
    cursor: usize,
    remaining: usize,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::AwaitingCommand,
            cursor: 0,
            remaining: 0,
        }
    }

    /// Queue `len` payload bytes starting from offset 0.
    pub fn arm(&mut self, len: usize) {
        self.lifecycle = Lifecycle::Streaming;
        self.cursor = 0;
        self.remaining = len;
    }

    /// Record `n` bytes accepted by the socket.
    ///
    /// Returns true when this write drained the queue.
    pub fn advance(&mut self, n: usize) -> bool {
        debug_assert!(n <= self.remaining, "advanced past end of payload");
        let n = n.min(self.remaining);
        self.cursor += n;
        self.remaining -= n;
        self.remaining == 0
    }

    /// Mark the send side as shut down.
    pub fn finish(&mut self) {
        self.lifecycle = Lifecycle::Closing;
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn wants_write(&self) -> bool {
        self.remaining > 0
    }

    /// Readiness this connection needs on the next wait.
    ///
    /// Always readable (commands and peer shutdown), writable only while
    /// bytes are queued.
    pub fn interest(&self) -> Interest {
        if self.wants_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub state: StreamState,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: StreamState::new(),
        }
    }
}

/// Fixed-capacity table of tracked connections using slab allocation.
///
/// Provides O(1) allocate, lookup by slot, and release. Dropping a released
/// `Connection` closes its socket.
pub struct ConnectionTable<T> {
    slots: Slab<T>,
    capacity: usize,
}

impl<T> ConnectionTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            capacity,
        }
    }

    /// Claim a free slot for `entry`.
    ///
    /// Returns `None` (dropping `entry`) when the table is full.
    pub fn allocate(&mut self, entry: T) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        Some(self.slots.insert(entry))
    }

    /// Free a slot. Releasing an empty slot is a no-op.
    pub fn release(&mut self, slot: usize) -> Option<T> {
        self.slots.try_remove(slot)
    }

    #[cfg(test)]
    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.slots.get_mut(slot)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupied slots with their entries.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter()
    }

    /// Indices of every occupied slot, detached from the table borrow.
    pub fn occupied(&self) -> Vec<usize> {
        self.slots.iter().map(|(slot, _)| slot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_state_transitions() {
        let mut state = StreamState::new();
        assert_eq!(state.lifecycle(), Lifecycle::AwaitingCommand);
        assert_eq!(state.interest(), Interest::READABLE);

        state.arm(10_000);
        assert_eq!(state.lifecycle(), Lifecycle::Streaming);
        assert_eq!(state.interest(), Interest::READABLE | Interest::WRITABLE);

        assert!(!state.advance(4096));
        assert_eq!(state.cursor(), 4096);
        assert_eq!(state.remaining(), 10_000 - 4096);
        assert_eq!(state.cursor() + state.remaining(), 10_000);

        assert!(!state.advance(1));
        assert!(state.advance(10_000 - 4097));
        assert_eq!(state.cursor(), 10_000);
        assert!(!state.wants_write());
        assert_eq!(state.interest(), Interest::READABLE);

        state.finish();
        assert_eq!(state.lifecycle(), Lifecycle::Closing);
    }

    #[test]
    fn test_rearm_after_completion_starts_over() {
        let mut state = StreamState::new();
        state.arm(100);
        state.advance(100);
        state.finish();

        state.arm(100);
        assert_eq!(state.lifecycle(), Lifecycle::Streaming);
        assert_eq!(state.cursor(), 0);
        assert_eq!(state.remaining(), 100);
    }

    #[test]
    fn test_arm_empty_payload() {
        let mut state = StreamState::new();
        state.arm(0);
        assert_eq!(state.lifecycle(), Lifecycle::Streaming);
        assert!(!state.wants_write());
    }

    #[test]
    fn test_table_capacity() {
        let mut table = ConnectionTable::new(2);

        let a = table.allocate("a").unwrap();
        let b = table.allocate("b").unwrap();
        assert_ne!(a, b);
        assert!(table.is_full());

        // At capacity
        assert!(table.allocate("c").is_none());
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.get(b), Some(&"b"));
    }

    #[test]
    fn test_table_release_is_idempotent() {
        let mut table = ConnectionTable::new(1);

        let slot = table.allocate(7u32).unwrap();
        assert_eq!(table.release(slot), Some(7));
        assert_eq!(table.release(slot), None);
        assert_eq!(table.get(slot), None);
        assert!(table.is_empty());

        // Slot is reusable
        let again = table.allocate(8u32).unwrap();
        assert_eq!(table.get(again), Some(&8));
    }

    #[test]
    fn test_table_occupied_iteration() {
        let mut table = ConnectionTable::new(4);
        let a = table.allocate('a').unwrap();
        let b = table.allocate('b').unwrap();
        let c = table.allocate('c').unwrap();
        table.release(b);

        assert_eq!(table.occupied(), vec![a, c]);
        let values: Vec<char> = table.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!['a', 'c']);

        if let Some(v) = table.get_mut(c) {
            *v = 'z';
        }
        assert_eq!(table.get(c), Some(&'z'));
    }
}
