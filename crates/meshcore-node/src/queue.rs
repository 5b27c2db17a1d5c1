//! The priority send queue.
//!
//! Entries carry a priority (lower sends first), a `ready_at` deadline so
//! sends can be deliberately delayed, and a send scope (everything, or
//! everything except the transport the packet arrived on).
//!
//! For flood forwarding the router sets priority to the packet's path
//! length at forwarding time. That is a protocol contract, not a heuristic:
//! among queued floods of the same kind, one heard from a closer source
//! (shorter path) overtakes one from a farther source, which keeps the
//! short routes winning the mesh-wide rebroadcast race.
//!
//! `pop` is a linear scan; queues here hold at most a few dozen entries
//! and the scan keeps the structure trivially correct (FIFO within a
//! priority falls out of the insertion sequence numbers).

use std::time::{Duration, Instant};

use meshcore_proto::Packet;

use crate::transport::SourceTag;

/// Priority of direct sends (including forwarded ACKs).
pub const PRIORITY_DIRECT: u8 = 0;
/// Priority of locally originated flood data.
pub const PRIORITY_FLOOD_DATA: u8 = 1;
/// Priority of locally originated flood path announcements.
pub const PRIORITY_FLOOD_PATH: u8 = 2;
/// Priority of locally originated flood adverts.
pub const PRIORITY_FLOOD_ADVERT: u8 = 3;
/// Priority of forwarded traces.
pub const PRIORITY_TRACE: u8 = 5;

/// One queued send.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// The packet to emit.
    pub packet: Packet,
    /// Send priority; lower goes first.
    pub priority: u8,
    /// Emit to every connected transport, ignoring `exclude_source`.
    pub send_to_all: bool,
    /// Transport to skip when `send_to_all` is false.
    pub exclude_source: Option<SourceTag>,
    ready_at: Instant,
    seq: u64,
}

/// The priority send queue.
#[derive(Debug, Default)]
pub struct SendQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

impl SendQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet.
    pub fn push(
        &mut self,
        packet: Packet,
        priority: u8,
        delay: Duration,
        exclude_source: Option<SourceTag>,
        send_to_all: bool,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry {
            packet,
            priority,
            send_to_all,
            exclude_source,
            ready_at: Instant::now() + delay,
            seq,
        });
    }

    /// Remove and return the best ready entry: smallest priority, then
    /// earliest insertion. Returns `None` when nothing is ready yet.
    ///
    /// At most one entry per call, so a drain loop can yield between sends.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        let now = Instant::now();
        let best = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.ready_at <= now)
            .min_by_key(|(_, e)| (e.priority, e.seq))
            .map(|(i, _)| i)?;
        Some(self.entries.swap_remove(best))
    }

    /// Number of queued entries, ready or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
