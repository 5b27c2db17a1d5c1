//! Packet deduplication.
//!
//! Two circular tables: one of 8-byte packet hashes for regular traffic and
//! one of raw u32 values for ACKs, which are small enough to dedup on their
//! checksum alone. Insertion overwrites the oldest slot; lookups are linear
//! scans, cheap at these capacities.
//!
//! The packet hash is the first 8 bytes of
//! `SHA-256(payload_type ‖ [path_len if TRACE] ‖ payload)`. TRACE mixes the
//! path length in because a trace's payload (the relay list) is identical on
//! every leg — only the SNR path grows — and each leg must dedup separately.

use meshcore_crypto::hashes;
use meshcore_proto::{Packet, PayloadType};

/// Default capacity of the regular-packet hash ring.
pub const DEFAULT_HASH_CAPACITY: usize = 128;

/// Default capacity of the ACK value ring.
pub const DEFAULT_ACK_CAPACITY: usize = 64;

/// The two deduplication rings.
#[derive(Debug)]
pub struct DedupTable {
    hashes: Vec<[u8; 8]>,
    next_hash: usize,
    acks: Vec<u32>,
    next_ack: usize,
}

impl Default for DedupTable {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_CAPACITY, DEFAULT_ACK_CAPACITY)
    }
}

impl DedupTable {
    /// Create rings with explicit capacities.
    pub fn new(hash_capacity: usize, ack_capacity: usize) -> Self {
        Self {
            hashes: vec![[0u8; 8]; hash_capacity],
            next_hash: 0,
            acks: vec![0u32; ack_capacity],
            next_ack: 0,
        }
    }

    /// Compute the dedup hash for a non-ACK packet.
    pub fn packet_hash(packet: &Packet) -> [u8; 8] {
        let type_byte = [packet.payload_type_bits()];
        if packet.payload_type() == Some(PayloadType::Trace) {
            let len_byte = [packet.path_len() as u8];
            hashes::short_hash(&[&type_byte[..], &len_byte[..], &packet.payload])
        } else {
            hashes::short_hash(&[&type_byte[..], &packet.payload])
        }
    }

    /// Check whether a packet has been seen, recording it if not.
    ///
    /// Returns `true` for a duplicate. The check itself inserts — a router
    /// marks its own outbound packets seen by calling this and ignoring the
    /// result.
    pub fn has_seen(&mut self, packet: &Packet) -> bool {
        if packet.payload_type() == Some(PayloadType::Ack) && packet.payload.len() >= 4 {
            let value = u32::from_le_bytes([
                packet.payload[0],
                packet.payload[1],
                packet.payload[2],
                packet.payload[3],
            ]);
            if self.acks.contains(&value) {
                return true;
            }
            self.acks[self.next_ack] = value;
            self.next_ack = (self.next_ack + 1) % self.acks.len();
            return false;
        }

        let hash = Self::packet_hash(packet);
        if self.hashes.contains(&hash) {
            return true;
        }
        self.hashes[self.next_hash] = hash;
        self.next_hash = (self.next_hash + 1) % self.hashes.len();
        false
    }

    /// Zero both rings and reset the insertion points.
    pub fn clear(&mut self) {
        self.hashes.fill([0u8; 8]);
        self.acks.fill(0);
        self.next_hash = 0;
        self.next_ack = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcore_proto::RouteType;

    fn packet_with_payload(payload: Vec<u8>) -> Packet {
        Packet::new(RouteType::Flood, PayloadType::TxtMsg, payload).expect("valid")
    }

    fn ack_packet(checksum: u32) -> Packet {
        Packet::new(RouteType::Flood, PayloadType::Ack, checksum.to_le_bytes().to_vec())
            .expect("valid")
    }

    #[test]
    fn test_second_sighting_is_duplicate() {
        let mut dedup = DedupTable::default();
        let p = packet_with_payload(vec![1, 2, 3]);
        assert!(!dedup.has_seen(&p));
        assert!(dedup.has_seen(&p));
    }

    #[test]
    fn test_distinct_payloads_are_distinct() {
        let mut dedup = DedupTable::default();
        assert!(!dedup.has_seen(&packet_with_payload(vec![1])));
        assert!(!dedup.has_seen(&packet_with_payload(vec![2])));
    }

    #[test]
    fn test_path_does_not_affect_regular_hash() {
        // A flood packet forwarded with a longer path is still the same packet.
        let mut dedup = DedupTable::default();
        let mut p = packet_with_payload(vec![9, 9]);
        assert!(!dedup.has_seen(&p));
        p.path = vec![0xAA, 0xBB];
        assert!(dedup.has_seen(&p));
    }

    #[test]
    fn test_trace_includes_path_len() {
        // Each relay leg of the same trace must hash differently.
        let mut dedup = DedupTable::default();
        let mut trace =
            Packet::new(RouteType::Flood, PayloadType::Trace, vec![0u8; 9]).expect("valid");
        assert!(!dedup.has_seen(&trace));
        trace.path = vec![0x10]; // one SNR byte appended
        assert!(!dedup.has_seen(&trace));
        assert!(dedup.has_seen(&trace));
    }

    #[test]
    fn test_ack_ring_by_value() {
        let mut dedup = DedupTable::default();
        assert!(!dedup.has_seen(&ack_packet(0xCAFE_BABE)));
        assert!(dedup.has_seen(&ack_packet(0xCAFE_BABE)));
        assert!(!dedup.has_seen(&ack_packet(0xCAFE_BABF)));
    }

    #[test]
    fn test_ack_ring_wraps() {
        let mut dedup = DedupTable::new(8, 4);
        for i in 1..=4u32 {
            assert!(!dedup.has_seen(&ack_packet(i)));
        }
        // Inserting a fifth evicts value 1.
        assert!(!dedup.has_seen(&ack_packet(5)));
        assert!(!dedup.has_seen(&ack_packet(1)));
    }

    #[test]
    fn test_hash_ring_holds_capacity_without_false_negatives() {
        let capacity = 16;
        let mut dedup = DedupTable::new(capacity, 4);
        for i in 0..capacity as u8 {
            assert!(!dedup.has_seen(&packet_with_payload(vec![i])));
        }
        // All of them are still present right at capacity.
        for i in 0..capacity as u8 {
            assert!(dedup.has_seen(&packet_with_payload(vec![i])));
        }
    }

    #[test]
    fn test_hash_ring_evicts_oldest_after_wrap() {
        let capacity = 4;
        let mut dedup = DedupTable::new(capacity, 4);
        for i in 0..=capacity as u8 {
            assert!(!dedup.has_seen(&packet_with_payload(vec![i])));
        }
        // Packet 0 was overwritten by packet 4.
        assert!(!dedup.has_seen(&packet_with_payload(vec![0])));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut dedup = DedupTable::default();
        let p = packet_with_payload(vec![7]);
        assert!(!dedup.has_seen(&p));
        dedup.clear();
        assert!(!dedup.has_seen(&p));
    }

    #[test]
    fn test_short_ack_payload_falls_back_to_hashing() {
        // A malformed ACK with fewer than 4 bytes still dedups, via the
        // regular hash ring.
        let mut dedup = DedupTable::default();
        let p = Packet::new(RouteType::Flood, PayloadType::Ack, vec![1, 2]).expect("valid");
        assert!(!dedup.has_seen(&p));
        assert!(dedup.has_seen(&p));
    }
}
