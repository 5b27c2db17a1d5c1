//! Reassembly of multipart fragments.
//!
//! Fragments are keyed by `(inner_type, sender_hash)` so concurrent senders
//! cannot interleave into each other's packets. An in-progress reassembly
//! older than the timeout is discarded on the next fragment arrival; there
//! is no dedicated sweep task.
//!
//! Today's firmware only splits oversized ACK bundles, where every fragment
//! carries self-contained 4-byte values, but reassembly concatenates
//! arbitrary fragment data in arrival order as the format requires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use meshcore_proto::multipart::Fragment;
use meshcore_proto::{Packet, RouteType};

/// How long a partial reassembly may wait for its next fragment.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct ReassemblyState {
    fragments: Vec<Vec<u8>>,
    expected: u8,
    started: Instant,
}

/// Reassembles multipart fragments into whole packets.
#[derive(Debug)]
pub struct Reassembler {
    states: HashMap<(u8, u8), ReassemblyState>,
    timeout: Duration,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::with_timeout(REASSEMBLY_TIMEOUT)
    }
}

impl Reassembler {
    /// Create a reassembler with an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            states: HashMap::new(),
            timeout,
        }
    }

    /// Feed one fragment. Returns the reassembled packet when this fragment
    /// completes it.
    ///
    /// The synthetic packet is flood-routed with an empty path and the
    /// fragment's inner payload type; the caller re-enters its receive path
    /// with it, which applies deduplication as usual.
    pub fn handle_fragment(&mut self, fragment: Fragment, sender_hash: u8) -> Option<Packet> {
        let timeout = self.timeout;
        self.states.retain(|key, state| {
            let fresh = state.started.elapsed() < timeout;
            if !fresh {
                tracing::debug!(
                    inner_type = key.0,
                    sender_hash = key.1,
                    "multipart reassembly timed out"
                );
            }
            fresh
        });

        let key = (fragment.inner_type, sender_hash);
        let done = fragment.remaining == 0;
        let state = self.states.entry(key).or_insert_with(|| ReassemblyState {
            fragments: Vec::new(),
            expected: fragment.remaining + 1,
            started: Instant::now(),
        });
        state.fragments.push(fragment.data);

        if !done {
            return None;
        }

        let state = self.states.remove(&key)?;
        if state.fragments.len() != state.expected as usize {
            tracing::debug!(
                inner_type = key.0,
                sender_hash = key.1,
                got = state.fragments.len(),
                expected = state.expected,
                "reassembly completed with unexpected fragment count"
            );
        }
        let payload: Vec<u8> = state.fragments.concat();
        Some(Packet {
            header: (fragment.inner_type << 2) | RouteType::Flood as u8,
            transport_codes: [0, 0],
            path: Vec::new(),
            payload,
            snr: 0,
        })
    }

    /// Number of reassemblies currently in progress.
    pub fn in_progress(&self) -> usize {
        self.states.len()
    }
}
