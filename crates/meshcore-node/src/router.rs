//! The routing engine: receive gate chain, forwarding policy, send queue
//! drain.
//!
//! ## Receive gates, in order
//!
//! 1. **Version** — header bits 6-7 above the supported window: drop.
//! 2. **Transport codes** — transport-coded packets must validate against
//!    the configured regions. Runs before dedup so rejected packets never
//!    consume dedup slots.
//! 3. **Multipart** — fragments feed the reassembler; a completed packet
//!    re-enters the gate chain from the top (and so still dedups).
//! 4. **Dedup** — the check records the packet as a side effect.
//! 5. **Trace** — relays append their SNR byte and forward; the terminal
//!    node delivers to the application.
//! 6. **Direct, path present** — only the node named by `path[0]` handles
//!    it: ACKs deliver early and forward as a freshly built packet, data
//!    strips the front hop and forwards.
//! 7. **Direct, empty path** — zero-hop: deliver, never forward.
//! 8. **Flood** — deliver first; unless the handler suppresses it, append
//!    our hash and forward at priority = new path length, so floods heard
//!    from closer sources overtake those from farther ones.
//!
//! The application handler runs synchronously inside the gate chain and
//! returns a [`Forwarding`] decision; packets whose header carries the
//! 0xFF do-not-retransmit marker are likewise never forwarded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use meshcore_crypto::NodeId;
use meshcore_proto::packet::MAX_SUPPORTED_VERSION;
use meshcore_proto::payload::AckPayload;
use meshcore_proto::trace::TracePayload;
use meshcore_proto::{Packet, PayloadType, RouteType, MAX_PATH_LEN};

use crate::codes::RegionSet;
use crate::dedup::DedupTable;
use crate::multipart::Reassembler;
use crate::queue::{
    QueueEntry, SendQueue, PRIORITY_DIRECT, PRIORITY_FLOOD_ADVERT, PRIORITY_FLOOD_DATA,
    PRIORITY_FLOOD_PATH, PRIORITY_TRACE,
};
use crate::transport::{SourceTag, Transport};

/// The application's verdict on a delivered packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarding {
    /// Forward per normal policy.
    Allow,
    /// Do not retransmit this packet.
    Suppress,
}

/// The application-level packet handler, dispatched synchronously during
/// gate evaluation.
pub type AppHandler = Arc<dyn Fn(&Packet, SourceTag) -> Forwarding + Send + Sync>;

/// Router tunables.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Whether this node relays other nodes' traffic.
    pub forwarding: bool,
    /// Flood packets stop forwarding at this path length.
    pub max_flood_hops: u8,
    /// Drain task tick.
    pub drain_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            forwarding: true,
            max_flood_hops: MAX_PATH_LEN as u8,
            drain_interval: Duration::from_millis(10),
        }
    }
}

/// The routing engine.
pub struct Router {
    self_id: NodeId,
    config: RouterConfig,
    regions: Option<RegionSet>,
    transports: Mutex<Vec<(Arc<dyn Transport>, SourceTag)>>,
    handler: Mutex<Option<AppHandler>>,
    dedup: Mutex<DedupTable>,
    reassembler: Mutex<Reassembler>,
    queue: Mutex<SendQueue>,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Router {
    /// Create a router with no transport-code validation.
    pub fn new(self_id: NodeId, config: RouterConfig) -> Arc<Self> {
        Self::build(self_id, config, None)
    }

    /// Create a router that validates transport-coded packets against the
    /// given regions.
    pub fn with_regions(self_id: NodeId, config: RouterConfig, regions: RegionSet) -> Arc<Self> {
        Self::build(self_id, config, Some(regions))
    }

    fn build(self_id: NodeId, config: RouterConfig, regions: Option<RegionSet>) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            self_id,
            config,
            regions,
            transports: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            dedup: Mutex::new(DedupTable::default()),
            reassembler: Mutex::new(Reassembler::default()),
            queue: Mutex::new(SendQueue::new()),
            shutdown,
            task: Mutex::new(None),
        })
    }

    /// This node's identity.
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Install the application packet handler. Replaces any previous one.
    pub fn set_packet_handler(&self, handler: AppHandler) {
        *lock(&self.handler) = Some(handler);
    }

    /// Register a transport under a source tag and install our receive
    /// callback on it.
    pub fn register_transport(self: &Arc<Self>, transport: Arc<dyn Transport>, tag: SourceTag) {
        let weak = Arc::downgrade(self);
        transport.set_packet_handler(Arc::new(move |packet| {
            if let Some(router) = weak.upgrade() {
                router.handle_packet(packet, tag);
            }
        }));
        lock(&self.transports).push((transport, tag));
    }

    // ── Receive path ───────────────────────────────────────────────────

    /// Run a received packet through the gate chain.
    pub fn handle_packet(&self, packet: Packet, src: SourceTag) {
        // Gate 1: version.
        if packet.version() > MAX_SUPPORTED_VERSION {
            tracing::debug!(version = packet.version(), "dropped: unsupported version");
            return;
        }

        // Gate 2: transport codes, before dedup so rejects use no slots.
        if packet.has_transport_codes() {
            if let Some(ref regions) = self.regions {
                if !regions.validate(&packet) {
                    tracing::debug!(
                        code = format_args!("{:04x}", packet.transport_codes[0]),
                        "dropped: transport code not ours"
                    );
                    return;
                }
            }
        }

        // Gate 3: multipart reassembly; a completed packet re-enters from
        // the top.
        if packet.payload_type() == Some(PayloadType::Multipart) {
            match meshcore_proto::multipart::Fragment::parse(&packet.payload) {
                Ok(fragment) => {
                    let sender_hash = packet.path.first().copied().unwrap_or(0);
                    let assembled = lock(&self.reassembler).handle_fragment(fragment, sender_hash);
                    if let Some(assembled) = assembled {
                        self.handle_packet(assembled, src);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "dropped: bad fragment"),
            }
            return;
        }

        // Gate 4: dedup (the check records the packet).
        if lock(&self.dedup).has_seen(&packet) {
            tracing::debug!("dropped: duplicate");
            return;
        }

        // Gate 5: trace.
        if packet.payload_type() == Some(PayloadType::Trace) {
            self.handle_trace(packet, src);
            return;
        }

        let route = packet.route_type();

        // Gate 6: direct with a path.
        if route.is_direct() && packet.path_len() > 0 {
            self.handle_direct_with_path(packet, src);
            return;
        }

        // Gate 7: zero-hop direct — deliver, never forward.
        if route.is_direct() {
            self.deliver(&packet, src);
            return;
        }

        // Gate 8: flood — deliver, then forward unless suppressed.
        let decision = self.deliver(&packet, src);
        if decision == Forwarding::Suppress || packet.is_do_not_retransmit() {
            return;
        }
        if !self.config.forwarding {
            return;
        }
        // The configured hop limit can never exceed the wire's path budget.
        let hop_limit = usize::from(self.config.max_flood_hops).min(MAX_PATH_LEN);
        if packet.path_len() + 1 > hop_limit {
            tracing::debug!(hops = packet.path_len(), "flood at hop limit");
            return;
        }
        let mut forward = packet;
        forward.path.push(self.self_id.hash());
        let priority = forward.path_len() as u8;
        self.enqueue(forward, priority, Some(src), false);
    }

    fn handle_trace(&self, packet: Packet, src: SourceTag) {
        let trace = match TracePayload::parse(&packet.payload) {
            Ok(trace) => trace,
            Err(e) => {
                tracing::debug!(error = %e, "dropped: bad trace");
                return;
            }
        };

        let offset = packet.path_len() * trace.hash_size();
        if offset >= trace.path_hashes.len() {
            // End of the relay list: the trace has arrived.
            self.deliver(&packet, src);
            return;
        }
        if !trace.is_addressed_to(offset, &self.self_id) {
            return;
        }
        if self.config.forwarding && packet.path_len() < MAX_PATH_LEN {
            let mut forward = packet.clone();
            forward.path.push(packet.snr as u8);
            // The appended SNR byte lengthens the path, which is part of a
            // trace's dedup hash; mark the new leg seen before it loops back.
            lock(&self.dedup).has_seen(&forward);
            self.enqueue(forward, PRIORITY_TRACE, Some(src), false);
        }
    }

    fn handle_direct_with_path(&self, packet: Packet, src: SourceTag) {
        if packet.path[0] != self.self_id.hash() {
            return;
        }
        if !self.config.forwarding {
            return;
        }

        if packet.payload_type() == Some(PayloadType::Ack) {
            // Early ACK receive: the application learns of the ACK at every
            // relay, not just the terminal hop.
            self.deliver(&packet, src);
            match AckPayload::parse(&packet.payload) {
                Ok(ack) => {
                    // Forward a freshly built packet rather than re-emitting
                    // the received one: same header bits and transport codes,
                    // trimmed path, new payload carrying the same checksum.
                    let forward = Packet {
                        header: packet.header,
                        transport_codes: packet.transport_codes,
                        path: packet.path[1..].to_vec(),
                        payload: ack.build(),
                        snr: 0,
                    };
                    self.enqueue(forward, PRIORITY_DIRECT, None, true);
                }
                Err(e) => tracing::debug!(error = %e, "not forwarding malformed ACK"),
            }
            return;
        }

        let mut forward = packet;
        forward.path.remove(0);
        self.enqueue(forward, PRIORITY_DIRECT, Some(src), false);
    }

    fn deliver(&self, packet: &Packet, src: SourceTag) -> Forwarding {
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => handler(packet, src),
            None => Forwarding::Allow,
        }
    }

    // ── Send path ──────────────────────────────────────────────────────

    /// Flood a packet to the whole mesh: path cleared, marked seen so our
    /// own loopback dedups, queued to every transport.
    pub fn send_flood(&self, mut packet: Packet) {
        packet.path.clear();
        packet.set_route_type(RouteType::Flood);
        self.mark_seen(&packet);
        let priority = match packet.payload_type() {
            Some(PayloadType::Advert) => PRIORITY_FLOOD_ADVERT,
            Some(PayloadType::Path) => PRIORITY_FLOOD_PATH,
            _ => PRIORITY_FLOOD_DATA,
        };
        self.enqueue(packet, priority, None, true);
    }

    /// Send a packet along an explicit direct path.
    pub fn send_direct(&self, mut packet: Packet, path: &[u8]) {
        packet.set_route_type(RouteType::Direct);
        packet.path = path.to_vec();
        self.mark_seen(&packet);
        self.enqueue(packet, PRIORITY_DIRECT, None, true);
    }

    /// Send a packet to direct neighbours only (direct route, empty path).
    pub fn send_zero_hop(&self, packet: Packet) {
        self.send_direct(packet, &[]);
    }

    fn mark_seen(&self, packet: &Packet) {
        let _ = lock(&self.dedup).has_seen(packet);
    }

    fn enqueue(
        &self,
        packet: Packet,
        priority: u8,
        exclude_source: Option<SourceTag>,
        send_to_all: bool,
    ) {
        lock(&self.queue).push(packet, priority, Duration::ZERO, exclude_source, send_to_all);
    }

    /// Number of packets waiting in the send queue.
    pub fn queued(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Drain every ready queue entry to the transports. Normally driven by
    /// the background task; exposed so tests can step it deterministically.
    pub fn flush(&self) {
        loop {
            let entry = lock(&self.queue).pop();
            match entry {
                Some(entry) => self.broadcast(entry),
                None => break,
            }
        }
    }

    fn broadcast(&self, entry: QueueEntry) {
        let transports = lock(&self.transports).clone();
        for (transport, tag) in transports {
            if !entry.send_to_all && entry.exclude_source == Some(tag) {
                continue;
            }
            if !transport.is_connected() {
                continue;
            }
            if let Err(e) = transport.send_packet(&entry.packet) {
                tracing::warn!(?tag, error = %e, "transport send failed");
            }
        }
    }

    /// Spawn the queue drain task.
    pub fn start(self: &Arc<Self>) {
        let router = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(router.config.drain_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => router.flush(),
                    _ = shutdown.recv() => break,
                }
            }
        });
        *lock(&self.task) = Some(handle);
    }

    /// Signal the drain task and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
