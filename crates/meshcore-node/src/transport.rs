//! The transport contract.
//!
//! A transport moves whole packets; framing, reconnection, and broker
//! details stay behind this interface. The router installs its own packet
//! handler on every registered transport and records each transport's
//! [`SourceTag`] so a received packet is never echoed back out of the
//! transport it arrived on.
//!
//! [`ChannelTransport`] is the in-memory implementation used by the local
//! loopback and by tests as a fake radio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use meshcore_proto::Packet;

use crate::{NodeError, Result};

/// Where a packet entered the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTag {
    /// The MQTT bridge transport.
    Mqtt,
    /// The serial (RS-232 framed) transport.
    Serial,
    /// Self-originated traffic.
    Local,
}

/// Callback invoked with every packet a transport receives.
pub type PacketHandler = Arc<dyn Fn(Packet) + Send + Sync>;

/// Callback invoked when a transport's connection state changes.
pub type StateHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// The contract every packet transport implements.
pub trait Transport: Send + Sync {
    /// Begin receiving. Idempotent.
    fn start(&self) -> Result<()>;

    /// Stop receiving and release resources. Idempotent.
    fn stop(&self);

    /// Whether packets can currently be sent.
    fn is_connected(&self) -> bool;

    /// Install the receive callback. Replaces any previous handler.
    fn set_packet_handler(&self, handler: PacketHandler);

    /// Install the connection-state callback. Replaces any previous handler.
    fn set_state_handler(&self, handler: StateHandler);

    /// Send one packet.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotConnected`] when the link is down and
    /// [`NodeError::TransportSend`] for link-level failures.
    fn send_packet(&self, packet: &Packet) -> Result<()>;
}

/// An in-memory transport.
///
/// Sent packets accumulate in a buffer the owner drains with
/// [`ChannelTransport::take_sent`]; received packets are injected with
/// [`ChannelTransport::inject`], which invokes the installed handler
/// synchronously — the same re-entrancy a radio driver's receive callback
/// has.
pub struct ChannelTransport {
    name: &'static str,
    started: AtomicBool,
    connected: AtomicBool,
    handler: Mutex<Option<PacketHandler>>,
    state_handler: Mutex<Option<StateHandler>>,
    sent: Mutex<Vec<Packet>>,
}

impl ChannelTransport {
    /// Create a connected in-memory transport.
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            started: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            handler: Mutex::new(None),
            state_handler: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Deliver a packet as if it arrived from the wire.
    pub fn inject(&self, packet: Packet) {
        let handler = match self.handler.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match handler {
            Some(h) => h(packet),
            None => tracing::debug!(transport = self.name, "packet dropped: no handler"),
        }
    }

    /// Flip the simulated connection state, notifying the state handler.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        let handler = match self.state_handler.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(h) = handler {
            h(connected);
        }
    }

    /// Drain everything sent through this transport so far.
    pub fn take_sent(&self) -> Vec<Packet> {
        match self.sent.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Number of packets sent and not yet drained.
    pub fn sent_count(&self) -> usize {
        match self.sent.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Transport for ChannelTransport {
    fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_packet_handler(&self, handler: PacketHandler) {
        match self.handler.lock() {
            Ok(mut guard) => *guard = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    fn set_state_handler(&self, handler: StateHandler) {
        match self.state_handler.lock() {
            Ok(mut guard) => *guard = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    fn send_packet(&self, packet: &Packet) -> Result<()> {
        if !self.is_connected() {
            return Err(NodeError::NotConnected);
        }
        match self.sent.lock() {
            Ok(mut guard) => guard.push(packet.clone()),
            Err(poisoned) => poisoned.into_inner().push(packet.clone()),
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}
