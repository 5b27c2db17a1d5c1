//! # meshcore-node
//!
//! The MeshCore packet-plane engine: everything between a transport's byte
//! stream and the application.
//!
//! ## Modules
//!
//! - [`clock`] — monotonic-unique epoch-second source
//! - [`dedup`] — circular packet/ACK deduplication tables
//! - [`multipart`] — fragment reassembly with timeout
//! - [`contacts`] — peer registry with cached ECDH secrets and replay guards
//! - [`discover`] — answers discover control requests
//! - [`acks`] — pending-acknowledgement tracker with retry/timeout loop
//! - [`queue`] — priority send queue with ready-at delays
//! - [`router`] — the receive gate chain and forwarding policy
//! - [`advertise`] — self-advert builder and the two-timer scheduler
//! - [`transport`] — the transport contract and an in-memory implementation
//! - [`codes`] — region transport codes for network segmentation
//! - [`mqtt`] — the MQTT transport contract (topic naming, base64 codec)
//!
//! ## Dataflow
//!
//! ```text
//! Transport -> Router::handle_packet
//!     version gate -> transport-code gate -> multipart -> dedup
//!     -> trace -> direct forward -> zero-hop dispatch -> flood dispatch
//! Application -> Router::send_flood / send_direct / send_zero_hop
//!     -> dedup mark -> send queue -> drain -> every transport but the source
//! ```

pub mod acks;
pub mod advertise;
pub mod clock;
pub mod codes;
pub mod contacts;
pub mod dedup;
pub mod discover;
pub mod mqtt;
pub mod multipart;
pub mod queue;
pub mod router;
pub mod transport;

pub use router::{Forwarding, Router, RouterConfig};
pub use transport::{SourceTag, Transport};

/// Error types for node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The contact store is full and nothing is evictable.
    #[error("contact store full")]
    ContactsFull,

    /// No contact with the given identity exists.
    #[error("contact not found")]
    ContactNotFound,

    /// A timestamp was not strictly newer than the recorded watermark.
    #[error("possible replay: timestamp {incoming} not newer than {watermark}")]
    PossibleReplay { incoming: u32, watermark: u32 },

    /// An advert failed validation before reaching the store.
    #[error("advert rejected: {0}")]
    AdvertRejected(String),

    /// A transport failed to send; the send loop continues.
    #[error("transport send failed: {0}")]
    TransportSend(String),

    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// A wire codec error.
    #[error(transparent)]
    Proto(#[from] meshcore_proto::ProtoError),

    /// A cryptographic error.
    #[error(transparent)]
    Crypto(#[from] meshcore_crypto::CryptoError),
}

/// Convenience result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
