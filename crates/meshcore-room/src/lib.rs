//! # meshcore-room
//!
//! A MeshCore room server: a store-and-forward message board reachable over
//! the mesh.
//!
//! Clients authenticate with an anonymous login request, post addressed text
//! messages, and receive other clients' posts pushed back to them, one at a
//! time, each push retried until acknowledged.
//!
//! ## Modules
//!
//! - [`clients`] — authenticated client sessions and permissions
//! - [`posts`] — the bounded post ring
//! - [`server`] — packet dispatch, login, ingest, and the push sync loop
//! - [`client`] — client-side construction of the same protocol

pub mod client;
pub mod clients;
pub mod posts;
pub mod server;

pub use clients::{ClientInfo, ClientStore, Permission};
pub use posts::{PostInfo, PostStore};
pub use server::{RoomConfig, RoomServer};

/// Error types for room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The client store is full of admins; nothing can be evicted.
    #[error("client store full")]
    ClientsFull,

    /// No session exists for the given identity.
    #[error("client not found")]
    ClientNotFound,

    /// A node-layer error.
    #[error(transparent)]
    Node(#[from] meshcore_node::NodeError),

    /// A wire codec error.
    #[error(transparent)]
    Proto(#[from] meshcore_proto::ProtoError),

    /// A cryptographic error.
    #[error(transparent)]
    Crypto(#[from] meshcore_crypto::CryptoError),
}

/// Convenience result type for room operations.
pub type Result<T> = std::result::Result<T, RoomError>;
