//! Answering discover requests.
//!
//! A discover request is a control packet asking every node in earshot to
//! identify itself; each responder answers with its node type, the SNR at
//! which it heard the request, the request's correlation tag, and its
//! public key (an 8-byte prefix when the request asked for brevity).
//!
//! The `since` field filters repeaters answering on behalf of *other*
//! recently heard nodes; a node describing itself is always current, so it
//! is ignored here.

use meshcore_crypto::NodeId;
use meshcore_proto::advert::NodeType;
use meshcore_proto::control::{subtype, DiscoverRequest, DiscoverResponse, SUBTYPE_DISCOVER_REQ};
use meshcore_proto::{Packet, PayloadType, RouteType};

/// Answers discover requests on behalf of this node.
#[derive(Debug, Clone)]
pub struct DiscoverResponder {
    self_id: NodeId,
    node_type: NodeType,
}

impl DiscoverResponder {
    /// Create a responder describing this node.
    pub fn new(self_id: NodeId, node_type: NodeType) -> Self {
        Self { self_id, node_type }
    }

    /// Build the response to a received packet, if it is a discover request
    /// this node should answer. The caller chooses the route (typically
    /// zero-hop, since the request came from radio range).
    pub fn response_for(&self, packet: &Packet) -> Option<Packet> {
        if packet.payload_type() != Some(PayloadType::Control) {
            return None;
        }
        if subtype(&packet.payload).ok()? != SUBTYPE_DISCOVER_REQ {
            return None;
        }
        let request = match DiscoverRequest::parse(&packet.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed discover request");
                return None;
            }
        };
        if request.type_filter != 0 && request.type_filter != self.node_type as u8 {
            return None;
        }

        let pub_key = if request.prefix_only {
            self.self_id.as_bytes()[..8].to_vec()
        } else {
            self.self_id.to_bytes().to_vec()
        };
        let response = DiscoverResponse {
            node_type: self.node_type as u8,
            snr: packet.snr,
            tag: request.tag,
            pub_key,
        };
        match Packet::new(RouteType::Direct, PayloadType::Control, response.build()) {
            Ok(packet) => Some(packet),
            Err(e) => {
                tracing::warn!(error = %e, "discover response build failed");
                None
            }
        }
    }
}
