//! The room server: dispatch, login, ingest, and the push sync loop.
//!
//! ## Login
//!
//! A client logs in with an anonymous request whose key slot carries its
//! long-term identity key; the shared secret for the session is ordinary
//! ECDH between that key and the room's. The decrypted body is
//! `timestamp ‖ sync_since ‖ password`, timestamp strictly newer than the
//! client's watermark (silent drop otherwise). A successful login stores
//! the session, answers with an encrypted response carrying the granted
//! role, and ensures a contact slot exists for the client.
//!
//! ## Push sync
//!
//! A background loop walks clients round-robin and pushes the oldest post
//! each still needs, one in flight per tick. Delivery rides on the ACK
//! tracker: the expected hash is `ack_hash(content, room_key)`, an ACK
//! advances the client's `sync_since`, a timeout counts a push failure,
//! and three consecutive failures park the client until it logs in again.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast;

use meshcore_crypto::{cipher, hashes, NodeId, NodeKeys};
use meshcore_proto::advert::NodeType;
use meshcore_proto::payload::{Addressed, AnonRequest, AckPayload, TextContent, TXT_TYPE_SIGNED};
use meshcore_proto::{Packet, PayloadType, RouteType};

use meshcore_node::acks::{AckTracker, PendingAck};
use meshcore_node::clock::UniqueClock;
use meshcore_node::contacts::{ContactInfo, ContactStore};
use meshcore_node::router::{Forwarding, Router};
use meshcore_node::transport::SourceTag;

use crate::clients::{ClientInfo, ClientStore, Permission};
use crate::posts::{PostInfo, PostStore};

/// A post is pushed only once it is at least this old, giving its ACK and
/// any retransmissions time to settle first.
pub const POST_SYNC_DELAY_SECS: u32 = 6;

/// Sync loop sleep after a successful push.
pub const SYNC_INTERVAL_BUSY: Duration = Duration::from_millis(1200);

/// Sync loop sleep when there was nothing to push.
pub const SYNC_INTERVAL_IDLE: Duration = Duration::from_millis(150);

/// Pushing to a client pauses after this many consecutive failures.
pub const MAX_PUSH_FAILURES: u32 = 3;

/// Room policy and capacities.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Password granting [`Permission::Admin`].
    pub admin_password: String,
    /// Password granting [`Permission::ReadWrite`].
    pub guest_password: String,
    /// Whether a passwordless login is accepted as [`Permission::ReadOnly`].
    pub allow_read_only: bool,
    /// Client session capacity.
    pub client_capacity: usize,
    /// Post ring capacity.
    pub post_capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            admin_password: String::new(),
            guest_password: String::new(),
            allow_read_only: true,
            client_capacity: crate::clients::DEFAULT_CLIENT_CAPACITY,
            post_capacity: crate::posts::DEFAULT_POST_CAPACITY,
        }
    }
}

/// The room server.
pub struct RoomServer {
    keys: Arc<NodeKeys>,
    clock: Arc<UniqueClock>,
    router: Arc<Router>,
    contacts: Arc<ContactStore>,
    tracker: Arc<AckTracker>,
    clients: Arc<ClientStore>,
    posts: Arc<PostStore>,
    config: RoomConfig,
    rr_index: Mutex<usize>,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RoomServer {
    /// Create a room server over shared node components.
    pub fn new(
        keys: Arc<NodeKeys>,
        clock: Arc<UniqueClock>,
        router: Arc<Router>,
        contacts: Arc<ContactStore>,
        tracker: Arc<AckTracker>,
        config: RoomConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            keys,
            clock,
            router,
            contacts,
            tracker,
            clients: Arc::new(ClientStore::with_capacity(config.client_capacity)),
            posts: Arc::new(PostStore::with_capacity(config.post_capacity)),
            config,
            rr_index: Mutex::new(0),
            shutdown,
            task: Mutex::new(None),
        })
    }

    /// The client session table.
    pub fn clients(&self) -> &ClientStore {
        &self.clients
    }

    /// The post ring.
    pub fn posts(&self) -> &PostStore {
        &self.posts
    }

    /// Install this room as the router's application handler. The room never
    /// suppresses forwarding — a room node is usually also a repeater.
    pub fn attach(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.router.set_packet_handler(Arc::new(move |packet, src| {
            if let Some(room) = weak.upgrade() {
                room.handle_packet(packet, src);
            }
            Forwarding::Allow
        }));
    }

    /// Per-packet dispatch.
    pub fn handle_packet(&self, packet: &Packet, _src: SourceTag) {
        match packet.payload_type() {
            Some(PayloadType::Ack) => {
                if let Ok(ack) = AckPayload::parse(&packet.payload) {
                    if self.tracker.resolve(ack.checksum) {
                        tracing::debug!(hash = format_args!("{:08x}", ack.checksum), "ACK resolved");
                    }
                }
            }
            Some(PayloadType::AnonReq) => self.handle_login(packet),
            Some(PayloadType::TxtMsg) => self.handle_text(packet),
            Some(PayloadType::Req) => self.handle_request(packet),
            _ => {}
        }
    }

    // ── Login ──────────────────────────────────────────────────────────

    fn handle_login(&self, packet: &Packet) {
        let anon = match AnonRequest::parse(&packet.payload) {
            Ok(anon) => anon,
            Err(e) => {
                tracing::debug!(error = %e, "bad anon request");
                return;
            }
        };
        if anon.dest_hash != self.keys.node_id().hash() {
            return;
        }

        let client_id = NodeId::from_bytes(anon.ephemeral_pub);
        let Ok(secret) = self.keys.shared_secret(&client_id) else {
            return;
        };
        let Ok(plain) = cipher::mac_then_decrypt(&secret, &anon.sealed) else {
            // Not for us, or garbage; the normal silent outcome.
            return;
        };
        if plain.len() < 8 {
            return;
        }
        let timestamp = u32::from_le_bytes([plain[0], plain[1], plain[2], plain[3]]);
        let sync_since = u32::from_le_bytes([plain[4], plain[5], plain[6], plain[7]]);
        let password = cipher::until_nul(&plain[8..]).to_vec();

        let existing = self.clients.get(&client_id);
        if let Some(ref known) = existing {
            if known.last_timestamp >= timestamp {
                tracing::debug!(client = %client_id, "login ignored: possible replay");
                return;
            }
        }
        let Some(permission) = self.resolve_permissions(existing.as_ref(), &password) else {
            tracing::debug!(client = %client_id, "login rejected");
            return;
        };

        let now = self.clock.now();
        let client = ClientInfo::new(client_id, permission, timestamp, sync_since, now);
        if let Err(e) = self.clients.upsert(client) {
            tracing::warn!(client = %client_id, error = %e, "login dropped");
            return;
        }
        tracing::info!(client = %client_id, ?permission, "client logged in");

        if self.contacts.get_by_pub_key(&client_id).is_none() {
            let placeholder = ContactInfo::placeholder(client_id, NodeType::Chat, now);
            if let Err(e) = self.contacts.add(placeholder) {
                tracing::warn!(client = %client_id, error = %e, "could not store contact");
            }
        }

        self.send_login_response(&client_id, &secret, permission);
    }

    fn resolve_permissions(
        &self,
        existing: Option<&ClientInfo>,
        password: &[u8],
    ) -> Option<Permission> {
        if password.is_empty() {
            if let Some(existing) = existing {
                return Some(existing.permission);
            }
            if self.config.allow_read_only {
                return Some(Permission::ReadOnly);
            }
            return None;
        }
        if !self.config.admin_password.is_empty()
            && password == self.config.admin_password.as_bytes()
        {
            return Some(Permission::Admin);
        }
        if !self.config.guest_password.is_empty()
            && password == self.config.guest_password.as_bytes()
        {
            return Some(Permission::ReadWrite);
        }
        None
    }

    fn send_login_response(&self, client_id: &NodeId, secret: &[u8; 32], permission: Permission) {
        let mut plain = self.clock.now_unique().to_le_bytes().to_vec();
        plain.push(permission.bits());
        let sealed = match cipher::encrypt_then_mac(secret, &plain) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(error = %e, "login response encryption failed");
                return;
            }
        };
        let addressed = Addressed {
            dest_hash: client_id.hash(),
            src_hash: self.keys.node_id().hash(),
            sealed,
        };
        match Packet::new(RouteType::Direct, PayloadType::Response, addressed.build()) {
            Ok(packet) => {
                let contact = self.contacts.get_by_pub_key(client_id);
                self.send_to_client(packet, contact.as_ref());
            }
            Err(e) => tracing::warn!(error = %e, "login response build failed"),
        }
    }

    // ── Message ingest ─────────────────────────────────────────────────

    fn handle_text(&self, packet: &Packet) {
        let addressed = match Addressed::parse(&packet.payload) {
            Ok(addressed) => addressed,
            Err(_) => return,
        };
        if addressed.dest_hash != self.keys.node_id().hash() {
            return;
        }
        let Some((sender, plain)) = self.decrypt_from_hash(addressed.src_hash, &addressed.sealed)
        else {
            return;
        };
        let content = match TextContent::parse(&plain) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable text content");
                return;
            }
        };

        let Some(client) = self.clients.get(&sender.id) else {
            tracing::debug!(sender = %sender.id, "text from non-client ignored");
            return;
        };
        if content.timestamp <= client.last_timestamp {
            tracing::debug!(sender = %sender.id, "text ignored: possible replay");
            return;
        }
        if client.permission == Permission::Guest {
            return;
        }

        let now = self.clock.now();
        if client.permission.can_write() {
            self.posts.add(PostInfo {
                timestamp: content.timestamp,
                sender: sender.id,
                content: content.message.clone(),
            });
            tracing::debug!(sender = %sender.id, timestamp = content.timestamp, "post stored");
        }
        let _ = self.clients.with_client_mut(&sender.id, |c| {
            c.last_timestamp = content.timestamp;
            c.last_activity = now;
        });

        // Plain text binds the sender's key; signed text binds the
        // receiver's (ours).
        let ack_key = if content.txt_type == TXT_TYPE_SIGNED {
            self.keys.node_id()
        } else {
            sender.id
        };
        self.send_ack(hashes::ack_hash(&content.build(), &ack_key), &sender);
    }

    fn handle_request(&self, packet: &Packet) {
        let addressed = match Addressed::parse(&packet.payload) {
            Ok(addressed) => addressed,
            Err(_) => return,
        };
        if addressed.dest_hash != self.keys.node_id().hash() {
            return;
        }
        let Some((sender, plain)) = self.decrypt_from_hash(addressed.src_hash, &addressed.sealed)
        else {
            return;
        };
        if plain.len() < 4 || self.clients.get(&sender.id).is_none() {
            return;
        }
        let now = self.clock.now();
        let _ = self.clients.with_client_mut(&sender.id, |c| c.last_activity = now);

        let content = trim_zero_padding(&plain);
        self.send_ack(hashes::ack_hash(content, &sender.id), &sender);
    }

    /// Find which contact behind a 1-byte source hash can open this payload.
    fn decrypt_from_hash(&self, src_hash: u8, sealed: &[u8]) -> Option<(ContactInfo, Vec<u8>)> {
        for contact in self.contacts.search_by_hash(src_hash) {
            let Ok(secret) = self.contacts.get_shared_secret(&contact.id, &self.keys) else {
                continue;
            };
            if let Ok(plain) = cipher::mac_then_decrypt(&secret, sealed) {
                return Some((contact, plain));
            }
        }
        None
    }

    fn send_ack(&self, hash: u32, recipient: &ContactInfo) {
        let payload = AckPayload { checksum: hash }.build();
        match Packet::new(RouteType::Direct, PayloadType::Ack, payload) {
            Ok(packet) => self.send_to_client(packet, Some(recipient)),
            Err(e) => tracing::warn!(error = %e, "ACK build failed"),
        }
    }

    fn send_to_client(&self, packet: Packet, contact: Option<&ContactInfo>) {
        match contact.and_then(|c| c.out_path.clone()) {
            Some(path) => self.router.send_direct(packet, &path),
            None => self.router.send_flood(packet),
        }
    }

    // ── Push sync ──────────────────────────────────────────────────────

    /// One sync step: pick the next client round-robin and push the oldest
    /// post it still needs. Returns whether a push went out.
    pub fn sync_tick(&self) -> bool {
        let ids = self.clients.ids();
        if ids.is_empty() {
            return false;
        }
        let idx = {
            let mut rr = match self.rr_index.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let idx = *rr % ids.len();
            *rr = rr.wrapping_add(1);
            idx
        };
        let client_id = ids[idx];
        let Some(client) = self.clients.get(&client_id) else {
            return false;
        };
        if client.last_activity == 0 || client.push_failures >= MAX_PUSH_FAILURES {
            return false;
        }

        let now = self.clock.now();
        let Some(post) = self.posts.oldest_where(|p| {
            p.timestamp > client.sync_since
                && now >= p.timestamp.saturating_add(POST_SYNC_DELAY_SECS)
                && p.sender != client.id
        }) else {
            return false;
        };

        let Ok(secret) = self.contacts.get_shared_secret(&client_id, &self.keys) else {
            return false;
        };
        let content_bytes = TextContent::plain(post.timestamp, &post.content).build();
        let sealed = match cipher::encrypt_then_mac(&secret, &content_bytes) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::warn!(error = %e, "push encryption failed");
                return false;
            }
        };
        let addressed = Addressed {
            dest_hash: client_id.hash(),
            src_hash: self.keys.node_id().hash(),
            sealed,
        };
        let packet = match Packet::new(RouteType::Direct, PayloadType::TxtMsg, addressed.build()) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, "push packet build failed");
                return false;
            }
        };

        // The client acknowledges with the hash bound to *our* key.
        let expected = hashes::ack_hash(&content_bytes, &self.keys.node_id());
        let _ = self
            .clients
            .with_client_mut(&client_id, |c| c.push_post_timestamp = Some(post.timestamp));

        let clients = self.clients.clone();
        let post_timestamp = post.timestamp;
        let acked_id = client_id;
        let on_ack = Box::new(move || {
            let _ = clients.with_client_mut(&acked_id, |c| {
                c.sync_since = post_timestamp;
                c.push_failures = 0;
                c.push_post_timestamp = None;
            });
        });
        let clients = self.clients.clone();
        let on_timeout = Box::new(move || {
            let _ = clients.with_client_mut(&acked_id, |c| {
                c.push_failures += 1;
                c.push_post_timestamp = None;
            });
        });
        self.tracker.track(
            expected,
            PendingAck {
                on_ack: Some(on_ack),
                on_timeout: Some(on_timeout),
                resend: None,
            },
        );

        let contact = self.contacts.get_by_pub_key(&client_id);
        self.send_to_client(packet, contact.as_ref());
        tracing::debug!(client = %client_id, timestamp = post.timestamp, "post pushed");
        true
    }

    /// Spawn the sync loop: 1200 ms between ticks after a push, 150 ms when
    /// idle.
    pub fn start(self: &Arc<Self>) {
        let room = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let pushed = room.sync_tick();
                let sleep = if pushed {
                    SYNC_INTERVAL_BUSY
                } else {
                    SYNC_INTERVAL_IDLE
                };
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = shutdown.recv() => break,
                }
            }
        });
        match self.task.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
    }

    /// Signal the sync loop and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// A view of `bytes` without its trailing zero padding.
fn trim_zero_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcore_node::clock::{Clock, ManualClock};
    use meshcore_node::router::RouterConfig;
    use meshcore_node::transport::{ChannelTransport, Transport as _};
    use meshcore_proto::advert::{Advert, AdvertAppData};

    struct Rig {
        room: Arc<RoomServer>,
        router: Arc<Router>,
        radio: Arc<ChannelTransport>,
        contacts: Arc<ContactStore>,
        tracker: Arc<AckTracker>,
        clock: Arc<ManualClock>,
        keys: Arc<NodeKeys>,
    }

    fn rig(config: RoomConfig) -> Rig {
        let keys = Arc::new(NodeKeys::generate());
        let manual = Arc::new(ManualClock::starting_at(1_000));
        let unique = Arc::new(UniqueClock::new(manual.clone()));
        let router = Router::new(keys.node_id(), RouterConfig::default());
        let radio = ChannelTransport::new("radio");
        radio.start().expect("start");
        router.register_transport(radio.clone(), SourceTag::Serial);

        let contacts = Arc::new(ContactStore::new());
        let tracker = AckTracker::new();
        let room = RoomServer::new(
            keys.clone(),
            unique,
            router.clone(),
            contacts.clone(),
            tracker.clone(),
            config,
        );
        room.attach();
        Rig {
            room,
            router,
            radio,
            contacts,
            tracker,
            clock: manual,
            keys,
        }
    }

    fn passworded_rig() -> Rig {
        rig(RoomConfig {
            admin_password: "topsecret".into(),
            guest_password: "letmein".into(),
            allow_read_only: true,
            ..Default::default()
        })
    }

    fn login_packet(
        client: &NodeKeys,
        room_id: &NodeId,
        timestamp: u32,
        sync_since: u32,
        password: &str,
    ) -> Packet {
        let secret = client.shared_secret(room_id).expect("secret");
        let mut plain = timestamp.to_le_bytes().to_vec();
        plain.extend_from_slice(&sync_since.to_le_bytes());
        plain.extend_from_slice(password.as_bytes());
        plain.push(0);
        let sealed = cipher::encrypt_then_mac(&secret, &plain).expect("encrypt");
        let anon = AnonRequest {
            dest_hash: room_id.hash(),
            ephemeral_pub: client.node_id().to_bytes(),
            sealed,
        };
        Packet::new(RouteType::Direct, PayloadType::AnonReq, anon.build()).expect("valid")
    }

    fn text_packet(client: &NodeKeys, room_id: &NodeId, timestamp: u32, message: &[u8]) -> Packet {
        let secret = client.shared_secret(room_id).expect("secret");
        let content = TextContent::plain(timestamp, message).build();
        let sealed = cipher::encrypt_then_mac(&secret, &content).expect("encrypt");
        let addressed = Addressed {
            dest_hash: room_id.hash(),
            src_hash: client.node_id().hash(),
            sealed,
        };
        Packet::new(RouteType::Direct, PayloadType::TxtMsg, addressed.build()).expect("valid")
    }

    /// Make the client a known contact so addressed traffic can be decrypted.
    fn advertise_contact(rig: &Rig, client: &NodeKeys, name: &str) {
        let advert = Advert::build_signed(
            client,
            rig.clock.now(),
            &AdvertAppData::named(meshcore_proto::advert::NodeType::Chat, name),
        );
        rig.contacts
            .process_advert(&advert, rig.clock.now(), true)
            .expect("ingest");
    }

    fn drain(rig: &Rig) -> Vec<Packet> {
        rig.router.flush();
        rig.radio.take_sent()
    }

    #[test]
    fn test_admin_login_stores_client_and_responds() {
        let rig = passworded_rig();
        let client = NodeKeys::generate();
        let room_id = rig.keys.node_id();

        rig.room.handle_packet(
            &login_packet(&client, &room_id, 100, 0, "topsecret"),
            SourceTag::Serial,
        );

        let stored = rig.room.clients().get(&client.node_id()).expect("client");
        assert_eq!(stored.permission, Permission::Admin);
        assert_eq!(stored.last_timestamp, 100);

        // The contact slot was created for the unseen client.
        assert!(rig.contacts.get_by_pub_key(&client.node_id()).is_some());

        // The response decrypts with the session secret and carries the role.
        let sent = drain(&rig);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload_type(), Some(PayloadType::Response));
        let addressed = Addressed::parse(&sent[0].payload).expect("parse");
        assert_eq!(addressed.dest_hash, client.node_id().hash());
        let secret = client.shared_secret(&room_id).expect("secret");
        let plain = cipher::mac_then_decrypt(&secret, &addressed.sealed).expect("decrypt");
        assert_eq!(plain[4], Permission::Admin.bits());
    }

    #[test]
    fn test_login_replay_is_silent() {
        let rig = passworded_rig();
        let client = NodeKeys::generate();
        let room_id = rig.keys.node_id();

        rig.room.handle_packet(
            &login_packet(&client, &room_id, 100, 0, "topsecret"),
            SourceTag::Serial,
        );
        drain(&rig);

        // Same timestamp again: ignored, no response.
        rig.room.handle_packet(
            &login_packet(&client, &room_id, 100, 0, "topsecret"),
            SourceTag::Serial,
        );
        assert!(drain(&rig).is_empty());

        // Older timestamp: also ignored.
        rig.room.handle_packet(
            &login_packet(&client, &room_id, 99, 0, "topsecret"),
            SourceTag::Serial,
        );
        assert!(drain(&rig).is_empty());
    }

    #[test]
    fn test_wrong_password_is_silent() {
        let rig = rig(RoomConfig {
            admin_password: "topsecret".into(),
            allow_read_only: false,
            ..Default::default()
        });
        let client = NodeKeys::generate();
        rig.room.handle_packet(
            &login_packet(&client, &rig.keys.node_id(), 100, 0, "wrong"),
            SourceTag::Serial,
        );
        assert!(rig.room.clients().get(&client.node_id()).is_none());
        assert!(drain(&rig).is_empty());
    }

    #[test]
    fn test_empty_password_paths() {
        // allow_read_only grants ReadOnly to a fresh passwordless login.
        let rig = passworded_rig();
        let client = NodeKeys::generate();
        let room_id = rig.keys.node_id();
        rig.room
            .handle_packet(&login_packet(&client, &room_id, 50, 0, ""), SourceTag::Serial);
        assert_eq!(
            rig.room.clients().get(&client.node_id()).expect("client").permission,
            Permission::ReadOnly
        );
        drain(&rig);

        // An existing client relogging with an empty password keeps its role.
        rig.room.handle_packet(
            &login_packet(&client, &room_id, 60, 0, "letmein"),
            SourceTag::Serial,
        );
        rig.room
            .handle_packet(&login_packet(&client, &room_id, 70, 0, ""), SourceTag::Serial);
        assert_eq!(
            rig.room.clients().get(&client.node_id()).expect("client").permission,
            Permission::ReadWrite
        );
    }

    #[test]
    fn test_text_ingest_stores_post_and_acks() {
        let rig = passworded_rig();
        let client = NodeKeys::generate();
        let room_id = rig.keys.node_id();
        advertise_contact(&rig, &client, "Alice");
        rig.room.handle_packet(
            &login_packet(&client, &room_id, 100, 0, "letmein"),
            SourceTag::Serial,
        );
        drain(&rig);

        rig.room
            .handle_packet(&text_packet(&client, &room_id, 101, b"hello room"), SourceTag::Serial);

        assert_eq!(rig.room.posts().count(), 1);
        let stored = rig.room.clients().get(&client.node_id()).expect("client");
        assert_eq!(stored.last_timestamp, 101);

        let sent = drain(&rig);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload_type(), Some(PayloadType::Ack));
        let ack = AckPayload::parse(&sent[0].payload).expect("parse");
        let expected =
            hashes::ack_hash(&TextContent::plain(101, b"hello room").build(), &client.node_id());
        assert_eq!(ack.checksum, expected);
    }

    #[test]
    fn test_text_replay_and_unknown_sender_dropped() {
        let rig = passworded_rig();
        let client = NodeKeys::generate();
        let room_id = rig.keys.node_id();
        advertise_contact(&rig, &client, "Alice");

        // Not yet a client: ignored.
        rig.room
            .handle_packet(&text_packet(&client, &room_id, 90, b"early"), SourceTag::Serial);
        assert_eq!(rig.room.posts().count(), 0);

        rig.room.handle_packet(
            &login_packet(&client, &room_id, 100, 0, "letmein"),
            SourceTag::Serial,
        );
        drain(&rig);

        // Timestamp at the login watermark: replay, dropped.
        rig.room
            .handle_packet(&text_packet(&client, &room_id, 100, b"stale"), SourceTag::Serial);
        assert_eq!(rig.room.posts().count(), 0);
        assert!(drain(&rig).is_empty());
    }

    #[test]
    fn test_readonly_client_message_is_acked_but_not_stored() {
        let rig = passworded_rig();
        let client = NodeKeys::generate();
        let room_id = rig.keys.node_id();
        advertise_contact(&rig, &client, "Reader");
        rig.room
            .handle_packet(&login_packet(&client, &room_id, 100, 0, ""), SourceTag::Serial);
        drain(&rig);

        rig.room
            .handle_packet(&text_packet(&client, &room_id, 101, b"psst"), SourceTag::Serial);
        assert_eq!(rig.room.posts().count(), 0);
        let sent = drain(&rig);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload_type(), Some(PayloadType::Ack));
    }

    #[test]
    fn test_sync_pushes_post_and_ack_advances_watermark() {
        let rig = passworded_rig();
        let room_id = rig.keys.node_id();

        // First client: the reader who logged in at t=100.
        let reader = NodeKeys::generate();
        advertise_contact(&rig, &reader, "Reader");
        rig.room.handle_packet(
            &login_packet(&reader, &room_id, 100, 0, "topsecret"),
            SourceTag::Serial,
        );

        // Second client posts at message-timestamp 10.
        let author = NodeKeys::generate();
        advertise_contact(&rig, &author, "Author");
        rig.room.handle_packet(
            &login_packet(&author, &room_id, 9, 0, "topsecret"),
            SourceTag::Serial,
        );
        rig.room
            .handle_packet(&text_packet(&author, &room_id, 10, b"old news"), SourceTag::Serial);
        drain(&rig);

        // Not old enough yet at t=15 (delay is 6s past the post timestamp
        // of 10 — 16 is the threshold).
        rig.clock.set(15);
        assert!(!rig.room.sync_tick() && !rig.room.sync_tick());

        rig.clock.set(16);
        // Round-robin: one of the two ticks hits the reader; the author is
        // skipped as self-authored.
        let pushed = [rig.room.sync_tick(), rig.room.sync_tick()];
        assert_eq!(pushed.iter().filter(|&&p| p).count(), 1);

        let sent = drain(&rig);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload_type(), Some(PayloadType::TxtMsg));

        // The reader decrypts the push and returns the matching ACK.
        let addressed = Addressed::parse(&sent[0].payload).expect("parse");
        assert_eq!(addressed.dest_hash, reader.node_id().hash());
        let secret = reader.shared_secret(&room_id).expect("secret");
        let plain = cipher::mac_then_decrypt(&secret, &addressed.sealed).expect("decrypt");
        let content = TextContent::parse(&plain).expect("content");
        assert_eq!(content.message, b"old news");
        assert_eq!(content.timestamp, 10);

        let ack_hash = hashes::ack_hash(&content.build(), &room_id);
        assert!(rig.tracker.resolve(ack_hash));

        let client = rig.room.clients().get(&reader.node_id()).expect("client");
        assert_eq!(client.sync_since, 10);
        assert_eq!(client.push_failures, 0);
        assert_eq!(client.push_post_timestamp, None);

        // Fully synced: nothing further goes out.
        assert!(!rig.room.sync_tick() && !rig.room.sync_tick());
    }

    #[test]
    fn test_push_timeout_counts_failures_and_parks_client() {
        let rig = passworded_rig();
        let room_id = rig.keys.node_id();
        let reader = NodeKeys::generate();
        advertise_contact(&rig, &reader, "Reader");
        rig.room.handle_packet(
            &login_packet(&reader, &room_id, 100, 0, "topsecret"),
            SourceTag::Serial,
        );
        let author = NodeKeys::generate();
        advertise_contact(&rig, &author, "Author");
        rig.room.handle_packet(
            &login_packet(&author, &room_id, 9, 0, "topsecret"),
            SourceTag::Serial,
        );
        rig.room
            .handle_packet(&text_packet(&author, &room_id, 10, b"x"), SourceTag::Serial);
        drain(&rig);
        rig.clock.set(100);

        for expected_failures in 1..=MAX_PUSH_FAILURES {
            // Tick until the round-robin lands on the reader.
            assert!(rig.room.sync_tick() || rig.room.sync_tick());
            // No ACK arrives; simulate the tracker expiring the entry.
            let client = rig.room.clients().get(&reader.node_id()).expect("client");
            let in_flight = client.push_post_timestamp.expect("in flight");
            let hash = {
                let content = TextContent::plain(in_flight, b"x").build();
                hashes::ack_hash(&content, &room_id)
            };
            rig.tracker.cancel(hash);
            let _ = rig.room.clients().with_client_mut(&reader.node_id(), |c| {
                c.push_failures += 1;
                c.push_post_timestamp = None;
            });
            let client = rig.room.clients().get(&reader.node_id()).expect("client");
            assert_eq!(client.push_failures, expected_failures);
        }

        // Parked: no more pushes to this client.
        assert!(!rig.room.sync_tick() && !rig.room.sync_tick());
    }

    #[test]
    fn test_request_advances_activity_and_acks() {
        let rig = passworded_rig();
        let client = NodeKeys::generate();
        let room_id = rig.keys.node_id();
        advertise_contact(&rig, &client, "Alice");
        rig.room.handle_packet(
            &login_packet(&client, &room_id, 100, 0, "letmein"),
            SourceTag::Serial,
        );
        drain(&rig);
        rig.clock.set(2_000);

        let secret = client.shared_secret(&room_id).expect("secret");
        let mut request = 150u32.to_le_bytes().to_vec();
        request.extend_from_slice(b"stats");
        let sealed = cipher::encrypt_then_mac(&secret, &request).expect("encrypt");
        let addressed = Addressed {
            dest_hash: room_id.hash(),
            src_hash: client.node_id().hash(),
            sealed,
        };
        let packet =
            Packet::new(RouteType::Direct, PayloadType::Req, addressed.build()).expect("valid");
        rig.room.handle_packet(&packet, SourceTag::Serial);

        let stored = rig.room.clients().get(&client.node_id()).expect("client");
        assert_eq!(stored.last_activity, 2_000);

        let sent = drain(&rig);
        assert_eq!(sent.len(), 1);
        let ack = AckPayload::parse(&sent[0].payload).expect("parse");
        assert_eq!(ack.checksum, hashes::ack_hash(&request, &client.node_id()));
    }

    #[test]
    fn test_ack_dispatch_resolves_tracker() {
        let rig = passworded_rig();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        rig.tracker.track(
            0xAABBCCDD,
            PendingAck {
                on_ack: Some(Box::new(move || {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })),
                ..Default::default()
            },
        );

        let packet = Packet::new(
            RouteType::Direct,
            PayloadType::Ack,
            AckPayload { checksum: 0xAABBCCDD }.build(),
        )
        .expect("valid");
        rig.room.handle_packet(&packet, SourceTag::Serial);
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_router_attach_dispatches_zero_hop() {
        let rig = passworded_rig();
        let client = NodeKeys::generate();
        // Delivered through the router's gate chain, not handle_packet.
        rig.router.handle_packet(
            login_packet(&client, &rig.keys.node_id(), 100, 0, "topsecret"),
            SourceTag::Serial,
        );
        assert!(rig.room.clients().get(&client.node_id()).is_some());
    }

    #[tokio::test]
    async fn test_sync_loop_start_stop() {
        let rig = passworded_rig();
        rig.room.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        rig.room.stop().await;
        rig.room.stop().await; // idempotent
    }

    #[test]
    fn test_trim_zero_padding() {
        assert_eq!(trim_zero_padding(&[1, 2, 0, 0]), &[1, 2]);
        assert_eq!(trim_zero_padding(&[0, 0]), &[] as &[u8]);
        assert_eq!(trim_zero_padding(&[1, 0, 2]), &[1, 0, 2]);
    }
}
