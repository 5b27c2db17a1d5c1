//! Integration test: contact lifecycle between two nodes.
//!
//! 1. Advert ingest with the strictly-monotonic replay guard
//! 2. Path announcement installing a direct route
//! 3. Cached shared secrets carrying an encrypted message both ways
//! 4. Eviction pressure with a favourite contact
//!
//! Uses real keys and real encryption; no network I/O.

use meshcore_crypto::{cipher, NodeKeys};
use meshcore_node::contacts::{AdvertIngest, ContactStore};
use meshcore_node::NodeError;
use meshcore_proto::advert::{Advert, AdvertAppData, NodeType};
use meshcore_proto::payload::{Addressed, PathContent, TextContent};

fn advert(keys: &NodeKeys, timestamp: u32, name: &str) -> Advert {
    Advert::build_signed(keys, timestamp, &AdvertAppData::named(NodeType::Chat, name))
}

#[test]
fn advert_replay_guard_is_strictly_monotonic() {
    let store = ContactStore::new();
    let alice = NodeKeys::generate();

    // =========================================================
    // Step 1: First advert at ts=2000 is stored as new
    // =========================================================
    let first = advert(&alice, 2000, "Alice");
    assert!(matches!(
        store.process_advert(&first, 1, true).expect("ingest"),
        AdvertIngest::New(_)
    ));

    // =========================================================
    // Step 2: Re-processing the identical advert is a replay
    // =========================================================
    assert!(matches!(
        store.process_advert(&first, 2, true),
        Err(NodeError::PossibleReplay { .. })
    ));

    // =========================================================
    // Step 3: ts=1999 is also a replay; ts=2001 is an update
    // =========================================================
    assert!(matches!(
        store.process_advert(&advert(&alice, 1999, "Alice"), 3, true),
        Err(NodeError::PossibleReplay { .. })
    ));
    assert!(matches!(
        store
            .process_advert(&advert(&alice, 2001, "Alice"), 4, true)
            .expect("ingest"),
        AdvertIngest::Updated(_)
    ));
    assert_eq!(store.count(), 1);
}

#[test]
fn path_announcement_installs_direct_route() {
    let store = ContactStore::new();
    let alice = NodeKeys::generate();
    store
        .process_advert(&advert(&alice, 100, "Alice"), 1, true)
        .expect("ingest");

    // Before any path: route unknown.
    let contact = store.get_by_pub_key(&alice.node_id()).expect("contact");
    assert!(!contact.has_out_path());

    let content = PathContent {
        path: vec![0x11, 0x22],
        extra_type: 0,
        extra: Vec::new(),
    };
    let (contact, _, _) = store
        .process_path(&alice.node_id(), &content, 50)
        .expect("path");
    assert_eq!(contact.out_path.as_deref(), Some(&[0x11, 0x22][..]));
}

#[test]
fn cached_secrets_carry_messages_both_ways() {
    // =========================================================
    // Step 1: Two nodes learn each other from adverts
    // =========================================================
    let alice = NodeKeys::generate();
    let bob = NodeKeys::generate();
    let alice_store = ContactStore::new();
    let bob_store = ContactStore::new();
    alice_store
        .process_advert(&advert(&bob, 10, "Bob"), 1, true)
        .expect("ingest");
    bob_store
        .process_advert(&advert(&alice, 10, "Alice"), 1, true)
        .expect("ingest");

    // =========================================================
    // Step 2: Alice encrypts a text message for Bob
    // =========================================================
    let secret = alice_store
        .get_shared_secret(&bob.node_id(), &alice)
        .expect("secret");
    let content = TextContent::plain(1_700_000_000, b"hello bob");
    let sealed = cipher::encrypt_then_mac(&secret, &content.build()).expect("encrypt");
    let addressed = Addressed {
        dest_hash: bob.node_id().hash(),
        src_hash: alice.node_id().hash(),
        sealed,
    };

    // =========================================================
    // Step 3: Bob locates the sender by hash and decrypts
    // =========================================================
    let wire = addressed.build();
    let received = Addressed::parse(&wire).expect("parse");
    let candidates = bob_store.search_by_hash(received.src_hash);
    assert!(!candidates.is_empty());

    let mut decrypted = None;
    for candidate in candidates {
        let secret = bob_store
            .get_shared_secret(&candidate.id, &bob)
            .expect("secret");
        if let Ok(plain) = cipher::mac_then_decrypt(&secret, &received.sealed) {
            decrypted = Some(plain);
            break;
        }
    }
    let plain = decrypted.expect("one candidate decrypts");
    let parsed = TextContent::parse(&plain).expect("content");
    assert_eq!(parsed.message, b"hello bob");
    assert_eq!(parsed.timestamp, 1_700_000_000);

    // =========================================================
    // Step 4: The cached secret equals a fresh computation
    // =========================================================
    let cached = bob_store
        .get_shared_secret(&alice.node_id(), &bob)
        .expect("secret");
    assert_eq!(cached, bob.shared_secret(&alice.node_id()).expect("secret"));
}

#[test]
fn favourite_survives_store_pressure() {
    let store = ContactStore::with_capacity(2, true);
    let favourite = NodeKeys::generate();
    store
        .process_advert(&advert(&favourite, 100, "Keeper"), 1, true)
        .expect("ingest");
    store
        .set_favourite(&favourite.node_id(), true)
        .expect("favourite");

    // Churn through more contacts than the store holds.
    for i in 0..4u32 {
        let peer = NodeKeys::generate();
        store
            .process_advert(&advert(&peer, 100, "Churn"), 10 + i, true)
            .expect("ingest");
    }

    assert_eq!(store.count(), 2);
    assert!(store.get_by_pub_key(&favourite.node_id()).is_some());
}
