//! The contact store: this node's registry of known peers.
//!
//! Contacts live in a flat vector behind one `RwLock`; at mesh scale
//! (hundreds of peers) linear scans beat any index, and the single lock
//! keeps eviction and the shared-secret cache coherent. The registered
//! `on_contact_added` callback always runs after the lock is released —
//! callers may re-enter the store from it.
//!
//! Advert ingest enforces a strictly monotonic timestamp per contact:
//! re-announcing an identical or older timestamp is treated as a possible
//! replay and rejected.

use std::sync::{Mutex, RwLock};

use meshcore_crypto::{NodeId, NodeKeys};
use meshcore_proto::advert::{Advert, LatLon, NodeType};
use meshcore_proto::payload::PathContent;

use crate::{NodeError, Result};

/// Default contact capacity.
pub const DEFAULT_CONTACT_CAPACITY: usize = 100;

/// Hash lookups return at most this many contacts; with a 1-byte collision
/// domain more matches than this means the hash is useless anyway.
pub const MAX_HASH_MATCHES: usize = 8;

/// One known peer.
#[derive(Debug, Clone)]
pub struct ContactInfo {
    /// The peer's identity.
    pub id: NodeId,
    /// Advertised name.
    pub name: String,
    /// Advertised role.
    pub node_type: NodeType,
    /// Raw advert app-data flags byte.
    pub flags: u8,
    /// Direct route to the peer: `None` = unknown, `Some(empty)` = zero-hop
    /// neighbour, `Some(hops)` = relay list.
    pub out_path: Option<Vec<u8>>,
    /// Timestamp of the newest accepted advert; the replay watermark.
    pub last_advert_timestamp: u32,
    /// Local time of the last modification; the eviction key.
    pub last_mod: u32,
    /// Advertised position, if any.
    pub location: Option<LatLon>,
    /// Oldest message timestamp already synchronised from this peer.
    pub sync_since: u32,
    /// Favourites are never evicted.
    pub favourite: bool,
    /// Lazily computed ECDH secret; invalidated when the identity changes.
    shared_secret: Option<[u8; 32]>,
}

impl ContactInfo {
    /// Build a contact from a verified advert.
    pub fn from_advert(advert: &Advert, name: String, node_type: NodeType, now: u32) -> Self {
        let app = advert.app_data().ok();
        Self {
            id: advert.node_id,
            name,
            node_type,
            flags: advert.app_data.first().copied().unwrap_or(0),
            out_path: None,
            last_advert_timestamp: advert.timestamp,
            last_mod: now,
            location: app.and_then(|a| a.location),
            sync_since: 0,
            favourite: false,
            shared_secret: None,
        }
    }

    /// A minimal placeholder for a peer known only by its key — e.g. a room
    /// client that logged in before ever advertising.
    pub fn placeholder(id: NodeId, node_type: NodeType, now: u32) -> Self {
        Self {
            name: format!("~{}", hex::encode(&id.as_bytes()[..4])),
            id,
            node_type,
            flags: 0,
            out_path: None,
            last_advert_timestamp: 0,
            last_mod: now,
            location: None,
            sync_since: 0,
            favourite: false,
            shared_secret: None,
        }
    }

    /// Whether a direct route to this contact is known (zero-hop counts).
    pub fn has_out_path(&self) -> bool {
        self.out_path.is_some()
    }
}

/// Result of ingesting an advert.
#[derive(Debug, Clone)]
pub enum AdvertIngest {
    /// A previously unknown peer was stored.
    New(ContactInfo),
    /// A known peer was updated in place.
    Updated(ContactInfo),
    /// A previously unknown peer with auto-add disabled; not stored.
    Temporary(ContactInfo),
}

impl AdvertIngest {
    /// The contact this ingest produced, stored or not.
    pub fn contact(&self) -> &ContactInfo {
        match self {
            AdvertIngest::New(c) | AdvertIngest::Updated(c) | AdvertIngest::Temporary(c) => c,
        }
    }
}

type ContactAddedFn = Box<dyn Fn(&ContactInfo, bool) + Send + Sync>;

/// The peer registry.
pub struct ContactStore {
    contacts: RwLock<Vec<ContactInfo>>,
    capacity: usize,
    overwrite_when_full: bool,
    on_added: Mutex<Option<ContactAddedFn>>,
}

impl ContactStore {
    /// Create a store with the default capacity, evicting when full.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CONTACT_CAPACITY, true)
    }

    /// Create a store with an explicit capacity and eviction policy.
    pub fn with_capacity(capacity: usize, overwrite_when_full: bool) -> Self {
        Self {
            contacts: RwLock::new(Vec::new()),
            capacity,
            overwrite_when_full,
            on_added: Mutex::new(None),
        }
    }

    /// Register the contact-added callback. Fired (outside the lock) with
    /// `new = true` for fresh contacts and `new = false` for updates.
    pub fn set_on_contact_added(&self, callback: ContactAddedFn) {
        match self.on_added.lock() {
            Ok(mut guard) => *guard = Some(callback),
            Err(poisoned) => *poisoned.into_inner() = Some(callback),
        }
    }

    fn fire_added(&self, contact: &ContactInfo, new: bool) {
        let guard = match self.on_added.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cb) = guard.as_ref() {
            cb(contact, new);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ContactInfo>> {
        match self.contacts.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ContactInfo>> {
        match self.contacts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of stored contacts.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Exact-key lookup.
    pub fn get_by_pub_key(&self, id: &NodeId) -> Option<ContactInfo> {
        self.read().iter().find(|c| c.id == *id).cloned()
    }

    /// All contacts whose 1-byte routing hash matches, capped at
    /// [`MAX_HASH_MATCHES`].
    pub fn search_by_hash(&self, hash: u8) -> Vec<ContactInfo> {
        self.read()
            .iter()
            .filter(|c| c.id.hash() == hash)
            .take(MAX_HASH_MATCHES)
            .cloned()
            .collect()
    }

    /// Visit every contact under the read lock. The callback must not
    /// re-enter the store.
    pub fn for_each(&self, mut f: impl FnMut(&ContactInfo)) {
        for contact in self.read().iter() {
            f(contact);
        }
    }

    /// Add a contact, evicting if necessary.
    ///
    /// Any cached shared secret on the value is discarded — a slot changing
    /// identity must never inherit a secret.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ContactsFull`] when the store is full and either
    /// eviction is disabled or every contact is a favourite.
    pub fn add(&self, mut contact: ContactInfo) -> Result<()> {
        contact.shared_secret = None;
        let stored = {
            let mut contacts = self.write();
            if let Some(existing) = contacts.iter_mut().find(|c| c.id == contact.id) {
                *existing = contact.clone();
                contact
            } else {
                if contacts.len() >= self.capacity {
                    if !self.overwrite_when_full {
                        return Err(NodeError::ContactsFull);
                    }
                    let victim = contacts
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| !c.favourite)
                        .min_by_key(|(_, c)| c.last_mod)
                        .map(|(i, _)| i)
                        .ok_or(NodeError::ContactsFull)?;
                    let evicted = contacts.swap_remove(victim);
                    tracing::debug!(contact = %evicted.id, "evicted oldest contact");
                }
                contacts.push(contact.clone());
                contact
            }
        };
        self.fire_added(&stored, true);
        Ok(())
    }

    /// Update an existing contact in place.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ContactNotFound`] if no contact has this identity.
    pub fn update(&self, contact: ContactInfo) -> Result<()> {
        let updated = {
            let mut contacts = self.write();
            let existing = contacts
                .iter_mut()
                .find(|c| c.id == contact.id)
                .ok_or(NodeError::ContactNotFound)?;
            // Identity is unchanged, so the cached secret survives.
            let secret = existing.shared_secret;
            *existing = contact;
            existing.shared_secret = secret;
            existing.clone()
        };
        self.fire_added(&updated, false);
        Ok(())
    }

    /// Remove a contact.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ContactNotFound`] if no contact has this identity.
    pub fn remove(&self, id: &NodeId) -> Result<()> {
        let mut contacts = self.write();
        let idx = contacts
            .iter()
            .position(|c| c.id == *id)
            .ok_or(NodeError::ContactNotFound)?;
        contacts.swap_remove(idx);
        Ok(())
    }

    /// The ECDH shared secret with a contact, computed on first use and
    /// cached on the contact entry.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ContactNotFound`] for an unknown identity, or a
    /// crypto error if the contact's key does not decode.
    pub fn get_shared_secret(&self, id: &NodeId, keys: &NodeKeys) -> Result<[u8; 32]> {
        let mut contacts = self.write();
        let contact = contacts
            .iter_mut()
            .find(|c| c.id == *id)
            .ok_or(NodeError::ContactNotFound)?;
        if let Some(secret) = contact.shared_secret {
            return Ok(secret);
        }
        let secret = keys.shared_secret(id)?;
        contact.shared_secret = Some(secret);
        Ok(secret)
    }

    /// Mark or unmark a contact as a favourite.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ContactNotFound`] for an unknown identity.
    pub fn set_favourite(&self, id: &NodeId, favourite: bool) -> Result<()> {
        let mut contacts = self.write();
        let contact = contacts
            .iter_mut()
            .find(|c| c.id == *id)
            .ok_or(NodeError::ContactNotFound)?;
        contact.favourite = favourite;
        Ok(())
    }

    /// Ingest a received advert.
    ///
    /// Rejects unnamed adverts, invalid signatures, and timestamps that are
    /// not strictly newer than the stored watermark. Unknown peers are stored
    /// when `auto_add` is set, otherwise returned as a non-stored temporary.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::AdvertRejected`] or [`NodeError::PossibleReplay`]
    /// per the rules above, and capacity errors from [`ContactStore::add`].
    pub fn process_advert(&self, advert: &Advert, now: u32, auto_add: bool) -> Result<AdvertIngest> {
        let app = advert
            .app_data()
            .map_err(|e| NodeError::AdvertRejected(format!("bad app data: {e}")))?;
        let name = match app.name {
            Some(ref name) if !name.is_empty() => name.clone(),
            _ => return Err(NodeError::AdvertRejected("empty name".into())),
        };
        if !advert.verify() {
            return Err(NodeError::AdvertRejected("invalid signature".into()));
        }

        let existing = self.get_by_pub_key(&advert.node_id);
        if let Some(ref known) = existing {
            if advert.timestamp <= known.last_advert_timestamp {
                return Err(NodeError::PossibleReplay {
                    incoming: advert.timestamp,
                    watermark: known.last_advert_timestamp,
                });
            }
        }

        match existing {
            None if !auto_add => Ok(AdvertIngest::Temporary(ContactInfo::from_advert(
                advert,
                name,
                app.node_type,
                now,
            ))),
            None => {
                let contact = ContactInfo::from_advert(advert, name, app.node_type, now);
                self.add(contact.clone())?;
                Ok(AdvertIngest::New(contact))
            }
            Some(_) => {
                let updated = {
                    let mut contacts = self.write();
                    let entry = contacts
                        .iter_mut()
                        .find(|c| c.id == advert.node_id)
                        .ok_or(NodeError::ContactNotFound)?;
                    entry.name = name;
                    entry.node_type = app.node_type;
                    entry.flags = advert.app_data.first().copied().unwrap_or(entry.flags);
                    if app.location.is_some() {
                        entry.location = app.location;
                    }
                    entry.last_advert_timestamp = advert.timestamp;
                    entry.last_mod = now;
                    entry.clone()
                };
                self.fire_added(&updated, false);
                Ok(AdvertIngest::Updated(updated))
            }
        }
    }

    /// Ingest a decrypted path announcement from a known contact.
    ///
    /// Installs the announced route (an empty path is a valid zero-hop
    /// route) and returns the updated contact plus the piggybacked extra
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ContactNotFound`] for an unknown sender.
    pub fn process_path(
        &self,
        sender: &NodeId,
        content: &PathContent,
        now: u32,
    ) -> Result<(ContactInfo, u8, Vec<u8>)> {
        let mut contacts = self.write();
        let contact = contacts
            .iter_mut()
            .find(|c| c.id == *sender)
            .ok_or(NodeError::ContactNotFound)?;
        contact.out_path = Some(content.path.clone());
        contact.last_mod = now;
        Ok((contact.clone(), content.extra_type, content.extra.clone()))
    }
}

impl Default for ContactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcore_proto::advert::AdvertAppData;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn signed_advert(keys: &NodeKeys, ts: u32, name: &str) -> Advert {
        Advert::build_signed(keys, ts, &AdvertAppData::named(NodeType::Chat, name))
    }

    fn stored_contact(id_byte: u8, last_mod: u32) -> ContactInfo {
        let mut id = [id_byte; 32];
        id[0] = id_byte;
        ContactInfo {
            id: NodeId::from_bytes(id),
            name: format!("node-{id_byte}"),
            node_type: NodeType::Chat,
            flags: 0x81,
            out_path: None,
            last_advert_timestamp: 0,
            last_mod,
            location: None,
            sync_since: 0,
            favourite: false,
            shared_secret: None,
        }
    }

    #[test]
    fn test_add_and_lookup() {
        let store = ContactStore::new();
        let contact = stored_contact(0x11, 5);
        store.add(contact.clone()).expect("add");

        assert_eq!(store.count(), 1);
        let found = store.get_by_pub_key(&contact.id).expect("found");
        assert_eq!(found.name, "node-17");
        assert_eq!(store.search_by_hash(0x11).len(), 1);
        assert!(store.search_by_hash(0x99).is_empty());
    }

    #[test]
    fn test_eviction_picks_oldest_non_favourite() {
        let store = ContactStore::with_capacity(2, true);
        store.add(stored_contact(1, 100)).expect("add");
        store.add(stored_contact(2, 50)).expect("add");
        store.add(stored_contact(3, 200)).expect("add");

        assert_eq!(store.count(), 2);
        // Contact 2 had the smallest last_mod and was evicted.
        assert!(store.search_by_hash(2).is_empty());
        assert_eq!(store.search_by_hash(1).len(), 1);
        assert_eq!(store.search_by_hash(3).len(), 1);
    }

    #[test]
    fn test_favourites_survive_eviction() {
        let store = ContactStore::with_capacity(2, true);
        let mut fav = stored_contact(1, 10);
        fav.favourite = true;
        store.add(fav).expect("add");
        store.add(stored_contact(2, 50)).expect("add");
        store.add(stored_contact(3, 200)).expect("add");

        assert_eq!(store.search_by_hash(1).len(), 1);
        assert!(store.search_by_hash(2).is_empty());
    }

    #[test]
    fn test_all_favourites_means_full() {
        let store = ContactStore::with_capacity(1, true);
        let mut fav = stored_contact(1, 10);
        fav.favourite = true;
        store.add(fav).expect("add");
        assert!(matches!(
            store.add(stored_contact(2, 50)),
            Err(NodeError::ContactsFull)
        ));
    }

    #[test]
    fn test_no_overwrite_means_full() {
        let store = ContactStore::with_capacity(1, false);
        store.add(stored_contact(1, 10)).expect("add");
        assert!(matches!(
            store.add(stored_contact(2, 50)),
            Err(NodeError::ContactsFull)
        ));
    }

    #[test]
    fn test_process_advert_new_then_replay() {
        let store = ContactStore::new();
        let keys = NodeKeys::generate();

        let advert = signed_advert(&keys, 2000, "Alice");
        assert!(matches!(
            store.process_advert(&advert, 10, true).expect("ingest"),
            AdvertIngest::New(_)
        ));

        // Identical timestamp: replay.
        assert!(matches!(
            store.process_advert(&advert, 11, true),
            Err(NodeError::PossibleReplay { incoming: 2000, watermark: 2000 })
        ));

        // Older timestamp: replay.
        let older = signed_advert(&keys, 1999, "Alice");
        assert!(matches!(
            store.process_advert(&older, 12, true),
            Err(NodeError::PossibleReplay { .. })
        ));

        // Strictly newer: update, not new.
        let newer = signed_advert(&keys, 2001, "Alice2");
        match store.process_advert(&newer, 13, true).expect("ingest") {
            AdvertIngest::Updated(c) => {
                assert_eq!(c.name, "Alice2");
                assert_eq!(c.last_advert_timestamp, 2001);
                assert_eq!(c.last_mod, 13);
            }
            other => unreachable!("expected update, got {other:?}"),
        }
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_process_advert_rejects_empty_name() {
        let store = ContactStore::new();
        let keys = NodeKeys::generate();
        let advert = Advert::build_signed(
            &keys,
            100,
            &AdvertAppData {
                node_type: NodeType::Chat,
                location: None,
                feature1: None,
                feature2: None,
                name: None,
            },
        );
        assert!(matches!(
            store.process_advert(&advert, 1, true),
            Err(NodeError::AdvertRejected(_))
        ));
    }

    #[test]
    fn test_process_advert_rejects_bad_signature() {
        let store = ContactStore::new();
        let keys = NodeKeys::generate();
        let mut advert = signed_advert(&keys, 100, "Alice");
        advert.signature[0] ^= 0xFF;
        assert!(matches!(
            store.process_advert(&advert, 1, true),
            Err(NodeError::AdvertRejected(_))
        ));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_process_advert_temporary_without_auto_add() {
        let store = ContactStore::new();
        let keys = NodeKeys::generate();
        let advert = signed_advert(&keys, 100, "Alice");
        assert!(matches!(
            store.process_advert(&advert, 1, false).expect("ingest"),
            AdvertIngest::Temporary(_)
        ));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_process_path_installs_route() {
        let store = ContactStore::new();
        let keys = NodeKeys::generate();
        let advert = signed_advert(&keys, 100, "Alice");
        store.process_advert(&advert, 1, true).expect("ingest");

        let content = PathContent {
            path: vec![0x42, 0x43],
            extra_type: 3,
            extra: vec![1, 2, 3, 4],
        };
        let (contact, extra_type, extra) = store
            .process_path(&keys.node_id(), &content, 55)
            .expect("path");
        assert_eq!(contact.out_path.as_deref(), Some(&[0x42, 0x43][..]));
        assert_eq!(extra_type, 3);
        assert_eq!(extra, vec![1, 2, 3, 4]);
        assert_eq!(contact.last_mod, 55);
    }

    #[test]
    fn test_process_path_zero_hop_is_valid() {
        let store = ContactStore::new();
        let keys = NodeKeys::generate();
        store
            .process_advert(&signed_advert(&keys, 100, "Alice"), 1, true)
            .expect("ingest");

        let content = PathContent {
            path: Vec::new(),
            extra_type: 0,
            extra: Vec::new(),
        };
        let (contact, _, _) = store
            .process_path(&keys.node_id(), &content, 2)
            .expect("path");
        assert_eq!(contact.out_path.as_deref(), Some(&[][..]));
        assert!(contact.has_out_path());
    }

    #[test]
    fn test_process_path_unknown_contact() {
        let store = ContactStore::new();
        let keys = NodeKeys::generate();
        let content = PathContent {
            path: Vec::new(),
            extra_type: 0,
            extra: Vec::new(),
        };
        assert!(matches!(
            store.process_path(&keys.node_id(), &content, 2),
            Err(NodeError::ContactNotFound)
        ));
    }

    #[test]
    fn test_shared_secret_is_cached_and_consistent() {
        let store = ContactStore::new();
        let ours = NodeKeys::generate();
        let theirs = NodeKeys::generate();
        store
            .process_advert(&signed_advert(&theirs, 100, "Bob"), 1, true)
            .expect("ingest");

        let s1 = store
            .get_shared_secret(&theirs.node_id(), &ours)
            .expect("secret");
        let s2 = store
            .get_shared_secret(&theirs.node_id(), &ours)
            .expect("secret");
        assert_eq!(s1, s2);
        assert_eq!(s1, theirs.shared_secret(&ours.node_id()).expect("secret"));
    }

    #[test]
    fn test_callback_fires_outside_lock() {
        let store = Arc::new(ContactStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = store.clone();
        store.set_on_contact_added(Box::new(move |contact, _new| {
            counter.fetch_add(1, Ordering::SeqCst);
            // Re-entering the store from the callback must not deadlock.
            let _ = inner.get_by_pub_key(&contact.id);
        }));

        let keys = NodeKeys::generate();
        store
            .process_advert(&signed_advert(&keys, 100, "Alice"), 1, true)
            .expect("ingest");
        store
            .process_advert(&signed_advert(&keys, 101, "Alice"), 2, true)
            .expect("ingest");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
