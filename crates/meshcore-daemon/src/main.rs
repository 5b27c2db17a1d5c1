//! meshcored: the MeshCore node daemon.
//!
//! Single OS process running a Tokio async runtime. Wires the packet plane
//! together — identity, contact store, router, ADVERT scheduler, ACK
//! tracker, and (for room nodes) the room server — and runs until ctrl-c.

mod config;

use std::sync::Arc;

use tracing::{info, warn};

use meshcore_crypto::NodeKeys;
use meshcore_node::acks::AckTracker;
use meshcore_node::advertise::{self, AdvertConfig, AdvertScheduler};
use meshcore_node::clock::{SystemClock, UniqueClock};
use meshcore_node::codes::RegionSet;
use meshcore_node::contacts::ContactStore;
use meshcore_node::discover::DiscoverResponder;
use meshcore_node::router::{Forwarding, Router, RouterConfig};
use meshcore_node::transport::{ChannelTransport, SourceTag, Transport as _};
use meshcore_proto::advert::{LatLon, NodeType};
use meshcore_room::{RoomConfig, RoomServer};

use crate::config::DaemonConfig;

fn parse_node_type(name: &str) -> NodeType {
    match name {
        "repeater" => NodeType::Repeater,
        "room" => NodeType::Room,
        "sensor" => NodeType::Sensor,
        _ => NodeType::Chat,
    }
}

fn load_identity(config: &DaemonConfig) -> anyhow::Result<NodeKeys> {
    if config.node.identity_seed.is_empty() {
        info!("no identity seed configured, generating a fresh identity");
        return Ok(NodeKeys::generate());
    }
    let seed_bytes = hex::decode(&config.node.identity_seed)?;
    let seed: [u8; 32] = seed_bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("identity seed must be 32 hex-encoded bytes"))?;
    Ok(NodeKeys::from_seed(&seed))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config, then logging (the config carries the level).
    let config = DaemonConfig::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("meshcore={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("meshcored starting");
    std::fs::create_dir_all(config.data_dir())?;

    // 2. Identity and clock.
    let keys = Arc::new(load_identity(&config)?);
    info!(node_id = %keys.node_id(), "node identity ready");
    let clock = Arc::new(UniqueClock::system());
    let wall = Arc::new(SystemClock);

    // 3. Router, with transport-code validation when regions are configured.
    let router_config = RouterConfig {
        forwarding: config.radio.forwarding,
        max_flood_hops: config.radio.max_flood_hops,
        ..Default::default()
    };
    let router = if config.radio.regions.is_empty() {
        Router::new(keys.node_id(), router_config)
    } else {
        let regions = RegionSet::from_names(&config.radio.regions);
        info!(regions = config.radio.regions.len(), "transport-code validation enabled");
        Router::with_regions(keys.node_id(), router_config, regions)
    };

    // 4. Transports. The MQTT broker client and serial driver are adaptors
    // provided outside this crate; a local loopback stands in so the node
    // always has at least one transport to exercise.
    let loopback = ChannelTransport::new("loopback");
    loopback.start()?;
    router.register_transport(loopback.clone(), SourceTag::Local);
    if config.mqtt.enabled {
        let mqtt = meshcore_node::mqtt::MqttConfig {
            broker_url: config.mqtt.broker_url.clone(),
            username: (!config.mqtt.username.is_empty()).then(|| config.mqtt.username.clone()),
            password: (!config.mqtt.password.is_empty()).then(|| config.mqtt.password.clone()),
            tls: config.mqtt.tls,
            topic_prefix: config.mqtt.topic_prefix.clone(),
            mesh_id: config.mqtt.mesh_id.clone(),
        };
        info!(topic = %mqtt.topic(), "MQTT bridge configured");
    }

    // 5. Stores and trackers.
    let contacts = Arc::new(ContactStore::new());
    contacts.set_on_contact_added(Box::new(|contact, new| {
        if new {
            info!(contact = %contact.id, name = %contact.name, "contact added");
        }
    }));
    let tracker = AckTracker::new();

    // 6. ADVERT scheduler.
    let node_type = parse_node_type(&config.node.node_type);
    let advert_config = AdvertConfig {
        name: config.node.name.clone(),
        node_type,
        location: config.node.has_location.then_some(LatLon {
            lat: config.node.lat,
            lon: config.node.lon,
        }),
        feature1: None,
        feature2: None,
    };
    let builder = advertise::self_advert_builder(keys.clone(), clock.clone(), advert_config);
    let scheduler = AdvertScheduler::new(
        router.clone(),
        builder,
        wall,
        config.advert.local_interval_units,
        config.advert.flood_interval_hours,
    );

    // 7. Room server, when configured as one; everyone else answers
    // discover requests directly.
    let room = if node_type == NodeType::Room {
        let room = RoomServer::new(
            keys.clone(),
            clock.clone(),
            router.clone(),
            contacts.clone(),
            tracker.clone(),
            RoomConfig {
                admin_password: config.room.admin_password.clone(),
                guest_password: config.room.guest_password.clone(),
                allow_read_only: config.room.allow_read_only,
                client_capacity: config.room.client_capacity,
                post_capacity: config.room.post_capacity,
            },
        );
        room.attach();
        Some(room)
    } else {
        let responder = DiscoverResponder::new(keys.node_id(), node_type);
        let weak_router = Arc::downgrade(&router);
        router.set_packet_handler(Arc::new(move |packet, _src| {
            if let Some(response) = responder.response_for(packet) {
                if let Some(router) = weak_router.upgrade() {
                    router.send_zero_hop(response);
                }
            }
            Forwarding::Allow
        }));
        None
    };

    // 8. Start the loop tasks, announce ourselves, and run.
    router.start();
    tracker.start();
    scheduler.start();
    if let Some(ref room) = room {
        room.start();
        info!("room server running");
    }
    scheduler.send_now(true);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    // 9. Stop in reverse order of startup.
    if let Some(ref room) = room {
        room.stop().await;
    }
    scheduler.stop().await;
    tracker.stop().await;
    router.stop().await;
    loopback.stop();

    if contacts.count() > 0 {
        info!(contacts = contacts.count(), "known contacts at shutdown");
    } else {
        warn!("no contacts learned this session");
    }
    info!("meshcored stopped");
    Ok(())
}
