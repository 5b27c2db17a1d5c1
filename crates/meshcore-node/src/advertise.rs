//! Self-advert construction and the two-timer announcement scheduler.
//!
//! A node announces itself on two cadences: a cheap zero-hop advert for
//! direct neighbours every `local_units × 2 min`, and a mesh-wide flood
//! every `flood_hours × 1 h`. A flood announcement supersedes the local one,
//! so firing the flood timer resets both deadlines; firing the local timer
//! resets only itself.
//!
//! Adverts are timestamped with [`UniqueClock::now_unique`] so that several
//! announcements inside one wall-clock second still advance every receiver's
//! replay watermark.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use meshcore_crypto::NodeKeys;
use meshcore_proto::advert::{Advert, AdvertAppData, LatLon, NodeType};
use meshcore_proto::{Packet, PayloadType, RouteType};

use crate::clock::{Clock, UniqueClock};
use crate::router::Router;
use crate::Result;

/// Seconds per local-interval unit.
pub const LOCAL_INTERVAL_UNIT_SECS: u32 = 120;

/// Seconds per flood-interval unit.
pub const FLOOD_INTERVAL_UNIT_SECS: u32 = 3600;

/// Local interval substituted when both configured intervals are zero.
pub const DEFAULT_LOCAL_UNITS: u32 = 1;

/// Flood interval substituted when both configured intervals are zero.
pub const DEFAULT_FLOOD_HOURS: u32 = 12;

/// What a node says about itself.
#[derive(Debug, Clone)]
pub struct AdvertConfig {
    /// Advertised name; receivers drop unnamed adverts.
    pub name: String,
    /// Advertised role.
    pub node_type: NodeType,
    /// Advertised position, if any.
    pub location: Option<LatLon>,
    /// Feature word 1.
    pub feature1: Option<u16>,
    /// Feature word 2.
    pub feature2: Option<u16>,
}

impl AdvertConfig {
    /// A plain named node of the given type.
    pub fn named(name: &str, node_type: NodeType) -> Self {
        Self {
            name: name.to_string(),
            node_type,
            location: None,
            feature1: None,
            feature2: None,
        }
    }

    fn app_data(&self) -> AdvertAppData {
        AdvertAppData {
            node_type: self.node_type,
            location: self.location,
            feature1: self.feature1,
            feature2: self.feature2,
            name: Some(self.name.clone()),
        }
    }
}

/// Build a freshly timestamped, signed self-advert packet (empty path; the
/// send primitive chosen by the caller sets the final route bits).
///
/// # Errors
///
/// Returns a codec error if the advertised app data overflows the payload
/// budget (an oversized name).
pub fn build_self_advert(
    keys: &NodeKeys,
    clock: &UniqueClock,
    config: &AdvertConfig,
) -> Result<Packet> {
    let advert = Advert::build_signed(keys, clock.now_unique(), &config.app_data());
    Ok(Packet::new(
        RouteType::Flood,
        PayloadType::Advert,
        advert.build(),
    )?)
}

/// A closure yielding a fresh self-advert per call, or `None` on a transient
/// build failure.
pub type AdvertBuilder = Arc<dyn Fn() -> Option<Packet> + Send + Sync>;

/// The standard builder: captures the node's keys, clock and advert config.
pub fn self_advert_builder(
    keys: Arc<NodeKeys>,
    clock: Arc<UniqueClock>,
    config: AdvertConfig,
) -> AdvertBuilder {
    Arc::new(move || match build_self_advert(&keys, &clock, &config) {
        Ok(packet) => Some(packet),
        Err(e) => {
            tracing::warn!(error = %e, "self-advert build failed");
            None
        }
    })
}

#[derive(Debug)]
struct SchedulerState {
    /// Seconds between zero-hop adverts; 0 disables.
    local_interval: u32,
    /// Seconds between flood adverts; 0 disables.
    flood_interval: u32,
    local_deadline: Option<u32>,
    flood_deadline: Option<u32>,
}

/// The periodic announcement scheduler.
pub struct AdvertScheduler {
    router: Arc<Router>,
    builder: AdvertBuilder,
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AdvertScheduler {
    /// Create a scheduler. `local_units` counts 2-minute units and
    /// `flood_hours` counts hours; if both are zero the defaults
    /// (1 unit, 12 hours) are substituted.
    pub fn new(
        router: Arc<Router>,
        builder: AdvertBuilder,
        clock: Arc<dyn Clock>,
        local_units: u32,
        flood_hours: u32,
    ) -> Arc<Self> {
        let (local_units, flood_hours) = if local_units == 0 && flood_hours == 0 {
            (DEFAULT_LOCAL_UNITS, DEFAULT_FLOOD_HOURS)
        } else {
            (local_units, flood_hours)
        };
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            router,
            builder,
            clock,
            state: Mutex::new(SchedulerState {
                local_interval: local_units * LOCAL_INTERVAL_UNIT_SECS,
                flood_interval: flood_hours * FLOOD_INTERVAL_UNIT_SECS,
                local_deadline: None,
                flood_deadline: None,
            }),
            shutdown,
            task: Mutex::new(None),
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Arm both deadlines from the current time.
    pub fn arm(&self) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.local_deadline = deadline(now, state.local_interval);
        state.flood_deadline = deadline(now, state.flood_interval);
    }

    /// One scheduler step. A due flood advert wins over a due local one and
    /// resets both timers; a builder failure still resets the timer so a
    /// transient failure cannot turn into a hot loop.
    pub fn tick(&self) {
        let now = self.clock.now();
        let built = {
            let mut state = self.lock_state();
            if state.flood_deadline.is_some_and(|d| now >= d) {
                state.flood_deadline = deadline(now, state.flood_interval);
                state.local_deadline = deadline(now, state.local_interval);
                ((self.builder)(), true)
            } else if state.local_deadline.is_some_and(|d| now >= d) {
                state.local_deadline = deadline(now, state.local_interval);
                ((self.builder)(), false)
            } else {
                (None, false)
            }
        };
        match built {
            (Some(advert), true) => {
                tracing::debug!("flood advert");
                self.router.send_flood(advert);
            }
            (Some(advert), false) => {
                tracing::debug!("zero-hop advert");
                self.router.send_zero_hop(advert);
            }
            (None, _) => {}
        }
    }

    /// Announce immediately. Resets the same timers the periodic path would:
    /// both for a flood, only the local one otherwise. A builder failure
    /// sends nothing and resets nothing.
    pub fn send_now(&self, flood: bool) {
        let Some(advert) = (self.builder)() else {
            return;
        };
        let now = self.clock.now();
        {
            let mut state = self.lock_state();
            if flood {
                state.flood_deadline = deadline(now, state.flood_interval);
            }
            state.local_deadline = deadline(now, state.local_interval);
        }
        if flood {
            self.router.send_flood(advert);
        } else {
            self.router.send_zero_hop(advert);
        }
    }

    /// Replace both intervals and recompute the deadlines from now. A zero
    /// unit disables its timer.
    pub fn update_intervals(&self, local_units: u32, flood_hours: u32) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        state.local_interval = local_units * LOCAL_INTERVAL_UNIT_SECS;
        state.flood_interval = flood_hours * FLOOD_INTERVAL_UNIT_SECS;
        state.local_deadline = deadline(now, state.local_interval);
        state.flood_deadline = deadline(now, state.flood_interval);
    }

    /// The pending (local, flood) deadlines, for diagnostics.
    pub fn deadlines(&self) -> (Option<u32>, Option<u32>) {
        let state = self.lock_state();
        (state.local_deadline, state.flood_deadline)
    }

    /// Arm the timers and spawn the 1-second tick task.
    pub fn start(self: &Arc<Self>) {
        self.arm();
        let scheduler = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.tick(),
                    _ = shutdown.recv() => break,
                }
            }
        });
        match self.task.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
    }

    /// Signal the tick task and wait for it to exit. Idempotent.
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

fn deadline(now: u32, interval: u32) -> Option<u32> {
    (interval != 0).then(|| now.saturating_add(interval))
}
