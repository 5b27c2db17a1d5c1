//! Pending-acknowledgement tracking.
//!
//! Every reliable send registers its expected ACK hash here. A background
//! task sweeps once a second: entries past the timeout are resent (up to the
//! retry limit) and then expired. `resolve` and the timeout path both remove
//! the entry atomically with their decision, so exactly one of `on_ack` /
//! `on_timeout` fires per tracked hash.
//!
//! All callbacks run outside the table lock, on snapshots — an `on_ack` that
//! immediately tracks a follow-up send must not deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

/// Default time to wait for an acknowledgement.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(12);

/// Default sweep interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of resends before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Callbacks attached to one tracked hash.
#[derive(Default)]
pub struct PendingAck {
    /// Fired once when the matching ACK arrives.
    pub on_ack: Option<Box<dyn FnOnce() + Send>>,
    /// Fired once when retries are exhausted.
    pub on_timeout: Option<Box<dyn FnOnce() + Send>>,
    /// Invoked to retransmit; a failure is logged, never fatal.
    pub resend: Option<Arc<dyn Fn() -> crate::Result<()> + Send + Sync>>,
}

struct Entry {
    sent_at: Instant,
    retries: u32,
    pending: PendingAck,
}

/// Tracker configuration.
#[derive(Debug, Clone, Copy)]
pub struct AckTrackerConfig {
    /// Time before an entry is retried or expired.
    pub timeout: Duration,
    /// Resends before `on_timeout`.
    pub max_retries: u32,
    /// Background sweep interval.
    pub sweep_interval: Duration,
}

impl Default for AckTrackerConfig {
    fn default() -> Self {
        Self {
            timeout: ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

/// The pending-ACK table and its sweep task.
pub struct AckTracker {
    entries: Mutex<HashMap<u32, Entry>>,
    config: AckTrackerConfig,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AckTracker {
    /// Create a tracker with default timings.
    pub fn new() -> Arc<Self> {
        Self::with_config(AckTrackerConfig::default())
    }

    /// Create a tracker with explicit timings.
    pub fn with_config(config: AckTrackerConfig) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            config,
            shutdown,
            task: Mutex::new(None),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Track a hash. An entry already tracking the same hash is replaced and
    /// its callbacks dropped silently.
    pub fn track(&self, hash: u32, pending: PendingAck) {
        self.lock().insert(
            hash,
            Entry {
                sent_at: Instant::now(),
                retries: 0,
                pending,
            },
        );
    }

    /// Resolve a received ACK. Fires `on_ack` outside the lock and reports
    /// whether anything was waiting on this hash.
    pub fn resolve(&self, hash: u32) -> bool {
        let entry = self.lock().remove(&hash);
        match entry {
            Some(entry) => {
                if let Some(on_ack) = entry.pending.on_ack {
                    on_ack();
                }
                true
            }
            None => false,
        }
    }

    /// Stop tracking a hash without firing anything.
    pub fn cancel(&self, hash: u32) {
        self.lock().remove(&hash);
    }

    /// Number of tracked hashes.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// One sweep over the table: retry or expire everything older than the
    /// timeout. Normally driven by the background task; exposed so tests can
    /// step it deterministically.
    pub fn sweep(&self) {
        let mut resends: Vec<(u32, Arc<dyn Fn() -> crate::Result<()> + Send + Sync>)> = Vec::new();
        let mut timeouts: Vec<(u32, Option<Box<dyn FnOnce() + Send>>)> = Vec::new();

        {
            let mut entries = self.lock();
            let expired: Vec<u32> = entries
                .iter()
                .filter(|(_, e)| e.sent_at.elapsed() >= self.config.timeout)
                .map(|(hash, _)| *hash)
                .collect();

            for hash in expired {
                let retried = match entries.get_mut(&hash) {
                    Some(entry)
                        if entry.retries < self.config.max_retries
                            && entry.pending.resend.is_some() =>
                    {
                        entry.retries += 1;
                        entry.sent_at = Instant::now();
                        if let Some(resend) = entry.pending.resend.clone() {
                            resends.push((hash, resend));
                        }
                        true
                    }
                    Some(_) => false,
                    None => continue,
                };
                if !retried {
                    if let Some(entry) = entries.remove(&hash) {
                        timeouts.push((hash, entry.pending.on_timeout));
                    }
                }
            }
        }

        for (hash, resend) in resends {
            if let Err(e) = resend() {
                tracing::warn!(hash = format_args!("{hash:08x}"), error = %e, "ACK resend failed");
            } else {
                tracing::debug!(hash = format_args!("{hash:08x}"), "resent unacknowledged packet");
            }
        }
        for (hash, on_timeout) in timeouts {
            tracing::debug!(hash = format_args!("{hash:08x}"), "ACK wait expired");
            if let Some(cb) = on_timeout {
                cb();
            }
        }
    }

    /// Spawn the sweep task.
    pub fn start(self: &Arc<Self>) {
        let tracker = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tracker.sweep(),
                    _ = shutdown.recv() => break,
                }
            }
        });
        match self.task.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
    }

    /// Signal the sweep task and wait for it to exit. Idempotent.
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
