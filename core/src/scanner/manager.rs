//! # Scan Manager
//!
//! The single coordinating loop of a scan. It owns the receiving end of the
//! shared event queue and is the only place events are deduplicated, scoped
//! and handed to modules.
//!
//! ```text
//! seed ──► loop { pop ─hit─► distribute
//!                     └miss─► poll ─► quiet? ─► confirm ─► new events? ─► FINISHED broadcast
//!                                                                  └no──► stop }
//!      ──► cleanup ──► finished
//! ```

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_yaml::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use spyglass_common::config;
use spyglass_common::event::{Event, EventHash};
use spyglass_common::network::target::Target;

use crate::modules::runtime::{ModuleStatus, QueueItem, ScanModule};
use crate::scanner::pool::TaskPool;
use crate::scanner::status::{ScanControl, ScanStatus};
use crate::scanner::word_cloud::WordCloud;

/// Timings of the main loop, read from `engine.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub idle_sleep: Duration,
    pub status_log_interval: u64,
    pub confirm_passes: u32,
    pub confirm_delay: Duration,
    pub finishing_delay: Duration,
    pub cleanup_poll: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(100),
            status_log_interval: 20,
            confirm_passes: 5,
            confirm_delay: Duration::from_millis(100),
            finishing_delay: Duration::from_secs(1),
            cleanup_poll: Duration::from_millis(100),
        }
    }
}

impl ManagerConfig {
    pub fn from_config(config: &Value) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
            Duration::from_millis(config::lookup_u64(config, &format!("engine.{key}"), default))
        };
        Self {
            idle_sleep: millis("idle_sleep_ms", defaults.idle_sleep),
            status_log_interval: config::lookup_u64(
                config,
                "engine.status_log_interval",
                defaults.status_log_interval,
            )
            .max(1),
            confirm_passes: u32::try_from(config::lookup_u64(
                config,
                "engine.confirm_passes",
                u64::from(defaults.confirm_passes),
            ))
            .unwrap_or(defaults.confirm_passes),
            confirm_delay: millis("confirm_delay_ms", defaults.confirm_delay),
            finishing_delay: millis("finishing_delay_ms", defaults.finishing_delay),
            cleanup_poll: millis("cleanup_poll_ms", defaults.cleanup_poll),
        }
    }
}

pub struct ScanManager {
    modules: Vec<Arc<dyn ScanModule>>,
    incoming: UnboundedReceiver<Event>,
    target: Target,
    pool: Arc<TaskPool>,
    control: ScanControl,
    config: ManagerConfig,

    /// Closest scope distance of every distinct event.
    seen: HashMap<EventHash, u32>,
    /// Only events that arrived more than once at different distances.
    distances: HashMap<String, u32>,
    word_cloud: WordCloud,
    failed: HashSet<String>,
    events_since_check: usize,
    idle_iterations: u64,
    distributed: usize,
}

impl ScanManager {
    pub fn new(
        modules: Vec<Arc<dyn ScanModule>>,
        incoming: UnboundedReceiver<Event>,
        target: Target,
        pool: Arc<TaskPool>,
        control: ScanControl,
        config: ManagerConfig,
    ) -> Self {
        Self {
            modules,
            incoming,
            target,
            pool,
            control,
            config,
            seen: HashMap::new(),
            distances: HashMap::new(),
            word_cloud: WordCloud::new(),
            failed: HashSet::new(),
            events_since_check: 0,
            idle_iterations: 0,
            distributed: 0,
        }
    }

    pub fn control(&self) -> &ScanControl {
        &self.control
    }

    /// Dedup hashes of every distinct event distributed so far.
    pub fn events_processed(&self) -> HashSet<EventHash> {
        self.seen.keys().copied().collect()
    }

    /// Deliveries made, duplicates included.
    pub fn events_distributed(&self) -> usize {
        self.distributed
    }

    pub fn word_cloud(&self) -> &WordCloud {
        &self.word_cloud
    }

    /// Runs the scan to completion: seeding, main loop, then cleanup.
    ///
    /// Always ends in [`ScanStatus::Finished`], whichever way the scan stopped.
    pub async fn run(&mut self, root: Event, seeds: Vec<Event>) -> ScanStatus {
        if self.control.status() == ScanStatus::NotStarted {
            self.control.set_status(ScanStatus::Starting);
        }

        if self.control.is_aborting() {
            self.drain();
        } else {
            self.seed(root, seeds).await;
            self.control.set_status(ScanStatus::Running);
            self.main_loop().await;
        }

        self.teardown().await;
        self.control.status()
    }

    async fn seed(&mut self, root: Event, seeds: Vec<Event>) {
        info!("Seeding scan with {} target(s)", seeds.len());
        self.distribute(root);
        for seed in seeds {
            self.distribute(seed);
        }
        for module in &self.modules {
            if let Err(e) = module.handle_batch(true).await {
                warn!("Initial batch of module {} failed: {e}", module.name());
                module.set_error_state(Some(e.to_string()));
            }
        }
    }

    async fn main_loop(&mut self) {
        loop {
            if self.control.is_aborting() {
                self.drain();
                break;
            }

            match self.incoming.try_recv() {
                Ok(event) => {
                    self.distribute(event);
                    self.events_since_check += 1;
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            self.idle_iterations += 1;
            if self.idle_iterations % self.config.status_log_interval.max(1) == 0 {
                self.log_status();
            }

            if self.possibly_finished() && self.confirm_finished().await {
                if self.events_since_check == 0 {
                    debug!("Scan is quiet and nothing new was found, stopping");
                    break;
                }
                self.finish_round().await;
                continue;
            }

            tokio::time::sleep(self.config.idle_sleep).await;
        }
    }

    /// Tells every module the scan went quiet so it can flush held-back work.
    async fn finish_round(&mut self) {
        debug!(
            "{} new event(s) since the last check, sending FINISHED to every module",
            self.events_since_check
        );
        self.control.set_status(ScanStatus::Finishing);
        for module in &self.modules {
            if !module.has_event_queue() {
                continue;
            }
            if let Err(e) = module.queue_event(QueueItem::Finished) {
                debug!("Not sending FINISHED to {}: {e}", module.name());
            }
        }
        self.events_since_check = 0;
        tokio::time::sleep(self.config.finishing_delay).await;
    }

    fn distribute(&mut self, mut event: Event) {
        if self.control.status() == ScanStatus::Finishing {
            self.control.set_status(ScanStatus::Running);
        }

        self.update_scope_distance(&mut event);

        let is_dupe = self.record(&event);
        if is_dupe {
            debug!("Duplicate event {}", event.description());
        } else {
            self.word_cloud.absorb_event(&event);
        }

        let event = Arc::new(event);
        for module in &self.modules {
            if !module.has_event_queue() || module.name() == event.module {
                continue;
            }
            if !module.watched_events().matches(&event.event_type) {
                continue;
            }
            if is_dupe && !module.accept_dupes() {
                continue;
            }
            match module.queue_event(QueueItem::Event(Arc::clone(&event))) {
                Ok(()) => self.distributed += 1,
                Err(e) => debug!("Could not queue {} for {}: {e}", event.description(), module.name()),
            }
        }
    }

    /// Adds `event` to the dedup ledger and returns true if it was already
    /// there. A copy at a different distance than the closest one so far makes
    /// its id correctable for children derived from any copy.
    fn record(&mut self, event: &Event) -> bool {
        let distance = event.scope_distance;
        match self.seen.entry(event.dedup_hash()) {
            Entry::Vacant(entry) => {
                entry.insert(distance);
                false
            }
            Entry::Occupied(mut entry) => {
                let known = *entry.get();
                if known != distance {
                    let closest = known.min(distance);
                    entry.insert(closest);
                    self.distances.insert(event.id.clone(), closest);
                }
                true
            }
        }
    }

    /// 0 for in-scope hosts, otherwise one more than the closest parent.
    ///
    /// Children already carry their parent's distance plus one, so only
    /// parents seen at several distances need a lookup.
    fn update_scope_distance(&mut self, event: &mut Event) {
        let in_scope = event
            .host
            .as_ref()
            .is_some_and(|host| self.target.host_in_scope(host));

        let distance = if event.is_root() || in_scope {
            0
        } else {
            let via_parent = event
                .parent
                .as_ref()
                .and_then(|parent| self.distances.get(parent))
                .map(|d| d.saturating_add(1));
            match via_parent {
                Some(d) => d.min(event.scope_distance),
                None => event.scope_distance,
            }
        };

        event.set_scope_distance(distance);
    }

    fn drain(&mut self) {
        let mut dropped = 0usize;
        while self.incoming.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {dropped} queued event(s) while aborting");
        }
    }

    /// Polls every module. A module whose status cannot be read is put into an
    /// error state and left out of later polls.
    fn poll_statuses(&mut self) -> Vec<(String, ModuleStatus)> {
        let mut statuses = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            if self.failed.contains(module.name()) {
                continue;
            }
            match module.status() {
                Ok(status) => statuses.push((module.name().to_string(), status)),
                Err(e) => {
                    warn!("Error getting status of module {}: {e}", module.name());
                    module.set_error_state(Some(e.to_string()));
                    self.failed.insert(module.name().to_string());
                }
            }
        }
        statuses
    }

    fn possibly_finished(&mut self) -> bool {
        if !self.incoming.is_empty() || self.pool.outstanding() > 0 {
            return false;
        }
        self.poll_statuses().iter().all(|(_, status)| status.is_idle())
    }

    async fn confirm_finished(&mut self) -> bool {
        for _ in 0..self.config.confirm_passes {
            tokio::time::sleep(self.config.confirm_delay).await;
            if self.control.is_aborting() || !self.possibly_finished() {
                return false;
            }
        }
        true
    }

    fn log_status(&mut self) {
        let statuses = self.poll_statuses();

        let mut queued: Vec<(&str, usize)> = statuses
            .iter()
            .filter(|(_, s)| s.queued_events > 0)
            .map(|(name, s)| (name.as_str(), s.queued_events))
            .collect();
        queued.sort_by(|a, b| b.1.cmp(&a.1));
        queued.truncate(5);

        let mut tasks: Vec<(&str, usize)> = statuses
            .iter()
            .filter(|(_, s)| s.running_tasks > 0)
            .map(|(name, s)| (name.as_str(), s.running_tasks))
            .collect();
        tasks.sort_by(|a, b| b.1.cmp(&a.1));
        tasks.truncate(5);

        let running: Vec<&str> = statuses
            .iter()
            .filter(|(_, s)| s.running)
            .map(|(name, _)| name.as_str())
            .collect();
        let errored: Vec<&str> = statuses
            .iter()
            .filter(|(_, s)| s.errored)
            .map(|(name, _)| name.as_str())
            .collect();

        let pairs = |items: &[(&str, usize)]| {
            items
                .iter()
                .map(|(name, n)| format!("{name}: {n}"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        debug!("Events queued: {}", pairs(&queued));
        debug!("Tasks running: {}", pairs(&tasks));
        debug!(
            "Worker pool: {} queued, {} running",
            self.pool.queued(),
            self.pool.running()
        );
        debug!("Modules running: {}", running.join(", "));
        if !errored.is_empty() {
            debug!("Modules errored: {}", errored.join(", "));
        }
        debug!(
            "{} distinct events, {} deliveries so far",
            self.seen.len(),
            self.distributed
        );
    }

    async fn teardown(&mut self) {
        self.control.set_status(ScanStatus::CleaningUp);
        for module in &self.modules {
            module.cleanup().await;
        }

        let mut polls: u64 = 0;
        loop {
            let pending: Vec<&str> = self
                .modules
                .iter()
                .filter(|m| !m.finished())
                .map(|m| m.name())
                .collect();
            if pending.is_empty() {
                break;
            }
            polls += 1;
            if polls % self.config.status_log_interval.max(1) == 0 {
                debug!("Waiting for modules to finish: {}", pending.join(", "));
            }
            tokio::time::sleep(self.config.cleanup_poll).await;
        }

        let top: Vec<String> = self
            .word_cloud
            .top(5)
            .into_iter()
            .map(|(word, count)| format!("{word} ({count})"))
            .collect();
        if !top.is_empty() {
            debug!("Most common words: {}", top.join(", "));
        }

        self.control.set_status(ScanStatus::Finished);
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
