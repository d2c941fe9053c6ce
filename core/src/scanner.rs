//! # Scanner
//!
//! [`Scanner`] is the entry point for running a baked preset: it starts one
//! runtime per selected module, hands them to the [`ScanManager`](manager::ScanManager)
//! and keeps the bookkeeping for the [`ScanRecord`].

pub mod manager;
pub mod pool;
pub mod status;
pub mod word_cloud;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use spyglass_common::config;
use spyglass_common::event::Event;
use spyglass_common::network::target::TargetRecord;
use spyglass_common::utils::hash;

use crate::error::ScanError;
use crate::modules::catalog::ModuleCatalog;
use crate::modules::descriptor::ModuleKind;
use crate::modules::runtime::{ModuleContext, ScanModule};
use crate::preset::bake::BakedPreset;

use manager::{ManagerConfig, ScanManager};
use pool::TaskPool;
use status::{ScanControl, ScanStatus};

const ADJECTIVES: [&str; 16] = [
    "ancient", "brave", "crimson", "dusty", "eager", "frosty", "gentle", "hidden", "icy",
    "jolly", "lucky", "misty", "nimble", "quiet", "rusty", "silent",
];

const NOUNS: [&str; 16] = [
    "albatross", "badger", "compass", "dragon", "ember", "falcon", "glacier", "harbor",
    "lantern", "meadow", "nebula", "otter", "pioneer", "raven", "sextant", "tundra",
];

/// `adjective_noun`, used when the preset does not name the scan.
pub fn random_scan_name() -> String {
    let adjective = ADJECTIVES[rand::random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rand::random_range(0..NOUNS.len())];
    format!("{adjective}_{noun}")
}

/// Summary of a scan, fit for storage next to its output.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub id: String,
    pub name: String,
    pub status: ScanStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub duration: Option<String>,
    pub target: TargetRecord,
    pub preset: serde_yaml::Value,
}

fn human_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    match (hours, minutes) {
        (0, 0) => format!("{secs} seconds"),
        (0, _) => format!("{minutes} minutes, {secs} seconds"),
        _ => format!("{hours} hours, {minutes} minutes, {secs} seconds"),
    }
}

#[derive(Debug)]
pub struct Scanner {
    id: String,
    name: String,
    baked: BakedPreset,
    catalog: ModuleCatalog,
    control: ScanControl,
    output_dir: PathBuf,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Scanner {
    /// Refuses plans whose conditions asked to abort.
    pub fn new(baked: BakedPreset, catalog: ModuleCatalog) -> Result<Self, ScanError> {
        baked.check()?;

        let name = baked.name.clone().unwrap_or_else(random_scan_name);
        let id = format!("SCAN:{}", hash::digest_hex([Uuid::new_v4().to_string()]));
        let home = config::lookup(&baked.config, "home")
            .and_then(serde_yaml::Value::as_str)
            .filter(|home| !home.is_empty())
            .unwrap_or(".spyglass");
        let output_dir = PathBuf::from(home).join("scans").join(&name);

        Ok(Self {
            id,
            name,
            baked,
            catalog,
            control: ScanControl::new(),
            output_dir,
            started_at: None,
            finished_at: None,
        })
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn preset(&self) -> &BakedPreset {
        &self.baked
    }

    /// Handle for watching or stopping the scan from elsewhere.
    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    pub fn status(&self) -> ScanStatus {
        self.control.status()
    }

    fn start_modules(
        &self,
        pool: &Arc<TaskPool>,
        outgoing: &mpsc::UnboundedSender<Event>,
    ) -> Vec<Arc<dyn ScanModule>> {
        let mut modules = Vec::new();
        for descriptor in self.baked.descriptors.values() {
            let ctx = ModuleContext::new(
                &descriptor.name,
                &self.name,
                Arc::clone(&self.baked.config),
                self.output_dir.clone(),
                Arc::clone(pool),
                outgoing.clone(),
            );
            match self.catalog.build(descriptor, ctx) {
                Some(module) => modules.push(module),
                None if descriptor.kind == ModuleKind::Internal => {
                    debug!("Internal module {} has no runtime, skipping", descriptor.name);
                }
                None => warn!(
                    "{} module {} has no runtime, skipping",
                    descriptor.kind, descriptor.name
                ),
            }
        }
        modules
    }

    /// Runs the scan to the end and returns what the `python` output collected.
    pub async fn run(&mut self) -> Result<Vec<Arc<Event>>, ScanError> {
        if self.started_at.is_some() {
            return Err(ScanError::AlreadyStarted);
        }
        self.started_at = Some(Utc::now());
        self.control.set_status(ScanStatus::Starting);

        let threads = config::lookup_u64(&self.baked.config, "pool.threads", 4);
        let pool = Arc::new(TaskPool::new(usize::try_from(threads).unwrap_or(1))?);
        let (tx, rx) = mpsc::unbounded_channel();
        let modules = self.start_modules(&pool, &tx);
        drop(tx);

        if modules.is_empty() {
            self.control.set_status(ScanStatus::CleaningUp);
            self.control.set_status(ScanStatus::Finished);
            self.finished_at = Some(Utc::now());
            return Err(ScanError::NoModules);
        }

        let names: Vec<&str> = modules.iter().map(|m| m.name()).collect();
        info!(
            "Starting scan {} with {} modules: {}",
            self.name,
            modules.len(),
            names.join(", ")
        );

        let root = Event::root(&self.name);
        let seeds = self.baked.target.seed_events(&root);
        let mut manager = ScanManager::new(
            modules,
            rx,
            self.baked.target.clone(),
            pool,
            self.control.clone(),
            ManagerConfig::from_config(&self.baked.config),
        );
        let status = manager.run(root, seeds).await;
        self.finished_at = Some(Utc::now());

        let record = self.record();
        match self.control.abort_reason() {
            Some(reason) => warn!("Scan {} aborted ({reason})", self.name),
            None => info!(
                "Scan {} {} in {}",
                self.name,
                status,
                record.duration.unwrap_or_default()
            ),
        }

        Ok(self.catalog.collector().events())
    }

    pub fn record(&self) -> ScanRecord {
        let duration_seconds = match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };
        ScanRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.control.status(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_seconds,
            duration: duration_seconds.map(human_duration),
            target: self.baked.target.to_record(&self.name),
            preset: serde_yaml::to_value(&self.baked.preset).unwrap_or(serde_yaml::Value::Null),
        }
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
