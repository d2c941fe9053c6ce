//! Tallies every event the scan produced and logs a summary at the end.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use spyglass_common::event::Event;

use crate::error::ModuleError;
use crate::modules::runtime::{EventHandler, ModuleContext};

#[derive(Debug, Default)]
pub struct Aggregate {
    counts: BTreeMap<String, usize>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts by event type, most common first.
    pub fn summary(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> =
            self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }
}

#[async_trait]
impl EventHandler for Aggregate {
    async fn handle_event(&mut self, event: Arc<Event>, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        if !event.is_root() {
            *self.counts.entry(event.event_type.to_string()).or_default() += 1;
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let summary = self.summary();
        if summary.is_empty() {
            info!("{}: no events found", ctx.scan_name);
            return Ok(());
        }
        let parts: Vec<String> = summary
            .iter()
            .map(|(event_type, count)| format!("{count} ({event_type})"))
            .collect();
        info!("{}: {}", ctx.scan_name, parts.join(", "));
        Ok(())
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
