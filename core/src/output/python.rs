//! In-memory output: every event ends up in a shared [`EventCollector`] that
//! the caller reads once the scan is over.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use spyglass_common::event::Event;

use crate::error::ModuleError;
use crate::modules::runtime::{EventHandler, ModuleContext};

#[derive(Debug, Clone, Default)]
pub struct EventCollector(Arc<Mutex<Vec<Arc<Event>>>>);

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Event>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: Arc<Event>) {
        self.lock().push(event);
    }

    /// Everything collected so far, in arrival order.
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

pub struct PythonOutput {
    collector: EventCollector,
}

impl PythonOutput {
    pub fn new(collector: EventCollector) -> Self {
        Self { collector }
    }
}

#[async_trait]
impl EventHandler for PythonOutput {
    async fn handle_event(&mut self, event: Arc<Event>, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        self.collector.push(event);
        Ok(())
    }
}
