//! Maps module names to the code that runs them.
//!
//! The registry only knows descriptors. A descriptor becomes a running
//! [`ScanModule`] when the catalog has a factory registered under its name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::internal::aggregate::Aggregate;
use crate::internal::speculate::Speculate;
use crate::modules::descriptor::ModuleDescriptor;
use crate::modules::runtime::{EventHandler, ModuleContext, QueuedModule, ScanModule, WatchedEvents};
use crate::output::http::HttpOutput;
use crate::output::python::{EventCollector, PythonOutput};
use crate::output::{csv, json, txt};

pub type HandlerFactory = Arc<dyn Fn(&ModuleContext) -> Box<dyn EventHandler> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, HandlerFactory>,
    collector: EventCollector,
}

impl ModuleCatalog {
    /// An empty catalog. Nothing can run until factories are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every module that ships with the engine.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        let collector = catalog.collector.clone();

        catalog.register("python", move |_| Box::new(PythonOutput::new(collector.clone())));
        catalog.register("json", |_| Box::new(json::handler()));
        catalog.register("txt", |_| Box::new(txt::handler()));
        catalog.register("csv", |_| Box::new(csv::handler()));
        catalog.register("http", |_| Box::new(HttpOutput::new()));
        catalog.register("speculate", |_| Box::new(Speculate::new()));
        catalog.register("aggregate", |_| Box::new(Aggregate::new()));
        catalog
    }

    /// Registers (or replaces) the runtime for `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ModuleContext) -> Box<dyn EventHandler> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }

    /// Where the `python` output collects events.
    pub fn collector(&self) -> &EventCollector {
        &self.collector
    }

    /// Starts a module. `None` when no runtime is registered for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(&self, descriptor: &ModuleDescriptor, ctx: ModuleContext) -> Option<Arc<dyn ScanModule>> {
        let factory = self.factories.get(&descriptor.name)?;
        let handler = factory(&ctx);
        let module: Arc<dyn ScanModule> =
            QueuedModule::start(WatchedEvents::from_descriptor(descriptor), handler, ctx);
        Some(module)
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("modules", &self.factories.keys().collect::<Vec<_>>())
            .field("collected", &self.collector.len())
            .finish()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::descriptor::{ModuleKind, builtin_descriptors};
    use crate::modules::runtime::QueueItem;
    use crate::scanner::pool::TaskPool;
    use spyglass_common::event::Event;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn builtin_runtimes() {
        let catalog = ModuleCatalog::builtin();
        for name in ["python", "json", "txt", "csv", "http", "speculate", "aggregate"] {
            assert!(catalog.contains(name), "{name}");
        }
        // Described but without a runtime.
        assert!(!catalog.contains("dns"));
        assert!(builtin_descriptors().iter().any(|d| d.name == "dns"));
    }

    #[tokio::test]
    async fn python_output_fills_the_collector() {
        let catalog = ModuleCatalog::builtin();
        let descriptor = builtin_descriptors()
            .into_iter()
            .find(|d| d.name == "python" && d.kind == ModuleKind::Output)
            .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = ModuleContext::new(
            "python",
            "test",
            Arc::new(serde_yaml::Value::Null),
            std::env::temp_dir(),
            Arc::new(TaskPool::new(1).unwrap()),
            tx,
        );
        let module = catalog.build(&descriptor, ctx).unwrap();
        assert_eq!(module.watched_events(), &WatchedEvents::Any);

        module.queue_event(QueueItem::Event(Arc::new(Event::root("test")))).unwrap();
        for _ in 0..500 {
            if catalog.collector().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        module.cleanup().await;
        for _ in 0..500 {
            if module.finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(module.finished());
        assert_eq!(catalog.collector().len(), 1);
    }
}
