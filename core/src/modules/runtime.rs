//! # Module Runtime
//!
//! The scan manager only ever talks to modules through [`ScanModule`]. It
//! queues events, polls status, asks for cleanup and nothing else.
//!
//! [`QueuedModule`] is the standard implementation: a tokio task that owns the
//! receiving end of the module's queue and feeds each item to an
//! [`EventHandler`], which is where the actual module logic lives.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use spyglass_common::event::{Event, EventType};

use crate::error::ModuleError;
use crate::modules::descriptor::{ANY_EVENT, ModuleDescriptor};
use crate::scanner::pool::TaskPool;

/// Item on a module's private queue.
#[derive(Debug, Clone)]
pub enum QueueItem {
    Event(Arc<Event>),
    /// The scan went quiet; last chance to emit anything held back.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedEvents {
    Any,
    Only(BTreeSet<String>),
}

impl WatchedEvents {
    pub fn from_descriptor(descriptor: &ModuleDescriptor) -> Self {
        if descriptor.watched_events.contains(ANY_EVENT) {
            WatchedEvents::Any
        } else {
            WatchedEvents::Only(descriptor.watched_events.clone())
        }
    }

    pub fn matches(&self, event_type: &EventType) -> bool {
        match self {
            WatchedEvents::Any => true,
            WatchedEvents::Only(types) => types.contains(event_type.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleStatus {
    pub queued_events: usize,
    pub running_tasks: usize,
    pub running: bool,
    pub errored: bool,
}

impl ModuleStatus {
    pub fn is_idle(&self) -> bool {
        self.errored || (!self.running && self.queued_events == 0 && self.running_tasks == 0)
    }
}

/// What the scan manager needs from a module.
#[async_trait]
pub trait ScanModule: Send + Sync {
    fn name(&self) -> &str;

    fn watched_events(&self) -> &WatchedEvents;

    /// Queueless modules are polled for status but never receive events.
    fn has_event_queue(&self) -> bool {
        true
    }

    fn status(&self) -> Result<ModuleStatus, ModuleError>;

    /// Whether this module wants events it has already been sent.
    fn accept_dupes(&self) -> bool {
        false
    }

    fn queue_event(&self, item: QueueItem) -> Result<(), ModuleError>;

    /// Flushes any batched state. `force` flushes even partial batches.
    async fn handle_batch(&self, _force: bool) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Stops accepting events and winds the module down.
    async fn cleanup(&self);

    /// Puts the module in (or, with `None`, takes it out of) an error state.
    fn set_error_state(&self, reason: Option<String>);

    /// True once the module has fully shut down.
    fn finished(&self) -> bool;
}

/// Everything a module handler can reach while running.
#[derive(Clone)]
pub struct ModuleContext {
    pub name: String,
    pub scan_name: String,
    /// Merged `modules.<name>` config.
    pub options: serde_yaml::Value,
    /// The whole merged scan config.
    pub config: Arc<serde_yaml::Value>,
    pub output_dir: PathBuf,
    pub pool: Arc<TaskPool>,
    outgoing: UnboundedSender<Event>,
    tasks: Arc<AtomicUsize>,
}

/// Counts one pool task against its module until dropped.
struct TaskGuard(Arc<AtomicUsize>);

impl TaskGuard {
    fn enter(tasks: &Arc<AtomicUsize>) -> Self {
        tasks.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(tasks))
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ModuleContext {
    pub fn new(
        name: &str,
        scan_name: &str,
        config: Arc<serde_yaml::Value>,
        output_dir: PathBuf,
        pool: Arc<TaskPool>,
        outgoing: UnboundedSender<Event>,
    ) -> Self {
        let options = spyglass_common::config::lookup(&config, &format!("modules.{name}"))
            .cloned()
            .unwrap_or(serde_yaml::Value::Null);
        Self {
            name: name.to_string(),
            scan_name: scan_name.to_string(),
            options,
            config,
            output_dir,
            pool,
            outgoing,
            tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pool tasks submitted by this module that have not completed yet.
    pub fn running_tasks(&self) -> usize {
        self.tasks.load(Ordering::SeqCst)
    }

    /// Runs blocking work on the shared pool and awaits it. `None` if it panicked.
    pub async fn run_task<F, T>(&self, task: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = TaskGuard::enter(&self.tasks);
        self.pool
            .run(move || {
                let _guard = guard;
                task()
            })
            .await
    }

    /// Fire-and-forget variant of [`run_task`](Self::run_task).
    pub fn spawn_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = TaskGuard::enter(&self.tasks);
        self.pool.spawn(move || {
            let _guard = guard;
            task();
        });
    }

    /// Sends a new event to the scan manager. Never blocks.
    pub fn emit(&self, event: Event) -> bool {
        debug!("{} emitted {}", self.name, event.description());
        self.outgoing.send(event).is_ok()
    }

    pub fn option(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.options.as_mapping()?.get(key)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.option(key)
            .and_then(serde_yaml::Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn option_u64(&self, key: &str, default: u64) -> u64 {
        self.option(key)
            .and_then(serde_yaml::Value::as_u64)
            .unwrap_or(default)
    }
}

/// Module logic run by a [`QueuedModule`] worker.
#[async_trait]
pub trait EventHandler: Send + 'static {
    fn accept_dupes(&self) -> bool {
        false
    }

    async fn setup(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn handle_event(&mut self, event: Arc<Event>, ctx: &ModuleContext)
    -> Result<(), ModuleError>;

    /// Called on every `FINISHED` broadcast.
    async fn finish(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WorkerState {
    queued: AtomicUsize,
    running: AtomicBool,
    errored: AtomicBool,
    stopping: AtomicBool,
    finished: AtomicBool,
    error_reason: Mutex<Option<String>>,
}

/// A module backed by a tokio task draining its own queue.
pub struct QueuedModule {
    name: String,
    watched: WatchedEvents,
    accept_dupes: bool,
    sender: Mutex<Option<UnboundedSender<QueueItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: Arc<WorkerState>,
    tasks: Arc<AtomicUsize>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueuedModule {
    /// Spawns the worker task. Must be called from within a tokio runtime.
    pub fn start(
        watched: WatchedEvents,
        handler: Box<dyn EventHandler>,
        ctx: ModuleContext,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(WorkerState::default());
        let name = ctx.name.clone();
        let accept_dupes = handler.accept_dupes();
        let tasks = Arc::clone(&ctx.tasks);
        let worker = tokio::spawn(run_worker(handler, ctx, rx, Arc::clone(&state)));

        Arc::new(Self {
            name,
            watched,
            accept_dupes,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            state,
            tasks,
        })
    }

    pub fn error_reason(&self) -> Option<String> {
        locked(&self.state.error_reason).clone()
    }
}

async fn run_worker(
    mut handler: Box<dyn EventHandler>,
    ctx: ModuleContext,
    mut rx: UnboundedReceiver<QueueItem>,
    state: Arc<WorkerState>,
) {
    if let Err(e) = handler.setup(&ctx).await {
        error!("Setup of module {} failed: {e}", ctx.name);
        *locked(&state.error_reason) = Some(e.to_string());
        state.errored.store(true, Ordering::SeqCst);
    }

    while let Some(item) = rx.recv().await {
        state.running.store(true, Ordering::SeqCst);
        state.queued.fetch_sub(1, Ordering::SeqCst);

        let skip = state.errored.load(Ordering::SeqCst) || state.stopping.load(Ordering::SeqCst);
        if !skip {
            let result = match item {
                QueueItem::Event(event) => handler.handle_event(event, &ctx).await,
                QueueItem::Finished => handler.finish(&ctx).await,
            };
            if let Err(e) = result {
                error!("Error in module {}: {e}", ctx.name);
                *locked(&state.error_reason) = Some(e.to_string());
                state.errored.store(true, Ordering::SeqCst);
            }
        }

        state.running.store(false, Ordering::SeqCst);
    }

    if let Err(e) = handler.cleanup(&ctx).await {
        warn!("Cleanup of module {} failed: {e}", ctx.name);
    }
    debug!("Module {} finished", ctx.name);
    state.finished.store(true, Ordering::SeqCst);
}

#[async_trait]
impl ScanModule for QueuedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn watched_events(&self) -> &WatchedEvents {
        &self.watched
    }

    fn status(&self) -> Result<ModuleStatus, ModuleError> {
        let crashed = locked(&self.worker)
            .as_ref()
            .is_some_and(|worker| worker.is_finished())
            && !self.state.finished.load(Ordering::SeqCst);
        if crashed {
            return Err(ModuleError::Failed {
                module: self.name.clone(),
                reason: "worker exited unexpectedly".to_string(),
            });
        }

        Ok(ModuleStatus {
            queued_events: self.state.queued.load(Ordering::SeqCst),
            running_tasks: self.tasks.load(Ordering::SeqCst),
            running: self.state.running.load(Ordering::SeqCst),
            errored: self.state.errored.load(Ordering::SeqCst),
        })
    }

    fn accept_dupes(&self) -> bool {
        self.accept_dupes
    }

    fn queue_event(&self, item: QueueItem) -> Result<(), ModuleError> {
        if self.state.errored.load(Ordering::SeqCst) {
            return Ok(());
        }
        let sender = locked(&self.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(ModuleError::NotRunning {
                module: self.name.clone(),
            });
        };
        self.state.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send(item).is_err() {
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ModuleError::NotRunning {
                module: self.name.clone(),
            });
        }
        Ok(())
    }

    async fn cleanup(&self) {
        self.state.stopping.store(true, Ordering::SeqCst);
        // Dropping the sender lets the worker drain and exit.
        locked(&self.sender).take();
    }

    fn set_error_state(&self, reason: Option<String>) {
        match &reason {
            Some(reason) => warn!("Setting error state for module {}: {reason}", self.name),
            None => debug!("Clearing error state for module {}", self.name),
        }
        let errored = reason.is_some();
        *locked(&self.state.error_reason) = reason;
        self.state.errored.store(errored, Ordering::SeqCst);
    }

    fn finished(&self) -> bool {
        if self.state.finished.load(Ordering::SeqCst) {
            return true;
        }
        // A worker that died without reaching the end will never set the flag.
        locked(&self.worker)
            .as_ref()
            .is_none_or(|worker| worker.is_finished())
    }
}

impl Drop for QueuedModule {
    fn drop(&mut self) {
        if let Some(worker) = locked(&self.worker).take() {
            if !worker.is_finished() {
                worker.abort();
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Echo {
        seen: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl EventHandler for Echo {
        async fn handle_event(
            &mut self,
            event: Arc<Event>,
            ctx: &ModuleContext,
        ) -> Result<(), ModuleError> {
            let data = event.data.to_string();
            if self.fail_on.as_deref() == Some(data.as_str()) {
                return Err(ModuleError::Failed {
                    module: ctx.name.clone(),
                    reason: "boom".to_string(),
                });
            }
            locked(&self.seen).push(data);
            Ok(())
        }

        async fn finish(&mut self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
            locked(&self.seen).push("FINISHED".to_string());
            Ok(())
        }
    }

    fn context(name: &str) -> (ModuleContext, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = Arc::new(TaskPool::new(1).unwrap());
        let ctx = ModuleContext::new(
            name,
            "test",
            Arc::new(serde_yaml::Value::Null),
            std::env::temp_dir(),
            pool,
            tx,
        );
        (ctx, rx)
    }

    async fn wait_idle(module: &QueuedModule) {
        for _ in 0..200 {
            if module.status().unwrap().is_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("module never went idle");
    }

    #[tokio::test]
    async fn delivers_in_order_then_finishes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (ctx, _rx) = context("echo");
        let module = QueuedModule::start(
            WatchedEvents::Any,
            Box::new(Echo { seen: seen.clone(), fail_on: None }),
            ctx,
        );

        let root = Event::root("test");
        for name in ["a.evilcorp.com", "b.evilcorp.com"] {
            let event = Event::new(EventType::DnsName, name, &root, "test", "t").unwrap();
            module.queue_event(QueueItem::Event(Arc::new(event))).unwrap();
        }
        module.queue_event(QueueItem::Finished).unwrap();
        wait_idle(&module).await;

        assert_eq!(*locked(&seen), vec!["a.evilcorp.com", "b.evilcorp.com", "FINISHED"]);

        module.cleanup().await;
        for _ in 0..200 {
            if module.finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(module.finished());
        assert!(module.queue_event(QueueItem::Finished).is_err());
    }

    #[tokio::test]
    async fn handler_error_sets_error_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (ctx, _rx) = context("flaky");
        let module = QueuedModule::start(
            WatchedEvents::Any,
            Box::new(Echo {
                seen: seen.clone(),
                fail_on: Some("bad.evilcorp.com".to_string()),
            }),
            ctx,
        );

        let root = Event::root("test");
        let bad = Event::new(EventType::DnsName, "bad.evilcorp.com", &root, "test", "t").unwrap();
        module.queue_event(QueueItem::Event(Arc::new(bad))).unwrap();
        wait_idle(&module).await;

        let status = module.status().unwrap();
        assert!(status.errored);
        assert_eq!(module.error_reason().as_deref(), Some("module flaky failed: boom"));

        // Errored modules silently drop new work.
        module.queue_event(QueueItem::Finished).unwrap();
        assert_eq!(module.status().unwrap().queued_events, 0);
        assert!(locked(&seen).is_empty());
    }

    struct Offload {
        release: Option<std::sync::mpsc::Receiver<()>>,
    }

    #[async_trait]
    impl EventHandler for Offload {
        async fn handle_event(&mut self, _event: Arc<Event>, ctx: &ModuleContext) -> Result<(), ModuleError> {
            if let Some(release) = self.release.take() {
                ctx.spawn_task(move || {
                    let _ = release.recv();
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn pool_work_counts_as_running_tasks() {
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let (ctx, _rx) = context("offload");
        let module = QueuedModule::start(
            WatchedEvents::Any,
            Box::new(Offload { release: Some(release_rx) }),
            ctx,
        );
        module.queue_event(QueueItem::Event(Arc::new(Event::root("test")))).unwrap();

        let mut status = module.status().unwrap();
        for _ in 0..200 {
            if status.running_tasks > 0 && status.queued_events == 0 && !status.running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            status = module.status().unwrap();
        }
        assert_eq!(status.running_tasks, 1);
        assert_eq!(status.queued_events, 0);
        assert!(!status.is_idle());

        release_tx.send(()).unwrap();
        wait_idle(&module).await;
        assert_eq!(module.status().unwrap().running_tasks, 0);
    }

    #[tokio::test]
    async fn run_task_returns_the_result() {
        let (ctx, _rx) = context("sum");
        assert_eq!(ctx.run_task(|| 2 + 2).await, Some(4));
        assert_eq!(ctx.running_tasks(), 0);
    }

    #[test]
    fn watched_events_matching() {
        let only = WatchedEvents::Only(["URL".to_string()].into_iter().collect());
        assert!(only.matches(&EventType::Url));
        assert!(!only.matches(&EventType::DnsName));
        assert!(WatchedEvents::Any.matches(&EventType::Finding));
    }
}
