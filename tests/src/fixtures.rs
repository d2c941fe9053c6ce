use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use spyglass_common::event::Event;
use spyglass_core::error::ModuleError;
use spyglass_core::modules::catalog::ModuleCatalog;
use spyglass_core::modules::registry::ModuleRegistry;
use spyglass_core::modules::runtime::{EventHandler, ModuleContext};
use spyglass_core::preset::bake::Resolver;
use spyglass_core::preset::loader::PresetLoader;

pub const FAST_ENGINE: &str = "engine:\n  idle_sleep_ms: 1\n  confirm_passes: 2\n  confirm_delay_ms: 5\n  finishing_delay_ms: 5\n  cleanup_poll_ms: 1\n";

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
}

/// Module descriptors and presets on disk, laid out the way users keep them.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        write(
            root,
            "modules/subfinder.yml",
            "flags: [subdomain-enum, passive, safe]\nwatched_events: [DNS_NAME]\nproduced_events: [DNS_NAME]\noptions:\n  prefix: www\noptions_desc:\n  prefix: Label to prepend\ndescription: Guesses one subdomain per target\n",
        );
        write(root, "modules/portscan.yml", "flags: [active, aggressive]\nwatched_events: [IP_ADDRESS]\n");

        write(
            root,
            "presets/subdomain-enum.yml",
            "description: Enumerate subdomains\nflags: [subdomain-enum]\nconfig:\n  modules:\n    subfinder:\n      prefix: api\n",
        );
        write(
            root,
            "presets/kitchen-sink.yml",
            "description: Everything\ninclude: [subdomain-enum]\nflags: [active]\n",
        );
        write(root, "presets/loop/a.yml", "include: [b]\nconfig:\n  a: 1\n");
        write(root, "presets/loop/b.yml", "include: [a]\nconfig:\n  b: 1\n");

        Self { dir }
    }

    pub fn path(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }

    pub fn resolver(&self) -> Resolver {
        let registry = ModuleRegistry::with_cache(self.path("cache/modules.json"));
        registry.add_module_dir(self.path("modules"));
        Resolver::new(Arc::new(registry)).with_loader(PresetLoader::new([self.path("presets")]))
    }
}

/// For every target DNS name, reports `<prefix>.<name>` plus a mail host
/// outside the target's domain.
pub struct Subfinder {
    prefix: String,
}

#[async_trait]
impl EventHandler for Subfinder {
    async fn setup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        if let Some(prefix) = ctx.option_str("prefix") {
            self.prefix = prefix.to_string();
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: Arc<Event>, ctx: &ModuleContext) -> Result<(), ModuleError> {
        if event.module != "TARGET" {
            return Ok(());
        }
        let name = event.data.to_string();
        let domain = name.split('.').next().unwrap_or("target");
        for found in [format!("{}.{name}", self.prefix), format!("{domain}-mail.net")] {
            let discovered = Event::new("DNS_NAME", found, &event, "subfinder", "subdomain guess")
                .map_err(|e| ModuleError::Failed {
                    module: "subfinder".to_string(),
                    reason: e.to_string(),
                })?;
            ctx.emit(discovered);
        }
        Ok(())
    }
}

pub fn catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::builtin();
    catalog.register("subfinder", |_| {
        Box::new(Subfinder {
            prefix: "www".to_string(),
        })
    });
    catalog
}
