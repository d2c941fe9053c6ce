use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::*;
use tracing::{info, warn};

use spyglass_common::config::{self, ConfigTree};
use spyglass_common::network::scope::ScopeSet;
use spyglass_core::modules::catalog::ModuleCatalog;
use spyglass_core::modules::registry::ModuleRegistry;
use spyglass_core::preset::Preset;
use spyglass_core::preset::bake::{BakedPreset, Resolver};
use spyglass_core::preset::loader::PresetLoader;
use spyglass_core::scanner::{ScanRecord, Scanner};

use crate::commands::ScanArgs;
use crate::terminal::{print, spinner};

const CACHE_FILE: &str = "module_cache.json";

/// The command line as a preset. Presets named with `-p` become includes, so
/// everything given directly on the command line overrides them.
pub fn preset_from_args(args: &ScanArgs) -> anyhow::Result<Preset> {
    let mut preset = Preset::new();
    preset.target = ScopeSet::parse(&args.targets).context("invalid target")?;
    if !args.whitelist.is_empty() {
        preset.whitelist = Some(ScopeSet::parse(&args.whitelist).context("invalid whitelist")?);
    }
    preset.blacklist = ScopeSet::parse(&args.blacklist).context("invalid blacklist")?;
    preset.strict_scope = args.strict_scope;
    preset.include = args.presets.clone();
    preset.modules = args.modules.iter().cloned().collect();
    preset.exclude_modules = args.exclude_modules.iter().cloned().collect();
    preset.flags = args.flags.iter().cloned().collect();
    preset.require_flags = args.require_flags.iter().cloned().collect();
    preset.exclude_flags = args.exclude_flags.iter().cloned().collect();
    if !args.output_modules.is_empty() {
        preset.output_modules = Some(args.output_modules.iter().cloned().collect());
    }
    preset.module_dirs = args.module_dir.iter().cloned().collect();
    preset.config = ConfigTree::from_assignments(&args.config).context("invalid config override")?;
    preset.name = args.name.clone();
    Ok(preset)
}

fn resolver(args: &ScanArgs) -> Resolver {
    let defaults = spyglass_core::default_config();
    let home = config::lookup(&defaults, "home")
        .and_then(|home| home.as_str())
        .unwrap_or(".spyglass");
    let registry = ModuleRegistry::with_cache(PathBuf::from(home).join(CACHE_FILE));
    Resolver::new(Arc::new(registry)).with_loader(PresetLoader::new(args.preset_dir.iter().cloned()))
}

fn print_plan(baked: &BakedPreset) {
    let width = 16;
    print::aligned_line("Name", baked.name.as_deref().unwrap_or("(random)"), width);
    print::aligned_line("Targets", baked.target.seeds.entries().join(", "), width);
    let join = |names: &std::collections::BTreeSet<String>| {
        names.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    print::aligned_line("Scan modules", join(&baked.scan_modules), width);
    print::aligned_line("Output modules", join(&baked.output_modules), width);
    print::aligned_line("Internal modules", join(&baked.internal_modules), width);
    for warning in &baked.warnings {
        warn!("{warning}");
    }
}

fn print_summary(record: &ScanRecord, counts: &BTreeMap<String, usize>, output_dir: &std::path::Path) {
    print::header("scan summary");
    let width = 16;
    for (event_type, count) in counts {
        print::aligned_line(event_type, count.to_string().green().bold(), width);
    }
    print::fat_separator();
    print::aligned_line("Status", record.status.to_string().yellow(), width);
    print::aligned_line("Duration", record.duration.as_deref().unwrap_or("-"), width);
    print::aligned_line("Output", output_dir.display(), width);
}

fn write_record(record: &ScanRecord, output_dir: &std::path::Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let path = output_dir.join("scan.json");
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
}

pub async fn scan(args: ScanArgs) -> anyhow::Result<()> {
    let preset = preset_from_args(&args)?;
    let resolver = resolver(&args);
    let baked = resolver.bake(&preset).context("failed to resolve preset")?;

    if args.current_preset {
        println!("{}", baked.preset.to_yaml()?);
        return Ok(());
    }

    print_plan(&baked);
    if args.dry_run {
        info!("Dry run, not scanning");
        return Ok(());
    }

    let catalog = ModuleCatalog::builtin();
    let collector = catalog.collector().clone();
    let mut scanner = Scanner::new(baked, catalog)?;
    if let Some(dir) = &args.output_dir {
        scanner = scanner.with_output_dir(dir);
    }
    let output_dir = scanner.output_dir().to_path_buf();

    let control = scanner.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping scan");
            control.interrupt();
        }
    });

    let spinner = spinner::start(format!("Scanning as {}", scanner.name().bold()));
    let progress = {
        let control = scanner.control();
        let collector = collector.clone();
        let name = scanner.name().to_string();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let status = control.status();
                if status.is_terminal() {
                    break;
                }
                spinner.set_message(format!(
                    "{} {} ({} events)",
                    status.to_string().yellow(),
                    name.bold(),
                    collector.len().to_string().green().bold()
                ));
            }
            spinner.finish_and_clear();
        })
    };

    let result = scanner.run().await;
    let _ = progress.await;
    let events = result.context("scan failed")?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in &events {
        *counts.entry(event.event_type.to_string()).or_default() += 1;
    }
    let record = scanner.record();
    write_record(&record, &output_dir)?;

    if counts.is_empty() {
        print::no_results("events");
    }
    print_summary(&record, &counts, &output_dir);
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
