//! # Baking
//!
//! Turns a [`Preset`] into a [`BakedPreset`]: includes expanded, modules
//! selected and closed over their dependencies, config layered on top of the
//! defaults and conditions evaluated.
//!
//! Baking never mutates its input and always starts from scratch, so baking
//! the same preset twice gives the same plan.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use spyglass_common::config::{self, ConfigTree, LayeredConfig};
use spyglass_common::network::target::Target;

use crate::error::{PresetAbortError, ResolutionError};
use crate::modules::descriptor::{ModuleDescriptor, ModuleKind};
use crate::modules::registry::ModuleRegistry;
use crate::preset::Preset;
use crate::preset::conditions::{self, ConditionOutcome};
use crate::preset::loader::PresetLoader;

pub const DEFAULT_OUTPUT_MODULES: [&str; 4] = ["python", "csv", "txt", "json"];

/// A fully resolved scan plan.
#[derive(Debug, Clone, PartialEq)]
pub struct BakedPreset {
    pub name: Option<String>,
    pub scan_modules: BTreeSet<String>,
    pub output_modules: BTreeSet<String>,
    pub internal_modules: BTreeSet<String>,
    /// Descriptor of every selected module, whatever its kind.
    pub descriptors: BTreeMap<String, ModuleDescriptor>,
    pub config: Arc<Value>,
    pub target: Target,
    pub flags: BTreeSet<String>,
    pub conditions: Vec<String>,
    pub warnings: Vec<String>,
    pub abort_reason: Option<String>,
    /// The preset with every include merged in.
    pub preset: Preset,
}

impl BakedPreset {
    pub fn is_aborting(&self) -> bool {
        self.abort_reason.is_some()
    }

    pub fn check(&self) -> Result<(), PresetAbortError> {
        match &self.abort_reason {
            Some(reason) => Err(PresetAbortError {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Every selected module name, in no particular kind order.
    pub fn modules(&self) -> impl Iterator<Item = &String> {
        self.descriptors.keys()
    }

    pub fn engine_u64(&self, key: &str, default: u64) -> u64 {
        config::lookup_u64(&self.config, &format!("engine.{key}"), default)
    }
}

/// Bakes presets against a shared module registry.
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<ModuleRegistry>,
    loader: PresetLoader,
    defaults: Arc<Value>,
}

impl Resolver {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry,
            loader: PresetLoader::default(),
            defaults: crate::default_config(),
        }
    }

    pub fn with_loader(mut self, loader: PresetLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_defaults(mut self, defaults: Arc<Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn loader(&self) -> &PresetLoader {
        &self.loader
    }

    /// Resolves `preset` into a scan plan.
    ///
    /// Any `module_dirs` the preset carries are added to the shared registry,
    /// so every other holder of it sees those modules from then on. Register
    /// directories on the registry up front to keep it unchanged here.
    pub fn bake(&self, preset: &Preset) -> Result<BakedPreset, ResolutionError> {
        let expanded = self.expand(preset)?;

        for dir in &expanded.module_dirs {
            self.registry.add_module_dir(dir);
        }
        let available = self.registry.preloaded();

        let config = self.layer_config(&expanded, &available)?;
        let mut warnings = Vec::new();

        let mut selected = select_scan_modules(&expanded, &available)?;
        selected.extend(select_output_modules(&expanded, &available, &mut warnings)?);
        selected.extend(select_internal_modules(&expanded, &available, &config));
        let descriptors = close_dependencies(selected, &expanded, &available)?;

        let partition = |kind: ModuleKind| -> BTreeSet<String> {
            descriptors
                .values()
                .filter(|d| d.kind == kind)
                .map(|d| d.name.clone())
                .collect()
        };

        let mut abort_reason = None;
        for condition in &expanded.conditions {
            let outcomes = conditions::evaluate(condition, &config).map_err(|e| {
                ResolutionError::InvalidCondition {
                    condition: condition.clone(),
                    reason: e.to_string(),
                }
            })?;
            for outcome in outcomes {
                match outcome {
                    ConditionOutcome::Abort(reason) => {
                        warn!("Preset condition aborted the scan: {reason}");
                        abort_reason.get_or_insert(reason);
                    }
                    ConditionOutcome::Warn(message) => {
                        warn!("{message}");
                        warnings.push(message);
                    }
                }
            }
        }

        let name = expanded.name.clone().or_else(|| {
            config::lookup(&config, "name")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        });

        Ok(BakedPreset {
            name,
            scan_modules: partition(ModuleKind::Scan),
            output_modules: partition(ModuleKind::Output),
            internal_modules: partition(ModuleKind::Internal),
            target: expanded.to_target().baked(),
            flags: expanded.flags.clone(),
            conditions: expanded.conditions.clone(),
            config: Arc::new(config),
            descriptors,
            warnings,
            abort_reason,
            preset: expanded,
        })
    }

    /// Merges every included preset (depth first, in order) under `preset`.
    pub fn expand(&self, preset: &Preset) -> Result<Preset, ResolutionError> {
        let mut visited = HashSet::new();
        if let Some(source) = &preset.source {
            visited.insert(canonical(source));
        }
        let mut expanded = self.expand_includes(preset, &mut visited)?;
        expanded.include.clear();
        expanded.source = preset.source.clone();
        Ok(expanded)
    }

    fn expand_includes(
        &self,
        preset: &Preset,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Preset, ResolutionError> {
        let relative_to = preset.source.as_deref().and_then(Path::parent);
        let mut expanded = Preset::new();

        for reference in &preset.include {
            let path = self.loader.find(reference, relative_to)?;
            if !visited.insert(canonical(&path)) {
                debug!("Skipping already included preset {}", path.display());
                continue;
            }
            debug!("Including preset {}", path.display());
            let included = Preset::from_file(&path)?;
            let included = self.expand_includes(&included, visited)?;
            expanded.merge(&included);
        }

        expanded.merge(preset);
        Ok(expanded)
    }

    fn layer_config(
        &self,
        preset: &Preset,
        available: &BTreeMap<String, ModuleDescriptor>,
    ) -> Result<Value, ResolutionError> {
        let mut module_options = Mapping::new();
        for descriptor in available.values() {
            if !descriptor.options.is_empty() {
                module_options.insert(
                    Value::String(descriptor.name.clone()),
                    descriptor.options_yaml(),
                );
            }
        }
        let mut base = Mapping::new();
        base.insert(Value::String("modules".into()), Value::Mapping(module_options));

        let mut defaults = LayeredConfig::new(Arc::new(Value::Mapping(base)));
        defaults.push(ConfigTree::from_yaml(&self.defaults)?);

        let mut layered = LayeredConfig::new(Arc::new(defaults.merged()));
        layered.push(preset.config.clone());
        Ok(layered.merged())
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn passes_filters(preset: &Preset, descriptor: &ModuleDescriptor) -> bool {
    let excluded_flag = descriptor
        .flags
        .iter()
        .any(|flag| preset.exclude_flags.contains(flag));
    let missing_flag = preset
        .require_flags
        .iter()
        .any(|flag| !descriptor.flags.contains(flag));
    !excluded_flag && !missing_flag && !preset.exclude_modules.contains(&descriptor.name)
}

fn select_scan_modules(
    preset: &Preset,
    available: &BTreeMap<String, ModuleDescriptor>,
) -> Result<BTreeSet<String>, ResolutionError> {
    let mut selected = BTreeSet::new();

    for name in &preset.modules {
        if preset.exclude_modules.contains(name) {
            return Err(ResolutionError::ModuleExcluded(name.clone()));
        }
        if !available.contains_key(name) {
            return Err(ResolutionError::UnknownModule {
                kind: ModuleKind::Scan.as_str(),
                name: name.clone(),
            });
        }
        selected.insert(name.clone());
    }

    if !preset.flags.is_empty() {
        for descriptor in available.values() {
            if descriptor.kind != ModuleKind::Scan || descriptor.flags.is_disjoint(&preset.flags) {
                continue;
            }
            if passes_filters(preset, descriptor) {
                selected.insert(descriptor.name.clone());
            } else {
                debug!("Module {} removed by flag filters", descriptor.name);
            }
        }
    }

    Ok(selected)
}

fn select_output_modules(
    preset: &Preset,
    available: &BTreeMap<String, ModuleDescriptor>,
    warnings: &mut Vec<String>,
) -> Result<BTreeSet<String>, ResolutionError> {
    let requested: BTreeSet<String> = match &preset.output_modules {
        Some(outputs) => outputs.clone(),
        None => DEFAULT_OUTPUT_MODULES.iter().map(|s| s.to_string()).collect(),
    };

    let mut selected = BTreeSet::new();
    for name in requested {
        if preset.exclude_modules.contains(&name) {
            debug!("Output module {name} is excluded");
            continue;
        }
        match available.get(&name) {
            Some(descriptor) if descriptor.kind == ModuleKind::Output => {
                selected.insert(name);
            }
            Some(descriptor) => {
                let message = format!("{name} is a {} module, not an output module", descriptor.kind);
                warn!("{message}");
                warnings.push(message);
            }
            None => {
                return Err(ResolutionError::UnknownModule {
                    kind: ModuleKind::Output.as_str(),
                    name,
                });
            }
        }
    }
    Ok(selected)
}

fn select_internal_modules(
    preset: &Preset,
    available: &BTreeMap<String, ModuleDescriptor>,
    config: &Value,
) -> BTreeSet<String> {
    available
        .values()
        .filter(|d| d.kind == ModuleKind::Internal)
        .filter(|d| !preset.exclude_modules.contains(&d.name))
        .filter(|d| config::lookup(config, &d.name).and_then(Value::as_bool) != Some(false))
        .map(|d| d.name.clone())
        .collect()
}

/// Adds every transitive dependency of `selected`, regardless of flags.
fn close_dependencies(
    selected: BTreeSet<String>,
    preset: &Preset,
    available: &BTreeMap<String, ModuleDescriptor>,
) -> Result<BTreeMap<String, ModuleDescriptor>, ResolutionError> {
    let mut closed = BTreeMap::new();
    let mut queue: VecDeque<String> = selected.into_iter().collect();

    while let Some(name) = queue.pop_front() {
        if closed.contains_key(&name) {
            continue;
        }
        let Some(descriptor) = available.get(&name) else {
            return Err(ResolutionError::UnknownModule {
                kind: ModuleKind::Scan.as_str(),
                name,
            });
        };
        for dependency in &descriptor.deps.modules {
            if preset.exclude_modules.contains(dependency) {
                return Err(ResolutionError::DependencyExcluded {
                    dependency: dependency.clone(),
                    required_by: name.clone(),
                });
            }
            if !available.contains_key(dependency) {
                return Err(ResolutionError::UnknownDependency {
                    dependency: dependency.clone(),
                    required_by: name.clone(),
                });
            }
            if !closed.contains_key(dependency) {
                debug!("Adding {dependency} as a dependency of {name}");
                queue.push_back(dependency.clone());
            }
        }
        closed.insert(name, descriptor.clone());
    }

    Ok(closed)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
