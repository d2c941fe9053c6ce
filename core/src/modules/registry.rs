//! # Module Registry
//!
//! Loads module descriptors from a list of directories and keeps them for every
//! preset that shares the registry.
//!
//! The registry is created once and handed around as an `Arc<ModuleRegistry>`.
//! Adding a directory marks the loaded map stale; the next read reloads it and
//! every holder sees the new modules.
//!
//! Loading is cached on disk: the JSON artifact stores the descriptors next to
//! a fingerprint of the scanned directories (paths, file sizes and mtimes).
//! When the fingerprint still matches, no descriptor file is parsed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use spyglass_common::utils::hash;

use crate::error::DescriptorError;
use crate::modules::descriptor::{self, ModuleDescriptor, ModuleKind};

#[derive(Debug, Serialize, Deserialize)]
struct CacheArtifact {
    fingerprint: String,
    descriptors: BTreeMap<String, ModuleDescriptor>,
    #[serde(default)]
    errors: Vec<DescriptorError>,
}

#[derive(Debug, Default)]
struct RegistryState {
    dirs: Vec<PathBuf>,
    descriptors: BTreeMap<String, ModuleDescriptor>,
    errors: Vec<DescriptorError>,
    fingerprint: Option<String>,
    stale: bool,
}

#[derive(Debug)]
pub struct ModuleRegistry {
    state: RwLock<RegistryState>,
    cache_path: Option<PathBuf>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// A registry with only the built-in modules and no on-disk cache.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                stale: true,
                ..RegistryState::default()
            }),
            cache_path: None,
        }
    }

    pub fn with_cache(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: Some(cache_path.into()),
            ..Self::new()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a directory to search. Returns false if it was already known.
    pub fn add_module_dir(&self, dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref().to_path_buf();
        let mut state = self.write();
        if state.dirs.contains(&dir) {
            return false;
        }
        debug!("Adding module directory {}", dir.display());
        state.dirs.push(dir);
        state.stale = true;
        true
    }

    pub fn module_dirs(&self) -> Vec<PathBuf> {
        self.read().dirs.clone()
    }

    /// Adds `dirs` and returns every known descriptor.
    pub fn preload<I, P>(&self, dirs: I) -> BTreeMap<String, ModuleDescriptor>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for dir in dirs {
            self.add_module_dir(dir);
        }
        self.preloaded()
    }

    /// Every known descriptor, reloading first if directories changed.
    pub fn preloaded(&self) -> BTreeMap<String, ModuleDescriptor> {
        {
            let state = self.read();
            if !state.stale {
                return state.descriptors.clone();
            }
        }
        let mut state = self.write();
        if state.stale {
            self.load(&mut state);
        }
        state.descriptors.clone()
    }

    pub fn get(&self, name: &str) -> Option<ModuleDescriptor> {
        self.preloaded().remove(name)
    }

    pub fn errors(&self) -> Vec<DescriptorError> {
        self.preloaded();
        self.read().errors.clone()
    }

    /// Drops custom directories and everything loaded from them.
    pub fn reset(&self) {
        let mut state = self.write();
        *state = RegistryState {
            stale: true,
            ..RegistryState::default()
        };
    }

    /// Writes the current descriptors to the cache artifact, if one is configured.
    pub fn save_cache(&self) -> std::io::Result<()> {
        let Some(cache_path) = &self.cache_path else {
            return Ok(());
        };
        self.preloaded();
        let state = self.read();
        let Some(fingerprint) = &state.fingerprint else {
            return Ok(());
        };
        let artifact = CacheArtifact {
            fingerprint: fingerprint.clone(),
            descriptors: state.descriptors.clone(),
            errors: state.errors.clone(),
        };
        write_artifact(cache_path, &artifact)
    }

    fn load(&self, state: &mut RegistryState) {
        let fingerprint = fingerprint(&state.dirs);

        let (descriptors, errors) = match self.read_cache(&fingerprint) {
            Some(cached) => {
                debug!("Loaded {} module descriptors from cache", cached.descriptors.len());
                (cached.descriptors, cached.errors)
            }
            None => scan_dirs(&state.dirs),
        };
        for error in &errors {
            warn!("{error}");
        }
        state.descriptors = descriptors;
        state.errors = errors;

        state.fingerprint = Some(fingerprint);
        state.stale = false;

        if let Some(cache_path) = &self.cache_path {
            let artifact = CacheArtifact {
                fingerprint: state.fingerprint.clone().unwrap_or_default(),
                descriptors: state.descriptors.clone(),
                errors: state.errors.clone(),
            };
            if let Err(e) = write_artifact(cache_path, &artifact) {
                warn!("Could not write module cache {}: {e}", cache_path.display());
            }
        }
    }

    fn read_cache(&self, fingerprint: &str) -> Option<CacheArtifact> {
        let cache_path = self.cache_path.as_ref()?;
        let bytes = std::fs::read(cache_path).ok()?;
        let artifact: CacheArtifact = match serde_json::from_slice(&bytes) {
            Ok(artifact) => artifact,
            Err(e) => {
                debug!("Ignoring unreadable module cache {}: {e}", cache_path.display());
                return None;
            }
        };
        (artifact.fingerprint == fingerprint).then_some(artifact)
    }
}

fn write_artifact(path: &Path, artifact: &CacheArtifact) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(artifact).map_err(std::io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

fn is_descriptor(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    )
}

fn descriptor_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_descriptor(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Hash over the sorted directories and each descriptor's path, size and mtime.
fn fingerprint(dirs: &[PathBuf]) -> String {
    let mut sorted: Vec<&PathBuf> = dirs.iter().collect();
    sorted.sort();

    let mut parts: Vec<String> = Vec::new();
    for dir in sorted {
        parts.push(format!("dir:{}", dir.display()));
        if !dir.is_dir() {
            parts.push("missing".to_string());
            continue;
        }
        for file in descriptor_files(dir) {
            let (size, mtime) = std::fs::metadata(&file)
                .map(|meta| {
                    let mtime = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_nanos())
                        .unwrap_or_default();
                    (meta.len(), mtime)
                })
                .unwrap_or_default();
            parts.push(format!("{}|{size}|{mtime}", file.display()));
        }
    }
    hash::digest_hex(parts)
}

/// Built-ins first, then every directory in order. Later definitions win.
fn scan_dirs(dirs: &[PathBuf]) -> (BTreeMap<String, ModuleDescriptor>, Vec<DescriptorError>) {
    let mut descriptors: BTreeMap<String, ModuleDescriptor> = descriptor::builtin_descriptors()
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect();
    let mut errors = Vec::new();

    for dir in dirs {
        if !dir.is_dir() {
            errors.push(DescriptorError::MissingDirectory(dir.clone()));
            continue;
        }
        for file in descriptor_files(dir) {
            match ModuleDescriptor::from_file(&file) {
                Ok(descriptor) => {
                    if let Some(previous) = descriptors.get(&descriptor.name) {
                        debug!(
                            "Module {} from {} replaces the {} definition",
                            descriptor.name,
                            file.display(),
                            previous.kind
                        );
                    }
                    descriptors.insert(descriptor.name.clone(), descriptor);
                }
                Err(e) => errors.push(e),
            }
        }
    }

    (descriptors, errors)
}

/// Names of every descriptor of `kind`.
pub fn names_of_kind(
    descriptors: &BTreeMap<String, ModuleDescriptor>,
    kind: ModuleKind,
) -> Vec<String> {
    descriptors
        .values()
        .filter(|d| d.kind == kind)
        .map(|d| d.name.clone())
        .collect()
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
    use std::fs;
    use std::sync::Arc;

    fn write(dir: &Path, rel: &str, body: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn builtins_without_dirs() {
        let registry = ModuleRegistry::new();
        let all = registry.preloaded();
        for name in ["aggregate", "excavate", "speculate", "cloud", "dns"] {
            assert_eq!(all[name].kind, ModuleKind::Internal);
        }
        for name in ["python", "csv", "txt", "json"] {
            assert_eq!(all[name].kind, ModuleKind::Output);
        }
    }

    #[test]
    fn added_dir_visible_to_every_holder() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "passive/dnsdumpster.yml", "flags: [passive, safe]\n");
        write(tmp.path(), "output/neo4j.yml", "");

        let registry = Arc::new(ModuleRegistry::new());
        let other = Arc::clone(&registry);
        assert!(other.get("dnsdumpster").is_none());

        registry.add_module_dir(tmp.path());
        let found = other.get("dnsdumpster").unwrap();
        assert!(found.has_flag("passive"));
        assert_eq!(other.get("neo4j").unwrap().kind, ModuleKind::Output);
    }

    #[test]
    fn bad_inputs_are_recorded_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "good.yml", "flags: [safe]\n");
        write(tmp.path(), "broken.yml", "flags: [unterminated\n");

        let registry = ModuleRegistry::new();
        let missing = tmp.path().join("nope");
        let all = registry.preload([tmp.path().to_path_buf(), missing.clone()]);

        assert!(all.contains_key("good"));
        assert!(!all.contains_key("broken"));
        let errors = registry.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&DescriptorError::MissingDirectory(missing)));
    }

    #[test]
    fn cache_hit_and_invalidation() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("modules");
        let cache = tmp.path().join("cache").join("modules.json");
        write(&modules, "portscan.yml", "flags: [active]\n");

        let registry = ModuleRegistry::with_cache(&cache);
        registry.preload([&modules]);
        assert!(cache.exists());

        // Tamper with the artifact: a matching fingerprint means it is trusted as-is.
        let mut artifact: CacheArtifact = serde_json::from_slice(&fs::read(&cache).unwrap()).unwrap();
        artifact
            .descriptors
            .get_mut("portscan")
            .unwrap()
            .description = "from cache".to_string();
        fs::write(&cache, serde_json::to_vec(&artifact).unwrap()).unwrap();

        let second = ModuleRegistry::with_cache(&cache);
        assert_eq!(second.preload([&modules])["portscan"].description, "from cache");

        // A new descriptor file changes the fingerprint and forces a rescan.
        write(&modules, "httpx.yml", "flags: [active]\n");
        let third = ModuleRegistry::with_cache(&cache);
        let all = third.preload([&modules]);
        assert!(all.contains_key("httpx"));
        assert_eq!(all["portscan"].description, "");
    }

    #[test]
    fn cached_loads_still_report_bad_descriptors() {
        let tmp = tempfile::tempdir().unwrap();
        let modules = tmp.path().join("modules");
        let missing = tmp.path().join("nope");
        let cache = tmp.path().join("modules.json");
        write(&modules, "scan/broken.yml", "flags: [unterminated\n");
        write(&modules, "scan/good.yml", "flags: [safe]\n");

        let first = ModuleRegistry::with_cache(&cache);
        first.preload([modules.clone(), missing.clone()]);
        let first_errors = first.errors();
        assert_eq!(first_errors.len(), 2);

        let second = ModuleRegistry::with_cache(&cache);
        let all = second.preload([modules, missing.clone()]);
        assert!(all.contains_key("good"));
        assert_eq!(second.errors(), first_errors);
        assert!(second.errors().contains(&DescriptorError::MissingDirectory(missing)));
    }

    #[test]
    fn reset_forgets_custom_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "custom.yml", "");
        let registry = ModuleRegistry::new();
        registry.add_module_dir(tmp.path());
        assert!(registry.get("custom").is_some());

        registry.reset();
        assert!(registry.module_dirs().is_empty());
        assert!(registry.get("custom").is_none());
        assert!(registry.get("python").is_some());
    }
}
