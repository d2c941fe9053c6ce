//! Finding preset files by name or path, and listing what is available.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ResolutionError;
use crate::preset::Preset;

const EXTENSIONS: [&str; 2] = ["yml", "yaml"];

#[derive(Debug, Clone, Serialize)]
pub struct PresetSummary {
    pub name: String,
    pub path: PathBuf,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PresetLoader {
    preset_dirs: Vec<PathBuf>,
}

impl PresetLoader {
    pub fn new<I, P>(preset_dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            preset_dirs: preset_dirs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_preset_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.preset_dirs.contains(&dir) {
            self.preset_dirs.push(dir);
        }
    }

    pub fn preset_dirs(&self) -> &[PathBuf] {
        &self.preset_dirs
    }

    /// Resolves a preset reference to a file.
    ///
    /// A reference that names an existing file is used as-is (relative ones are
    /// tried against `relative_to` first). Otherwise it is a preset name looked
    /// up recursively under `relative_to`, then under every preset directory.
    pub fn find(&self, reference: &str, relative_to: Option<&Path>) -> Result<PathBuf, ResolutionError> {
        let as_path = Path::new(reference);

        if let Some(base) = relative_to {
            let candidate = base.join(as_path);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        if as_path.is_file() {
            return Ok(as_path.to_path_buf());
        }

        let search: Vec<&Path> = relative_to
            .into_iter()
            .chain(self.preset_dirs.iter().map(PathBuf::as_path))
            .collect();

        for dir in search {
            if let Some(found) = find_by_name(dir, reference) {
                debug!("Preset \"{reference}\" resolved to {}", found.display());
                return Ok(found);
            }
        }

        Err(ResolutionError::PresetNotFound(reference.to_string()))
    }

    pub fn load(&self, reference: &str, relative_to: Option<&Path>) -> Result<Preset, ResolutionError> {
        let path = self.find(reference, relative_to)?;
        Preset::from_file(&path)
    }

    /// Every preset file under the preset directories, sorted by name.
    pub fn list(&self) -> Vec<PresetSummary> {
        let mut summaries = Vec::new();
        for dir in &self.preset_dirs {
            for path in preset_files(dir) {
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let description = Preset::from_file(&path)
                    .ok()
                    .and_then(|preset| preset.description);
                summaries.push(PresetSummary {
                    name: name.to_string(),
                    path: path.clone(),
                    description,
                });
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        summaries
    }
}

fn has_preset_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext))
}

fn preset_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && has_preset_extension(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// `name`, `name.yml` or `name.yaml` anywhere below `dir`.
fn find_by_name(dir: &Path, reference: &str) -> Option<PathBuf> {
    let wanted = Path::new(reference).file_stem()?.to_str()?;
    let explicit_ext = has_preset_extension(Path::new(reference));
    preset_files(dir).into_iter().find(|path| {
        let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(wanted);
        let name_matches = !explicit_ext
            || path.file_name().and_then(|s| s.to_str()) == Path::new(reference).file_name().and_then(|s| s.to_str());
        stem_matches && name_matches
    })
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
