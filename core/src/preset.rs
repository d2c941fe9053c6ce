//! # Presets
//!
//! A [`Preset`] is a composable scan policy: what to scan, what is in scope,
//! which modules to run and how to configure them. Presets are plain YAML
//! documents, they merge into one another and can include other presets.
//!
//! Nothing here touches modules directly. Turning a preset into a concrete
//! plan is the job of [`bake`].

pub mod bake;
pub mod conditions;
pub mod loader;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use spyglass_common::config::ConfigTree;
use spyglass_common::network::scope::ScopeSet;
use spyglass_common::network::target::Target;

use crate::error::ResolutionError;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Fields are declared in key order so that serialized documents come out sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Preset {
    #[serde(skip_serializing_if = "ScopeSet::is_empty")]
    pub blacklist: ScopeSet,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    #[serde(skip_serializing_if = "ConfigTree::is_empty")]
    pub config: ConfigTree,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub exclude_flags: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub exclude_modules: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub module_dirs: BTreeSet<PathBuf>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub modules: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `None` keeps the default output modules; a selection replaces them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modules: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub require_flags: BTreeSet<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub strict_scope: bool,
    #[serde(skip_serializing_if = "ScopeSet::is_empty")]
    pub target: ScopeSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<ScopeSet>,

    /// File the preset was read from, used to resolve relative includes.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Preset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Reads a preset file. Relative module directories are anchored to the file.
    pub fn from_file(path: &Path) -> Result<Self, ResolutionError> {
        let text = std::fs::read_to_string(path).map_err(|source| ResolutionError::PresetIo {
            path: path.to_path_buf(),
            source,
        })?;
        let mut preset = Self::from_yaml(&text).map_err(|source| ResolutionError::PresetParse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            preset.module_dirs = preset
                .module_dirs
                .into_iter()
                .map(|dir| if dir.is_relative() { parent.join(dir) } else { dir })
                .collect();
        }
        preset.source = Some(path.to_path_buf());
        Ok(preset)
    }

    pub fn to_target(&self) -> Target {
        Target {
            seeds: self.target.clone(),
            whitelist: self.whitelist.clone(),
            blacklist: self.blacklist.clone(),
            strict_scope: self.strict_scope,
        }
    }

    /// Folds `other` into this preset. Sets union, `other` wins on config and names.
    pub fn merge(&mut self, other: &Preset) {
        let mut target = self.to_target();
        target.merge(&other.to_target());
        self.target = target.seeds;
        self.whitelist = target.whitelist;
        self.blacklist = target.blacklist;
        self.strict_scope = target.strict_scope;

        self.flags.extend(other.flags.iter().cloned());
        self.require_flags.extend(other.require_flags.iter().cloned());
        self.exclude_flags.extend(other.exclude_flags.iter().cloned());
        self.modules.extend(other.modules.iter().cloned());
        self.exclude_modules.extend(other.exclude_modules.iter().cloned());
        self.module_dirs.extend(other.module_dirs.iter().cloned());

        if let Some(theirs) = &other.output_modules {
            self.output_modules
                .get_or_insert_with(BTreeSet::new)
                .extend(theirs.iter().cloned());
        }

        self.config.merge(&other.config);

        for include in &other.include {
            if !self.include.contains(include) {
                self.include.push(include.clone());
            }
        }
        for condition in &other.conditions {
            if !self.conditions.contains(condition) {
                self.conditions.push(condition.clone());
            }
        }

        if other.name.is_some() {
            self.name = other.name.clone();
        }
        if other.description.is_some() {
            self.description = other.description.clone();
        }
    }

    pub fn merged(mut self, other: &Preset) -> Preset {
        self.merge(other);
        self
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

    const SORTED_DOC: &str = r#"blacklist:
- test.www.evilcorp.ce
conditions:
- '{% if config.web.spider_distance > 2 %}{{ abort("too deep") }}{% endif %}'
config:
  modules:
    http:
      url: https://spyglass.test/ingest
  speculate: false
  web:
    spider_distance: 2
    user_agent: null
description: Everything against evilcorp
exclude_flags:
- aggressive
exclude_modules:
- ffuf
flags:
- subdomain-enum
include:
- web-basic
modules:
- httpx
name: evilcorp
output_modules:
- http
- json
require_flags:
- safe
strict_scope: true
target:
- 1.2.3.0/24
- evilcorp.com
whitelist:
- evilcorp.ce
"#;

    #[test]
    fn yaml_round_trip_is_byte_identical() {
        let preset = Preset::from_yaml(SORTED_DOC).unwrap();
        assert_eq!(preset.to_yaml().unwrap(), SORTED_DOC);

        let empty = Preset::new().to_yaml().unwrap();
        assert_eq!(Preset::from_yaml(&empty).unwrap(), Preset::new());
    }

    #[test]
    fn null_in_config_is_a_deletion() {
        let preset = Preset::from_yaml(SORTED_DOC).unwrap();
        let web = match preset.config.get("web") {
            Some(spyglass_common::config::ConfigNode::Table(web)) => web.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(web.get("user_agent"), Some(&spyglass_common::config::ConfigNode::Deleted));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Preset::from_yaml("targets: [evilcorp.com]\n").is_err());
    }

    #[test]
    fn merge_unions_and_collapses() {
        let mut a = Preset::from_yaml("target: [1.2.3.0/24]\nflags: [safe]\nconditions: [a]\ninclude: [x]\n").unwrap();
        let b = Preset::from_yaml(
            "target: [1.2.3.16/28, evilcorp.com]\nwhitelist: [evilcorp.com]\nstrict_scope: true\nflags: [passive]\nconditions: [a, b]\ninclude: [y, x]\n",
        )
        .unwrap();
        a.merge(&b);

        assert_eq!(a.target.entries(), vec!["1.2.3.0/24", "evilcorp.com"]);
        assert_eq!(a.whitelist.as_ref().unwrap().entries(), vec!["evilcorp.com"]);
        assert!(a.strict_scope);
        assert_eq!(a.flags.len(), 2);
        assert_eq!(a.conditions, vec!["a", "b"]);
        assert_eq!(a.include, vec!["x", "y"]);
    }

    #[test]
    fn merge_output_modules() {
        let defaults = Preset::new();
        let custom = Preset::from_yaml("output_modules: [json]\n").unwrap();
        let merged = defaults.clone().merged(&custom);
        assert_eq!(merged.output_modules, custom.output_modules);
        assert_eq!(custom.clone().merged(&defaults).output_modules, custom.output_modules);
    }

    #[test]
    fn merge_is_idempotent() {
        let preset = Preset::from_yaml(SORTED_DOC).unwrap();
        assert_eq!(preset.clone().merged(&preset), preset);
    }

    #[test]
    fn relative_module_dirs_follow_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("p.yml");
        std::fs::write(&path, "module_dirs: [mods, /abs/mods]\n").unwrap();
        let preset = Preset::from_file(&path).unwrap();
        assert!(preset.module_dirs.contains(&tmp.path().join("mods")));
        assert!(preset.module_dirs.contains(Path::new("/abs/mods")));
        assert_eq!(preset.source.as_deref(), Some(path.as_path()));
    }
}
