//! Static metadata about a module, read from `<name>.yml` descriptor files.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

/// Wildcard entry in `watched_events`.
pub const ANY_EVENT: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Scan,
    Output,
    Internal,
}

impl ModuleKind {
    /// Kind implied by the directory a descriptor lives in.
    pub fn from_dir_name(name: &str) -> Self {
        match name {
            "output" => ModuleKind::Output,
            "internal" => ModuleKind::Internal,
            _ => ModuleKind::Scan,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Scan => "scan",
            ModuleKind::Output => "output",
            ModuleKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub modules: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub kind: ModuleKind,
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub watched_events: BTreeSet<String>,
    #[serde(default)]
    pub produced_events: BTreeSet<String>,
    #[serde(default)]
    pub deps: Dependencies,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub options_desc: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// On-disk layout. Name and kind come from the file location.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DescriptorFile {
    flags: BTreeSet<String>,
    watched_events: BTreeSet<String>,
    produced_events: BTreeSet<String>,
    deps: Dependencies,
    options: BTreeMap<String, serde_json::Value>,
    options_desc: BTreeMap<String, String>,
    description: String,
}

impl ModuleDescriptor {
    pub fn new(name: &str, kind: ModuleKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            flags: BTreeSet::new(),
            watched_events: BTreeSet::new(),
            produced_events: BTreeSet::new(),
            deps: Dependencies::default(),
            options: BTreeMap::new(),
            options_desc: BTreeMap::new(),
            description: String::new(),
            path: None,
        }
    }

    pub fn with_flags<I: IntoIterator<Item = &'static str>>(mut self, flags: I) -> Self {
        self.flags.extend(flags.into_iter().map(str::to_string));
        self
    }

    pub fn watching<I: IntoIterator<Item = &'static str>>(mut self, events: I) -> Self {
        self.watched_events.extend(events.into_iter().map(str::to_string));
        self
    }

    pub fn producing<I: IntoIterator<Item = &'static str>>(mut self, events: I) -> Self {
        self.produced_events.extend(events.into_iter().map(str::to_string));
        self
    }

    pub fn depending_on<I: IntoIterator<Item = &'static str>>(mut self, modules: I) -> Self {
        self.deps.modules.extend(modules.into_iter().map(str::to_string));
        self
    }

    pub fn described(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Parses the descriptor at `path`. The file stem is the module name and
    /// the parent directory decides the kind.
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let raw = std::fs::read_to_string(path).map_err(|e| DescriptorError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(path, &raw)
    }

    pub fn from_yaml(path: &Path, raw: &str) -> Result<Self, DescriptorError> {
        let invalid = |reason: String| DescriptorError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| invalid("file has no usable name".to_string()))?;

        let kind = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|dir| dir.to_str())
            .map(ModuleKind::from_dir_name)
            .unwrap_or(ModuleKind::Scan);

        let file: DescriptorFile = if raw.trim().is_empty() {
            DescriptorFile::default()
        } else {
            serde_yaml::from_str(raw).map_err(|e| invalid(e.to_string()))?
        };

        Ok(Self {
            name: name.to_string(),
            kind,
            flags: file.flags,
            watched_events: file.watched_events,
            produced_events: file.produced_events,
            deps: file.deps,
            options: file.options,
            options_desc: file.options_desc,
            description: file.description,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn watches(&self, event_type: &str) -> bool {
        self.watched_events.contains(ANY_EVENT) || self.watched_events.contains(event_type)
    }

    /// Option defaults as a YAML mapping, ready to merge into config.
    pub fn options_yaml(&self) -> serde_yaml::Value {
        serde_yaml::to_value(&self.options).unwrap_or(serde_yaml::Value::Null)
    }
}

/// Descriptors for the modules that ship with the engine.
pub fn builtin_descriptors() -> Vec<ModuleDescriptor> {
    use ModuleKind::{Internal, Output};

    vec![
        ModuleDescriptor::new("aggregate", Internal)
            .watching([ANY_EVENT])
            .described("Summarize discovered events when the scan winds down"),
        ModuleDescriptor::new("excavate", Internal)
            .watching(["HTTP_RESPONSE"])
            .producing(["URL_UNVERIFIED", "DNS_NAME"])
            .described("Extract hosts and links from HTTP responses"),
        ModuleDescriptor::new("speculate", Internal)
            .watching(["IP_RANGE", "URL", "URL_UNVERIFIED"])
            .producing(["IP_ADDRESS", "OPEN_TCP_PORT"])
            .described("Derive likely events from existing ones"),
        ModuleDescriptor::new("cloud", Internal)
            .watching([ANY_EVENT])
            .described("Tag events that belong to cloud providers"),
        ModuleDescriptor::new("dns", Internal)
            .watching([ANY_EVENT])
            .producing(["DNS_NAME", "IP_ADDRESS"])
            .described("Resolve hosts"),
        ModuleDescriptor::new("python", Output)
            .watching([ANY_EVENT])
            .described("Collect events in memory for the caller"),
        ModuleDescriptor::new("csv", Output)
            .watching([ANY_EVENT])
            .described("Write events to a CSV file"),
        ModuleDescriptor::new("txt", Output)
            .watching([ANY_EVENT])
            .described("Write events to a text file"),
        ModuleDescriptor::new("json", Output)
            .watching([ANY_EVENT])
            .described("Write events as newline-delimited JSON"),
        ModuleDescriptor::new("http", Output)
            .watching([ANY_EVENT])
            .described("POST every event to a web endpoint"),
    ]
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

    #[test]
    fn kind_and_name_come_from_location() {
        let raw = "flags: [active, safe]\nwatched_events: [DNS_NAME]\ndeps:\n  modules: [dns]\noptions:\n  threads: 10\n";
        let scan = ModuleDescriptor::from_yaml(Path::new("/m/dnsbrute.yml"), raw).unwrap();
        assert_eq!(scan.name, "dnsbrute");
        assert_eq!(scan.kind, ModuleKind::Scan);
        assert!(scan.has_flag("safe"));
        assert!(scan.deps.modules.contains("dns"));
        assert_eq!(scan.options["threads"], serde_json::json!(10));

        let output = ModuleDescriptor::from_yaml(Path::new("/m/output/neo4j.yaml"), "").unwrap();
        assert_eq!(output.kind, ModuleKind::Output);
        let internal = ModuleDescriptor::from_yaml(Path::new("/m/internal/x.yml"), "").unwrap();
        assert_eq!(internal.kind, ModuleKind::Internal);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = ModuleDescriptor::from_yaml(Path::new("/m/bad.yml"), "flagz: [a]\n").unwrap_err();
        assert!(matches!(err, DescriptorError::Invalid { .. }));
    }

    #[test]
    fn wildcard_watch() {
        let any = ModuleDescriptor::new("x", ModuleKind::Output).watching([ANY_EVENT]);
        assert!(any.watches("DNS_NAME"));
        let some = ModuleDescriptor::new("y", ModuleKind::Scan).watching(["URL"]);
        assert!(!some.watches("DNS_NAME"));
    }
}
