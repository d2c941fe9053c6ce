//! # Layered Configuration
//!
//! Configuration is a stack of layers over a read-only base document:
//!
//! * The **base** is the defaults document. It is shared behind an [`Arc`] and
//!   never modified.
//! * Each **layer** is a [`ConfigTree`]: nested tables of values where a key may
//!   also carry a deletion marker ([`ConfigNode::Deleted`]).
//!
//! [`LayeredConfig::merged`] folds the layers over a copy of the base, so a
//! deletion hides a default key from the merged view while the defaults stay
//! intact for the next bake.
//!
//! In YAML a deletion is written as `null`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Value(Value),
    Table(ConfigTree),
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ConfigTree(BTreeMap<String, ConfigNode>);

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ConfigNode> {
        self.0.get(key)
    }

    pub fn from_yaml(value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Mapping(mapping) => {
                let mut tree = Self::new();
                for (key, value) in mapping {
                    let node = match value {
                        Value::Null => ConfigNode::Deleted,
                        Value::Mapping(_) => ConfigNode::Table(Self::from_yaml(value)?),
                        other => ConfigNode::Value(other.clone()),
                    };
                    tree.0.insert(key_to_string(key)?, node);
                }
                Ok(tree)
            }
            other => Err(ConfigError::NotAMapping(kind_of(other).to_string())),
        }
    }

    /// YAML form with sorted keys; deletions come back out as `null`.
    pub fn to_yaml(&self) -> Value {
        let mut mapping = Mapping::new();
        for (key, node) in &self.0 {
            let value = match node {
                ConfigNode::Value(value) => value.clone(),
                ConfigNode::Table(table) => table.to_yaml(),
                ConfigNode::Deleted => Value::Null,
            };
            mapping.insert(Value::String(key.clone()), value);
        }
        Value::Mapping(mapping)
    }

    /// Deep merge with `other` winning. A deletion in `other` replaces whatever is here.
    pub fn merge(&mut self, other: &ConfigTree) {
        for (key, theirs) in &other.0 {
            match (self.0.get_mut(key), theirs) {
                (Some(ConfigNode::Table(mine)), ConfigNode::Table(theirs)) => mine.merge(theirs),
                _ => {
                    self.0.insert(key.clone(), theirs.clone());
                }
            }
        }
    }

    /// Sets a dotted path (`modules.http.timeout`), creating tables on the way.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), ConfigError> {
        let mut parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(ConfigError::InvalidKey(path.to_string()));
        }
        let Some(last) = parts.pop() else {
            return Err(ConfigError::InvalidKey(path.to_string()));
        };

        let mut tree = self;
        for part in parts {
            let entry = tree
                .0
                .entry(part.to_string())
                .or_insert_with(|| ConfigNode::Table(ConfigTree::new()));
            if !matches!(entry, ConfigNode::Table(_)) {
                *entry = ConfigNode::Table(ConfigTree::new());
            }
            tree = match entry {
                ConfigNode::Table(next) => next,
                _ => return Err(ConfigError::InvalidKey(path.to_string())),
            };
        }

        let node = match value {
            Value::Null => ConfigNode::Deleted,
            Value::Mapping(_) => ConfigNode::Table(ConfigTree::from_yaml(&value)?),
            other => ConfigNode::Value(other),
        };
        tree.0.insert(last.to_string(), node);
        Ok(())
    }

    /// Builds a layer out of `key.path=value` assignments. Values are parsed as YAML scalars.
    pub fn from_assignments<I, S>(assignments: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = Self::new();
        for assignment in assignments {
            let (path, value) = parse_assignment(assignment.as_ref())?;
            tree.set(&path, value)?;
        }
        Ok(tree)
    }
}

impl TryFrom<Value> for ConfigTree {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_yaml(&value)
    }
}

impl From<ConfigTree> for Value {
    fn from(tree: ConfigTree) -> Self {
        tree.to_yaml()
    }
}

/// A read-only base document with override layers stacked on top.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    base: Arc<Value>,
    layers: Vec<ConfigTree>,
}

impl LayeredConfig {
    pub fn new(base: Arc<Value>) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    pub fn base(&self) -> &Value {
        &self.base
    }

    /// Adds a layer above every existing one.
    pub fn push(&mut self, layer: ConfigTree) {
        self.layers.push(layer);
    }

    pub fn merged(&self) -> Value {
        let mut merged = (*self.base).clone();
        if !merged.is_mapping() {
            merged = Value::Mapping(Mapping::new());
        }
        for layer in &self.layers {
            apply(&mut merged, layer);
        }
        merged
    }
}

fn apply(target: &mut Value, layer: &ConfigTree) {
    let Value::Mapping(mapping) = target else {
        return;
    };
    for (key, node) in &layer.0 {
        let key = Value::String(key.clone());
        match node {
            ConfigNode::Deleted => {
                mapping.remove(&key);
            }
            ConfigNode::Value(value) => {
                mapping.insert(key, value.clone());
            }
            ConfigNode::Table(table) => {
                let entry = mapping
                    .entry(key)
                    .or_insert(Value::Mapping(Mapping::new()));
                if !entry.is_mapping() {
                    *entry = Value::Mapping(Mapping::new());
                }
                apply(entry, table);
            }
        }
    }
}

/// Follows a dotted path through nested mappings.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, part| current.as_mapping()?.get(part))
}

/// `lookup` that falls back to `default` when the key is absent or not a bool.
pub fn lookup_bool(value: &Value, path: &str, default: bool) -> bool {
    lookup(value, path)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

pub fn lookup_u64(value: &Value, path: &str, default: u64) -> u64 {
    lookup(value, path)
        .and_then(Value::as_u64)
        .unwrap_or(default)
}

/// Splits `a.b=value` into its path and a YAML-parsed value.
pub fn parse_assignment(assignment: &str) -> Result<(String, Value), ConfigError> {
    let Some((path, raw)) = assignment.split_once('=') else {
        return Err(ConfigError::InvalidAssignment(assignment.to_string()));
    };
    let path = path.trim();
    if path.is_empty() {
        return Err(ConfigError::InvalidAssignment(assignment.to_string()));
    }
    let raw = raw.trim();
    let value = if raw.is_empty() {
        Value::String(String::new())
    } else {
        serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    };
    Ok((path.to_string(), value))
}

fn key_to_string(key: &Value) -> Result<String, ConfigError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ConfigError::InvalidKey(format!("{other:?}"))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
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

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn deletion_hides_default_without_touching_base() {
        let base = Arc::new(yaml("engine:\n  idle_sleep_ms: 100\n  confirm_passes: 5\nspeculate: true\n"));
        let mut config = LayeredConfig::new(base.clone());
        config.push(ConfigTree::from_yaml(&yaml("engine:\n  confirm_passes: null\nspeculate: false\n")).unwrap());

        let merged = config.merged();
        assert_eq!(lookup_u64(&merged, "engine.idle_sleep_ms", 0), 100);
        assert!(lookup(&merged, "engine.confirm_passes").is_none());
        assert!(!lookup_bool(&merged, "speculate", true));

        assert_eq!(lookup_u64(&base, "engine.confirm_passes", 0), 5);
        assert_eq!(lookup_u64(config.base(), "engine.confirm_passes", 0), 5);
    }

    #[test]
    fn later_layers_win() {
        let mut config = LayeredConfig::new(Arc::new(Value::Null));
        config.push(ConfigTree::from_assignments(["a.b=1", "a.c=x"]).unwrap());
        config.push(ConfigTree::from_assignments(["a.b=2"]).unwrap());
        let merged = config.merged();
        assert_eq!(lookup_u64(&merged, "a.b", 0), 2);
        assert_eq!(lookup(&merged, "a.c").and_then(Value::as_str), Some("x"));
    }

    #[test]
    fn tree_merge_is_deep() {
        let mut a = ConfigTree::from_yaml(&yaml("x:\n  y: 1\n  z: 2\n")).unwrap();
        let b = ConfigTree::from_yaml(&yaml("x:\n  z: 3\n  w: null\n")).unwrap();
        a.merge(&b);
        assert_eq!(a.to_yaml(), yaml("x:\n  w: null\n  y: 1\n  z: 3\n"));
    }

    #[test]
    fn assignments() {
        assert_eq!(parse_assignment("a.b=true").unwrap(), ("a.b".into(), Value::Bool(true)));
        assert_eq!(
            parse_assignment("http.url=https://x.test/a").unwrap().1,
            Value::String("https://x.test/a".into())
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(ConfigTree::from_assignments(["a..b=1"]).is_err());
    }

    #[test]
    fn rejects_non_mapping() {
        assert!(ConfigTree::from_yaml(&yaml("- a\n- b\n")).is_err());
    }
}
