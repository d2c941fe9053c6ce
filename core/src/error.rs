use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use spyglass_common::error::{ConfigError, ScopeError};

/// A preset that contradicts itself or names something that does not exist.
///
/// Raised while baking; a scan is never started from a preset that fails here.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Unable to add scan module \"{0}\" because the module has been excluded")]
    ModuleExcluded(String),

    #[error("Unable to add {kind} module \"{name}\": no such module")]
    UnknownModule { kind: &'static str, name: String },

    #[error("Unable to add module \"{dependency}\" (required by \"{required_by}\") because the module has been excluded")]
    DependencyExcluded {
        dependency: String,
        required_by: String,
    },

    #[error("Module \"{required_by}\" depends on unknown module \"{dependency}\"")]
    UnknownDependency {
        dependency: String,
        required_by: String,
    },

    #[error("Could not find preset \"{0}\"")]
    PresetNotFound(String),

    #[error("Error reading preset {path}: {source}")]
    PresetIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Error parsing preset {path}: {source}")]
    PresetParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid condition {condition:?}: {reason}")]
    InvalidCondition { condition: String, reason: String },

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A condition in the preset asked for the scan not to run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Preset aborted: {reason}")]
pub struct PresetAbortError {
    pub reason: String,
}

/// A failure inside one module. Isolated to that module.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module {module} is not running")]
    NotRunning { module: String },

    #[error("module {module} failed: {reason}")]
    Failed { module: String, reason: String },

    #[error("module {module} has no runtime")]
    NoRuntime { module: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Delivery failure of an output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("rate limited by {0}")]
    RateLimited(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("fatal failure: {0}")]
    Fatal(String),
}

/// A module descriptor that could not be loaded. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DescriptorError {
    #[error("module directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("failed to read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Refusal to start a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Aborted(#[from] PresetAbortError),

    #[error("scan has no modules to run")]
    NoModules,

    #[error("scan already started")]
    AlreadyStarted,

    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
