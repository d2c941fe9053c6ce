//! # Spyglass Core
//!
//! Turns presets into scans and runs them.
//!
//! * **[`modules`]**: module descriptors, the shared registry and the runtime
//!   contract every module implements.
//! * **[`preset`]**: preset documents, includes and baking into a plan.
//! * **[`scanner`]**: the scan manager, its status machine and the
//!   [`Scanner`](scanner::Scanner) facade.
//! * **[`output`]**: output modules that ship with the engine.
//! * **[`internal`]**: internal modules that ship with the engine.

pub mod error;
pub mod internal;
pub mod modules;
pub mod output;
pub mod preset;
pub mod scanner;

use std::sync::{Arc, OnceLock};

use serde_yaml::{Mapping, Value};
use tracing::error;

const DEFAULTS_YML: &str = include_str!("defaults.yml");

/// The read-only base configuration every preset is layered on.
pub fn default_config() -> Arc<Value> {
    static DEFAULTS: OnceLock<Arc<Value>> = OnceLock::new();
    DEFAULTS
        .get_or_init(|| match serde_yaml::from_str(DEFAULTS_YML) {
            Ok(value) => Arc::new(value),
            Err(e) => {
                error!("Built-in defaults are not valid YAML: {e}");
                Arc::new(Value::Mapping(Mapping::new()))
            }
        })
        .clone()
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
