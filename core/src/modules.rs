//! Everything about modules the engine needs, split by lifetime:
//!
//! * [`descriptor`]: static metadata, read from YAML.
//! * [`registry`]: the shared, cached set of known descriptors.
//! * [`runtime`]: the contract a running module fulfils.
//! * [`catalog`]: which descriptors have a runtime and how to start it.

pub mod catalog;
pub mod descriptor;
pub mod registry;
pub mod runtime;
