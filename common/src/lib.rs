//! # Spyglass Common
//!
//! Plain value types shared by every other crate in the workspace:
//!
//! * **[`event`]**: discovered facts and their provenance tree.
//! * **[`network`]**: host parsing, scope sets and the scan [`Target`](network::target::Target).
//! * **[`config`]**: layered configuration with read-only defaults and deletion markers.
//! * **[`error`]**: error types for the above.
//!
//! Nothing in here performs IO.

pub mod config;
pub mod error;
pub mod event;
pub mod network;
pub mod utils;

pub use event::{Event, EventData, EventHash, EventType};
pub use network::host::Host;
pub use network::scope::ScopeSet;
pub use network::target::{Target, TargetRecord};
