//! # Internal Modules
//!
//! Modules that run in every scan unless disabled (`<name>: false`) or
//! excluded. They watch other modules' events and derive new ones.

pub mod aggregate;
pub mod speculate;
