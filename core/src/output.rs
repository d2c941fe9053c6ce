//! # Output Modules
//!
//! Output modules watch every event type and never emit. File-based outputs
//! share [`file::FileOutput`] and only differ in how a line is formatted.

pub mod csv;
pub mod file;
pub mod http;
pub mod json;
pub mod python;
pub mod retry;
pub mod txt;
