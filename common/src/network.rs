pub mod host;
pub mod range;
pub mod scope;
pub mod target;
