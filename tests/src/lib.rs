//! Scenarios that drive presets and scans through several crates at once.

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod presets;
#[cfg(test)]
mod scanning;
