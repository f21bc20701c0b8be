// LogTrail - core/mod.rs
//
// Core business logic layer.
// Dependencies: standard library plus pure data crates (regex, serde, chrono).
// Must NOT depend on: platform, app, or any I/O crate directly.

pub mod cache;
pub mod codec;
pub mod filter;
pub mod model;
pub mod profile;
