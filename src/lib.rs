// LogTrail - lib.rs
//
// Library entry point. The CLI in `main.rs` is a thin consumer of this
// surface; GUI front ends and integration tests use it the same way.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
