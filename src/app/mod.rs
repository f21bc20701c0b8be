// LogTrail - app/mod.rs
//
// Application layer: paged readers, watchers, the page-load pool, and the
// controller that ties them to a consumer.
// Dependencies: core and platform layers.

pub mod consumer;
pub mod controller;
pub mod dir_watcher;
pub mod reader;
pub mod remote_reader;
pub mod remote_watcher;
pub mod watch;
pub mod worker;
