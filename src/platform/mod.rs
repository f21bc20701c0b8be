// LogTrail - platform/mod.rs
//
// Platform abstraction layer: configuration, local directory listing, and
// remote file access.
// Dependencies: standard library, directories, walkdir, glob, ssh2.
// Must NOT depend on: app.

pub mod config;
pub mod fs;
pub mod remote;
pub mod sftp;
