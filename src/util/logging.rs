// LogTrail - util/logging.rs
//
// tracing subscriber setup for the CLI and for embedders.
//
// Level sources, strongest first: RUST_LOG, the --debug flag, `[logging]
// level` in config.toml, then the built-in default.
//
// Output goes to stderr, or to `[logging] file` when set. Log entries printed
// by the CLI use stdout, so the two streams never mix. Secrets are never
// logged.

use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
///
/// `config_level` and `log_file` come from the `[logging]` section.
pub fn init(debug_flag: bool, config_level: Option<&str>, log_file: Option<&str>) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if debug_flag {
        EnvFilter::new("debug")
    } else if let Some(level) = config_level {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(super::constants::DEFAULT_LOG_LEVEL)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .compact();

    let file = log_file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("Cannot open log file '{path}': {e}; logging to stderr"))
            .ok()
    });

    // `try_init` so repeated initialisation (tests, embedding) is harmless.
    let installed = match file {
        Some(f) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(f))
            .try_init()
            .is_ok(),
        None => builder.with_writer(std::io::stderr).try_init().is_ok(),
    };

    if installed {
        tracing::debug!(
            app = super::constants::APP_NAME,
            version = super::constants::APP_VERSION,
            log_file = log_file.unwrap_or("<stderr>"),
            "Logging initialised"
        );
    }
}
