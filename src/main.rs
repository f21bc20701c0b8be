// LogTrail - main.rs
//
// Command-line front end. Handles:
// 1. CLI argument parsing
// 2. Config loading and logging initialisation (debug mode support)
// 3. Building an endpoint profile (local dir, SFTP flags, or profile file)
// 4. Driving the controller: list files, page back through one, or follow it

use clap::Parser;
use logtrail::app::consumer::LogConsumer;
use logtrail::app::controller::Controller;
use logtrail::core::filter::EntryFilter;
use logtrail::core::model::{DeliveryMode, LogEntry};
use logtrail::core::profile::{EndpointProfile, RemoteTarget};
use logtrail::platform;
use logtrail::util;
use logtrail::util::constants;
use std::path::PathBuf;
use std::time::Duration;

/// LogTrail - tail and page through log files, locally or over SFTP.
///
/// Without --file the files of the endpoint are listed. With --file the
/// newest page is printed (plus older pages with --pages) and --follow keeps
/// printing new lines as they are written.
#[derive(Parser, Debug)]
#[command(name = "logtrail", version, about)]
struct Cli {
    /// Local directory to watch.
    dir: Option<PathBuf>,

    /// SFTP host (remote mode). The password is read from LOGTRAIL_SECRET.
    #[arg(long, requires_all = ["user", "remote_path"], conflicts_with = "dir")]
    host: Option<String>,

    #[arg(long, default_value_t = u32::from(constants::DEFAULT_SSH_PORT))]
    port: u32,

    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Remote directory holding the log files.
    #[arg(long = "path")]
    remote_path: Option<String>,

    /// TOML file describing one endpoint profile.
    #[arg(long = "profile-file", conflicts_with_all = ["dir", "host"])]
    profile_file: Option<PathBuf>,

    /// File to show, by name inside the watched directory.
    #[arg(short = 'f', long)]
    file: Option<String>,

    /// Line codec id (symfony, ox, plain).
    #[arg(short = 'c', long, default_value = constants::DEFAULT_CODEC_ID)]
    codec: String,

    /// Number of pages to print, newest first.
    #[arg(short = 'n', long, default_value_t = 1)]
    pages: usize,

    /// Keep running and print lines as they are appended.
    #[arg(long)]
    follow: bool,

    /// Print entries as JSON lines.
    #[arg(long)]
    json: bool,

    /// Only show these levels (comma-separated).
    #[arg(short = 'l', long, value_delimiter = ',')]
    level: Vec<String>,

    /// Only show entries dated on or after this day (YYYY-MM-DD).
    #[arg(long)]
    since: Option<chrono::NaiveDate>,

    /// Only show entries dated on or before this day (YYYY-MM-DD).
    #[arg(long)]
    until: Option<chrono::NaiveDate>,

    /// Config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

// =============================================================================
// Output consumer
// =============================================================================

/// Prints what the controller delivers. Pages are collected and printed in
/// file order once loading settles; tail batches are printed as they come.
#[derive(Default)]
struct Printer {
    json: bool,
    follow_output: bool,
    files: Vec<(String, u64)>,
    scan_done: bool,
    errors: usize,
}

impl Printer {
    fn print_entry(&self, entry: &LogEntry) {
        if !entry.is_log_line() {
            return;
        }
        if self.json {
            match serde_json::to_string(entry) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Cannot serialise entry"),
            }
        } else if let Some(raw) = &entry.raw_line {
            println!("{raw}");
        } else {
            let mut line = format!("{} {} {}", entry.timestamp, entry.level, entry.message);
            if !entry.context.is_empty() {
                line.push(' ');
                line.push_str(&entry.context);
            }
            println!("{}", line.trim_start());
        }
    }
}

impl LogConsumer for Printer {
    fn on_new_entries(&mut self, _file: &str, entries: &[LogEntry], mode: DeliveryMode) {
        if self.follow_output && mode == DeliveryMode::Prepend {
            for entry in entries {
                self.print_entry(entry);
            }
        }
    }

    fn on_file_discovered(&mut self, name: &str, size: u64, _updated: bool) {
        if self.scan_done && self.follow_output {
            eprintln!("+ {name}");
        }
        self.files.push((name.to_string(), size));
    }

    fn on_file_removed(&mut self, name: &str) {
        if self.follow_output {
            eprintln!("- {name}");
        }
        self.files.retain(|(n, _)| n != name);
    }

    // The main loop asks the controller directly.
    fn on_loading_state_changed(&mut self, _loading: bool) {}

    fn on_scan_state_changed(&mut self, scanning: bool) {
        if !scanning {
            self.scan_done = true;
        }
    }

    fn on_error(&mut self, title: &str, message: &str) {
        self.errors += 1;
        eprintln!("{title}: {message}");
    }

    fn on_growth_skipped(&mut self, name: &str, skipped_bytes: u64) {
        eprintln!("[{name}: {skipped_bytes} bytes skipped]");
    }
}

// =============================================================================
// Entry point
// =============================================================================

fn main() {
    let cli = Cli::parse();

    let platform_paths = platform::config::PlatformPaths::resolve();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| platform_paths.config_file());
    let (config, warnings) = platform::config::load_config(&config_path);

    util::logging::init(
        cli.debug,
        config.log_level.as_deref(),
        config.log_file.as_deref(),
    );
    for w in &warnings {
        tracing::warn!(warning = %w, "Config warning");
    }
    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        config = %config_path.display(),
        "LogTrail starting"
    );

    let profile = match build_profile(&cli) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("Error: {msg}");
            std::process::exit(2);
        }
    };

    let code = match run(&cli, config, profile) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            eprintln!("Error: {e}");
            1
        }
    };
    std::process::exit(code);
}

fn build_profile(cli: &Cli) -> Result<EndpointProfile, String> {
    if let Some(path) = &cli.profile_file {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read '{}': {e}", path.display()))?;
        return toml::from_str::<EndpointProfile>(&text)
            .map_err(|e| format!("invalid profile '{}': {e}", path.display()));
    }

    if let Some(host) = &cli.host {
        let target = RemoteTarget {
            host: host.clone(),
            port: cli.port,
            username: cli.user.clone().unwrap_or_default(),
            secret: std::env::var(constants::SECRET_ENV_VAR).unwrap_or_default(),
            path: cli.remote_path.clone().unwrap_or_default(),
        };
        return Ok(EndpointProfile::remote(host.clone(), target, &cli.codec));
    }

    match &cli.dir {
        Some(dir) => Ok(EndpointProfile::local(
            dir.display().to_string(),
            dir.clone(),
            &cli.codec,
        )),
        None => Err("give a directory, --host, or --profile-file".to_string()),
    }
}

fn run(
    cli: &Cli,
    config: platform::config::AppConfig,
    profile: EndpointProfile,
) -> Result<i32, logtrail::util::error::LogTrailError> {
    let filter = EntryFilter::default()
        .with_levels(&cli.level)
        .with_date_range(cli.since, cli.until);

    let mut controller = Controller::new(config)?;
    controller.set_filter(filter.clone());
    controller.select_profile(profile)?;

    let mut printer = Printer {
        json: cli.json,
        ..Printer::default()
    };
    let pause = Duration::from_millis(constants::CLI_PUMP_INTERVAL_MS);

    // First scan: either the listing or the connect error.
    while !printer.scan_done && printer.errors == 0 {
        controller.pump(&mut printer);
        std::thread::sleep(pause);
    }
    if !printer.scan_done {
        return Ok(1);
    }

    let Some(file) = cli.file.clone() else {
        for (name, size) in &printer.files {
            println!("{size:>12}  {name}");
        }
        if !cli.follow {
            return Ok(0);
        }
        printer.follow_output = true;
        loop {
            controller.pump(&mut printer);
            std::thread::sleep(pause);
        }
    };

    if !printer.files.iter().any(|(n, _)| *n == file) {
        eprintln!("Error: no file named '{file}'");
        return Ok(1);
    }

    controller.select_file(&file)?;
    let mut pages_loaded = 0;
    loop {
        controller.pump(&mut printer);
        if !controller.is_loading() {
            pages_loaded += 1;
            if pages_loaded >= cli.pages || !controller.load_more() {
                break;
            }
        }
        std::thread::sleep(pause);
    }

    if let Some(entries) = controller.cached_entries(&file) {
        for entry in filter.apply(entries.to_vec()) {
            printer.print_entry(&entry);
        }
    }

    if !cli.follow {
        return Ok(if printer.errors > 0 { 1 } else { 0 });
    }
    printer.follow_output = true;
    loop {
        controller.pump(&mut printer);
        std::thread::sleep(pause);
    }
}
