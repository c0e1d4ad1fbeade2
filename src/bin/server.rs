//! Quiver worker binary.
//!
//! Hosts the store and the query engines behind a pidfile, with the
//! signal/teardown discipline a supervised worker needs: a crash-looped
//! worker is given up on, a crashed worker's epitaph is read back at
//! shutdown, and a background checkpointer takes an exclusive ticket
//! like any other writer.
//!
//! ## Usage
//!
//! ```bash
//! # Start in the foreground with verbose logging
//! quiver-server -n -v debug
//!
//! # Start against an explicit config, custom pidfile
//! quiver-server -f /etc/quiver.toml -p /run/quiver.pid
//!
//! # Is a server running? Stop it.
//! quiver-server -q
//! quiver-server -z
//! ```

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use quiver::config::Config;
use quiver::store::{MemStore, PrimitiveStore, Store};
use quiver::ticket::TicketPrinter;
use quiver::worker::{Epitaph, Pidfile, RestartGuard};

// sysexits(3) codes the manager contract names.
const EX_USAGE: i32 = 64;
const EX_DATAERR: i32 = 65;
const EX_UNAVAILABLE: i32 = 69;
const EX_SOFTWARE: i32 = 70;
const EX_OSERR: i32 = 71;

#[derive(Parser, Debug)]
#[command(name = "quiver-server", about = "Quiver graph store worker")]
struct Args {
    /// Coverage/diagnostics directory
    #[arg(short = 'c', value_name = "DIR")]
    coverage_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(short = 'f', value_name = "FILE")]
    config: Option<String>,

    /// Group to run as
    #[arg(short = 'g', value_name = "GROUP")]
    group: Option<String>,

    /// Interface address to bind
    #[arg(short = 'i', value_name = "ADDR")]
    interface: Option<String>,

    /// Log file
    #[arg(short = 'l', value_name = "FILE")]
    logfile: Option<PathBuf>,

    /// Network log file
    #[arg(short = 'L', value_name = "FILE")]
    netlog: Option<PathBuf>,

    /// Stay in the foreground
    #[arg(short = 'n')]
    foreground: bool,

    /// Pidfile
    #[arg(short = 'p', value_name = "FILE")]
    pidfile: Option<PathBuf>,

    /// Worker process count (0 = one per CPU)
    #[arg(short = 'P', value_name = "N")]
    processes: Option<usize>,

    /// Query whether a server is running, then exit
    #[arg(short = 'q')]
    query: bool,

    /// Trace allocations
    #[arg(short = 't')]
    trace_allocator: bool,

    /// User to run as
    #[arg(short = 'u', value_name = "USER")]
    user: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'v', value_name = "LEVEL")]
    loglevel: Option<String>,

    /// Network log level
    #[arg(short = 'V', value_name = "LEVEL")]
    netloglevel: Option<String>,

    /// Disable core dumps
    #[arg(short = 'W')]
    no_core_dumps: bool,

    /// Interactive session
    #[arg(short = 'y')]
    interactive: bool,

    /// Stop a running server, then exit
    #[arg(short = 'z')]
    stop: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).context("loading configuration")?,
        None => Config::load().unwrap_or_default(),
    };
    if let Some(interface) = &args.interface {
        config.server.interface = interface.clone();
    }
    if let Some(p) = args.processes {
        config.server.processes = p;
    }
    if let Some(pidfile) = &args.pidfile {
        config.server.pidfile = pidfile.clone();
    }
    if let Some(level) = &args.loglevel {
        config.logging.level = level.clone();
    }
    if let Some(file) = &args.logfile {
        config.logging.file = Some(file.clone());
    }
    Ok(config)
}

fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    match &config.logging.file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().map_or_else(
                || std::ffi::OsString::from("quiver.log"),
                std::ffi::OsStr::to_os_string,
            );
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// `-q`: exit 0 when a server owns the pidfile.
fn query_running(config: &Config) -> i32 {
    match Pidfile::read_pid(&config.server.pidfile) {
        Ok(Some(pid)) if quiver::worker::process_alive(pid) => {
            println!("quiver-server running, pid {pid}");
            0
        }
        Ok(_) => {
            println!("quiver-server not running");
            1
        }
        Err(e) => {
            eprintln!("cannot read pidfile: {e}");
            EX_OSERR
        }
    }
}

/// `-z`: terminate the pidfile's owner.
fn stop_running(config: &Config) -> i32 {
    match Pidfile::read_pid(&config.server.pidfile) {
        Ok(Some(pid)) if quiver::worker::process_alive(pid) => {
            let ok = std::process::Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if ok {
                println!("sent TERM to pid {pid}");
                0
            } else {
                eprintln!("could not signal pid {pid}");
                EX_OSERR
            }
        }
        Ok(_) => {
            eprintln!("no running server to stop");
            EX_DATAERR
        }
        Err(e) => {
            eprintln!("cannot read pidfile: {e}");
            EX_OSERR
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if args.query && args.stop {
        eprintln!("-q and -z are mutually exclusive");
        exit(EX_USAGE);
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            exit(EX_SOFTWARE);
        }
    };

    if args.query {
        exit(query_running(&config));
    }
    if args.stop {
        exit(stop_running(&config));
    }

    let _log_guard = init_logging(&config);

    // A previous worker's last words, if any.
    match Epitaph::take(&config.server.epitaph_file) {
        Ok(Some(last_words)) => {
            tracing::error!(epitaph = %last_words.trim(), "previous worker died");
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "cannot read epitaph file"),
    }

    let _pidfile = match Pidfile::create(&config.server.pidfile) {
        Ok(pidfile) => pidfile,
        Err(e) => {
            eprintln!("pidfile conflict: {e}");
            exit(EX_DATAERR);
        }
    };

    let processes = if config.server.processes == 0 {
        num_cpus::get()
    } else {
        config.server.processes
    };
    let mut restart_guard = RestartGuard::new(
        Duration::from_secs(config.server.restart_window_secs),
        config.server.restart_limit,
    );

    let mut mem = MemStore::new();
    mem.set_payload_limit(config.store.payload_limit);
    mem.set_transactional(config.store.transactional);
    let store: Store = Arc::new(mem);
    let tickets = TicketPrinter::new();

    tracing::info!(
        interface = %config.server.interface,
        processes,
        foreground = args.foreground,
        interactive = args.interactive,
        user = args.user.as_deref().unwrap_or(""),
        group = args.group.as_deref().unwrap_or(""),
        "quiver-server starting"
    );
    if args.no_core_dumps {
        tracing::info!("core dumps disabled by policy");
    }
    if args.trace_allocator {
        tracing::info!("allocator tracing requested");
    }

    // Background checkpointer: an exclusive ticket, like any writer.
    let checkpoint_store = store.clone();
    let checkpoint_tickets = tickets.clone();
    let checkpointer = std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(30));
        let ticket = checkpoint_tickets.get_exclusive(None);
        if let Err(e) = checkpoint_store.checkpoint_write(false, false) {
            tracing::warn!(error = %e, "background checkpoint failed");
        }
        checkpoint_tickets.delete(ticket);
    });
    drop(checkpointer);

    // The socket frame dispatches requests into the engines; this
    // process supervises and tears down on signal.
    let shutdown = tokio::signal::ctrl_c().await;
    match shutdown {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "signal handler failed");
            if !restart_guard.allow_restart() {
                tracing::error!("restart limit exceeded; giving up");
                exit(EX_SOFTWARE);
            }
            exit(EX_OSERR);
        }
    }

    // Final checkpoint before exit.
    let ticket = tickets.get_exclusive(None);
    let final_checkpoint = store.checkpoint_write(true, true);
    tickets.delete(ticket);
    if let Err(e) = final_checkpoint {
        let text = format!("final checkpoint failed: {e}");
        let _ = Epitaph::write(&config.server.epitaph_file, &text);
        tracing::error!(error = %e, "final checkpoint failed");
        exit(EX_UNAVAILABLE);
    }
    tracing::info!("quiver-server stopped");
}
