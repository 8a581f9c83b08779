//! Role gateway daemon

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::Uptime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use role_gateway::config::{
    self, DEFAULT_ROUTER_FILE, DEFAULT_SELF_SEARCH_FILE, DEFAULT_SENDER_FILE, DEFAULT_SETTINGS_FILE,
};
use role_gateway::discovery::{NetworkManager, Services};
use role_gateway::monitor::{ActivityMonitor, TraceSink, DEFAULT_SAMPLE_INTERVAL};
use role_gateway::pipeline::{Discard, Pipeline, PipelineConfig};
use role_gateway::platform::{IcmpPinger, IpCommand, SysfsLink, SystemClock, SystemOpener};
use role_gateway::{RouterConfig, SenderConfig, Settings};

#[derive(Parser)]
#[command(name = "role-gateway")]
#[command(about = "Role-based raw packet gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Static settings file
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    /// Self-search candidate list
    #[arg(long, default_value = DEFAULT_SELF_SEARCH_FILE)]
    self_search: PathBuf,

    /// Router header layout
    #[arg(long, default_value = DEFAULT_ROUTER_FILE)]
    router: PathBuf,

    /// Sender header constants
    #[arg(long, default_value = DEFAULT_SENDER_FILE)]
    sender: PathBuf,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(cli: &Cli) -> Result<()> {
    // RUST_LOG wins over --verbose
    let fallback = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let layer = fmt::layer().with_target(true).with_timer(Uptime::default());

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer.with_ansi(false).with_writer(Arc::new(file)))
                .try_init()
                .ok();
        }
        None => {
            tracing_subscriber::registry().with(env_filter).with(layer).try_init().ok();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let settings: Settings = config::load_json(&cli.settings).context("failed to load settings")?;
    let router: RouterConfig = config::load_json(&cli.router).context("failed to load router configuration")?;
    router.validate()?;
    let sender: SenderConfig = config::load_json(&cli.sender).context("failed to load sender configuration")?;
    sender.validate()?;
    let candidates = if settings.enable_self_search {
        config::load_candidates(&cli.self_search).context("failed to load self-search candidates")?
    } else {
        Vec::new()
    };

    let link = SysfsLink::default();
    let services = Services {
        link: &link,
        configurator: &IpCommand,
        reachability: &IcmpPinger::default(),
        clock: &SystemClock,
    };
    let mut manager = NetworkManager::from_settings(&settings, candidates);
    manager.configure(services);
    let ports: Vec<String> = manager.interfaces().iter().map(|iface| iface.name.clone()).collect();

    let mut table = manager.into_role_table().context("failed to resolve interface roles")?;
    table.attach_transports(&SystemOpener);
    for iface in table.interfaces() {
        info!(iface = %iface.name, role = %iface.role, addr = ?iface.self_addr(), "interface ready");
    }

    let pipeline = Pipeline::start(
        Arc::new(table),
        PipelineConfig::new(&settings, router, sender),
        Box::new(Discard),
        Box::new(Discard),
    )?;

    let stop = pipeline.stop_flag();
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

    let monitor_stop = Arc::new(AtomicBool::new(false));
    let monitor = ActivityMonitor::new(link, ports).spawn(
        DEFAULT_SAMPLE_INTERVAL,
        Arc::clone(&monitor_stop),
        Box::new(TraceSink),
    )?;

    info!("gateway running, press Ctrl+C to stop");
    let result = pipeline.run_until_stopped(Duration::from_millis(200));

    monitor_stop.store(true, Ordering::Relaxed);
    if monitor.join().is_err() {
        warn!("activity monitor panicked");
    }

    let stats = result?;
    info!(sent = stats.sender.sent, "gateway stopped");
    Ok(())
}
