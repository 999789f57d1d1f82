use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use mpath_agent::config::{AgentConfig, parse_alias_list};
use mpath_agent::mpathconf::{LinuxHost, MultipathConfigurator, SystemdServices};
use mpath_agent::teardown::{DeviceTeardown, LinuxDeviceOps, locks};
use mpath_agent::{SUPPORTED_VENDORS, SystemRunner, metrics};

#[derive(Parser, Debug)]
#[command(name = "mpath-agent")]
#[command(about = "Host multipath configuration and device teardown agent")]
struct Args {
    /// Path to the multipath configuration file
    #[arg(long, env = "MULTIPATH_CONF", default_value = "/etc/multipath.conf")]
    multipath_conf: PathBuf,

    /// Directory containing multipath.conf seed templates
    #[arg(long, env = "MPATH_TEMPLATE_DIR", default_value = "/opt/mpath-agent/templates")]
    template_dir: PathBuf,

    /// Device recommendation templates (JSON). Built-in templates when unset
    #[arg(long, env = "MPATH_RECOMMENDATIONS")]
    recommendations: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics HTTP address (e.g., 0.0.0.0:9092)
    /// If not set, metrics endpoint is disabled
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Do not reconcile multipath.conf
    #[arg(long, env = "MPATH_SKIP_CONFIGURE")]
    skip_configure: bool,

    /// Multipath aliases to tear down (comma separated)
    #[arg(long, env = "MPATH_TEARDOWN")]
    teardown: Option<String>,
}

impl Args {
    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            multipath_conf: self.multipath_conf.clone(),
            template_dir: self.template_dir.clone(),
            recommendations: self.recommendations.clone(),
            skip_configure: self.skip_configure,
            teardown: self
                .teardown
                .as_deref()
                .map(parse_alias_list)
                .unwrap_or_default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize tracing with configured log level
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize Prometheus metrics endpoint if configured
    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    let config = args.agent_config();
    info!("Starting mpath-agent");
    info!("Log level: {}", args.log_level);
    info!("Multipath config: {}", config.multipath_conf.display());
    info!("Template directory: {}", config.template_dir.display());

    // The core is synchronous; keep it off the runtime threads
    tokio::task::spawn_blocking(move || run(&config)).await??;

    info!("mpath-agent finished");
    Ok(())
}

fn run(config: &AgentConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if config.skip_configure {
        info!("Skipping multipath configuration");
    } else {
        let host = LinuxHost::new(SystemRunner);
        let services = SystemdServices::new(SystemRunner);
        let configurator = MultipathConfigurator::new(
            &host,
            &services,
            &config.multipath_conf,
            &config.template_dir,
            config.templates()?,
        );
        // Continue anyway - inventory and teardown do not depend on it
        if let Err(e) = configurator.configure_multipath() {
            error!("Failed to configure multipath: {}", e);
        }
    }

    let ops = LinuxDeviceOps::new(SystemRunner);
    let teardown = DeviceTeardown::new(&ops, locks::global());

    let devices = match teardown.multipath_devices(SUPPORTED_VENDORS) {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Failed to list multipath devices: {}", e);
            Vec::new()
        }
    };
    for device in &devices {
        if device.unhealthy {
            warn!(alias = %device.name, vendor = %device.vend, path_faults = device.path_faults, "Multipath device has no active paths");
        } else {
            info!(alias = %device.name, vendor = %device.vend, paths = device.paths, "Multipath device");
        }
    }

    for alias in &config.teardown {
        let report = teardown.teardown(alias)?;
        info!(alias = %alias, state = %report.state(), killed = report.processes_killed, "Tore down multipath device");
        match devices.iter().find(|d| &d.name == alias) {
            Some(device) => {
                let removed = teardown.remove_block_devices(device)?;
                info!(alias = %alias, removed, "Removed block devices");
            }
            None => warn!(alias = %alias, "Not in multipath inventory, block devices left in place"),
        }
    }
    Ok(())
}
