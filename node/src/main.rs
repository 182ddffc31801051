use anyhow::{Context, Result};
use berkeley_network::telemetry::describe_metrics;
use berkeley_network::{AdjustmentApplier, Coordinator, NodeClient};
use berkeley_time::{LogicalClock, OsSystemClock, SystemTimeSource};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod version;

use config::AppConfig;
use version::{git_commit_hash, BERKELEY_VERSION, PROTOCOL_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Coordinator,
    Client,
}

impl Role {
    fn from_subcommand(name: &str) -> Option<Self> {
        match name {
            "coordinator" => Some(Role::Coordinator),
            "client" => Some(Role::Client),
            _ => None,
        }
    }
}

fn build_cli() -> Command {
    Command::new("berkeley-node")
        .version(BERKELEY_VERSION)
        .about("Berkeley clock synchronization over newline-delimited JSON")
        .disable_version_flag(true)
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level")
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format")
                .global(true),
        )
        .arg(
            Arg::new("metrics-port")
                .long("metrics-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Serve Prometheus metrics on this port")
                .global(true),
        )
        .subcommand(
            Command::new("coordinator")
                .about("Accept nodes and run synchronization rounds")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Address to listen on"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("TCP port to listen on"),
                )
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(f64))
                        .help("Seconds between synchronization rounds"),
                )
                .arg(
                    Arg::new("reply-timeout-ms")
                        .long("reply-timeout-ms")
                        .value_name("MILLIS")
                        .value_parser(value_parser!(u64))
                        .help("How long to wait for each TIME_REPLY"),
                ),
        )
        .subcommand(
            Command::new("client")
                .about("Register with a coordinator and follow its adjustments")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Coordinator host"),
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("Coordinator port"),
                )
                .arg(
                    Arg::new("id")
                        .long("id")
                        .value_name("ID")
                        .help("Identifier to register under"),
                )
                .arg(
                    Arg::new("offset")
                        .long("offset")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(f64))
                        .allow_negative_numbers(true)
                        .help("Initial logical clock offset"),
                )
                .arg(
                    Arg::new("drift")
                        .long("drift")
                        .value_name("RATE")
                        .value_parser(value_parser!(f64))
                        .allow_negative_numbers(true)
                        .help("Extra seconds gained per elapsed second"),
                )
                .arg(
                    Arg::new("set-system-clock")
                        .long("set-system-clock")
                        .action(ArgAction::SetTrue)
                        .help("Also set the host clock on every adjustment (needs privileges)"),
                ),
        )
}

fn load_config_with_overrides(role: Role, matches: &ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(role, matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(role: Role, matches: &ArgMatches, config: &mut AppConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(metrics_port) = matches.get_one::<u16>("metrics-port") {
        config.metrics_port = Some(*metrics_port);
    }

    match role {
        Role::Coordinator => {
            if let Some(host) = matches.get_one::<String>("host") {
                config.listen_host = host.clone();
            }
            if let Some(port) = matches.get_one::<u16>("port") {
                config.listen_port = *port;
            }
            if let Some(interval) = matches.get_one::<f64>("interval") {
                config.round_interval_secs = *interval;
            }
            if let Some(timeout) = matches.get_one::<u64>("reply-timeout-ms") {
                config.reply_timeout_ms = *timeout;
            }
        }
        Role::Client => {
            if let Some(host) = matches.get_one::<String>("host") {
                config.coordinator_host = host.clone();
            }
            if let Some(port) = matches.get_one::<u16>("port") {
                config.coordinator_port = *port;
            }
            if let Some(id) = matches.get_one::<String>("id") {
                config.node_id = id.clone();
            }
            if let Some(offset) = matches.get_one::<f64>("offset") {
                config.initial_offset = *offset;
            }
            if let Some(drift) = matches.get_one::<f64>("drift") {
                config.drift = *drift;
            }
            if matches.get_flag("set-system-clock") {
                config.set_system_clock = true;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    if matches.get_flag("version_flag") {
        print_version_info();
        return Ok(());
    }

    let Some((name, sub_matches)) = matches.subcommand() else {
        build_cli().print_help()?;
        return Ok(());
    };
    let Some(role) = Role::from_subcommand(name) else {
        anyhow::bail!("unknown subcommand '{name}'");
    };

    let config = load_config_with_overrides(role, sub_matches)?;
    init_logging(&config)?;
    info!(
        "Starting berkeley-node {} ({}) as {:?}, config from {}",
        BERKELEY_VERSION,
        PROTOCOL_NAME,
        role,
        config.config_source()
    );
    init_metrics(&config);

    match role {
        Role::Coordinator => run_coordinator(&config).await,
        Role::Client => run_client(&config).await,
    }
}

async fn run_coordinator(config: &AppConfig) -> Result<()> {
    let coordinator_config = config.coordinator_config();
    info!(
        "Round interval {:?}, reply timeout {:?}",
        coordinator_config.round.interval, coordinator_config.round.reply_timeout
    );
    let coordinator = Coordinator::bind(coordinator_config, Arc::new(SystemTimeSource))
        .await
        .context("coordinator failed to start")?;
    let running = coordinator.start()?;

    tokio::select! {
        _ = running.run_rounds() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received, stopping coordinator");
        }
    }
    Ok(())
}

async fn run_client(config: &AppConfig) -> Result<()> {
    let clock = LogicalClock::new(config.initial_offset, config.drift).into_shared();
    let mut applier = AdjustmentApplier::new(clock);
    if config.set_system_clock {
        warn!("Host clock mutation enabled; adjustments will call the system date utility");
        applier = applier.with_system_clock(Arc::new(OsSystemClock));
    }
    info!(
        "[clock] start offset={:.3} drift={}",
        config.initial_offset, config.drift
    );

    let client = NodeClient::new(config.client_config(), applier);
    tokio::select! {
        result = client.run() => {
            // Transport failures end the session with a zero exit status.
            if let Err(err) = result {
                warn!("Node session ended with a transport error: {err}");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received, stopping node {}", client.node_id());
        }
    }
    Ok(())
}

fn init_metrics(config: &AppConfig) -> bool {
    let Some(port) = config.metrics_port else {
        info!("Prometheus metrics exporter disabled via configuration");
        return false;
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            info!("Prometheus metrics exporter listening on {addr}");
            true
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            false
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

fn print_version_info() {
    println!(
        "berkeley-node {} (commit {}) [{}]",
        BERKELEY_VERSION,
        git_commit_hash(),
        PROTOCOL_NAME
    );
}
