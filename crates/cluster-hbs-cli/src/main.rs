//! Binary that follows cluster heartbeat state from the local agent and logs it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;

use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sm_cluster_hbs::constants::{
    CONTROLLER_0_NAME, DEFAULT_PULSE_INTERVAL_MS, SM_CLIENT_PORT_KEY, SM_SERVER_PORT_KEY,
};
use sm_cluster_hbs::{
    ClientConfig, ClusterHbsClient, ConfigSource, FileConfig, HostnameSource, IntervalScheduler,
    LayeredConfig, MemoryConfig, StaticHostname, SystemHostname, TokioReactor,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// `key=value` file holding `sm_server_port` and `sm_client_port`
    #[arg(long, env = "SM_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Heartbeat agent port, overrides the config file
    #[arg(long, env = "SM_SERVER_PORT")]
    server_port: Option<u16>,

    /// Local bind port, overrides the config file
    #[arg(long, env = "SM_CLIENT_PORT")]
    client_port: Option<u16>,

    /// Hostname of the controller in slot 0
    #[arg(long, default_value = CONTROLLER_0_NAME, env = "SM_CONTROLLER0_NAME")]
    controller0_name: String,

    /// Use this hostname instead of the system one
    #[arg(long, env = "SM_HOSTNAME")]
    hostname: Option<String>,

    /// Alive pulse period in milliseconds
    #[arg(long, default_value_t = DEFAULT_PULSE_INTERVAL_MS, env = "SM_PULSE_INTERVAL_MS")]
    pulse_interval_ms: u64,

    /// Seconds between state reports
    #[arg(long, default_value_t = 10, env = "SM_REPORT_INTERVAL_SECS")]
    report_interval_secs: u64,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn client_config(args: &Args) -> Result<ClientConfig> {
    let mut overrides = MemoryConfig::new();
    if let Some(port) = args.server_port {
        overrides.set(SM_SERVER_PORT_KEY, port.to_string());
    }
    if let Some(port) = args.client_port {
        overrides.set(SM_CLIENT_PORT_KEY, port.to_string());
    }

    let base: Box<dyn ConfigSource> = match &args.config_file {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Box::new(FileConfig::load(path)?)
        }
        None => Box::new(MemoryConfig::new()),
    };

    let config = ClientConfig::from_source(&LayeredConfig::new(overrides, base.as_ref()))?
        .with_controller0_name(&args.controller0_name)
        .with_pulse_interval(Duration::from_millis(args.pulse_interval_ms));
    Ok(config)
}

fn start_client(
    config: &ClientConfig,
    hostname: impl HostnameSource + 'static,
) -> Result<Arc<ClusterHbsClient>> {
    let reactor = TokioReactor::new()?;
    let scheduler = IntervalScheduler::new()?;
    Ok(ClusterHbsClient::initialize(
        config,
        hostname,
        &reactor,
        &scheduler,
    )?)
}

async fn follow(client: &ClusterHbsClient, report_every: Duration, shutdown: CancellationToken) {
    match tokio::time::timeout(report_every, client.query_state()).await {
        Ok(Ok(_)) => info!("Initial cluster hbs state received"),
        Ok(Err(e)) => warn!("Initial cluster hbs query failed: {e}"),
        Err(_) => warn!("No cluster hbs response within {report_every:?}"),
    }

    let mut interval = tokio::time::interval(report_every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => info!("{}", client.report()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
            .finish(),
    )?;

    if args.report_interval_secs == 0 {
        return Err(Error::InvalidArgument(
            "report interval must be non-zero".to_string(),
        ));
    }

    let config = client_config(&args)?;
    let client = match args.hostname {
        Some(name) => start_client(&config, StaticHostname(name))?,
        None => start_client(&config, SystemHostname)?,
    };

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt signal");
        signal_shutdown.cancel();
    });

    follow(
        &client,
        Duration::from_secs(args.report_interval_secs),
        shutdown,
    )
    .await;

    info!("Shutting down");
    client.finalize();
    Ok(())
}
