//! The gateway's process entry point: loads configuration, wires up the
//! admission filters, starts both front-ends, and waits for a shutdown
//! signal.

#[macro_use]
extern crate tracing;

use bbs_gateway::config::Config;
use bbs_gateway::geo_filter::GeoFilter;
use bbs_gateway::ssh_frontend;
use bbs_gateway::supervisor::Supervisor;
use bbs_gateway::tcp_frontend;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("bbs-gateway: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    let ip_filter = config.build_ip_filter()?;
    let geo_filter = match &config.geoip_database_path {
        Some(path) => GeoFilter::load(path),
        None => GeoFilter::disabled(),
    };

    let ssh_host_key = if config.ssh_enabled {
        Some(ssh_frontend::load_host_key(&config.ssh_host_key)?)
    } else {
        None
    };

    let supervisor = Supervisor::new(config, ip_filter, geo_filter);

    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(tcp_frontend::run(supervisor.clone()));
    if let Some(host_key) = ssh_host_key {
        tasks.spawn(ssh_frontend::run(supervisor.clone(), host_key));
    }
    tasks.spawn({
        let supervisor = supervisor.clone();
        async move {
            supervisor.run_janitor().await;
            Ok(())
        }
    });

    let shutdown_supervisor = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            shutdown_supervisor.shutdown().await;
        }
    });

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => error!(%error, "gateway task failed"),
            Err(join_error) => error!(%join_error, "gateway task panicked"),
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
