//! mongoswarm operator binary.
//!
//! Domain configuration comes from the environment (see `Settings`); the
//! command line only carries operational flags.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mongoswarm::config::Settings;
use mongoswarm::mongo::WireAdmin;
use mongoswarm::shutdown::ShutdownSignal;
use mongoswarm::swarm::DockerApi;
use mongoswarm::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "mongoswarm")]
#[command(about = "MongoDB replica set operator for Docker Swarm")]
struct Args {
    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run exactly one reconciliation cycle, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // DEBUG=1 in the environment implies debug logging; the flag wins.
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            // Subscriber may not be up yet; make sure this reaches stderr.
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    };

    let default_level = if settings.debug { "debug" } else { "info" };
    let level = args.log_level.as_deref().unwrap_or(default_level);
    let filter = EnvFilter::try_new(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        service = %settings.mongo_service_name,
        replica_set = %settings.replicaset_name,
        network = %settings.overlay_network_name,
        "starting mongoswarm operator"
    );

    let swarm = match DockerApi::new(&settings.docker_endpoint) {
        Ok(swarm) => swarm,
        Err(e) => {
            error!(error = %e, "cannot construct docker client");
            std::process::exit(1);
        }
    };
    let admin = Arc::new(WireAdmin::new(settings.probe_timeout));
    let settings = Arc::new(settings);
    let mut supervisor = Supervisor::new(swarm, admin, Arc::clone(&settings));

    if args.once {
        if let Err(e) = supervisor.run_cycle().await {
            error!(error = %e, "cycle failed");
            std::process::exit(1);
        }
        return;
    }

    let signal = ShutdownSignal::new();
    let shutdown = signal.subscribe();
    tokio::spawn(signal.listen());

    match supervisor.run(shutdown).await {
        Ok(()) => info!("clean shutdown"),
        Err(e) => {
            // Only startup failures propagate this far; runtime errors are
            // absorbed and retried inside the loop.
            error!(error = %e, "supervisor exited with error");
            std::process::exit(1);
        }
    }
}
