#[macro_use]
extern crate tracing;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

use filament::auth::Validator;
use filament::config::Config;
use filament::controller::Controller;
use filament::events::Emitter;
use filament::hub::Hub;
use filament::scheduler::Scheduler;
use filament::store::Store;
use filament::{actions, logging, web};

/// How long graceful shutdown may take before the process is killed
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(StructOpt)]
#[structopt(name = env!("CARGO_PKG_NAME"), author, about)]
struct Opt {
    /// Path to the configuration file
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let config = match &opt.config {
        Some(path) => Config::read(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to read configuration: {}", error);
            std::process::exit(1);
        }
    };

    if let Err(error) = logging::init(&config.log_level, config.development) {
        eprintln!("failed to initialize logging: {}", error);
        std::process::exit(1);
    }

    let address = match config.listen_addr.parse::<SocketAddr>() {
        Ok(address) => address,
        Err(error) => fatal("invalid listen address", error),
    };

    // Open the state store
    let store = match Store::open(&config.database_path, config.strip_length).await {
        Ok(store) => store,
        Err(error) => fatal("failed to open database", error),
    };

    // Connect to the controller
    let controller = match Controller::connect(config.controller_addr.clone()).await {
        Ok(controller) => Arc::new(controller),
        Err(error) => fatal("failed to connect to the controller", error),
    };

    let shutdown = CancellationToken::new();

    // Start the action processor and the session hub
    let actions = actions::spawn_processor(store.clone(), controller, shutdown.child_token());
    let hub = Hub::new(shutdown.child_token());

    // Start the schedule engine and register the stored schedules
    let scheduler = match Scheduler::new(
        &config.timezone,
        store.clone(),
        actions.clone(),
        hub.clone(),
        shutdown.child_token(),
    ) {
        Ok(scheduler) => scheduler,
        Err(error) => fatal("failed to setup scheduler", error),
    };
    if let Err(error) = scheduler.load_from_store().await {
        fatal("failed to load existing schedules", error);
    }

    let emitter = Emitter::new();

    let validator = match Validator::new(&config.issuer_url) {
        Ok(validator) => Arc::new(validator),
        Err(error) => fatal("failed to initialize token validator", error),
    };

    let context = web::Context {
        store: store.clone(),
        actions,
        scheduler,
        emitter,
        hub,
        validator,
    };

    let serving = match web::bind(address, context, shutdown.child_token()).await {
        Ok(serving) => serving,
        Err(error) => fatal("failed to bind server", error),
    };

    // Trigger graceful shutdown on SIGINT/SIGTERM, with a hard deadline
    tokio::spawn(await_shutdown_signal(shutdown));

    serving.await;

    store.close().await;
    info!("shutdown complete. goodbye!");
}

async fn await_shutdown_signal(shutdown: CancellationToken) {
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(terminate) => terminate,
        Err(error) => {
            error!(%error, "failed to install signal handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }

    info!("shutdown signal received");
    shutdown.cancel();

    tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
    error!("graceful shutdown timed out... forcing exit");
    std::process::exit(1);
}

fn fatal(message: &str, error: impl std::fmt::Display) -> ! {
    error!(%error, "{}", message);
    std::process::exit(1);
}
