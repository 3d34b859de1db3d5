//! Policy kernel server.
//!
//! ```text
//!   proxy transport ──JSON lines──► net (listener, codec)
//!                                       │
//!                                       ▼
//!                              extproc::StreamProcessor ──► routing::RouteTable
//!                                       │
//!                                       ▼
//!                              engine::ExecutionContext ──► policies
//!
//!   config file ──► config::ConfigLoader ──► RouteTable (atomic swap)
//! ```

use std::path::PathBuf;

use clap::Parser;

use policy_kernel::config::watcher::ConfigWatcher;
use policy_kernel::config::{load_config, KernelConfig};
use policy_kernel::lifecycle::signals::wait_for_signal;
use policy_kernel::observability::{logging::init_logging, metrics::init_metrics};
use policy_kernel::{Kernel, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "policy-kernel", version, about = "Gateway policy-execution kernel")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload routes when the configuration file changes.
    #[arg(short, long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => KernelConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "policy-kernel starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let kernel = Kernel::with_builtins();
    kernel.apply(&config.routes)?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        routes = kernel.routes().len(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();

    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            kernel.spawn_reloader(updates, &shutdown);
            Some(handle)
        }
        _ => None,
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    kernel.serve(&config, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
