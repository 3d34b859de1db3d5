//! Kernel assembly.
//!
//! # Responsibilities
//! - Own the route table, policy registry and config loader
//! - Hand streams to the [`StreamProcessor`]
//! - Start the TCP transport, the admin API and the reload task
//!
//! # Data Flow
//! ```text
//! PolicyRegistry ──► ConfigLoader ──► RouteTable ◄── StreamProcessor ◄── streams
//!                         ▲
//!           ConfigWatcher ┘ (--watch)
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::admin::{serve_admin, AdminState};
use crate::config::{ConfigError, ConfigLoader, KernelConfig, RouteConfig};
use crate::engine::executor::ChainExecutor;
use crate::engine::translator::ActionTranslator;
use crate::extproc::processor::{StreamError, StreamProcessor};
use crate::extproc::transport::ProcessingStream;
use crate::lifecycle::Shutdown;
use crate::net::connection::StreamTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::net::server::ProcessingServer;
use crate::policy::builtin::register_builtins;
use crate::policy::registry::PolicyRegistry;
use crate::routing::RouteTable;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("admin API: {0}")]
    Admin(#[source] std::io::Error),
}

pub struct Kernel {
    routes: Arc<RouteTable>,
    loader: ConfigLoader,
    processor: StreamProcessor,
    tracker: StreamTracker,
}

impl Kernel {
    pub fn new(registry: PolicyRegistry) -> Self {
        let routes = Arc::new(RouteTable::new());
        Self {
            loader: ConfigLoader::new(Arc::new(registry), Arc::clone(&routes)),
            processor: StreamProcessor::new(Arc::clone(&routes)),
            routes,
            tracker: StreamTracker::new(),
        }
    }

    /// Kernel with the builtin policies registered.
    pub fn with_builtins() -> Self {
        let mut registry = PolicyRegistry::new();
        register_builtins(&mut registry);
        Self::new(registry)
    }

    pub fn with_executor(mut self, executor: Arc<dyn ChainExecutor>) -> Self {
        self.processor = self.processor.with_executor(executor);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn ActionTranslator>) -> Self {
        self.processor = self.processor.with_translator(translator);
        self
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        self.loader.registry()
    }

    pub fn loader(&self) -> &ConfigLoader {
        &self.loader
    }

    pub fn processor(&self) -> &StreamProcessor {
        &self.processor
    }

    pub fn tracker(&self) -> &StreamTracker {
        &self.tracker
    }

    pub fn apply(&self, routes: &[RouteConfig]) -> Result<usize, ConfigError> {
        self.loader.apply(routes)
    }

    pub fn load_file(&self, path: &Path) -> Result<KernelConfig, ConfigError> {
        self.loader.load_file(path)
    }

    /// Run a single stream to completion.
    pub async fn process<S>(&self, stream: &mut S) -> Result<(), StreamError>
    where
        S: ProcessingStream + ?Sized,
    {
        let _guard = self.tracker.track();
        self.processor.process(stream).await
    }

    /// Apply every config received on `updates` until shutdown.
    pub fn spawn_reloader(&self, mut updates: mpsc::UnboundedReceiver<KernelConfig>, shutdown: &Shutdown) -> JoinHandle<()> {
        let loader = self.loader.clone();
        let mut stop = shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    update = updates.recv() => match update {
                        Some(config) => {
                            // Failures are logged by the loader; the active table stays.
                            let _ = loader.apply(&config.routes);
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("Config reloader stopped");
        })
    }

    /// Serve the TCP transport (and the admin API if enabled) until shutdown,
    /// then wait for open streams to drain.
    pub async fn serve(&self, config: &KernelConfig, shutdown: &Shutdown) -> Result<(), KernelError> {
        let listener = Listener::bind(&config.listener).await?;

        let admin = if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address)
                .await
                .map_err(KernelError::Admin)?;
            let state = AdminState::new(Arc::clone(&self.routes), self.tracker.clone(), &config.admin.api_key);
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = serve_admin(admin_listener, state, &shutdown).await {
                    tracing::error!(error = %e, "Admin API failed");
                }
            }))
        } else {
            None
        };

        let server = ProcessingServer::new(self.processor.clone())
            .with_tracker(self.tracker.clone())
            .with_max_frame_bytes(config.listener.max_frame_bytes);
        server.run(listener, shutdown).await?;

        if !self.tracker.wait_for_drain(DRAIN_TIMEOUT).await {
            tracing::warn!(open_streams = self.tracker.active_count(), "Drain deadline reached");
        }
        if let Some(handle) = admin {
            let _ = handle.await;
        }
        Ok(())
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::with_builtins()
    }
}
