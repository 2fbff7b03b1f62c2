use crate::config::{Settings, StoreBackend};
use crate::infrastructure::store::StoreConnector;
use crate::infrastructure::{MemoryStore, PostgresStore};
use crate::proxy::ProxyService;
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument};

/// Main application struct that coordinates all components
pub struct Application {
    settings: Settings,
    router: axum::Router,
}

impl Application {
    #[instrument(skip(settings))]
    pub async fn new(settings: Settings) -> Result<Self> {
        let proxy_config = settings.proxy_config()?;
        let connector = connect_store(&settings).await?;

        for rule in &proxy_config.routes {
            info!(from = %rule.from, to = %rule.to, "Route configured");
        }
        if let Some(target) = &proxy_config.default_target {
            info!(to = %target, "Default target configured");
        }

        let router = ProxyService::new(proxy_config, connector)?.into_router();

        Ok(Self { settings, router })
    }

    /// Binds the configured address and serves until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.settings.listen_addr()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    #[instrument(skip_all)]
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %listener.local_addr()?, "Replay Cache listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped");
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

async fn connect_store(settings: &Settings) -> Result<Arc<dyn StoreConnector>> {
    match settings.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store; cached responses are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let store =
                PostgresStore::open(settings.store_url()?, settings.store.max_connections).await?;
            store.health_check().await?;
            Ok(Arc::new(store))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
