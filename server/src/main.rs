use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::io;
use std::sync::Arc;
use strapre_sw::cache_store::CacheStore;
use strapre_sw::cache_store::local::LocalCacheStore;
use strapre_sw::cache_store::memory::MemoryCacheStore;
use strapre_sw::cache_store::sqlite::SqliteCacheStore;
use strapre_sw::config::{Config, StoreKind};
use strapre_sw::fetcher::{Fetcher, HttpFetcher};
use strapre_sw::{HostState, Registration, ShellWorker, WorkerError, server};
use tower::Service;
use tracing::{debug, error, info, warn};

const USER_AGENT: &str = concat!("strapre-sw/", env!("CARGO_PKG_VERSION"));

fn build_store(config: &Config) -> Result<Arc<dyn CacheStore>, WorkerError> {
    // STRAPRE_STORAGE_DIR structure:
    //   - generations/ (one .swc file per cache generation, local store)
    //   - cache.db (SQLite database, sqlite store)
    let store: Arc<dyn CacheStore> = match config.store {
        StoreKind::Memory => Arc::new(MemoryCacheStore::new()),
        StoreKind::Local => Arc::new(LocalCacheStore::new(config.storage_dir.join("generations"))?),
        StoreKind::Sqlite => {
            std::fs::create_dir_all(&config.storage_dir).map_err(|e| {
                WorkerError::Config(format!("creating {}: {}", config.storage_dir.display(), e))
            })?;
            Arc::new(SqliteCacheStore::new(config.storage_dir.join("cache.db"))?)
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,strapre_sw=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let store = match build_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize cache store: {}", e);
            std::process::exit(1);
        }
    };

    let fetcher: Arc<dyn Fetcher> = match HttpFetcher::new(config.policy.fetch_timeout, Some(USER_AGENT)) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let registration =
        Registration::new(config.origin.as_str(), fetcher.clone()).with_fetch_timeout(config.policy.fetch_timeout);
    let worker = ShellWorker::new(
        config.cache_version.clone(),
        config.origin.clone(),
        config.manifest.clone(),
        store.clone(),
        fetcher,
    )
    .with_policy(config.policy);

    // A failed install leaves requests passing straight through; the next start retries
    match registration.start(worker).await {
        Ok(id) => info!("Worker {} is active ({})", config.cache_version, id),
        Err(e) => error!("Worker {} failed to install: {}", config.cache_version, e),
    }

    let state = Arc::new(HostState::new(registration, config.origin.clone()));
    let app = server::create_app(state);

    let listener = match tokio::net::TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.listen, e);
            std::process::exit(1);
        }
    };
    info!(
        "Strapre shell cache listening on http://{} in front of {} (store: {})",
        config.listen,
        config.origin,
        store.storage_type()
    );

    // Use hyper's auto-negotiating server to support both HTTP/1.1 and HTTP/2
    let conn_builder = ConnBuilder::new(hyper_util::rt::TokioExecutor::new());

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        debug!("New connection from: {}", addr);
        let io = TokioIo::new(stream);
        let app_clone = app.clone();
        let conn_builder = conn_builder.clone();

        tokio::spawn(async move {
            if let Err(err) = conn_builder
                .serve_connection(
                    io,
                    hyper::service::service_fn(move |req| app_clone.clone().call(req)),
                )
                .await
            {
                // Check if the error is an io::Error indicating a normal close
                let is_normal_close = err
                    .source()
                    .and_then(|e| e.downcast_ref::<io::Error>())
                    .map(|io_err| {
                        matches!(
                            io_err.kind(),
                            io::ErrorKind::ConnectionReset
                                | io::ErrorKind::BrokenPipe
                                | io::ErrorKind::UnexpectedEof
                        )
                    })
                    .unwrap_or(false);

                if is_normal_close {
                    debug!("Connection from {} closed normally", addr);
                } else {
                    error!("Error serving connection from {}: {}", addr, err);
                }
            } else {
                debug!("Connection from {} completed successfully", addr);
            }
        });
    }
}
