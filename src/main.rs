use std::net::SocketAddr;
use std::time::SystemTime;
use wheelrange::engine::{self, Engine, EngineSettings};
use wheelrange::store::{FileStore, KeyValueStore, MemoryStore};
use wheelrange::{api, config, estimation};

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt().with_target(false).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        "wheelrange starting"
    );

    let config = match config::load_default() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            config::Config::fallback()
        }
    };
    if !config.engine_enabled() {
        tracing::warn!("Range engine disabled in configuration; samples will be ignored");
    }

    let store: Box<dyn KeyValueStore> = match config.persistence_path() {
        Some(path) => match FileStore::open(&path) {
            Ok(store) => {
                tracing::info!(path = %path.display(), "Persistence store opened");
                Box::new(store)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open store, running in-memory");
                Box::new(MemoryStore::new())
            }
        },
        None => {
            tracing::info!("No persistence path configured, running in-memory");
            Box::new(MemoryStore::new())
        }
    };

    let estimator = estimation::create_estimator(&config);
    tracing::info!(
        estimator = estimator.name(),
        cell_count = config.cell_count(),
        capacity_wh = config.capacity_wh(),
        "Estimation engine configured"
    );

    let mut engine = Engine::new(EngineSettings::from_config(&config), estimator, store);
    engine.restore_recovery(SystemTime::now());
    let (handle, engine_task) = engine::spawn(engine);

    let app = api::router(handle.clone());
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    let _ = handle.shutdown().await;
    let _ = engine_task.await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use wheelrange::config;

    #[test]
    fn default_config_is_valid_toml() -> Result<(), Box<dyn std::error::Error>> {
        let _config = config::load_default()?;
        Ok(())
    }
}
