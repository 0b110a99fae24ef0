use std::sync::Arc;

use roster::{DocumentStore, HmacSessions, MemoryStore, SessionVerifier};
use tracing::info;

use super::{
    config::{Config, StoreBackend},
    database::{RedisStore, init_redis},
    error::AppError,
    pages::Pages,
};

pub struct State {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub sessions: Arc<dyn SessionVerifier>,
    pub pages: Pages,
}

impl State {
    pub async fn new() -> Result<Arc<Self>, AppError> {
        let config = Config::load()?;

        let store: Arc<dyn DocumentStore> = match config.store_backend {
            StoreBackend::Redis => {
                info!("Connecting to Redis at {}", config.redis_url);
                let connection = init_redis(&config.redis_url)
                    .await
                    .map_err(|e| AppError::InternalError(Box::new(e)))?;
                Arc::new(RedisStore::new(connection))
            }
            StoreBackend::Memory => {
                info!("Using in-memory document store, rosters will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let sessions = HmacSessions::new(config.session_secret.as_bytes())
            .map_err(|e| AppError::Config(format!("session secret: {e}")))?;

        Ok(Self::from_parts(config, store, Arc::new(sessions)))
    }

    pub fn from_parts(
        config: Config,
        store: Arc<dyn DocumentStore>,
        sessions: Arc<dyn SessionVerifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            sessions,
            pages: Pages::default(),
        })
    }
}
