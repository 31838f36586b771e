use appkit_bootstrap::DatabasesConfig;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database '{name}' is misconfigured: {source:#}")]
    Config {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("database '{name}' pool could not be created: {source}")]
    Pool {
        name: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("database '{0}' is not configured")]
    Unknown(String),
}

/// Named connection pools shared by the model, handlers and services.
///
/// Pools connect lazily, so opening never touches the network.
#[derive(Debug, Default)]
pub struct StoragePool {
    pools: BTreeMap<String, AnyPool>,
}

impl StoragePool {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn open(cfg: &DatabasesConfig) -> Result<Self, StorageError> {
        sqlx::any::install_default_drivers();

        let mut pools = BTreeMap::new();
        for (name, db) in cfg {
            let dsn = db.resolve_dsn().map_err(|source| StorageError::Config {
                name: name.clone(),
                source,
            })?;
            let pool = AnyPoolOptions::new()
                .max_connections(db.max_conns())
                .connect_lazy(&dsn)
                .map_err(|source| StorageError::Pool {
                    name: name.clone(),
                    source,
                })?;
            tracing::debug!(database = %name, max_conns = db.max_conns(), "pool created");
            pools.insert(name.clone(), pool);
        }
        Ok(Self { pools })
    }

    pub fn get(&self, name: &str) -> Option<&AnyPool> {
        self.pools.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&AnyPool, StorageError> {
        self.get(name)
            .ok_or_else(|| StorageError::Unknown(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub async fn close(&self) {
        for (name, pool) in &self.pools {
            pool.close().await;
            tracing::debug!(database = %name, "pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appkit_bootstrap::DatabaseConfig;

    fn sqlite_memory() -> DatabasesConfig {
        DatabasesConfig::from([(
            "main".to_string(),
            DatabaseConfig {
                dsn: Some("sqlite::memory:".into()),
                max_conns: Some(1),
                ..DatabaseConfig::default()
            },
        )])
    }

    #[tokio::test]
    async fn opens_named_pools() {
        let storage = StoragePool::open(&sqlite_memory()).unwrap();
        assert_eq!(storage.names().collect::<Vec<_>>(), vec!["main"]);

        let pool = storage.require("main").unwrap();
        let one: (i64,) = sqlx::query_as("SELECT 1").fetch_one(pool).await.unwrap();
        assert_eq!(one.0, 1);

        storage.close().await;
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn unknown_database_is_reported() {
        let storage = StoragePool::empty();
        assert!(matches!(storage.require("x"), Err(StorageError::Unknown(_))));
    }

    #[tokio::test]
    async fn unsupported_scheme_fails_to_open() {
        let cfg = DatabasesConfig::from([(
            "bad".to_string(),
            DatabaseConfig {
                dsn: Some("nosuchdb://localhost/x".into()),
                ..DatabaseConfig::default()
            },
        )]);
        assert!(matches!(
            StoragePool::open(&cfg),
            Err(StorageError::Pool { .. })
        ));
    }
}
