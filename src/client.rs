//! Meridian application handle
//!
//! Wires the registry, stores, queue, and runtimes together. The binary
//! builds one of these and hands it to the scheduler and workers; tests
//! build one against in-memory backends.

use chrono_tz::Tz;
use std::path::PathBuf;
use std::sync::Arc;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::oauth::TokenManager;
use crate::push::PushAdapter;
use crate::registry::{load_registry, Registry};
use crate::scheduler::queue::{TaskQueue, DEFAULT_QUEUE};
use crate::segmenter::SegmenterConfig;
use crate::storage::Storage;
use crate::sync::SyncRuntime;

/// Runtime tuning not owned by the registry.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub default_tz: Tz,
    pub segmenter: SegmenterConfig,
    /// Audit rows older than this are pruned daily
    pub audit_retention_days: i64,
    /// Raw objects older than this are pruned daily
    pub raw_retention_days: i64,
    /// Worker pool size
    pub worker_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_tz: chrono_tz::UTC,
            segmenter: SegmenterConfig::default(),
            audit_retention_days: 30,
            raw_retention_days: 90,
            worker_concurrency: 4,
        }
    }
}

/// The assembled pipeline.
pub struct Meridian {
    pub db: Database,
    pub storage: Storage,
    pub registry: Arc<Registry>,
    pub queue: TaskQueue,
    pub tokens: Arc<TokenManager>,
    pub sync: SyncRuntime,
    pub push: PushAdapter,
    pub config: AppConfig,
}

impl Meridian {
    pub fn builder() -> MeridianBuilder {
        MeridianBuilder::default()
    }
}

/// Builder assembling a [`Meridian`] from the environment.
#[derive(Default)]
pub struct MeridianBuilder {
    database_url: Option<String>,
    redis_url: Option<String>,
    sources_dir: Option<PathBuf>,
    config: Option<AppConfig>,
}

impl MeridianBuilder {
    pub fn database_url(mut self, url: &str) -> Self {
        self.database_url = Some(url.to_string());
        self
    }

    pub fn redis_url(mut self, url: &str) -> Self {
        self.redis_url = Some(url.to_string());
        self
    }

    pub fn sources_dir(mut self, dir: PathBuf) -> Self {
        self.sources_dir = Some(dir);
        self
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build against the environment: `DATABASE_URL`, `REDIS_URL`,
    /// `S3_*`, `MERIDIAN_SOURCES_DIR`, `DEFAULT_TIMEZONE`.
    pub async fn build(self) -> Result<Meridian> {
        let database_url = self
            .database_url
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| Error::Configuration("DATABASE_URL not set".into()))?;
        let redis_url = self
            .redis_url
            .or_else(|| std::env::var("REDIS_URL").ok())
            .ok_or_else(|| Error::Configuration("REDIS_URL not set".into()))?;
        let sources_dir = self
            .sources_dir
            .or_else(|| std::env::var("MERIDIAN_SOURCES_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("sources"));

        let mut config = self.config.unwrap_or_default();
        if let Ok(tz) = std::env::var("DEFAULT_TIMEZONE") {
            config.default_tz = tz
                .parse()
                .map_err(|_| Error::Configuration(format!("unknown timezone '{tz}'")))?;
        }

        let registry = Arc::new(load_registry(&sources_dir)?);
        registry.validate(
            &|key| crate::sources::processor_for(key).is_some(),
            &|key| crate::sources::syncer_for(key).is_some(),
        )?;

        let db = Database::new(&database_url)?;
        db.initialize().await?;

        let storage = Storage::s3_from_env().await?;
        let queue = TaskQueue::connect(&redis_url, DEFAULT_QUEUE).await?;
        let tokens = Arc::new(TokenManager::new(db.pool().clone()));

        let sync = SyncRuntime::new(
            db.pool().clone(),
            storage.clone(),
            registry.clone(),
            tokens.clone(),
        );
        let push = PushAdapter::new(
            db.pool().clone(),
            storage.clone(),
            registry.clone(),
            queue.clone(),
        );

        tracing::info!("Meridian assembled");

        Ok(Meridian {
            db,
            storage,
            registry,
            queue,
            tokens,
            sync,
            push,
            config,
        })
    }
}
