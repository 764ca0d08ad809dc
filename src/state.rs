use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::PgPool;
use tracing::info;

use crate::auth::{Hasher, JwtKeys, OnboardingService};
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, MailBackend, StagingBackend};
use crate::mailer::{LogMailer, Mailer, SmtpMailer};
use crate::properties::{PgPropertyRepo, PropertyRepo, PropertyService};
use crate::staging::{spawn_sweeper, MemoryStagingStore, PgStagingStore, StagingStore};
use crate::storage::{S3Storage, StorageClient};
use crate::users::{PgUserRepo, UserRepo};

/// External collaborators the workflows are built from.
#[derive(Clone)]
pub struct Backends {
    pub users: Arc<dyn UserRepo>,
    pub properties: Arc<dyn PropertyRepo>,
    pub staging: Arc<dyn StagingStore>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    pub async fn connect(db: PgPool, config: &AppConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let staging: Arc<dyn StagingStore> = match config.staging {
            StagingBackend::Postgres => Arc::new(PgStagingStore::new(db.clone())),
            StagingBackend::Memory => Arc::new(MemoryStagingStore::new(clock.clone())),
        };

        let mailer: Arc<dyn Mailer> = match &config.mail {
            MailBackend::Smtp(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            MailBackend::Log => Arc::new(LogMailer),
        };

        let storage = Arc::new(S3Storage::new(&config.s3).await?) as Arc<dyn StorageClient>;

        info!(staging = ?config.staging, "backends ready");
        Ok(Self {
            users: Arc::new(PgUserRepo::new(db.clone())),
            properties: Arc::new(PgPropertyRepo::new(db)),
            staging,
            storage,
            mailer,
            clock,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub keys: Arc<JwtKeys>,
    pub onboarding: OnboardingService,
    pub properties: PropertyService,
}

impl FromRef<AppState> for Arc<JwtKeys> {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        // Run migrations if present
        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let backends = Backends::connect(db, &config).await?;
        spawn_sweeper(
            backends.staging.clone(),
            std::time::Duration::from_secs(config.staging_sweep_seconds.max(1)),
        );

        let state = Self::from_parts(Arc::new(config), &backends, Hasher::default());
        if let Some(seed) = &state.config.admin {
            state
                .onboarding
                .ensure_admin(seed)
                .await
                .context("seeding admin account")?;
        }
        Ok(state)
    }

    pub fn from_parts(config: Arc<AppConfig>, backends: &Backends, hasher: Hasher) -> Self {
        let keys = Arc::new(JwtKeys::from_config(&config.jwt));
        Self {
            onboarding: OnboardingService::new(
                backends,
                keys.clone(),
                hasher,
                config.onboarding.clone(),
            ),
            properties: PropertyService::new(backends),
            keys,
            config,
        }
    }
}
