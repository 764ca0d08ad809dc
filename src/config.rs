use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Lifetimes of the one-time artefacts handed out by the onboarding workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingConfig {
    pub registration_ttl_seconds: i64,
    /// Extra time a staged entry stays in the cache after its logical expiry.
    pub staging_grace_seconds: i64,
    pub reset_ttl_seconds: i64,
    pub public_base_url: String,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            registration_ttl_seconds: 600,
            staging_grace_seconds: 60,
            reset_ttl_seconds: 600,
            public_base_url: "http://localhost:3000".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base the public object URLs are built from.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StagingBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub enum MailBackend {
    Smtp(SmtpConfig),
    Log,
}

/// Administrator account created at startup when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminSeed {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub onboarding: OnboardingConfig,
    pub s3: S3Config,
    pub staging: StagingBackend,
    pub mail: MailBackend,
    pub admin: Option<AdminSeed>,
    /// Seconds between sweeps of expired staging entries.
    pub staging_sweep_seconds: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET not set")?;
        let jwt = JwtConfig {
            refresh_secret: std::env::var("JWT_REFRESH_SECRET").unwrap_or_else(|_| secret.clone()),
            secret,
            issuer: env_or("JWT_ISSUER", "landregistry"),
            audience: env_or("JWT_AUDIENCE", "landregistry-users"),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 7),
        };

        let defaults = OnboardingConfig::default();
        let onboarding = OnboardingConfig {
            registration_ttl_seconds: env_parse(
                "REGISTRATION_TTL_SECONDS",
                defaults.registration_ttl_seconds,
            ),
            staging_grace_seconds: env_parse("STAGING_GRACE_SECONDS", defaults.staging_grace_seconds),
            reset_ttl_seconds: env_parse("RESET_TTL_SECONDS", defaults.reset_ttl_seconds),
            public_base_url: env_or("PUBLIC_BASE_URL", &defaults.public_base_url),
        };

        let endpoint = std::env::var("S3_ENDPOINT").context("S3_ENDPOINT not set")?;
        let bucket = std::env::var("S3_BUCKET").context("S3_BUCKET not set")?;
        let s3 = S3Config {
            public_url: std::env::var("S3_PUBLIC_URL")
                .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket)),
            endpoint,
            bucket,
            access_key: std::env::var("S3_ACCESS_KEY").context("S3_ACCESS_KEY not set")?,
            secret_key: std::env::var("S3_SECRET_KEY").context("S3_SECRET_KEY not set")?,
            region: env_or("S3_REGION", "us-east-1"),
        };

        let staging = match env_or("STAGING_BACKEND", "postgres").to_lowercase().as_str() {
            "postgres" => StagingBackend::Postgres,
            "memory" => StagingBackend::Memory,
            other => anyhow::bail!("invalid STAGING_BACKEND: {other} (use postgres or memory)"),
        };

        let mail = match env_or("MAIL_BACKEND", "smtp").to_lowercase().as_str() {
            "log" => MailBackend::Log,
            "smtp" => MailBackend::Smtp(SmtpConfig {
                host: std::env::var("SMTP_HOST").context("SMTP_HOST not set")?,
                port: env_parse("SMTP_PORT", 587),
                username: std::env::var("SMTP_USERNAME").context("SMTP_USERNAME not set")?,
                password: std::env::var("SMTP_PASSWORD").context("SMTP_PASSWORD not set")?,
                from: std::env::var("SMTP_FROM").context("SMTP_FROM not set")?,
            }),
            other => anyhow::bail!("invalid MAIL_BACKEND: {other} (use smtp or log)"),
        };

        let admin = match std::env::var("ADMIN_EMAIL") {
            Ok(email) if !email.trim().is_empty() => Some(AdminSeed {
                email,
                password: std::env::var("ADMIN_PASSWORD")
                    .context("ADMIN_PASSWORD not set while ADMIN_EMAIL is")?,
                first_name: env_or("ADMIN_FIRST_NAME", "Admin"),
                last_name: env_or("ADMIN_LAST_NAME", "User"),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            jwt,
            onboarding,
            s3,
            staging,
            mail,
            admin,
            staging_sweep_seconds: env_parse("STAGING_SWEEP_SECONDS", 300),
        })
    }
}
