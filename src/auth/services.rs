use std::sync::Arc;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{AuthSession, PublicUser, RegisterInput, RegistrationPending};
use super::jwt::{AuthTokens, JwtKeys};
use super::password::{generate_otp, Hasher, MIN_PASSWORD_LEN};
use super::staged::StagedRegistration;
use crate::clock::Clock;
use crate::config::{AdminSeed, OnboardingConfig};
use crate::documents::{self, DocumentKind, UploadedBatch};
use crate::error::{AppError, AppResult, RepoError};
use crate::mailer::{templates, Mailer};
use crate::staging::{registration_key, revoked_key, token_key, StagingStore};
use crate::state::Backends;
use crate::storage::StorageClient;
use crate::users::{NewUser, Role, SellerKyc, User, UserRepo};

const MAX_IDENTITY_DOCUMENTS: usize = 3;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Staged registration, verification, sign-in and password recovery.
///
/// Every collaborator is injected; nothing here reaches for a global client.
#[derive(Clone)]
pub struct OnboardingService {
    users: Arc<dyn UserRepo>,
    staging: Arc<dyn StagingStore>,
    storage: Arc<dyn StorageClient>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    keys: Arc<JwtKeys>,
    hasher: Hasher,
    cfg: OnboardingConfig,
}

impl OnboardingService {
    pub fn new(
        backends: &Backends,
        keys: Arc<JwtKeys>,
        hasher: Hasher,
        cfg: OnboardingConfig,
    ) -> Self {
        Self {
            users: backends.users.clone(),
            staging: backends.staging.clone(),
            storage: backends.storage.clone(),
            mailer: backends.mailer.clone(),
            clock: backends.clock.clone(),
            keys,
            hasher,
            cfg,
        }
    }

    fn registration_ttl(&self) -> Duration {
        Duration::seconds(self.cfg.registration_ttl_seconds)
    }

    /// How long staged entries stay in the cache. Longer than the logical lifetime so
    /// an expired registration can still be found and cleaned up.
    fn cache_ttl(&self) -> Duration {
        Duration::seconds(self.cfg.registration_ttl_seconds + self.cfg.staging_grace_seconds.max(0))
    }

    async fn forget_keys(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.staging.delete(key).await {
                warn!(error = %e, key = %key, "staging cleanup failed");
            }
        }
    }

    /// Removes every side effect of a staged registration.
    async fn purge(&self, staged: &StagedRegistration) {
        self.forget_keys(&[
            registration_key(&staged.email),
            token_key(&staged.verification_token),
        ])
        .await;
        documents::discard(self.storage.as_ref(), &staged.document_keys()).await;
    }

    async fn load_staged(&self, email: &str) -> AppResult<Option<StagedRegistration>> {
        let Some(raw) = self.staging.get(&registration_key(email)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<StagedRegistration>(&raw) {
            Ok(staged) => Ok(Some(staged)),
            Err(e) => {
                error!(error = %e, email = %email, "unreadable staged registration dropped");
                self.forget_keys(&[registration_key(email)]).await;
                Ok(None)
            }
        }
    }

    fn validate(&self, input: &RegisterInput) -> AppResult<()> {
        if !is_valid_email(&input.email) {
            return Err(AppError::validation("Invalid email"));
        }
        if input.password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if input.first_name.trim().is_empty() || input.last_name.trim().is_empty() {
            return Err(AppError::validation("First and last name are required"));
        }
        if input.role == Role::Admin {
            return Err(AppError::validation("Invalid role"));
        }
        if input.documents.len() > MAX_IDENTITY_DOCUMENTS
            || input.documents.iter().any(|d| {
                !matches!(
                    d.kind,
                    DocumentKind::Selfie | DocumentKind::IdFront | DocumentKind::IdBack
                )
            })
        {
            return Err(AppError::validation("Unsupported identity documents"));
        }
        Ok(())
    }

    /// Stages a registration and mails the verification link.
    ///
    /// Uploaded documents and cache entries written by this call are removed again when a
    /// later step fails.
    #[instrument(skip(self, input), fields(email = %input.email, role = %input.role))]
    pub async fn register(&self, mut input: RegisterInput) -> AppResult<RegistrationPending> {
        input.email = normalize_email(&input.email);
        self.validate(&input)?;
        let email = input.email.clone();

        if self.users.find_by_email(&email).await?.is_some() {
            warn!("email already registered");
            return Err(AppError::conflict("Email already registered"));
        }

        if let Some(previous) = self.load_staged(&email).await? {
            if !previous.is_expired(self.clock.now()) {
                warn!("registration already pending verification");
                return Err(AppError::conflict(
                    "Registration already pending; request a new verification email instead",
                ));
            }
            info!("reclaiming expired staged registration");
            self.purge(&previous).await;
        }

        let token = Uuid::new_v4().to_string();
        let otp = generate_otp();
        let hashed_otp = self.hasher.hash(&otp)?;
        let hashed_password = self.hasher.hash(&input.password)?;

        let is_seller = input.role == Role::Seller;
        let uploads = if is_seller && !input.documents.is_empty() {
            documents::upload_all(self.storage.as_ref(), &email, input.documents).await?
        } else {
            UploadedBatch::default()
        };

        let kyc = if is_seller {
            let url_of = |kind| uploads.get(kind).map(|o| o.url.clone());
            SellerKyc {
                selfie_url: url_of(DocumentKind::Selfie),
                id_front_url: url_of(DocumentKind::IdFront),
                id_back_url: url_of(DocumentKind::IdBack),
                ..input.kyc
            }
        } else {
            SellerKyc::default()
        };

        let staged = StagedRegistration {
            email: email.clone(),
            verification_token: token.clone(),
            hashed_otp,
            hashed_password,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            phone: input.phone,
            role: input.role,
            kyc,
            documents: uploads.into_objects(),
            expires_at: self.clock.now() + self.registration_ttl(),
        };
        let doc_keys = staged.document_keys();
        let reg_key = registration_key(&email);
        let tok_key = token_key(&token);

        let payload = match serde_json::to_string(&staged) {
            Ok(p) => p,
            Err(e) => {
                documents::discard(self.storage.as_ref(), &doc_keys).await;
                return Err(anyhow::Error::new(e).context("serialize staged registration").into());
            }
        };

        match self.staging.put_if_vacant(&reg_key, &payload, self.cache_ttl()).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("concurrent registration won the staging slot");
                documents::discard(self.storage.as_ref(), &doc_keys).await;
                return Err(AppError::conflict(
                    "Registration already pending; request a new verification email instead",
                ));
            }
            Err(e) => {
                error!(error = %e, "staging registration failed");
                documents::discard(self.storage.as_ref(), &doc_keys).await;
                return Err(e.into());
            }
        }

        if let Err(e) = self.staging.put(&tok_key, &email, self.cache_ttl()).await {
            error!(error = %e, "staging token mapping failed");
            self.purge(&staged).await;
            return Err(e.into());
        }

        let mail = templates::verification(
            &self.cfg.public_base_url,
            &email,
            &staged.first_name,
            &token,
            &otp,
        );
        if let Err(e) = self.mailer.send(mail).await {
            error!(error = %e, "verification email failed; rolling back registration");
            self.purge(&staged).await;
            return Err(AppError::Dependency(e.context("send verification email")));
        }

        info!("registration staged");
        Ok(RegistrationPending {
            email,
            expires_at: staged.expires_at,
        })
    }

    /// Commits the staged registration behind `token` as a durable user.
    #[instrument(skip(self, token))]
    pub async fn verify_email(&self, token: &str) -> AppResult<AuthSession> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::validation("Verification token is required"));
        }
        let tok_key = token_key(token);

        let Some(email) = self.staging.get(&tok_key).await? else {
            warn!("unknown or expired verification token");
            return Err(AppError::not_found("Invalid or expired verification token"));
        };

        let Some(staged) = self.load_staged(&email).await? else {
            warn!(email = %email, "token points at a missing registration");
            self.forget_keys(&[tok_key]).await;
            return Err(AppError::not_found("Invalid or expired verification token"));
        };

        if staged.verification_token != token {
            // Superseded link for a registration that has since been re-staged.
            self.forget_keys(&[tok_key]).await;
            return Err(AppError::not_found("Invalid or expired verification token"));
        }

        if staged.is_expired(self.clock.now()) {
            warn!(email = %email, "verification token expired");
            self.purge(&staged).await;
            return Err(AppError::expired("Verification token has expired"));
        }

        if self.users.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email committed by a concurrent registration");
            self.purge(&staged).await;
            return Err(AppError::conflict("Email already registered"));
        }

        let new_user = staged.clone().into_new_user(Uuid::new_v4(), self.clock.now());
        let user = match self.users.insert(new_user).await {
            Ok(u) => u,
            Err(RepoError::AlreadyExists) => {
                self.purge(&staged).await;
                return Err(AppError::conflict("Email already registered"));
            }
            Err(e) => {
                error!(error = %e, email = %email, "user insert failed");
                self.purge(&staged).await;
                return Err(e.into());
            }
        };

        self.forget_keys(&[registration_key(&email), tok_key]).await;
        let tokens = self.keys.issue(&user)?;
        info!(user_id = %user.id, role = %user.role, "email verified, user created");
        Ok(AuthSession {
            user: PublicUser::from(&user),
            tokens,
        })
    }

    /// Rotates the token and code of a live staged registration and mails them again.
    #[instrument(skip(self))]
    pub async fn resend_verification(&self, email: &str) -> AppResult<RegistrationPending> {
        let email = normalize_email(email);
        let Some(mut staged) = self.load_staged(&email).await? else {
            return Err(AppError::not_found("No pending registration for this email"));
        };
        if staged.is_expired(self.clock.now()) {
            self.purge(&staged).await;
            return Err(AppError::expired("Registration has expired; please register again"));
        }

        let old_token = std::mem::replace(&mut staged.verification_token, Uuid::new_v4().to_string());
        let otp = generate_otp();
        staged.hashed_otp = self.hasher.hash(&otp)?;
        staged.expires_at = self.clock.now() + self.registration_ttl();

        let payload = serde_json::to_string(&staged).context("serialize staged registration")?;
        self.staging
            .put(&registration_key(&email), &payload, self.cache_ttl())
            .await?;
        self.staging
            .put(&token_key(&staged.verification_token), &email, self.cache_ttl())
            .await?;
        self.forget_keys(&[token_key(&old_token)]).await;

        let mail = templates::verification_resent(
            &self.cfg.public_base_url,
            &email,
            &staged.first_name,
            &staged.verification_token,
            &otp,
        );
        self.mailer
            .send(mail)
            .await
            .map_err(|e| AppError::Dependency(e.context("resend verification email")))?;

        info!(email = %email, "verification email resent");
        Ok(RegistrationPending {
            email,
            expires_at: staged.expires_at,
        })
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!(email = %email, "login unknown email");
            return Err(AppError::not_found("User not found"));
        };

        let matches = match &user.password_hash {
            Some(hash) => self.hasher.verify(password, hash)?,
            None => false,
        };
        if !matches {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::unauthorized("Invalid credentials"));
        }
        if !user.is_active {
            warn!(user_id = %user.id, "login on inactive account");
            return Err(AppError::unauthorized(
                "Account is not active. Please contact support.",
            ));
        }

        let tokens = self.keys.issue(&user)?;
        if let Err(e) = self.users.record_login(user.id, self.clock.now()).await {
            warn!(error = %e, user_id = %user.id, "recording last login failed");
        }
        info!(user_id = %user.id, "user logged in");
        Ok(AuthSession {
            user: PublicUser::from(&user),
            tokens,
        })
    }

    /// Issues a new access token; the refresh token is handed back unchanged.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<AuthTokens> {
        if refresh_token.is_empty() {
            return Err(AppError::unauthorized("Refresh token is required"));
        }
        if self.staging.get(&revoked_key(refresh_token)).await?.is_some() {
            warn!("revoked refresh token presented");
            return Err(AppError::unauthorized("Invalid refresh token"));
        }
        let claims = self
            .keys
            .verify_refresh(refresh_token)
            .map_err(|_| AppError::unauthorized("Invalid refresh token"))?;

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::unauthorized("User not found or inactive"))?;

        Ok(AuthTokens {
            access_token: self.keys.sign_access(&user)?,
            refresh_token: refresh_token.to_string(),
            expires_in_access: self.keys.access_ttl.as_secs(),
            expires_in_refresh: self.keys.refresh_ttl.as_secs(),
        })
    }

    /// Blacklists a refresh token until it would have expired anyway.
    #[instrument(skip(self, refresh_token))]
    pub async fn logout(&self, refresh_token: &str) -> AppResult<()> {
        if refresh_token.is_empty() {
            return Err(AppError::unauthorized("Refresh token is required"));
        }
        let Ok(claims) = self.keys.verify_refresh(refresh_token) else {
            info!("logout with unverifiable token");
            return Ok(());
        };
        let remaining = claims.exp as i64 - self.clock.now().unix_timestamp();
        if remaining > 0 {
            if let Err(e) = self
                .staging
                .put(&revoked_key(refresh_token), "1", Duration::seconds(remaining))
                .await
            {
                warn!(error = %e, user_id = %claims.sub, "refresh token blacklist write failed");
            }
        }
        info!(user_id = %claims.sub, "user logged out");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> AppResult<()> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            return Err(AppError::not_found("User not found"));
        };

        let token = Uuid::new_v4().to_string();
        let expires_at = self.clock.now() + Duration::seconds(self.cfg.reset_ttl_seconds);
        self.users.set_reset_token(user.id, &token, expires_at).await?;

        let mail = templates::password_reset(
            &self.cfg.public_base_url,
            &user.email,
            &user.display_name(),
            &token,
        );
        self.mailer
            .send(mail)
            .await
            .map_err(|e| AppError::Dependency(e.context("send password reset email")))?;
        info!(user_id = %user.id, "password reset email sent");
        Ok(())
    }

    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AppResult<()> {
        if token.is_empty() || new_password.is_empty() {
            return Err(AppError::validation("Token and new password are required"));
        }
        let Some(user) = self.users.find_by_reset_token(token).await? else {
            return Err(AppError::not_found("Invalid or expired reset token"));
        };

        let now = self.clock.now();
        if user.reset_expires_at.map(|e| e <= now).unwrap_or(true) {
            self.users.clear_reset_token(user.id).await?;
            return Err(AppError::expired("Reset token has expired"));
        }
        if new_password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let hash = self.hasher.hash(new_password)?;
        if !self.users.complete_reset(token, &hash, now).await? {
            return Err(AppError::expired("Reset token has expired"));
        }
        info!(user_id = %user.id, "password reset");
        Ok(())
    }

    /// Creates the configured administrator unless the email is already taken.
    /// Returns whether an account was created.
    #[instrument(skip(self, seed), fields(email = %seed.email))]
    pub async fn ensure_admin(&self, seed: &AdminSeed) -> AppResult<bool> {
        let email = normalize_email(&seed.email);
        if !is_valid_email(&email) {
            return Err(AppError::validation("Invalid admin email"));
        }
        if seed.password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Admin password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if let Some(existing) = self.users.find_by_email(&email).await? {
            if existing.role != Role::Admin {
                warn!(user_id = %existing.id, "admin email belongs to a non-admin account");
            }
            return Ok(false);
        }

        let admin = NewUser {
            id: Uuid::new_v4(),
            email,
            password_hash: Some(self.hasher.hash(&seed.password)?),
            first_name: seed.first_name.clone(),
            last_name: seed.last_name.clone(),
            phone: None,
            role: Role::Admin,
            is_active: true,
            pending_verification: false,
            kyc: SellerKyc::default(),
            created_at: self.clock.now(),
        };
        match self.users.insert(admin).await {
            Ok(user) => {
                info!(user_id = %user.id, "admin account seeded");
                Ok(true)
            }
            Err(RepoError::AlreadyExists) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Activates a seller whose identity documents have been reviewed.
    #[instrument(skip(self))]
    pub async fn activate_seller(&self, seller_id: Uuid, admin_id: Uuid) -> AppResult<PublicUser> {
        let admin = self.users.find_by_id(admin_id).await?;
        if !matches!(&admin, Some(a) if a.role == Role::Admin && a.is_active) {
            warn!(user_id = %admin_id, "non-admin tried to activate a seller");
            return Err(AppError::unauthorized("Only admins can activate sellers"));
        }
        let seller = self
            .users
            .activate_seller(seller_id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("Seller not found"))?;
        info!(seller_id = %seller.id, admin_id = %admin_id, "seller activated");
        Ok(PublicUser::from(&seller))
    }

    pub async fn me(&self, user_id: Uuid) -> AppResult<PublicUser> {
        let user: User = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;
        Ok(PublicUser::from(&user))
    }
}
