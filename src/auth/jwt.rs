use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use super::claims::{Claims, TokenKind};
use crate::config::JwtConfig;
use crate::users::User;

/// Holds JWT signing and verification keys with config data.
///
/// Access and refresh tokens are signed with different secrets.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Token pair handed to a client after login or verification.
#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_access: u64,
    pub expires_in_refresh: u64,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.ttl_minutes.max(1) as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes.max(1) as u64) * 60),
        }
    }

    fn sign_with_kind(&self, user: &User, kind: TokenKind) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let (ttl, key) = match kind {
            TokenKind::Access => (self.access_ttl, &self.access_encoding),
            TokenKind::Refresh => (self.refresh_ttl, &self.refresh_encoding),
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, key)?;
        debug!(user_id = %user.id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user: &User) -> anyhow::Result<String> {
        self.sign_with_kind(user, TokenKind::Access)
    }

    pub fn sign_refresh(&self, user: &User) -> anyhow::Result<String> {
        self.sign_with_kind(user, TokenKind::Refresh)
    }

    pub fn issue(&self, user: &User) -> anyhow::Result<AuthTokens> {
        Ok(AuthTokens {
            access_token: self.sign_access(user)?,
            refresh_token: self.sign_refresh(user)?,
            expires_in_access: self.access_ttl.as_secs(),
            expires_in_refresh: self.refresh_ttl.as_secs(),
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    /// Verifies an access token.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let data = decode::<Claims>(token, &self.access_decoding, &self.validation())?;
        if data.claims.kind != TokenKind::Access {
            anyhow::bail!("not an access token");
        }
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<Claims> {
        let data = decode::<Claims>(token, &self.refresh_decoding, &self.validation())?;
        if data.claims.kind != TokenKind::Refresh {
            anyhow::bail!("not a refresh token");
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
pub(crate) fn test_keys() -> JwtKeys {
    JwtKeys::from_config(&JwtConfig {
        secret: "dev-secret".into(),
        refresh_secret: "dev-refresh-secret".into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        ttl_minutes: 5,
        refresh_ttl_minutes: 60,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{Role, SellerKyc};
    use uuid::Uuid;

    fn user() -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            password_hash: None,
            first_name: "Ama".into(),
            last_name: "Mensah".into(),
            phone: None,
            role: Role::Buyer,
            is_active: true,
            pending_verification: false,
            kyc: SellerKyc::default(),
            reset_token: None,
            reset_expires_at: None,
            last_login_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn sign_and_verify_access_token() {
        let keys = test_keys();
        let u = user();
        let token = keys.sign_access(&u).expect("sign access");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, u.id);
        assert_eq!(claims.role, Role::Buyer);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn refresh_token_only_verifies_as_refresh() {
        let keys = test_keys();
        let tokens = keys.issue(&user()).expect("issue");
        assert!(keys.verify_refresh(&tokens.refresh_token).is_ok());
        assert!(keys.verify(&tokens.refresh_token).is_err());
        assert!(keys.verify_refresh(&tokens.access_token).is_err());
    }

    #[test]
    fn verify_rejects_wrong_issuer_or_audience() {
        let good = test_keys();
        let bad = JwtKeys::from_config(&JwtConfig {
            secret: "dev-secret".into(),
            refresh_secret: "dev-refresh-secret".into(),
            issuer: "bad-iss".into(),
            audience: "bad-aud".into(),
            ttl_minutes: 5,
            refresh_ttl_minutes: 60,
        });
        let token = good.sign_access(&user()).expect("sign access");
        assert!(bad.verify(&token).is_err());
    }
}
