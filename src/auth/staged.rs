use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::documents::StoredObject;
use crate::users::{NewUser, Role, SellerKyc};

/// Registration data waiting for email verification. Lives only in the staging store,
/// keyed by email, alongside a `token -> email` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedRegistration {
    pub email: String,
    pub verification_token: String,
    pub hashed_otp: String,
    pub hashed_password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub kyc: SellerKyc,
    /// Identity documents uploaded for this registration.
    pub documents: Vec<StoredObject>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl StagedRegistration {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn document_keys(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.key.clone()).collect()
    }

    /// Durable row this registration commits to. Sellers start inactive and pending review.
    pub fn into_new_user(self, id: Uuid, now: OffsetDateTime) -> NewUser {
        let is_seller = self.role == Role::Seller;
        NewUser {
            id,
            email: self.email,
            password_hash: Some(self.hashed_password),
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            role: self.role,
            is_active: !is_seller,
            pending_verification: is_seller,
            kyc: if is_seller { self.kyc } else { SellerKyc::default() },
            created_at: now,
        }
    }
}
