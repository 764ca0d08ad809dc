//! Two-step transfer approval: resolve the proposed owner to an account, then move the
//! property to it.

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::repo::PropertyRepo;
use super::repo_types::{Property, ProposedOwner};
use crate::error::{AppError, AppResult, RepoError};
use crate::users::{NewUser, Role, SellerKyc, User, UserRepo};

/// How the incoming owner was matched to an account.
#[derive(Debug, Clone)]
pub enum OwnerResolution {
    /// An account with the proposed email already existed.
    Existing(User),
    /// A placeholder account was created: seller role, no password, inactive. The
    /// person has to go through password recovery before they can sign in.
    Provisioned(User),
}

impl OwnerResolution {
    pub fn user(&self) -> &User {
        match self {
            OwnerResolution::Existing(u) | OwnerResolution::Provisioned(u) => u,
        }
    }

    pub fn is_provisioned(&self) -> bool {
        matches!(self, OwnerResolution::Provisioned(_))
    }
}

fn split_name(full: &str) -> (String, String) {
    let full = full.trim();
    match full.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (full.to_string(), String::new()),
    }
}

/// Finds the account for `owner.email`, creating a degraded one when there is none.
pub async fn resolve_new_owner(
    users: &dyn UserRepo,
    owner: &ProposedOwner,
    now: OffsetDateTime,
) -> AppResult<OwnerResolution> {
    let email = owner.email.trim().to_lowercase();
    if let Some(user) = users.find_by_email(&email).await? {
        return Ok(OwnerResolution::Existing(user));
    }

    let (first_name, last_name) = split_name(&owner.name);
    let provisional = NewUser {
        id: Uuid::new_v4(),
        email: email.clone(),
        password_hash: None,
        first_name,
        last_name,
        phone: Some(owner.contact.clone()).filter(|c| !c.is_empty()),
        role: Role::Seller,
        is_active: false,
        pending_verification: false,
        kyc: SellerKyc::default(),
        created_at: now,
    };
    match users.insert(provisional).await {
        Ok(user) => {
            warn!(user_id = %user.id, email = %email, "provisioned account without credentials");
            Ok(OwnerResolution::Provisioned(user))
        }
        // Someone registered the email in between; use their account.
        Err(RepoError::AlreadyExists) => users
            .find_by_email(&email)
            .await?
            .map(OwnerResolution::Existing)
            .ok_or_else(|| AppError::Dependency(anyhow::anyhow!("user {email} vanished after conflict"))),
        Err(e) => Err(e.into()),
    }
}

/// Moves a property with a pending transfer to `resolution`'s account.
pub async fn reassign_ownership(
    properties: &dyn PropertyRepo,
    property_id: Uuid,
    resolution: &OwnerResolution,
    notes: &str,
    admin_id: Uuid,
    now: OffsetDateTime,
) -> AppResult<Property> {
    let new_owner = resolution.user();
    let property = properties
        .complete_transfer(property_id, new_owner.id, notes, admin_id, now)
        .await?
        .ok_or_else(|| AppError::invalid_state("Only pending transfers can be verified"))?;
    info!(
        property_id = %property_id,
        new_owner_id = %new_owner.id,
        provisioned = resolution.is_provisioned(),
        "ownership transferred"
    );
    Ok(property)
}
