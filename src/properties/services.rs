use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{EditInput, PropertyPage, SubmitInput, TransferInput};
use super::repo::PropertyRepo;
use super::repo_types::{
    NewProperty, Property, PropertyFilter, PropertyStats, PropertyStatus, TransferRequest,
    TransferStatus, Verdict,
};
use super::transfer::{reassign_ownership, resolve_new_owner};
use crate::clock::Clock;
use crate::documents::{self, Document, UploadItem, UploadedBatch};
use crate::error::{AppError, AppResult};
use crate::state::Backends;
use crate::storage::StorageClient;
use crate::users::{Role, User, UserRepo};

pub const QUICK_APPROVAL_NOTE: &str = "Quick approval";
pub const QUICK_REJECTION_NOTE: &str = "Quick rejection";

/// Property submission, review and ownership transfer.
#[derive(Clone)]
pub struct PropertyService {
    properties: Arc<dyn PropertyRepo>,
    users: Arc<dyn UserRepo>,
    storage: Arc<dyn StorageClient>,
    clock: Arc<dyn Clock>,
}

impl PropertyService {
    pub fn new(backends: &Backends) -> Self {
        Self {
            properties: backends.properties.clone(),
            users: backends.users.clone(),
            storage: backends.storage.clone(),
            clock: backends.clock.clone(),
        }
    }

    /// Loads the caller and checks their current role. Inactive accounts are refused.
    async fn caller_with_role(&self, user_id: Uuid, role: Role, denied: &str) -> AppResult<User> {
        match self.users.find_by_id(user_id).await? {
            Some(user) if user.role == role && user.is_active => Ok(user),
            Some(user) if user.role == role => {
                warn!(user_id = %user_id, "inactive account refused");
                Err(AppError::unauthorized(
                    "Account is not active. Please contact support.",
                ))
            }
            _ => {
                warn!(user_id = %user_id, required = %role, "role check failed");
                Err(AppError::unauthorized(denied))
            }
        }
    }

    async fn load(&self, id: Uuid) -> AppResult<Property> {
        self.properties
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("Property not found"))
    }

    async fn load_owned(&self, id: Uuid, owner_id: Uuid, denied: &str) -> AppResult<Property> {
        let property = self.load(id).await?;
        if property.owner_id != owner_id {
            warn!(property_id = %id, user_id = %owner_id, "caller does not own property");
            return Err(AppError::unauthorized(denied));
        }
        Ok(property)
    }

    async fn upload(&self, scope: &str, items: Vec<UploadItem>) -> AppResult<UploadedBatch> {
        if items.is_empty() {
            return Ok(UploadedBatch::default());
        }
        Ok(documents::upload_all(self.storage.as_ref(), scope, items).await?)
    }

    async fn discard(&self, batch: &UploadedBatch) {
        if batch.is_empty() {
            return;
        }
        documents::discard(self.storage.as_ref(), &batch.keys()).await;
    }

    #[instrument(skip(self, input))]
    pub async fn submit(&self, seller_id: Uuid, input: SubmitInput) -> AppResult<Property> {
        self.caller_with_role(seller_id, Role::Seller, "Only sellers can create properties")
            .await?;

        let batch = self.upload(&seller_id.to_string(), input.documents).await?;
        let new = NewProperty {
            id: Uuid::new_v4(),
            owner_id: seller_id,
            details: input.details,
            documents: batch.documents(),
            submitted_at: self.clock.now(),
        };
        match self.properties.insert(new).await {
            Ok(property) => {
                info!(property_id = %property.id, "property submitted");
                Ok(property)
            }
            Err(e) => {
                error!(error = %e, "property insert failed");
                self.discard(&batch).await;
                Err(e.into())
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Property> {
        self.load(id).await
    }

    pub async fn documents(&self, id: Uuid) -> AppResult<Vec<Document>> {
        Ok(self.load(id).await?.documents)
    }

    pub async fn list(&self, filter: PropertyFilter) -> AppResult<PropertyPage> {
        let (properties, total) = self.properties.list(&filter).await?;
        Ok(PropertyPage {
            properties,
            total,
            page: filter.page,
            limit: filter.limit,
        })
    }

    /// Owner edit. Any accepted edit sends the record back to review; verified records
    /// cannot be edited at all.
    #[instrument(skip(self, input))]
    pub async fn update(&self, id: Uuid, seller_id: Uuid, input: EditInput) -> AppResult<Property> {
        self.caller_with_role(seller_id, Role::Seller, "Only sellers can update properties")
            .await?;
        let current = self
            .load_owned(id, seller_id, "Not authorized to update this property")
            .await?;
        if current.status == PropertyStatus::Verified {
            return Err(AppError::invalid_state(
                "Verified properties require re-verification",
            ));
        }

        let details = input.patch.apply(&current.details);
        let batch = self.upload(&id.to_string(), input.documents).await?;
        let updated = match self
            .properties
            .apply_edit(id, seller_id, &details, &batch.documents(), self.clock.now())
            .await
        {
            Ok(Some(p)) => p,
            Ok(None) => {
                self.discard(&batch).await;
                return Err(AppError::invalid_state(
                    "Property changed while it was being edited",
                ));
            }
            Err(e) => {
                self.discard(&batch).await;
                return Err(e.into());
            }
        };
        info!(property_id = %id, "property updated, back to pending");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid, seller_id: Uuid) -> AppResult<()> {
        self.caller_with_role(seller_id, Role::Seller, "Only sellers can delete properties")
            .await?;
        self.load_owned(id, seller_id, "Not authorized to delete this property")
            .await?;
        if !self
            .properties
            .soft_delete(id, seller_id, self.clock.now())
            .await?
        {
            return Err(AppError::not_found("Property not found"));
        }
        info!(property_id = %id, "property soft deleted");
        Ok(())
    }

    /// `pending -> verified | rejected`.
    #[instrument(skip(self, verdict))]
    pub async fn adjudicate(&self, id: Uuid, admin_id: Uuid, verdict: Verdict) -> AppResult<Property> {
        self.caller_with_role(admin_id, Role::Admin, "Only admins can verify properties")
            .await?;
        let current = self.load(id).await?;
        if current.status != PropertyStatus::Pending {
            return Err(AppError::invalid_state(
                "Only pending properties can be verified",
            ));
        }
        let property = self
            .properties
            .record_verdict(id, &verdict, admin_id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::invalid_state("Only pending properties can be verified"))?;
        info!(
            property_id = %id,
            approved = verdict.is_approval(),
            status = %property.status,
            "property adjudicated"
        );
        Ok(property)
    }

    pub async fn quick_approve(&self, id: Uuid, admin_id: Uuid) -> AppResult<Property> {
        let verdict = Verdict::Approve {
            notes: QUICK_APPROVAL_NOTE.into(),
        };
        self.adjudicate(id, admin_id, verdict).await
    }

    pub async fn quick_reject(&self, id: Uuid, admin_id: Uuid) -> AppResult<Property> {
        let verdict = Verdict::Reject {
            notes: QUICK_REJECTION_NOTE.into(),
            reason: QUICK_REJECTION_NOTE.into(),
        };
        self.adjudicate(id, admin_id, verdict).await
    }

    /// Opens a transfer on a verified property. A pending transfer blocks a new one; a
    /// terminal one is overwritten.
    #[instrument(skip(self, input))]
    pub async fn request_transfer(
        &self,
        id: Uuid,
        seller_id: Uuid,
        input: TransferInput,
    ) -> AppResult<Property> {
        self.caller_with_role(seller_id, Role::Seller, "Only sellers can initiate transfers")
            .await?;
        let current = self
            .load_owned(id, seller_id, "Not authorized to transfer this property")
            .await?;
        if current.status != PropertyStatus::Verified {
            return Err(AppError::invalid_state(
                "Only verified properties can be transferred",
            ));
        }
        if current.transfer_status() == Some(TransferStatus::Pending) {
            return Err(AppError::invalid_state(
                "A transfer is already pending for this property",
            ));
        }

        let batch = self.upload(&id.to_string(), input.documents).await?;
        let request = TransferRequest {
            new_owner: input.new_owner,
            reason: input.reason,
            documents: batch.documents(),
        };
        let property = match self
            .properties
            .open_transfer(id, seller_id, &request, self.clock.now())
            .await
        {
            Ok(Some(p)) => p,
            Ok(None) => {
                self.discard(&batch).await;
                return Err(AppError::invalid_state(
                    "Property is no longer eligible for transfer",
                ));
            }
            Err(e) => {
                self.discard(&batch).await;
                return Err(e.into());
            }
        };
        info!(property_id = %id, new_owner = %request.new_owner.email, "transfer requested");
        Ok(property)
    }

    /// Settles a pending transfer. Approval resolves (or provisions) the incoming owner's
    /// account first, then reassigns the property.
    #[instrument(skip(self, verdict))]
    pub async fn adjudicate_transfer(
        &self,
        id: Uuid,
        admin_id: Uuid,
        verdict: Verdict,
    ) -> AppResult<Property> {
        self.caller_with_role(admin_id, Role::Admin, "Only admins can verify transfers")
            .await?;
        let current = self.load(id).await?;
        let Some(transfer) = current
            .transfer
            .as_ref()
            .filter(|t| t.status == TransferStatus::Pending)
        else {
            return Err(AppError::invalid_state(
                "Only pending transfers can be verified",
            ));
        };

        let now = self.clock.now();
        match verdict {
            Verdict::Approve { notes } => {
                let resolution =
                    resolve_new_owner(self.users.as_ref(), &transfer.new_owner, now).await?;
                reassign_ownership(
                    self.properties.as_ref(),
                    id,
                    &resolution,
                    &notes,
                    admin_id,
                    now,
                )
                .await
            }
            Verdict::Reject { notes, reason } => {
                let property = self
                    .properties
                    .reject_transfer(id, &notes, &reason, admin_id, now)
                    .await?
                    .ok_or_else(|| {
                        AppError::invalid_state("Only pending transfers can be verified")
                    })?;
                info!(property_id = %id, "transfer rejected");
                Ok(property)
            }
        }
    }

    pub async fn stats(&self) -> AppResult<PropertyStats> {
        Ok(self.properties.stats().await?)
    }
}
