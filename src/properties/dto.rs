use serde::{Deserialize, Serialize};

use super::repo_types::{
    Property, PropertyDetails, PropertyFilter, PropertyStatus, PropertyType, ProposedOwner,
    SizeUnit, Verdict,
};
use crate::auth::dto::decode_base64;
use crate::auth::services::is_valid_email;
use crate::documents::{DocumentKind, UploadItem};
use crate::error::{AppError, AppResult};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

fn size_text(number: &str, unit: SizeUnit) -> AppResult<String> {
    let number = number.trim();
    match number.parse::<f64>() {
        Ok(n) if n > 0.0 && n.is_finite() => Ok(format!("{number} {unit}")),
        _ => Err(AppError::validation("sizeNumber must be a positive number")),
    }
}

fn check_price(price: f64) -> AppResult<f64> {
    if price.is_finite() && price >= 0.0 {
        Ok(price)
    } else {
        Err(AppError::validation("price must be a non-negative number"))
    }
}

fn decode_documents(
    kind: DocumentKind,
    field: &str,
    encoded: Vec<String>,
    content_type: &Option<String>,
) -> AppResult<Vec<UploadItem>> {
    encoded
        .iter()
        .filter(|v| !v.is_empty())
        .map(|v| -> AppResult<UploadItem> {
            Ok(UploadItem::new(
                kind,
                decode_base64(field, v)?,
                content_type.clone(),
            ))
        })
        .collect()
}

/// Property data plus the files to upload with it.
pub struct SubmitInput {
    pub details: PropertyDetails,
    pub documents: Vec<UploadItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePropertyRequest {
    pub title: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub price: f64,
    pub size_number: String,
    pub size_unit: SizeUnit,
    pub description: Option<String>,
    pub features: Option<String>,
    pub address: String,
    pub coordinates: String,
    pub sector: Option<String>,
    pub block: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub owner_name: String,
    pub owner_contact: String,
    pub owner_email: String,
    /// Base64 document bodies.
    #[serde(default)]
    pub government_id: Vec<String>,
    #[serde(default)]
    pub survey_documents: Vec<String>,
    pub content_type: Option<String>,
}

impl CreatePropertyRequest {
    pub fn into_input(self) -> AppResult<SubmitInput> {
        if self.title.trim().is_empty() {
            return Err(AppError::validation("title is required"));
        }
        if !is_valid_email(self.owner_email.trim()) {
            return Err(AppError::validation("ownerEmail is invalid"));
        }
        let mut documents = decode_documents(
            DocumentKind::GovernmentId,
            "governmentId",
            self.government_id,
            &self.content_type,
        )?;
        documents.extend(decode_documents(
            DocumentKind::Survey,
            "surveyDocuments",
            self.survey_documents,
            &self.content_type,
        )?);

        Ok(SubmitInput {
            details: PropertyDetails {
                title: self.title.trim().to_string(),
                property_type: self.property_type,
                price: check_price(self.price)?,
                size: size_text(&self.size_number, self.size_unit)?,
                description: self.description,
                features: self.features,
                address: self.address,
                coordinates: self.coordinates,
                sector: self.sector,
                block: self.block,
                bedrooms: self.bedrooms,
                bathrooms: self.bathrooms,
                owner_name: self.owner_name,
                owner_contact: self.owner_contact,
                owner_email: self.owner_email.trim().to_lowercase(),
            },
            documents,
        })
    }
}

/// Partial owner edit; omitted fields keep their stored value.
#[derive(Debug, Default, Clone)]
pub struct PropertyPatch {
    pub title: Option<String>,
    pub property_type: Option<PropertyType>,
    pub price: Option<f64>,
    pub size: Option<String>,
    pub description: Option<String>,
    pub features: Option<String>,
    pub address: Option<String>,
    pub coordinates: Option<String>,
    pub sector: Option<String>,
    pub block: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub owner_name: Option<String>,
    pub owner_contact: Option<String>,
    pub owner_email: Option<String>,
}

impl PropertyPatch {
    pub fn apply(self, current: &PropertyDetails) -> PropertyDetails {
        let current = current.clone();
        PropertyDetails {
            title: self.title.unwrap_or(current.title),
            property_type: self.property_type.unwrap_or(current.property_type),
            price: self.price.unwrap_or(current.price),
            size: self.size.unwrap_or(current.size),
            description: self.description.or(current.description),
            features: self.features.or(current.features),
            address: self.address.unwrap_or(current.address),
            coordinates: self.coordinates.unwrap_or(current.coordinates),
            sector: self.sector.or(current.sector),
            block: self.block.or(current.block),
            bedrooms: self.bedrooms.or(current.bedrooms),
            bathrooms: self.bathrooms.or(current.bathrooms),
            owner_name: self.owner_name.unwrap_or(current.owner_name),
            owner_contact: self.owner_contact.unwrap_or(current.owner_contact),
            owner_email: self.owner_email.unwrap_or(current.owner_email),
        }
    }
}

pub struct EditInput {
    pub patch: PropertyPatch,
    pub documents: Vec<UploadItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePropertyRequest {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub property_type: Option<PropertyType>,
    pub price: Option<f64>,
    pub size_number: Option<String>,
    pub size_unit: Option<SizeUnit>,
    pub description: Option<String>,
    pub features: Option<String>,
    pub address: Option<String>,
    pub coordinates: Option<String>,
    pub sector: Option<String>,
    pub block: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub owner_name: Option<String>,
    pub owner_contact: Option<String>,
    pub owner_email: Option<String>,
    #[serde(default)]
    pub government_id: Vec<String>,
    #[serde(default)]
    pub survey_documents: Vec<String>,
    pub content_type: Option<String>,
}

impl UpdatePropertyRequest {
    pub fn into_input(self) -> AppResult<EditInput> {
        // The stored size only changes when both halves are supplied.
        let size = match (self.size_number.as_deref(), self.size_unit) {
            (Some(n), Some(u)) => Some(size_text(n, u)?),
            _ => None,
        };
        let owner_email = match self.owner_email {
            Some(e) if !is_valid_email(e.trim()) => {
                return Err(AppError::validation("ownerEmail is invalid"))
            }
            other => other.map(|e| e.trim().to_lowercase()),
        };
        let mut documents = decode_documents(
            DocumentKind::GovernmentId,
            "governmentId",
            self.government_id,
            &self.content_type,
        )?;
        documents.extend(decode_documents(
            DocumentKind::Survey,
            "surveyDocuments",
            self.survey_documents,
            &self.content_type,
        )?);

        Ok(EditInput {
            patch: PropertyPatch {
                title: self.title.filter(|t| !t.trim().is_empty()),
                property_type: self.property_type,
                price: self.price.map(check_price).transpose()?,
                size,
                description: self.description,
                features: self.features,
                address: self.address,
                coordinates: self.coordinates,
                sector: self.sector,
                block: self.block,
                bedrooms: self.bedrooms,
                bathrooms: self.bathrooms,
                owner_name: self.owner_name,
                owner_contact: self.owner_contact,
                owner_email,
            },
            documents,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Approve,
    Reject,
}

/// Admin decision body, shared by property and transfer adjudication.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub action: Action,
    pub verification_notes: String,
    pub rejection_reason: Option<String>,
}

impl VerificationRequest {
    pub fn into_verdict(self) -> AppResult<Verdict> {
        let notes = self.verification_notes.trim().to_string();
        if notes.is_empty() {
            return Err(AppError::validation("verificationNotes is required"));
        }
        match self.action {
            Action::Approve => Ok(Verdict::Approve { notes }),
            Action::Reject => {
                let reason = self
                    .rejection_reason
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| AppError::validation("rejectionReason is required to reject"))?;
                Ok(Verdict::Reject { notes, reason })
            }
        }
    }
}

pub struct TransferInput {
    pub new_owner: ProposedOwner,
    pub reason: Option<String>,
    pub documents: Vec<UploadItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequestBody {
    pub new_owner_name: String,
    pub new_owner_contact: String,
    pub new_owner_email: String,
    pub transfer_reason: Option<String>,
    #[serde(default)]
    pub transfer_documents: Vec<String>,
    pub content_type: Option<String>,
}

impl TransferRequestBody {
    pub fn into_input(self) -> AppResult<TransferInput> {
        let email = self.new_owner_email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(AppError::validation("newOwnerEmail is invalid"));
        }
        if self.new_owner_name.trim().is_empty() {
            return Err(AppError::validation("newOwnerName is required"));
        }
        Ok(TransferInput {
            new_owner: ProposedOwner {
                name: self.new_owner_name.trim().to_string(),
                contact: self.new_owner_contact.trim().to_string(),
                email,
            },
            reason: self.transfer_reason,
            documents: decode_documents(
                DocumentKind::Transfer,
                "transferDocuments",
                self.transfer_documents,
                &self.content_type,
            )?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    #[serde(rename = "type")]
    pub property_type: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn enum_filter<T>(field: &str, value: Option<&str>) -> AppResult<Option<T>>
where
    T: std::str::FromStr,
{
    match value.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::validation(format!("invalid {field} filter: {v}"))),
    }
}

impl ListQuery {
    pub fn into_filter(self) -> AppResult<PropertyFilter> {
        Ok(PropertyFilter {
            search: self
                .search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            property_type: enum_filter::<PropertyType>("type", self.property_type.as_deref())?,
            status: enum_filter::<PropertyStatus>("status", self.status.as_deref())?,
            page: self.page.unwrap_or(1).max(1),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PropertyPage {
    pub properties: Vec<Property>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}
