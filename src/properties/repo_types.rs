use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::documents::Document;
use crate::error::RepoError;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = RepoError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(RepoError::Corrupt(format!(
                        "unknown {} {other:?}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Land,
    House,
    Apartment,
    Commercial,
}

text_enum!(PropertyType {
    Land => "land",
    House => "house",
    Apartment => "apartment",
    Commercial => "commercial",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Sqft,
    Sqm,
    Acres,
    Hectares,
}

text_enum!(SizeUnit {
    Sqft => "sqft",
    Sqm => "sqm",
    Acres => "acres",
    Hectares => "hectares",
});

/// Review state of the record itself.
///
/// `Pending -> Verified | Rejected` through adjudication only; an owner edit puts a
/// rejected record back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyStatus {
    Pending,
    Verified,
    Rejected,
}

text_enum!(PropertyStatus {
    Pending => "pending",
    Verified => "verified",
    Rejected => "rejected",
});

/// State of the ownership-transfer sub-record. Absent until the first request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Verified,
    Rejected,
}

text_enum!(TransferStatus {
    Pending => "pending",
    Verified => "verified",
    Rejected => "rejected",
});

/// Owner-editable part of a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDetails {
    pub title: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    pub price: f64,
    /// `"<number> <unit>"`
    pub size: String,
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
}

/// Admin decision on a pending record or a pending transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approve { notes: String },
    Reject { notes: String, reason: String },
}

impl Verdict {
    pub fn notes(&self) -> &str {
        match self {
            Verdict::Approve { notes } | Verdict::Reject { notes, .. } => notes,
        }
    }

    pub fn is_approval(&self) -> bool {
        matches!(self, Verdict::Approve { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub notes: Option<String>,
    pub verified_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub verified_at: Option<OffsetDateTime>,
    pub rejected_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub rejected_at: Option<OffsetDateTime>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedOwner {
    pub name: String,
    pub contact: String,
    pub email: String,
}

/// The transfer a seller asked for, as written when the request is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub new_owner: ProposedOwner,
    pub reason: Option<String>,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub status: TransferStatus,
    pub new_owner: ProposedOwner,
    pub reason: Option<String>,
    pub documents: Vec<Document>,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    pub notes: Option<String>,
    pub adjudicated_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub adjudicated_at: Option<OffsetDateTime>,
    pub rejection_reason: Option<String>,
    /// Account the property went to; set on approval.
    pub new_owner_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(flatten)]
    pub details: PropertyDetails,
    pub status: PropertyStatus,
    #[serde(flatten)]
    pub review: Review,
    pub documents: Vec<Document>,
    pub transfer: Option<Transfer>,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(skip)]
    pub deleted_at: Option<OffsetDateTime>,
}

impl Property {
    pub fn transfer_status(&self) -> Option<TransferStatus> {
        self.transfer.as_ref().map(|t| t.status)
    }
}

#[derive(Debug, Clone)]
pub struct NewProperty {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub details: PropertyDetails,
    pub documents: Vec<Document>,
    pub submitted_at: OffsetDateTime,
}

/// Listing query. `None` filters match everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFilter {
    pub search: Option<String>,
    pub property_type: Option<PropertyType>,
    pub status: Option<PropertyStatus>,
    pub page: i64,
    pub limit: i64,
}

impl PropertyFilter {
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0) * self.limit
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyStats {
    pub total_properties: i64,
    pub pending_verification: i64,
    pub verified_properties: i64,
    pub rejected_properties: i64,
    pub pending_transfers: i64,
}

#[derive(Debug, FromRow)]
pub(crate) struct PropertyRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub property_type: String,
    pub price: f64,
    pub size: String,
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
    pub status: String,
    pub verification_notes: Option<String>,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<OffsetDateTime>,
    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<OffsetDateTime>,
    pub rejection_reason: Option<String>,
    pub documents: Json<Vec<Document>>,
    pub transfer_status: Option<String>,
    pub new_owner_name: Option<String>,
    pub new_owner_contact: Option<String>,
    pub new_owner_email: Option<String>,
    pub transfer_reason: Option<String>,
    pub transfer_documents: Option<Json<Vec<Document>>>,
    pub transfer_requested_at: Option<OffsetDateTime>,
    pub transfer_notes: Option<String>,
    pub transfer_adjudicated_by: Option<Uuid>,
    pub transfer_adjudicated_at: Option<OffsetDateTime>,
    pub transfer_rejection_reason: Option<String>,
    pub new_owner_id: Option<Uuid>,
    pub submitted_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl TryFrom<PropertyRow> for Property {
    type Error = RepoError;

    fn try_from(r: PropertyRow) -> Result<Self, Self::Error> {
        let transfer = match r.transfer_status.as_deref() {
            None => None,
            Some(status) => Some(Transfer {
                status: status.parse()?,
                new_owner: ProposedOwner {
                    name: r.new_owner_name.unwrap_or_default(),
                    contact: r.new_owner_contact.unwrap_or_default(),
                    email: r.new_owner_email.unwrap_or_default(),
                },
                reason: r.transfer_reason,
                documents: r.transfer_documents.map(|j| j.0).unwrap_or_default(),
                requested_at: r.transfer_requested_at.ok_or_else(|| {
                    RepoError::Corrupt(format!("property {} transfer without request time", r.id))
                })?,
                notes: r.transfer_notes,
                adjudicated_by: r.transfer_adjudicated_by,
                adjudicated_at: r.transfer_adjudicated_at,
                rejection_reason: r.transfer_rejection_reason,
                new_owner_id: r.new_owner_id,
            }),
        };

        Ok(Property {
            id: r.id,
            owner_id: r.owner_id,
            details: PropertyDetails {
                title: r.title,
                property_type: r.property_type.parse()?,
                price: r.price,
                size: r.size,
                description: r.description,
                features: r.features,
                address: r.address,
                coordinates: r.coordinates,
                sector: r.sector,
                block: r.block,
                bedrooms: r.bedrooms,
                bathrooms: r.bathrooms,
                owner_name: r.owner_name,
                owner_contact: r.owner_contact,
                owner_email: r.owner_email,
            },
            status: r.status.parse()?,
            review: Review {
                notes: r.verification_notes,
                verified_by: r.verified_by,
                verified_at: r.verified_at,
                rejected_by: r.rejected_by,
                rejected_at: r.rejected_at,
                rejection_reason: r.rejection_reason,
            },
            documents: r.documents.0,
            transfer,
            submitted_at: r.submitted_at,
            updated_at: r.updated_at,
            deleted_at: r.deleted_at,
        })
    }
}
