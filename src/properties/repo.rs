use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{
    NewProperty, Property, PropertyDetails, PropertyFilter, PropertyRow, PropertyStats,
    TransferRequest, Verdict,
};
use crate::documents::Document;
use crate::error::RepoResult;

/// Durable property records.
///
/// Every state transition is a single conditional statement; `Ok(None)` means the
/// guard did not hold (or the row is gone) and nothing was written.
#[async_trait]
pub trait PropertyRepo: Send + Sync {
    async fn insert(&self, property: NewProperty) -> RepoResult<Property>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Property>>;

    async fn list(&self, filter: &PropertyFilter) -> RepoResult<(Vec<Property>, i64)>;

    /// Owner edit: replaces the details, appends `new_documents` and resets the status to
    /// pending. Guarded on ownership and `status <> verified`.
    async fn apply_edit(
        &self,
        id: Uuid,
        owner_id: Uuid,
        details: &PropertyDetails,
        new_documents: &[Document],
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>>;

    async fn soft_delete(&self, id: Uuid, owner_id: Uuid, at: OffsetDateTime) -> RepoResult<bool>;

    /// Guarded on `status = pending`.
    async fn record_verdict(
        &self,
        id: Uuid,
        verdict: &Verdict,
        admin_id: Uuid,
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>>;

    /// Guarded on ownership, `status = verified` and no transfer already pending.
    /// Overwrites any terminal transfer fields.
    async fn open_transfer(
        &self,
        id: Uuid,
        owner_id: Uuid,
        request: &TransferRequest,
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>>;

    /// Approves the pending transfer and hands the property to `new_owner_id`.
    async fn complete_transfer(
        &self,
        id: Uuid,
        new_owner_id: Uuid,
        notes: &str,
        admin_id: Uuid,
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>>;

    async fn reject_transfer(
        &self,
        id: Uuid,
        notes: &str,
        reason: &str,
        admin_id: Uuid,
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>>;

    async fn stats(&self) -> RepoResult<PropertyStats>;
}

const PROPERTY_COLUMNS: &str = r#"
    id, owner_id, title, property_type, price, size, description, features, address,
    coordinates, sector, block, bedrooms, bathrooms, owner_name, owner_contact, owner_email,
    status, verification_notes, verified_by, verified_at, rejected_by, rejected_at,
    rejection_reason, documents, transfer_status, new_owner_name, new_owner_contact,
    new_owner_email, transfer_reason, transfer_documents, transfer_requested_at,
    transfer_notes, transfer_adjudicated_by, transfer_adjudicated_at,
    transfer_rejection_reason, new_owner_id, submitted_at, updated_at, deleted_at
"#;

/// `%term%` for ILIKE with the pattern metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[derive(Clone)]
pub struct PgPropertyRepo {
    db: PgPool,
}

impl PgPropertyRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_property(row: Option<PropertyRow>) -> RepoResult<Option<Property>> {
    row.map(Property::try_from).transpose()
}

#[async_trait]
impl PropertyRepo for PgPropertyRepo {
    async fn insert(&self, p: NewProperty) -> RepoResult<Property> {
        let d = &p.details;
        let sql = format!(
            r#"
            INSERT INTO properties (
                id, owner_id, title, property_type, price, size, description, features,
                address, coordinates, sector, block, bedrooms, bathrooms, owner_name,
                owner_contact, owner_email, status, documents, submitted_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, 'pending', $18, $19, $19)
            RETURNING {PROPERTY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(p.id)
            .bind(p.owner_id)
            .bind(&d.title)
            .bind(d.property_type.as_str())
            .bind(d.price)
            .bind(&d.size)
            .bind(&d.description)
            .bind(&d.features)
            .bind(&d.address)
            .bind(&d.coordinates)
            .bind(&d.sector)
            .bind(&d.block)
            .bind(d.bedrooms)
            .bind(d.bathrooms)
            .bind(&d.owner_name)
            .bind(&d.owner_contact)
            .bind(&d.owner_email)
            .bind(Json(&p.documents))
            .bind(p.submitted_at)
            .fetch_one(&self.db)
            .await?;
        Property::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Property>> {
        let sql = format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        into_property(row)
    }

    async fn list(&self, f: &PropertyFilter) -> RepoResult<(Vec<Property>, i64)> {
        const FILTER: &str = r#"
            deleted_at IS NULL
            AND ($1::text IS NULL
                 OR title ILIKE $1 OR owner_name ILIKE $1 OR id::text ILIKE $1)
            AND ($2::text IS NULL OR property_type = $2)
            AND ($3::text IS NULL OR status = $3)
        "#;
        let pattern = f.search.as_deref().map(like_pattern);
        let kind = f.property_type.map(|t| t.as_str());
        let status = f.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM properties WHERE {FILTER}"
        ))
        .bind(&pattern)
        .bind(kind)
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, PropertyRow>(&format!(
            r#"
            SELECT {PROPERTY_COLUMNS} FROM properties
            WHERE {FILTER}
            ORDER BY submitted_at DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(&pattern)
        .bind(kind)
        .bind(status)
        .bind(f.limit)
        .bind(f.offset())
        .fetch_all(&self.db)
        .await?;

        let properties = rows
            .into_iter()
            .map(Property::try_from)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok((properties, total))
    }

    async fn apply_edit(
        &self,
        id: Uuid,
        owner_id: Uuid,
        d: &PropertyDetails,
        new_documents: &[Document],
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>> {
        let sql = format!(
            r#"
            UPDATE properties
               SET title = $3, property_type = $4, price = $5, size = $6, description = $7,
                   features = $8, address = $9, coordinates = $10, sector = $11, block = $12,
                   bedrooms = $13, bathrooms = $14, owner_name = $15, owner_contact = $16,
                   owner_email = $17, documents = documents || $18, status = 'pending',
                   updated_at = $19
             WHERE id = $1 AND owner_id = $2 AND status <> 'verified' AND deleted_at IS NULL
            RETURNING {PROPERTY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .bind(&d.title)
            .bind(d.property_type.as_str())
            .bind(d.price)
            .bind(&d.size)
            .bind(&d.description)
            .bind(&d.features)
            .bind(&d.address)
            .bind(&d.coordinates)
            .bind(&d.sector)
            .bind(&d.block)
            .bind(d.bedrooms)
            .bind(d.bathrooms)
            .bind(&d.owner_name)
            .bind(&d.owner_contact)
            .bind(&d.owner_email)
            .bind(Json(new_documents))
            .bind(at)
            .fetch_optional(&self.db)
            .await?;
        into_property(row)
    }

    async fn soft_delete(&self, id: Uuid, owner_id: Uuid, at: OffsetDateTime) -> RepoResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE properties SET deleted_at = $3, updated_at = $3
             WHERE id = $1 AND owner_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(at)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn record_verdict(
        &self,
        id: Uuid,
        verdict: &Verdict,
        admin_id: Uuid,
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>> {
        let set = match verdict {
            Verdict::Approve { .. } => {
                "status = 'verified', verified_by = $3, verified_at = $4, \
                 rejected_by = NULL, rejected_at = NULL, rejection_reason = NULL"
            }
            Verdict::Reject { .. } => {
                "status = 'rejected', rejected_by = $3, rejected_at = $4, rejection_reason = $5"
            }
        };
        let reason = match verdict {
            Verdict::Reject { reason, .. } => Some(reason.as_str()),
            Verdict::Approve { .. } => None,
        };
        let sql = format!(
            r#"
            UPDATE properties
               SET {set}, verification_notes = $2, updated_at = $4
             WHERE id = $1 AND status = 'pending' AND deleted_at IS NULL
            RETURNING {PROPERTY_COLUMNS}
            "#
        );
        let query = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .bind(verdict.notes())
            .bind(admin_id)
            .bind(at);
        // $5 exists only in the reject statement.
        let query = match reason {
            Some(r) => query.bind(r),
            None => query,
        };
        into_property(query.fetch_optional(&self.db).await?)
    }

    async fn open_transfer(
        &self,
        id: Uuid,
        owner_id: Uuid,
        request: &TransferRequest,
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>> {
        let sql = format!(
            r#"
            UPDATE properties
               SET transfer_status = 'pending', new_owner_name = $3, new_owner_contact = $4,
                   new_owner_email = $5, transfer_reason = $6, transfer_documents = $7,
                   transfer_requested_at = $8, transfer_notes = NULL,
                   transfer_adjudicated_by = NULL, transfer_adjudicated_at = NULL,
                   transfer_rejection_reason = NULL, new_owner_id = NULL, updated_at = $8
             WHERE id = $1 AND owner_id = $2 AND status = 'verified'
               AND transfer_status IS DISTINCT FROM 'pending' AND deleted_at IS NULL
            RETURNING {PROPERTY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .bind(owner_id)
            .bind(&request.new_owner.name)
            .bind(&request.new_owner.contact)
            .bind(&request.new_owner.email)
            .bind(&request.reason)
            .bind(Json(&request.documents))
            .bind(at)
            .fetch_optional(&self.db)
            .await?;
        into_property(row)
    }

    async fn complete_transfer(
        &self,
        id: Uuid,
        new_owner_id: Uuid,
        notes: &str,
        admin_id: Uuid,
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>> {
        let sql = format!(
            r#"
            UPDATE properties
               SET owner_id = $2, new_owner_id = $2, transfer_status = 'verified',
                   transfer_notes = $3, transfer_adjudicated_by = $4,
                   transfer_adjudicated_at = $5, updated_at = $5
             WHERE id = $1 AND transfer_status = 'pending' AND deleted_at IS NULL
            RETURNING {PROPERTY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .bind(new_owner_id)
            .bind(notes)
            .bind(admin_id)
            .bind(at)
            .fetch_optional(&self.db)
            .await?;
        into_property(row)
    }

    async fn reject_transfer(
        &self,
        id: Uuid,
        notes: &str,
        reason: &str,
        admin_id: Uuid,
        at: OffsetDateTime,
    ) -> RepoResult<Option<Property>> {
        let sql = format!(
            r#"
            UPDATE properties
               SET transfer_status = 'rejected', transfer_notes = $2,
                   transfer_rejection_reason = $3, transfer_adjudicated_by = $4,
                   transfer_adjudicated_at = $5, updated_at = $5
             WHERE id = $1 AND transfer_status = 'pending' AND deleted_at IS NULL
            RETURNING {PROPERTY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .bind(notes)
            .bind(reason)
            .bind(admin_id)
            .bind(at)
            .fetch_optional(&self.db)
            .await?;
        into_property(row)
    }

    async fn stats(&self) -> RepoResult<PropertyStats> {
        let (total, pending, verified, rejected, transfers) =
            sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
                r#"
                SELECT COUNT(*),
                       COUNT(*) FILTER (WHERE status = 'pending'),
                       COUNT(*) FILTER (WHERE status = 'verified'),
                       COUNT(*) FILTER (WHERE status = 'rejected'),
                       COUNT(*) FILTER (WHERE transfer_status = 'pending')
                  FROM properties
                 WHERE deleted_at IS NULL
                "#,
            )
            .fetch_one(&self.db)
            .await?;
        Ok(PropertyStats {
            total_properties: total,
            pending_verification: pending,
            verified_properties: verified,
            rejected_properties: rejected,
            pending_transfers: transfers,
        })
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::properties::repo_types::{
        PropertyStatus, Review, Transfer, TransferStatus,
    };

    /// Same guards as the SQL statements, applied under one lock.
    #[derive(Default)]
    pub struct MemoryPropertyRepo {
        rows: Mutex<Vec<Property>>,
    }

    impl MemoryPropertyRepo {
        fn update<F>(&self, id: Uuid, guard: impl Fn(&Property) -> bool, f: F) -> Option<Property>
        where
            F: FnOnce(&mut Property),
        {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|p| p.id == id && p.deleted_at.is_none() && guard(p))?;
            f(row);
            Some(row.clone())
        }

        /// Rows including soft-deleted ones.
        pub fn raw(&self, id: Uuid) -> Option<Property> {
            self.rows.lock().unwrap().iter().find(|p| p.id == id).cloned()
        }
    }

    fn filter_hit(p: &Property, f: &PropertyFilter) -> bool {
        let search_ok = f.search.as_deref().map_or(true, |term| {
            let term = term.to_lowercase();
            p.details.title.to_lowercase().contains(&term)
                || p.details.owner_name.to_lowercase().contains(&term)
                || p.id.to_string().contains(&term)
        });
        search_ok
            && f.property_type.map_or(true, |t| p.details.property_type == t)
            && f.status.map_or(true, |s| p.status == s)
    }

    #[async_trait]
    impl PropertyRepo for MemoryPropertyRepo {
        async fn insert(&self, n: NewProperty) -> RepoResult<Property> {
            let property = Property {
                id: n.id,
                owner_id: n.owner_id,
                details: n.details,
                status: PropertyStatus::Pending,
                review: Review::default(),
                documents: n.documents,
                transfer: None,
                submitted_at: n.submitted_at,
                updated_at: n.submitted_at,
                deleted_at: None,
            };
            self.rows.lock().unwrap().push(property.clone());
            Ok(property)
        }

        async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Property>> {
            Ok(self.raw(id).filter(|p| p.deleted_at.is_none()))
        }

        async fn list(&self, f: &PropertyFilter) -> RepoResult<(Vec<Property>, i64)> {
            let mut hits: Vec<Property> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.deleted_at.is_none() && filter_hit(p, f))
                .cloned()
                .collect();
            hits.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
            let total = hits.len() as i64;
            let page = hits
                .into_iter()
                .skip(f.offset() as usize)
                .take(f.limit as usize)
                .collect();
            Ok((page, total))
        }

        async fn apply_edit(
            &self,
            id: Uuid,
            owner_id: Uuid,
            details: &PropertyDetails,
            new_documents: &[Document],
            at: OffsetDateTime,
        ) -> RepoResult<Option<Property>> {
            Ok(self.update(
                id,
                |p| p.owner_id == owner_id && p.status != PropertyStatus::Verified,
                |p| {
                    p.details = details.clone();
                    p.documents.extend_from_slice(new_documents);
                    p.status = PropertyStatus::Pending;
                    p.updated_at = at;
                },
            ))
        }

        async fn soft_delete(&self, id: Uuid, owner_id: Uuid, at: OffsetDateTime) -> RepoResult<bool> {
            Ok(self
                .update(id, |p| p.owner_id == owner_id, |p| {
                    p.deleted_at = Some(at);
                    p.updated_at = at;
                })
                .is_some())
        }

        async fn record_verdict(
            &self,
            id: Uuid,
            verdict: &Verdict,
            admin_id: Uuid,
            at: OffsetDateTime,
        ) -> RepoResult<Option<Property>> {
            Ok(self.update(
                id,
                |p| p.status == PropertyStatus::Pending,
                |p| {
                    p.review.notes = Some(verdict.notes().to_string());
                    match verdict {
                        Verdict::Approve { .. } => {
                            p.status = PropertyStatus::Verified;
                            p.review.verified_by = Some(admin_id);
                            p.review.verified_at = Some(at);
                            p.review.rejected_by = None;
                            p.review.rejected_at = None;
                            p.review.rejection_reason = None;
                        }
                        Verdict::Reject { reason, .. } => {
                            p.status = PropertyStatus::Rejected;
                            p.review.rejected_by = Some(admin_id);
                            p.review.rejected_at = Some(at);
                            p.review.rejection_reason = Some(reason.clone());
                        }
                    }
                    p.updated_at = at;
                },
            ))
        }

        async fn open_transfer(
            &self,
            id: Uuid,
            owner_id: Uuid,
            request: &TransferRequest,
            at: OffsetDateTime,
        ) -> RepoResult<Option<Property>> {
            Ok(self.update(
                id,
                |p| {
                    p.owner_id == owner_id
                        && p.status == PropertyStatus::Verified
                        && p.transfer_status() != Some(TransferStatus::Pending)
                },
                |p| {
                    p.transfer = Some(Transfer {
                        status: TransferStatus::Pending,
                        new_owner: request.new_owner.clone(),
                        reason: request.reason.clone(),
                        documents: request.documents.clone(),
                        requested_at: at,
                        notes: None,
                        adjudicated_by: None,
                        adjudicated_at: None,
                        rejection_reason: None,
                        new_owner_id: None,
                    });
                    p.updated_at = at;
                },
            ))
        }

        async fn complete_transfer(
            &self,
            id: Uuid,
            new_owner_id: Uuid,
            notes: &str,
            admin_id: Uuid,
            at: OffsetDateTime,
        ) -> RepoResult<Option<Property>> {
            Ok(self.update(
                id,
                |p| p.transfer_status() == Some(TransferStatus::Pending),
                |p| {
                    p.owner_id = new_owner_id;
                    if let Some(t) = p.transfer.as_mut() {
                        t.status = TransferStatus::Verified;
                        t.notes = Some(notes.to_string());
                        t.adjudicated_by = Some(admin_id);
                        t.adjudicated_at = Some(at);
                        t.new_owner_id = Some(new_owner_id);
                    }
                    p.updated_at = at;
                },
            ))
        }

        async fn reject_transfer(
            &self,
            id: Uuid,
            notes: &str,
            reason: &str,
            admin_id: Uuid,
            at: OffsetDateTime,
        ) -> RepoResult<Option<Property>> {
            Ok(self.update(
                id,
                |p| p.transfer_status() == Some(TransferStatus::Pending),
                |p| {
                    if let Some(t) = p.transfer.as_mut() {
                        t.status = TransferStatus::Rejected;
                        t.notes = Some(notes.to_string());
                        t.rejection_reason = Some(reason.to_string());
                        t.adjudicated_by = Some(admin_id);
                        t.adjudicated_at = Some(at);
                    }
                    p.updated_at = at;
                },
            ))
        }

        async fn stats(&self) -> RepoResult<PropertyStats> {
            let rows = self.rows.lock().unwrap();
            let live = rows.iter().filter(|p| p.deleted_at.is_none());
            let mut stats = PropertyStats::default();
            for p in live {
                stats.total_properties += 1;
                match p.status {
                    PropertyStatus::Pending => stats.pending_verification += 1,
                    PropertyStatus::Verified => stats.verified_properties += 1,
                    PropertyStatus::Rejected => stats.rejected_properties += 1,
                }
                if p.transfer_status() == Some(TransferStatus::Pending) {
                    stats.pending_transfers += 1;
                }
            }
            Ok(stats)
        }
    }
}
