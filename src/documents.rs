use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::StorageClient;

/// Document attached to a property record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub url: String,
}

/// What an uploaded file is for; decides its storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Selfie,
    IdFront,
    IdBack,
    GovernmentId,
    Survey,
    Transfer,
}

impl DocumentKind {
    fn prefix(self) -> &'static str {
        match self {
            DocumentKind::Selfie => "identity/selfie",
            DocumentKind::IdFront => "identity/id-front",
            DocumentKind::IdBack => "identity/id-back",
            DocumentKind::GovernmentId => "properties/gov-id",
            DocumentKind::Survey => "properties/survey",
            DocumentKind::Transfer => "properties/transfer",
        }
    }

    fn label(self) -> &'static str {
        match self {
            DocumentKind::Selfie => "selfie",
            DocumentKind::IdFront => "idCardFront",
            DocumentKind::IdBack => "idCardBack",
            DocumentKind::GovernmentId => "governmentId",
            DocumentKind::Survey => "surveyDocuments",
            DocumentKind::Transfer => "transferDocuments",
        }
    }
}

pub struct UploadItem {
    pub kind: DocumentKind,
    pub body: Bytes,
    pub content_type: String,
}

impl UploadItem {
    pub fn new(kind: DocumentKind, body: Bytes, content_type: Option<String>) -> Self {
        Self {
            kind,
            body,
            content_type: content_type.unwrap_or_else(|| "image/jpeg".to_string()),
        }
    }
}

/// An object written to the blob store during the current workflow call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub kind: DocumentKind,
    pub key: String,
    pub url: String,
    pub name: String,
}

#[derive(Debug, Default, Clone)]
pub struct UploadedBatch {
    objects: Vec<StoredObject>,
}

impl UploadedBatch {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|o| o.key.clone()).collect()
    }

    pub fn get(&self, kind: DocumentKind) -> Option<&StoredObject> {
        self.objects.iter().find(|o| o.kind == kind)
    }

    pub fn documents(&self) -> Vec<Document> {
        self.objects
            .iter()
            .map(|o| Document {
                name: o.name.clone(),
                url: o.url.clone(),
            })
            .collect()
    }

    pub fn into_objects(self) -> Vec<StoredObject> {
        self.objects
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "application/pdf" => Some("pdf"),
        _ => None,
    }
}

pub(crate) fn object_key(kind: DocumentKind, scope: &str, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("{}/{}/{}.{}", kind.prefix(), scope, Uuid::new_v4(), ext)
}

/// Uploads every item under `scope`. When one upload fails the objects already
/// written by this call are removed before the error is returned.
pub async fn upload_all(
    storage: &dyn StorageClient,
    scope: &str,
    items: Vec<UploadItem>,
) -> anyhow::Result<UploadedBatch> {
    let mut batch = UploadedBatch {
        objects: Vec::with_capacity(items.len()),
    };
    for item in items {
        let key = object_key(item.kind, scope, &item.content_type);
        let put = storage
            .put_object(&key, item.body, &item.content_type)
            .await
            .with_context(|| format!("upload {key}"));
        if let Err(e) = put {
            discard(storage, &batch.keys()).await;
            return Err(e);
        }
        let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
        debug!(key = %key, "document uploaded");
        batch.objects.push(StoredObject {
            kind: item.kind,
            url: storage.public_url(&key),
            name: format!("{}.{}", item.kind.label(), ext),
            key,
        });
    }
    Ok(batch)
}

/// Best-effort removal; failures are logged and swallowed.
pub async fn discard(storage: &dyn StorageClient, keys: &[String]) {
    for key in keys {
        if let Err(e) = storage.delete_object(key).await {
            warn!(error = %e, key = %key, "document cleanup failed");
        }
    }
}
