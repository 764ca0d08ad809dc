use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date, OffsetDateTime};
use uuid::Uuid;

use super::jwt::AuthTokens;
use crate::documents::{DocumentKind, UploadItem};
use crate::error::{AppError, AppResult};
use crate::users::{Role, SellerKyc, User};

/// Registration as the onboarding workflow consumes it.
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub kyc: SellerKyc,
    /// Identity documents; only kept for sellers.
    pub documents: Vec<UploadItem>,
}

/// Request body for user registration. Images arrive base64-encoded.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub surname: Option<String>,
    pub other_names: Option<String>,
    pub nationality: Option<String>,
    pub date_of_birth: Option<String>,
    pub national_id_number: Option<String>,
    pub selfie_image: Option<String>,
    pub id_card_front_image: Option<String>,
    pub id_card_back_image: Option<String>,
}

pub(crate) fn decode_base64(field: &str, value: &str) -> AppResult<Bytes> {
    let payload = value
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(value);
    STANDARD
        .decode(payload.trim())
        .map(Bytes::from)
        .map_err(|_| AppError::validation(format!("{field} is not valid base64")))
}

fn parse_date(value: &str) -> AppResult<Date> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|_| AppError::validation("dateOfBirth must be YYYY-MM-DD"))
}

impl RegisterRequest {
    pub fn into_input(self) -> AppResult<RegisterInput> {
        let mut documents = Vec::new();
        for (kind, field, value) in [
            (DocumentKind::Selfie, "selfieImage", &self.selfie_image),
            (DocumentKind::IdFront, "idCardFrontImage", &self.id_card_front_image),
            (DocumentKind::IdBack, "idCardBackImage", &self.id_card_back_image),
        ] {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                documents.push(UploadItem::new(kind, decode_base64(field, v)?, None));
            }
        }

        let date_of_birth = self.date_of_birth.as_deref().map(parse_date).transpose()?;

        Ok(RegisterInput {
            email: self.email,
            password: self.password,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            role: self.role,
            kyc: SellerKyc {
                surname: self.surname,
                other_names: self.other_names,
                nationality: self.nationality,
                date_of_birth,
                national_id_number: self.national_id_number,
                ..SellerKyc::default()
            },
            documents,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh and logout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(alias = "refresh_token")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    #[serde(alias = "new_password")]
    pub new_password: String,
}

/// Result of a registration that is now waiting for email verification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPending {
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    pub pending_verification: bool,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            role: u.role,
            is_active: u.is_active,
            pending_verification: u.pending_verification,
        }
    }
}

/// Response returned after login or email verification.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: PublicUser,
    pub tokens: AuthTokens,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterRequest {
        serde_json::from_value(serde_json::json!({
            "email": "s@x.com",
            "password": "password123",
            "firstName": "Kofi",
            "lastName": "Boateng",
            "role": "seller",
            "dateOfBirth": "1990-04-12",
            "nationalIdNumber": "GHA-123",
            "selfieImage": "data:image/jpeg;base64,aGVsbG8=",
            "idCardFrontImage": "aGVsbG8="
        }))
        .unwrap()
    }

    #[test]
    fn register_request_decodes_documents_and_kyc() {
        let input = request().into_input().unwrap();
        assert_eq!(input.role, Role::Seller);
        assert_eq!(input.documents.len(), 2);
        assert_eq!(input.documents[0].kind, DocumentKind::Selfie);
        assert_eq!(&input.documents[0].body[..], b"hello");
        assert_eq!(input.kyc.date_of_birth.unwrap().year(), 1990);
        assert_eq!(input.kyc.national_id_number.as_deref(), Some("GHA-123"));
    }

    #[test]
    fn bad_base64_is_a_validation_failure() {
        let mut req = request();
        req.id_card_back_image = Some("***".into());
        assert!(matches!(req.into_input(), Err(AppError::Validation(_))));
    }

    #[test]
    fn bad_date_is_a_validation_failure() {
        let mut req = request();
        req.date_of_birth = Some("12/04/1990".into());
        assert!(matches!(req.into_input(), Err(AppError::Validation(_))));
    }
}
