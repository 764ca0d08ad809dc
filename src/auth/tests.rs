use bytes::Bytes;
use time::Duration;
use uuid::Uuid;

use super::dto::RegisterInput;
use super::OnboardingService;
use crate::clock::Clock;
use crate::config::AdminSeed;
use crate::documents::{DocumentKind, UploadItem};
use crate::error::{AppError, AppResult};
use crate::staging::{registration_key, token_key};
use crate::state::testing::Harness;
use crate::users::{Role, SellerKyc, UserRepo};

const PASSWORD: &str = "password123";

fn setup() -> (Harness, OnboardingService) {
    let h = Harness::new();
    let svc = h.state().onboarding;
    (h, svc)
}

fn buyer(email: &str) -> RegisterInput {
    RegisterInput {
        email: email.into(),
        password: PASSWORD.into(),
        first_name: "Ama".into(),
        last_name: "Mensah".into(),
        phone: Some("+233200000000".into()),
        role: Role::Buyer,
        kyc: SellerKyc::default(),
        documents: vec![],
    }
}

fn seller(email: &str) -> RegisterInput {
    RegisterInput {
        role: Role::Seller,
        kyc: SellerKyc {
            national_id_number: Some("GHA-000111".into()),
            nationality: Some("Ghanaian".into()),
            ..SellerKyc::default()
        },
        documents: vec![
            UploadItem::new(DocumentKind::Selfie, Bytes::from_static(b"selfie"), None),
            UploadItem::new(DocumentKind::IdFront, Bytes::from_static(b"front"), None),
            UploadItem::new(DocumentKind::IdBack, Bytes::from_static(b"back"), None),
        ],
        ..buyer(email)
    }
}

fn failure<T>(res: AppResult<T>) -> AppError {
    match res {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    }
}

/// Pulls the `token=` query value out of the last mail sent to `to`.
fn mailed_token(h: &Harness, to: &str) -> String {
    let mail = h.mailer.last_to(to).expect("no mail sent");
    let start = mail.html.find("token=").expect("no token in mail") + "token=".len();
    mail.html[start..]
        .chars()
        .take_while(|c| *c != '"' && *c != '<')
        .collect()
}

#[tokio::test]
async fn buyer_registration_commits_an_active_account() {
    let (h, svc) = setup();
    let pending = svc.register(buyer("Ama@Example.com ")).await.unwrap();
    assert_eq!(pending.email, "ama@example.com");
    assert_eq!(h.users.count(), 0);
    assert!(h.staging.contains(&registration_key("ama@example.com")));

    let token = mailed_token(&h, "ama@example.com");
    let session = svc.verify_email(&token).await.unwrap();

    assert!(session.user.is_active);
    assert!(!session.user.pending_verification);
    assert_eq!(session.user.role, Role::Buyer);
    assert!(!session.tokens.access_token.is_empty());
    assert_eq!(h.users.count(), 1);
    assert!(!h.staging.contains(&registration_key("ama@example.com")));
    assert!(!h.staging.contains(&token_key(&token)));
}

#[tokio::test]
async fn seller_registration_keeps_kyc_and_waits_for_review() {
    let (h, svc) = setup();
    svc.register(seller("kofi@example.com")).await.unwrap();
    assert_eq!(h.storage.live_keys().len(), 3);

    let token = mailed_token(&h, "kofi@example.com");
    let session = svc.verify_email(&token).await.unwrap();
    assert!(!session.user.is_active);
    assert!(session.user.pending_verification);

    let user = h
        .users
        .find_by_email("kofi@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.kyc.national_id_number.as_deref(), Some("GHA-000111"));
    let selfie = user.kyc.selfie_url.unwrap();
    assert!(selfie.starts_with("https://fake.local/"));
    assert!(user.kyc.id_front_url.is_some());
    assert!(user.kyc.id_back_url.is_some());
    // Documents outlive verification.
    assert_eq!(h.storage.live_keys().len(), 3);
}

#[tokio::test]
async fn buyer_documents_are_not_uploaded() {
    let (h, svc) = setup();
    let mut input = seller("b@example.com");
    input.role = Role::Buyer;
    svc.register(input).await.unwrap();
    assert!(h.storage.uploaded_keys().is_empty());
}

#[tokio::test]
async fn failed_verification_email_rolls_everything_back() {
    let (h, svc) = setup();
    h.mailer.fail(true);

    let err = failure(svc.register(seller("kofi@example.com")).await);
    assert!(matches!(err, AppError::Dependency(_)));

    assert_eq!(h.storage.uploaded_keys().len(), 3);
    assert!(h.storage.live_keys().is_empty());
    assert!(!h.staging.contains(&registration_key("kofi@example.com")));
    assert_eq!(h.users.count(), 0);

    // The email is free again once the mailer recovers.
    h.mailer.fail(false);
    svc.register(seller("kofi@example.com")).await.unwrap();
}

#[tokio::test]
async fn staging_failure_discards_uploaded_documents() {
    let (h, svc) = setup();
    h.staging.fail_writes(true);

    let err = failure(svc.register(seller("kofi@example.com")).await);
    assert!(matches!(err, AppError::Dependency(_)));
    assert!(h.storage.live_keys().is_empty());
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn storage_failure_aborts_before_staging() {
    let (h, svc) = setup();
    h.storage.fail_puts(true);

    let err = failure(svc.register(seller("kofi@example.com")).await);
    assert!(matches!(err, AppError::Dependency(_)));
    assert!(!h.staging.contains(&registration_key("kofi@example.com")));
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn registration_rejects_bad_input() {
    let (_h, svc) = setup();

    let mut admin = buyer("root@example.com");
    admin.role = Role::Admin;
    assert!(matches!(
        failure(svc.register(admin).await),
        AppError::Validation(_)
    ));

    let mut short = buyer("a@example.com");
    short.password = "short".into();
    assert!(matches!(
        failure(svc.register(short).await),
        AppError::Validation(_)
    ));

    assert!(matches!(
        failure(svc.register(buyer("not-an-email")).await),
        AppError::Validation(_)
    ));

    let mut odd_doc = seller("s@example.com");
    odd_doc.documents.push(UploadItem::new(
        DocumentKind::Survey,
        Bytes::from_static(b"x"),
        Some("application/pdf".into()),
    ));
    assert!(matches!(
        failure(svc.register(odd_doc).await),
        AppError::Validation(_)
    ));
}

#[tokio::test]
async fn live_staged_registration_blocks_a_second_one() {
    let (h, svc) = setup();
    svc.register(buyer("ama@example.com")).await.unwrap();

    let err = failure(svc.register(buyer("ama@example.com")).await);
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(h.mailer.sent().len(), 1);
}

#[tokio::test]
async fn stale_staged_registration_is_reclaimed() {
    let (h, svc) = setup();
    svc.register(seller("kofi@example.com")).await.unwrap();
    let old_token = mailed_token(&h, "kofi@example.com");

    // Past the logical lifetime but still inside the cache grace window.
    h.clock.advance(Duration::seconds(630));
    svc.register(seller("kofi@example.com")).await.unwrap();

    assert!(!h.staging.contains(&token_key(&old_token)));
    assert_eq!(h.storage.live_keys().len(), 3);
    assert_eq!(h.storage.uploaded_keys().len(), 6);
}

#[tokio::test]
async fn registered_email_cannot_register_again() {
    let (h, svc) = setup();
    svc.register(buyer("ama@example.com")).await.unwrap();
    let token = mailed_token(&h, "ama@example.com");
    svc.verify_email(&token).await.unwrap();

    let err = failure(svc.register(buyer("AMA@example.com")).await);
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn unknown_token_creates_nothing() {
    let (h, svc) = setup();
    svc.register(buyer("ama@example.com")).await.unwrap();

    let err = failure(svc.verify_email("00000000-0000-0000-0000-000000000000").await);
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(matches!(
        failure(svc.verify_email("  ").await),
        AppError::Validation(_)
    ));
    assert_eq!(h.users.count(), 0);
}

#[tokio::test]
async fn expired_token_fails_and_cleans_up() {
    let (h, svc) = setup();
    svc.register(seller("kofi@example.com")).await.unwrap();
    let token = mailed_token(&h, "kofi@example.com");

    h.clock.advance(Duration::seconds(601));
    let err = failure(svc.verify_email(&token).await);
    assert!(matches!(err, AppError::Expired(_)));

    assert_eq!(h.users.count(), 0);
    assert!(h.storage.live_keys().is_empty());
    assert!(!h.staging.contains(&registration_key("kofi@example.com")));

    // A retry after cleanup is simply unknown.
    let err = failure(svc.verify_email(&token).await);
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn token_verifies_only_once() {
    let (h, svc) = setup();
    svc.register(buyer("ama@example.com")).await.unwrap();
    let token = mailed_token(&h, "ama@example.com");

    svc.verify_email(&token).await.unwrap();
    let err = failure(svc.verify_email(&token).await);
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.users.count(), 1);
}

#[tokio::test]
async fn failed_commit_purges_the_staged_registration() {
    let (h, svc) = setup();
    svc.register(seller("kofi@example.com")).await.unwrap();
    let token = mailed_token(&h, "kofi@example.com");

    h.users.fail_inserts(true);
    let err = failure(svc.verify_email(&token).await);
    assert!(matches!(err, AppError::Dependency(_)));
    assert!(!h.staging.contains(&registration_key("kofi@example.com")));
    assert!(h.storage.live_keys().is_empty());
}

#[tokio::test]
async fn resend_invalidates_the_previous_link() {
    let (h, svc) = setup();
    svc.register(buyer("ama@example.com")).await.unwrap();
    let first = mailed_token(&h, "ama@example.com");

    h.clock.advance(Duration::seconds(300));
    let pending = svc.resend_verification("ama@example.com").await.unwrap();
    let second = mailed_token(&h, "ama@example.com");
    assert_ne!(first, second);
    assert_eq!(h.mailer.sent().len(), 2);

    // The new link runs for a full lifetime from the resend.
    h.clock.advance(Duration::seconds(400));
    assert!(pending.expires_at > h.clock.now());

    assert!(matches!(
        failure(svc.verify_email(&first).await),
        AppError::NotFound(_)
    ));
    svc.verify_email(&second).await.unwrap();
}

#[tokio::test]
async fn resend_without_pending_registration_is_not_found() {
    let (_h, svc) = setup();
    let err = failure(svc.resend_verification("ghost@example.com").await);
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn resend_after_expiry_discards_the_registration() {
    let (h, svc) = setup();
    svc.register(seller("kofi@example.com")).await.unwrap();
    let token = mailed_token(&h, "kofi@example.com");
    assert_eq!(h.storage.live_keys().len(), 3);

    h.clock.advance(Duration::seconds(601));
    let err = failure(svc.resend_verification("kofi@example.com").await);
    assert!(matches!(err, AppError::Expired(_)));

    assert!(!h.staging.contains(&registration_key("kofi@example.com")));
    assert!(!h.staging.contains(&token_key(&token)));
    assert!(h.storage.live_keys().is_empty());
    assert_eq!(h.mailer.sent().len(), 1);
    svc.register(seller("kofi@example.com")).await.unwrap();
}

#[tokio::test]
async fn resend_mail_failure_is_a_dependency_error() {
    let (h, svc) = setup();
    svc.register(buyer("ama@example.com")).await.unwrap();
    h.mailer.fail(true);
    let err = failure(svc.resend_verification("ama@example.com").await);
    assert!(matches!(err, AppError::Dependency(_)));
    assert_eq!(h.users.count(), 0);
}

async fn verified_buyer(h: &Harness, svc: &OnboardingService, email: &str) {
    svc.register(buyer(email)).await.unwrap();
    let token = mailed_token(h, email);
    svc.verify_email(&token).await.unwrap();
}

#[tokio::test]
async fn login_checks_credentials_and_activation() {
    let (h, svc) = setup();
    verified_buyer(&h, &svc, "ama@example.com").await;

    assert!(matches!(
        failure(svc.login("ghost@example.com", PASSWORD).await),
        AppError::NotFound(_)
    ));
    assert!(matches!(
        failure(svc.login("ama@example.com", "wrong-password").await),
        AppError::Unauthorized(_)
    ));

    let session = svc.login("AMA@example.com", PASSWORD).await.unwrap();
    assert_eq!(session.user.email, "ama@example.com");
    let user = h.users.find_by_email("ama@example.com").await.unwrap().unwrap();
    assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn unreviewed_seller_cannot_log_in() {
    let (h, svc) = setup();
    svc.register(seller("kofi@example.com")).await.unwrap();
    let token = mailed_token(&h, "kofi@example.com");
    svc.verify_email(&token).await.unwrap();

    let err = failure(svc.login("kofi@example.com", PASSWORD).await);
    match err {
        AppError::Unauthorized(msg) => assert!(msg.contains("not active")),
        other => panic!("unexpected error: {other:?}"),
    }
}

fn admin_seed() -> AdminSeed {
    AdminSeed {
        email: "Admin@Registry.example".into(),
        password: "admin-password".into(),
        first_name: "Admin".into(),
        last_name: "User".into(),
    }
}

async fn seeded_admin(h: &Harness, svc: &OnboardingService) -> Uuid {
    svc.ensure_admin(&admin_seed()).await.unwrap();
    h.users
        .find_by_email("admin@registry.example")
        .await
        .unwrap()
        .expect("admin seeded")
        .id
}

#[tokio::test]
async fn admin_seed_is_created_once_and_can_log_in() {
    let (h, svc) = setup();
    assert!(svc.ensure_admin(&admin_seed()).await.unwrap());
    assert!(!svc.ensure_admin(&admin_seed()).await.unwrap());
    assert_eq!(h.users.count(), 1);

    let session = svc
        .login("admin@registry.example", "admin-password")
        .await
        .unwrap();
    assert_eq!(session.user.role, Role::Admin);
    assert!(session.user.is_active);

    let weak = AdminSeed {
        password: "short".into(),
        ..admin_seed()
    };
    assert!(matches!(
        failure(svc.ensure_admin(&weak).await),
        AppError::Validation(_)
    ));
}

#[tokio::test]
async fn activated_seller_can_log_in() {
    let (h, svc) = setup();
    let admin = seeded_admin(&h, &svc).await;
    svc.register(seller("kofi@example.com")).await.unwrap();
    let token = mailed_token(&h, "kofi@example.com");
    let seller_id = svc.verify_email(&token).await.unwrap().user.id;
    assert!(failure(svc.login("kofi@example.com", PASSWORD).await)
        .to_string()
        .contains("not active"));

    let activated = svc.activate_seller(seller_id, admin).await.unwrap();
    assert!(activated.is_active);
    assert!(!activated.pending_verification);

    let session = svc.login("kofi@example.com", PASSWORD).await.unwrap();
    assert_eq!(session.user.id, seller_id);
}

#[tokio::test]
async fn only_admins_activate_sellers() {
    let (h, svc) = setup();
    let admin = seeded_admin(&h, &svc).await;
    verified_buyer(&h, &svc, "ama@example.com").await;
    let buyer_id = h
        .users
        .find_by_email("ama@example.com")
        .await
        .unwrap()
        .unwrap()
        .id;
    svc.register(seller("kofi@example.com")).await.unwrap();
    let token = mailed_token(&h, "kofi@example.com");
    let seller_id = svc.verify_email(&token).await.unwrap().user.id;

    assert!(matches!(
        failure(svc.activate_seller(seller_id, buyer_id).await),
        AppError::Unauthorized(_)
    ));
    assert!(matches!(
        failure(svc.activate_seller(seller_id, seller_id).await),
        AppError::Unauthorized(_)
    ));
    assert!(matches!(
        failure(svc.activate_seller(buyer_id, admin).await),
        AppError::NotFound(_)
    ));
    let still_pending = h.users.find_by_id(seller_id).await.unwrap().unwrap();
    assert!(!still_pending.is_active);
}

#[tokio::test]
async fn refresh_then_logout_revokes_the_refresh_token() {
    let (h, svc) = setup();
    verified_buyer(&h, &svc, "ama@example.com").await;
    let session = svc.login("ama@example.com", PASSWORD).await.unwrap();
    let refresh_token = session.tokens.refresh_token;

    let tokens = svc.refresh(&refresh_token).await.unwrap();
    assert_eq!(tokens.refresh_token, refresh_token);
    assert!(!tokens.access_token.is_empty());

    svc.logout(&refresh_token).await.unwrap();
    assert!(matches!(
        failure(svc.refresh(&refresh_token).await),
        AppError::Unauthorized(_)
    ));
}

#[tokio::test]
async fn access_token_is_not_a_refresh_token() {
    let (h, svc) = setup();
    verified_buyer(&h, &svc, "ama@example.com").await;
    let session = svc.login("ama@example.com", PASSWORD).await.unwrap();

    assert!(matches!(
        failure(svc.refresh(&session.tokens.access_token).await),
        AppError::Unauthorized(_)
    ));
    // Garbage still logs out cleanly.
    svc.logout("garbage").await.unwrap();
    assert!(matches!(
        failure(svc.logout("").await),
        AppError::Unauthorized(_)
    ));
}

#[tokio::test]
async fn password_reset_round_trip() {
    let (h, svc) = setup();
    verified_buyer(&h, &svc, "ama@example.com").await;

    svc.forgot_password("ama@example.com").await.unwrap();
    let token = mailed_token(&h, "ama@example.com");

    assert!(matches!(
        failure(svc.reset_password(&token, "short").await),
        AppError::Validation(_)
    ));
    svc.reset_password(&token, "new-password-1").await.unwrap();

    svc.login("ama@example.com", "new-password-1").await.unwrap();
    assert!(matches!(
        failure(svc.login("ama@example.com", PASSWORD).await),
        AppError::Unauthorized(_)
    ));
    assert!(matches!(
        failure(svc.reset_password(&token, "another-pass").await),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn password_reset_does_not_activate_an_unreviewed_seller() {
    let (h, svc) = setup();
    svc.register(seller("kofi@example.com")).await.unwrap();
    let token = mailed_token(&h, "kofi@example.com");
    svc.verify_email(&token).await.unwrap();

    svc.forgot_password("kofi@example.com").await.unwrap();
    let reset = mailed_token(&h, "kofi@example.com");
    svc.reset_password(&reset, "new-password-1").await.unwrap();
    assert!(matches!(
        failure(svc.login("kofi@example.com", "new-password-1").await),
        AppError::Unauthorized(_)
    ));
}

#[tokio::test]
async fn expired_reset_token_is_cleared() {
    let (h, svc) = setup();
    verified_buyer(&h, &svc, "ama@example.com").await;
    svc.forgot_password("ama@example.com").await.unwrap();
    let token = mailed_token(&h, "ama@example.com");

    h.clock.advance(Duration::seconds(601));
    assert!(matches!(
        failure(svc.reset_password(&token, "new-password-1").await),
        AppError::Expired(_)
    ));
    assert!(matches!(
        failure(svc.reset_password(&token, "new-password-1").await),
        AppError::NotFound(_)
    ));
    svc.login("ama@example.com", PASSWORD).await.unwrap();
}

#[tokio::test]
async fn forgot_password_for_unknown_email_is_not_found() {
    let (h, svc) = setup();
    let err = failure(svc.forgot_password("ghost@example.com").await);
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(h.mailer.sent().is_empty());
}

#[tokio::test]
async fn me_returns_the_public_profile() {
    let (h, svc) = setup();
    verified_buyer(&h, &svc, "ama@example.com").await;
    let user = h.users.find_by_email("ama@example.com").await.unwrap().unwrap();

    let me = svc.me(user.id).await.unwrap();
    assert_eq!(me.id, user.id);
    assert_eq!(me.first_name, "Ama");
    let json = serde_json::to_value(&me).unwrap();
    assert!(json.get("passwordHash").is_none());
}
