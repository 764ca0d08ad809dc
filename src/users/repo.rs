use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, User, UserRow};
use crate::error::{RepoError, RepoResult};

/// Durable user records. Every read skips soft-deleted rows.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn find_by_reset_token(&self, token: &str) -> RepoResult<Option<User>>;

    /// Fails with `RepoError::AlreadyExists` when the email is taken.
    async fn insert(&self, user: NewUser) -> RepoResult<User>;

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> RepoResult<()>;

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> RepoResult<()>;

    /// Swaps the password and clears the reset token in one statement, provided the
    /// token is still present and unexpired at `now`. An account that had no password
    /// yet is activated by the same statement.
    async fn complete_reset(
        &self,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> RepoResult<bool>;

    async fn clear_reset_token(&self, id: Uuid) -> RepoResult<()>;

    /// Marks a seller account reviewed and active. `None` when `id` is not a live seller.
    async fn activate_seller(&self, id: Uuid, at: OffsetDateTime) -> RepoResult<Option<User>>;
}

const USER_COLUMNS: &str = r#"
    id, email, password_hash, first_name, last_name, phone, role, is_active,
    pending_verification, surname, other_names, nationality, date_of_birth,
    national_id_number, selfie_url, id_front_url, id_back_url, reset_token,
    reset_expires_at, last_login_at, deleted_at, created_at, updated_at
"#;

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> RepoResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {clause} = $1 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?
            .map(User::try_from)
            .transpose()
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        self.fetch_one_where("email", email).await
    }

    async fn find_by_reset_token(&self, token: &str) -> RepoResult<Option<User>> {
        self.fetch_one_where("reset_token", token).await
    }

    async fn insert(&self, u: NewUser) -> RepoResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (
                id, email, password_hash, first_name, last_name, phone, role, is_active,
                pending_verification, surname, other_names, nationality, date_of_birth,
                national_id_number, selfie_url, id_front_url, id_back_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $18)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(u.id)
            .bind(&u.email)
            .bind(&u.password_hash)
            .bind(&u.first_name)
            .bind(&u.last_name)
            .bind(&u.phone)
            .bind(u.role.as_str())
            .bind(u.is_active)
            .bind(u.pending_verification)
            .bind(&u.kyc.surname)
            .bind(&u.kyc.other_names)
            .bind(&u.kyc.nationality)
            .bind(u.kyc.date_of_birth)
            .bind(&u.kyc.national_id_number)
            .bind(&u.kyc.selfie_url)
            .bind(&u.kyc.id_front_url)
            .bind(&u.kyc.id_back_url)
            .bind(u.created_at)
            .fetch_one(&self.db)
            .await
            .map_err(RepoError::from_insert)?;
        User::try_from(row)
    }

    async fn record_login(&self, id: Uuid, at: OffsetDateTime) -> RepoResult<()> {
        sqlx::query(r#"UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1"#)
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> RepoResult<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET reset_token = $2, reset_expires_at = $3, updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn complete_reset(
        &self,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> RepoResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2,
                   is_active = is_active OR password_hash IS NULL,
                   reset_token = NULL,
                   reset_expires_at = NULL,
                   updated_at = $3
             WHERE reset_token = $1 AND reset_expires_at > $3 AND deleted_at IS NULL
            "#,
        )
        .bind(token)
        .bind(password_hash)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn clear_reset_token(&self, id: Uuid) -> RepoResult<()> {
        sqlx::query(
            r#"UPDATE users SET reset_token = NULL, reset_expires_at = NULL, updated_at = now() WHERE id = $1"#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn activate_seller(&self, id: Uuid, at: OffsetDateTime) -> RepoResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
               SET is_active = TRUE, pending_verification = FALSE, updated_at = $2
             WHERE id = $1 AND role = 'seller' AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(at)
            .fetch_optional(&self.db)
            .await?
            .map(User::try_from)
            .transpose()
    }
}
