//! AccountService: identities, sessions, profiles and role assignments.
//!
//! Signup is the only way identities, profiles and the default `user` role
//! come into existence, and all three are written in one transaction.

use crate::{
    auth::{
        Caller,
        jwt::{JwtError, TokenKeys, TokenType},
        password::{self, PasswordError},
    },
    constants::{MAX_NAME_CHARS, MIN_PASSWORD_LEN},
    models::user::{Identity, Profile, Role, RoleAssignment, SessionUser},
    policy,
    services::storage_service::is_unique_violation,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("invalid or expired session")]
    InvalidSession,
    #[error("admin role required")]
    Forbidden,
    #[error("profile not found")]
    ProfileNotFound,
    #[error("user `{0}` not found")]
    UserNotFound(String),
    #[error("user already has role `{0}`")]
    RoleAlreadyAssigned(Role),
    #[error("user does not have role `{0}`")]
    RoleNotAssigned(Role),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type AccountResult<T> = Result<T, AccountError>;

/// Tokens handed to a client after signup, login or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: SessionUser,
}

/// What `GET /auth/session` reports about the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub user: SessionUser,
    pub profile: Profile,
    pub roles: Vec<Role>,
}

const IDENTITY_COLUMNS: &str = "id, email, password_hash, created_at";
const PROFILE_COLUMNS: &str = "id, email, display_name, created_at";
const ROLE_COLUMNS: &str = "id, user_id, role, created_at";

#[derive(Clone)]
pub struct AccountService {
    db: SqlitePool,
    tokens: TokenKeys,
}

impl AccountService {
    pub fn new(db: SqlitePool, tokens: TokenKeys) -> Self {
        Self { db, tokens }
    }

    /// Create an identity together with its profile and default role.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
    ) -> AccountResult<Session> {
        let email = normalize_email(email)?;
        validate_password(password)?;
        let display_name = validate_display_name(display_name)?;

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&password)).await??;

        let identity = Identity {
            id: Uuid::new_v4(),
            email,
            password_hash,
            created_at: Utc::now(),
        };

        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.password_hash)
        .bind(identity.created_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(AccountError::EmailTaken),
            Err(err) => return Err(err.into()),
        }

        sqlx::query("INSERT INTO profiles (id, email, display_name, created_at) VALUES (?, ?, ?, ?)")
            .bind(identity.id)
            .bind(&identity.email)
            .bind(&display_name)
            .bind(identity.created_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO user_roles (id, user_id, role, created_at) VALUES (?, ?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(identity.id)
            .bind(Role::User)
            .bind(identity.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(user_id = %identity.id, "new account for {}", identity.email);

        self.issue_session(&identity)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AccountResult<Session> {
        let email = email.trim().to_ascii_lowercase();
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(&email)
        .fetch_optional(&self.db)
        .await?;

        // Unknown emails still pay for one verification.
        let hash = match &identity {
            Some(identity) => identity.password_hash.clone(),
            None => decoy_hash().await?.to_string(),
        };
        let password = password.to_string();
        let valid =
            tokio::task::spawn_blocking(move || password::verify_password(&password, &hash)).await??;
        let identity = match identity {
            Some(identity) if valid => identity,
            _ => return Err(AccountError::InvalidCredentials),
        };

        info!(user_id = %identity.id, "signed in");
        self.issue_session(&identity)
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh(&self, refresh_token: &str) -> AccountResult<Session> {
        let claims = self
            .tokens
            .verify(refresh_token, TokenType::Refresh)
            .map_err(|_| AccountError::InvalidSession)?;
        let identity = self
            .find_identity(claims.sub)
            .await?
            .ok_or(AccountError::InvalidSession)?;
        self.issue_session(&identity)
    }

    pub async fn session_info(&self, caller: &Caller) -> AccountResult<SessionInfo> {
        let identity = self
            .find_identity(caller.user_id)
            .await?
            .ok_or(AccountError::InvalidSession)?;
        let profile = self.get_profile(caller).await?;
        let roles = self.roles_of(caller.user_id).await?;
        Ok(SessionInfo {
            user: SessionUser::from(&identity),
            profile,
            roles,
        })
    }

    pub async fn get_profile(&self, caller: &Caller) -> AccountResult<Profile> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?"
        ))
        .bind(caller.user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AccountError::ProfileNotFound)
    }

    /// Set or clear the caller's display name.
    pub async fn update_display_name(
        &self,
        caller: &Caller,
        display_name: Option<String>,
    ) -> AccountResult<Profile> {
        let display_name = validate_display_name(display_name)?;
        sqlx::query_as::<_, Profile>(&format!(
            "UPDATE profiles SET display_name = ? WHERE id = ? RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(display_name)
        .bind(caller.user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AccountError::ProfileNotFound)
    }

    pub async fn has_role(&self, user_id: Uuid, role: Role) -> AccountResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_roles WHERE user_id = ? AND role = ?)",
        )
        .bind(user_id)
        .bind(role)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn roles_of(&self, user_id: Uuid) -> AccountResult<Vec<Role>> {
        let roles = sqlx::query_scalar::<_, Role>(
            "SELECT role FROM user_roles WHERE user_id = ? ORDER BY role",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(roles)
    }

    /// Role rows the caller may see: their own, or all of them for admins.
    pub async fn visible_roles(&self, caller: &Caller) -> AccountResult<Vec<RoleAssignment>> {
        let caller_roles = self.roles_of(caller.user_id).await?;
        let rows = if policy::can_manage_roles(&caller_roles) {
            sqlx::query_as::<_, RoleAssignment>(&format!(
                "SELECT {ROLE_COLUMNS} FROM user_roles ORDER BY created_at, id"
            ))
            .fetch_all(&self.db)
            .await?
        } else {
            sqlx::query_as::<_, RoleAssignment>(&format!(
                "SELECT {ROLE_COLUMNS} FROM user_roles WHERE user_id = ? ORDER BY created_at, id"
            ))
            .bind(caller.user_id)
            .fetch_all(&self.db)
            .await?
        };
        Ok(rows
            .into_iter()
            .filter(|row| policy::can_view_role_row(caller, &caller_roles, row.user_id))
            .collect())
    }

    pub async fn grant_role(
        &self,
        caller: &Caller,
        user_id: Uuid,
        role: Role,
    ) -> AccountResult<RoleAssignment> {
        self.require_role_manager(caller).await?;
        let assignment = self.insert_role(user_id, role).await?;
        info!(by = %caller.user_id, user_id = %user_id, "granted role {}", role);
        Ok(assignment)
    }

    pub async fn revoke_role(&self, caller: &Caller, user_id: Uuid, role: Role) -> AccountResult<()> {
        self.require_role_manager(caller).await?;
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role = ?")
            .bind(user_id)
            .bind(role)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AccountError::RoleNotAssigned(role));
        }
        info!(by = %caller.user_id, user_id = %user_id, "revoked role {}", role);
        Ok(())
    }

    /// Operator path used by `--grant-admin`; bypasses the caller check.
    pub async fn grant_admin_by_email(&self, email: &str) -> AccountResult<RoleAssignment> {
        let email = email.trim().to_ascii_lowercase();
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(&email)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AccountError::UserNotFound(email.clone()))?;
        self.insert_role(identity.id, Role::Admin).await
    }

    async fn require_role_manager(&self, caller: &Caller) -> AccountResult<()> {
        let caller_roles = self.roles_of(caller.user_id).await?;
        if policy::can_manage_roles(&caller_roles) {
            Ok(())
        } else {
            Err(AccountError::Forbidden)
        }
    }

    async fn insert_role(&self, user_id: Uuid, role: Role) -> AccountResult<RoleAssignment> {
        if self.find_identity(user_id).await?.is_none() {
            return Err(AccountError::UserNotFound(user_id.to_string()));
        }
        let inserted = sqlx::query_as::<_, RoleAssignment>(&format!(
            "INSERT INTO user_roles ({ROLE_COLUMNS}) VALUES (?, ?, ?, ?) RETURNING {ROLE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(role)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await;
        match inserted {
            Ok(row) => Ok(row),
            Err(err) if is_unique_violation(&err) => Err(AccountError::RoleAlreadyAssigned(role)),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_identity(&self, user_id: Uuid) -> AccountResult<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(identity)
    }

    fn issue_session(&self, identity: &Identity) -> AccountResult<Session> {
        Ok(Session {
            access_token: self
                .tokens
                .issue(identity.id, &identity.email, TokenType::Access)?,
            refresh_token: self
                .tokens
                .issue(identity.id, &identity.email, TokenType::Refresh)?,
            token_type: "bearer",
            expires_in: self.tokens.access_ttl_secs(),
            user: SessionUser::from(identity),
        })
    }
}

/// Hash verified against when a login names an unknown email.
async fn decoy_hash() -> AccountResult<&'static str> {
    static DECOY: OnceCell<String> = OnceCell::const_new();
    let hash = DECOY
        .get_or_try_init(|| async {
            let hash =
                tokio::task::spawn_blocking(|| password::hash_password("not-a-real-password"))
                    .await??;
            Ok::<_, AccountError>(hash)
        })
        .await?;
    Ok(hash.as_str())
}

fn normalize_email(email: &str) -> AccountResult<String> {
    let email = email.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AccountError::InvalidInput("a valid email address is required".into()))
    }
}

fn validate_password(password: &str) -> AccountResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

fn validate_display_name(display_name: Option<String>) -> AccountResult<Option<String>> {
    let display_name = display_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    if display_name
        .as_ref()
        .is_some_and(|n| n.chars().count() > MAX_NAME_CHARS)
    {
        return Err(AccountError::InvalidInput(format!(
            "display_name must be at most {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(display_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decoy_hash_is_reused_and_matches_nothing() {
        let first = decoy_hash().await.unwrap();
        let second = decoy_hash().await.unwrap();
        assert_eq!(first, second);
        assert!(!password::verify_password("hunter22", first).unwrap());
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Reader@Example.COM ").unwrap(), "reader@example.com");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "reader", "@example.com", "reader@", "a@b@c", "re ader@example.com"] {
            assert!(normalize_email(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
    }

    #[test]
    fn blank_display_name_becomes_none() {
        assert_eq!(validate_display_name(Some("   ".into())).unwrap(), None);
        assert_eq!(
            validate_display_name(Some(" Ada ".into())).unwrap(),
            Some("Ada".into())
        );
        assert!(validate_display_name(Some("x".repeat(MAX_NAME_CHARS + 1))).is_err());
    }
}
