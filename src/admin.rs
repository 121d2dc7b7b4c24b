//! Administrator-only user management. The primary "admin" account is
//! protected from deletion, privilege toggles, and password resets by
//! other administrators.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Form, Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::auth::{self, AuthUser};
use crate::routes::{notice, AppState, Notice};

pub const PRIMARY_ADMIN: &str = "admin";

#[derive(Debug, Serialize, FromRow)]
pub struct UserDto {
    pub id: i64,
    pub username: String,
    pub is_admin: bool,
}

pub fn is_primary_admin(username: &str) -> bool {
    username == PRIMARY_ADMIN
}

fn require_admin(user: &AuthUser) -> Result<(), (StatusCode, String)> {
    if user.is_admin {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, "ต้องเป็นผู้ดูแลระบบ".to_string()))
    }
}

async fn load_target_user(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<UserDto, (StatusCode, String)> {
    let row: Option<UserDto> =
        sqlx::query_as("SELECT id, username, is_admin FROM user WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    row.ok_or((StatusCode::NOT_FOUND, "user not found".to_string()))
}

pub async fn list_users_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<UserDto>>, (StatusCode, String)> {
    require_admin(&user)?;
    let rows: Vec<UserDto> =
        sqlx::query_as("SELECT id, username, is_admin FROM user ORDER BY username")
            .fetch_all(&state.pool)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserForm {
    pub username: Option<String>,
    pub password: Option<String>,
    pub is_admin: Option<String>, // checkbox: any value counts as set
}

pub async fn create_user_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Form(form): Form<CreateUserForm>,
) -> Result<(StatusCode, Json<UserDto>), (StatusCode, String)> {
    require_admin(&user)?;
    let username = form.username.as_deref().unwrap_or("").trim().to_string();
    let password = form.password.unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "กรุณากรอกชื่อผู้ใช้และรหัสผ่าน".to_string(),
        ));
    }
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM user WHERE username = ?")
        .bind(&username)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    if existing.is_some() {
        return Err((StatusCode::CONFLICT, "ชื่อผู้ใช้นี้มีอยู่แล้ว".to_string()));
    }

    let is_admin = form.is_admin.is_some();
    let hash = auth::hash_password(&password)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("hash error: {e}")))?;
    let created: UserDto = sqlx::query_as(
        "INSERT INTO user (username, password_hash, is_admin) VALUES (?, ?, ?) \
         RETURNING id, username, is_admin",
    )
    .bind(&username)
    .bind(hash)
    .bind(is_admin)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Deleting a user cascades to all owned entries, in one transaction.
pub async fn delete_user_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<i64>,
) -> Result<Json<Notice>, (StatusCode, String)> {
    require_admin(&user)?;
    let target = load_target_user(&state.pool, user_id).await?;
    if is_primary_admin(&target.username) {
        return Err((
            StatusCode::FORBIDDEN,
            "ไม่สามารถลบ admin หลักได้".to_string(),
        ));
    }
    delete_user_db(&state.pool, user_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(notice("ลบสมาชิกเรียบร้อย"))
}

pub async fn delete_user_db(pool: &SqlitePool, user_id: i64) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM entry WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM user WHERE id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn toggle_admin_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<i64>,
) -> Result<Json<Notice>, (StatusCode, String)> {
    require_admin(&user)?;
    let target = load_target_user(&state.pool, user_id).await?;
    if is_primary_admin(&target.username) {
        return Err((
            StatusCode::FORBIDDEN,
            "ไม่สามารถเปลี่ยนสิทธิ์ admin หลักได้".to_string(),
        ));
    }
    sqlx::query("UPDATE user SET is_admin = NOT is_admin WHERE id = ?")
        .bind(user_id)
        .execute(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(notice("ปรับสิทธิ์เรียบร้อย"))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordForm {
    pub new_password: Option<String>,
}

pub async fn reset_password_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<i64>,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Json<Notice>, (StatusCode, String)> {
    require_admin(&user)?;
    let target = load_target_user(&state.pool, user_id).await?;
    if is_primary_admin(&target.username) {
        return Err((
            StatusCode::FORBIDDEN,
            "ไม่สามารถรีเซ็ตรหัสผ่าน admin หลักได้".to_string(),
        ));
    }
    let new_pw = form.new_password.as_deref().unwrap_or("").trim().to_string();
    if new_pw.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "กรุณากรอกรหัสผ่านใหม่".to_string(),
        ));
    }
    let hash = auth::hash_password(&new_pw)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("hash error: {e}")))?;
    sqlx::query("UPDATE user SET password_hash = ? WHERE id = ?")
        .bind(hash)
        .bind(user_id)
        .execute(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(notice("รีเซ็ตรหัสผ่านเรียบร้อย"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, test_user};
    use crate::entries::{fetch_entry_db, insert_entry_db};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn acting(user_id: i64, username: &str, is_admin: bool) -> AuthUser {
        AuthUser {
            user_id,
            username: username.to_string(),
            is_admin,
        }
    }

    #[test]
    fn only_the_admin_handle_is_protected() {
        assert!(is_primary_admin("admin"));
        assert!(!is_primary_admin("admin2"));
        assert!(!is_primary_admin("Admin"));
    }

    #[tokio::test]
    async fn non_admins_are_turned_away() {
        let pool = test_pool().await;
        let uid = test_user(&pool, "pleb", false).await;
        let state = AppState { pool };
        let err = list_users_handler(State(state), Extension(acting(uid, "pleb", false)))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_to_their_entries() {
        let pool = test_pool().await;
        let admin_id = test_user(&pool, "admin", true).await;
        let victim = test_user(&pool, "victim", false).await;
        let stamp = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let entry = insert_entry_db(&pool, victim, true, Some("a"), None, 5.0, None, stamp)
            .await
            .unwrap();

        let state = AppState { pool: pool.clone() };
        delete_user_handler(
            State(state),
            Extension(acting(admin_id, "admin", true)),
            Path(victim),
        )
        .await
        .unwrap();

        assert!(fetch_entry_db(&pool, entry.id).await.unwrap().is_none());
        let gone: Option<i64> = sqlx::query_scalar("SELECT id FROM user WHERE id = ?")
            .bind(victim)
            .fetch_optional(&pool)
            .await
            .unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn the_primary_admin_cannot_be_deleted_or_toggled() {
        let pool = test_pool().await;
        let admin_id = test_user(&pool, "admin", true).await;
        let other_admin = test_user(&pool, "boss", true).await;
        let state = AppState { pool: pool.clone() };

        let err = delete_user_handler(
            State(state.clone()),
            Extension(acting(other_admin, "boss", true)),
            Path(admin_id),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let err = toggle_admin_handler(
            State(state.clone()),
            Extension(acting(other_admin, "boss", true)),
            Path(admin_id),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let err = reset_password_handler(
            State(state),
            Extension(acting(other_admin, "boss", true)),
            Path(admin_id),
            Form(ResetPasswordForm {
                new_password: Some("hacked".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        // still present and still an admin
        let row: UserDto = sqlx::query_as("SELECT id, username, is_admin FROM user WHERE id = ?")
            .bind(admin_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(row.is_admin);
    }

    #[tokio::test]
    async fn toggling_flips_the_flag_for_ordinary_users() {
        let pool = test_pool().await;
        let admin_id = test_user(&pool, "admin", true).await;
        let uid = test_user(&pool, "worker", false).await;
        let state = AppState { pool: pool.clone() };

        toggle_admin_handler(
            State(state),
            Extension(acting(admin_id, "admin", true)),
            Path(uid),
        )
        .await
        .unwrap();

        let flag: bool = sqlx::query_scalar("SELECT is_admin FROM user WHERE id = ?")
            .bind(uid)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(flag);
    }
}
