use axum::{
    http::{header, HeaderMap},
    middleware::from_fn_with_state,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{admin, auth, csv_io, entries, stats};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
}

/// Flash-style notice carried in JSON responses.
#[derive(Debug, Serialize)]
pub struct Notice {
    pub message: String,
}

pub fn notice(message: impl Into<String>) -> Json<Notice> {
    Json(Notice {
        message: message.into(),
    })
}

pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/logout", get(auth::logout))
        .route("/dashboard", get(entries::dashboard_handler))
        .route("/add-entry", post(entries::add_entry_handler))
        .route(
            "/edit/{id}",
            get(entries::edit_entry_form_handler).post(entries::edit_entry_handler),
        )
        .route("/delete/{id}", post(entries::delete_entry_handler))
        .route("/delete-all", post(entries::delete_all_handler))
        .route("/export-csv", get(csv_io::export_csv_handler))
        .route("/export-csv-debug", get(csv_io::export_csv_debug_handler))
        .route("/import-csv", post(csv_io::import_csv_handler))
        .route("/monthly-stats", get(stats::monthly_stats_handler))
        .route("/chart-data", get(stats::chart_data_handler))
        .route("/admin", get(admin::list_users_handler))
        .route("/admin/create-user", post(admin::create_user_handler))
        .route("/admin/delete-user/{id}", post(admin::delete_user_handler))
        .route("/admin/toggle-admin/{id}", post(admin::toggle_admin_handler))
        .route(
            "/admin/reset-password/{id}",
            post(admin::reset_password_handler),
        )
        .route("/change-password", post(auth::change_password))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .merge(protected)
        .with_state(state)
}

// liveness probe
async fn ping() -> &'static str {
    "ok"
}

async fn index(headers: HeaderMap) -> Redirect {
    let authed = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| auth::decode_jwt(token).is_ok())
        .unwrap_or(false);
    if authed {
        Redirect::to("/dashboard")
    } else {
        Redirect::to("/login")
    }
}
