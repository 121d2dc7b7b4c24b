use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Form, Json,
};
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::auth::AuthUser;
use crate::localtime::now_local;
use crate::routes::{notice, AppState, Notice};
use crate::stats::{self, MonthlyStats, Summary};

pub const PER_PAGE: i64 = 10;

// Fixed lookup vocabularies for the copy-shop; free-text categories
// are still accepted on input.
pub const INCOME_LOOKUP: &[&str] = &[
    "ถ่ายเอกสาร A4 ขาวดำ",
    "ถ่ายเอกสาร A4 สี",
    "print A4 ขาวดำ",
    "print A4 สี",
    "เคลือบบัตร ขนาดการ์ดทั่วไป",
    "เคลือบบัตรขนาด A4",
    "ถ่ายเอกสาร A3 สี",
    "ถ่ายเอกสาร A3 ขาวดำ",
    "print A3 ขาวดำ",
    "print A3",
    "อื่นๆ",
];

pub const EXPENSE_LOOKUP: &[&str] = &["ค่าหมึก", "ค่ากระดาษ", "ค่าน้ำ", "ค่าไฟ", "อื่นๆ"];

#[derive(Debug, FromRow)]
pub struct EntryRow {
    pub id: i64,
    pub user_id: i64,
    pub is_income: bool,
    pub category: Option<String>,
    pub custom_name: Option<String>,
    pub amount: f64,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct EntryDto {
    pub id: i64,
    pub user_id: i64,
    pub is_income: bool,
    pub category: Option<String>,
    pub custom_name: Option<String>,
    pub amount: f64,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<EntryRow> for EntryDto {
    fn from(r: EntryRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            is_income: r.is_income,
            category: r.category,
            custom_name: r.custom_name,
            amount: r.amount,
            notes: r.notes,
            created_at: r.created_at,
        }
    }
}

/// Owner or administrator may mutate an entry.
pub fn can_modify(user: &AuthUser, entry_user_id: i64) -> bool {
    user.is_admin || user.user_id == entry_user_id
}

fn parse_amount(raw: Option<&str>) -> Result<f64, (StatusCode, String)> {
    let raw = raw.unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "จำนวนเงินไม่ถูกต้อง".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub month: Option<String>,
    pub year: Option<String>,
    pub page: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResp {
    pub entries: Vec<EntryDto>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
    pub sums: Summary,
    pub monthly_stats: MonthlyStats,
    pub month: u32,
    pub year: i32,
    pub q: Option<String>,
    pub income_lookup: &'static [&'static str],
    pub expense_lookup: &'static [&'static str],
}

/// All users see the full listing; the ownership gate only applies to
/// mutation.
pub async fn dashboard_handler(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Query(q): Query<DashboardQuery>,
) -> Result<Json<DashboardResp>, (StatusCode, String)> {
    let now = now_local();
    let month = q
        .month
        .as_deref()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|m| (1..=12).contains(m))
        .unwrap_or_else(|| now.month());
    let year = q
        .year
        .as_deref()
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or_else(|| now.year());
    let page = q
        .page
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1);
    let search = q.q.clone().filter(|s| !s.is_empty());

    let (entries, total) = list_entries_db(&state.pool, search.as_deref(), page, PER_PAGE)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    let sums = stats::summarize_db(&state.pool, None)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    let monthly_stats = stats::monthly_stats_db(&state.pool, month, year)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;

    Ok(Json(DashboardResp {
        entries,
        page,
        per_page: PER_PAGE,
        total,
        total_pages: (total + PER_PAGE - 1) / PER_PAGE,
        sums,
        monthly_stats,
        month,
        year,
        q: search,
        income_lookup: INCOME_LOOKUP,
        expense_lookup: EXPENSE_LOOKUP,
    }))
}

pub async fn list_entries_db(
    pool: &SqlitePool,
    search: Option<&str>,
    page: i64,
    per_page: i64,
) -> Result<(Vec<EntryDto>, i64), sqlx::Error> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT id, user_id, is_income, category, custom_name, amount, notes, created_at FROM entry",
    );
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM entry");
    if let Some(s) = search {
        let pattern = format!("%{}%", s);
        for b in [&mut qb, &mut count_qb] {
            b.push(" WHERE category LIKE ");
            b.push_bind(pattern.clone());
            b.push(" OR custom_name LIKE ");
            b.push_bind(pattern.clone());
            b.push(" OR notes LIKE ");
            b.push_bind(pattern.clone());
        }
    }
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    qb.push_bind(per_page);
    qb.push(" OFFSET ");
    // page comes from the query string; keep the offset in range
    qb.push_bind(page.saturating_sub(1).saturating_mul(per_page));

    let rows: Vec<EntryRow> = qb.build_query_as().fetch_all(pool).await?;
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;
    Ok((rows.into_iter().map(EntryDto::from).collect(), total))
}

#[derive(Debug, Deserialize)]
pub struct AddEntryForm {
    pub kind: Option<String>, // "income" or "expense"
    pub category: Option<String>,
    pub custom_name: Option<String>,
    pub amount: Option<String>,
    pub notes: Option<String>,
}

pub async fn add_entry_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Form(form): Form<AddEntryForm>,
) -> Result<Json<EntryDto>, (StatusCode, String)> {
    let is_income = form.kind.as_deref() == Some("income");
    let category = form.category.filter(|s| !s.is_empty());
    let custom_name = form.custom_name.filter(|s| !s.is_empty());
    let amount = parse_amount(form.amount.as_deref())?;
    if category.is_none() && custom_name.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            "กรุณาเลือกหรือพิมพ์ชื่อรายการ".to_string(),
        ));
    }
    let notes = form.notes.filter(|s| !s.is_empty());
    let created_at = now_local().naive_local();

    let row = insert_entry_db(
        &state.pool,
        user.user_id,
        is_income,
        category.as_deref(),
        custom_name.as_deref(),
        amount,
        notes.as_deref(),
        created_at,
    )
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;

    Ok(Json(row.into()))
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_entry_db(
    pool: &SqlitePool,
    user_id: i64,
    is_income: bool,
    category: Option<&str>,
    custom_name: Option<&str>,
    amount: f64,
    notes: Option<&str>,
    created_at: NaiveDateTime,
) -> Result<EntryRow, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO entry (user_id, is_income, category, custom_name, amount, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id, user_id, is_income, category, custom_name, amount, notes, created_at
        "#,
    )
    .bind(user_id)
    .bind(is_income)
    .bind(category)
    .bind(custom_name)
    .bind(amount)
    .bind(notes)
    .bind(created_at)
    .fetch_one(pool)
    .await
}

pub async fn fetch_entry_db(
    pool: &SqlitePool,
    entry_id: i64,
) -> Result<Option<EntryRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, user_id, is_income, category, custom_name, amount, notes, created_at \
         FROM entry WHERE id = ?",
    )
    .bind(entry_id)
    .fetch_optional(pool)
    .await
}

pub async fn edit_entry_form_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(entry_id): Path<i64>,
) -> Result<Json<EntryDto>, (StatusCode, String)> {
    let row = fetch_entry_db(&state.pool, entry_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?
        .ok_or((StatusCode::NOT_FOUND, "entry not found".to_string()))?;
    if !can_modify(&user, row.user_id) {
        return Err((StatusCode::FORBIDDEN, "ไม่มีสิทธิ์แก้ไข".to_string()));
    }
    Ok(Json(row.into()))
}

#[derive(Debug, Deserialize)]
pub struct EditEntryForm {
    pub kind: Option<String>,
    pub category: Option<String>,
    pub custom_name: Option<String>,
    pub amount: Option<String>,
    pub notes: Option<String>,
    pub entry_date: Option<String>, // %Y-%m-%d
    pub entry_time: Option<String>, // %H:%M
}

pub async fn edit_entry_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(entry_id): Path<i64>,
    Form(form): Form<EditEntryForm>,
) -> Result<Json<Notice>, (StatusCode, String)> {
    let row = fetch_entry_db(&state.pool, entry_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?
        .ok_or((StatusCode::NOT_FOUND, "entry not found".to_string()))?;
    if !can_modify(&user, row.user_id) {
        return Err((StatusCode::FORBIDDEN, "ไม่มีสิทธิ์แก้ไข".to_string()));
    }

    let is_income = form.kind.as_deref() == Some("income");
    let category = form.category.filter(|s| !s.is_empty());
    let custom_name = form.custom_name.filter(|s| !s.is_empty());
    let amount = parse_amount(form.amount.as_deref())?;
    if category.is_none() && custom_name.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            "กรุณาเลือกหรือพิมพ์ชื่อรายการ".to_string(),
        ));
    }
    let notes = form.notes.filter(|s| !s.is_empty());

    // Re-stamp from the form's date and time; stored as local wall time.
    let entry_date = form.entry_date.as_deref().unwrap_or("");
    let entry_time = form
        .entry_time
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or("00:00");
    let created_at =
        NaiveDateTime::parse_from_str(&format!("{entry_date} {entry_time}"), "%Y-%m-%d %H:%M")
            .map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    "รูปแบบวันที่หรือเวลาไม่ถูกต้อง".to_string(),
                )
            })?;

    sqlx::query(
        "UPDATE entry SET is_income = ?, category = ?, custom_name = ?, amount = ?, notes = ?, \
         created_at = ? WHERE id = ?",
    )
    .bind(is_income)
    .bind(category)
    .bind(custom_name)
    .bind(amount)
    .bind(notes)
    .bind(created_at)
    .bind(entry_id)
    .execute(&state.pool)
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;

    Ok(notice("แก้ไขเรียบร้อย"))
}

pub async fn delete_entry_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(entry_id): Path<i64>,
) -> Result<Json<Notice>, (StatusCode, String)> {
    let row = fetch_entry_db(&state.pool, entry_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?
        .ok_or((StatusCode::NOT_FOUND, "entry not found".to_string()))?;
    if !can_modify(&user, row.user_id) {
        return Err((StatusCode::FORBIDDEN, "ไม่มีสิทธิ์ลบ".to_string()));
    }
    sqlx::query("DELETE FROM entry WHERE id = ?")
        .bind(entry_id)
        .execute(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(notice("ลบเรียบร้อย"))
}

/// Bulk delete of the caller's own entries.
pub async fn delete_all_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Notice>, (StatusCode, String)> {
    sqlx::query("DELETE FROM entry WHERE user_id = ?")
        .bind(user.user_id)
        .execute(&state.pool)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(notice("ลบรายการทั้งหมดเรียบร้อย"))
}
