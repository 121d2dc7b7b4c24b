//! CSV export and tolerant import of the full entry set.
//!
//! Export is header-first with a fixed column order and a UTF-8 BOM so
//! spreadsheets open Thai text correctly. Import is header-driven (file
//! column order is irrelevant) and skips malformed rows one at a time
//! instead of aborting the batch.

use axum::{
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::auth::AuthUser;
use crate::localtime::{localize, now_local, to_local};
use crate::routes::AppState;

const CSV_HEADER: [&str; 7] = [
    "id",
    "is_income",
    "category",
    "custom_name",
    "amount",
    "notes",
    "created_at",
];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, FromRow)]
pub struct ExportRow {
    pub id: i64,
    pub is_income: bool,
    pub category: Option<String>,
    pub custom_name: Option<String>,
    pub amount: f64,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

/// A staged entry parsed from one CSV row, not yet committed.
#[derive(Debug, PartialEq)]
pub struct NewEntry {
    pub is_income: bool,
    pub category: Option<String>,
    pub custom_name: Option<String>,
    pub amount: f64,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct SkippedRow {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug)]
pub struct ImportBatch {
    pub rows: Vec<NewEntry>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, Serialize)]
pub struct ImportResp {
    pub message: String,
    pub imported: usize,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, Default, Deserialize)]
struct ImportRecord {
    #[serde(default)]
    is_income: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    custom_name: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

pub async fn fetch_all_entries(pool: &SqlitePool) -> Result<Vec<ExportRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, is_income, category, custom_name, amount, notes, created_at \
         FROM entry ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await
}

pub fn render_csv(rows: &[ExportRow]) -> anyhow::Result<String> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(CSV_HEADER)?;
    for r in rows {
        w.write_record([
            r.id.to_string(),
            r.is_income.to_string(),
            r.category.clone().unwrap_or_default(),
            r.custom_name.clone().unwrap_or_default(),
            r.amount.to_string(),
            r.notes.clone().unwrap_or_default(),
            localize(r.created_at).to_rfc3339(),
        ])?;
    }
    let bytes = w.into_inner()?;
    Ok(String::from_utf8(bytes)?)
}

async fn build_export(pool: &SqlitePool) -> anyhow::Result<String> {
    let rows = fetch_all_entries(pool).await?;
    render_csv(&rows)
}

pub async fn export_csv_handler(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let text = match build_export(&state.pool).await {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "csv export failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "เกิดข้อผิดพลาดขณะส่งออก CSV".to_string(),
            ));
        }
    };
    let mut body = Vec::with_capacity(UTF8_BOM.len() + text.len());
    body.extend_from_slice(UTF8_BOM);
    body.extend_from_slice(text.as_bytes());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"entries.csv\"",
            ),
        ],
        body,
    ))
}

/// Inline variant without BOM or attachment headers, kept for
/// troubleshooting encoding issues in the browser.
pub async fn export_csv_debug_handler(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let text = match build_export(&state.pool).await {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "csv export failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "เกิดข้อผิดพลาดขณะส่งออก CSV".to_string(),
            ));
        }
    };
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], text))
}

pub async fn import_csv_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Json<ImportResp>, (StatusCode, String)> {
    let mut data: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("upload error: {e}")))?
    {
        if field.name() == Some("file") {
            data = Some(
                field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("upload error: {e}")))?,
            );
        }
    }
    let Some(data) = data else {
        return Err((StatusCode::BAD_REQUEST, "โปรดเลือกไฟล์".to_string()));
    };

    let batch = parse_rows(&data, now_local());
    for s in &batch.skipped {
        tracing::warn!(line = s.line, reason = %s.reason, "skipping csv row");
    }
    let imported = insert_batch(&state.pool, user.user_id, &batch.rows)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;

    Ok(Json(ImportResp {
        message: format!("นำเข้า {imported} รายการ"),
        imported,
        skipped: batch.skipped,
    }))
}

/// Converts every data row independently; a bad row is recorded and
/// skipped, never aborting the batch.
pub fn parse_rows(data: &str, now: DateTime<FixedOffset>) -> ImportBatch {
    let data = data.strip_prefix('\u{feff}').unwrap_or(data);
    let mut reader = csv::Reader::from_reader(data.as_bytes());
    let mut rows = Vec::new();
    let mut skipped = Vec::new();
    for (i, result) in reader.deserialize::<ImportRecord>().enumerate() {
        let line = (i + 2) as u64; // header is line 1
        match result {
            Ok(rec) => match convert_row(rec, now) {
                Ok(row) => rows.push(row),
                Err(reason) => skipped.push(SkippedRow { line, reason }),
            },
            Err(e) => skipped.push(SkippedRow {
                line,
                reason: e.to_string(),
            }),
        }
    }
    ImportBatch { rows, skipped }
}

fn convert_row(rec: ImportRecord, now: DateTime<FixedOffset>) -> Result<NewEntry, String> {
    let is_income = matches!(
        rec.is_income.unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    );
    let category = rec.category.filter(|s| !s.is_empty());
    let custom_name = rec.custom_name.filter(|s| !s.is_empty());
    let raw_amount = rec.amount.unwrap_or_default();
    let amount: f64 = if raw_amount.trim().is_empty() {
        0.0
    } else {
        raw_amount
            .trim()
            .parse()
            .map_err(|_| format!("invalid amount {raw_amount:?}"))?
    };
    let notes = rec.notes.filter(|s| !s.is_empty());
    let created_at = match rec.created_at.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => parse_created_at(raw, now),
        None => now.naive_local(),
    };
    Ok(NewEntry {
        is_income,
        category,
        custom_name,
        amount,
        notes,
        created_at,
    })
}

/// ISO-8601 with an offset is converted to local time; naive values are
/// taken as local wall time as-is; anything unparseable falls back to
/// the current local time.
fn parse_created_at(raw: &str, now: DateTime<FixedOffset>) -> NaiveDateTime {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return to_local(dt).naive_local();
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return naive;
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.and_time(NaiveTime::MIN);
    }
    now.naive_local()
}

/// Commits the accepted rows atomically, owned by the importing user.
pub async fn insert_batch(
    pool: &SqlitePool,
    user_id: i64,
    rows: &[NewEntry],
) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    for r in rows {
        sqlx::query(
            "INSERT INTO entry (user_id, is_income, category, custom_name, amount, notes, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(r.is_income)
        .bind(&r.category)
        .bind(&r.custom_name)
        .bind(r.amount)
        .bind(&r.notes)
        .bind(r.created_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(rows.len())
}
