use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::auth::AuthUser;
use crate::localtime::now_local;
use crate::routes::AppState;

/// Net totals (income minus expense) bucketed on local wall time.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub daily: f64,
    pub monthly: f64,
    pub yearly: f64,
}

#[derive(Debug, Serialize)]
pub struct MonthlyStats {
    pub income: f64,
    pub expense: f64,
    pub balance: f64,
}

#[derive(Debug, FromRow)]
pub struct SummaryRow {
    pub is_income: bool,
    pub amount: f64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, FromRow)]
pub struct ChartRow {
    pub category: Option<String>,
    pub custom_name: Option<String>,
    pub amount: f64,
}

pub async fn summarize_db(
    pool: &SqlitePool,
    user_id: Option<i64>,
) -> Result<Summary, sqlx::Error> {
    let rows: Vec<SummaryRow> = match user_id {
        Some(id) => {
            sqlx::query_as("SELECT is_income, amount, created_at FROM entry WHERE user_id = ?")
                .bind(id)
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT is_income, amount, created_at FROM entry")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(fold_summary(&rows, now_local().naive_local()))
}

pub(crate) fn fold_summary(rows: &[SummaryRow], now: NaiveDateTime) -> Summary {
    let mut s = Summary {
        daily: 0.0,
        monthly: 0.0,
        yearly: 0.0,
    };
    for r in rows {
        let signed = if r.is_income { r.amount } else { -r.amount };
        let t = r.created_at;
        if t.year() == now.year() {
            s.yearly += signed;
            if t.month() == now.month() {
                s.monthly += signed;
                if t.date() == now.date() {
                    s.daily += signed;
                }
            }
        }
    }
    s
}

/// Income/expense/balance for one month, filtered at the database level.
pub async fn monthly_stats_db(
    pool: &SqlitePool,
    month: u32,
    year: i32,
) -> Result<MonthlyStats, sqlx::Error> {
    let (income, expense): (f64, f64) = sqlx::query_as(
        "SELECT COALESCE(SUM(CASE WHEN is_income THEN amount ELSE 0.0 END), 0.0), \
                COALESCE(SUM(CASE WHEN is_income THEN 0.0 ELSE amount END), 0.0) \
         FROM entry \
         WHERE CAST(strftime('%Y', created_at) AS INTEGER) = ? \
           AND CAST(strftime('%m', created_at) AS INTEGER) = ?",
    )
    .bind(year)
    .bind(month as i64)
    .fetch_one(pool)
    .await?;
    Ok(MonthlyStats {
        income,
        expense,
        balance: income - expense,
    })
}

pub async fn chart_rows_db(
    pool: &SqlitePool,
    month: u32,
    year: i32,
    is_income: bool,
) -> Result<Vec<ChartRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT category, custom_name, amount FROM entry \
         WHERE is_income = ? \
           AND CAST(strftime('%Y', created_at) AS INTEGER) = ? \
           AND CAST(strftime('%m', created_at) AS INTEGER) = ? \
         ORDER BY id",
    )
    .bind(is_income)
    .bind(year)
    .bind(month as i64)
    .fetch_all(pool)
    .await
}

/// Groups by category, falling back to custom name, then the catch-all
/// bucket. Labels keep first-occurrence order for stable chart colors.
pub(crate) fn breakdown(rows: &[ChartRow]) -> (Vec<String>, Vec<f64>) {
    let mut labels: Vec<String> = Vec::new();
    let mut values: Vec<f64> = Vec::new();
    for r in rows {
        let label = r
            .category
            .as_deref()
            .or(r.custom_name.as_deref())
            .unwrap_or("อื่นๆ");
        match labels.iter().position(|l| l == label) {
            Some(i) => values[i] += r.amount,
            None => {
                labels.push(label.to_string());
                values.push(r.amount);
            }
        }
    }
    (labels, values)
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub month: Option<String>,
    pub year: Option<String>,
    pub kind: Option<String>,
}

fn month_year_or_now(q: &StatsQuery) -> (u32, i32) {
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
    (month, year)
}

pub async fn monthly_stats_handler(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Query(q): Query<StatsQuery>,
) -> Result<Json<MonthlyStats>, (StatusCode, String)> {
    let (month, year) = month_year_or_now(&q);
    let stats = monthly_stats_db(&state.pool, month, year)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

pub async fn chart_data_handler(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Query(q): Query<StatsQuery>,
) -> Result<Json<ChartData>, (StatusCode, String)> {
    let (month, year) = month_year_or_now(&q);
    let is_income = q.kind.as_deref() == Some("income");
    let rows = chart_rows_db(&state.pool, month, year, is_income)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("db error: {e}")))?;
    let (labels, values) = breakdown(&rows);
    Ok(Json(ChartData { labels, values }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, test_user};
    use crate::entries::insert_entry_db;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn naive(y: i32, mo: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn row(is_income: bool, amount: f64, created_at: NaiveDateTime) -> SummaryRow {
        SummaryRow {
            is_income,
            amount,
            created_at,
        }
    }

    #[test]
    fn summary_buckets_by_day_month_and_year() {
        let now = naive(2025, 6, 15, 12);
        let rows = vec![
            row(true, 100.0, naive(2025, 6, 15, 9)),  // income today
            row(false, 40.0, naive(2025, 6, 15, 10)), // expense today
            row(true, 10.0, naive(2025, 5, 20, 8)),   // income last month
        ];
        let s = fold_summary(&rows, now);
        assert_eq!(s.daily, 60.0);
        assert_eq!(s.monthly, 60.0);
        assert_eq!(s.yearly, 70.0);
    }

    #[test]
    fn summary_ignores_other_years() {
        let now = naive(2025, 6, 15, 12);
        let rows = vec![
            row(true, 100.0, naive(2024, 6, 15, 9)),
            row(false, 25.0, naive(2026, 1, 1, 0)),
        ];
        let s = fold_summary(&rows, now);
        assert_eq!(s.daily, 0.0);
        assert_eq!(s.monthly, 0.0);
        assert_eq!(s.yearly, 0.0);
    }

    #[test]
    fn breakdown_keeps_first_occurrence_order() {
        let rows = vec![
            ChartRow {
                category: Some("A".into()),
                custom_name: None,
                amount: 20.0,
            },
            ChartRow {
                category: Some("A".into()),
                custom_name: None,
                amount: 30.0,
            },
            ChartRow {
                category: None,
                custom_name: Some("B".into()),
                amount: 5.0,
            },
        ];
        let (labels, values) = breakdown(&rows);
        assert_eq!(labels, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(values, vec![50.0, 5.0]);
    }

    #[test]
    fn breakdown_falls_back_to_the_catch_all_bucket() {
        let rows = vec![ChartRow {
            category: None,
            custom_name: None,
            amount: 7.0,
        }];
        let (labels, values) = breakdown(&rows);
        assert_eq!(labels, vec!["อื่นๆ".to_string()]);
        assert_eq!(values, vec![7.0]);
    }

    #[tokio::test]
    async fn monthly_stats_filter_at_the_database_level() {
        let pool = test_pool().await;
        let uid = test_user(&pool, "u", false).await;
        insert_entry_db(&pool, uid, true, Some("a"), None, 100.0, None, naive(2025, 3, 2, 9))
            .await
            .unwrap();
        insert_entry_db(&pool, uid, false, Some("b"), None, 40.0, None, naive(2025, 3, 20, 9))
            .await
            .unwrap();
        // different month, must be excluded
        insert_entry_db(&pool, uid, true, Some("c"), None, 999.0, None, naive(2025, 4, 1, 9))
            .await
            .unwrap();

        let stats = monthly_stats_db(&pool, 3, 2025).await.unwrap();
        assert_eq!(stats.income, 100.0);
        assert_eq!(stats.expense, 40.0);
        assert_eq!(stats.balance, 60.0);

        let empty = monthly_stats_db(&pool, 12, 2030).await.unwrap();
        assert_eq!(empty.income, 0.0);
        assert_eq!(empty.expense, 0.0);
        assert_eq!(empty.balance, 0.0);
    }

    #[tokio::test]
    async fn summary_owner_filter_only_counts_that_users_entries() {
        let pool = test_pool().await;
        let a = test_user(&pool, "a", false).await;
        let b = test_user(&pool, "b", false).await;
        let today = now_local().naive_local();
        insert_entry_db(&pool, a, true, Some("x"), None, 100.0, None, today)
            .await
            .unwrap();
        insert_entry_db(&pool, b, false, Some("y"), None, 40.0, None, today)
            .await
            .unwrap();

        let mine = summarize_db(&pool, Some(a)).await.unwrap();
        assert_eq!(mine.daily, 100.0);
        assert_eq!(mine.yearly, 100.0);

        let everyone = summarize_db(&pool, None).await.unwrap();
        assert_eq!(everyone.daily, 60.0);
    }

    #[test]
    fn chart_and_stats_payloads_keep_their_wire_shape() {
        let chart = ChartData {
            labels: vec!["A".into(), "B".into()],
            values: vec![50.0, 5.0],
        };
        assert_eq!(
            serde_json::to_value(&chart).unwrap(),
            serde_json::json!({"labels": ["A", "B"], "values": [50.0, 5.0]})
        );

        let stats = MonthlyStats {
            income: 100.0,
            expense: 40.0,
            balance: 60.0,
        };
        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            serde_json::json!({"income": 100.0, "expense": 40.0, "balance": 60.0})
        );
    }

    #[tokio::test]
    async fn chart_rows_respect_polarity_and_month() {
        let pool = test_pool().await;
        let uid = test_user(&pool, "u", false).await;
        insert_entry_db(&pool, uid, false, Some("ค่าหมึก"), None, 20.0, None, naive(2025, 3, 2, 9))
            .await
            .unwrap();
        insert_entry_db(&pool, uid, true, Some("print A4 สี"), None, 50.0, None, naive(2025, 3, 3, 9))
            .await
            .unwrap();

        let rows = chart_rows_db(&pool, 3, 2025, false).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category.as_deref(), Some("ค่าหมึก"));
    }
}
