//! Usage ledger
//!
//! Rows are appended and never updated.

use chrono::{DateTime, Utc};
use clipmind_common::db::UsageRecord;
use clipmind_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::videos::{parse_timestamp, parse_uuid};

/// Aggregates over a window of the ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTotals {
    pub total_cost: f64,
    pub total_tokens: i64,
    pub by_provider: BTreeMap<String, f64>,
    pub by_operation: BTreeMap<String, f64>,
    pub by_model: BTreeMap<String, f64>,
    /// Distinct videos with at least one record
    pub video_count: i64,
}

pub async fn insert_usage(pool: &SqlitePool, record: &UsageRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO usage_records (guid, video_guid, operation, provider, model, input_tokens,
                                   output_tokens, total_tokens, cost_usd, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.video_id.map(|id| id.to_string()))
    .bind(&record.operation)
    .bind(&record.provider)
    .bind(&record.model)
    .bind(record.input_tokens)
    .bind(record.output_tokens)
    .bind(record.total_tokens)
    .bind(record.cost_usd)
    .bind(record.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Records for one video, oldest first
pub async fn usage_for_video(pool: &SqlitePool, video_id: Uuid) -> Result<Vec<UsageRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, video_guid, operation, provider, model, input_tokens, output_tokens,
               total_tokens, cost_usd, created_at
        FROM usage_records
        WHERE video_guid = ?
        ORDER BY created_at, guid
        "#,
    )
    .bind(video_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let guid: String = row.get("guid");
            let video_guid: Option<String> = row.get("video_guid");
            let created_at: String = row.get("created_at");
            Ok(UsageRecord {
                id: parse_uuid(&guid)?,
                video_id: video_guid.as_deref().map(parse_uuid).transpose()?,
                operation: row.get("operation"),
                provider: row.get("provider"),
                model: row.get("model"),
                input_tokens: row.get("input_tokens"),
                output_tokens: row.get("output_tokens"),
                total_tokens: row.get("total_tokens"),
                cost_usd: row.get("cost_usd"),
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .collect()
}

async fn grouped_cost(
    pool: &SqlitePool,
    column: &str,
    since: &str,
) -> Result<BTreeMap<String, f64>> {
    // `column` is one of a fixed set chosen below, never user input
    let sql = format!(
        "SELECT {col} AS name, COALESCE(SUM(cost_usd), 0.0) AS cost
         FROM usage_records WHERE created_at >= ? GROUP BY {col}",
        col = column
    );
    let rows = sqlx::query(&sql).bind(since).fetch_all(pool).await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("name"), row.get::<f64, _>("cost")))
        .collect())
}

/// Totals for records created at or after `since` (everything when `None`)
pub async fn usage_totals(pool: &SqlitePool, since: Option<DateTime<Utc>>) -> Result<UsageTotals> {
    // RFC3339 UTC strings sort chronologically; the empty string precedes all of them
    let since = since.map(|t| t.to_rfc3339()).unwrap_or_default();

    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(cost_usd), 0.0) AS total_cost,
               COALESCE(SUM(total_tokens), 0) AS total_tokens,
               COUNT(DISTINCT video_guid) AS video_count
        FROM usage_records
        WHERE created_at >= ?
        "#,
    )
    .bind(&since)
    .fetch_one(pool)
    .await?;

    Ok(UsageTotals {
        total_cost: row.get("total_cost"),
        total_tokens: row.get("total_tokens"),
        video_count: row.get("video_count"),
        by_provider: grouped_cost(pool, "provider", &since).await?,
        by_operation: grouped_cost(pool, "operation", &since).await?,
        by_model: grouped_cost(pool, "model", &since).await?,
    })
}
