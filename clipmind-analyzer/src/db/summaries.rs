//! Summary storage
//!
//! Summaries are append-only; the last row inserted for a video is its current one.

use clipmind_common::db::Summary;
use clipmind_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::videos::{parse_timestamp, parse_uuid};

pub async fn save_summary(pool: &SqlitePool, summary: &Summary) -> Result<()> {
    let key_points = serde_json::to_string(&summary.key_points)?;

    sqlx::query(
        r#"
        INSERT INTO summaries (guid, video_guid, model_used, summary_type, content, key_points,
                               created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(summary.id.to_string())
    .bind(summary.video_id.to_string())
    .bind(&summary.model_used)
    .bind(summary.summary_type.as_str())
    .bind(&summary.content)
    .bind(key_points)
    .bind(summary.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent summary of `video_id`
pub async fn latest_summary(pool: &SqlitePool, video_id: Uuid) -> Result<Option<Summary>> {
    let row = sqlx::query(
        r#"
        SELECT guid, video_guid, model_used, summary_type, content, key_points, created_at
        FROM summaries
        WHERE video_guid = ?
        ORDER BY rowid DESC
        LIMIT 1
        "#,
    )
    .bind(video_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let guid: String = row.get("guid");
    let video_guid: String = row.get("video_guid");
    let summary_type: String = row.get("summary_type");
    let key_points: String = row.get("key_points");
    let created_at: String = row.get("created_at");

    let key_points: Vec<String> = serde_json::from_str(&key_points)
        .map_err(|e| Error::Internal(format!("Stored key points for {} invalid: {}", video_id, e)))?;

    Ok(Some(Summary {
        id: parse_uuid(&guid)?,
        video_id: parse_uuid(&video_guid)?,
        model_used: row.get("model_used"),
        summary_type: summary_type.parse()?,
        content: row.get("content"),
        key_points,
        created_at: parse_timestamp(&created_at)?,
    }))
}

pub async fn has_summary(pool: &SqlitePool, video_id: Uuid) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM summaries WHERE video_guid = ? LIMIT 1")
            .bind(video_id.to_string())
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}
