//! Transcript database operations
//!
//! A video has at most one authoritative transcript. Saving again (for any
//! language or source) replaces the previous row.

use chrono::Utc;
use clipmind_common::db::{Transcript, TranscriptSegment};
use clipmind_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::videos::{parse_timestamp, parse_uuid};

/// Upsert the authoritative transcript for `transcript.video_id`
pub async fn save_transcript(pool: &SqlitePool, transcript: &Transcript) -> Result<()> {
    let segments = serde_json::to_string(&transcript.segments)?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO transcripts (guid, video_guid, language, source, content, segments,
                                 created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(video_guid) DO UPDATE SET
            language = excluded.language,
            source = excluded.source,
            content = excluded.content,
            segments = excluded.segments,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(transcript.id.to_string())
    .bind(transcript.video_id.to_string())
    .bind(&transcript.language)
    .bind(transcript.source.as_str())
    .bind(&transcript.content)
    .bind(segments)
    .bind(transcript.created_at.to_rfc3339())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_transcript(pool: &SqlitePool, video_id: Uuid) -> Result<Option<Transcript>> {
    let row = sqlx::query(
        r#"
        SELECT guid, video_guid, language, source, content, segments, created_at
        FROM transcripts
        WHERE video_guid = ?
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
    let source: String = row.get("source");
    let segments: String = row.get("segments");
    let created_at: String = row.get("created_at");

    let segments: Vec<TranscriptSegment> = serde_json::from_str(&segments)
        .map_err(|e| Error::Internal(format!("Stored segments for {} invalid: {}", video_id, e)))?;

    Ok(Some(Transcript {
        id: parse_uuid(&guid)?,
        video_id: parse_uuid(&video_guid)?,
        language: row.get("language"),
        source: source.parse()?,
        content: row.get("content"),
        segments,
        created_at: parse_timestamp(&created_at)?,
    }))
}
