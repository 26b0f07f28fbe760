//! Video database operations

use chrono::{DateTime, Utc};
use clipmind_common::db::{Video, VideoStatus};
use clipmind_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const VIDEO_COLUMNS: &str = "guid, external_id, title, description, channel_id, channel_name, \
                             duration_seconds, status, created_at, updated_at";

/// Outcome of a status write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Row now holds the requested status
    Applied,
    /// Transition not allowed from the current status; row untouched
    Rejected { current: VideoStatus },
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Stored id {} invalid: {}", value, e)))
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Stored timestamp {} invalid: {}", value, e)))
}

fn video_from_row(row: &SqliteRow) -> Result<Video> {
    let guid: String = row.get("guid");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Video {
        id: parse_uuid(&guid)?,
        external_id: row.get("external_id"),
        title: row.get("title"),
        description: row.get("description"),
        channel_id: row.get("channel_id"),
        channel_name: row.get("channel_name"),
        duration_seconds: row.get("duration_seconds"),
        status: status.parse()?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Insert a new video
pub async fn insert_video(pool: &SqlitePool, video: &Video) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO videos (guid, external_id, title, description, channel_id, channel_name,
                            duration_seconds, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(video.id.to_string())
    .bind(&video.external_id)
    .bind(&video.title)
    .bind(&video.description)
    .bind(&video.channel_id)
    .bind(&video.channel_name)
    .bind(video.duration_seconds)
    .bind(video.status.as_str())
    .bind(video.created_at.to_rfc3339())
    .bind(video.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_video(pool: &SqlitePool, id: Uuid) -> Result<Option<Video>> {
    let sql = format!("SELECT {} FROM videos WHERE guid = ?", VIDEO_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(video_from_row).transpose()
}

/// Like [`get_video`] but absence is an error
pub async fn require_video(pool: &SqlitePool, id: Uuid) -> Result<Video> {
    get_video(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("video {}", id)))
}

pub async fn get_video_by_external_id(pool: &SqlitePool, external_id: &str) -> Result<Option<Video>> {
    let sql = format!("SELECT {} FROM videos WHERE external_id = ?", VIDEO_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(video_from_row).transpose()
}

/// Newest first
pub async fn list_videos(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<Video>> {
    let sql = format!(
        "SELECT {} FROM videos ORDER BY created_at DESC, guid LIMIT ? OFFSET ?",
        VIDEO_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    rows.iter().map(video_from_row).collect()
}

pub async fn count_videos(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Delete a video and (by cascade) its transcript, vectors and edges
///
/// Returns false if no such video existed.
pub async fn delete_video(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM videos WHERE guid = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// States from which `next` may be written within one run
fn allowed_predecessors(next: VideoStatus) -> Vec<&'static str> {
    [
        VideoStatus::Pending,
        VideoStatus::Processing,
        VideoStatus::Completed,
        VideoStatus::Error,
    ]
    .into_iter()
    .filter(|s| s.can_transition_to(next))
    .map(|s| s.as_str())
    .collect()
}

/// Forward-only status write
///
/// The predecessor check and the write happen in one statement, so two stages
/// racing on the same video cannot move it backward.
pub async fn update_status(pool: &SqlitePool, id: Uuid, next: VideoStatus) -> Result<StatusChange> {
    let allowed = allowed_predecessors(next);
    let placeholders = vec!["?"; allowed.len()].join(", ");
    let sql = format!(
        "UPDATE videos SET status = ?, updated_at = ? WHERE guid = ? AND status IN ({})",
        placeholders
    );

    let mut query = sqlx::query(&sql)
        .bind(next.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string());
    for status in allowed {
        query = query.bind(status);
    }

    if query.execute(pool).await?.rows_affected() > 0 {
        return Ok(StatusChange::Applied);
    }

    let current = require_video(pool, id).await?.status;
    Ok(StatusChange::Rejected { current })
}

/// Start a new run: any status becomes processing
pub async fn restart_run(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let result = sqlx::query("UPDATE videos SET status = 'processing', updated_at = ? WHERE guid = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("video {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmind_common::db::init_memory_database;

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let pool = init_memory_database().await.unwrap();
        let video = Video::new("yt-1", "Rust in production").with_description("talk");
        insert_video(&pool, &video).await.unwrap();

        let loaded = get_video(&pool, video.id).await.unwrap().unwrap();
        assert_eq!(loaded.external_id, "yt-1");
        assert_eq!(loaded.status, VideoStatus::Pending);

        let by_ext = get_video_by_external_id(&pool, "yt-1").await.unwrap().unwrap();
        assert_eq!(by_ext.id, video.id);

        assert!(get_video(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_external_id_rejected() {
        let pool = init_memory_database().await.unwrap();
        insert_video(&pool, &Video::new("dup", "a")).await.unwrap();
        assert!(insert_video(&pool, &Video::new("dup", "b")).await.is_err());
    }

    #[tokio::test]
    async fn test_status_never_moves_backward() {
        let pool = init_memory_database().await.unwrap();
        let video = Video::new("yt-2", "t");
        insert_video(&pool, &video).await.unwrap();

        assert_eq!(
            update_status(&pool, video.id, VideoStatus::Processing).await.unwrap(),
            StatusChange::Applied
        );
        assert_eq!(
            update_status(&pool, video.id, VideoStatus::Completed).await.unwrap(),
            StatusChange::Applied
        );
        // Redelivered completion is idempotent
        assert_eq!(
            update_status(&pool, video.id, VideoStatus::Completed).await.unwrap(),
            StatusChange::Applied
        );
        // A late failure cannot overwrite the finished run
        assert_eq!(
            update_status(&pool, video.id, VideoStatus::Error).await.unwrap(),
            StatusChange::Rejected { current: VideoStatus::Completed }
        );

        restart_run(&pool, video.id).await.unwrap();
        let loaded = require_video(&pool, video.id).await.unwrap();
        assert_eq!(loaded.status, VideoStatus::Processing);
    }

    #[tokio::test]
    async fn test_failed_run_can_resume() {
        let pool = init_memory_database().await.unwrap();
        let video = Video::new("yt-3", "t");
        insert_video(&pool, &video).await.unwrap();

        update_status(&pool, video.id, VideoStatus::Processing).await.unwrap();
        update_status(&pool, video.id, VideoStatus::Error).await.unwrap();

        // Completion straight out of error is still refused
        assert_eq!(
            update_status(&pool, video.id, VideoStatus::Completed).await.unwrap(),
            StatusChange::Rejected { current: VideoStatus::Error }
        );
        assert_eq!(
            update_status(&pool, video.id, VideoStatus::Processing).await.unwrap(),
            StatusChange::Applied
        );
        assert_eq!(
            update_status(&pool, video.id, VideoStatus::Completed).await.unwrap(),
            StatusChange::Applied
        );
    }

    #[tokio::test]
    async fn test_update_status_missing_video() {
        let pool = init_memory_database().await.unwrap();
        let err = update_status(&pool, Uuid::new_v4(), VideoStatus::Processing)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let pool = init_memory_database().await.unwrap();
        for i in 0..3 {
            insert_video(&pool, &Video::new(format!("v{}", i), "t")).await.unwrap();
        }

        assert_eq!(count_videos(&pool).await.unwrap(), 3);
        assert_eq!(list_videos(&pool, 2, 0).await.unwrap().len(), 2);
        assert_eq!(list_videos(&pool, 2, 2).await.unwrap().len(), 1);

        let victim = get_video_by_external_id(&pool, "v1").await.unwrap().unwrap();
        assert!(delete_video(&pool, victim.id).await.unwrap());
        assert!(!delete_video(&pool, victim.id).await.unwrap());
        assert_eq!(count_videos(&pool).await.unwrap(), 2);
    }
}
