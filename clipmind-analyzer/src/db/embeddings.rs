//! Embedding vector storage
//!
//! Vectors are stored as JSON arrays, one row per (video, type).

use chrono::Utc;
use clipmind_common::db::{EmbeddingType, StoredEmbedding};
use clipmind_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::videos::parse_uuid;

/// Upsert a set of vectors in one transaction
///
/// Either every vector in `embeddings` is written or none is.
pub async fn save_embeddings(pool: &SqlitePool, embeddings: &[StoredEmbedding]) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    for embedding in embeddings {
        upsert(&mut tx, embedding, &now).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Make `embeddings` the complete vector set of `video_id`
///
/// Types missing from `embeddings` are deleted in the same transaction, so a
/// combined vector is never stored next to a field vector it did not include.
pub async fn replace_embeddings(
    pool: &SqlitePool,
    video_id: Uuid,
    embeddings: &[StoredEmbedding],
) -> Result<()> {
    if let Some(other) = embeddings.iter().find(|e| e.video_id != video_id) {
        return Err(Error::InvalidInput(format!(
            "vector for {} in the set of {}",
            other.video_id, video_id
        )));
    }

    let now = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;

    let kept: Vec<&str> = embeddings.iter().map(|e| e.embedding_type.as_str()).collect();
    let sql = if kept.is_empty() {
        "DELETE FROM embeddings WHERE video_guid = ?".to_string()
    } else {
        format!(
            "DELETE FROM embeddings WHERE video_guid = ? AND embedding_type NOT IN ({})",
            vec!["?"; kept.len()].join(", ")
        )
    };
    let mut delete = sqlx::query(&sql).bind(video_id.to_string());
    for kind in kept {
        delete = delete.bind(kind);
    }
    delete.execute(&mut *tx).await?;

    for embedding in embeddings {
        upsert(&mut tx, embedding, &now).await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn upsert(
    tx: &mut Transaction<'_, Sqlite>,
    embedding: &StoredEmbedding,
    now: &str,
) -> Result<()> {
    let vector = serde_json::to_string(&embedding.vector)?;
    sqlx::query(
        r#"
        INSERT INTO embeddings (guid, video_guid, embedding_type, vector, dimensions, model,
                                created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(video_guid, embedding_type) DO UPDATE SET
            vector = excluded.vector,
            dimensions = excluded.dimensions,
            model = excluded.model,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(embedding.video_id.to_string())
    .bind(embedding.embedding_type.as_str())
    .bind(vector)
    .bind(embedding.vector.len() as i64)
    .bind(&embedding.model)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn decode_vector(raw: &str, video_id: &str) -> Result<Vec<f32>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Stored vector for {} invalid: {}", video_id, e)))
}

pub async fn get_embedding(
    pool: &SqlitePool,
    video_id: Uuid,
    embedding_type: EmbeddingType,
) -> Result<Option<StoredEmbedding>> {
    let row = sqlx::query(
        "SELECT vector, model FROM embeddings WHERE video_guid = ? AND embedding_type = ?",
    )
    .bind(video_id.to_string())
    .bind(embedding_type.as_str())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let raw: String = row.get("vector");
    Ok(Some(StoredEmbedding {
        video_id,
        embedding_type,
        vector: decode_vector(&raw, &video_id.to_string())?,
        model: row.get("model"),
    }))
}

/// All vectors stored for one video
pub async fn get_embeddings(pool: &SqlitePool, video_id: Uuid) -> Result<Vec<StoredEmbedding>> {
    let rows = sqlx::query(
        "SELECT embedding_type, vector, model FROM embeddings WHERE video_guid = ? ORDER BY embedding_type",
    )
    .bind(video_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let kind: String = row.get("embedding_type");
            let raw: String = row.get("vector");
            Ok(StoredEmbedding {
                video_id,
                embedding_type: kind.parse()?,
                vector: decode_vector(&raw, &video_id.to_string())?,
                model: row.get("model"),
            })
        })
        .collect()
}

/// Ids of every video except `exclude` that has a combined vector
pub async fn videos_with_combined(pool: &SqlitePool, exclude: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT video_guid FROM embeddings WHERE embedding_type = 'combined' AND video_guid != ?",
    )
    .bind(exclude.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(|(guid,)| parse_uuid(guid)).collect()
}
