//! Pairwise similarity storage
//!
//! Edges are unordered: the pair is always written lower id first, so (A, B)
//! and (B, A) land on the same row.

use chrono::Utc;
use clipmind_common::db::{canonical_pair, SimilarityEdge};
use clipmind_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::videos::parse_uuid;

fn edge_from_row(row: &SqliteRow) -> Result<SimilarityEdge> {
    let a: String = row.get("video_a_guid");
    let b: String = row.get("video_b_guid");
    Ok(SimilarityEdge {
        video_a: parse_uuid(&a)?,
        video_b: parse_uuid(&b)?,
        title_score: row.get("title_score"),
        description_score: row.get("description_score"),
        transcript_score: row.get("transcript_score"),
        combined_score: row.get("combined_score"),
    })
}

/// Insert or overwrite the edge for the pair
pub async fn upsert_edge(pool: &SqlitePool, edge: &SimilarityEdge) -> Result<()> {
    let (a, b) = canonical_pair(edge.video_a, edge.video_b);
    if a == b {
        return Err(Error::InvalidInput(format!("Self-similarity for {}", a)));
    }
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO similarities (guid, video_a_guid, video_b_guid, title_score,
                                  description_score, transcript_score, combined_score,
                                  created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(video_a_guid, video_b_guid) DO UPDATE SET
            title_score = excluded.title_score,
            description_score = excluded.description_score,
            transcript_score = excluded.transcript_score,
            combined_score = excluded.combined_score,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(a.to_string())
    .bind(b.to_string())
    .bind(edge.title_score)
    .bind(edge.description_score)
    .bind(edge.transcript_score)
    .bind(edge.combined_score)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Edge for an unordered pair
pub async fn get_edge(pool: &SqlitePool, x: Uuid, y: Uuid) -> Result<Option<SimilarityEdge>> {
    let (a, b) = canonical_pair(x, y);
    let row = sqlx::query(
        r#"
        SELECT video_a_guid, video_b_guid, title_score, description_score,
               transcript_score, combined_score
        FROM similarities
        WHERE video_a_guid = ? AND video_b_guid = ?
        "#,
    )
    .bind(a.to_string())
    .bind(b.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(edge_from_row).transpose()
}

/// Edges touching `video_id`, highest combined score first
pub async fn neighbours(
    pool: &SqlitePool,
    video_id: Uuid,
    limit: i64,
    min_score: f64,
) -> Result<Vec<SimilarityEdge>> {
    let id = video_id.to_string();
    let rows = sqlx::query(
        r#"
        SELECT video_a_guid, video_b_guid, title_score, description_score,
               transcript_score, combined_score
        FROM similarities
        WHERE (video_a_guid = ? OR video_b_guid = ?) AND combined_score >= ?
        ORDER BY combined_score DESC
        LIMIT ?
        "#,
    )
    .bind(&id)
    .bind(&id)
    .bind(min_score)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(edge_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::videos::insert_video;
    use clipmind_common::db::{init_memory_database, Video};

    fn edge(x: Uuid, y: Uuid, combined: f64) -> SimilarityEdge {
        SimilarityEdge {
            video_a: x,
            video_b: y,
            title_score: 0.1,
            description_score: 0.2,
            transcript_score: 0.3,
            combined_score: combined,
        }
    }

    #[tokio::test]
    async fn test_pair_order_does_not_matter() {
        let pool = init_memory_database().await.unwrap();
        let x = Video::new("x", "t");
        let y = Video::new("y", "t");
        insert_video(&pool, &x).await.unwrap();
        insert_video(&pool, &y).await.unwrap();

        upsert_edge(&pool, &edge(x.id, y.id, 0.4)).await.unwrap();
        upsert_edge(&pool, &edge(y.id, x.id, 0.9)).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM similarities")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let stored = get_edge(&pool, y.id, x.id).await.unwrap().unwrap();
        assert_eq!(stored.combined_score, 0.9);
        assert!(stored.video_a < stored.video_b);
    }

    #[tokio::test]
    async fn test_neighbours_ranked_and_filtered() {
        let pool = init_memory_database().await.unwrap();
        let center = Video::new("c", "t");
        insert_video(&pool, &center).await.unwrap();

        let mut others = Vec::new();
        for (i, score) in [0.2, 0.9, 0.6].into_iter().enumerate() {
            let other = Video::new(format!("o{}", i), "t");
            insert_video(&pool, &other).await.unwrap();
            upsert_edge(&pool, &edge(center.id, other.id, score)).await.unwrap();
            others.push(other.id);
        }

        let ranked = neighbours(&pool, center.id, 10, 0.5).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].other(center.id), others[1]);
        assert_eq!(ranked[1].other(center.id), others[2]);
    }

    #[tokio::test]
    async fn test_self_edge_rejected() {
        let pool = init_memory_database().await.unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            upsert_edge(&pool, &edge(id, id, 1.0)).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
