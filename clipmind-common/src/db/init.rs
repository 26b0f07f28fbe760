//! Database initialization
//!
//! Creates the SQLite file on first run and bootstraps every table with
//! idempotent `CREATE TABLE IF NOT EXISTS` statements, so calling
//! [`init_database`] against an existing database is always safe.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the database at `db_path` and bootstrap the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the API read while stage workers write
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema
///
/// Limited to a single connection: every `:memory:` connection is a separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_settings_table(pool).await?;
    create_videos_table(pool).await?;
    create_transcripts_table(pool).await?;
    create_summaries_table(pool).await?;
    create_embeddings_table(pool).await?;
    create_similarities_table(pool).await?;
    create_usage_records_table(pool).await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_videos_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            guid TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            channel_id TEXT,
            channel_name TEXT,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'completed', 'error')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_videos_created_at ON videos(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_transcripts_table(pool: &SqlitePool) -> Result<()> {
    // One authoritative transcript per video: video_guid is the natural key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transcripts (
            guid TEXT PRIMARY KEY,
            video_guid TEXT NOT NULL UNIQUE REFERENCES videos(guid) ON DELETE CASCADE,
            language TEXT NOT NULL,
            source TEXT NOT NULL CHECK (source IN ('youtube', 'whisper')),
            content TEXT NOT NULL,
            segments TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_summaries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            guid TEXT PRIMARY KEY,
            video_guid TEXT NOT NULL REFERENCES videos(guid) ON DELETE CASCADE,
            model_used TEXT NOT NULL,
            summary_type TEXT NOT NULL
                CHECK (summary_type IN ('short', 'detailed', 'bullet_points')),
            content TEXT NOT NULL,
            key_points TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_summaries_video ON summaries(video_guid)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_embeddings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            guid TEXT PRIMARY KEY,
            video_guid TEXT NOT NULL REFERENCES videos(guid) ON DELETE CASCADE,
            embedding_type TEXT NOT NULL
                CHECK (embedding_type IN ('title', 'description', 'transcript', 'combined')),
            vector TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            model TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (video_guid, embedding_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_similarities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS similarities (
            guid TEXT PRIMARY KEY,
            video_a_guid TEXT NOT NULL REFERENCES videos(guid) ON DELETE CASCADE,
            video_b_guid TEXT NOT NULL REFERENCES videos(guid) ON DELETE CASCADE,
            title_score REAL NOT NULL DEFAULT 0,
            description_score REAL NOT NULL DEFAULT 0,
            transcript_score REAL NOT NULL DEFAULT 0,
            combined_score REAL NOT NULL CHECK (combined_score BETWEEN -1.0 AND 1.0),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (video_a_guid, video_b_guid),
            CHECK (video_a_guid < video_b_guid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_similarities_b ON similarities(video_b_guid)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_usage_records_table(pool: &SqlitePool) -> Result<()> {
    // Ledger rows outlive their video, so video_guid carries no foreign key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_records (
            guid TEXT PRIMARY KEY,
            video_guid TEXT,
            operation TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_created_at ON usage_records(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
