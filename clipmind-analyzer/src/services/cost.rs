//! Usage recording and cost summaries

use chrono::{DateTime, Duration, Local, Months, TimeZone, Utc};
use clipmind_common::db::UsageRecord;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use super::pricing;
use crate::db::usage;
use crate::error::PipelineResult;

/// Operation labels in the usage ledger
pub mod operations {
    pub const TRANSCRIPTION: &str = "transcription";
    pub const EMBEDDING: &str = "embedding";
    pub const SUMMARIZATION: &str = "summarization";
}

/// Reporting window for cost summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CostPeriod {
    /// Since local midnight
    Today,
    Week,
    #[default]
    Month,
    All,
}

impl CostPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostPeriod::Today => "today",
            CostPeriod::Week => "week",
            CostPeriod::Month => "month",
            CostPeriod::All => "all",
        }
    }

    /// Lower bound of the window, `None` for all time
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CostPeriod::Today => {
                let local = now.with_timezone(&Local);
                let midnight = local.date_naive().and_hms_opt(0, 0, 0)?;
                Local
                    .from_local_datetime(&midnight)
                    .earliest()
                    .map(|t| t.with_timezone(&Utc))
            }
            CostPeriod::Week => Some(now - Duration::days(7)),
            CostPeriod::Month => now.checked_sub_months(Months::new(1)),
            CostPeriod::All => None,
        }
    }
}

impl fmt::Display for CostPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized names fall back to a month
impl FromStr for CostPeriod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "today" => CostPeriod::Today,
            "week" => CostPeriod::Week,
            "all" => CostPeriod::All,
            _ => CostPeriod::Month,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_tokens: i64,
    pub by_provider: BTreeMap<String, f64>,
    pub by_operation: BTreeMap<String, f64>,
    pub by_model: BTreeMap<String, f64>,
    pub period: CostPeriod,
    pub video_count: i64,
    pub average_cost_per_video: f64,
}

/// Appends usage rows priced by [`pricing::cost`]
#[derive(Clone)]
pub struct CostRecorder {
    db: SqlitePool,
}

impl CostRecorder {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Price and append one usage row
    ///
    /// Pricing failures are logged and recorded at zero cost.
    pub async fn record(
        &self,
        video_id: Option<Uuid>,
        operation: &str,
        provider: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> PipelineResult<UsageRecord> {
        let total_tokens = input_tokens + output_tokens;

        let cost_usd = if provider == "groq" && operation == operations::TRANSCRIPTION {
            pricing::groq_transcription_cost(total_tokens)
        } else {
            pricing::cost(provider, model, input_tokens, output_tokens).unwrap_or_else(|e| {
                warn!(provider, model, error = %e, "Failed to price usage");
                0.0
            })
        };

        let record = UsageRecord {
            id: Uuid::new_v4(),
            video_id,
            operation: operation.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            total_tokens,
            cost_usd,
            created_at: Utc::now(),
        };

        usage::insert_usage(&self.db, &record).await?;

        info!(
            video_id = ?video_id,
            operation,
            provider,
            tokens = total_tokens,
            cost = cost_usd,
            "Token usage recorded"
        );
        Ok(record)
    }

    pub async fn summary(&self, period: CostPeriod) -> PipelineResult<CostSummary> {
        let totals = usage::usage_totals(&self.db, period.since(Utc::now())).await?;

        let average_cost_per_video = if totals.video_count > 0 {
            totals.total_cost / totals.video_count as f64
        } else {
            0.0
        };

        Ok(CostSummary {
            total_cost: totals.total_cost,
            total_tokens: totals.total_tokens,
            by_provider: totals.by_provider,
            by_operation: totals.by_operation,
            by_model: totals.by_model,
            period,
            video_count: totals.video_count,
            average_cost_per_video,
        })
    }

    pub async fn usage_for_video(&self, video_id: Uuid) -> PipelineResult<Vec<UsageRecord>> {
        Ok(usage::usage_for_video(&self.db, video_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipmind_common::db::init_memory_database;

    #[test]
    fn test_period_parsing_defaults_to_month() {
        assert_eq!("today".parse::<CostPeriod>().unwrap(), CostPeriod::Today);
        assert_eq!("all".parse::<CostPeriod>().unwrap(), CostPeriod::All);
        assert_eq!("fortnight".parse::<CostPeriod>().unwrap(), CostPeriod::Month);
    }

    #[test]
    fn test_period_bounds() {
        let now = Utc::now();
        assert!(CostPeriod::All.since(now).is_none());
        assert_eq!(CostPeriod::Week.since(now), Some(now - Duration::days(7)));
        let today = CostPeriod::Today.since(now).unwrap();
        assert!(today <= now && now - today <= Duration::hours(25));
    }

    #[tokio::test]
    async fn test_record_prices_and_summarizes() {
        let pool = init_memory_database().await.unwrap();
        let recorder = CostRecorder::new(pool);
        let video = Uuid::new_v4();

        let flash = recorder
            .record(Some(video), operations::SUMMARIZATION, "gemini", "gemini-1.5-flash", 2000, 1000)
            .await
            .unwrap();
        assert!((flash.cost_usd - 0.00045).abs() < 1e-12);

        let groq = recorder
            .record(Some(video), operations::TRANSCRIPTION, "groq", "whisper-large-v3", 1000, 0)
            .await
            .unwrap();
        assert!((groq.cost_usd - 0.006).abs() < 1e-12);

        // Unknown provider is recorded at zero cost rather than rejected
        let unknown = recorder
            .record(None, operations::EMBEDDING, "acme", "x", 10, 0)
            .await
            .unwrap();
        assert_eq!(unknown.cost_usd, 0.0);

        let summary = recorder.summary(CostPeriod::All).await.unwrap();
        assert_eq!(summary.video_count, 1);
        assert_eq!(summary.total_tokens, 4010);
        assert!((summary.average_cost_per_video - summary.total_cost).abs() < 1e-12);
        assert_eq!(summary.by_operation.len(), 3);

        assert_eq!(recorder.usage_for_video(video).await.unwrap().len(), 2);
    }
}
