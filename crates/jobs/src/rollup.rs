//! Daily pre-aggregation of completed-call summaries. Upserts are keyed
//! by (company, date), so reprocessing a day never double-counts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Timelike};
use tracing::info;

use frontdesk_core::domain::summary::CallSummary;
use frontdesk_store::repositories::{
    CallSummaryRepository, DailyRollup, RollupCounts, RollupRepository,
};

use crate::JobError;

pub struct DailyStatsRollup {
    summaries: Arc<dyn CallSummaryRepository>,
    rollups: Arc<dyn RollupRepository>,
}

impl DailyStatsRollup {
    pub fn new(
        summaries: Arc<dyn CallSummaryRepository>,
        rollups: Arc<dyn RollupRepository>,
    ) -> Self {
        Self { summaries, rollups }
    }

    /// Aggregate one day for every company that had calls. Idempotent:
    /// counts are recomputed from the summaries and the upsert replaces
    /// any previous rollup for the same key.
    pub async fn rollup_for_date(&self, date: NaiveDate) -> Result<Vec<DailyRollup>, JobError> {
        let summaries = self.summaries.list_for_date(date).await?;

        let mut by_company: BTreeMap<String, Vec<&CallSummary>> = BTreeMap::new();
        for summary in &summaries {
            by_company.entry(summary.company_id.0.clone()).or_default().push(summary);
        }

        let mut rollups = Vec::with_capacity(by_company.len());
        for (company_id, company_summaries) in by_company {
            let rollup = DailyRollup {
                company_id: frontdesk_core::domain::call::CompanyId(company_id),
                date,
                counts: aggregate(&company_summaries),
            };
            self.rollups.upsert(rollup.clone()).await?;
            rollups.push(rollup);
        }

        info!(date = %date, companies = rollups.len(), "daily rollup complete");
        Ok(rollups)
    }

    /// Reprocess any of the last `lookback_days` days that have call data
    /// but no rollup yet. Returns the number of days processed.
    pub async fn catch_up(&self, today: NaiveDate, lookback_days: u32) -> Result<u32, JobError> {
        let since = today - chrono::Duration::days(lookback_days as i64);
        let with_calls = self.summaries.dates_with_calls_since(since).await?;
        let with_rollups = self.rollups.dates_with_rollups_since(since).await?;

        let mut processed = 0;
        for date in with_calls {
            if date < today && !with_rollups.contains(&date) {
                info!(date = %date, "catch-up: day has call data but no rollup");
                self.rollup_for_date(date).await?;
                processed += 1;
            }
        }
        Ok(processed)
    }
}

fn aggregate(summaries: &[&CallSummary]) -> RollupCounts {
    let mut counts = RollupCounts {
        total_calls: summaries.len() as u32,
        by_outcome: BTreeMap::new(),
        by_tier: BTreeMap::new(),
        by_intent: BTreeMap::new(),
        hourly: vec![0; 24],
    };

    for summary in summaries {
        *counts.by_outcome.entry(summary.outcome.as_str().to_string()).or_default() += 1;
        if let Some(tier) = summary.tier_used {
            *counts.by_tier.entry(tier.as_str().to_string()).or_default() += 1;
        }
        *counts.by_intent.entry(summary.intent.as_str().to_string()).or_default() += 1;
        let hour = summary.started_at.hour() as usize;
        counts.hourly[hour] += 1;
    }

    counts
}
