//! Lifecycle jobs: pre-aggregation, hot-to-cold transcript migration, and
//! retention enforcement. All three read durable storage only, never live
//! sessions, and are safe to re-run and to run alongside live calls.

pub mod archiver;
pub mod purge;
pub mod rollup;

use thiserror::Error;

use frontdesk_store::repositories::RepositoryError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("cold storage failure: {0}")]
    ColdStorage(String),
    #[error("retention violation: {0}")]
    RetentionViolation(String),
    #[error("codec failure: {0}")]
    Codec(String),
}

pub use archiver::{ArchiveReport, ColdStorage, InMemoryColdStorage, TranscriptArchiver};
pub use purge::{DataPurge, PurgeMode, PurgeReport};
pub use rollup::DailyStatsRollup;
