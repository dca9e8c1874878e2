//! Hot-to-cold transcript migration. The invariant worth everything else
//! here: hot turn detail is never cleared until cold-storage upload is
//! confirmed.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::Mutex;
use tracing::{info, warn};

use frontdesk_store::repositories::{ColdObjectRef, TranscriptRepository};

use crate::JobError;

#[async_trait]
pub trait ColdStorage: Send + Sync {
    async fn upload(&self, object_key: &str, bytes: Vec<u8>) -> anyhow::Result<ColdObjectRef>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub archived: u32,
    pub failed: u32,
}

pub struct TranscriptArchiver {
    transcripts: Arc<dyn TranscriptRepository>,
    cold: Arc<dyn ColdStorage>,
    hot_retention: Duration,
}

impl TranscriptArchiver {
    pub fn new(
        transcripts: Arc<dyn TranscriptRepository>,
        cold: Arc<dyn ColdStorage>,
        hot_retention: Duration,
    ) -> Self {
        Self { transcripts, cold, hot_retention }
    }

    /// Archive every hot transcript older than the retention window.
    /// Upload failures leave the hot row untouched and the run continues;
    /// a later run picks the transcript up again.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ArchiveReport, JobError> {
        let cutoff = now
            - chrono::Duration::from_std(self.hot_retention)
                .map_err(|error| JobError::Codec(error.to_string()))?;
        let eligible = self.transcripts.list_hot_ended_before(cutoff).await?;

        let mut report = ArchiveReport::default();
        for transcript in eligible {
            let Some(turns_json) = transcript.turns_json.as_deref() else {
                continue;
            };
            let compressed = gzip(turns_json.as_bytes())
                .map_err(|error| JobError::Codec(error.to_string()))?;
            let object_key = format!(
                "transcripts/{}/{}.json.gz",
                transcript.company_id.0, transcript.call_id.0
            );

            match self.cold.upload(&object_key, compressed).await {
                Ok(cold_ref) => {
                    self.transcripts
                        .confirm_cold_migration(&transcript.call_id, cold_ref, now)
                        .await?;
                    report.archived += 1;
                }
                Err(error) => {
                    warn!(
                        call_id = %transcript.call_id.0,
                        %error,
                        "cold upload failed; hot transcript left intact"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(archived = report.archived, failed = report.failed, "transcript archive pass done");
        Ok(report)
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Test double with failure injection.
#[derive(Default)]
pub struct InMemoryColdStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: Mutex<bool>,
}

impl InMemoryColdStorage {
    pub async fn set_fail_uploads(&self, fail: bool) {
        *self.fail_uploads.lock().await = fail;
    }

    pub async fn object(&self, object_key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(object_key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl ColdStorage for InMemoryColdStorage {
    async fn upload(&self, object_key: &str, bytes: Vec<u8>) -> anyhow::Result<ColdObjectRef> {
        if *self.fail_uploads.lock().await {
            anyhow::bail!("cold storage rejected the upload");
        }
        self.objects.lock().await.insert(object_key.to_string(), bytes);
        Ok(ColdObjectRef { bucket: "frontdesk-cold".to_string(), object_key: object_key.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use frontdesk_core::domain::call::{CallId, CompanyId};
    use frontdesk_store::repositories::{
        CallTranscript, InMemoryTranscriptRepository, TranscriptRepository,
    };

    use super::{InMemoryColdStorage, TranscriptArchiver};

    fn transcript(call_id: &str, hours_old: i64) -> CallTranscript {
        CallTranscript {
            call_id: CallId(call_id.to_string()),
            company_id: CompanyId("co-1".to_string()),
            ended_at: Utc::now() - chrono::Duration::hours(hours_old),
            turn_count: 3,
            turns_json: Some(r#"[{"turn_number":1}]"#.to_string()),
            cold_ref: None,
            moved_to_cold_at: None,
        }
    }

    fn archiver(
        repo: Arc<InMemoryTranscriptRepository>,
        cold: Arc<InMemoryColdStorage>,
    ) -> TranscriptArchiver {
        TranscriptArchiver::new(repo, cold, Duration::from_secs(48 * 3600))
    }

    #[tokio::test]
    async fn old_hot_transcripts_move_to_cold_and_clear_hot_detail() {
        let repo = Arc::new(InMemoryTranscriptRepository::default());
        let cold = Arc::new(InMemoryColdStorage::default());
        repo.save(transcript("CA-old", 72)).await.expect("seed");
        repo.save(transcript("CA-fresh", 2)).await.expect("seed");

        let report = archiver(repo.clone(), cold.clone()).run(Utc::now()).await.expect("run");
        assert_eq!(report.archived, 1);
        assert_eq!(report.failed, 0);

        let archived = repo
            .find_by_call(&CallId("CA-old".to_string()))
            .await
            .expect("repo reachable")
            .expect("row kept");
        assert!(archived.turns_json.is_none(), "hot detail cleared after confirmation");
        assert!(archived.moved_to_cold_at.is_some());
        assert_eq!(archived.turn_count, 3, "summary count retained");
        let cold_ref = archived.cold_ref.expect("cold reference recorded");
        assert_eq!(cold_ref.object_key, "transcripts/co-1/CA-old.json.gz");

        // Fresh transcript untouched.
        let fresh = repo
            .find_by_call(&CallId("CA-fresh".to_string()))
            .await
            .expect("repo reachable")
            .expect("row kept");
        assert!(fresh.is_hot());

        // The uploaded object is real gzip of the hot payload.
        let bytes = cold.object("transcripts/co-1/CA-old.json.gz").await.expect("object stored");
        let mut decoder = flate2::read::GzDecoder::new(bytes.as_slice());
        let mut restored = String::new();
        decoder.read_to_string(&mut restored).expect("gunzip");
        assert!(restored.contains("turn_number"));
    }

    #[tokio::test]
    async fn upload_failure_leaves_hot_data_intact() {
        let repo = Arc::new(InMemoryTranscriptRepository::default());
        let cold = Arc::new(InMemoryColdStorage::default());
        cold.set_fail_uploads(true).await;
        repo.save(transcript("CA-old", 72)).await.expect("seed");

        let report = archiver(repo.clone(), cold.clone()).run(Utc::now()).await.expect("run");
        assert_eq!(report.archived, 0);
        assert_eq!(report.failed, 1);

        let row = repo
            .find_by_call(&CallId("CA-old".to_string()))
            .await
            .expect("repo reachable")
            .expect("row kept");
        assert!(row.turns_json.is_some(), "hot detail must survive a failed upload");
        assert!(row.moved_to_cold_at.is_none());
        assert_eq!(cold.len().await, 0);
    }

    #[tokio::test]
    async fn a_second_pass_over_an_archived_transcript_is_a_noop() {
        let repo = Arc::new(InMemoryTranscriptRepository::default());
        let cold = Arc::new(InMemoryColdStorage::default());
        repo.save(transcript("CA-old", 72)).await.expect("seed");

        let job = archiver(repo.clone(), cold.clone());
        job.run(Utc::now()).await.expect("first run");
        let report = job.run(Utc::now()).await.expect("second run");

        assert_eq!(report.archived, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(cold.len().await, 1);
    }
}
