//! The synthesizing knowledge tier. Always last in the priority walk and
//! the only source allowed to produce novel text.

use std::sync::Arc;

use async_trait::async_trait;

use frontdesk_core::routing::{KnowledgeSource, ScoredResult, SourceKind};

use crate::llm::LlmClient;

/// Confidence reported for synthesized answers: above typical fallback
/// thresholds, below every retrieval tier's acceptance band.
const SYNTHESIZED_SCORE: f32 = 0.55;

pub struct LlmFallbackSource {
    client: Arc<dyn LlmClient>,
    company_context: String,
}

impl LlmFallbackSource {
    pub fn new(client: Arc<dyn LlmClient>, company_context: impl Into<String>) -> Self {
        Self { client, company_context: company_context.into() }
    }
}

#[async_trait]
impl KnowledgeSource for LlmFallbackSource {
    fn kind(&self) -> SourceKind {
        SourceKind::LlmFallback
    }

    async fn search(&self, query: &str) -> anyhow::Result<ScoredResult> {
        let prompt = format!(
            "You answer one caller question for a service-trade front desk.\n{}\n\
             Caller asked: {query}\n\
             Answer in one or two short, friendly sentences. Plain text only.",
            self.company_context
        );
        let text = self.client.complete(&prompt).await?;
        Ok(ScoredResult {
            source: SourceKind::LlmFallback,
            text: text.trim().to_string(),
            score: SYNTHESIZED_SCORE,
            match_count: 0,
            matched_keywords: Vec::new(),
        })
    }
}
