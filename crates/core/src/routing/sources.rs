//! Retrieval-backed knowledge sources. Scoring is deterministic keyword
//! or term-frequency work; nothing here makes an external call. The
//! synthesizing LLM tier lives with the engine, next to its client.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{KnowledgeSource, ScoredResult, SourceKind};

/// One curated answer with the keywords that should surface it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KbEntry {
    pub keywords: Vec<String>,
    pub answer: String,
}

impl KbEntry {
    pub fn new(keywords: &[&str], answer: impl Into<String>) -> Self {
        Self {
            keywords: keywords.iter().map(|keyword| keyword.to_lowercase()).collect(),
            answer: answer.into(),
        }
    }
}

fn score_entry(entry: &KbEntry, query: &str) -> (f32, Vec<String>) {
    if entry.keywords.is_empty() {
        return (0.0, Vec::new());
    }
    let matched = entry
        .keywords
        .iter()
        .filter(|keyword| query.contains(keyword.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    let score = matched.len() as f32 / entry.keywords.len() as f32;
    (score, matched)
}

fn best_entry<'a>(entries: &'a [KbEntry], query: &str) -> Option<(&'a KbEntry, f32, Vec<String>)> {
    entries
        .iter()
        .map(|entry| {
            let (score, matched) = score_entry(entry, query);
            (entry, score, matched)
        })
        .filter(|(_, score, _)| *score > 0.0)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

fn result_from(
    source: SourceKind,
    best: Option<(&KbEntry, f32, Vec<String>)>,
) -> ScoredResult {
    match best {
        Some((entry, score, matched)) => ScoredResult {
            source,
            text: entry.answer.clone(),
            score,
            match_count: matched.len() as u32,
            matched_keywords: matched,
        },
        None => ScoredResult::empty(source),
    }
}

/// Company-curated knowledge base: hours, service area, brand policies.
pub struct CompanyKbSource {
    entries: Vec<KbEntry>,
}

impl CompanyKbSource {
    pub fn new(entries: Vec<KbEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl KnowledgeSource for CompanyKbSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CompanyKb
    }

    async fn search(&self, query: &str) -> anyhow::Result<ScoredResult> {
        Ok(result_from(SourceKind::CompanyKb, best_entry(&self.entries, query)))
    }
}

/// Trade-wide knowledge shared across companies in the same vertical.
pub struct TradeKbSource {
    pub trade: String,
    entries: Vec<KbEntry>,
}

impl TradeKbSource {
    pub fn new(trade: impl Into<String>, entries: Vec<KbEntry>) -> Self {
        Self { trade: trade.into(), entries }
    }
}

#[async_trait]
impl KnowledgeSource for TradeKbSource {
    fn kind(&self) -> SourceKind {
        SourceKind::TradeKb
    }

    async fn search(&self, query: &str) -> anyhow::Result<ScoredResult> {
        Ok(result_from(SourceKind::TradeKb, best_entry(&self.entries, query)))
    }
}

/// Canned response templates. Trigger keywords are intentionally narrow;
/// a template should only fire on a near-exact topical hit.
pub struct TemplateSource {
    templates: Vec<KbEntry>,
}

impl TemplateSource {
    pub fn new(templates: Vec<KbEntry>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl KnowledgeSource for TemplateSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Templates
    }

    async fn search(&self, query: &str) -> anyhow::Result<ScoredResult> {
        Ok(result_from(SourceKind::Templates, best_entry(&self.templates, query)))
    }
}

/// An answer learned from previous calls, weighted by how often it has
/// been confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LearnedInsight {
    pub entry: KbEntry,
    pub occurrences: u32,
}

pub struct InsightSource {
    insights: Vec<LearnedInsight>,
}

impl InsightSource {
    pub fn new(insights: Vec<LearnedInsight>) -> Self {
        Self { insights }
    }
}

#[async_trait]
impl KnowledgeSource for InsightSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Insights
    }

    async fn search(&self, query: &str) -> anyhow::Result<ScoredResult> {
        let best = self
            .insights
            .iter()
            .map(|insight| {
                let (keyword_score, matched) = score_entry(&insight.entry, query);
                // Rarely-confirmed insights are damped toward zero.
                let weight = insight.occurrences.min(5) as f32 / 5.0;
                (insight, keyword_score * (0.6 + 0.4 * weight), matched)
            })
            .filter(|(_, score, _)| *score > 0.0)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(match best {
            Some((insight, score, matched)) => ScoredResult {
                source: SourceKind::Insights,
                text: insight.entry.answer.clone(),
                score,
                match_count: matched.len() as u32,
                matched_keywords: matched,
            },
            None => ScoredResult::empty(SourceKind::Insights),
        })
    }
}

/// Deterministic term-frequency cosine scorer standing in for a vector
/// index. Documents are tokenized once at construction.
pub struct SemanticSource {
    documents: Vec<SemanticDocument>,
}

struct SemanticDocument {
    text: String,
    vector: BTreeMap<String, f32>,
}

impl SemanticSource {
    pub fn new(documents: Vec<String>) -> Self {
        let documents = documents
            .into_iter()
            .map(|text| {
                let vector = term_frequency(&text);
                SemanticDocument { text, vector }
            })
            .collect();
        Self { documents }
    }
}

fn term_frequency(text: &str) -> BTreeMap<String, f32> {
    let mut counts: BTreeMap<String, f32> = BTreeMap::new();
    for token in text.to_lowercase().split(|ch: char| !ch.is_alphanumeric()) {
        if token.len() < 3 {
            continue;
        }
        *counts.entry(token.to_string()).or_default() += 1.0;
    }
    counts
}

fn cosine(a: &BTreeMap<String, f32>, b: &BTreeMap<String, f32>) -> f32 {
    let dot: f32 = a
        .iter()
        .filter_map(|(term, weight)| b.get(term).map(|other| weight * other))
        .sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm_a: f32 = a.values().map(|weight| weight * weight).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|weight| weight * weight).sum::<f32>().sqrt();
    dot / (norm_a * norm_b)
}

#[async_trait]
impl KnowledgeSource for SemanticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Semantic
    }

    async fn search(&self, query: &str) -> anyhow::Result<ScoredResult> {
        let query_vector = term_frequency(query);
        let best = self
            .documents
            .iter()
            .map(|document| (document, cosine(&query_vector, &document.vector)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(match best {
            Some((document, score)) if score > 0.0 => {
                let shared = query_vector
                    .keys()
                    .filter(|term| document.vector.contains_key(*term))
                    .cloned()
                    .collect::<Vec<_>>();
                ScoredResult {
                    source: SourceKind::Semantic,
                    text: document.text.clone(),
                    score,
                    match_count: shared.len() as u32,
                    matched_keywords: shared,
                }
            }
            _ => ScoredResult::empty(SourceKind::Semantic),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::routing::{KnowledgeSource, SourceKind};

    use super::{
        CompanyKbSource, InsightSource, KbEntry, LearnedInsight, SemanticSource, TemplateSource,
    };

    #[tokio::test]
    async fn company_kb_scores_by_keyword_coverage() {
        let source = CompanyKbSource::new(vec![
            KbEntry::new(&["hours", "open"], "We are open 7am to 6pm, Monday through Saturday."),
            KbEntry::new(&["service", "area"], "We cover the whole metro area."),
        ]);

        let full = source.search("what are your hours are you open saturday").await.unwrap();
        assert_eq!(full.score, 1.0);
        assert_eq!(full.match_count, 2);
        assert!(full.text.contains("7am"));

        let partial = source.search("what are your hours").await.unwrap();
        assert_eq!(partial.score, 0.5);
    }

    #[tokio::test]
    async fn no_keyword_overlap_scores_zero() {
        let source = CompanyKbSource::new(vec![KbEntry::new(&["hours"], "answer")]);
        let result = source.search("completely unrelated").await.unwrap();
        assert_eq!(result.score, 0.0);
        assert!(result.text.is_empty());
    }

    #[tokio::test]
    async fn insight_weighting_prefers_frequently_confirmed_answers() {
        let source = InsightSource::new(vec![
            LearnedInsight {
                entry: KbEntry::new(&["filter"], "Most no-cooling calls are a clogged filter."),
                occurrences: 1,
            },
            LearnedInsight {
                entry: KbEntry::new(&["filter"], "Check the filter before booking a visit."),
                occurrences: 9,
            },
        ]);

        let result = source.search("my filter light is on").await.unwrap();
        assert_eq!(result.source, SourceKind::Insights);
        assert!(result.text.starts_with("Check the filter"));
    }

    #[tokio::test]
    async fn semantic_cosine_picks_the_closest_document() {
        let source = SemanticSource::new(vec![
            "Resetting the breaker panel after a trip".to_string(),
            "Draining and flushing a water heater tank".to_string(),
        ]);

        let result = source.search("how do i drain my water heater").await.unwrap();
        assert!(result.text.contains("water heater"));
        assert!(result.score > 0.3);
    }

    #[tokio::test]
    async fn template_requires_tight_topical_hit() {
        let source = TemplateSource::new(vec![KbEntry::new(
            &["after", "hours", "emergency"],
            "For after-hours emergencies we dispatch an on-call technician.",
        )]);

        let hit = source.search("is there an after hours emergency line").await.unwrap();
        assert_eq!(hit.score, 1.0);

        let miss = source.search("do you sell filters").await.unwrap();
        assert_eq!(miss.score, 0.0);
    }
}
