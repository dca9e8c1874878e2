//! Tiered knowledge lookup: a registry of typed sources walked in
//! configured priority order, first score at-or-above its threshold wins.

pub mod sources;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Score returned when no source accepts the query. Deliberately non-zero
/// so callers can tell "nothing matched" from "matched with low
/// confidence".
pub const NO_MATCH_SCORE: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    CompanyKb,
    TradeKb,
    Templates,
    Insights,
    Semantic,
    LlmFallback,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CompanyKb => "company_kb",
            Self::TradeKb => "trade_kb",
            Self::Templates => "templates",
            Self::Insights => "insights",
            Self::Semantic => "semantic",
            Self::LlmFallback => "llm_fallback",
        }
    }
}

/// One source's answer to one query. Ephemeral; consumed by the router.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredResult {
    pub source: SourceKind,
    pub text: String,
    pub score: f32,
    pub match_count: u32,
    pub matched_keywords: Vec<String>,
}

impl ScoredResult {
    pub fn empty(source: SourceKind) -> Self {
        Self { source, text: String::new(), score: 0.0, match_count: 0, matched_keywords: Vec::new() }
    }
}

/// Capability interface every lookup tier conforms to. Only the LLM
/// fallback tier may synthesize novel text; every other implementation
/// retrieves a stored answer.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn kind(&self) -> SourceKind;
    async fn search(&self, query: &str) -> anyhow::Result<ScoredResult>;
}

/// Typed source registry. Adding a tier is a registration, not an edit to
/// a conditional chain.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Box<dyn KnowledgeSource>>,
}

impl SourceRegistry {
    pub fn register<S>(&mut self, source: S)
    where
        S: KnowledgeSource + 'static,
    {
        self.sources.push(Box::new(source));
    }

    pub fn register_boxed(&mut self, source: Box<dyn KnowledgeSource>) {
        self.sources.push(source);
    }

    pub fn get(&self, kind: SourceKind) -> Option<&dyn KnowledgeSource> {
        self.sources.iter().find(|source| source.kind() == kind).map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// One entry in a company's router priority list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcePriority {
    pub source: SourceKind,
    pub threshold: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Selected,
    BelowThreshold,
    SourceFailed,
    NoMatch,
    FactRejected,
    CaptureInjected,
    BookingFailed,
}

/// Append-only audit record of one routing attempt (or one governance
/// rejection). Never mutated or pruned while the call is live.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub turn: u32,
    pub outcome: TraceOutcome,
    pub source: Option<SourceKind>,
    pub score: f32,
    pub match_count: u32,
    pub matched_keywords: Vec<String>,
    pub detail: String,
}

impl TraceEntry {
    pub fn new(turn: u32, outcome: TraceOutcome, detail: impl Into<String>) -> Self {
        Self {
            turn,
            outcome,
            source: None,
            score: 0.0,
            match_count: 0,
            matched_keywords: Vec::new(),
            detail: detail.into(),
        }
    }

    fn from_result(turn: u32, outcome: TraceOutcome, result: &ScoredResult, detail: String) -> Self {
        Self {
            turn,
            outcome,
            source: Some(result.source),
            score: result.score,
            match_count: result.match_count,
            matched_keywords: result.matched_keywords.clone(),
            detail,
        }
    }
}

/// The answer the router hands back to the calling handler.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutedAnswer {
    pub text: String,
    pub source: Option<SourceKind>,
    pub score: f32,
    pub matched: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteOutcome {
    pub answer: RoutedAnswer,
    pub attempts: Vec<TraceEntry>,
}

pub struct TieredKnowledgeRouter {
    registry: SourceRegistry,
}

impl TieredKnowledgeRouter {
    pub fn new(registry: SourceRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Walk `priorities` strictly in order and stop at the FIRST source
    /// whose score meets its threshold. This is first-match-wins by
    /// design: cheaper, more specific tiers sit earlier in the list, and
    /// a later tier that would have scored higher must not be consulted.
    /// A failing source is recorded with score 0 and the walk continues.
    pub async fn route(&self, query: &str, priorities: &[SourcePriority], turn: u32) -> RouteOutcome {
        let mut attempts = Vec::with_capacity(priorities.len());

        for priority in priorities {
            let Some(source) = self.registry.get(priority.source) else {
                attempts.push(TraceEntry {
                    turn,
                    outcome: TraceOutcome::SourceFailed,
                    source: Some(priority.source),
                    score: 0.0,
                    match_count: 0,
                    matched_keywords: Vec::new(),
                    detail: "source not registered".to_string(),
                });
                continue;
            };

            match source.search(query).await {
                Ok(result) => {
                    if result.score >= priority.threshold {
                        attempts.push(TraceEntry::from_result(
                            turn,
                            TraceOutcome::Selected,
                            &result,
                            format!(
                                "score {:.2} met threshold {:.2}",
                                result.score, priority.threshold
                            ),
                        ));
                        return RouteOutcome {
                            answer: RoutedAnswer {
                                text: result.text,
                                source: Some(result.source),
                                score: result.score,
                                matched: true,
                            },
                            attempts,
                        };
                    }
                    attempts.push(TraceEntry::from_result(
                        turn,
                        TraceOutcome::BelowThreshold,
                        &result,
                        format!(
                            "score {:.2} below threshold {:.2}",
                            result.score, priority.threshold
                        ),
                    ));
                }
                Err(error) => {
                    attempts.push(TraceEntry {
                        turn,
                        outcome: TraceOutcome::SourceFailed,
                        source: Some(priority.source),
                        score: 0.0,
                        match_count: 0,
                        matched_keywords: Vec::new(),
                        detail: error.to_string(),
                    });
                }
            }
        }

        attempts.push(TraceEntry::new(turn, TraceOutcome::NoMatch, "no source met its threshold"));
        RouteOutcome {
            answer: RoutedAnswer {
                text: String::new(),
                source: None,
                score: NO_MATCH_SCORE,
                matched: false,
            },
            attempts,
        }
    }
}

/// Default priority order: cheapest and most specific first, the
/// synthesizing LLM tier always last.
pub fn default_priorities() -> Vec<SourcePriority> {
    vec![
        SourcePriority { source: SourceKind::CompanyKb, threshold: 0.6 },
        SourcePriority { source: SourceKind::TradeKb, threshold: 0.6 },
        SourcePriority { source: SourceKind::Templates, threshold: 0.7 },
        SourcePriority { source: SourceKind::Insights, threshold: 0.65 },
        SourcePriority { source: SourceKind::Semantic, threshold: 0.5 },
        SourcePriority { source: SourceKind::LlmFallback, threshold: 0.3 },
    ]
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::{
        KnowledgeSource, ScoredResult, SourceKind, SourcePriority, SourceRegistry, TieredKnowledgeRouter,
        TraceOutcome, NO_MATCH_SCORE,
    };

    struct FixedSource {
        kind: SourceKind,
        score: f32,
        fail: bool,
    }

    #[async_trait]
    impl KnowledgeSource for FixedSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn search(&self, _query: &str) -> anyhow::Result<ScoredResult> {
            if self.fail {
                anyhow::bail!("simulated source outage");
            }
            Ok(ScoredResult {
                source: self.kind,
                text: format!("answer from {}", self.kind.as_str()),
                score: self.score,
                match_count: 1,
                matched_keywords: vec!["keyword".to_string()],
            })
        }
    }

    fn router(sources: Vec<FixedSource>) -> TieredKnowledgeRouter {
        let mut registry = SourceRegistry::default();
        for source in sources {
            registry.register(source);
        }
        TieredKnowledgeRouter::new(registry)
    }

    fn priorities(entries: &[(SourceKind, f32)]) -> Vec<SourcePriority> {
        entries
            .iter()
            .map(|(source, threshold)| SourcePriority { source: *source, threshold: *threshold })
            .collect()
    }

    #[tokio::test]
    async fn first_match_wins_beats_higher_scoring_later_source() {
        let router = router(vec![
            FixedSource { kind: SourceKind::CompanyKb, score: 0.85, fail: false },
            FixedSource { kind: SourceKind::Semantic, score: 0.95, fail: false },
        ]);

        let outcome = router
            .route(
                "water heater pilot light",
                &priorities(&[(SourceKind::CompanyKb, 0.80), (SourceKind::Semantic, 0.50)]),
                1,
            )
            .await;

        assert!(outcome.answer.matched);
        assert_eq!(outcome.answer.source, Some(SourceKind::CompanyKb));
        assert_eq!(outcome.attempts.len(), 1, "later sources must not be consulted");
    }

    #[tokio::test]
    async fn below_threshold_falls_through_and_records_the_attempt() {
        let router = router(vec![
            FixedSource { kind: SourceKind::CompanyKb, score: 0.4, fail: false },
            FixedSource { kind: SourceKind::TradeKb, score: 0.7, fail: false },
        ]);

        let outcome = router
            .route(
                "thermostat",
                &priorities(&[(SourceKind::CompanyKb, 0.6), (SourceKind::TradeKb, 0.6)]),
                3,
            )
            .await;

        assert_eq!(outcome.answer.source, Some(SourceKind::TradeKb));
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].outcome, TraceOutcome::BelowThreshold);
        assert_eq!(outcome.attempts[1].outcome, TraceOutcome::Selected);
        assert!(outcome.attempts.iter().all(|attempt| attempt.turn == 3));
    }

    #[tokio::test]
    async fn source_failure_is_traced_with_zero_score_and_walk_continues() {
        let router = router(vec![
            FixedSource { kind: SourceKind::CompanyKb, score: 0.9, fail: true },
            FixedSource { kind: SourceKind::TradeKb, score: 0.8, fail: false },
        ]);

        let outcome = router
            .route(
                "breaker",
                &priorities(&[(SourceKind::CompanyKb, 0.6), (SourceKind::TradeKb, 0.6)]),
                1,
            )
            .await;

        assert_eq!(outcome.attempts[0].outcome, TraceOutcome::SourceFailed);
        assert_eq!(outcome.attempts[0].score, 0.0);
        assert!(outcome.answer.matched);
        assert_eq!(outcome.answer.source, Some(SourceKind::TradeKb));
    }

    #[tokio::test]
    async fn no_acceptance_returns_designated_no_match_result() {
        let router = router(vec![FixedSource { kind: SourceKind::CompanyKb, score: 0.2, fail: false }]);

        let outcome =
            router.route("anything", &priorities(&[(SourceKind::CompanyKb, 0.6)]), 2).await;

        assert!(!outcome.answer.matched);
        assert_eq!(outcome.answer.score, NO_MATCH_SCORE);
        assert_eq!(outcome.attempts.last().unwrap().outcome, TraceOutcome::NoMatch);
    }

    #[tokio::test]
    async fn replaying_an_identical_query_produces_an_identical_trace() {
        let router = router(vec![
            FixedSource { kind: SourceKind::CompanyKb, score: 0.4, fail: false },
            FixedSource { kind: SourceKind::TradeKb, score: 0.7, fail: false },
        ]);
        let list = priorities(&[(SourceKind::CompanyKb, 0.6), (SourceKind::TradeKb, 0.6)]);

        let first = router.route("same query", &list, 1).await;
        let second = router.route("same query", &list, 1).await;

        assert_eq!(first.attempts, second.attempts);
        assert_eq!(first.answer, second.answer);
    }
}
