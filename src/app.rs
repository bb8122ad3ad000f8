use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::ai::{ClaudeClient, DeepClassifier, DeepExtractor};
use crate::classify::{Classifier, Stage};
use crate::config::Config;
use crate::db::{ClearOutcome, IntegrityIncident, Repository};
use crate::dedup::{Deduplicator, FreshDraft, MatchRule, RerunOutcome};
use crate::error::{AppError, Result};
use crate::extract::{as_structured, extract, extract_from_details, ExtractionFailure};
use crate::models::{EventDraft, FailureKind, MasterEvent, PipelineFailure, RawPost, RunSummary};
use crate::sources::ScraperRegistry;

/// Source selector accepted by every command.
pub const ALL_SOURCES: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTarget {
    Id(i64),
    Random,
    Next,
}

impl FromStr for ShowTarget {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(ShowTarget::Random),
            "next" => Ok(ShowTarget::Next),
            other => other
                .parse()
                .map(ShowTarget::Id)
                .map_err(|_| AppError::Config(format!("expected an event id, 'random' or 'next', got '{}'", other))),
        }
    }
}

/// Per-run replacements for the configured match thresholds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupOverrides {
    pub title_similarity: Option<f64>,
    pub time_window_minutes: Option<i64>,
}

enum ClassifyStep {
    Skipped,
    Done(Stage, Option<PipelineFailure>),
}

enum ExtractStep {
    Draft(EventDraft),
    Flag(ExtractionFailure),
    /// The deep extractor could not be reached; nothing is decided.
    Unavailable(AppError),
}

enum MergeStep {
    Skipped,
    Merged { changed: bool },
    Failed { extracted: bool, failure: PipelineFailure },
}

pub struct App {
    config: Config,
    repository: Arc<Repository>,
    classifier: Classifier,
    extractor: Option<Arc<dyn DeepExtractor>>,
    deep_timeout: Duration,
    dedup: Deduplicator,
    registry: ScraperRegistry,
}

fn transient(post_id: i64, source: String, error: &AppError) -> PipelineFailure {
    PipelineFailure {
        kind: FailureKind::Transient,
        raw_post_id: post_id,
        source,
        master_event_id: None,
        detail: error.to_string(),
    }
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let (deep, extractor): (Option<Arc<dyn DeepClassifier>>, Option<Arc<dyn DeepExtractor>>) =
            match &config.anthropic_api_key {
                Some(key) => {
                    let client = Arc::new(ClaudeClient::new(key.clone(), &config.classifier)?);
                    (Some(client.clone()), Some(client))
                }
                None => {
                    tracing::warn!("No Anthropic API key configured; uncertain posts stay pending");
                    (None, None)
                }
            };
        let registry = ScraperRegistry::from_config(&config)?;
        Self::with_parts(config, registry, deep, extractor).await
    }

    pub async fn with_parts(
        config: Config,
        registry: ScraperRegistry,
        deep: Option<Arc<dyn DeepClassifier>>,
        extractor: Option<Arc<dyn DeepExtractor>>,
    ) -> Result<Self> {
        let repository = Arc::new(Repository::new(&config.db_path, config.dedup.calendar_tz()).await?);
        let deep_timeout = Duration::from_secs(config.classifier.timeout_secs);
        let classifier = Classifier::new(deep, deep_timeout);
        let dedup = Deduplicator::new(
            Arc::clone(&repository),
            MatchRule::from_config(&config.dedup),
            config.source_priority.clone(),
        );

        Ok(Self {
            config,
            repository,
            classifier,
            extractor,
            deep_timeout,
            dedup,
            registry,
        })
    }

    /// Every source name the app knows of, configured or registered.
    fn known_sources(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.registry.names().into_iter().collect();
        names.extend(self.config.sources.iter().map(|s| s.name.clone()));
        names.into_iter().collect()
    }

    fn select(&self, selector: &str) -> Vec<String> {
        if selector == ALL_SOURCES {
            self.known_sources()
        } else {
            vec![selector.to_string()]
        }
    }

    fn selector_filter(selector: Option<&str>) -> Option<String> {
        selector.filter(|s| *s != ALL_SOURCES).map(String::from)
    }

    fn is_trusted(&self, source: &str) -> bool {
        self.config.source(source).is_some_and(|s| s.trusted)
    }

    /// Scrapes the selected sources and stores their posts.
    pub async fn fetch(&self, selector: &str, cancel: &CancellationToken) -> Result<RunSummary> {
        let mut scrapers = Vec::new();
        for name in self.select(selector) {
            scrapers.push(self.registry.get(&name)?);
        }

        let results: Vec<_> = stream::iter(scrapers)
            .map(|scraper| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let result = tokio::select! {
                    result = scraper.fetch() => result,
                    _ = cancel.cancelled() => return None,
                };
                match result {
                    Ok(posts) => Some((scraper.source().to_string(), posts)),
                    Err(e) => {
                        tracing::warn!(source = scraper.source(), "Failed to fetch: {}", e);
                        None
                    }
                }
            })
            .buffer_unordered(self.config.pipeline.concurrency)
            .filter_map(|r| async { r })
            .collect()
            .await;

        let mut summary = RunSummary::default();
        for (source, posts) in results {
            let (mut inserted, mut changed) = (0, 0);
            for post in posts {
                if cancel.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                let upsert = self.repository.upsert_raw_post(post).await?;
                summary.fetched += 1;
                if upsert.inserted {
                    inserted += 1;
                } else if upsert.content_changed {
                    changed += 1;
                }
            }
            tracing::debug!(source = %source, inserted, changed, "Stored fetched posts");
        }
        summary.cancelled |= cancel.is_cancelled();

        tracing::info!("Fetch complete: {}", summary);
        Ok(summary)
    }

    /// Classifies pending posts, then extracts and merges confirmed events.
    pub async fn process(&self, selector: Option<&str>, cancel: &CancellationToken) -> Result<RunSummary> {
        let source = Self::selector_filter(selector);
        let mut summary = RunSummary::default();

        let posts = self.repository.posts_to_classify(source.clone()).await?;
        let steps: Vec<(i64, String, Result<ClassifyStep>)> = stream::iter(posts)
            .map(|post| async move {
                let (id, source) = (post.id, post.source.clone());
                (id, source, self.classify_one(post, cancel).await)
            })
            .buffer_unordered(self.config.pipeline.concurrency)
            .collect()
            .await;
        for (id, source, step) in steps {
            let step = match step {
                Ok(step) => step,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(post_id = id, source = %source, "Classification not stored: {}", e);
                    summary.record_failure(transient(id, source, &e));
                    continue;
                }
            };
            match step {
                ClassifyStep::Skipped => summary.cancelled = true,
                ClassifyStep::Done(Stage::Pending, _) => summary.pending += 1,
                ClassifyStep::Done(_, failure) => {
                    summary.classified += 1;
                    if let Some(failure) = failure {
                        summary.record_failure(failure);
                    }
                }
            }
        }

        if !cancel.is_cancelled() {
            let posts = self.repository.posts_to_merge(source).await?;
            let steps: Vec<(i64, String, Result<MergeStep>)> = stream::iter(posts)
                .map(|post| async move {
                    let (id, source) = (post.id, post.source.clone());
                    (id, source, self.merge_one(post, cancel).await)
                })
                .buffer_unordered(self.config.pipeline.concurrency)
                .collect()
                .await;
            for (id, source, step) in steps {
                let step = match step {
                    Ok(step) => step,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(post_id = id, source = %source, "Merge not stored: {}", e);
                        summary.record_failure(transient(id, source, &e));
                        continue;
                    }
                };
                match step {
                    MergeStep::Skipped => summary.cancelled = true,
                    MergeStep::Merged { changed } => {
                        summary.extracted += 1;
                        if changed {
                            summary.merged += 1;
                        }
                    }
                    MergeStep::Failed { extracted, failure } => {
                        if extracted {
                            summary.extracted += 1;
                        }
                        summary.record_failure(failure);
                    }
                }
            }
        }
        summary.cancelled |= cancel.is_cancelled();

        tracing::info!("Processing complete: {}", summary);
        Ok(summary)
    }

    async fn classify_one(&self, post: RawPost, cancel: &CancellationToken) -> Result<ClassifyStep> {
        if cancel.is_cancelled() {
            return Ok(ClassifyStep::Skipped);
        }
        let trusted = self.is_trusted(&post.source);
        let outcome = tokio::select! {
            outcome = self.classifier.classify(&post, trusted) => outcome,
            _ = cancel.cancelled() => return Ok(ClassifyStep::Skipped),
        };

        if outcome.is_new() {
            self.repository
                .save_classification(post.id, outcome.classification.clone(), post.content_hash.clone())
                .await?;
        }
        tracing::debug!(
            post_id = post.id,
            source = %post.source,
            status = %outcome.classification.status,
            stage = ?outcome.stage,
            "Classified post"
        );

        let failure = (outcome.stage == Stage::Unparseable).then(|| PipelineFailure {
            kind: FailureKind::TerminalContent,
            raw_post_id: post.id,
            source: post.source.clone(),
            master_event_id: None,
            detail: outcome.classification.evidence.clone(),
        });
        Ok(ClassifyStep::Done(outcome.stage, failure))
    }

    async fn merge_one(&self, post: RawPost, cancel: &CancellationToken) -> Result<MergeStep> {
        if cancel.is_cancelled() {
            return Ok(MergeStep::Skipped);
        }

        let draft = match self.extract_draft(&post, false).await? {
            ExtractStep::Draft(draft) => draft,
            ExtractStep::Unavailable(e) => {
                return Ok(MergeStep::Failed {
                    extracted: false,
                    failure: transient(post.id, post.source, &e),
                });
            }
            ExtractStep::Flag(failure) => {
                tracing::warn!(post_id = post.id, source = %post.source, "Flagged for review: {}", failure);
                self.repository
                    .flag_for_review(post.id, failure.to_string(), post.content_hash.clone())
                    .await?;
                return Ok(MergeStep::Failed {
                    extracted: false,
                    failure: PipelineFailure {
                        kind: FailureKind::TerminalContent,
                        raw_post_id: post.id,
                        source: post.source,
                        master_event_id: None,
                        detail: failure.to_string(),
                    },
                });
            }
        };

        match self.dedup.merge(draft, &post.content_hash).await {
            Ok(outcome) => Ok(MergeStep::Merged {
                changed: outcome.changed,
            }),
            Err(AppError::Integrity {
                raw_post_id,
                existing,
                attempted,
            }) => Ok(MergeStep::Failed {
                extracted: true,
                failure: PipelineFailure {
                    kind: FailureKind::Integrity,
                    raw_post_id,
                    source: post.source,
                    master_event_id: Some(existing),
                    detail: match attempted {
                        Some(attempted) => format!(
                            "already linked to master event {}, refused move to {}",
                            existing, attempted
                        ),
                        None => format!(
                            "already linked to master event {}, no longer matches it",
                            existing
                        ),
                    },
                },
            }),
            Err(e) => Err(e),
        }
    }

    /// Reads a draft from the post, asking the deep extractor when the
    /// regular reader finds no complete event in free text. With
    /// `reuse_merged`, a post whose current content already has a link
    /// keeps that link's draft instead of a new deep call.
    async fn extract_draft(&self, post: &RawPost, reuse_merged: bool) -> Result<ExtractStep> {
        let tz = self.config.source_tz(&post.source);
        let failure = match extract(post, tz) {
            Ok(draft) => return Ok(ExtractStep::Draft(draft)),
            Err(failure) => failure,
        };

        let current = post.extracted_hash.as_deref() == Some(post.content_hash.as_str());
        if post.review_reason.is_some() && current {
            return Ok(ExtractStep::Flag(failure));
        }
        if reuse_merged && current {
            if let Some(link) = self.repository.link_for_raw_post(post.id).await? {
                return Ok(ExtractStep::Draft(link.draft));
            }
        }
        let extractor = match &self.extractor {
            Some(extractor) if as_structured(&post.content).is_none() => extractor,
            _ => return Ok(ExtractStep::Flag(failure)),
        };

        let details = match tokio::time::timeout(
            self.deep_timeout,
            extractor.extract_details(&post.content, post.fetched_at),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.deep_timeout)),
        };
        match details {
            Ok(details) => match extract_from_details(post, &details, tz) {
                Ok(draft) => {
                    tracing::debug!(post_id = post.id, source = %post.source, "Read event details with the deep extractor");
                    Ok(ExtractStep::Draft(draft))
                }
                Err(deep_failure) => {
                    tracing::debug!(post_id = post.id, "Deep extractor found no event either: {}", deep_failure);
                    Ok(ExtractStep::Flag(failure))
                }
            },
            Err(e) => {
                tracing::warn!(post_id = post.id, source = %post.source, "Deep extraction unavailable: {}", e);
                Ok(ExtractStep::Unavailable(e))
            }
        }
    }

    pub async fn list(&self, selector: Option<&str>) -> Result<Vec<MasterEvent>> {
        self.repository
            .list_master_events(Self::selector_filter(selector))
            .await
    }

    pub async fn list_flagged(&self) -> Result<Vec<RawPost>> {
        self.repository.flagged_posts().await
    }

    /// Removes the selected sources' links. Runs with the whole table locked
    /// so no merge observes a half-cleared bucket.
    pub async fn clear(&self, selector: &str) -> Result<ClearOutcome> {
        let _guard = self.dedup.locks().lock_table().await;
        let mut total = ClearOutcome::default();
        for source in self.select(selector) {
            let outcome = self.repository.clear_source(source.clone()).await?;
            tracing::info!(
                source = %source,
                links_removed = outcome.links_removed,
                events_removed = outcome.events_removed,
                "Cleared source"
            );
            total.links_removed += outcome.links_removed;
            total.events_removed += outcome.events_removed;
        }
        Ok(total)
    }

    pub async fn show(&self, target: ShowTarget) -> Result<Option<MasterEvent>> {
        match target {
            ShowTarget::Id(id) => self.repository.get_master_event(id).await,
            ShowTarget::Random => self.repository.random_master_event().await,
            ShowTarget::Next => self.repository.next_upcoming(Utc::now()).await,
        }
    }

    /// Re-extracts every confirmed event of the selected sources and
    /// re-clusters the buckets they touch from scratch.
    pub async fn deduplicate(
        &self,
        selector: &str,
        overrides: DedupOverrides,
    ) -> Result<(RunSummary, RerunOutcome)> {
        let rule = self.rule_with(overrides)?;
        let sources = self.select(selector);
        let mut summary = RunSummary::default();
        let mut fresh = Vec::new();

        for source in &sources {
            for post in self.repository.event_posts(source.clone()).await? {
                match self.extract_draft(&post, true).await? {
                    ExtractStep::Draft(draft) => {
                        summary.extracted += 1;
                        fresh.push(FreshDraft {
                            draft,
                            content_hash: Some(post.content_hash),
                        });
                    }
                    ExtractStep::Unavailable(e) => {
                        // Keep what is linked today until the extractor answers.
                        if let Some(link) = self.repository.link_for_raw_post(post.id).await? {
                            fresh.push(FreshDraft {
                                draft: link.draft,
                                content_hash: None,
                            });
                        }
                        summary.record_failure(transient(post.id, post.source, &e));
                    }
                    ExtractStep::Flag(failure) => {
                        self.repository
                            .flag_for_review(post.id, failure.to_string(), post.content_hash.clone())
                            .await?;
                        summary.record_failure(PipelineFailure {
                            kind: FailureKind::TerminalContent,
                            raw_post_id: post.id,
                            source: post.source,
                            master_event_id: None,
                            detail: failure.to_string(),
                        });
                    }
                }
            }
        }

        let outcome = self.dedup.rerun(&sources, fresh, Some(rule)).await?;
        summary.merged = outcome.rewrite.links_written;
        Ok((summary, outcome))
    }

    fn rule_with(&self, overrides: DedupOverrides) -> Result<MatchRule> {
        let mut dedup = self.config.dedup.clone();
        if let Some(similarity) = overrides.title_similarity {
            dedup.title_similarity = similarity;
        }
        if let Some(minutes) = overrides.time_window_minutes {
            dedup.max_start_delta_minutes = minutes;
        }
        if !(0.0..=1.0).contains(&dedup.title_similarity) {
            return Err(AppError::Config(format!(
                "title similarity must be within [0, 1], got {}",
                dedup.title_similarity
            )));
        }
        if dedup.max_start_delta_minutes < 0 {
            return Err(AppError::Config("time window must not be negative".to_string()));
        }
        Ok(MatchRule::from_config(&dedup))
    }

    pub async fn incidents(&self) -> Result<Vec<IntegrityIncident>> {
        self.repository.incidents().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Judgment;
    use crate::config::{FetcherConfig, SourceConfig};
    use crate::models::EventStatus;
    use async_trait::async_trait;
    use std::io::Write;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    /// Judges anything mentioning "fest" or the event vocabulary below as an event.
    struct KeywordJudge {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeepClassifier for KeywordJudge {
        fn name(&self) -> &str {
            "keyword-judge"
        }

        async fn judge(&self, content: &str) -> Result<Judgment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let lower = content.to_lowercase();
            let is_event = ["fair", "night", "fest", "quiz"].iter().any(|w| lower.contains(w));
            Ok(Judgment {
                is_event,
                confidence: 0.9,
                explanation: "keyword judge".to_string(),
            })
        }
    }

    /// Reads the garden party out of its post; fails while `down` is set.
    struct GardenReader {
        calls: AtomicUsize,
        down: AtomicBool,
    }

    #[async_trait]
    impl DeepExtractor for GardenReader {
        async fn extract_details(
            &self,
            content: &str,
            _posted_at: chrono::DateTime<Utc>,
        ) -> Result<Map<String, Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                return Err(AppError::ClaudeApi("HTTP 529: overloaded".to_string()));
            }
            let details = if content.starts_with("Sommerfest") {
                json!({"title": "Sommerfest i hagen", "start_time": "2025-06-20T18:00:00",
                       "end_time": null, "location": "Hagen bak Ifi"})
            } else {
                json!({"title": null, "start_time": null})
            };
            Ok(details.as_object().cloned().unwrap_or_default())
        }
    }

    fn snapshot(items: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(items.as_bytes()).unwrap();
        file
    }

    struct Harness {
        app: App,
        judge: Arc<KeywordJudge>,
        _files: Vec<NamedTempFile>,
    }

    async fn harness(navet: &str, peoply: &str) -> Harness {
        harness_with(navet, peoply, None).await
    }

    async fn harness_with(navet: &str, peoply: &str, extractor: Option<Arc<dyn DeepExtractor>>) -> Harness {
        let files = vec![snapshot(navet), snapshot(peoply)];
        let mut config = Config::default();
        config.db_path = ":memory:".to_string();
        config.sources = vec![
            SourceConfig {
                name: "Navet".to_string(),
                timezone: "Europe/Oslo".to_string(),
                trusted: true,
                fetcher: FetcherConfig::File {
                    path: files[0].path().to_path_buf(),
                },
            },
            SourceConfig {
                name: "Peoply".to_string(),
                timezone: "Europe/Oslo".to_string(),
                trusted: false,
                fetcher: FetcherConfig::File {
                    path: files[1].path().to_path_buf(),
                },
            },
        ];

        let judge = Arc::new(KeywordJudge {
            calls: AtomicUsize::new(0),
        });
        let registry = ScraperRegistry::from_config(&config).unwrap();
        let deep: Arc<dyn DeepClassifier> = judge.clone();
        let app = App::with_parts(config, registry, Some(deep), extractor).await.unwrap();
        Harness {
            app,
            judge,
            _files: files,
        }
    }

    const NAVET: &str = r#"[
        {"id": "cf", "title": "Career Fair", "startDate": "2025-03-10T13:00:00Z",
         "locationName": "Ole-Johan Dahls hus", "url": "https://ifinavet.no/events/cf"}
    ]"#;

    const PEOPLY: &str = r#"[
        {"id": "p-cf", "content": "career fair!!\n10.03.2025 kl. 14:30\nBli med!"},
        {"id": "p-bg", "content": "Board Game Night\n10.03.2025 kl. 20:00\nTa med spill"},
        {"id": "p-chat", "content": "Noen som har sett laderen min?"}
    ]"#;

    async fn run(app: &App) -> RunSummary {
        let cancel = CancellationToken::new();
        app.fetch(ALL_SOURCES, &cancel).await.unwrap();
        app.process(None, &cancel).await.unwrap()
    }

    #[tokio::test]
    async fn pipeline_merges_cross_source_duplicates() {
        let h = harness(NAVET, PEOPLY).await;
        let summary = run(&h.app).await;
        assert_eq!(summary.classified, 4);
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.extracted, 3);
        assert_eq!(summary.merged, 3);
        assert_eq!(summary.failed, 0);
        // The trusted Navet item and the chatter never reach the judge.
        assert_eq!(h.judge.calls.load(Ordering::SeqCst), 2);

        let events = h.app.list(None).await.unwrap();
        assert_eq!(events.len(), 2);

        let fair = events.iter().find(|e| e.links.len() == 2).unwrap();
        assert_eq!(fair.title, "Career Fair");
        assert_eq!(fair.canonical_link().unwrap().source, "Navet");
        assert_eq!(fair.location.as_deref(), Some("Ole-Johan Dahls hus"));

        let games = events.iter().find(|e| e.title == "Board Game Night").unwrap();
        assert_eq!(games.links.len(), 1);
        assert_eq!(games.canonical_link().unwrap().source, "Peoply");

        assert_eq!(h.app.list(Some("Navet")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reprocessing_changes_nothing() {
        let h = harness(NAVET, PEOPLY).await;
        run(&h.app).await;
        let before = h.app.list(None).await.unwrap();

        let again = run(&h.app).await;
        assert_eq!(again.classified, 0);
        assert_eq!(again.merged, 0);
        assert_eq!(h.judge.calls.load(Ordering::SeqCst), 2);

        let after = h.app.list(None).await.unwrap();
        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.updated_at, b.updated_at);
            assert_eq!(a.links.len(), b.links.len());
        }
    }

    #[tokio::test]
    async fn clear_cascades_and_reprocess_restores() {
        let h = harness(NAVET, PEOPLY).await;
        run(&h.app).await;

        let cleared = h.app.clear("Navet").await.unwrap();
        assert_eq!(cleared.links_removed, 1);
        assert_eq!(cleared.events_removed, 0);
        let fair = h
            .app
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.title.to_lowercase().starts_with("career"))
            .unwrap();
        assert_eq!(fair.title, "career fair!!");
        assert_eq!(fair.canonical_link().unwrap().source, "Peoply");

        let cleared = h.app.clear("Peoply").await.unwrap();
        assert_eq!(cleared.events_removed, 2);
        assert!(h.app.list(None).await.unwrap().is_empty());

        let summary = h.app.process(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.merged, 3);
        assert_eq!(h.app.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn incomplete_event_is_flagged_once() {
        let peoply = r#"[{"id": "p-fest", "content": "Sommerfest i hagen!\nBli med, mer info kommer"}]"#;
        let h = harness("[]", peoply).await;
        let summary = run(&h.app).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].kind, FailureKind::TerminalContent);

        let flagged = h.app.list_flagged().await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].status, Some(EventStatus::IsEventLlm));
        assert_eq!(flagged[0].review_reason.as_deref(), Some("no start time found"));

        let again = h.app.process(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(again.failed, 0);
        assert!(h.app.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deep_extractor_reads_what_the_text_reader_cannot() {
        let peoply = r#"[{"id": "p-fest", "content": "Sommerfest i hagen!\nBli med, mer info kommer"}]"#;
        let reader = Arc::new(GardenReader {
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(true),
        });
        let h = harness_with("[]", peoply, Some(reader.clone())).await;

        // An outage is retried later, never flagged.
        let summary = run(&h.app).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].kind, FailureKind::Transient);
        assert!(h.app.list_flagged().await.unwrap().is_empty());

        reader.down.store(false, Ordering::SeqCst);
        let summary = h.app.process(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.merged, 1);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);

        let events = h.app.list(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Sommerfest i hagen");
        assert_eq!(events[0].location.as_deref(), Some("Hagen bak Ifi"));
        assert_eq!(events[0].format_local(events[0].start, "%Y-%m-%d %H:%M"), "2025-06-20 18:00");

        // A rerun keeps the merged details without asking again.
        let (summary, outcome) = h.app.deduplicate(ALL_SOURCES, DedupOverrides::default()).await.unwrap();
        assert_eq!(summary.extracted, 1);
        assert_eq!(outcome.clusters, 1);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.app.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_error_on_one_post_does_not_abort_the_batch() {
        let h = harness(NAVET, PEOPLY).await;
        h.app
            .repository
            .execute_sql(
                "CREATE TRIGGER no_games BEFORE INSERT ON master_events
                 WHEN NEW.title = 'Board Game Night'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .await
            .unwrap();

        let summary = run(&h.app).await;
        assert_eq!(summary.merged, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].kind, FailureKind::Transient);
        assert!(h.app.list_flagged().await.unwrap().is_empty());

        h.app.repository.execute_sql("DROP TRIGGER no_games;").await.unwrap();
        let retried = h.app.process(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(retried.merged, 1);
        assert_eq!(retried.failed, 0);
        assert_eq!(h.app.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn refused_remap_is_logged_once() {
        let h = harness(NAVET, PEOPLY).await;
        run(&h.app).await;

        let changed = PEOPLY.replace(
            r"career fair!!\n10.03.2025 kl. 14:30\nBli med!",
            r"Quiz night\n10.03.2025 kl. 14:30",
        );
        std::fs::write(h._files[1].path(), changed).unwrap();
        let summary = run(&h.app).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].kind, FailureKind::Integrity);
        assert_eq!(h.app.incidents().await.unwrap().len(), 1);

        let again = h.app.process(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(again.failed, 0);
        assert_eq!(h.app.incidents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_commits_nothing_further() {
        let h = harness(NAVET, PEOPLY).await;
        let cancel = CancellationToken::new();
        h.app.fetch(ALL_SOURCES, &cancel).await.unwrap();

        cancel.cancel();
        let summary = h.app.process(None, &cancel).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.classified, 0);
        assert_eq!(h.judge.calls.load(Ordering::SeqCst), 0);

        let resumed = h.app.process(None, &CancellationToken::new()).await.unwrap();
        assert_eq!(resumed.merged, 3);
    }

    #[tokio::test]
    async fn deduplicate_with_looser_window_consolidates() {
        let peoply = r#"[
            {"id": "p-cf", "content": "Career Fair\n10.03.2025 kl. 17:30"}
        ]"#;
        let h = harness(NAVET, peoply).await;
        run(&h.app).await;
        // 14:00 and 17:30 are too far apart by default.
        assert_eq!(h.app.list(None).await.unwrap().len(), 2);

        let (summary, outcome) = h
            .app
            .deduplicate(
                ALL_SOURCES,
                DedupOverrides {
                    title_similarity: None,
                    time_window_minutes: Some(240),
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.extracted, 2);
        assert_eq!(outcome.clusters, 1);
        assert_eq!(outcome.rewrite.events_removed, 1);

        let events = h.app.list(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].canonical_link().unwrap().source, "Navet");

        assert!(h
            .app
            .deduplicate(
                ALL_SOURCES,
                DedupOverrides {
                    title_similarity: Some(1.5),
                    time_window_minutes: None,
                },
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn show_targets() {
        assert_eq!("next".parse::<ShowTarget>().unwrap(), ShowTarget::Next);
        assert_eq!("random".parse::<ShowTarget>().unwrap(), ShowTarget::Random);
        assert_eq!("17".parse::<ShowTarget>().unwrap(), ShowTarget::Id(17));
        assert!("soon".parse::<ShowTarget>().is_err());

        let h = harness(NAVET, PEOPLY).await;
        run(&h.app).await;
        let any = h.app.show(ShowTarget::Random).await.unwrap().unwrap();
        let same = h.app.show(ShowTarget::Id(any.id)).await.unwrap().unwrap();
        assert_eq!(any.id, same.id);
        assert!(h.app.show(ShowTarget::Id(9999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_source_is_rejected_on_fetch() {
        let h = harness(NAVET, PEOPLY).await;
        let err = h.app.fetch("Facebook", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownSource(_)));
    }
}
