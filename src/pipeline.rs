//! Run orchestration.
//!
//! ```text
//! records -> ingest (normalize, categorize, store)
//!         -> per newsletter, per category: dedup -> compose -> Section
//!         -> assemble -> Newsletter
//! ```
//!
//! A [`RunContext`] carries the run date, the generation timestamp and the
//! configuration through every stage; nothing is kept in globals. Sections
//! of one newsletter are composed concurrently and only read the store. A
//! failing section is logged and left out, a failing newsletter does not
//! stop the others.

use chrono::{DateTime, FixedOffset, NaiveDate};
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument, warn};

use crate::assembler::{Edition, NewsletterAssembler};
use crate::categorizer::Categorizer;
use crate::composer::NarrativeComposer;
use crate::config::{NewsletterDef, PipelineConfig};
use crate::dedup::Deduplicator;
use crate::error::{NewsletterError, Result};
use crate::models::{Article, ArticleRecord, Category, Newsletter, Section, Totals};
use crate::store::{AddOutcome, ArticleStore};
use crate::summarizer::Summarizer;

/// Run-scoped state shared by every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub date: NaiveDate,
    pub generated_at: DateTime<FixedOffset>,
    pub config: PipelineConfig,
}

impl RunContext {
    pub fn new(date: NaiveDate, generated_at: DateTime<FixedOffset>, config: PipelineConfig) -> Self {
        Self {
            date,
            generated_at,
            config,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    /// Re-adds of a known URL (merged into the stored article).
    pub merged: usize,
    pub rejected: usize,
    /// Published on another day than the run date.
    pub off_date: usize,
    /// Articles that ended up in "general" for lack of signal.
    pub defaulted: usize,
}

/// Read article records from `path`: a JSON array, or one object per line
/// when the file ends in `.jsonl`. Unparsable JSON Lines are skipped.
#[instrument(level = "info")]
pub async fn read_records(path: &str) -> Result<Vec<ArticleRecord>> {
    let raw = tokio::fs::read_to_string(path).await?;
    let records = if path.ends_with(".jsonl") {
        parse_json_lines(&raw)
    } else {
        serde_json::from_str::<Vec<ArticleRecord>>(&raw)?
    };
    info!(count = records.len(), "Read article records");
    Ok(records)
}

fn parse_json_lines(raw: &str) -> Vec<ArticleRecord> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str::<ArticleRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(line = i + 1, error = %e, "Skipping unparsable record");
                None
            }
        })
        .collect()
}

/// Normalize, categorize and store `records`.
///
/// Invalid records are skipped, conflicting re-adds are merged; neither
/// stops ingestion.
///
/// # Arguments
///
/// * `records` - Raw input records
/// * `categorizer` - Assigns categories to each normalized article
/// * `ctx` - Run context; its date filters articles published on other days
///
/// # Returns
///
/// The populated store and counters of what was accepted, merged or dropped.
#[instrument(level = "info", skip_all, fields(records = records.len(), date = %ctx.date))]
pub fn ingest(
    records: Vec<ArticleRecord>,
    categorizer: &Categorizer,
    ctx: &RunContext,
) -> (ArticleStore, IngestReport) {
    let mut store = ArticleStore::new();
    let mut report = IngestReport::default();

    for record in records {
        let mut article = match Article::from_record(record) {
            Ok(article) => article,
            Err(e) => {
                warn!(error = %e, "Skipping record");
                report.rejected += 1;
                continue;
            }
        };
        if let Some(published) = article.published_at {
            if published.date_naive() != ctx.date {
                debug!(url = %article.url, %published, "Skipping article from another day");
                report.off_date += 1;
                continue;
            }
        }

        let categories = categorizer.classify(&article);
        if categories.contains(&Category::General)
            && !article.category_tags.contains(&Category::General)
        {
            report.defaulted += 1;
        }
        article.category_tags = categories;

        match store.add(article) {
            Ok(AddOutcome::Inserted(_)) => report.accepted += 1,
            Ok(AddOutcome::Unchanged(_)) => report.merged += 1,
            Err(NewsletterError::DuplicateUrl { url }) => {
                let merged = store.get(&url).map(|a| &a.category_tags);
                warn!(%url, categories = ?merged, "Duplicate url re-added; categories merged");
                report.merged += 1;
            }
            Err(e) => {
                warn!(error = %e, recoverable = e.is_recoverable(), "Store rejected article");
                report.rejected += 1;
            }
        }
    }

    info!(
        stored = store.len(),
        accepted = report.accepted,
        merged = report.merged,
        rejected = report.rejected,
        off_date = report.off_date,
        defaulted = report.defaulted,
        "Ingestion complete"
    );
    (store, report)
}

/// Where a URL was cited during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationRef {
    pub newsletter: String,
    pub category: Category,
}

/// Every URL linked from any narrative of the run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CitationLedger {
    pub cited: BTreeMap<String, Vec<CitationRef>>,
}

impl CitationLedger {
    /// URLs linked from more than one section.
    pub fn shared(&self) -> impl Iterator<Item = (&String, &Vec<CitationRef>)> {
        self.cited.iter().filter(|(_, refs)| refs.len() > 1)
    }
}

/// Outcome of a run over all configured newsletters.
#[derive(Debug, Default)]
pub struct RunReport {
    pub newsletters: Vec<Newsletter>,
    pub failures: Vec<(String, NewsletterError)>,
}

impl RunReport {
    pub fn citation_ledger(&self) -> CitationLedger {
        let mut ledger = CitationLedger::default();
        for newsletter in &self.newsletters {
            for section in &newsletter.sections {
                for entry in section.source_list.iter().filter(|e| e.cited) {
                    ledger
                        .cited
                        .entry(entry.article.url.clone())
                        .or_default()
                        .push(CitationRef {
                            newsletter: newsletter.category_key.clone(),
                            category: section.category,
                        });
                }
            }
        }
        // a key configured twice would record the same citation twice
        for refs in ledger.cited.values_mut() {
            *refs = refs
                .drain(..)
                .unique_by(|r| (r.newsletter.clone(), r.category))
                .collect();
        }
        ledger
    }
}

pub struct Pipeline<'a, S> {
    ctx: &'a RunContext,
    store: &'a ArticleStore,
    dedup: Deduplicator,
    composer: NarrativeComposer<S>,
    assembler: NewsletterAssembler,
}

impl<'a, S: Summarizer> Pipeline<'a, S> {
    /// # Arguments
    ///
    /// * `ctx` - Run context shared by every newsletter
    /// * `store` - Articles ingested for the run
    /// * `summarizer` - Backend handed to the narrative composer
    pub fn new(ctx: &'a RunContext, store: &'a ArticleStore, summarizer: S) -> Self {
        Self {
            ctx,
            store,
            dedup: Deduplicator::from_config(&ctx.config),
            composer: NarrativeComposer::new(summarizer, &ctx.config),
            assembler: NewsletterAssembler::new(ctx.config.timezone_label.clone()),
        }
    }

    pub fn assembler(&self) -> &NewsletterAssembler {
        &self.assembler
    }

    /// Cluster and narrate one category. `None` when it has no articles.
    #[instrument(level = "info", skip_all, fields(%category))]
    pub async fn build_section(&self, category: Category) -> Result<Option<Section>> {
        let articles: Vec<&Article> = self.store.all(category).collect();
        if articles.is_empty() {
            debug!("No articles for category");
            return Ok(None);
        }
        let mut clusters = self.dedup.cluster(category, &articles);
        // larger stories lead; ties keep ingestion order
        clusters.sort_by_key(|c| Reverse(c.members.len()));

        let narrative = self.composer.compose(&clusters, category).await?;
        let section = Section::new(category, clusters, narrative);
        info!(
            sources = section.source_list.len(),
            cited = section.cited_count(),
            "Section ready"
        );
        Ok(Some(section))
    }

    /// Build every section of `def` and assemble the newsletter.
    #[instrument(level = "info", skip_all, fields(key = %def.key))]
    pub async fn run_newsletter(&self, def: &NewsletterDef) -> Result<Newsletter> {
        let results: Vec<(Category, Result<Option<Section>>)> = stream::iter(def.categories.iter().copied())
            .map(|category| async move { (category, self.build_section(category).await) })
            .buffered(self.ctx.config.parallelism)
            .collect()
            .await;

        let mut sections = Vec::new();
        for (category, result) in results {
            match result {
                Ok(Some(section)) => sections.push(section),
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(%category, error = %e, "Section unavailable; leaving it out")
                }
                Err(e) => error!(%category, error = %e, "Section failed; leaving it out"),
            }
        }

        let totals = Totals::from_articles(
            def.categories
                .iter()
                .flat_map(|&category| self.store.all(category)),
        );
        let edition = Edition {
            key: &def.key,
            variant: &def.variant,
            date: self.ctx.date,
            generated_at: self.ctx.generated_at,
        };
        self.assembler.assemble(&edition, sections, totals)
    }

    /// Run every newsletter; failures are collected, not propagated.
    pub async fn run(&self, defs: &[NewsletterDef]) -> RunReport {
        let mut report = RunReport::default();
        for def in defs {
            match self.run_newsletter(def).await {
                Ok(newsletter) => report.newsletters.push(newsletter),
                Err(e) => {
                    error!(key = %def.key, error = %e, "Newsletter not generated");
                    report.failures.push((def.key.clone(), e));
                }
            }
        }
        info!(
            generated = report.newsletters.len(),
            failed = report.failures.len(),
            "Run complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackPolicy;
    use crate::manifest::cited_link_targets;
    use chrono::TimeZone;
    use once_cell::sync::Lazy;
    use regex::Regex;

    static PROMPT_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\[(\d+)\]").unwrap());

    /// Cites every source offered in the prompt, in order.
    struct CitingSummarizer;

    impl Summarizer for CitingSummarizer {
        async fn summarize(&self, prompt: &str) -> Result<String> {
            if prompt.starts_with("SÍNTESIS") {
                return Ok("Las piezas encajan. ¿Seguirá la tendencia?".into());
            }
            let cites: Vec<String> = PROMPT_MARKER
                .captures_iter(prompt)
                .map(|c| format!("según [{}]", &c[1]))
                .collect();
            Ok(format!("La jornada, {}.", cites.join(", ")))
        }
    }

    /// Fails for one section only.
    struct FailsFor(Category);

    impl Summarizer for FailsFor {
        async fn summarize(&self, prompt: &str) -> Result<String> {
            if prompt.contains(&format!("«{}»", self.0)) {
                return Err(NewsletterError::SummarizationUnavailable("boom".into()));
            }
            CitingSummarizer.summarize(prompt).await
        }
    }

    const FED_BODY: &str = "The Federal Reserve cut interest rates by a quarter point on \
        Wednesday, citing cooling inflation and a softer labour market.";
    const FED_BODY_FT: &str = "The Federal Reserve cut interest rates by a quarter point on \
        Wednesday, citing cooling inflation and a weaker labour market.";
    const SCHEME_BODY: &str = "The central bank will buy $40bn of Treasury bills each month \
        to ease strains in money markets after repo turmoil.";

    fn ctx(fallback: FallbackPolicy) -> RunContext {
        let tz = FixedOffset::east_opt(3600).unwrap();
        RunContext::new(
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            tz.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap(),
            PipelineConfig {
                fallback,
                ..Default::default()
            },
        )
    }

    fn record(title: &str, url: &str, body: Option<&str>, tags: &[&str]) -> ArticleRecord {
        ArticleRecord {
            title: title.into(),
            url: url.into(),
            body: body.map(str::to_string),
            category_tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn fed_records() -> Vec<ArticleRecord> {
        let tags = ["Finanzas", "Economia"];
        vec![
            record("Fed cuts rates", "https://www.lemonde.fr/economie/fed", Some(FED_BODY), &tags),
            record("Fed cuts rates", "https://www.ft.com/content/fed-cuts", Some(FED_BODY_FT), &tags),
            record(
                "Fed to launch $40bn debt-buying scheme",
                "https://www.ft.com/content/fed-scheme",
                Some(SCHEME_BODY),
                &tags,
            ),
        ]
    }

    fn def(key: &str, categories: &[Category]) -> NewsletterDef {
        NewsletterDef {
            key: key.into(),
            categories: categories.to_vec(),
            variant: "narrativa".into(),
        }
    }

    #[tokio::test]
    async fn test_fed_scenario() {
        let ctx = ctx(FallbackPolicy::Template);
        let categorizer = Categorizer::new(&ctx.config);
        let (store, report) = ingest(fed_records(), &categorizer, &ctx);
        assert_eq!(report.accepted, 3);

        let pipeline = Pipeline::new(&ctx, &store, CitingSummarizer);
        let nl = pipeline
            .run_newsletter(&def("economia", &[Category::Economia, Category::Finanzas]))
            .await
            .unwrap();

        assert_eq!(nl.total_articles, 3);
        assert_eq!(nl.full_content_articles, 3);
        assert_eq!(nl.sections.len(), 2);
        for section in &nl.sections {
            let sizes: Vec<usize> = section.clusters.iter().map(|c| c.members.len()).collect();
            assert_eq!(sizes, vec![2, 1]);
            let urls: Vec<&str> = section.source_list.iter().map(|e| e.article.url.as_str()).collect();
            assert_eq!(urls.len(), 3);
            assert!(urls.contains(&"https://www.lemonde.fr/economie/fed"));
            assert!(urls.contains(&"https://www.ft.com/content/fed-cuts"));
            assert!(urls.contains(&"https://www.ft.com/content/fed-scheme"));
        }

        let md = pipeline.assembler().render(&nl);
        assert!(md.contains("### Economía\n1. "));
        assert!(md.contains("### Finanzas\n1. "));
        assert!(md.contains("**Artículos totales:** 3 (3 con contenido completo)"));
    }

    #[tokio::test]
    async fn test_narrative_urls_listed_exactly_once() {
        let ctx = ctx(FallbackPolicy::Template);
        let categorizer = Categorizer::new(&ctx.config);
        let (store, _) = ingest(fed_records(), &categorizer, &ctx);
        let pipeline = Pipeline::new(&ctx, &store, CitingSummarizer);
        let section = pipeline.build_section(Category::Finanzas).await.unwrap().unwrap();

        let cited = cited_link_targets(&section.narrative_text);
        assert!(!cited.is_empty());
        for url in &cited {
            let hits = section
                .source_list
                .iter()
                .filter(|e| &crate::utils::link_target(&e.article.url) == url)
                .count();
            assert_eq!(hits, 1, "{url}");
        }
        // cited entries lead, in first-mention order
        let leading: Vec<String> = section
            .source_list
            .iter()
            .take(cited.len())
            .map(|e| crate::utils::link_target(&e.article.url))
            .collect();
        assert_eq!(leading, cited);
    }

    #[tokio::test]
    async fn test_unfetched_article_listed_but_never_linked() {
        let ctx = ctx(FallbackPolicy::Template);
        let categorizer = Categorizer::new(&ctx.config);
        let mut rec = record("Senate passes budget", "https://www.nytimes.com/2025/01/15/budget", None, &["Politica"]);
        rec.fetch_ok = Some(false);
        let (store, _) = ingest(vec![rec], &categorizer, &ctx);
        let pipeline = Pipeline::new(&ctx, &store, CitingSummarizer);

        let nl = pipeline.run_newsletter(&def("politica", &[Category::Politica])).await.unwrap();
        let section = &nl.sections[0];
        assert_eq!(section.source_list.len(), 1);
        assert!(!section.source_list[0].cited);
        assert!(!section.narrative_text.contains("nytimes.com/2025"));
        assert_eq!(nl.full_content_articles, 0);

        let md = pipeline.assembler().render(&nl);
        assert!(md.contains(
            "1. [Senate passes budget](https://www.nytimes.com/2025/01/15/budget) - nytimes.com\n"
        ));
    }

    #[tokio::test]
    async fn test_empty_category_yields_empty_newsletter_error() {
        let ctx = ctx(FallbackPolicy::Template);
        let categorizer = Categorizer::new(&ctx.config);
        let (store, _) = ingest(fed_records(), &categorizer, &ctx);
        let pipeline = Pipeline::new(&ctx, &store, CitingSummarizer);

        let report = pipeline
            .run(&[
                def("deportes", &[Category::Deportes]),
                def("finanzas", &[Category::Finanzas]),
            ])
            .await;
        assert_eq!(report.newsletters.len(), 1);
        assert_eq!(report.newsletters[0].category_key, "finanzas");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "deportes");
        assert!(matches!(report.failures[0].1, NewsletterError::EmptyNewsletter { .. }));
    }

    #[tokio::test]
    async fn test_failed_section_does_not_block_siblings() {
        let ctx = ctx(FallbackPolicy::Skip);
        let categorizer = Categorizer::new(&ctx.config);
        let (store, _) = ingest(fed_records(), &categorizer, &ctx);
        let pipeline = Pipeline::new(&ctx, &store, FailsFor(Category::Economia));

        let nl = pipeline
            .run_newsletter(&def("economia", &[Category::Economia, Category::Finanzas]))
            .await
            .unwrap();
        let categories: Vec<Category> = nl.sections.iter().map(|s| s.category).collect();
        assert_eq!(categories, vec![Category::Finanzas]);
        // header still reports every ingested article
        assert_eq!(nl.total_articles, 3);
    }

    #[tokio::test]
    async fn test_cross_posted_article_in_both_sections() {
        let ctx = ctx(FallbackPolicy::Template);
        let categorizer = Categorizer::new(&ctx.config);
        let (store, _) = ingest(fed_records(), &categorizer, &ctx);
        let pipeline = Pipeline::new(&ctx, &store, CitingSummarizer);
        let report = pipeline
            .run(&[def("economia", &[Category::Economia, Category::Finanzas])])
            .await;

        let ledger = report.citation_ledger();
        let refs = &ledger.cited["https://www.lemonde.fr/economie/fed"];
        let cats: Vec<Category> = refs.iter().map(|r| r.category).collect();
        assert_eq!(cats, vec![Category::Economia, Category::Finanzas]);
        assert!(ledger.shared().count() >= 1);
    }

    #[test]
    fn test_parse_json_lines_skips_bad_lines() {
        let raw = "{\"title\": \"Fed cuts rates\", \"url\": \"https://a.com/fed\"}\n\
                   \n\
                   not json\n\
                   {\"title\": \"Senate vote\", \"url\": \"https://b.com/vote\", \"fetch_ok\": false}\n";
        let records = parse_json_lines(raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].fetch_ok, Some(false));
    }

    #[tokio::test]
    async fn test_read_records_json_array() {
        let path = std::env::temp_dir().join(format!("newsletter_utils_records_{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"title": "Fed cuts rates", "url": "https://a.com/fed", "category_tags": ["Finanzas"],
                 "published_at": "2025-01-15T08:00:00+01:00"}]"#,
        )
        .unwrap();
        let records = read_records(path.to_str().unwrap()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category_tags, vec!["Finanzas"]);
        assert!(records[0].published_at.is_some());
    }

    #[test]
    fn test_ingest_report_counts() {
        let ctx = ctx(FallbackPolicy::Template);
        let categorizer = Categorizer::new(&ctx.config);
        let mut yesterday = record("Old news", "https://a.com/old", None, &["Politica"]);
        yesterday.published_at = Some(
            FixedOffset::east_opt(3600)
                .unwrap()
                .with_ymd_and_hms(2025, 1, 14, 12, 0, 0)
                .unwrap(),
        );
        let records = vec![
            record("Fed cuts rates", "https://a.com/fed", None, &["Finanzas"]),
            record("Fed cuts rates", "https://www.a.com/fed/", None, &["Economia"]),
            record("", "https://a.com/blank", None, &[]),
            record("Una tarde cualquiera", "https://a.com/tarde", None, &[]),
            yesterday,
        ];
        let (store, report) = ingest(records, &categorizer, &ctx);
        assert_eq!(
            report,
            IngestReport {
                accepted: 2,
                merged: 1,
                rejected: 1,
                off_date: 1,
                defaulted: 1,
            }
        );
        assert_eq!(store.all(Category::General).count(), 1);
        assert_eq!(store.all(Category::Economia).count(), 1);
        assert_eq!(store.all(Category::Finanzas).count(), 1);
    }
}
