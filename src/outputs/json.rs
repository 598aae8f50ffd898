//! JSON side files.
//!
//! - `{doc_id}.sources.json`: the source list of every section, machine
//!   readable, written next to the markdown artifact
//! - `run_{date}_{HHMMSS}.json`: what the run produced, what failed, and
//!   which URLs were cited from which sections

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

use crate::error::Result;
use crate::models::{Category, Newsletter};
use crate::pipeline::{CitationLedger, RunContext, RunReport};

#[derive(Debug, Serialize)]
struct SourceRow<'a> {
    title: &'a str,
    url: &'a str,
    domain: &'a str,
    fetch_ok: bool,
    cited: bool,
}

#[derive(Debug, Serialize)]
struct SectionSources<'a> {
    category: Category,
    sources: Vec<SourceRow<'a>>,
}

#[derive(Debug, Serialize)]
struct SourcesFile<'a> {
    doc_id: &'a str,
    category_key: &'a str,
    date: String,
    generated_at: String,
    sections: Vec<SectionSources<'a>>,
}

#[derive(Debug, Serialize)]
struct Failure {
    key: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct RunFile<'a> {
    date: String,
    generated_at: String,
    generated: Vec<&'a str>,
    failed: Vec<Failure>,
    citations: CitationLedger,
}

/// Write `{output_dir}/{doc_id}.sources.json`.
#[instrument(level = "info", skip_all, fields(%output_dir, doc_id = %newsletter.doc_id))]
pub async fn write_sources(output_dir: &str, newsletter: &Newsletter) -> Result<PathBuf> {
    let file = SourcesFile {
        doc_id: &newsletter.doc_id,
        category_key: &newsletter.category_key,
        date: newsletter.date.to_string(),
        generated_at: newsletter.generated_at.to_rfc3339(),
        sections: newsletter
            .sections
            .iter()
            .map(|section| SectionSources {
                category: section.category,
                sources: section
                    .source_list
                    .iter()
                    .map(|entry| SourceRow {
                        title: &entry.article.title,
                        url: &entry.article.url,
                        domain: &entry.article.source_domain,
                        fetch_ok: entry.article.fetch_ok,
                        cited: entry.cited,
                    })
                    .collect(),
            })
            .collect(),
    };
    let json = serde_json::to_string_pretty(&file)?;

    let path = Path::new(output_dir).join(format!("{}.sources.json", newsletter.doc_id));
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote source manifest");
    Ok(path)
}

/// Write `{output_dir}/run_{date}_{HHMMSS}.json` for the whole run.
#[instrument(level = "info", skip_all, fields(%output_dir, date = %ctx.date))]
pub async fn write_run_ledger(
    output_dir: &str,
    ctx: &RunContext,
    report: &RunReport,
) -> Result<PathBuf> {
    let citations = report.citation_ledger();
    let shared = citations.shared().count();
    let file = RunFile {
        date: ctx.date.to_string(),
        generated_at: ctx.generated_at.to_rfc3339(),
        generated: report.newsletters.iter().map(|n| n.doc_id.as_str()).collect(),
        failed: report
            .failures
            .iter()
            .map(|(key, e)| Failure {
                key: key.clone(),
                error: e.to_string(),
            })
            .collect(),
        citations,
    };
    let json = serde_json::to_string_pretty(&file)?;

    let path = Path::new(output_dir).join(format!(
        "run_{}_{}.json",
        ctx.date.format("%Y-%m-%d"),
        ctx.generated_at.format("%H%M%S")
    ));
    fs::write(&path, json).await?;
    info!(path = %path.display(), cited = file.citations.cited.len(), shared, "Wrote run ledger");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::{Article, ArticleRecord, Cluster, Section};
    use crate::outputs::test_support::scratch_dir;
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use serde_json::Value;

    fn article(title: &str, url: &str, body: Option<&str>) -> Article {
        Article::from_record(ArticleRecord {
            title: title.into(),
            url: url.into(),
            body: body.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    fn newsletter() -> Newsletter {
        let a = article("Fed cuts rates", "https://lemonde.fr/fed", Some("body"));
        let b = article("Senate vote", "https://nytimes.com/vote", None);
        let section = Section::new(
            Category::Finanzas,
            vec![
                Cluster::new(Category::Finanzas, vec![a], 0),
                Cluster::new(Category::Finanzas, vec![b], 0),
            ],
            "[**Fed cuts rates**](https://lemonde.fr/fed)".into(),
        );
        Newsletter {
            category_key: "finanzas".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            generated_at: FixedOffset::east_opt(3600)
                .unwrap()
                .with_ymd_and_hms(2025, 1, 15, 7, 5, 9)
                .unwrap(),
            total_articles: 2,
            full_content_articles: 1,
            sections: vec![section],
            variant: "narrativa".into(),
            doc_id: "newsletter_finanzas_20250115_070509_finanzas_narrativa".into(),
        }
    }

    #[tokio::test]
    async fn test_sources_file_shape() {
        let dir = scratch_dir("json_sources");
        let path = write_sources(dir.to_str().unwrap(), &newsletter()).await.unwrap();
        assert!(path.to_string_lossy().ends_with("_narrativa.sources.json"));

        let v: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(v["category_key"], "finanzas");
        let sources = &v["sections"][0]["sources"];
        assert_eq!(v["sections"][0]["category"], "finanzas");
        assert_eq!(sources[0]["url"], "https://lemonde.fr/fed");
        assert_eq!(sources[0]["cited"], true);
        assert_eq!(sources[1]["domain"], "nytimes.com");
        assert_eq!(sources[1]["fetch_ok"], false);
        assert_eq!(sources[1]["cited"], false);
    }

    #[tokio::test]
    async fn test_run_ledger_lists_citations() {
        let dir = scratch_dir("json_run");
        let nl = newsletter();
        let ctx = RunContext::new(nl.date, nl.generated_at, PipelineConfig::default());
        let report = RunReport {
            newsletters: vec![nl],
            failures: vec![],
        };
        let path = write_run_ledger(dir.to_str().unwrap(), &ctx, &report).await.unwrap();
        assert!(path.ends_with("run_2025-01-15_070509.json"));

        let v: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(v["generated"][0], "newsletter_finanzas_20250115_070509_finanzas_narrativa");
        let refs = &v["citations"]["cited"]["https://lemonde.fr/fed"];
        assert_eq!(refs[0]["newsletter"], "finanzas");
        assert_eq!(refs[0]["category"], "finanzas");
        assert!(v["citations"]["cited"].get("https://nytimes.com/vote").is_none());
    }
}
