//! Artifact writers.
//!
//! # Submodules
//!
//! - [`markdown`]: the newsletter document itself
//! - [`json`]: per-newsletter source manifest and the per-run citation ledger
//! - [`indexes`]: `index.md`, listing every artifact by date
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── index.md
//! ├── newsletter_economia_20250115_070509_economia-finanzas_narrativa.md
//! ├── newsletter_economia_20250115_070509_economia-finanzas_narrativa.sources.json
//! └── run_2025-01-15_070509.json
//! ```
//!
//! Only assembled newsletters reach these writers, so a run that fails
//! with an empty newsletter leaves no file behind for it.

pub mod indexes;
pub mod json;
pub mod markdown;

use std::path::PathBuf;
use tracing::{error, instrument};

use crate::assembler::NewsletterAssembler;
use crate::error::Result;
use crate::pipeline::{RunContext, RunReport};

/// Write every artifact of `report` into `output_dir`.
///
/// A newsletter whose markdown cannot be written is logged and its index
/// entry skipped; the remaining newsletters are still written.
#[instrument(level = "info", skip_all, fields(%output_dir, newsletters = report.newsletters.len()))]
pub async fn write_run(
    output_dir: &str,
    ctx: &RunContext,
    report: &RunReport,
    assembler: &NewsletterAssembler,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for newsletter in &report.newsletters {
        let md = assembler.render(newsletter);
        let path = match markdown::write_newsletter(output_dir, newsletter, &md).await {
            Ok(path) => path,
            Err(e) => {
                error!(doc_id = %newsletter.doc_id, error = %e, "Failed writing newsletter");
                continue;
            }
        };
        written.push(path);

        match json::write_sources(output_dir, newsletter).await {
            Ok(path) => written.push(path),
            Err(e) => error!(doc_id = %newsletter.doc_id, error = %e, "Failed writing source manifest"),
        }
        if let Err(e) = indexes::update_index(output_dir, newsletter).await {
            error!(doc_id = %newsletter.doc_id, error = %e, "Failed to update index.md");
        }
    }

    written.push(json::write_run_ledger(output_dir, ctx, report).await?);
    Ok(written)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    /// Fresh scratch directory under the system temp dir.
    pub fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "newsletter_utils_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::scratch_dir;
    use super::*;
    use crate::error::NewsletterError;
    use crate::models::{Article, ArticleRecord, Category, Cluster, Section, Totals};
    use crate::assembler::Edition;
    use crate::config::PipelineConfig;
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    fn ctx() -> RunContext {
        let tz = FixedOffset::east_opt(3600).unwrap();
        RunContext::new(
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            tz.with_ymd_and_hms(2025, 1, 15, 7, 5, 9).unwrap(),
            PipelineConfig::default(),
        )
    }

    fn newsletter(assembler: &NewsletterAssembler, ctx: &RunContext, key: &str) -> crate::models::Newsletter {
        let article = Article::from_record(ArticleRecord {
            title: "Fed cuts rates".into(),
            url: "https://lemonde.fr/fed".into(),
            body: Some("The Fed cut rates.".into()),
            ..Default::default()
        })
        .unwrap();
        let section = Section::new(
            Category::Finanzas,
            vec![Cluster::new(Category::Finanzas, vec![article], 0)],
            "La Fed [**Fed cuts rates**](https://lemonde.fr/fed). ¿Y ahora?".into(),
        );
        let edition = Edition {
            key,
            variant: "narrativa",
            date: ctx.date,
            generated_at: ctx.generated_at,
        };
        assembler
            .assemble(&edition, vec![section], Totals { total_articles: 1, full_content_articles: 1 })
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_run_only_writes_assembled_newsletters() {
        let dir = scratch_dir("write_run");
        let out = dir.to_str().unwrap();
        let ctx = ctx();
        let assembler = NewsletterAssembler::default();
        let report = RunReport {
            newsletters: vec![newsletter(&assembler, &ctx, "finanzas")],
            failures: vec![(
                "deportes".into(),
                NewsletterError::EmptyNewsletter { key: "deportes".into(), date: ctx.date },
            )],
        };

        let written = write_run(out, &ctx, &report, &assembler).await.unwrap();
        assert_eq!(written.len(), 3);

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("newsletter_finanzas_") && n.ends_with(".md")));
        assert!(names.iter().any(|n| n.ends_with(".sources.json")));
        assert!(names.contains(&"run_2025-01-15_070509.json".to_string()));
        assert!(names.contains(&"index.md".to_string()));
        assert!(!names.iter().any(|n| n.contains("deportes")));
    }
}
