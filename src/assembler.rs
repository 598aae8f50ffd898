//! Final document assembly.
//!
//! Stitches the header block, the section narratives and the "Fuentes"
//! appendix into one markdown document and names the artifact:
//!
//! ```text
//! newsletter_<category_key>_<YYYYMMDD>_<HHMMSS>_<category-tags>_<variant>.md
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate};
use itertools::Itertools;
use std::fmt::Write;
use tracing::{info, instrument};

use crate::error::{NewsletterError, Result};
use crate::manifest::SourceManifestBuilder;
use crate::models::{Newsletter, Section, Totals};
use crate::utils::slugify;

pub const FOOTER: &str = "*Newsletter generado automáticamente por Newsletter Utils Pipeline*";

/// Identifies one generation run of one newsletter.
#[derive(Debug, Clone)]
pub struct Edition<'a> {
    pub key: &'a str,
    pub variant: &'a str,
    pub date: NaiveDate,
    pub generated_at: DateTime<FixedOffset>,
}

#[derive(Debug, Default, Clone)]
pub struct NewsletterAssembler {
    /// Printed after the generation time instead of the numeric offset.
    timezone_label: Option<String>,
    manifest: SourceManifestBuilder,
}

impl NewsletterAssembler {
    pub fn new(timezone_label: Option<String>) -> Self {
        Self {
            timezone_label,
            manifest: SourceManifestBuilder,
        }
    }

    /// Build the newsletter from composed sections.
    ///
    /// Sections without clusters are dropped; if none remain the run fails
    /// with [`NewsletterError::EmptyNewsletter`]. `totals` reports raw
    /// ingested volume, not cluster counts.
    ///
    /// # Arguments
    ///
    /// * `edition` - Key, variant, date and generation time of this run
    /// * `sections` - Composed sections in newsletter order
    /// * `totals` - Article counts shown in the header
    ///
    /// # Returns
    ///
    /// The newsletter with its `doc_id` set and empty sections removed.
    #[instrument(level = "info", skip_all, fields(key = %edition.key, date = %edition.date))]
    pub fn assemble(
        &self,
        edition: &Edition<'_>,
        sections: Vec<Section>,
        totals: Totals,
    ) -> Result<Newsletter> {
        let sections: Vec<Section> = sections
            .into_iter()
            .filter(|s| !s.clusters.is_empty())
            .collect();
        if sections.is_empty() {
            return Err(NewsletterError::EmptyNewsletter {
                key: edition.key.to_string(),
                date: edition.date,
            });
        }

        let tags = sections.iter().map(|s| s.category.slug()).join("-");
        let doc_id = format!(
            "newsletter_{}_{}_{}_{}_{}",
            slugify(edition.key),
            edition.date.format("%Y%m%d"),
            edition.generated_at.format("%H%M%S"),
            tags,
            slugify(edition.variant)
        );

        info!(%doc_id, sections = sections.len(), total = totals.total_articles, "Assembled newsletter");
        Ok(Newsletter {
            category_key: edition.key.to_string(),
            date: edition.date,
            generated_at: edition.generated_at,
            total_articles: totals.total_articles,
            full_content_articles: totals.full_content_articles.min(totals.total_articles),
            sections,
            variant: edition.variant.to_string(),
            doc_id,
        })
    }

    /// Markdown text of `newsletter`.
    pub fn render(&self, newsletter: &Newsletter) -> String {
        let zone = self
            .timezone_label
            .clone()
            .unwrap_or_else(|| newsletter.generated_at.format("%Z").to_string());

        let mut md = String::new();
        let _ = writeln!(md, "# {}\n", newsletter.category_key);
        let _ = writeln!(md, "**Fecha:** {}", newsletter.date.format("%Y-%m-%d"));
        let _ = writeln!(
            md,
            "**Generado:** {} {}",
            newsletter.generated_at.format("%Y-%m-%d %H:%M:%S"),
            zone
        );
        let _ = writeln!(
            md,
            "**Artículos totales:** {} ({} con contenido completo)\n",
            newsletter.total_articles, newsletter.full_content_articles
        );
        let _ = writeln!(md, "---\n");

        let headed = newsletter.sections.len() > 1;
        for section in &newsletter.sections {
            if headed {
                let _ = writeln!(md, "## {}\n", section.category);
            }
            let _ = writeln!(md, "{}\n", section.narrative_text.trim());
        }

        let _ = writeln!(md, "---\n");
        let _ = writeln!(md, "{}", self.manifest.build(&newsletter.sections));
        let _ = writeln!(md, "---");
        let _ = writeln!(md, "{FOOTER}");
        md
    }
}

impl Newsletter {
    pub fn file_name(&self) -> String {
        format!("{}.md", self.doc_id)
    }
}
