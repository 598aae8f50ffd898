//! Data models flowing through the newsletter pipeline.
//!
//! - [`ArticleRecord`]: an already-fetched article as handed over by the scraper
//! - [`Article`]: the normalized, categorized article held by the store
//! - [`Cluster`]: articles judged to report the same story
//! - [`Section`]: one category's narrative plus its ordered source list
//! - [`Newsletter`]: the assembled, immutable document of one generation run

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::error::{NewsletterError, Result};
use crate::manifest::cited_link_targets;
use crate::utils::{domain_of, fold_accents, link_target, normalize_url};

/// Topical section of a newsletter.
///
/// Declaration order is the order sections and category sets are listed in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[serde(alias = "economía", alias = "economy")]
    Economia,
    #[serde(alias = "política", alias = "politics")]
    Politica,
    #[serde(alias = "geopolítica", alias = "geopolitics")]
    Geopolitica,
    #[serde(alias = "finance")]
    Finanzas,
    #[serde(alias = "tecnología", alias = "technology", alias = "tech")]
    Tecnologia,
    #[serde(alias = "society")]
    Sociedad,
    #[serde(alias = "sports")]
    Deportes,
    General,
}

impl Category {
    /// Every section with its own editorial lexicon; `General` is the fallback.
    pub const CORE: [Category; 7] = [
        Category::Economia,
        Category::Politica,
        Category::Geopolitica,
        Category::Finanzas,
        Category::Tecnologia,
        Category::Sociedad,
        Category::Deportes,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Category::Economia => "Economía",
            Category::Politica => "Política",
            Category::Geopolitica => "Geopolítica",
            Category::Finanzas => "Finanzas",
            Category::Tecnologia => "Tecnología",
            Category::Sociedad => "Sociedad",
            Category::Deportes => "Deportes",
            Category::General => "General",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Category::Economia => "economia",
            Category::Politica => "politica",
            Category::Geopolitica => "geopolitica",
            Category::Finanzas => "finanzas",
            Category::Tecnologia => "tecnologia",
            Category::Sociedad => "sociedad",
            Category::Deportes => "deportes",
            Category::General => "general",
        }
    }

    /// Parse an upstream tag. Case and accents are ignored, English and
    /// a few common variants are accepted.
    pub fn from_tag(tag: &str) -> Option<Category> {
        let folded = fold_accents(&tag.trim().to_lowercase());
        let category = match folded.as_str() {
            "economia" | "economy" | "economics" | "business" => Category::Economia,
            "politica" | "politics" | "policy" => Category::Politica,
            "geopolitica" | "geopolitics" | "world" | "internacional" | "international" => {
                Category::Geopolitica
            }
            "finanzas" | "finance" | "markets" | "mercados" => Category::Finanzas,
            "tecnologia" | "technology" | "tech" | "ciencia" | "science" => Category::Tecnologia,
            "sociedad" | "society" | "cultura" | "culture" | "salud" | "health" => {
                Category::Sociedad
            }
            "deportes" | "sports" | "sport" | "deporte" => Category::Deportes,
            "general" => Category::General,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// An article as produced by the external scraper.
///
/// Only `title` and `url` are required; everything else is defaulted
/// by [`Article::from_record`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ArticleRecord {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub source_domain: Option<String>,
    #[serde(default)]
    pub category_tags: Vec<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub fetch_ok: Option<bool>,
    #[serde(default)]
    pub published_at: Option<DateTime<FixedOffset>>,
}

/// A normalized article.
///
/// `url` is the identity key (see [`Article::url_key`]). An article with
/// `fetch_ok == false` never carries a body but stays citable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Article {
    /// Ingestion order, assigned by the store.
    pub id: usize,
    pub title: String,
    pub url: String,
    pub source_domain: String,
    pub category_tags: BTreeSet<Category>,
    pub body: Option<String>,
    pub fetch_ok: bool,
    pub published_at: Option<DateTime<FixedOffset>>,
}

impl Article {
    /// Validate and normalize a scraper record.
    ///
    /// Tags that do not name a known category are dropped here; the
    /// categorizer decides what happens to an article left without any.
    pub fn from_record(record: ArticleRecord) -> Result<Article> {
        let title = record.title.split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() {
            return Err(NewsletterError::invalid_record(format!(
                "blank title for {}",
                record.url
            )));
        }
        let url = record.url.trim().to_string();
        if normalize_url(&url).is_none() {
            return Err(NewsletterError::invalid_record(format!(
                "unparsable url {url:?}"
            )));
        }

        let source_domain = record
            .source_domain
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .or_else(|| domain_of(&url))
            .unwrap_or_default();

        let body = record.body.filter(|b| !b.trim().is_empty());
        let fetch_ok = record.fetch_ok.unwrap_or(body.is_some()) && body.is_some();
        let body = if fetch_ok { body } else { None };

        let category_tags = record
            .category_tags
            .iter()
            .filter_map(|t| Category::from_tag(t))
            .collect();

        Ok(Article {
            id: 0,
            title,
            url,
            source_domain,
            category_tags,
            body,
            fetch_ok,
            published_at: record.published_at,
        })
    }

    /// Normalized URL used for identity and exact-URL merging.
    pub fn url_key(&self) -> String {
        normalize_url(&self.url).unwrap_or_else(|| self.url.clone())
    }
}

/// Articles judged to report the same story within one category.
///
/// Members keep ingestion order; every member stays citable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub category: Category,
    pub members: Vec<Article>,
    representative: usize,
}

impl Cluster {
    /// `representative` indexes into `members`, which must not be empty.
    pub fn new(category: Category, members: Vec<Article>, representative: usize) -> Cluster {
        debug_assert!(representative < members.len());
        Cluster {
            category,
            members,
            representative,
        }
    }

    pub fn representative(&self) -> &Article {
        &self.members[self.representative]
    }

    /// Members other than the representative, in cluster order.
    pub fn others(&self) -> impl Iterator<Item = &Article> {
        self.members
            .iter()
            .enumerate()
            .filter(move |(i, _)| *i != self.representative)
            .map(|(_, a)| a)
    }

    /// No member has a retrieved body; nothing can be quoted.
    pub fn is_headline_only(&self) -> bool {
        !self.representative().fetch_ok
    }
}

/// One line of a section's source list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceEntry {
    pub article: Article,
    pub category: Category,
    /// Linked from the section narrative.
    pub cited: bool,
}

/// A category's composed narrative and the sources behind it.
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub category: Category,
    pub clusters: Vec<Cluster>,
    pub narrative_text: String,
    pub source_list: Vec<SourceEntry>,
}

impl Section {
    /// Build the section and its source list: every article linked in
    /// `narrative_text` in first-mention order, then remaining cluster
    /// members in cluster order. Each URL appears once.
    pub fn new(category: Category, clusters: Vec<Cluster>, narrative_text: String) -> Section {
        let members: Vec<&Article> = clusters.iter().flat_map(|c| c.members.iter()).collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut source_list = Vec::new();

        for target in cited_link_targets(&narrative_text) {
            if let Some(article) = members.iter().find(|a| link_target(&a.url) == target) {
                if seen.insert(article.url_key()) {
                    source_list.push(SourceEntry {
                        article: (*article).clone(),
                        category,
                        cited: true,
                    });
                }
            } else {
                tracing::warn!(%category, url = %target, "Narrative links a url outside its clusters");
            }
        }
        for article in members {
            if seen.insert(article.url_key()) {
                source_list.push(SourceEntry {
                    article: article.clone(),
                    category,
                    cited: false,
                });
            }
        }

        Section {
            category,
            clusters,
            narrative_text,
            source_list,
        }
    }

    pub fn cited_count(&self) -> usize {
        self.source_list.iter().filter(|e| e.cited).count()
    }
}

/// Raw ingested volume reported in the newsletter header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub total_articles: usize,
    pub full_content_articles: usize,
}

impl Totals {
    /// Count distinct articles (by URL), before any deduplication.
    pub fn from_articles<'a>(articles: impl IntoIterator<Item = &'a Article>) -> Totals {
        let mut seen = HashSet::new();
        let mut totals = Totals::default();
        for article in articles {
            if seen.insert(article.url_key()) {
                totals.total_articles += 1;
                if article.fetch_ok {
                    totals.full_content_articles += 1;
                }
            }
        }
        totals
    }
}

/// An assembled newsletter. Built once per run by the assembler and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Newsletter {
    pub category_key: String,
    pub date: NaiveDate,
    pub generated_at: DateTime<FixedOffset>,
    pub total_articles: usize,
    pub full_content_articles: usize,
    pub sections: Vec<Section>,
    pub variant: String,
    /// Artifact file stem.
    pub doc_id: String,
}
