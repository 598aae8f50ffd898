//! Pipeline configuration.
//!
//! Read from an optional YAML file; every field has a default so an empty
//! or missing file yields a working setup with one newsletter per core
//! category.
//!
//! ```yaml
//! newsletters:
//!   - key: economia
//!     categories: [economia, finanzas]
//!     variant: narrativa
//! similarity_threshold: 0.5
//! fallback: template
//! keywords:
//!   deportes: [liga, mundial]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, instrument};

use crate::error::{NewsletterError, Result};
use crate::models::Category;

/// What to do with a section when the summarizer cannot produce prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Templated prose built from cluster titles and links.
    #[default]
    Template,
    /// A note in place of the narrative; sources are still listed.
    Stub,
    /// Drop the section from the newsletter.
    Skip,
}

/// One newsletter produced per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterDef {
    pub key: String,
    pub categories: Vec<Category>,
    #[serde(default = "default_variant")]
    pub variant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub newsletters: Vec<NewsletterDef>,

    /// Minimum pair score for two articles to be the same story.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_max_clusters_per_paragraph")]
    pub max_clusters_per_paragraph: usize,

    /// Sections composed concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Body characters handed to the summarizer per article.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// Keyword hits needed before content alone decides a category.
    #[serde(default = "default_min_keyword_hits")]
    pub min_keyword_hits: usize,

    #[serde(default)]
    pub fallback: FallbackPolicy,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Extra terms per category, merged into the built-in lexicon.
    #[serde(default)]
    pub keywords: BTreeMap<Category, Vec<String>>,

    /// Text printed as the zone in the "Generado" header line.
    #[serde(default)]
    pub timezone_label: Option<String>,
}

fn default_variant() -> String {
    "narrativa".into()
}
fn default_similarity_threshold() -> f64 {
    0.5
}
fn default_max_clusters_per_paragraph() -> usize {
    3
}
fn default_parallelism() -> usize {
    4
}
fn default_excerpt_chars() -> usize {
    1200
}
fn default_min_keyword_hits() -> usize {
    2
}
fn default_max_retries() -> usize {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            newsletters: Vec::new(),
            similarity_threshold: default_similarity_threshold(),
            max_clusters_per_paragraph: default_max_clusters_per_paragraph(),
            parallelism: default_parallelism(),
            excerpt_chars: default_excerpt_chars(),
            min_keyword_hits: default_min_keyword_hits(),
            fallback: FallbackPolicy::default(),
            max_retries: default_max_retries(),
            keywords: BTreeMap::new(),
            timezone_label: None,
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, or the defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&str>) -> Result<PipelineConfig> {
        let Some(path) = path else {
            info!("No pipeline config given; using defaults");
            return Ok(PipelineConfig::default());
        };
        let raw = std::fs::read_to_string(Path::new(path))?;
        let config = PipelineConfig::from_yaml(&raw)?;
        info!(path, newsletters = config.newsletters().len(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<PipelineConfig> {
        let config: PipelineConfig = if raw.trim().is_empty() {
            PipelineConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(NewsletterError::Config(format!(
                "similarity_threshold must be within 0..=1, got {}",
                self.similarity_threshold
            )));
        }
        if self.max_clusters_per_paragraph == 0 || self.parallelism == 0 {
            return Err(NewsletterError::Config(
                "max_clusters_per_paragraph and parallelism must be positive".into(),
            ));
        }
        if let Some(def) = self.newsletters.iter().find(|d| d.categories.is_empty()) {
            return Err(NewsletterError::Config(format!(
                "newsletter {} lists no categories",
                def.key
            )));
        }
        Ok(())
    }

    /// Configured newsletters, or one per core category plus "general".
    pub fn newsletters(&self) -> Vec<NewsletterDef> {
        if !self.newsletters.is_empty() {
            return self.newsletters.clone();
        }
        Category::CORE
            .iter()
            .copied()
            .chain(std::iter::once(Category::General))
            .map(|c| NewsletterDef {
                key: c.slug().to_string(),
                categories: vec![c],
                variant: default_variant(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = PipelineConfig::from_yaml("").unwrap();
        assert_eq!(config.similarity_threshold, 0.5);
        assert_eq!(config.fallback, FallbackPolicy::Template);
        let defs = config.newsletters();
        assert_eq!(defs.len(), 8);
        assert_eq!(defs[0].key, "economia");
        assert_eq!(defs[7].categories, vec![Category::General]);
    }

    #[test]
    fn test_parse_full_yaml() {
        let raw = r#"
newsletters:
  - key: economia_finanzas
    categories: [economia, finanzas]
  - key: mundo
    categories: [geopolítica]
    variant: breve
similarity_threshold: 0.4
fallback: stub
keywords:
  deportes: [liga, mundial]
timezone_label: CET
"#;
        let config = PipelineConfig::from_yaml(raw).unwrap();
        let defs = config.newsletters();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].categories, vec![Category::Economia, Category::Finanzas]);
        assert_eq!(defs[0].variant, "narrativa");
        assert_eq!(defs[1].categories, vec![Category::Geopolitica]);
        assert_eq!(defs[1].variant, "breve");
        assert_eq!(config.fallback, FallbackPolicy::Stub);
        assert_eq!(config.keywords[&Category::Deportes], vec!["liga", "mundial"]);
        assert_eq!(config.timezone_label.as_deref(), Some("CET"));
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let err = PipelineConfig::from_yaml("similarity_threshold: 1.5").unwrap_err();
        assert!(matches!(err, NewsletterError::Config(_)));
    }

    #[test]
    fn test_rejects_newsletter_without_categories() {
        let raw = "newsletters:\n  - key: vacia\n    categories: []\n";
        assert!(PipelineConfig::from_yaml(raw).is_err());
    }

    #[test]
    fn test_load_without_path() {
        let config = PipelineConfig::load(None).unwrap();
        assert_eq!(config.parallelism, 4);
    }
}
