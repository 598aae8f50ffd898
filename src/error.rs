//! Error taxonomy for the newsletter pipeline.
//!
//! Most variants are recoverable and only ever reach a `warn!` line:
//! a duplicate URL merges categories, an ambiguous article lands in
//! "general", an unavailable summarizer falls back to templated prose.
//! [`NewsletterError::EmptyNewsletter`] is the one that stops an artifact
//! from being written.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Category;

#[derive(Debug, Error)]
pub enum NewsletterError {
    /// The URL was already registered with a different category set.
    /// The store has merged the categories when this is returned.
    #[error("duplicate url {url} re-added with a different category set")]
    DuplicateUrl { url: String },

    /// No category of the newsletter produced a single cluster.
    #[error("newsletter {key} for {date} has no content")]
    EmptyNewsletter { key: String, date: NaiveDate },

    #[error("summarization unavailable: {0}")]
    SummarizationUnavailable(String),

    /// Neither tags nor content gave a usable category.
    #[error("no category could be inferred for {url}")]
    CategoryAssignmentAmbiguous { url: String },

    #[error("section {category} failed: {reason}")]
    SectionFailed { category: Category, reason: String },

    #[error("invalid article record: {reason}")]
    InvalidRecord { reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, NewsletterError>;

impl NewsletterError {
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Whether the pipeline may log this error and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DuplicateUrl { .. }
                | Self::SummarizationUnavailable(_)
                | Self::CategoryAssignmentAmbiguous { .. }
                | Self::InvalidRecord { .. }
        )
    }
}
