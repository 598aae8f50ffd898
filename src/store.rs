//! In-memory article store keyed by normalized URL.
//!
//! The store is the only shared state of a run. It is filled by a single
//! writer during ingestion (`add` takes `&mut self`) and only read while
//! sections are composed.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::{NewsletterError, Result};
use crate::models::{Article, Category};

/// What `add` did with an article that was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New URL, stored under this ingestion id.
    Inserted(usize),
    /// Known URL, same categories. Content may have been upgraded.
    Unchanged(usize),
}

#[derive(Debug, Default)]
pub struct ArticleStore {
    articles: Vec<Article>,
    by_url: HashMap<String, usize>,
}

impl ArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an article, assigning its ingestion id.
    ///
    /// Re-adding a known URL never creates a second entry. With an identical
    /// category set it is a no-op; with a different one the sets are merged
    /// and [`NewsletterError::DuplicateUrl`] is returned so the caller can
    /// log the conflict. Either way a retrieved body replaces a missing one.
    ///
    /// # Arguments
    ///
    /// * `article` - Normalized article; its `id` is overwritten for new URLs
    ///
    /// # Returns
    ///
    /// [`AddOutcome::Inserted`] with the assigned id, or
    /// [`AddOutcome::Unchanged`] for a known URL with the same categories.
    pub fn add(&mut self, mut article: Article) -> Result<AddOutcome> {
        let key = article.url_key();
        let Some(id) = self.by_url.get(&key).copied() else {
            let id = self.articles.len();
            article.id = id;
            debug!(id, url = %article.url, "Stored article");
            self.by_url.insert(key, id);
            self.articles.push(article);
            return Ok(AddOutcome::Inserted(id));
        };

        let existing = &mut self.articles[id];
        if !existing.fetch_ok && article.fetch_ok {
            debug!(id, url = %existing.url, "Upgrading stored article with retrieved body");
            existing.body = article.body.take();
            existing.fetch_ok = true;
        }

        if existing.category_tags == article.category_tags {
            return Ok(AddOutcome::Unchanged(id));
        }
        existing.category_tags.extend(article.category_tags);
        Err(NewsletterError::DuplicateUrl {
            url: existing.url.clone(),
        })
    }

    /// Articles tagged with `category`, in ingestion order.
    ///
    /// The iterator is lazy and `Clone`, so it can be restarted.
    pub fn all(&self, category: Category) -> impl Iterator<Item = &Article> + Clone + '_ {
        self.articles
            .iter()
            .filter(move |a| a.category_tags.contains(&category))
    }

    pub fn get(&self, url: &str) -> Option<&Article> {
        let key = crate::utils::normalize_url(url).unwrap_or_else(|| url.to_string());
        self.by_url.get(&key).map(|&id| &self.articles[id])
    }

    /// Every category with at least one article.
    pub fn categories(&self) -> BTreeSet<Category> {
        self.articles
            .iter()
            .flat_map(|a| a.category_tags.iter().copied())
            .collect()
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}
