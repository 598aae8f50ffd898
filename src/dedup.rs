//! Cross-outlet story deduplication.
//!
//! Pairs of articles are scored and linked when the score reaches the
//! threshold; clusters are the connected components (union-find), so two
//! articles end up together when a chain of similar pairs joins them.
//!
//! Token weights are IDF over the batch being clustered, so words every
//! story shares count less than the words that set one event apart.
//!
//! Scoring:
//! - both bodies present: `0.4 * title_jaccard + 0.6 * body_cosine`, scaled
//!   down when the headlines disagree unless the bodies are near-identical
//! - otherwise: discounted title Jaccard, raised by URL slug overlap; an
//!   identical slug on the same domain counts as the same story
//!
//! When no article of the batch has a body, only exact (normalized) URL
//! equality merges. Nothing is ever dropped: an unmatched article becomes
//! its own cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument};

use crate::config::PipelineConfig;
use crate::models::{Article, Category, Cluster};
use crate::utils::{tokenize, url_slug_tokens};

/// Weight of the title in the two-body score.
const TITLE_WEIGHT: f64 = 0.4;
/// Below this title score, body similarity alone cannot link two articles.
const TITLE_AGREEMENT: f64 = 0.5;
/// Body cosine at which two texts are the same wire copy, whatever the headline.
const NEAR_DUPLICATE_BODY: f64 = 0.85;
/// Discount on a headline match nothing else corroborates.
const UNCORROBORATED_TITLE: f64 = 0.8;

/// Union-find over indices with path halving and union by rank.
#[derive(Debug)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Inverse document frequency of tokens over one clustering batch.
///
/// Vocabulary every story of the batch shares ("fed", "rates") weighs less
/// than the words that tell one event from another ("cuts", "holds").
#[derive(Debug)]
struct Idf {
    weights: HashMap<String, f64>,
    unseen: f64,
}

impl Idf {
    fn over(features: &[Features]) -> Self {
        let mut df: HashMap<&str, usize> = HashMap::new();
        for f in features {
            let mut doc: HashSet<&str> = f.title.iter().map(String::as_str).collect();
            if let Some(body) = &f.body {
                doc.extend(body.iter().map(String::as_str));
            }
            for t in doc {
                *df.entry(t).or_insert(0) += 1;
            }
        }
        let n = features.len() as f64;
        let weight = |df: f64| ((n + 1.0) / (df + 1.0)).ln() + 1.0;
        Self {
            weights: df
                .into_iter()
                .map(|(t, d)| (t.to_string(), weight(d as f64)))
                .collect(),
            unseen: weight(0.0),
        }
    }

    fn weight(&self, token: &str) -> f64 {
        self.weights.get(token).copied().unwrap_or(self.unseen)
    }
}

/// IDF-weighted Jaccard of two token sets.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>, idf: &Idf) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter: f64 = a.intersection(b).map(|t| idf.weight(t)).sum();
    let union: f64 = a.union(b).map(|t| idf.weight(t)).sum();
    inter / union
}

/// Cosine similarity of TF-IDF vectors.
fn cosine(a: &[String], b: &[String], idf: &Idf) -> f64 {
    fn tf_idf<'t>(tokens: &'t [String], idf: &Idf) -> HashMap<&'t str, f64> {
        let mut counts = HashMap::new();
        for t in tokens {
            *counts.entry(t.as_str()).or_insert(0.0) += idf.weight(t);
        }
        counts
    }
    let (ta, tb) = (tf_idf(a, idf), tf_idf(b, idf));
    let dot: f64 = ta
        .iter()
        .filter_map(|(k, va)| tb.get(k).map(|vb| va * vb))
        .sum();
    let norm_a = ta.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = tb.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Pre-tokenized view of an article.
struct Features<'a> {
    article: &'a Article,
    title: HashSet<String>,
    body: Option<Vec<String>>,
    slug: HashSet<String>,
}

impl<'a> Features<'a> {
    fn of(article: &'a Article) -> Self {
        Self {
            article,
            title: tokenize(&article.title).into_iter().collect(),
            body: article.body.as_deref().map(tokenize),
            slug: url_slug_tokens(&article.url).into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: f64,
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.similarity_threshold)
    }

    /// Group `articles` into story clusters for `category`.
    ///
    /// Clusters are ordered by their earliest-ingested member and members
    /// keep ingestion order, so the result does not depend on input order
    /// and re-clustering the members yields the same partition.
    ///
    /// # Arguments
    ///
    /// * `category` - Category stamped on every cluster
    /// * `articles` - The category's articles, in ingestion order
    ///
    /// # Returns
    ///
    /// Clusters covering every input article exactly once.
    #[instrument(level = "info", skip_all, fields(%category, articles = articles.len()))]
    pub fn cluster(&self, category: Category, articles: &[&Article]) -> Vec<Cluster> {
        let mut items: Vec<&Article> = articles.to_vec();
        items.sort_by_key(|a| a.id);

        let mut sets = DisjointSet::new(items.len());

        let mut by_url: HashMap<String, usize> = HashMap::new();
        for (i, article) in items.iter().enumerate() {
            if let Some(&first) = by_url.get(&article.url_key()) {
                sets.union(first, i);
            } else {
                by_url.insert(article.url_key(), i);
            }
        }

        if items.iter().any(|a| a.fetch_ok) {
            let features: Vec<Features> = items.iter().map(|a| Features::of(a)).collect();
            let idf = Idf::over(&features);
            for i in 0..features.len() {
                for j in (i + 1)..features.len() {
                    let s = score(&features[i], &features[j], &idf);
                    if s >= self.threshold {
                        debug!(
                            a = %features[i].article.url,
                            b = %features[j].article.url,
                            score = s,
                            "Linked as same story"
                        );
                        sets.union(i, j);
                    }
                }
            }
        } else {
            debug!("No article has a body; merging on exact url only");
        }

        // BTreeMap keyed by the first member index keeps cluster order stable
        let mut roots: HashMap<usize, usize> = HashMap::new();
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..items.len() {
            let root = sets.find(i);
            let first = *roots.entry(root).or_insert(i);
            groups.entry(first).or_default().push(i);
        }

        let clusters: Vec<Cluster> = groups
            .into_values()
            .map(|indices| {
                let members: Vec<Article> = indices.iter().map(|&i| items[i].clone()).collect();
                let representative = members.iter().position(|a| a.fetch_ok).unwrap_or(0);
                Cluster::new(category, members, representative)
            })
            .collect();

        info!(clusters = clusters.len(), "Clustered articles");
        clusters
    }
}

fn score(a: &Features, b: &Features, idf: &Idf) -> f64 {
    let title = jaccard(&a.title, &b.title, idf);
    match (&a.body, &b.body) {
        (Some(body_a), Some(body_b)) => {
            let body = cosine(body_a, body_b, idf);
            let blended = TITLE_WEIGHT * title + (1.0 - TITLE_WEIGHT) * body;
            if title >= TITLE_AGREEMENT || body >= NEAR_DUPLICATE_BODY {
                blended
            } else {
                // similar coverage under diverging headlines is a sibling event
                blended * title / TITLE_AGREEMENT
            }
        }
        _ => {
            let uncorroborated = UNCORROBORATED_TITLE * title;
            if a.slug.is_empty() || b.slug.is_empty() {
                return uncorroborated;
            }
            if a.slug == b.slug && a.article.source_domain == b.article.source_domain {
                return 1.0;
            }
            uncorroborated.max((title + jaccard(&a.slug, &b.slug, idf)) / 2.0)
        }
    }
}
