//! Narrative prose for one section.
//!
//! Clusters are grouped into paragraphs by shared headline vocabulary. For
//! each paragraph the summarizer receives the group's sources behind numeric
//! markers (`[1]`, `[2]`, ...) and is asked to cite by marker. The composer
//! then owns every link:
//!
//! - links written by the model are reduced to their text
//! - the first occurrence of a known marker becomes `[**title fragment**](url)`,
//!   later occurrences and unknown markers are dropped
//! - a representative the model never cited is linked in a closing sentence
//!
//! Only fetch-complete articles get a marker, so an article without a body
//! is never linked from the prose; it only reaches the source list.
//! Headline-only clusters are named in a plain, link-free paragraph.
//!
//! The section always ends with a synthesis paragraph posing an open question.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::fmt::Write;
use tracing::{debug, info, instrument, warn};

use crate::config::{FallbackPolicy, PipelineConfig};
use crate::error::{NewsletterError, Result};
use crate::models::{Article, Category, Cluster};
use crate::summarizer::Summarizer;
use crate::utils::{link_target, link_text, title_fragment, tokenize, truncate_for_log};

/// Words of a title used as link text.
const FRAGMENT_WORDS: usize = 8;
/// Longest lead sentence quoted by the templated fallback.
const LEAD_CHARS: usize = 240;

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid link regex"));
static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(\d{1,3}(?:\s*[,;]\s*\d{1,3})*)\]").expect("valid marker regex")
});
static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+([.,;:!?])").expect("valid punctuation regex"));
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("valid space regex"));
static AUTOLINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:https?://|www\.)[^>\s]*>").expect("valid autolink regex"));
static BARE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:https?://|www\.)[^\s<>()\[\]]*[^\s<>()\[\].,;:!?'"]"#).expect("valid url regex")
});
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").expect("valid heading regex"));
static BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[-*+>]\s+)+").expect("valid bullet regex"));

/// Markdown link citing an article inside the narrative.
///
/// # Arguments
///
/// * `article` - The cited article
///
/// # Returns
///
/// `[**fragment**](url)`, where the fragment is the first words of the title
/// with link syntax escaped.
pub fn citation_link(article: &Article) -> String {
    format!(
        "[**{}**]({})",
        title_fragment(&article.title, FRAGMENT_WORDS),
        link_target(&article.url)
    )
}

/// A source offered to the model under `[marker]`.
#[derive(Debug)]
struct Citable<'a> {
    marker: usize,
    article: &'a Article,
    representative: bool,
}

/// Markers of one paragraph: representatives first, then fetched members.
#[derive(Debug)]
struct CitationTable<'a> {
    entries: Vec<Citable<'a>>,
}

impl<'a> CitationTable<'a> {
    fn for_group(group: &[&'a Cluster]) -> Self {
        let mut entries = Vec::new();
        for cluster in group {
            entries.push(Citable {
                marker: entries.len() + 1,
                article: cluster.representative(),
                representative: true,
            });
        }
        for cluster in group {
            for article in cluster.others().filter(|a| a.fetch_ok) {
                entries.push(Citable {
                    marker: entries.len() + 1,
                    article,
                    representative: false,
                });
            }
        }
        Self { entries }
    }

    fn get(&self, marker: usize) -> Option<&Citable<'a>> {
        self.entries.iter().find(|e| e.marker == marker)
    }

    /// Turn model output into one paragraph whose only links are ours.
    fn resolve(&self, raw: &str) -> String {
        let text = unlinked_prose(raw);

        let mut linked: HashSet<usize> = HashSet::new();
        let text = MARKER
            .replace_all(&text, |caps: &Captures| {
                caps[1]
                    .split([',', ';'])
                    .filter_map(|n| n.trim().parse::<usize>().ok())
                    .filter_map(|n| self.get(n))
                    .filter(|c| linked.insert(c.marker))
                    .map(|c| citation_link(c.article))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .into_owned();

        let mut paragraph = tidy(&text);
        let missing: Vec<String> = self
            .entries
            .iter()
            .filter(|c| c.representative && !linked.contains(&c.marker))
            .map(|c| citation_link(c.article))
            .collect();
        if !missing.is_empty() {
            debug!(missing = missing.len(), "Linking uncited representatives");
            if !paragraph.is_empty() && !paragraph.ends_with(['.', '!', '?']) {
                paragraph.push('.');
            }
            let _ = write!(paragraph, " Más detalles en {}.", missing.join(", "));
        }
        paragraph.trim().to_string()
    }
}

/// Model output as a single line of prose with every link it wrote removed.
///
/// Markdown headings are dropped and list or quote markers stripped; link
/// syntax keeps its text, autolinks and bare URLs go entirely. Markers are
/// left for the caller.
fn unlinked_prose(raw: &str) -> String {
    let text = raw
        .lines()
        .map(str::trim)
        .filter(|l| !HEADING.is_match(l))
        .map(|l| BULLET.replace(l, "").into_owned())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let text = MARKDOWN_LINK.replace_all(&text, "$1");
    let text = AUTOLINK.replace_all(&text, "");
    BARE_URL.replace_all(&text, "").into_owned()
}

fn tidy(text: &str) -> String {
    let text = SPACE_BEFORE_PUNCT.replace_all(text, "$1");
    MULTI_SPACE.replace_all(&text, " ").trim().to_string()
}

/// Group clusters whose representative headlines share vocabulary,
/// keeping input order and at most `max` clusters per group.
fn group_clusters<'c>(clusters: &[&'c Cluster], max: usize) -> Vec<Vec<&'c Cluster>> {
    let vocab: Vec<HashSet<String>> = clusters
        .iter()
        .map(|c| tokenize(&c.representative().title).into_iter().collect())
        .collect();
    let mut assigned = vec![false; clusters.len()];
    let mut groups = Vec::new();

    for i in 0..clusters.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let mut group = vec![clusters[i]];
        let mut words = vocab[i].clone();
        for j in (i + 1)..clusters.len() {
            if group.len() >= max {
                break;
            }
            if !assigned[j] && !vocab[j].is_disjoint(&words) {
                assigned[j] = true;
                group.push(clusters[j]);
                words.extend(vocab[j].iter().cloned());
            }
        }
        groups.push(group);
    }
    groups
}

/// First sentence of the body, cut at a word boundary.
fn lead_sentence(article: &Article) -> Option<String> {
    let body = article.body.as_deref()?;
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    let end = flat
        .find(". ")
        .map(|i| i + 1)
        .unwrap_or(flat.len());
    let mut lead = String::new();
    for word in flat[..end].split(' ') {
        if lead.chars().count() + word.chars().count() + 1 > LEAD_CHARS {
            lead.push('…');
            break;
        }
        if !lead.is_empty() {
            lead.push(' ');
        }
        lead.push_str(word);
    }
    let lead = link_text(&lead);
    if lead.is_empty() {
        return None;
    }
    Some(if lead.ends_with(['.', '…', '!', '?']) {
        lead
    } else {
        format!("{lead}.")
    })
}

fn excerpt(article: &Article, max_chars: usize) -> String {
    let body = article.body.as_deref().unwrap_or("");
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

pub struct NarrativeComposer<S> {
    summarizer: S,
    max_clusters_per_paragraph: usize,
    excerpt_chars: usize,
    fallback: FallbackPolicy,
}

impl<S: Summarizer> NarrativeComposer<S> {
    /// # Arguments
    ///
    /// * `summarizer` - Backend writing paragraphs and the synthesis
    /// * `config` - Supplies paragraph grouping, excerpt length and the
    ///   fallback policy
    pub fn new(summarizer: S, config: &PipelineConfig) -> Self {
        Self {
            summarizer,
            max_clusters_per_paragraph: config.max_clusters_per_paragraph.max(1),
            excerpt_chars: config.excerpt_chars,
            fallback: config.fallback,
        }
    }

    /// Compose the narrative for `clusters` of `category`.
    ///
    /// # Arguments
    ///
    /// * `clusters` - Deduplicated stories, in presentation order
    /// * `category` - Section the prose is written for
    ///
    /// # Returns
    ///
    /// Paragraphs separated by blank lines, the last one a synthesis ending in
    /// a question. Empty when `clusters` is empty.
    ///
    /// Summarizer failures follow the fallback policy: templated paragraphs,
    /// a stub note, or [`NewsletterError::SectionFailed`] under `skip`.
    #[instrument(level = "info", skip_all, fields(%category, clusters = clusters.len()))]
    pub async fn compose(&self, clusters: &[Cluster], category: Category) -> Result<String> {
        if clusters.is_empty() {
            return Ok(String::new());
        }
        let (quotable, headline_only): (Vec<&Cluster>, Vec<&Cluster>) =
            clusters.iter().partition(|c| !c.is_headline_only());

        let mut paragraphs = Vec::new();
        let mut fallbacks = 0usize;
        for group in group_clusters(&quotable, self.max_clusters_per_paragraph) {
            let table = CitationTable::for_group(&group);
            let prompt = self.paragraph_prompt(category, &table);
            match self.summarizer.summarize(&prompt).await {
                Ok(raw) => {
                    debug!(response_preview = %truncate_for_log(&raw, 200), "Paragraph generated");
                    paragraphs.push(table.resolve(&raw));
                }
                Err(e) => match self.fallback {
                    FallbackPolicy::Template => {
                        warn!(error = %e, "Summarizer failed; using templated paragraph");
                        fallbacks += 1;
                        paragraphs.push(templated_paragraph(category, &group, paragraphs.is_empty()));
                    }
                    FallbackPolicy::Stub => {
                        warn!(error = %e, "Summarizer failed; emitting stub section");
                        return Ok(stub_note(category));
                    }
                    FallbackPolicy::Skip => {
                        return Err(NewsletterError::SectionFailed {
                            category,
                            reason: e.to_string(),
                        });
                    }
                },
            }
        }

        if !headline_only.is_empty() {
            paragraphs.push(headlines_paragraph(&headline_only));
        }
        paragraphs.push(self.synthesis(category, clusters).await);

        info!(
            paragraphs = paragraphs.len(),
            templated = fallbacks,
            "Composed section narrative"
        );
        Ok(paragraphs.join("\n\n"))
    }

    fn paragraph_prompt(&self, category: Category, table: &CitationTable) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "PÁRRAFO · Sección «{category}»\n\n\
             Escribe un único párrafo de prosa periodística fluida en español que entrelace \
             las noticias siguientes.\n\
             Reglas:\n\
             - Usa solo la información de las fuentes.\n\
             - Cita cada fuente con su marcador entre corchetes, por ejemplo [1], en la frase \
             donde la mencionas por primera vez.\n\
             - No escribas enlaces, títulos, listas ni marcadores que no aparezcan abajo.\n\n\
             FUENTES:"
        );
        for entry in &table.entries {
            let _ = writeln!(
                prompt,
                "[{}] {} ({})\n{}\n",
                entry.marker,
                entry.article.title,
                entry.article.source_domain,
                excerpt(entry.article, self.excerpt_chars)
            );
        }
        prompt
    }

    async fn synthesis(&self, category: Category, clusters: &[Cluster]) -> String {
        let mut prompt = format!(
            "SÍNTESIS · Sección «{category}»\n\n\
             Escribe un párrafo breve (dos o tres frases) que conecte las historias \
             siguientes y termine con una pregunta abierta para el lector. \
             Sin enlaces, sin marcadores, sin listas.\n\nHISTORIAS:\n"
        );
        for cluster in clusters {
            let _ = writeln!(prompt, "- {}", cluster.representative().title);
        }

        match self.summarizer.summarize(&prompt).await {
            Ok(raw) => {
                let text = unlinked_prose(&raw);
                let text = tidy(&MARKER.replace_all(&text, ""));
                if text.contains('?') {
                    text
                } else {
                    debug!("Synthesis lacked a question; using template");
                    templated_synthesis(category, clusters)
                }
            }
            Err(e) => {
                debug!(error = %e, "Synthesis unavailable; using template");
                templated_synthesis(category, clusters)
            }
        }
    }
}

fn templated_paragraph(category: Category, group: &[&Cluster], opens_section: bool) -> String {
    let mut sentences = Vec::new();
    for (i, cluster) in group.iter().enumerate() {
        let rep = cluster.representative();
        let lead = lead_sentence(rep).unwrap_or_default();
        let sentence = if i == 0 && opens_section {
            format!(
                "En {category} destaca {}, según {}: {lead}",
                citation_link(rep),
                rep.source_domain
            )
        } else {
            format!("Además, {} ({}): {lead}", citation_link(rep), rep.source_domain)
        };
        sentences.push(sentence.trim_end_matches([':', ' ']).to_string());

        let others: Vec<String> = cluster
            .others()
            .filter(|a| a.fetch_ok)
            .map(citation_link)
            .collect();
        if !others.is_empty() {
            sentences.push(format!("También lo recogen {}.", others.join(", ")));
        }
    }
    sentences
        .into_iter()
        .map(|s| {
            if s.ends_with(['.', '…', '!', '?']) {
                s
            } else {
                format!("{s}.")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn headlines_paragraph(clusters: &[&Cluster]) -> String {
    let items: Vec<String> = clusters
        .iter()
        .map(|c| {
            let rep = c.representative();
            format!("{} ({})", link_text(&rep.title), rep.source_domain)
        })
        .collect();
    format!("También en titulares: {}.", items.join("; "))
}

fn templated_synthesis(category: Category, clusters: &[Cluster]) -> String {
    let themes: Vec<String> = clusters
        .iter()
        .take(2)
        .map(|c| title_fragment(&c.representative().title, FRAGMENT_WORDS))
        .collect();
    let count = match clusters.len() {
        1 => "una historia principal".to_string(),
        n => format!("{n} historias principales"),
    };
    let question = match themes.as_slice() {
        [a, b] => format!(
            "¿Qué hilo conecta «{a}» con «{b}», y cómo condicionará la agenda de {category} en los próximos días?"
        ),
        [a] => format!(
            "¿Qué consecuencias tendrá «{a}» para la agenda de {category} en los próximos días?"
        ),
        _ => format!("¿Hacia dónde se moverá la agenda de {category} en los próximos días?"),
    };
    format!("En conjunto, la jornada en {category} deja {count}. {question}")
}

fn stub_note(category: Category) -> String {
    format!(
        "_El resumen de {category} no está disponible en esta edición. \
         Las fuentes de la sección se listan al final._"
    )
}
