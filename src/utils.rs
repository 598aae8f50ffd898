//! Text and URL helpers shared by the pipeline stages.
//!
//! - Tokenization with accent folding and a small multilingual stopword list
//! - URL normalization used as the article identity key
//! - Slugs and markdown-safe link pieces
//! - Log truncation and output directory probing

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

use crate::error::Result;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // en
        "the", "a", "an", "and", "or", "of", "to", "in", "on", "at", "for", "with", "from", "by",
        "as", "is", "are", "was", "were", "be", "its", "it", "this", "that", "after", "over",
        "into", "amid", "says", "said", "will", "new", "has", "have", "how", "why", "what",
        // es
        "el", "la", "los", "las", "un", "una", "unos", "unas", "y", "o", "de", "del", "al",
        "en", "con", "por", "para", "que", "se", "su", "sus", "es", "son", "lo", "como", "mas",
        "sobre", "tras", "ante", "entre", "sin", "ya", "no",
        // fr
        "le", "les", "des", "du", "et", "ou", "au", "aux", "pour", "par", "sur", "dans", "une",
        "est", "qui", "ne", "pas",
    ]
    .into_iter()
    .collect()
});

/// Map accented latin letters to their base letter.
pub fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            'Á' | 'À' | 'Â' | 'Ä' | 'Ã' => 'A',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'O',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'Ñ' => 'N',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Lowercased, accent-folded content tokens of `text`.
///
/// Splits on anything that is not alphanumeric, drops stopwords and
/// single characters. Order is preserved and duplicates are kept.
pub fn tokenize(text: &str) -> Vec<String> {
    fold_accents(&text.to_lowercase())
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1 && !is_stopword(t))
        .map(str::to_string)
        .collect()
}

/// Identity form of a URL: lowercase host without `www.`, no fragment,
/// no `utm_*` parameters, no trailing slash.
///
/// Returns `None` when `raw` is not an absolute URL with a host.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    parsed.set_host(Some(&host)).ok()?;
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut out = parsed.to_string();
    while out.ends_with('/') {
        out.pop();
    }
    Some(out)
}

/// Host of `raw` without a leading `www.`.
pub fn domain_of(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Content tokens of the last meaningful path segment, e.g.
/// `https://ft.com/content/fed-cuts-rates.html` -> `["fed", "cuts", "rates"]`.
///
/// Purely numeric or hash-like segments (no letters, or longer than 80 chars)
/// carry no story signal and yield nothing.
pub fn url_slug_tokens(raw: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(raw.trim()) else {
        return Vec::new();
    };
    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");
    let segment = segment
        .rsplit_once('.')
        .map(|(stem, _ext)| stem)
        .unwrap_or(segment);
    if segment.len() > 80 || !segment.chars().any(|c| c.is_alphabetic()) {
        return Vec::new();
    }
    tokenize(&segment.replace(['-', '_'], " "))
}

/// Convert a title to a URL-friendly slug.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Economía y Finanzas"), "economia-y-finanzas");
/// ```
pub fn slugify(title: &str) -> String {
    fold_accents(&title.to_lowercase())
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// First `max_words` words of a title, stripped of characters that
/// would break `[**...**](...)` markup.
pub fn title_fragment(title: &str, max_words: usize) -> String {
    let cleaned = link_text(title);
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let fragment = words.iter().take(max_words).copied().collect::<Vec<_>>().join(" ");
    let fragment = fragment.trim_end_matches([',', ';', ':', '.', '-', '—']).trim();
    if words.len() > max_words {
        format!("{fragment}…")
    } else {
        fragment.to_string()
    }
}

/// Text usable inside markdown link brackets.
pub fn link_text(text: &str) -> String {
    text.replace(['[', ']'], "")
        .replace('*', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// URL usable as a markdown link target.
pub fn link_target(url: &str) -> String {
    url.trim()
        .replace(' ', "%20")
        .replace('(', "%28")
        .replace(')', "%29")
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a char boundary at or below `max` bytes and
/// get `"…(+N bytes)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<()> {
    fs::create_dir_all(path).await?;
    let scratch_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    stdfs::File::create(&scratch_path)?;
    let _ = stdfs::remove_file(&scratch_path);
    info!("Output directory is writable");
    Ok(())
}
