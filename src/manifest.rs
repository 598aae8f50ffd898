//! The "Fuentes" appendix.
//!
//! Lists, per section, every article linked in the narrative (first-mention
//! order) followed by the cluster members the narrative did not link. A ✓
//! marks articles whose full body was retrieved.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt::Write;

use crate::models::Section;
use crate::utils::{link_target, link_text};

pub const MANIFEST_HEADING: &str = "## 📋 Fuentes de este newsletter";

/// `[**fragment**](target)` links written by the composer.
static CITATION_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\*\*[^\]]*\*\*\]\(([^)\s]+)\)").expect("valid citation regex"));

/// Link targets of citation links in `text`, each once, in order of first appearance.
pub fn cited_link_targets(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    CITATION_LINK
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SourceManifestBuilder;

impl SourceManifestBuilder {
    /// Render the appendix for `sections`. Sections without sources are left out.
    pub fn build(&self, sections: &[Section]) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = writeln!(out, "{MANIFEST_HEADING}");
        for section in sections.iter().filter(|s| !s.source_list.is_empty()) {
            let _ = writeln!(out, "\n### {}", section.category);
            for (n, entry) in section.source_list.iter().enumerate() {
                let article = &entry.article;
                let _ = writeln!(
                    out,
                    "{}. [{}]({}) - {}{}",
                    n + 1,
                    link_text(&article.title),
                    link_target(&article.url),
                    article.source_domain,
                    if article.fetch_ok { " ✓" } else { "" }
                );
            }
        }
        out
    }
}
