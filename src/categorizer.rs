//! Category assignment.
//!
//! Upstream tags win when they name a known section. Untagged articles are
//! scored against a keyword lexicon (title hits count double); when no
//! category reaches the configured minimum the article goes to
//! [`Category::General`]. An article always leaves with at least one category.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{NewsletterError, Result};
use crate::models::{Article, Category};
use crate::utils::tokenize;

/// Body tokens considered when scoring; leads carry the topic.
const BODY_TOKEN_WINDOW: usize = 400;

fn builtin_terms(category: Category) -> &'static [&'static str] {
    match category {
        Category::Economia => &[
            "economia", "economy", "economic", "inflacion", "inflation", "pib", "gdp", "empleo",
            "paro", "unemployment", "jobs", "salarios", "wages", "comercio", "trade", "aranceles",
            "tariffs", "exportaciones", "exports", "crecimiento", "growth", "recesion",
            "recession", "industria", "consumo", "precios", "prices", "presupuesto", "budget",
            "deficit", "fiscal", "impuestos", "taxes",
        ],
        Category::Politica => &[
            "gobierno", "government", "elecciones", "election", "elections", "parlamento",
            "parliament", "congreso", "congress", "senado", "senate", "partido", "party",
            "ministro", "minister", "presidente", "president", "ley", "law", "votacion", "vote",
            "oposicion", "opposition", "campana", "campaign", "coalicion", "coalition",
        ],
        Category::Geopolitica => &[
            "guerra", "war", "otan", "nato", "ucrania", "ukraine", "rusia", "russia", "china",
            "israel", "gaza", "iran", "sanciones", "sanctions", "diplomacia", "diplomacy",
            "frontera", "border", "militar", "military", "cumbre", "summit", "onu", "tratado",
            "treaty", "conflicto", "conflict", "ceasefire",
        ],
        Category::Finanzas => &[
            "fed", "bce", "ecb", "tipos", "rates", "interes", "bolsa", "stocks", "acciones",
            "shares", "bonos", "bonds", "deuda", "debt", "banco", "bank", "banks", "mercados",
            "markets", "inversores", "investors", "dividendos", "bitcoin", "divisas", "dolar",
            "dollar", "euro", "ibex", "nasdaq",
        ],
        Category::Tecnologia => &[
            "tecnologia", "technology", "ia", "ai", "inteligencia", "artificial", "software",
            "chip", "chips", "semiconductores", "semiconductors", "apple", "google", "microsoft",
            "nvidia", "openai", "startup", "ciberseguridad", "cybersecurity", "internet",
            "digital", "robot", "satelite",
        ],
        Category::Sociedad => &[
            "sociedad", "salud", "health", "educacion", "education", "vivienda", "housing",
            "sanidad", "hospital", "inmigracion", "immigration", "migrantes", "migrants",
            "mujeres", "women", "justicia", "tribunal", "court", "policia", "police", "clima",
            "climate", "cultura", "culture",
        ],
        Category::Deportes => &[
            "futbol", "football", "soccer", "liga", "league", "champions", "mundial",
            "olimpicos", "olympics", "tenis", "tennis", "baloncesto", "basketball", "nba", "gol",
            "goal", "entrenador", "coach", "fichaje", "f1", "ciclismo",
        ],
        Category::General => &[],
    }
}

#[derive(Debug, Clone)]
pub struct Categorizer {
    lexicon: BTreeMap<Category, HashSet<String>>,
    min_keyword_hits: usize,
}

impl Categorizer {
    pub fn new(config: &PipelineConfig) -> Self {
        let mut lexicon: BTreeMap<Category, HashSet<String>> = Category::CORE
            .iter()
            .map(|&c| (c, builtin_terms(c).iter().map(|t| t.to_string()).collect()))
            .collect();
        for (category, terms) in &config.keywords {
            if *category == Category::General {
                continue;
            }
            lexicon
                .entry(*category)
                .or_default()
                .extend(terms.iter().flat_map(|t| tokenize(t)));
        }
        Self {
            lexicon,
            min_keyword_hits: config.min_keyword_hits.max(1),
        }
    }

    /// Categories for `article`. Pure in the article's fields; never empty.
    pub fn classify(&self, article: &Article) -> BTreeSet<Category> {
        match self.try_classify(article) {
            Ok(categories) => categories,
            Err(e) => {
                debug!(error = %e, "Falling back to general");
                BTreeSet::from([Category::General])
            }
        }
    }

    /// Like [`classify`](Self::classify) but reports
    /// [`NewsletterError::CategoryAssignmentAmbiguous`] instead of defaulting.
    pub fn try_classify(&self, article: &Article) -> Result<BTreeSet<Category>> {
        if !article.category_tags.is_empty() {
            return Ok(article.category_tags.clone());
        }

        let scores = self.score(article);
        let best = scores.values().copied().max().unwrap_or(0);
        if best < self.min_keyword_hits {
            return Err(NewsletterError::CategoryAssignmentAmbiguous {
                url: article.url.clone(),
            });
        }
        Ok(scores
            .into_iter()
            .filter(|&(_, score)| score == best)
            .map(|(category, _)| category)
            .collect())
    }

    fn score(&self, article: &Article) -> BTreeMap<Category, usize> {
        let title = tokenize(&article.title);
        let body: Vec<String> = article
            .body
            .as_deref()
            .map(|b| tokenize(b).into_iter().take(BODY_TOKEN_WINDOW).collect())
            .unwrap_or_default();

        self.lexicon
            .iter()
            .map(|(&category, terms)| {
                let title_hits = title.iter().filter(|t| terms.contains(*t)).count();
                let body_hits = body.iter().filter(|t| terms.contains(*t)).count();
                (category, title_hits * 2 + body_hits)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArticleRecord;

    fn article(title: &str, body: Option<&str>, tags: &[&str]) -> Article {
        Article::from_record(ArticleRecord {
            title: title.to_string(),
            url: "https://example.com/story".to_string(),
            body: body.map(str::to_string),
            category_tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_tags_take_precedence() {
        let c = Categorizer::new(&PipelineConfig::default());
        let a = article("Real Madrid gana la liga", None, &["Finanzas", "Economía"]);
        assert_eq!(
            c.classify(&a),
            BTreeSet::from([Category::Economia, Category::Finanzas])
        );
    }

    #[test]
    fn test_keywords_decide_untagged_article() {
        let c = Categorizer::new(&PipelineConfig::default());
        let a = article(
            "La OTAN refuerza la frontera con Rusia",
            Some("La guerra en Ucrania ..."),
            &[],
        );
        assert_eq!(c.classify(&a), BTreeSet::from([Category::Geopolitica]));
    }

    #[test]
    fn test_ambiguous_article_falls_back_to_general() {
        let c = Categorizer::new(&PipelineConfig::default());
        let a = article("Una tarde cualquiera", None, &[]);
        assert!(matches!(
            c.try_classify(&a),
            Err(NewsletterError::CategoryAssignmentAmbiguous { .. })
        ));
        assert_eq!(c.classify(&a), BTreeSet::from([Category::General]));
    }

    #[test]
    fn test_unknown_tags_only_use_content() {
        let c = Categorizer::new(&PipelineConfig::default());
        let a = article("Nvidia presenta nuevos chips de IA", None, &["misc"]);
        assert_eq!(c.classify(&a), BTreeSet::from([Category::Tecnologia]));
    }

    #[test]
    fn test_configured_keywords_extend_lexicon() {
        let mut config = PipelineConfig::default();
        config
            .keywords
            .insert(Category::Deportes, vec!["Roland Garros".to_string()]);
        let c = Categorizer::new(&config);
        let a = article("Roland Garros arranca", None, &[]);
        assert_eq!(c.classify(&a), BTreeSet::from([Category::Deportes]));
    }

    #[test]
    fn test_classify_is_deterministic() {
        let c = Categorizer::new(&PipelineConfig::default());
        let a = article(
            "El BCE mantiene los tipos mientras la inflación baja",
            Some("Los precios y la deuda ..."),
            &[],
        );
        let first = c.classify(&a);
        for _ in 0..5 {
            assert_eq!(c.classify(&a), first);
        }
        assert!(!first.is_empty());
    }
}
