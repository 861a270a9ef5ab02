//! Multi-strategy rate extraction from bulletin HTML.
//!
//! The bulletin page changes markup without notice, so extraction is an
//! ordered list of independent strategies. Each one inspects the parsed
//! document and proposes a candidate; the first candidate that carries a value
//! and clears the confidence floor wins. Adding a strategy never touches the
//! orchestration here.

pub mod strategies;

use scraper::Html;
use tracing::{debug, warn};

pub use strategies::{DomAdjacencyStrategy, KnownContainerStrategy, RegexStrategy};

/// Candidates below this confidence are ignored.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.3;

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript"];

/// A parsed page handed to every strategy.
pub struct Document {
    raw: String,
    html: Html,
}

impl Document {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            html: Html::parse_document(raw),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Visible text of the document, whitespace-collapsed. Script, style
    /// and noscript contents are skipped.
    pub fn text(&self) -> String {
        self.html
            .root_element()
            .descendants()
            .filter(|node| {
                !node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .map_or(false, |e| HIDDEN_ELEMENTS.contains(&e.name()))
                })
            })
            .filter_map(|node| node.value().as_text().map(|t| &**t))
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What one strategy found.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionCandidate {
    pub usd: Option<f64>,
    pub eur: Option<f64>,
    pub strategy_id: String,
    pub confidence: f64,
}

impl ExtractionCandidate {
    /// A candidate with nothing in it.
    pub fn empty(strategy_id: &str, confidence: f64) -> Self {
        Self {
            usd: None,
            eur: None,
            strategy_id: strategy_id.to_string(),
            confidence,
        }
    }

    pub fn has_value(&self) -> bool {
        self.usd.is_some() || self.eur.is_some()
    }
}

/// One way of locating rates in a document.
pub trait ExtractionStrategy: Send + Sync {
    /// Stable identifier reported in extraction metadata.
    fn id(&self) -> &str;

    /// Inspect the document. Never fails; an empty candidate means "not found".
    fn attempt(&self, document: &Document) -> ExtractionCandidate;
}

/// Inclusive plausibility range for one rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBounds {
    pub min: f64,
    pub max: f64,
}

impl RateBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Which strategy produced the result and how much to trust it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionMeta {
    pub strategy_used: String,
    pub confidence: f64,
}

/// Final extraction outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub usd: Option<f64>,
    pub eur: Option<f64>,
    pub meta: ExtractionMeta,
}

impl Extraction {
    fn none() -> Self {
        Self {
            usd: None,
            eur: None,
            meta: ExtractionMeta {
                strategy_used: "none".to_string(),
                confidence: 0.0,
            },
        }
    }
}

/// Runs strategies in priority order.
pub struct HtmlExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_confidence: f64,
    usd_bounds: Option<RateBounds>,
    eur_bounds: Option<RateBounds>,
}

impl HtmlExtractor {
    /// Extractor with no strategies.
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            usd_bounds: None,
            eur_bounds: None,
        }
    }

    /// Append a strategy after the existing ones.
    pub fn with_strategy(mut self, strategy: impl ExtractionStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Discard extracted values outside these ranges.
    pub fn with_bounds(mut self, usd: Option<RateBounds>, eur: Option<RateBounds>) -> Self {
        self.usd_bounds = usd;
        self.eur_bounds = eur;
        self
    }

    /// Strategy ids in the order they run.
    pub fn strategy_ids(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    /// Extract rates from raw HTML.
    pub fn extract(&self, raw: &str) -> Extraction {
        let document = Document::parse(raw);
        self.extract_document(&document)
    }

    pub fn extract_document(&self, document: &Document) -> Extraction {
        for strategy in &self.strategies {
            let mut candidate = strategy.attempt(document);
            candidate.usd = candidate.usd.filter(|v| within(self.usd_bounds, *v));
            candidate.eur = candidate.eur.filter(|v| within(self.eur_bounds, *v));

            if !candidate.has_value() {
                debug!(strategy = strategy.id(), "Strategy found nothing");
                continue;
            }
            if candidate.confidence < self.min_confidence {
                debug!(
                    strategy = strategy.id(),
                    confidence = candidate.confidence,
                    "Strategy below confidence floor"
                );
                continue;
            }

            debug!(
                strategy = %candidate.strategy_id,
                usd = ?candidate.usd,
                eur = ?candidate.eur,
                "Extraction succeeded"
            );
            return Extraction {
                usd: candidate.usd,
                eur: candidate.eur,
                meta: ExtractionMeta {
                    strategy_used: candidate.strategy_id,
                    confidence: candidate.confidence,
                },
            };
        }

        warn!(
            strategies = self.strategies.len(),
            bytes = document.raw().len(),
            "All extraction strategies failed"
        );
        Extraction::none()
    }
}

impl Default for HtmlExtractor {
    /// `known-container`, then `dom`, then `regex`.
    fn default() -> Self {
        Self::empty()
            .with_strategy(KnownContainerStrategy::default())
            .with_strategy(DomAdjacencyStrategy)
            .with_strategy(RegexStrategy)
    }
}

fn within(bounds: Option<RateBounds>, value: f64) -> bool {
    value > 0.0 && bounds.map_or(true, |b| b.contains(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = include_str!("fixtures/bcv_original.html");
    const COSMETIC: &str = include_str!("fixtures/bcv_cosmetic.html");
    const RESTRUCTURED: &str = include_str!("fixtures/bcv_restructured.html");
    const PLAIN_TEXT: &str = include_str!("fixtures/bcv_plain_text.html");

    const USD: f64 = 189.2587;
    const EUR: f64 = 221.3644;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    struct Fixed(&'static str, f64, Option<f64>);

    impl ExtractionStrategy for Fixed {
        fn id(&self) -> &str {
            self.0
        }

        fn attempt(&self, _document: &Document) -> ExtractionCandidate {
            ExtractionCandidate {
                usd: self.2,
                eur: None,
                strategy_id: self.0.to_string(),
                confidence: self.1,
            }
        }
    }

    #[test]
    fn test_document_text_skips_hidden_elements() {
        let d = Document::parse(concat!(
            "<html><head><title>BCV</title><style>p { color: red }</style></head>",
            "<body><script>var usd = 999;</script><noscript>USD 1,00</noscript>",
            "<p>Dólar\n   36,50</p></body></html>"
        ));
        assert_eq!(d.text(), "BCV Dólar 36,50");
    }

    #[test]
    fn test_default_strategy_order() {
        assert_eq!(
            HtmlExtractor::default().strategy_ids(),
            vec!["known-container", "dom", "regex"]
        );
    }

    #[test]
    fn test_same_values_across_markup_variants() {
        let extractor = HtmlExtractor::default();

        for (fixture, strategy) in [
            (ORIGINAL, "known-container"),
            (COSMETIC, "dom"),
            (RESTRUCTURED, "dom"),
            (PLAIN_TEXT, "regex"),
        ] {
            let extraction = extractor.extract(fixture);
            assert!(approx(extraction.usd, USD), "usd via {strategy}: {:?}", extraction.usd);
            assert!(approx(extraction.eur, EUR), "eur via {strategy}: {:?}", extraction.eur);
            assert_eq!(extraction.meta.strategy_used, strategy);
        }
    }

    #[test]
    fn test_confidence_reflects_winning_strategy() {
        let extractor = HtmlExtractor::default();
        assert_eq!(extractor.extract(ORIGINAL).meta.confidence, 0.95);
        assert_eq!(extractor.extract(RESTRUCTURED).meta.confidence, 0.70);
        assert_eq!(extractor.extract(PLAIN_TEXT).meta.confidence, 0.40);
    }

    #[test]
    fn test_total_failure() {
        let extraction = HtmlExtractor::default().extract("<html><body><p>Mantenimiento</p></body></html>");

        assert_eq!(extraction.usd, None);
        assert_eq!(extraction.eur, None);
        assert_eq!(extraction.meta.strategy_used, "none");
        assert_eq!(extraction.meta.confidence, 0.0);
    }

    #[test]
    fn test_low_confidence_candidate_is_skipped() {
        let extractor = HtmlExtractor::empty()
            .with_strategy(Fixed("guess", 0.1, Some(1.0)))
            .with_strategy(Fixed("solid", 0.8, Some(2.0)));

        let extraction = extractor.extract("<html></html>");

        assert_eq!(extraction.usd, Some(2.0));
        assert_eq!(extraction.meta.strategy_used, "solid");
    }

    #[test]
    fn test_appended_strategy_runs_last() {
        let extractor = HtmlExtractor::default().with_strategy(Fixed("custom", 0.5, Some(7.0)));

        assert_eq!(extractor.extract(ORIGINAL).meta.strategy_used, "known-container");
        assert_eq!(extractor.extract("<p>nada</p>").usd, Some(7.0));
    }

    #[test]
    fn test_out_of_bounds_values_are_discarded() {
        let extractor = HtmlExtractor::default()
            .with_bounds(Some(RateBounds::new(150.0, 250.0)), Some(RateBounds::new(300.0, 400.0)));

        let extraction = extractor.extract(ORIGINAL);

        assert!(approx(extraction.usd, USD));
        assert_eq!(extraction.eur, None);
    }
}
