//! Built-in extraction strategies, from most to least specific.

use std::sync::LazyLock;

use ratekeeper_common::parse_locale_number;
use regex::Regex;
use scraper::{ElementRef, Selector};

use super::{Document, ExtractionCandidate, ExtractionStrategy};

/// Longest text treated as a label or a value cell.
const MAX_CELL_CHARS: usize = 40;

/// Ancestors climbed when looking for a value next to a label.
const MAX_ANCESTOR_HOPS: usize = 3;

const USD_LABELS: &[&str] = &["USD", "DOLAR", "DÓLAR", "DOLARES", "DÓLARES"];
const EUR_LABELS: &[&str] = &["EUR", "EURO", "EUROS"];

/// Historical anchors of the bulletin page.
pub struct KnownContainerStrategy {
    usd_selectors: Vec<String>,
    eur_selectors: Vec<String>,
}

impl KnownContainerStrategy {
    pub const ID: &'static str = "known-container";
    pub const CONFIDENCE: f64 = 0.95;

    pub fn new(usd_selectors: Vec<String>, eur_selectors: Vec<String>) -> Self {
        Self {
            usd_selectors,
            eur_selectors,
        }
    }

    fn first_value(document: &Document, selectors: &[String]) -> Option<f64> {
        selectors.iter().find_map(|raw| {
            // Unparseable selectors are skipped rather than failing the page.
            let selector = Selector::parse(raw).ok()?;
            document
                .html()
                .select(&selector)
                .find_map(|el| value_of(&el.text().collect::<String>()))
        })
    }
}

impl Default for KnownContainerStrategy {
    fn default() -> Self {
        Self::new(
            vec![
                "#dolar strong".to_string(),
                "#dolar .centrado".to_string(),
                "div.dolar strong".to_string(),
            ],
            vec![
                "#euro strong".to_string(),
                "#euro .centrado".to_string(),
                "div.euro strong".to_string(),
            ],
        )
    }
}

impl ExtractionStrategy for KnownContainerStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    fn attempt(&self, document: &Document) -> ExtractionCandidate {
        ExtractionCandidate {
            usd: Self::first_value(document, &self.usd_selectors),
            eur: Self::first_value(document, &self.eur_selectors),
            strategy_id: Self::ID.to_string(),
            confidence: Self::CONFIDENCE,
        }
    }
}

/// Finds a currency label and reads the nearest number after it.
///
/// The value is looked for in the label's following siblings, then in the
/// following siblings of up to three ancestors. That covers both
/// `<span>USD</span><strong>1,5</strong>` and a label and value sitting in
/// neighbouring table cells or grid columns.
pub struct DomAdjacencyStrategy;

impl DomAdjacencyStrategy {
    pub const ID: &'static str = "dom";
    pub const CONFIDENCE: f64 = 0.70;
}

impl ExtractionStrategy for DomAdjacencyStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    fn attempt(&self, document: &Document) -> ExtractionCandidate {
        let mut candidate = ExtractionCandidate::empty(Self::ID, Self::CONFIDENCE);
        let Ok(all) = Selector::parse("body *") else {
            return candidate;
        };

        for element in document.html().select(&all) {
            if matches!(element.value().name(), "script" | "style" | "noscript") {
                continue;
            }
            let Some(label) = label_of(&element) else {
                continue;
            };

            let slot = match label {
                Currency::Usd if candidate.usd.is_none() => &mut candidate.usd,
                Currency::Eur if candidate.eur.is_none() => &mut candidate.eur,
                _ => continue,
            };
            *slot = value_near(element);

            if candidate.usd.is_some() && candidate.eur.is_some() {
                break;
            }
        }

        candidate
    }
}

static USD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bUSD\b|\bD[óo]lar(?:es)?\b|US\$)\D{0,40}?(\d[\d.,]*\d|\d)")
        .expect("valid pattern")
});

static EUR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bEUR\b|\bEuros?\b|€)\D{0,40}?(\d[\d.,]*\d|\d)")
        .expect("valid pattern")
});

/// Last resort: scan the document text for a currency word followed by a
/// number.
pub struct RegexStrategy;

impl RegexStrategy {
    pub const ID: &'static str = "regex";
    pub const CONFIDENCE: f64 = 0.40;

    fn scan(pattern: &Regex, text: &str) -> Option<f64> {
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .find_map(|m| value_of(m.as_str()))
    }
}

impl ExtractionStrategy for RegexStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    fn attempt(&self, document: &Document) -> ExtractionCandidate {
        let text = document.text();
        ExtractionCandidate {
            usd: Self::scan(&USD_PATTERN, &text),
            eur: Self::scan(&EUR_PATTERN, &text),
            strategy_id: Self::ID.to_string(),
            confidence: Self::CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Currency {
    Usd,
    Eur,
}

/// Text nodes directly under `element`, ignoring descendants.
fn own_text(element: &ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|child| child.value().as_text().map(|t| &**t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A short, digit-free text naming one currency.
fn label_of(element: &ElementRef<'_>) -> Option<Currency> {
    let text = own_text(element);
    let text = text.trim();
    if text.is_empty()
        || text.chars().count() > MAX_CELL_CHARS
        || text.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }

    let upper = text.to_uppercase();
    let tokens: Vec<&str> = upper.split(|c: char| !c.is_alphanumeric()).collect();
    let names = |labels: &[&str]| tokens.iter().any(|t| labels.contains(t));

    match (names(USD_LABELS), names(EUR_LABELS)) {
        (true, false) => Some(Currency::Usd),
        (false, true) => Some(Currency::Eur),
        _ => None,
    }
}

fn value_near(label: ElementRef<'_>) -> Option<f64> {
    if let Some(value) = label
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find_map(value_within)
    {
        return Some(value);
    }

    label
        .ancestors()
        .filter_map(ElementRef::wrap)
        .take(MAX_ANCESTOR_HOPS)
        .find_map(|ancestor| {
            ancestor
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find_map(value_within)
        })
}

/// First short numeric text in `element` or its descendants.
fn value_within(element: ElementRef<'_>) -> Option<f64> {
    std::iter::once(element)
        .chain(element.descendants().skip(1).filter_map(ElementRef::wrap))
        .find_map(|el| value_of(&own_text(&el)))
}

/// Parse a cell that is just a number, possibly with a currency symbol.
fn value_of(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > MAX_CELL_CHARS {
        return None;
    }
    parse_locale_number(text).filter(|v| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Document {
        Document::parse(html)
    }

    #[test]
    fn test_known_container_reads_anchor() {
        let d = doc(r#"<div id="dolar"><span>USD</span><strong> 36,50 </strong></div>"#);
        let candidate = KnownContainerStrategy::default().attempt(&d);

        assert_eq!(candidate.usd, Some(36.5));
        assert_eq!(candidate.eur, None);
        assert_eq!(candidate.confidence, 0.95);
    }

    #[test]
    fn test_known_container_skips_bad_selector() {
        let strategy = KnownContainerStrategy::new(
            vec!["##broken[".to_string(), "#dolar strong".to_string()],
            vec![],
        );
        let d = doc(r#"<div id="dolar"><strong>40,10</strong></div>"#);

        assert_eq!(strategy.attempt(&d).usd, Some(40.1));
    }

    #[test]
    fn test_dom_reads_next_sibling() {
        let d = doc("<div><span>USD</span><strong>36,50</strong></div><div><b>Euro</b><i>40,00</i></div>");
        let candidate = DomAdjacencyStrategy.attempt(&d);

        assert_eq!(candidate.usd, Some(36.5));
        assert_eq!(candidate.eur, Some(40.0));
    }

    #[test]
    fn test_dom_climbs_to_neighbouring_column() {
        let d = doc(
            r#"<div class="row">
                 <div class="col"><img src="us.png"> <span> USD</span></div>
                 <div class="col"><strong> 36,50 </strong></div>
               </div>"#,
        );

        assert_eq!(DomAdjacencyStrategy.attempt(&d).usd, Some(36.5));
    }

    #[test]
    fn test_dom_ignores_labels_with_digits() {
        let d = doc("<p>USD 36,50</p>");
        assert!(!DomAdjacencyStrategy.attempt(&d).has_value());
    }

    #[test]
    fn test_label_matching() {
        let d = doc("<body><span>Dólar (USD)</span><span>Euros</span><span>USD / EUR</span><span>Usuario</span></body>");
        let labels: Vec<Option<Currency>> = d
            .html()
            .select(&Selector::parse("span").unwrap())
            .map(|el| label_of(&el))
            .collect();

        assert_eq!(
            labels,
            vec![Some(Currency::Usd), Some(Currency::Eur), None, None]
        );
    }

    #[test]
    fn test_regex_scans_text() {
        let d = doc("<p>Hoy: Dólar 36,50 y Euro 40,25.</p>");
        let candidate = RegexStrategy.attempt(&d);

        assert_eq!(candidate.usd, Some(36.5));
        assert_eq!(candidate.eur, Some(40.25));
    }

    #[test]
    fn test_regex_skips_unparseable_match() {
        let d = doc("<p>USD 1,23,456 ... USD 36,50</p>");
        assert_eq!(RegexStrategy.attempt(&d).usd, Some(36.5));
    }

    #[test]
    fn test_regex_ignores_script_and_style() {
        let d = doc(concat!(
            "<html><head><style>.usd::after { content: \"USD 1,00\" }</style></head>",
            "<body><script>var rate = \"USD 999,00\";</script>",
            "<p>Dólar 36,50</p></body></html>"
        ));
        assert_eq!(RegexStrategy.attempt(&d).usd, Some(36.5));
    }
}
