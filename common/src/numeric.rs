//! Locale-aware numeric parsing.
//!
//! Upstream pages print rates as `189,25870000`, `1.234,56` or `1,234.56`
//! depending on who last touched the template. [`parse_locale_number`]
//! resolves the decimal separator without being told the locale:
//!
//! - when both `,` and `.` appear, the rightmost one is the decimal separator
//!   and the other is a thousands separator;
//! - when only one kind appears and it splits the digits into groups of
//!   exactly three (`1,234` or `1.234.567`), it is a thousands separator and
//!   the value is an integer;
//! - otherwise a single occurrence is the decimal separator.
//!
//! The grouping rule is a policy, not a guess: `"1,234"` is always 1234, never
//! 1.234. Callers that need the decimal reading must supply more digits.

/// Parse a locale-ambiguous numeric string into a float.
///
/// Returns `None` when nothing digit-bearing remains after cleanup, when the
/// separators are malformed, or when the result is not finite.
pub fn parse_locale_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '\u{00A0}' | '\u{202F}'))
        .collect::<String>()
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '+' | '-'))
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let (negative, body) = split_sign(&cleaned);
    if body.contains(['+', '-']) {
        return None;
    }

    let (integer, fraction) = split_decimal(body)?;
    let integer = if integer.is_empty() { "0" } else { integer.as_str() };
    let fraction = if fraction.is_empty() { "0" } else { fraction.as_str() };

    let canonical = format!("{}{}.{}", if negative { "-" } else { "" }, integer, fraction);
    canonical.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn split_sign(cleaned: &str) -> (bool, &str) {
    match cleaned.chars().next() {
        Some('-') => (true, &cleaned[1..]),
        Some('+') => (false, &cleaned[1..]),
        _ => (false, cleaned),
    }
}

/// Split into integer and fraction digits with all thousands separators removed.
fn split_decimal(body: &str) -> Option<(String, String)> {
    let last_comma = body.rfind(',');
    let last_dot = body.rfind('.');

    let decimal_at = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => Some(comma.max(dot)),
        (Some(at), None) | (None, Some(at)) => {
            let separator = body.as_bytes()[at] as char;
            if is_thousands_grouped(body, separator) {
                None
            } else if body.matches(separator).count() > 1 {
                return None;
            } else {
                Some(at)
            }
        }
        (None, None) => None,
    };

    let Some(at) = decimal_at else {
        return Some((digits_only(body), String::new()));
    };

    if at == 0 || at == body.len() - 1 {
        return None;
    }

    let (integer, fraction) = (&body[..at], &body[at + 1..]);
    let decimal = body.as_bytes()[at] as char;
    if integer.contains(decimal) || fraction.contains(['.', ',']) {
        return None;
    }

    Some((digits_only(integer), fraction.to_string()))
}

/// `1,234` / `12.345.678`: a leading group of 1-3 digits followed by one or
/// more groups of exactly three.
fn is_thousands_grouped(body: &str, separator: char) -> bool {
    let mut groups = body.split(separator);
    let leading_ok = groups
        .next()
        .map(|g| (1..=3).contains(&g.len()) && g.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);

    let mut rest = 0;
    for group in groups {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        rest += 1;
    }

    leading_ok && rest > 0
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}
