//! Instructor name parsing and normalization.
//!
//! Listing pages show only a last name (sometimes "Last, F"); the history page
//! shows the full name, either "Last, First Middle" or "First Middle Last".

use unicode_normalization::UnicodeNormalization;

use crate::utils::collapse_whitespace;

/// Known name suffixes to split off the last-name portion.
const SUFFIXES: &[&str] = &["iv", "iii", "ii", "jr", "sr"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameParts {
    pub first: String,
    pub last: String,
    pub suffix: Option<String>,
}

fn is_suffix(token: &str) -> bool {
    SUFFIXES.contains(&token.to_lowercase().trim_end_matches('.'))
}

/// Split a trailing suffix off the last-name portion.
///
/// `"LeBlanc III"` -> `("LeBlanc", Some("III"))`
fn extract_suffix(last: &str) -> (String, Option<String>) {
    let tokens: Vec<&str> = last.split_whitespace().collect();
    match tokens.split_last() {
        Some((candidate, rest)) if !rest.is_empty() && is_suffix(candidate) => {
            (rest.join(" "), Some(candidate.to_string()))
        }
        _ => (collapse_whitespace(last), None),
    }
}

/// Parse a full instructor name in either "Last, First" or "First Last" order.
///
/// ```
/// use isq::models::names::parse_full_name;
///
/// let parts = parse_full_name("O'Brien, Erin K.").unwrap();
/// assert_eq!(parts.first, "Erin K.");
/// assert_eq!(parts.last, "O'Brien");
/// ```
pub fn parse_full_name(full: &str) -> Option<NameParts> {
    if let Some((last, first)) = full.split_once(',') {
        let first = collapse_whitespace(first);
        let (last, suffix) = extract_suffix(last);
        if last.is_empty() || first.is_empty() {
            return None;
        }
        return Some(NameParts {
            first,
            last,
            suffix,
        });
    }

    let mut tokens: Vec<&str> = full.split_whitespace().collect();
    let suffix = match tokens.last() {
        Some(last) if tokens.len() > 2 && is_suffix(last) => tokens.pop().map(str::to_string),
        _ => None,
    };
    let (last, first) = tokens.split_last()?;
    if first.is_empty() {
        return None;
    }
    Some(NameParts {
        first: first.join(" "),
        last: last.to_string(),
        suffix,
    })
}

/// Last name as shown in a listing link: `"Smith"` or `"Smith, J"`.
pub fn last_name_from_link(text: &str) -> Option<String> {
    let last = text.split(',').next().map(collapse_whitespace)?;
    (!last.is_empty()).then_some(last)
}

/// First-name portion of `full`, given the last name already known from the
/// listing. Handles multi-token last names ("De La Cruz") that a plain split
/// would get wrong.
pub fn first_name_for(full: &str, known_last: &str) -> Option<String> {
    let full = collapse_whitespace(full);
    if full.contains(',') {
        return parse_full_name(&full).map(|parts| parts.first);
    }

    let wanted = normalize_for_matching(known_last);
    let tokens: Vec<&str> = full.split_whitespace().collect();
    if !wanted.is_empty() {
        for split in 1..tokens.len() {
            let tail: String = tokens[split..]
                .iter()
                .filter(|t| !is_suffix(t))
                .map(|t| normalize_for_matching(t))
                .collect();
            if tail == wanted {
                return Some(tokens[..split].join(" "));
            }
        }
    }
    parse_full_name(&full).map(|parts| parts.first)
}

/// Normalize a name for matching index keys.
///
/// Pipeline: lowercase -> NFD decompose -> strip combining marks ->
/// strip all punctuation, hyphens and whitespace.
///
/// ```
/// use isq::models::names::normalize_for_matching;
///
/// assert_eq!(normalize_for_matching("García"), "garcia");
/// assert_eq!(normalize_for_matching("O'Brien"), "obrien");
/// assert_eq!(normalize_for_matching("Aguirre-Mesa"), "aguirremesa");
/// ```
pub fn normalize_for_matching(s: &str) -> String {
    s.to_lowercase()
        .nfd()
        .filter(|c| c.is_alphabetic() && !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents() {
        assert_eq!(normalize_for_matching("José"), "jose");
    }

    #[test]
    fn normalize_strips_spaces() {
        assert_eq!(normalize_for_matching("De La Cruz"), "delacruz");
    }

    #[test]
    fn comma_order() {
        let parts = parse_full_name("Smith,  Jane  Q.").unwrap();
        assert_eq!(parts.first, "Jane Q.");
        assert_eq!(parts.last, "Smith");
        assert_eq!(parts.suffix, None);
    }

    #[test]
    fn comma_order_with_suffix() {
        let parts = parse_full_name("LeBlanc III, Paul").unwrap();
        assert_eq!(parts.last, "LeBlanc");
        assert_eq!(parts.suffix.as_deref(), Some("III"));
    }

    #[test]
    fn natural_order() {
        let parts = parse_full_name("Jane Q. Smith Jr.").unwrap();
        assert_eq!(parts.first, "Jane Q.");
        assert_eq!(parts.last, "Smith");
        assert_eq!(parts.suffix.as_deref(), Some("Jr."));
    }

    #[test]
    fn single_token_is_not_a_name() {
        assert_eq!(parse_full_name("Staff"), None);
        assert_eq!(parse_full_name(", Jane"), None);
    }

    #[test]
    fn link_text_last_name() {
        assert_eq!(last_name_from_link(" Smith, J "), Some("Smith".into()));
        assert_eq!(last_name_from_link("Nguyen"), Some("Nguyen".into()));
        assert_eq!(last_name_from_link("  "), None);
    }

    #[test]
    fn first_name_uses_known_last_name() {
        assert_eq!(
            first_name_for("Maria De La Cruz", "De La Cruz"),
            Some("Maria".into())
        );
        assert_eq!(
            first_name_for("Maria Elena Garcia", "García"),
            Some("Maria Elena".into())
        );
        assert_eq!(first_name_for("Cruz, Maria", "Cruz"), Some("Maria".into()));
    }

    #[test]
    fn first_name_falls_back_to_split() {
        assert_eq!(first_name_for("Ann Lee", "Unrelated"), Some("Ann".into()));
        assert_eq!(first_name_for("Lee", "Lee"), None);
    }
}
