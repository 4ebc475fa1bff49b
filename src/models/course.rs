//! Courses and their code/name history.

use serde::{Deserialize, Serialize};

/// A value that took effect in a given term. `since: None` is the base variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u32>,
}

impl Versioned {
    pub fn base(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            since: None,
        }
    }

    pub fn since(value: impl Into<String>, term_id: u32) -> Self {
        Self {
            value: value.into(),
            since: Some(term_id),
        }
    }
}

/// Value in effect for `term_id`: the latest record whose `since` is at or
/// before the term, else the unscoped record, else the oldest record.
fn as_of(history: &[Versioned], term_id: u32) -> &str {
    history
        .iter()
        .rev()
        .find(|v| v.since.is_some_and(|since| since <= term_id))
        .or_else(|| history.iter().find(|v| v.since.is_none()))
        .or_else(|| history.first())
        .map_or("", |v| v.value.as_str())
}

/// Insert keeping `since` non-decreasing (`None` first). Returns false when
/// the value is already the one in effect at `since`.
fn extend(history: &mut Vec<Versioned>, record: Versioned) -> bool {
    let effective = match record.since {
        Some(term_id) => history
            .iter()
            .any(|v| v.since.is_none_or(|s| s <= term_id))
            .then(|| as_of(history, term_id)),
        None => history
            .iter()
            .find(|v| v.since.is_none())
            .map(|v| v.value.as_str()),
    };
    if effective == Some(record.value.as_str()) {
        return false;
    }

    let at = history.partition_point(|v| v.since <= record.since);
    // The same value taking effect later: move its start earlier instead.
    if let Some(next) = history.get_mut(at)
        && next.value == record.value
    {
        next.since = record.since;
        return true;
    }
    history.insert(at, record);
    true
}

/// Record `value` as observed in `term_id`. A value seen before the course's
/// first observation becomes the new base; the old base is scoped to
/// `first_seen`.
fn observe(
    history: &mut Vec<Versioned>,
    first_seen: Option<u32>,
    value: &str,
    term_id: u32,
) -> bool {
    match first_seen {
        Some(first) if term_id < first => {
            if as_of(history, term_id) == value {
                return false;
            }
            for v in history.iter_mut().filter(|v| v.since.is_none()) {
                v.since = Some(first);
            }
            history.insert(0, Versioned::base(value));
            true
        }
        _ => extend(history, Versioned::since(value, term_id)),
    }
}

/// Uppercase course code without internal whitespace: `"cop 3530"` -> `"COP3530"`.
pub fn normalize_code(code: &str) -> String {
    code.split_whitespace()
        .flat_map(str::chars)
        .flat_map(char::to_uppercase)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: u64,
    pub department_id: u32,
    /// Non-decreasing by `since`.
    pub codes: Vec<Versioned>,
    /// Non-decreasing by `since`.
    pub names: Vec<Versioned>,
    /// Earliest term the course was listed in, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<u32>,
}

impl Course {
    pub fn new(department_id: u32, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            department_id,
            codes: vec![Versioned::base(code)],
            names: vec![Versioned::base(name)],
            first_seen: None,
        }
    }

    /// A course first listed in `term_id`.
    pub fn listed(
        department_id: u32,
        code: impl Into<String>,
        name: impl Into<String>,
        term_id: u32,
    ) -> Self {
        Self {
            first_seen: Some(term_id),
            ..Self::new(department_id, code, name)
        }
    }

    pub fn code_as_of(&self, term_id: u32) -> &str {
        as_of(&self.codes, term_id)
    }

    pub fn name_as_of(&self, term_id: u32) -> &str {
        as_of(&self.names, term_id)
    }

    /// The oldest known code.
    pub fn base_code(&self) -> &str {
        self.codes.first().map_or("", |v| v.value.as_str())
    }

    pub fn base_name(&self) -> &str {
        self.names.first().map_or("", |v| v.value.as_str())
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.codes.iter().any(|v| v.value == code)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|v| v.value == name)
    }

    /// Record that the course was listed as `code` in `term_id`.
    pub fn observe_code(&mut self, code: &str, term_id: u32) -> bool {
        observe(&mut self.codes, self.first_seen, code, term_id)
    }

    /// Record that the course was titled `name` in `term_id`.
    pub fn observe_name(&mut self, name: &str, term_id: u32) -> bool {
        observe(&mut self.names, self.first_seen, name, term_id)
    }

    /// Move `first_seen` back to `term_id` if that is earlier.
    pub fn observed_in(&mut self, term_id: u32) -> bool {
        match self.first_seen {
            Some(first) if first <= term_id => false,
            _ => {
                self.first_seen = Some(term_id);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPRING_2019: u32 = 201910;
    const FALL_2019: u32 = 201980;
    const FALL_2020: u32 = 202080;

    #[test]
    fn code_resolution_follows_history() {
        let mut course = Course::new(6502, "OLD101", "Intro");
        assert!(course.observe_code("NEW101", FALL_2019));

        assert_eq!(course.code_as_of(SPRING_2019), "OLD101");
        assert_eq!(course.code_as_of(FALL_2019), "NEW101");
        assert_eq!(course.code_as_of(FALL_2020), "NEW101");
        assert_eq!(course.base_code(), "OLD101");
    }

    #[test]
    fn scoped_only_history_falls_back_to_oldest() {
        let course = Course {
            id: 1,
            department_id: 1,
            codes: vec![
                Versioned::since("A100", FALL_2019),
                Versioned::since("B100", FALL_2020),
            ],
            names: vec![Versioned::base("Name")],
            first_seen: None,
        };
        assert_eq!(course.code_as_of(SPRING_2019), "A100");
        assert_eq!(course.code_as_of(FALL_2020), "B100");
    }

    #[test]
    fn extending_keeps_history_sorted() {
        let mut course = Course::new(1, "C3", "Name");
        assert!(course.observe_code("C5", FALL_2020));
        assert!(course.observe_code("C4", FALL_2019));
        let since: Vec<_> = course.codes.iter().map(|v| v.since).collect();
        assert_eq!(since, vec![None, Some(FALL_2019), Some(FALL_2020)]);
        assert_eq!(course.code_as_of(FALL_2019 + 1), "C4");
    }

    #[test]
    fn repeating_current_value_is_a_no_op() {
        let mut course = Course::new(1, "COP3530", "Data Structures");
        assert!(!course.observe_code("COP3530", FALL_2019));
        assert!(course.observe_name("Data Structures II", FALL_2019));
        assert!(!course.observe_name("Data Structures II", FALL_2020));
        assert_eq!(course.names.len(), 2);
    }

    #[test]
    fn earlier_sighting_of_later_value_moves_its_start() {
        let mut course = Course::new(1, "OLD101", "Intro");
        course.observe_code("NEW101", FALL_2020);
        assert!(course.observe_code("NEW101", FALL_2019));
        assert_eq!(course.codes.len(), 2);
        assert_eq!(course.codes[1].since, Some(FALL_2019));
    }

    #[test]
    fn value_older_than_first_listing_becomes_base() {
        // Scraped newest term first.
        let mut course = Course::listed(1, "NEW101", "Intro", FALL_2020);
        assert!(course.observe_code("OLD101", SPRING_2019));
        assert!(course.observed_in(SPRING_2019));

        assert_eq!(course.base_code(), "OLD101");
        assert_eq!(course.code_as_of(SPRING_2019), "OLD101");
        assert_eq!(course.code_as_of(FALL_2020), "NEW101");
        assert_eq!(course.first_seen, Some(SPRING_2019));
        assert!(!course.observed_in(FALL_2020));
    }

    #[test]
    fn codes_normalize() {
        assert_eq!(normalize_code(" cop  3530 "), "COP3530");
        assert_eq!(normalize_code("MAC2311C"), "MAC2311C");
    }
}
