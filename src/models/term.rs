//! Academic terms.
//!
//! A term id is `year * 100 + season code`, so ids sort chronologically:
//! Spring 2019 (`201910`) < Summer 2019 (`201950`) < Fall 2019 (`201980`).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Season {
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub fn code(self) -> u32 {
        match self {
            Self::Spring => 10,
            Self::Summer => 50,
            Self::Fall => 80,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            10 => Some(Self::Spring),
            50 => Some(Self::Summer),
            80 => Some(Self::Fall),
            _ => None,
        }
    }

    /// Parse a season name or the abbreviations the portal uses.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_end_matches('.').to_ascii_lowercase().as_str() {
            "spring" | "spr" | "sp" => Some(Self::Spring),
            "summer" | "sum" | "su" => Some(Self::Summer),
            "fall" | "fa" | "fal" => Some(Self::Fall),
            _ => None,
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spring => "Spring",
            Self::Summer => "Summer",
            Self::Fall => "Fall",
        })
    }
}

/// A term as shown in the term dropdown.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term {
    pub id: u32,
    pub name: String,
}

impl Term {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn from_parts(year: u32, season: Season) -> Self {
        Self {
            id: year * 100 + season.code(),
            name: format!("{season} {year}"),
        }
    }

    /// Parse a display name such as `"Fall 2019"` or `"Spr 2020"`.
    ///
    /// Used when an entry references a term missing from the dropdown.
    pub fn parse(name: &str) -> Option<Self> {
        let mut tokens = name.split_whitespace();
        let (first, second) = (tokens.next()?, tokens.next()?);
        if tokens.next().is_some() {
            return None;
        }

        let (season, year) = match (Season::parse(first), second.parse::<u32>()) {
            (Some(season), Ok(year)) => (season, year),
            // "2019 Fall"
            _ => (Season::parse(second)?, first.parse::<u32>().ok()?),
        };
        if !(1900..=2999).contains(&year) {
            return None;
        }
        Some(Self::from_parts(year, season))
    }

    pub fn year(&self) -> u32 {
        self.id / 100
    }

    pub fn season(&self) -> Option<Season> {
        Season::from_code(self.id % 100)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
