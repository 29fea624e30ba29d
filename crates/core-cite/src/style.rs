//! Citation styles and their in-text forms.

use core_services::BibliographyEntry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CitationStyle {
    /// ` [n]`, numbered by first appearance.
    Numeric,
    /// ` (Author, Year)`.
    AuthorDate,
}

impl CitationStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            CitationStyle::Numeric => "numeric",
            CitationStyle::AuthorDate => "author-date",
        }
    }
}

impl fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationStyle {
    type Err = crate::CiteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numeric" | "ieee" | "vancouver" => Ok(CitationStyle::Numeric),
            "author-date" | "author_date" | "apa" | "harvard" => Ok(CitationStyle::AuthorDate),
            _ => Err(crate::CiteError::UnknownStyle(s.to_string())),
        }
    }
}

pub fn numeric_form(number: usize) -> String {
    format!(" [{number}]")
}

/// Family name: the part before a comma, otherwise the last word.
fn family_name(author: &str) -> &str {
    let author = author.trim();
    match author.split_once(',') {
        Some((family, _)) => family.trim(),
        None => author.rsplit(' ').next().unwrap_or(author),
    }
}

pub fn author_date_form(entry: &BibliographyEntry) -> String {
    let names: Vec<&str> = entry
        .authors
        .iter()
        .map(|a| family_name(a))
        .filter(|a| !a.is_empty())
        .collect();
    let who = match names.as_slice() {
        [] if entry.title.trim().is_empty() => "Anonymous".to_string(),
        [] => entry.title.trim().to_string(),
        [one] => one.to_string(),
        [a, b] => format!("{a} & {b}"),
        [first, ..] => format!("{first} et al."),
    };
    let year = entry
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "n.d.".to_string());
    format!(" ({who}, {year})")
}
