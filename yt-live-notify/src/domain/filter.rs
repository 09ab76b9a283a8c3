//! Keyword filtering of video records.

use serde::{Deserialize, Serialize};

use super::video::VideoRecord;

/// Case-insensitive keyword filter matched against title and description.
///
/// A record passes if any keyword is a substring of its lowercased title or
/// lowercased description. A filter with no keywords passes everything, and
/// so does a blank term (`"morning,"`), since the empty string is a substring
/// of every title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordFilter {
    /// Lowercased, trimmed keywords; empty when everything passes.
    keywords: Vec<String>,
}

impl KeywordFilter {
    /// Create a filter from individual keywords.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .collect();
        if keywords.iter().any(String::is_empty) {
            return Self::default();
        }
        Self { keywords }
    }

    /// Parse a comma-separated keyword list.
    ///
    /// Malformed input degrades to no filtering, never to an error.
    pub fn parse(csv: Option<&str>) -> Self {
        match csv {
            Some(csv) if !csv.trim().is_empty() => Self::new(csv.split(',')),
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Check if a record matches this filter.
    pub fn matches(&self, record: &VideoRecord) -> bool {
        if self.keywords.is_empty() {
            return true;
        }

        let title = record.title.to_lowercase();
        let description = record.description.to_lowercase();

        self.keywords
            .iter()
            .any(|keyword| title.contains(keyword) || description.contains(keyword))
    }

    /// Keep only the records matching this filter.
    pub fn apply(&self, records: Vec<VideoRecord>) -> Vec<VideoRecord> {
        if self.keywords.is_empty() {
            return records;
        }
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

/// Filter `records` by a comma-separated keyword list. `None` or empty is identity.
pub fn filter_by_keywords(records: Vec<VideoRecord>, keywords: Option<&str>) -> Vec<VideoRecord> {
    KeywordFilter::parse(keywords).apply(records)
}
