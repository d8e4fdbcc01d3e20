//! `ls -l` output parsing

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

//                      perms          links     user                 group                size     month     day          time or year           name
const LONG_LISTING_PATTERN: &str = r"([-drwx+@]+)\s+(\d+)\s+([a-zA-Z0-9._-]+)\s+([a-zA-Z0-9._-]+)\s+(\d+)\s+(\w{3})\s+(\d{1,2})\s+(\d{1,2}:\d{1,2}|\d{4})\s+(.+)";

static LONG_LISTING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(LONG_LISTING_PATTERN).ok());

/// One parsed line of a long listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongListingEntry {
    pub permissions: String,
    pub links: u64,
    pub user: String,
    pub group: String,
    pub size: u64,
    pub month: String,
    pub day: u8,
    /// `HH:MM` for recent entries, the year otherwise
    pub time_or_year: String,
    pub name: String,
}

impl LongListingEntry {
    pub fn is_directory(&self) -> bool {
        self.permissions.starts_with('d')
    }

    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// Parse a single line, `None` when it is not an entry
pub fn parse_line(line: &str) -> Option<LongListingEntry> {
    let caps = LONG_LISTING.as_ref()?.captures(line)?;
    Some(LongListingEntry {
        permissions: caps[1].to_string(),
        links: caps[2].parse().ok()?,
        user: caps[3].to_string(),
        group: caps[4].to_string(),
        size: caps[5].parse().ok()?,
        month: caps[6].to_string(),
        day: caps[7].parse().ok()?,
        time_or_year: caps[8].to_string(),
        name: caps[9].trim_end().to_string(),
    })
}

/// Parse the whole output, skipping the `total` header and anything unparseable
pub fn parse_listing(output: &str) -> Vec<LongListingEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(parse_line)
        .collect()
}
