//! Notion identifier handling
//!
//! Ids show up as dashed UUIDs, bare 32-character hex strings, or embedded at
//! the end of a page URL (`https://www.notion.so/My-Post-0123...cdef?v=...`).

use regex_lite::Regex;
use std::sync::OnceLock;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Constant pattern, exercised by the tests below
        Regex::new(r"([0-9a-fA-F]{8}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{12})")
            .unwrap_or_else(|err| panic!("invalid id pattern: {err}"))
    })
}

/// Extract a Notion id from a raw id or URL and return it in canonical dashed form.
///
/// The query string is ignored so that a view id (`?v=...`) never shadows the
/// page id. Returns `None` when no id is present.
pub fn parse_page_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);

    id_pattern()
        .find_iter(without_query)
        .last()
        .map(|m| id_to_uuid(m.as_str()))
}

/// Insert dashes into a 32-hex id (`8-4-4-4-12`), lower-casing it.
///
/// Input that is already dashed is normalized the same way. Input of the wrong
/// length is returned lower-cased but otherwise unchanged.
pub fn id_to_uuid(id: &str) -> String {
    let compact: String = id
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if compact.len() != 32 || !compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return id.trim().to_ascii_lowercase();
    }

    format!(
        "{}-{}-{}-{}-{}",
        &compact[0..8],
        &compact[8..12],
        &compact[12..16],
        &compact[16..20],
        &compact[20..32]
    )
}

/// Root id without dashes, the form `loadPageChunk` accepts most reliably
pub fn compact_id(id: &str) -> String {
    id.chars().filter(|c| *c != '-').collect()
}
