//! Domain ID generation
//!
//! Generated IDs use the format: `{type}-{slug}-{12-hex}`
//! Example: `sess-build-parser-7f3a09c2b1de`

use waystore::key::is_valid_segment;

/// Longest slug kept in a generated ID
const MAX_SLUG_LEN: usize = 24;

/// Generate a domain ID from type and a human label
pub fn generate_id(domain_type: &str, label: &str) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    // v7 leads with the timestamp; the tail is random
    let suffix = &uuid[uuid.len() - 12..];
    let slug = slugify(label);
    if slug.is_empty() {
        format!("{}-{}", domain_type, suffix)
    } else {
        format!("{}-{}-{}", domain_type, slug, suffix)
    }
}

/// Check that an ID can be used as a single storage key segment
pub fn is_valid_id(id: &str) -> bool {
    is_valid_segment(id) && id != "." && id != ".."
}

/// Slugify a label for use in IDs
fn slugify(label: &str) -> String {
    let slug = label
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    match slug.char_indices().nth(MAX_SLUG_LEN) {
        Some((idx, _)) => slug[..idx].trim_end_matches('-').to_string(),
        None => slug,
    }
}
