//! Tag validation and normalization.

use crate::{Result, VaultError};

fn is_tag_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

/// Validate raw tags against count, length and charset limits.
///
/// Tags are checked after trimming and lowercasing; blank tags are ignored.
pub fn validate_tags(tags: &[String], max_tags: usize, max_tag_length: usize) -> Result<()> {
    if tags.len() > max_tags {
        return Err(VaultError::Validation(format!(
            "at most {max_tags} tags are allowed"
        )));
    }

    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > max_tag_length {
            return Err(VaultError::Validation(format!(
                "tag '{tag}' exceeds {max_tag_length} characters"
            )));
        }
        if !tag.chars().all(is_tag_char) {
            return Err(VaultError::Validation(format!(
                "tag '{tag}' may only contain lowercase letters, digits, '_' and '-'"
            )));
        }
    }

    Ok(())
}

/// Trim, lowercase, drop empties and deduplicate, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

/// Validate then normalize.
pub fn validate_and_normalize(
    tags: &[String],
    max_tags: usize,
    max_tag_length: usize,
) -> Result<Vec<String>> {
    validate_tags(tags, max_tags, max_tag_length)?;
    Ok(normalize_tags(tags))
}
