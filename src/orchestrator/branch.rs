//! Branch names for items

use crate::domain::WorkItem;

/// Longest slug kept in a synthesized branch name
const MAX_SLUG_LEN: usize = 40;

/// Lowercase ASCII slug of `title`: runs of anything other than letters and
/// digits become one `-`, trimmed at both ends and capped in length.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
            if slug.len() >= MAX_SLUG_LEN {
                break;
            }
        } else {
            pending_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// The item's recorded branch, or `{prefix}{id}-{slug}`
pub fn branch_name(item: &WorkItem, prefix: &str) -> String {
    if let Some(branch) = item.branch().map(str::trim).filter(|b| !b.is_empty()) {
        return branch.to_string();
    }
    let slug = slugify(item.title());
    if slug.is_empty() {
        format!("{prefix}{}", item.id)
    } else {
        format!("{prefix}{}-{slug}", item.id)
    }
}
