//! Identifier helpers: slugs for providers and generated job ids.

/// Build a lowercase, dash-separated slug from a human name.
///
/// Runs of non-alphanumeric characters collapse into a single `-`; leading and
/// trailing dashes are trimmed. Returns an empty string when nothing usable remains.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Generate a fresh job identifier.
pub fn generate_job_id() -> String {
    format!("job-{}", uuid::Uuid::new_v4().simple())
}
